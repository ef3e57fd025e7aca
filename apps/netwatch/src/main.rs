mod cli;
mod commands;
mod config;
mod console;
mod echo_server;
mod monitoring;
mod shell;
mod store;
mod validation;

use anyhow::Result;
use clap::Parser;
use logger::{init_tracing, level_from_verbosity};

use cli::Cli;
use commands::App;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(level_from_verbosity(cli.verbose));

    let mut app = App::load(cli.config)?;
    app.run(cli.command).await
}
