//! Command dispatch for the CLI and the interactive shell.

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::{Command, ServiceCommand};
use crate::config::Settings;
use crate::console;
use crate::echo_server::EchoServer;
use crate::monitoring::{
    ConsoleSink, MonitorSession, ProbeRegistry, Protocol, ReportBlock, ReportSink, StopSummary, TargetSelection,
};
use crate::shell::{self, OperatorInput};
use crate::store::ConfigStore;
use crate::validation::{validate_host, validate_service};

pub struct App {
    settings: Settings,
    store: ConfigStore,
    registry: ProbeRegistry,
}

impl App {
    pub fn load(config: Option<PathBuf>) -> Result<Self> {
        let settings = Settings::from_config(config).context("Could not load settings")?;
        let store = ConfigStore::load(&settings.store.path)
            .with_context(|| format!("Could not load server store {}", settings.store.path.display()))?;
        let registry = ProbeRegistry::new(settings.probes.clone());

        debug!(store = %store.path().display(), servers = store.servers().len(), "application loaded");
        Ok(Self { settings, store, registry })
    }

    /// Run one command; `None` starts the interactive shell
    pub async fn run(&mut self, command: Option<Command>) -> Result<()> {
        let mut input = OperatorInput::stdin();
        match command {
            None | Some(Command::Shell) => shell::run(self, &mut input).await,
            Some(command) => self.dispatch(command, &mut input).await,
        }
    }

    pub async fn dispatch(&mut self, command: Command, input: &mut OperatorInput) -> Result<()> {
        match command {
            Command::AddService(cmd) => self.add_service(cmd),
            Command::EditService(cmd) => self.edit_service(cmd),
            Command::DeleteService { target, protocol } => self.delete_service(&target, protocol),
            Command::DeleteServer { target } => self.delete_server(&target),
            Command::ShowServers => {
                print!("{}", console::server_configs(self.store.servers()));
                Ok(())
            }
            Command::Monitor { target } => self.monitor(TargetSelection::One(target), input).await.map(|_| ()),
            Command::MonitorAll => self.monitor(TargetSelection::All, input).await.map(|_| ()),
            Command::EchoServer { bind } => self.echo_server(bind).await,
            Command::Settings => {
                println!("{}", self.settings);
                Ok(())
            }
            Command::Shell => {
                println!("Already in the interactive shell.");
                Ok(())
            }
        }
    }

    fn add_service(&mut self, cmd: ServiceCommand) -> Result<()> {
        let ServiceCommand { target, protocol, service } = cmd;
        validate_host(&target).into_result().map_err(|e| anyhow!(e))?;
        let service = service.into_service();
        validate_service(protocol, &service).into_result().map_err(|e| anyhow!(e))?;

        self.store
            .add_service(&target, protocol, service)
            .with_context(|| format!("Could not add {protocol} service to {target}"))?;
        println!("{protocol} service added to {target}.");
        Ok(())
    }

    fn edit_service(&mut self, cmd: ServiceCommand) -> Result<()> {
        let ServiceCommand { target, protocol, service } = cmd;
        let service = service.into_service();
        validate_service(protocol, &service).into_result().map_err(|e| anyhow!(e))?;

        self.store
            .edit_service(&target, protocol, service)
            .with_context(|| format!("Could not edit {protocol} service of {target}"))?;
        println!("{protocol} service of {target} updated.");
        Ok(())
    }

    fn delete_service(&mut self, target: &str, protocol: Protocol) -> Result<()> {
        self.store
            .delete_service(target, protocol)
            .with_context(|| format!("Could not delete {protocol} service of {target}"))?;
        println!("{protocol} service of {target} deleted.");
        Ok(())
    }

    fn delete_server(&mut self, target: &str) -> Result<()> {
        self.store.delete_server(target).with_context(|| format!("Could not delete server {target}"))?;
        println!("Server {target} deleted.");
        Ok(())
    }

    /// Run a session until the operator asks to stop
    async fn monitor(&self, selection: TargetSelection, input: &mut OperatorInput) -> Result<Option<StopSummary>> {
        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            println!("No servers configured. Add one with add-service.");
            return Ok(None);
        }

        let sink = Arc::new(ConsoleSink::stdout(console::terminal_width()));
        let mut session = MonitorSession::start(&selection, &snapshot, &self.registry, sink.clone())
            .context("Could not start monitoring")?;

        let mut overview = ReportBlock::new(format!(
            "Monitoring {} service(s), press Enter to stop",
            session.workers().len()
        ));
        for worker in session.workers() {
            overview = overview.line(format!(
                "  {:<24} {:<10} every {}s",
                worker.target,
                worker.protocol.as_str(),
                worker.interval.as_secs()
            ));
        }
        if let Err(e) = sink.emit(&overview) {
            warn!("cannot write to the console: {}", e);
        }

        let request = input.wait_for_stop().await;
        debug!(session = %session.id(), ?request, "stop requested");

        let summary = session.stop().await.context("Could not stop monitoring")?;
        println!(
            "Monitoring stopped: {} worker(s) stopped, {} report(s) written{}.",
            summary.workers_stopped,
            summary.reports_emitted,
            if summary.panicked > 0 { format!(", {} worker(s) crashed", summary.panicked) } else { String::new() }
        );
        Ok(Some(summary))
    }

    async fn echo_server(&self, bind: Option<String>) -> Result<()> {
        let addr = bind.unwrap_or_else(|| self.settings.echo_server.bind.clone());
        let server = EchoServer::bind(&addr).await.with_context(|| format!("Could not listen on {addr}"))?;

        println!("Echo server listening on {}. Press Ctrl-C to stop.", server.local_addr()?);
        server.run().await.context("Echo server failed")?;
        info!("echo server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ServiceArgs;
    use tempfile::tempdir;

    fn app(dir: &std::path::Path) -> App {
        App::load(Some(dir.join("config.toml"))).unwrap()
    }

    fn tcp(target: &str, port: u64) -> ServiceCommand {
        ServiceCommand {
            target: target.to_string(),
            protocol: Protocol::Tcp,
            service: ServiceArgs { interval: 5, port: Some(port), ..ServiceArgs::default() },
        }
    }

    #[test]
    fn test_service_lifecycle_persists() {
        let dir = tempdir().unwrap();
        let mut app = app(dir.path());

        app.add_service(tcp("10.0.0.5", 22)).unwrap();
        assert!(app.add_service(tcp("10.0.0.5", 2222)).is_err());
        app.edit_service(tcp("10.0.0.5", 2222)).unwrap();

        let reloaded = self::app(dir.path());
        assert_eq!(reloaded.store.servers()["10.0.0.5"]["TCP"].params["port"], serde_json::json!(2222));

        app.delete_service("10.0.0.5", Protocol::Tcp).unwrap();
        assert!(app.store.servers().is_empty());
        assert!(app.delete_server("10.0.0.5").is_err());
    }

    #[test]
    fn test_invalid_service_is_not_stored() {
        let dir = tempdir().unwrap();
        let mut app = app(dir.path());

        let err = app.add_service(tcp("10.0.0.5", 70000)).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("port"), "{err}");

        let err = app.add_service(tcp("bad host", 22)).unwrap_err();
        assert!(err.to_string().contains("spaces"), "{err}");

        assert!(app.store.servers().is_empty());
    }

    #[tokio::test]
    async fn test_monitor_unknown_target_fails_before_spawning() {
        let dir = tempdir().unwrap();
        let mut app = app(dir.path());
        app.add_service(tcp("10.0.0.5", 22)).unwrap();
        let mut input = OperatorInput::from_lines(Vec::<String>::new());

        let err = app.monitor(TargetSelection::One("10.0.0.9".into()), &mut input).await.unwrap_err();
        assert!(format!("{err:#}").contains("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_monitor_stops_on_enter() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempdir().unwrap();
        let mut app = app(dir.path());
        app.add_service(tcp("127.0.0.1", u64::from(port))).unwrap();
        let mut input = OperatorInput::from_lines(vec![String::new()]);

        let summary = app.monitor(TargetSelection::All, &mut input).await.unwrap().unwrap();

        assert_eq!(summary.workers_stopped, 1);
        assert_eq!(summary.panicked, 0);
        drop(listener);
    }
}
