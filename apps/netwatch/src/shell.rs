//! Line-oriented interactive prompt.

use anyhow::{Result, bail};
use clap::Parser;
use std::io::{self, Cursor, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use crate::cli::ShellLine;
use crate::commands::App;
use crate::console;

const PROMPT: &str = "netwatch> ";

/// Why a monitoring session is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    Enter,
    Interrupt,
    EndOfInput,
}

/// Operator keyboard input, one line at a time
pub struct OperatorInput {
    lines: Lines<Box<dyn AsyncBufRead + Unpin + Send>>,
}

impl OperatorInput {
    pub fn stdin() -> Self {
        Self::from_reader(Box::new(BufReader::new(tokio::io::stdin())))
    }

    /// Scripted input, mostly for tests
    pub fn from_lines<S: AsRef<str>>(lines: impl IntoIterator<Item = S>) -> Self {
        let mut text = String::new();
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        Self::from_reader(Box::new(Cursor::new(text.into_bytes())))
    }

    fn from_reader(reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self { lines: reader.lines() }
    }

    /// Next prompt line; `None` at end of input or once `interrupt` fires
    pub async fn next_line_or(&mut self, interrupt: impl Future<Output = ()>) -> io::Result<Option<String>> {
        tokio::select! {
            biased;
            line = self.lines.next_line() => line,
            () = interrupt => Ok(None),
        }
    }

    /// Block until the operator presses Enter, hits Ctrl-C or closes input
    pub async fn wait_for_stop(&mut self) -> StopRequest {
        tokio::select! {
            biased;
            line = self.lines.next_line() => match line {
                Ok(Some(_)) => StopRequest::Enter,
                Ok(None) => StopRequest::EndOfInput,
                Err(e) => {
                    warn!("cannot read operator input: {}", e);
                    StopRequest::EndOfInput
                }
            },
            () = interrupted() => StopRequest::Interrupt,
        }
    }
}

/// Resolves on Ctrl-C; never resolves when the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Split a prompt line into words; double or single quotes group words
pub fn split_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = None;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        bail!("Unterminated quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Prompt for commands until `exit`, Ctrl-C or end of input
pub async fn run(app: &mut App, input: &mut OperatorInput) -> Result<()> {
    let width = console::terminal_width();
    println!("{}", console::banner(width));
    println!("{}", console::command_list());

    loop {
        print!("{PROMPT}");
        io::stdout().flush()?;

        // Ctrl-C at the prompt exits like end of input
        let Some(line) = input.next_line_or(interrupted()).await? else {
            println!();
            break;
        };

        let words = match split_line(&line) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        match words.first().map(String::as_str) {
            None => continue,
            Some("exit" | "quit") => break,
            Some("help") if words.len() == 1 => {
                println!("{}", console::command_list());
                continue;
            }
            Some(_) => {}
        }

        match ShellLine::try_parse_from(&words) {
            Ok(parsed) => {
                if let Err(e) = app.dispatch(parsed.command, input).await {
                    eprintln!("Error: {e:#}");
                }
            }
            Err(e) => {
                let _ = e.print();
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line_handles_quotes() {
        assert_eq!(split_line("  show-servers  ").unwrap(), vec!["show-servers"]);
        assert_eq!(
            split_line(r#"delete-service 10.0.0.5 "LOCAL TCP""#).unwrap(),
            vec!["delete-service", "10.0.0.5", "LOCAL TCP"]
        );
        assert_eq!(split_line("add-service h 'x' ''").unwrap(), vec!["add-service", "h", "x", ""]);
        assert!(split_line("monitor \"web").is_err());
        assert!(split_line("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_input() {
        let mut input = OperatorInput::from_lines(["first", ""]);

        assert_eq!(input.next_line_or(std::future::pending()).await.unwrap().as_deref(), Some("first"));
        assert_eq!(input.wait_for_stop().await, StopRequest::Enter);
        assert_eq!(input.wait_for_stop().await, StopRequest::EndOfInput);
    }

    #[tokio::test]
    async fn test_interrupt_ends_prompt_while_waiting() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut input = OperatorInput::from_reader(Box::new(BufReader::new(reader)));

        let line = input.next_line_or(std::future::ready(())).await.unwrap();

        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn test_pending_line_wins_over_interrupt() {
        let mut input = OperatorInput::from_lines(["show-servers"]);

        let line = input.next_line_or(std::future::ready(())).await.unwrap();

        assert_eq!(line.as_deref(), Some("show-servers"));
    }

    #[tokio::test]
    async fn test_shell_runs_commands_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::load(Some(dir.path().join("config.toml"))).unwrap();
        let mut input = OperatorInput::from_lines([
            "add-service 10.0.0.5 tcp --interval 5 --port 22",
            "bogus-command",
            "show-servers",
            "exit",
            "delete-server 10.0.0.5",
        ]);

        run(&mut app, &mut input).await.unwrap();

        let store = crate::store::ConfigStore::load(dir.path().join("server_dict.json")).unwrap();
        assert!(store.servers().contains_key("10.0.0.5"));
    }
}
