//! Operator-facing terminal text.

use crossterm::terminal;
use std::fmt::Write;

use crate::store::ServerMap;

const FALLBACK_WIDTH: usize = 100;

const BANNER: [&str; 5] = [
    r" _   _ _____ _______        ___  _____ ____ _   _ ",
    r"| \ | | ____|_   _\ \      / / \|_   _/ ___| | | |",
    r"|  \| |  _|   | |  \ \ /\ / / _ \ | || |   | |_| |",
    r"| |\  | |___  | |   \ V  V / ___ \| || |___|  _  |",
    r"|_| \_|_____| |_|    \_/\_/_/   \_\_| \____|_| |_|",
];

/// Shell commands and what they do, in display order
pub const COMMANDS: [(&str, &str); 11] = [
    ("add-service", "Add a service to a server"),
    ("edit-service", "Replace a service's settings"),
    ("delete-service", "Delete one service"),
    ("delete-server", "Delete a server and its services"),
    ("show-servers", "Show config of all servers"),
    ("monitor", "Monitor a server"),
    ("monitor-all", "Monitor all servers"),
    ("echo-server", "Run the loop-back echo server"),
    ("settings", "Show application settings"),
    ("help", "Show this list"),
    ("exit", "Exit the application"),
];

/// Terminal columns, or a fixed width when stdout is not a terminal
pub fn terminal_width() -> usize {
    match terminal::size() {
        Ok((cols, _)) if cols > 0 => usize::from(cols),
        _ => FALLBACK_WIDTH,
    }
}

fn center(text: &str, width: usize) -> String {
    format!("{text:^width$}")
}

pub fn banner(width: usize) -> String {
    let mut out = String::from("\n");
    for line in BANNER {
        let _ = writeln!(out, "{}", center(line, width).trim_end());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", center(concat!("netwatch v", env!("CARGO_PKG_VERSION")), width).trim_end());
    let _ = writeln!(out, "{}", center(env!("CARGO_PKG_DESCRIPTION"), width).trim_end());
    out
}

pub fn command_list() -> String {
    let name_width = COMMANDS.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let inner = COMMANDS.iter().map(|(_, about)| about.len()).max().unwrap_or(0) + name_width + 3;
    let rule = format!(" |{}|", "=".repeat(inner + 2));

    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, " | {:<inner$} |", "Commands:");
    let _ = writeln!(out, "{rule}");
    for (name, about) in COMMANDS {
        let entry = format!("{name:<name_width$} - {about}");
        let _ = writeln!(out, " | {entry:<inner$} |");
    }
    let _ = writeln!(out, "{rule}");
    out
}

/// Every server followed by its configured services
pub fn server_configs(servers: &ServerMap) -> String {
    if servers.is_empty() {
        return "No servers configured.\n".to_string();
    }

    let mut out = String::new();
    for (server, services) in servers {
        let _ = writeln!(out, "\nServer: {server}");
        for (protocol, service) in services {
            let params: Vec<String> = service.params.iter().map(|(key, value)| format!("{key}={value}")).collect();
            if params.is_empty() {
                let _ = writeln!(out, "  {protocol:<10} every {}s", service.interval);
            } else {
                let _ = writeln!(out, "  {protocol:<10} every {}s, {}", service.interval, params.join(", "));
            }
        }
    }
    out
}
