//! Report blocks and the sink that serializes them onto the console.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use super::types::{PathTrace, ProbePayload, ProbeResult, Protocol};

/// One worker's output for one probe run
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBlock {
    pub header: String,
    pub lines: Vec<String>,
}

impl ReportBlock {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into(), lines: Vec::new() }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Render a probe result for `target`
    pub fn from_result(protocol: Protocol, target: &str, result: &ProbeResult) -> Self {
        let header = format!(
            "[{}] {} Service Check",
            result.timestamp.format("%Y-%m-%d %H:%M:%S"),
            protocol.label()
        );
        let description = result.description.as_deref().unwrap_or("");
        let mut block = Self::new(header);

        match &result.payload {
            ProbePayload::Reachability { address, rtt_ms, path } => {
                block = block.line("Ping Test:");
                block = match (address, rtt_ms) {
                    (Some(address), Some(rtt)) => {
                        block.line(format!("{target} (ping): {address} - {rtt:.2} ms"))
                    }
                    _ => block.line(format!(
                        "{target} (ping): {}",
                        or(description, "Request timed out or no reply received")
                    )),
                };
                if let Some(path) = path {
                    block = block.line("Path Test:").line(format!("{target} (path):"));
                    block.lines.extend(path_lines(path));
                }
            }
            ProbePayload::Http { url, status_code } => {
                let code = status_code.map_or_else(|| "N/A".to_string(), |c| c.to_string());
                block = block
                    .line(format!("Sending {} Request to {target} ... ", protocol.label()))
                    .line(format!(
                        "HTTP URL: {url}, HTTP server status: {}, Status Code: {code}, Description: {description}",
                        result.status.is_success()
                    ));
            }
            ProbePayload::Time { server_time, offset_ms } => {
                block = block.line(format!("Testing Status of NTP Server {target} ... "));
                block = match server_time {
                    Some(time) if result.status.is_success() => {
                        let offset = offset_ms.map_or_else(String::new, |ms| format!(", Offset: {ms:+.3} ms"));
                        block.line(format!(
                            "{target} is up. Time: {}{offset}",
                            time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
                        ))
                    }
                    _ => block.line(format!("{target} is down. {description}").trim_end().to_string()),
                };
            }
            ProbePayload::Dns { server, query, lookups } => {
                block = block.line(format!("Querying DNS Server {server} for {query} ... "));
                for lookup in lookups {
                    let results = match &lookup.error {
                        Some(error) => error.clone(),
                        None => format!("[{}]", lookup.records.join(", ")),
                    };
                    block = block.line(format!(
                        "DNS Server: {server}, Status: {}, {} Records Results: {results}",
                        lookup.is_ok(),
                        lookup.record_type
                    ));
                }
                if lookups.is_empty() && !description.is_empty() {
                    block = block.line(format!("DNS Server: {server}, Status: false, {description}"));
                }
            }
            ProbePayload::Port { transport, port, state } => {
                block = block
                    .line(format!("Testing {transport} to Server {target} at Port {port} ... "))
                    .line(format!(
                        "Server: {target}, {transport} Port: {port}, {transport} Port Status: {state}, Description: {description}"
                    ));
            }
            ProbePayload::Echo { port, exchanges } => {
                block = block.line(format!("Testing TCP to Local Server {target} at Port {port} ... "));
                for exchange in exchanges {
                    block = block.line(format!(
                        "Sent: {} | Received: {}",
                        exchange.sent,
                        exchange.received.as_deref().unwrap_or("<nothing>")
                    ));
                }
                if !description.is_empty() {
                    block = block.line(description);
                }
            }
        }

        let latency = result.latency_ms.map_or_else(String::new, |ms| format!(" ({ms} ms)"));
        block.line(format!("Result: {}{latency}", result.status))
    }
}

fn or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn path_lines(path: &PathTrace) -> Vec<String> {
    let mut lines: Vec<String> = path
        .hops
        .iter()
        .filter(|hop| path.verbose || hop.rtt_ms.is_some())
        .map(|hop| match hop.rtt_ms {
            Some(rtt) => format!("{:>3}  {rtt:.2} ms", hop.ttl),
            None => format!("{:>3}  *", hop.ttl),
        })
        .collect();

    lines.push(match path.hops.iter().rfind(|hop| hop.rtt_ms.is_some()) {
        Some(hop) if path.reached => format!("Destination reached in {} hops", hop.ttl),
        _ => format!("Destination not reached within {} hops", path.max_hops),
    });
    if let Some(error) = &path.error {
        lines.push(format!("Path test error: {error}"));
    }
    lines
}

/// Serialization point for concurrent worker output
///
/// `emit` writes a whole block or fails; lines of two blocks never mix.
pub trait ReportSink: Send + Sync {
    fn emit(&self, block: &ReportBlock) -> io::Result<()>;
}

/// Writes blocks to a terminal-like writer under one lock per block
pub struct ConsoleSink<W: Write + Send> {
    out: Mutex<W>,
    width: usize,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(width: usize) -> Self {
        Self::new(io::stdout(), width)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self { out: Mutex::new(out), width: width.max(1) }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReportSink for ConsoleSink<W> {
    fn emit(&self, block: &ReportBlock) -> io::Result<()> {
        // A panic while holding the lock leaves at worst a torn block behind
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);

        writeln!(out, "{}", block.header)?;
        writeln!(out, "{}", "=".repeat(self.width))?;
        for line in &block.lines {
            writeln!(out, "{line}")?;
        }
        writeln!(out)?;
        out.flush()
    }
}

/// Collects blocks in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    blocks: Mutex<Vec<ReportBlock>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn blocks(&self) -> Vec<ReportBlock> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

#[cfg(test)]
impl ReportSink for MemorySink {
    fn emit(&self, block: &ReportBlock) -> io::Result<()> {
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }
}
