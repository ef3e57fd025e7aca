use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Protocol name that is not part of the supported probe set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown protocol '{0}'")]
pub struct UnknownProtocol(pub String);

/// The fixed set of probe kinds a service can be monitored with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Icmp,
    Http,
    Https,
    Ntp,
    Dns,
    Tcp,
    Udp,
    LocalTcp,
}

impl Protocol {
    pub const ALL: [Protocol; 8] = [
        Protocol::Icmp,
        Protocol::Http,
        Protocol::Https,
        Protocol::Ntp,
        Protocol::Dns,
        Protocol::Tcp,
        Protocol::Udp,
        Protocol::LocalTcp,
    ];

    /// Key used for this protocol in the configuration store
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "ICMP",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Ntp => "NTP",
            Protocol::Dns => "DNS",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::LocalTcp => "LOCAL TCP",
        }
    }

    /// Label used in report headers
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::LocalTcp => "Local TCP",
            other => other.as_str(),
        }
    }

    /// Position of this protocol in [`Protocol::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    /// Case-insensitive; `-` and `_` are accepted in place of the space in `LOCAL TCP`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace(['-', '_'], " ").to_ascii_uppercase();
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == normalized)
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}

/// Status of a single probe invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Up,
    Down,
    Degraded,
    Unknown,
}

impl ProbeStatus {
    /// Whether the target answered (slow answers count)
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeStatus::Up | ProbeStatus::Degraded)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Up => write!(f, "up"),
            ProbeStatus::Down => write!(f, "down"),
            ProbeStatus::Degraded => write!(f, "degraded"),
            ProbeStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Transport used by a port check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "TCP"),
            Transport::Udp => write!(f, "UDP"),
        }
    }
}

/// What a port check observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
    TimedOut,
    /// UDP only: a datagram came back
    Responding,
    /// UDP only: nothing came back, which is what an open port usually does
    OpenOrFiltered,
    Error,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::TimedOut => write!(f, "timeout"),
            PortState::Responding => write!(f, "responding"),
            PortState::OpenOrFiltered => write!(f, "open|filtered"),
            PortState::Error => write!(f, "error"),
        }
    }
}

/// One TTL step of a hop-limited path probe
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub ttl: u8,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathTrace {
    pub hops: Vec<Hop>,
    pub reached: bool,
    pub max_hops: u8,
    pub verbose: bool,
    /// First failure while probing the path, if any
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordLookup {
    pub record_type: String,
    pub records: Vec<String>,
    pub error: Option<String>,
}

impl RecordLookup {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoExchange {
    pub sent: String,
    pub received: Option<String>,
}

impl EchoExchange {
    pub fn matched(&self) -> bool {
        self.received.as_deref() == Some(self.sent.as_str())
    }
}

/// Protocol-specific part of a probe result
#[derive(Debug, Clone, PartialEq)]
pub enum ProbePayload {
    Reachability {
        address: Option<IpAddr>,
        rtt_ms: Option<f64>,
        path: Option<PathTrace>,
    },
    Http {
        url: String,
        status_code: Option<u16>,
    },
    Time {
        server_time: Option<DateTime<Utc>>,
        offset_ms: Option<f64>,
    },
    Dns {
        server: String,
        query: String,
        lookups: Vec<RecordLookup>,
    },
    Port {
        transport: Transport,
        port: u16,
        state: PortState,
    },
    Echo {
        port: u16,
        exchanges: Vec<EchoExchange>,
    },
}

/// Result of one probe invocation. Built fresh every time, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// When the probe finished
    pub timestamp: DateTime<Local>,

    pub status: ProbeStatus,

    /// Round-trip or response time in milliseconds
    pub latency_ms: Option<u64>,

    pub payload: ProbePayload,

    /// Human-readable summary or failure reason
    pub description: Option<String>,
}

impl ProbeResult {
    pub fn new(payload: ProbePayload) -> Self {
        Self {
            timestamp: Local::now(),
            status: ProbeStatus::Unknown,
            latency_ms: None,
            payload,
            description: None,
        }
    }

    /// Mark the probe as successful
    pub fn success(mut self, latency_ms: Option<u64>) -> Self {
        self.status = ProbeStatus::Up;
        self.latency_ms = latency_ms;
        self
    }

    /// Mark the probe as failed
    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.status = ProbeStatus::Down;
        self.description = Some(reason.into());
        self
    }

    /// The probe ran but could not tell either way
    pub fn inconclusive(mut self, reason: impl Into<String>) -> Self {
        self.status = ProbeStatus::Unknown;
        self.description = Some(reason.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Downgrade a successful result whose latency exceeds `threshold_ms`
    pub fn classify_latency(mut self, threshold_ms: u64) -> Self {
        if self.status == ProbeStatus::Up && self.latency_ms.is_some_and(|ms| ms > threshold_ms) {
            self.status = ProbeStatus::Degraded;
        }
        self
    }
}
