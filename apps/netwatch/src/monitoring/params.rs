use serde::Deserialize;
use thiserror::Error;

/// Why a service entry could not be turned into a probe
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("malformed parameters: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("probe setup failed: {0}")]
    Setup(String),
}

/// Reachability (ping plus optional path probe)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IcmpParams {
    pub ttl: Option<u64>,
    pub timeout: Option<u64>,
    pub sequence_number: Option<u64>,
    pub max_hops: Option<u64>,
    pub pings_per_hop: Option<u64>,
    pub verbose: bool,
}

impl IcmpParams {
    pub const DEFAULT_TTL: u8 = 64;
    pub const DEFAULT_SEQUENCE: u16 = 1;
    pub const DEFAULT_PINGS_PER_HOP: u8 = 1;
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpParams {
    pub url: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NtpParams {
    pub port: Option<u64>,
    pub timeout: Option<u64>,
}

impl NtpParams {
    pub const DEFAULT_PORT: u16 = 123;
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsParams {
    pub dns_server: String,
    pub query: String,
    pub record_types: Vec<String>,
    #[serde(default)]
    pub port: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl DnsParams {
    pub const DEFAULT_PORT: u16 = 53;
}

/// TCP, UDP and loop-back echo
#[derive(Debug, Clone, Deserialize)]
pub struct PortParams {
    pub port: u64,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Narrow a range-checked value; out-of-range input is reported, never truncated
pub fn narrow<T: TryFrom<u64>>(field: &'static str, value: u64) -> Result<T, ParamError> {
    T::try_from(value).map_err(|_| ParamError::Rejected(format!("{field} {value} is out of range")))
}
