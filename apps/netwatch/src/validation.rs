use std::fmt::Display;
use std::net::IpAddr;
use url::Url;

use crate::monitoring::params::{DnsParams, HttpParams, IcmpParams, NtpParams, PortParams};
use crate::monitoring::{Protocol, registry};
use crate::store::ServiceConfig;

/// Record types accepted for DNS services
pub const SUPPORTED_RECORD_TYPES: [&str; 11] =
    ["A", "AAAA", "ANAME", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT", "SPF"];

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn into_result(self) -> Result<(), String> {
        if self.is_valid {
            Ok(())
        } else {
            Err(self.error.unwrap_or_else(|| "Validation failed".to_string()))
        }
    }
}

/// Stop at the first failing check
macro_rules! check {
    ($result:expr) => {{
        let result = $result;
        if !result.is_valid {
            return result;
        }
    }};
}

/// Validate HTTP/HTTPS URL endpoint
pub fn validate_http_endpoint(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            // If it fails to parse, check if it's missing a scheme
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate HTTPS URL endpoint
pub fn validate_https_endpoint(target: &str) -> ValidationResult {
    check!(validate_http_endpoint(target));

    match Url::parse(target) {
        Ok(url) if url.scheme() == "https" => ValidationResult::ok(),
        Ok(url) => {
            ValidationResult::err(format!("Invalid scheme '{}'. Must be https", url.scheme()))
        }
        Err(e) => ValidationResult::err(format!("Invalid URL: {e}")),
    }
}

/// Validate a target or server name (IP address or hostname)
pub fn validate_host(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Host cannot be empty");
    }

    if target.parse::<IpAddr>().is_ok() {
        return ValidationResult::ok();
    }

    if target.contains(' ') {
        return ValidationResult::err("Host cannot contain spaces");
    }

    if target.starts_with('-') || target.ends_with('-') {
        return ValidationResult::err("Hostname cannot start or end with hyphen");
    }

    if target.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_') {
        ValidationResult::ok()
    } else {
        ValidationResult::err("Invalid hostname. Use IP address or valid hostname")
    }
}

/// Validate polling interval
pub fn validate_interval(interval: u64) -> ValidationResult {
    if interval == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval > 86400 {
        return ValidationResult::err("Interval too long (max 24 hours)");
    }

    ValidationResult::ok()
}

/// Validate a probe timeout
pub fn validate_timeout(timeout: u64) -> ValidationResult {
    validate_range("Timeout", timeout, 1, 300)
}

pub fn validate_port(port: u64) -> ValidationResult {
    validate_range("Port", port, 1, 65535)
}

pub fn validate_range<T: PartialOrd + Display>(field: &str, value: T, min: T, max: T) -> ValidationResult {
    if value < min || value > max {
        ValidationResult::err(format!("{field} must be between {min} and {max}, got {value}"))
    } else {
        ValidationResult::ok()
    }
}

pub fn validate_record_types(record_types: &[String]) -> ValidationResult {
    if record_types.is_empty() {
        return ValidationResult::err("At least one record type is required");
    }

    match record_types
        .iter()
        .find(|rt| !SUPPORTED_RECORD_TYPES.contains(&rt.to_ascii_uppercase().as_str()))
    {
        Some(unsupported) => ValidationResult::err(format!(
            "Unsupported record type '{unsupported}'. Expected one of: {}",
            SUPPORTED_RECORD_TYPES.join(", ")
        )),
        None => ValidationResult::ok(),
    }
}

fn validate_optional_timeout(timeout: Option<u64>) -> ValidationResult {
    timeout.map(validate_timeout).unwrap_or_else(ValidationResult::ok)
}

fn decode<T: serde::de::DeserializeOwned>(service: &ServiceConfig) -> Result<T, ValidationResult> {
    service.decode().map_err(|e| ValidationResult::err(format!("Invalid parameters: {e}")))
}

/// Validate every field of a service entry for the given protocol
///
/// Used both before a service is stored and when a session binds it to a
/// probe, so hand-edited stores get the same checks.
pub fn validate_service(protocol: Protocol, service: &ServiceConfig) -> ValidationResult {
    check!(validate_interval(service.interval));

    let spec = registry::spec_for(protocol);
    if let Some(missing) = spec.required_fields.iter().find(|field| !service.has_param(field)) {
        return ValidationResult::err(format!("{protocol} services require '{missing}'"));
    }
    if let Some(unknown) = service
        .params
        .keys()
        .find(|key| !spec.required_fields.contains(&key.as_str()) && !spec.optional_fields.contains(&key.as_str()))
    {
        return ValidationResult::err(format!("Unknown field '{unknown}' for {protocol} services"));
    }

    let result = match protocol {
        Protocol::Icmp => decode::<IcmpParams>(service).map(|p| validate_icmp(&p)),
        Protocol::Http => decode::<HttpParams>(service).map(|p| {
            check!(validate_http_endpoint(&p.url));
            validate_optional_timeout(p.timeout)
        }),
        Protocol::Https => decode::<HttpParams>(service).map(|p| {
            check!(validate_https_endpoint(&p.url));
            validate_optional_timeout(p.timeout)
        }),
        Protocol::Ntp => decode::<NtpParams>(service).map(|p| {
            check!(p.port.map(validate_port).unwrap_or_else(ValidationResult::ok));
            validate_optional_timeout(p.timeout)
        }),
        Protocol::Dns => decode::<DnsParams>(service).map(|p| validate_dns(&p)),
        Protocol::Tcp | Protocol::Udp | Protocol::LocalTcp => {
            decode::<PortParams>(service).map(|p| {
                check!(validate_port(p.port));
                validate_optional_timeout(p.timeout)
            })
        }
    };

    result.unwrap_or_else(|invalid| invalid)
}

fn validate_icmp(params: &IcmpParams) -> ValidationResult {
    if let Some(ttl) = params.ttl {
        check!(validate_range("TTL", ttl, 1, 255));
    }
    if let Some(max_hops) = params.max_hops {
        check!(validate_range("Max hops", max_hops, 1, 64));
    }
    if let Some(pings) = params.pings_per_hop {
        check!(validate_range("Pings per hop", pings, 1, 10));
    }
    if let Some(sequence) = params.sequence_number {
        check!(validate_range("Sequence number", sequence, 0, u64::from(u16::MAX)));
    }
    validate_optional_timeout(params.timeout)
}

fn validate_dns(params: &DnsParams) -> ValidationResult {
    if params.dns_server.trim().is_empty() {
        return ValidationResult::err("DNS server cannot be empty");
    }
    check!(validate_host(&params.dns_server));
    if params.query.trim().is_empty() {
        return ValidationResult::err("Query cannot be empty");
    }
    check!(validate_record_types(&params.record_types));
    if let Some(port) = params.port {
        check!(validate_port(port));
    }
    validate_optional_timeout(params.timeout)
}
