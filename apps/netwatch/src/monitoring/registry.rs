//! Protocol name to probe lookup.
//!
//! The table is static: resolving a name never allocates or touches shared
//! state, so any number of callers can use it concurrently.

use std::sync::Arc;

use super::params::{DnsParams, HttpParams, IcmpParams, NtpParams, ParamError, PortParams, narrow};
use super::probe::{DnsProbe, EchoProbe, HttpProbe, IcmpProbe, NtpProbe, PathProbe, Probe, TcpProbe, UdpProbe};
use super::types::{Protocol, UnknownProtocol};
use crate::config::ProbeDefaults;
use crate::store::ServiceConfig;
use crate::validation::validate_service;

type ProbeFactory = fn(&ServiceConfig, &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError>;

/// Everything the scheduler needs to know about one protocol
pub struct ProbeSpec {
    pub protocol: Protocol,
    /// Fields a service entry must carry besides `interval`
    pub required_fields: &'static [&'static str],
    pub optional_fields: &'static [&'static str],
    factory: ProbeFactory,
}

impl ProbeSpec {
    /// Build the probe for one service entry
    pub fn bind(&self, service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
        if let Some(missing) = self.required_fields.iter().find(|field| !service.has_param(field)) {
            return Err(ParamError::MissingField(*missing));
        }
        validate_service(self.protocol, service).into_result().map_err(ParamError::Rejected)?;

        (self.factory)(service, defaults)
    }
}

impl std::fmt::Debug for ProbeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSpec")
            .field("protocol", &self.protocol)
            .field("required_fields", &self.required_fields)
            .field("optional_fields", &self.optional_fields)
            .finish_non_exhaustive()
    }
}

/// Ordered like [`Protocol::ALL`]
static PROBES: [ProbeSpec; 8] = [
    ProbeSpec {
        protocol: Protocol::Icmp,
        required_fields: &[],
        optional_fields: &["ttl", "timeout", "sequence_number", "max_hops", "pings_per_hop", "verbose"],
        factory: icmp,
    },
    ProbeSpec { protocol: Protocol::Http, required_fields: &["url"], optional_fields: &["timeout"], factory: http },
    ProbeSpec { protocol: Protocol::Https, required_fields: &["url"], optional_fields: &["timeout"], factory: https },
    ProbeSpec { protocol: Protocol::Ntp, required_fields: &[], optional_fields: &["port", "timeout"], factory: ntp },
    ProbeSpec {
        protocol: Protocol::Dns,
        required_fields: &["dns_server", "query", "record_types"],
        optional_fields: &["port", "timeout"],
        factory: dns,
    },
    ProbeSpec { protocol: Protocol::Tcp, required_fields: &["port"], optional_fields: &["timeout"], factory: tcp },
    ProbeSpec { protocol: Protocol::Udp, required_fields: &["port"], optional_fields: &["timeout"], factory: udp },
    ProbeSpec {
        protocol: Protocol::LocalTcp,
        required_fields: &["port"],
        optional_fields: &["timeout"],
        factory: local_tcp,
    },
];

/// Table entry for a protocol
pub fn spec_for(protocol: Protocol) -> &'static ProbeSpec {
    &PROBES[protocol.index()]
}

/// Resolves protocol names and binds their probes with the configured defaults
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    defaults: ProbeDefaults,
}

impl ProbeRegistry {
    pub fn new(defaults: ProbeDefaults) -> Self {
        Self { defaults }
    }

    pub fn resolve(&self, name: &str) -> Result<&'static ProbeSpec, UnknownProtocol> {
        name.parse::<Protocol>().map(spec_for)
    }

    pub fn defaults(&self) -> &ProbeDefaults {
        &self.defaults
    }
}

fn icmp(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: IcmpParams = service.decode()?;
    let ttl = params.ttl.map(|v| narrow("ttl", v)).transpose()?.unwrap_or(IcmpParams::DEFAULT_TTL);
    let sequence = params
        .sequence_number
        .map(|v| narrow("sequence_number", v))
        .transpose()?
        .unwrap_or(IcmpParams::DEFAULT_SEQUENCE);
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.icmp_timeout_secs);
    let path = PathProbe::from_params(&params)?;

    Ok(Arc::new(IcmpProbe::new(ttl, sequence, timeout, path)))
}

fn http(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: HttpParams = service.decode()?;
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.http_timeout_secs);
    Ok(Arc::new(HttpProbe::new(Protocol::Http, params.url, timeout)?))
}

fn https(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: HttpParams = service.decode()?;
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.https_timeout_secs);
    Ok(Arc::new(HttpProbe::new(Protocol::Https, params.url, timeout)?))
}

fn ntp(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: NtpParams = service.decode()?;
    let port = params.port.map(|v| narrow("port", v)).transpose()?.unwrap_or(NtpParams::DEFAULT_PORT);
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.ntp_timeout_secs);
    Ok(Arc::new(NtpProbe::new(port, timeout)))
}

fn dns(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: DnsParams = service.decode()?;
    let port = params.port.map(|v| narrow("port", v)).transpose()?.unwrap_or(DnsParams::DEFAULT_PORT);
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.dns_timeout_secs);
    Ok(Arc::new(DnsProbe::new(params.dns_server, port, params.query, params.record_types, timeout)))
}

fn tcp(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: PortParams = service.decode()?;
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.tcp_connect_timeout_secs);
    Ok(Arc::new(TcpProbe::new(narrow("port", params.port)?, timeout)))
}

fn udp(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: PortParams = service.decode()?;
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.udp_timeout_secs);
    Ok(Arc::new(UdpProbe::new(narrow("port", params.port)?, timeout)))
}

fn local_tcp(service: &ServiceConfig, defaults: &ProbeDefaults) -> Result<Arc<dyn Probe>, ParamError> {
    let params: PortParams = service.decode()?;
    let timeout = ProbeDefaults::timeout(params.timeout, defaults.echo_timeout_secs);
    Ok(Arc::new(EchoProbe::new(narrow("port", params.port)?, timeout)))
}
