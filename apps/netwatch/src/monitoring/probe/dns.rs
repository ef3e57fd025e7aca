use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::{Probe, ProbeError, elapsed_ms, resolve};
use crate::monitoring::types::{ProbePayload, ProbeResult, Protocol, RecordLookup};

/// Queries one name server for a list of record types
pub struct DnsProbe {
    dns_server: String,
    port: u16,
    query: String,
    record_types: Vec<String>,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(
        dns_server: impl Into<String>,
        port: u16,
        query: impl Into<String>,
        record_types: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            dns_server: dns_server.into(),
            port,
            query: query.into(),
            record_types: record_types.into_iter().map(|rt| rt.to_ascii_uppercase()).collect(),
            timeout,
        }
    }

    /// Resolver pinned to the configured server, with no system fallback
    async fn resolver(&self) -> Result<TokioAsyncResolver, ProbeError> {
        let server = resolve(&self.dns_server, self.port, self.timeout).await?;
        let group = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    async fn lookup(&self, resolver: &TokioAsyncResolver, record_type: &str) -> RecordLookup {
        let mut lookup = RecordLookup { record_type: record_type.to_string(), records: Vec::new(), error: None };

        // SPF records are published as TXT
        let query_type = match record_type {
            "SPF" => Ok(RecordType::TXT),
            other => RecordType::from_str(other),
        };
        let query_type = match query_type {
            Ok(query_type) => query_type,
            Err(e) => {
                lookup.error = Some(format!("unsupported record type: {e}"));
                return lookup;
            }
        };

        match resolver.lookup(self.query.as_str(), query_type).await {
            Ok(answer) => {
                lookup.records = answer
                    .iter()
                    .map(ToString::to_string)
                    .filter(|record| record_type != "SPF" || record.contains("v=spf1"))
                    .collect();
                if lookup.records.is_empty() {
                    lookup.error = Some("no matching records".to_string());
                }
            }
            Err(e) => lookup.error = Some(e.to_string()),
        }
        lookup
    }
}

#[async_trait::async_trait]
impl Probe for DnsProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Dns
    }

    async fn check(&self, _target: &str) -> ProbeResult {
        let start = Instant::now();
        let payload = |lookups| ProbePayload::Dns {
            server: self.dns_server.clone(),
            query: self.query.clone(),
            lookups,
        };

        let resolver = match self.resolver().await {
            Ok(resolver) => resolver,
            Err(e) => return ProbeResult::new(payload(Vec::new())).failure(e.to_string()),
        };

        let mut lookups = Vec::with_capacity(self.record_types.len());
        for record_type in &self.record_types {
            lookups.push(self.lookup(&resolver, record_type).await);
        }

        let latency = elapsed_ms(start);
        let failed = lookups.iter().filter(|lookup| !lookup.is_ok()).count();
        let total = lookups.len();
        let result = ProbeResult::new(payload(lookups));

        if failed == 0 {
            result.success(Some(latency)).with_description(format!("{total} lookups answered"))
        } else {
            result.failure(format!("{failed} of {total} lookups failed")).with_latency(latency)
        }
    }
}
