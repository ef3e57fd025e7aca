use futures::future::join_all;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::time::timeout;

use super::{Probe, ProbeError, resolve};
use crate::monitoring::params::{IcmpParams, ParamError, narrow};
use crate::monitoring::types::{Hop, PathTrace, ProbePayload, ProbeResult, Protocol};

const PAYLOAD: [u8; 56] = [0; 56];

/// Hop-limited path probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathProbe {
    pub max_hops: u8,
    pub pings_per_hop: u8,
    pub verbose: bool,
}

impl PathProbe {
    /// Path probing only runs when `max_hops` is configured
    pub fn from_params(params: &IcmpParams) -> Result<Option<Self>, ParamError> {
        let Some(max_hops) = params.max_hops else {
            return Ok(None);
        };
        let pings_per_hop = match params.pings_per_hop {
            Some(pings) => narrow("pings_per_hop", pings)?,
            None => IcmpParams::DEFAULT_PINGS_PER_HOP,
        };

        Ok(Some(Self { max_hops: narrow("max_hops", max_hops)?, pings_per_hop, verbose: params.verbose }))
    }
}

/// Echo request plus an optional path probe
pub struct IcmpProbe {
    ttl: u8,
    sequence: u16,
    timeout: Duration,
    path: Option<PathProbe>,
}

impl IcmpProbe {
    pub fn new(ttl: u8, sequence: u16, timeout: Duration, path: Option<PathProbe>) -> Self {
        Self { ttl, sequence, timeout, path }
    }

    /// Upper bound for one whole check: resolution, the echo request and the path probe
    pub fn deadline(&self) -> Duration {
        let stages = if self.path.is_some() { 3 } else { 2 };
        self.timeout * stages
    }

    fn client(addr: IpAddr, ttl: u8) -> Result<Client, ProbeError> {
        let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };
        let config = Config::builder().kind(kind).ttl(u32::from(ttl)).build();
        Client::new(&config).map_err(|e| ProbeError::Other(format!("cannot open ICMP socket: {e}")))
    }

    /// One echo request; `None` when nothing came back in time
    async fn ping(client: &Client, addr: IpAddr, sequence: u16, wait: Duration) -> Result<Option<Duration>, ProbeError> {
        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(wait);

        match pinger.ping(PingSequence(sequence), &PAYLOAD).await {
            Ok((_packet, rtt)) => Ok(Some(rtt)),
            Err(SurgeError::Timeout { .. }) => Ok(None),
            Err(e) => Err(ProbeError::Other(e.to_string())),
        }
    }

    /// Up to `attempts` echo requests sent with a fixed TTL
    async fn hop(&self, addr: IpAddr, ttl: u8, attempts: u8, wait: Duration) -> Result<Option<f64>, ProbeError> {
        let client = Self::client(addr, ttl)?;
        for attempt in 0..attempts {
            let sequence = self.sequence.wrapping_add(u16::from(ttl) * 16 + u16::from(attempt));
            if let Some(rtt) = Self::ping(&client, addr, sequence, wait).await? {
                return Ok(Some(rtt.as_secs_f64() * 1000.0));
            }
        }
        Ok(None)
    }

    /// Find the smallest TTL at which the destination answers
    ///
    /// Every TTL is tried at once and shares one probe timeout. Only echo
    /// replies are matched, so routers on the way show up as unanswered hops.
    async fn trace(&self, addr: IpAddr, settings: PathProbe) -> PathTrace {
        let wait = self.timeout / u32::from(settings.pings_per_hop.max(1));
        let outcomes =
            join_all((1..=settings.max_hops).map(|ttl| self.hop(addr, ttl, settings.pings_per_hop, wait))).await;
        assemble_path(settings, outcomes)
    }

    async fn run(&self, target: &str) -> Result<ProbeResult, ProbeError> {
        let addr = resolve(target, 0, self.timeout).await?.ip();

        let ping = match Self::client(addr, self.ttl) {
            Ok(client) => Self::ping(&client, addr, self.sequence, self.timeout).await,
            Err(e) => Err(e),
        };
        let path = match self.path {
            Some(settings) => Some(self.trace(addr, settings).await),
            None => None,
        };

        Ok(reachability(addr, ping, path))
    }
}

/// Collapse per-TTL outcomes into a trace ending at the first TTL that answered
fn assemble_path(settings: PathProbe, outcomes: Vec<Result<Option<f64>, ProbeError>>) -> PathTrace {
    let mut trace = PathTrace {
        hops: Vec::new(),
        reached: false,
        max_hops: settings.max_hops,
        verbose: settings.verbose,
        error: None,
    };

    for (ttl, outcome) in (1..=settings.max_hops).zip(outcomes) {
        let rtt_ms = match outcome {
            Ok(rtt_ms) => rtt_ms,
            Err(e) => {
                trace.error.get_or_insert_with(|| e.to_string());
                None
            }
        };
        trace.hops.push(Hop { ttl, rtt_ms });
        if rtt_ms.is_some() {
            trace.reached = true;
            break;
        }
    }
    trace
}

/// The echo request decides the status; the path trace rides along either way
fn reachability(addr: IpAddr, ping: Result<Option<Duration>, ProbeError>, path: Option<PathTrace>) -> ProbeResult {
    match ping {
        Ok(Some(rtt)) => {
            let rtt_ms = rtt.as_secs_f64() * 1000.0;
            ProbeResult::new(ProbePayload::Reachability { address: Some(addr), rtt_ms: Some(rtt_ms), path })
                .success(Some(rtt_ms.round() as u64))
        }
        Ok(None) => ProbeResult::new(ProbePayload::Reachability { address: Some(addr), rtt_ms: None, path })
            .failure("Request timed out or no reply received"),
        Err(e) => {
            ProbeResult::new(ProbePayload::Reachability { address: Some(addr), rtt_ms: None, path }).failure(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl Probe for IcmpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let deadline = self.deadline();
        let outcome = match timeout(deadline, self.run(target)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(deadline)),
        };

        match outcome {
            Ok(result) => result,
            Err(e) => ProbeResult::new(ProbePayload::Reachability { address: None, rtt_ms: None, path: None })
                .failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeStatus;

    #[test]
    fn test_path_probe_is_opt_in() {
        assert_eq!(PathProbe::from_params(&IcmpParams::default()).unwrap(), None);

        let params = IcmpParams { max_hops: Some(12), verbose: true, ..IcmpParams::default() };
        assert_eq!(
            PathProbe::from_params(&params).unwrap(),
            Some(PathProbe { max_hops: 12, pings_per_hop: 1, verbose: true })
        );

        let params = IcmpParams { max_hops: Some(300), ..IcmpParams::default() };
        assert!(PathProbe::from_params(&params).is_err());
    }

    fn settings(max_hops: u8) -> PathProbe {
        PathProbe { max_hops, pings_per_hop: 3, verbose: false }
    }

    #[test]
    fn test_path_ends_at_first_answering_ttl() {
        let trace = assemble_path(settings(5), vec![Ok(None), Ok(None), Ok(Some(7.5)), Ok(Some(7.1)), Ok(Some(7.0))]);

        assert!(trace.reached);
        assert_eq!(trace.hops.len(), 3);
        assert_eq!(trace.hops[2], Hop { ttl: 3, rtt_ms: Some(7.5) });
        assert_eq!(trace.error, None);

        let trace = assemble_path(settings(2), vec![Ok(None), Ok(None)]);
        assert!(!trace.reached);
        assert_eq!(trace.hops.len(), 2);
    }

    #[test]
    fn test_path_error_is_kept_next_to_hops() {
        let trace = assemble_path(
            settings(3),
            vec![Err(ProbeError::Other("cannot open ICMP socket: denied".into())), Ok(None), Ok(Some(3.0))],
        );

        assert!(trace.reached);
        assert_eq!(trace.hops.len(), 3);
        assert_eq!(trace.error.as_deref(), Some("cannot open ICMP socket: denied"));
    }

    #[test]
    fn test_failed_path_does_not_hide_ping() {
        let addr: IpAddr = "192.0.2.7".parse().unwrap();
        let path = assemble_path(settings(1), vec![Err(ProbeError::Other("no route".into()))]);

        let result = reachability(addr, Ok(Some(Duration::from_millis(12))), Some(path.clone()));
        assert_eq!(result.status, ProbeStatus::Up);
        match result.payload {
            ProbePayload::Reachability { address, rtt_ms, path: Some(trace) } => {
                assert_eq!(address, Some(addr));
                assert!(rtt_ms.is_some_and(|ms| (ms - 12.0).abs() < 1e-6));
                assert_eq!(trace.error.as_deref(), Some("no route"));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let result = reachability(addr, Ok(None), Some(path));
        assert_eq!(result.status, ProbeStatus::Down);
        assert!(matches!(result.payload, ProbePayload::Reachability { address: Some(_), path: Some(_), .. }));
    }

    #[test]
    fn test_deadline_covers_every_stage() {
        let plain = IcmpProbe::new(64, 1, Duration::from_secs(2), None);
        assert_eq!(plain.deadline(), Duration::from_secs(4));

        let traced = IcmpProbe::new(64, 1, Duration::from_secs(2), Some(settings(64)));
        assert_eq!(traced.deadline(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_silent_destination_finishes_within_deadline() {
        let probe = IcmpProbe::new(64, 1, Duration::from_millis(300), Some(settings(30)));
        let started = std::time::Instant::now();

        // TEST-NET-1 never answers
        let result = probe.check("192.0.2.1").await;

        assert!(started.elapsed() < probe.deadline() + Duration::from_millis(500));
        assert_eq!(result.status, ProbeStatus::Down);
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_down() {
        let probe = IcmpProbe::new(64, 1, Duration::from_secs(2), None);

        let result = probe.check("no-such-host.invalid").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.is_some());
        assert!(matches!(result.payload, ProbePayload::Reachability { address: None, .. }));
    }

    #[tokio::test]
    async fn test_loopback_never_panics_without_privileges() {
        let probe = IcmpProbe::new(
            64,
            1,
            Duration::from_millis(500),
            Some(PathProbe { max_hops: 2, pings_per_hop: 1, verbose: true }),
        );

        let result = probe.check("127.0.0.1").await;

        // Raw sockets may be unavailable in the test environment
        match result.status {
            ProbeStatus::Up => match result.payload {
                ProbePayload::Reachability { path: Some(path), .. } => assert!(path.reached),
                other => panic!("unexpected payload {other:?}"),
            },
            _ => assert!(result.description.is_some()),
        }
    }
}
