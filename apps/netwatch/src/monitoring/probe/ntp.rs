use chrono::{DateTime, Utc};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{Probe, ProbeError, elapsed_ms, resolve};
use crate::monitoring::types::{ProbePayload, ProbeResult, Protocol};

const PACKET_LEN: usize = 48;
/// LI = 0, VN = 3, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0x1B;
const MODE_SERVER: u8 = 4;
/// Seconds between 1900-01-01 and 1970-01-01
const UNIX_OFFSET: u64 = 2_208_988_800;
const ERA_SECONDS: u64 = 1 << 32;

/// 64-bit NTP timestamp: seconds and fraction since 1900 (modulo the era)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NtpTimestamp {
    seconds: u32,
    fraction: u32,
}

impl NtpTimestamp {
    fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let seconds = (since_unix.as_secs() + UNIX_OFFSET) % ERA_SECONDS;
        let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;

        Self { seconds: seconds as u32, fraction: fraction as u32 }
    }

    fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    fn read(bytes: &[u8]) -> Self {
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self { seconds: word(0), fraction: word(4) }
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.seconds.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.fraction.to_be_bytes());
    }

    /// Seconds since the Unix epoch. Values with the top bit clear are taken
    /// to be in era 1 (from 2036-02-07 on).
    fn unix_seconds(&self) -> f64 {
        let seconds = u64::from(self.seconds);
        let seconds = if seconds & 0x8000_0000 == 0 { seconds + ERA_SECONDS } else { seconds };
        (seconds as i64 - UNIX_OFFSET as i64) as f64 + f64::from(self.fraction) / ERA_SECONDS as f64
    }

    fn to_datetime(self) -> Option<DateTime<Utc>> {
        let unix = self.unix_seconds();
        let nanos = ((u64::from(self.fraction) * 1_000_000_000) >> 32) as u32;
        DateTime::from_timestamp(unix.floor() as i64, nanos)
    }
}

/// What a valid server reply tells us
#[derive(Debug, Clone, PartialEq)]
struct NtpSample {
    server_time: Option<DateTime<Utc>>,
    offset_ms: f64,
    stratum: u8,
}

fn request_packet(transmit: NtpTimestamp) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    transmit.write(&mut packet[40..48]);
    packet
}

/// Check a reply against our request and derive the clock offset
fn parse_reply(reply: &[u8], sent: NtpTimestamp, received: NtpTimestamp) -> Result<NtpSample, ProbeError> {
    if reply.len() < PACKET_LEN {
        return Err(ProbeError::Protocol(format!("short reply of {} bytes", reply.len())));
    }

    let mode = reply[0] & 0x07;
    if mode != MODE_SERVER {
        return Err(ProbeError::Protocol(format!("unexpected mode {mode} in reply")));
    }

    let stratum = reply[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&reply[12..16]).trim_end_matches('\0').to_string();
        return Err(ProbeError::Protocol(format!("kiss-of-death from server ({code})")));
    }

    if NtpTimestamp::read(&reply[24..32]) != sent {
        return Err(ProbeError::Protocol("reply does not match our request".to_string()));
    }

    let t1 = sent.unix_seconds();
    let t2 = NtpTimestamp::read(&reply[32..40]).unix_seconds();
    let transmit = NtpTimestamp::read(&reply[40..48]);
    let t3 = transmit.unix_seconds();
    let t4 = received.unix_seconds();

    Ok(NtpSample {
        server_time: transmit.to_datetime(),
        offset_ms: ((t2 - t1) + (t3 - t4)) / 2.0 * 1000.0,
        stratum,
    })
}

/// SNTP time query
pub struct NtpProbe {
    port: u16,
    timeout: Duration,
}

impl NtpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    async fn query(&self, target: &str) -> Result<NtpSample, ProbeError> {
        let addr = resolve(target, self.port, self.timeout).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await.map_err(ProbeError::Connection)?;

        let sent = NtpTimestamp::now();
        socket.send(&request_packet(sent)).await.map_err(ProbeError::Connection)?;

        let mut buf = [0u8; 512];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(ProbeError::Connection)?;
        let received = NtpTimestamp::now();

        parse_reply(&buf[..len], sent, received)
    }
}

#[async_trait::async_trait]
impl Probe for NtpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Ntp
    }

    async fn check(&self, target: &str) -> ProbeResult {
        let start = Instant::now();

        match self.query(target).await {
            Ok(sample) => {
                tracing::trace!(server = target, stratum = sample.stratum, offset_ms = sample.offset_ms, "ntp reply");
                ProbeResult::new(ProbePayload::Time {
                    server_time: sample.server_time,
                    offset_ms: Some(sample.offset_ms),
                })
                .success(Some(elapsed_ms(start)))
                .with_description(format!("stratum {}", sample.stratum))
            }
            Err(e) => ProbeResult::new(ProbePayload::Time { server_time: None, offset_ms: None })
                .failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeStatus;

    #[test]
    fn test_timestamp_conversion() {
        let time = UNIX_EPOCH + Duration::from_secs(1_704_067_200) + Duration::from_millis(500);
        let ts = NtpTimestamp::from_system_time(time);

        assert_eq!(ts.seconds, 3_913_056_000);
        assert_eq!(ts.fraction, 1 << 31);
        assert!((ts.unix_seconds() - 1_704_067_200.5).abs() < 1e-6);
        assert_eq!(ts.to_datetime().unwrap().to_rfc3339(), "2024-01-01T00:00:00.500+00:00");
    }

    #[test]
    fn test_era_rollover() {
        let ts = NtpTimestamp { seconds: 100, fraction: 0 };
        assert_eq!(ts.unix_seconds(), 2_085_978_596.0);
    }

    #[test]
    fn test_request_layout() {
        let ts = NtpTimestamp { seconds: 0x0102_0304, fraction: 0x0506_0708 };
        let packet = request_packet(ts);
        assert_eq!(packet[0], 0x1B);
        assert_eq!(&packet[40..48], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(packet[1..40].iter().all(|b| *b == 0));
    }

    fn reply(sent: NtpTimestamp, mode: u8, stratum: u8, server: NtpTimestamp) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = 0x18 | mode;
        packet[1] = stratum;
        sent.write(&mut packet[24..32]);
        server.write(&mut packet[32..40]);
        server.write(&mut packet[40..48]);
        packet
    }

    #[test]
    fn test_offset_is_computed() {
        let sent = NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_000_000));
        let received = NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_000_002));
        let server = NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_000_011));

        let sample = parse_reply(&reply(sent, 4, 2, server), sent, received).unwrap();

        // ((11 - 0) + (11 - 2)) / 2 = 10 s
        assert!((sample.offset_ms - 10_000.0).abs() < 1e-3);
        assert_eq!(sample.stratum, 2);
    }

    #[test]
    fn test_bad_replies_rejected() {
        let sent = NtpTimestamp::now();
        let other = NtpTimestamp { seconds: sent.seconds.wrapping_add(1), fraction: 0 };

        assert!(parse_reply(&reply(sent, 3, 2, sent), sent, sent).is_err());
        let kod = parse_reply(&reply(sent, 4, 0, sent), sent, sent).unwrap_err();
        assert!(kod.to_string().contains("kiss-of-death"));
        assert!(parse_reply(&reply(other, 4, 2, sent), sent, sent).is_err());
        assert!(parse_reply(&[0x1C; 12], sent, sent).is_err());
    }

    /// Answers every request like a stratum 2 server whose clock matches ours
    async fn fake_server(stratum: u8) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; PACKET_LEN];
            while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
                let sent = NtpTimestamp::read(&buf[40..48]);
                let answer = reply(sent, 4, stratum, NtpTimestamp::now());
                let _ = socket.send_to(&answer, peer).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_probe_against_fake_server() {
        let port = fake_server(2).await;

        let result = NtpProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Up);
        match result.payload {
            ProbePayload::Time { server_time, offset_ms } => {
                assert!(server_time.is_some());
                assert!(offset_ms.unwrap().abs() < 1000.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kiss_of_death_is_down() {
        let port = fake_server(0).await;

        let result = NtpProbe::new(port, Duration::from_secs(2)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.unwrap().contains("kiss-of-death"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        let result = NtpProbe::new(port, Duration::from_millis(200)).check("127.0.0.1").await;

        assert_eq!(result.status, ProbeStatus::Down);
        assert!(result.description.unwrap().starts_with("Timeout occurred"));
        drop(socket);
    }
}
