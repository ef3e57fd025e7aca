use std::time::{Duration, Instant};

use super::{Probe, elapsed_ms};
use crate::monitoring::params::ParamError;
use crate::monitoring::types::{ProbePayload, ProbeResult, Protocol};

/// Browser-like agent; some servers reject unknown clients over TLS
const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

/// HTTP/HTTPS GET check
pub struct HttpProbe {
    protocol: Protocol,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(protocol: Protocol, url: impl Into<String>, timeout: Duration) -> Result<Self, ParamError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if protocol == Protocol::Https {
            builder = builder.user_agent(BROWSER_USER_AGENT);
        }
        let client = builder.build().map_err(|e| ParamError::Setup(e.to_string()))?;

        Ok(Self { protocol, url: url.into(), client })
    }
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Timeout occurred".to_string()
    } else if e.is_connect() {
        "Connection error".to_string()
    } else {
        format!("Error during request: {e}")
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn check(&self, _target: &str) -> ProbeResult {
        let start = Instant::now();
        let payload = |status_code| ProbePayload::Http { url: self.url.clone(), status_code };

        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let latency = elapsed_ms(start);
                let status = response.status();
                let result = ProbeResult::new(payload(Some(status.as_u16())));

                // Anything below 400 counts as up
                if status.as_u16() < 400 {
                    result.success(Some(latency)).with_description("Server is up")
                } else {
                    result.failure(format!("Server responded with {status}")).with_latency(latency)
                }
            }
            Err(e) => ProbeResult::new(payload(None)).failure(describe_error(&e)),
        }
    }
}
