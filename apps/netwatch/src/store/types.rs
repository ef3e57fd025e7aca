use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Services of one target, keyed by protocol name as written in the store
pub type ServiceMap = BTreeMap<String, ServiceConfig>;

/// Every configured target and its services
pub type ServerMap = BTreeMap<String, ServiceMap>;

/// Parameters of one (target, protocol) pair
///
/// `interval` is common to every protocol. Everything else is kept as raw
/// JSON and decoded by the probe that consumes it, so the store does not need
/// to know about protocol-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Polling period in seconds
    pub interval: u64,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ServiceConfig {
    pub fn new(interval: u64) -> Self {
        Self { interval, params: Map::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.get(key).is_some_and(|value| !value.is_null())
    }

    /// Decode the protocol-specific fields into a typed parameter struct
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.params.clone()))
    }
}

/// Immutable view of the store taken when a monitoring session starts
///
/// Cloning shares the underlying map, and later store edits never reach an
/// existing snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    servers: Arc<ServerMap>,
}

impl ConfigSnapshot {
    pub fn new(servers: ServerMap) -> Self {
        Self { servers: Arc::new(servers) }
    }

    pub fn services(&self, target: &str) -> Option<&ServiceMap> {
        self.servers.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceMap)> {
        self.servers.iter().map(|(target, services)| (target.as_str(), services))
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct PortOnly {
        port: u64,
        #[serde(default)]
        timeout: Option<u64>,
    }

    #[test]
    fn test_service_config_flattens_params() {
        let raw = json!({ "interval": 5, "port": 22 });
        let service: ServiceConfig = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(service.interval, 5);
        assert!(service.has_param("port"));
        assert!(!service.has_param("interval"));
        assert_eq!(serde_json::to_value(&service).unwrap(), raw);
    }

    #[test]
    fn test_decode_typed_params() {
        let service = ServiceConfig::new(10).with_param("port", 8080);
        let decoded: PortOnly = service.decode().unwrap();
        assert_eq!(decoded, PortOnly { port: 8080, timeout: None });

        let wrong = ServiceConfig::new(10).with_param("port", "eighty");
        assert!(wrong.decode::<PortOnly>().is_err());
    }

    #[test]
    fn test_snapshot_is_detached_from_source() {
        let mut servers = ServerMap::new();
        servers
            .entry("10.0.0.5".to_string())
            .or_default()
            .insert("TCP".to_string(), ServiceConfig::new(5).with_param("port", 22));

        let snapshot = ConfigSnapshot::new(servers.clone());
        servers.clear();

        assert_eq!(snapshot.iter().map(|(target, _)| target).collect::<Vec<_>>(), vec!["10.0.0.5"]);
        assert!(snapshot.services("10.0.0.5").is_some_and(|s| s.contains_key("TCP")));
        assert!(snapshot.services("10.0.0.6").is_none());
    }
}
