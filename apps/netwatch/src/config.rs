use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("Failed to write settings file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("Failed to parse settings file {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("Failed to serialize settings: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No settings path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub probes: ProbeDefaults,
    pub echo_server: EchoServerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Server store location. Relative paths are resolved against the
    /// directory holding the settings file.
    pub path: path::PathBuf,
}

/// Bounds applied to probes whose service entry does not carry its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeDefaults {
    pub icmp_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub https_timeout_secs: u64,
    pub ntp_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    pub tcp_connect_timeout_secs: u64,
    pub udp_timeout_secs: u64,
    pub echo_timeout_secs: u64,
    /// Successful probes slower than this are reported as degraded
    pub degraded_threshold_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoServerSettings {
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            probes: ProbeDefaults::default(),
            echo_server: EchoServerSettings::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { path: path::PathBuf::from("server_dict.json") }
    }
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            icmp_timeout_secs: 1,
            http_timeout_secs: 10,
            https_timeout_secs: 5,
            ntp_timeout_secs: 5,
            dns_timeout_secs: 5,
            tcp_connect_timeout_secs: 3,
            udp_timeout_secs: 3,
            echo_timeout_secs: 3,
            degraded_threshold_ms: 1000,
        }
    }
}

impl Default for EchoServerSettings {
    fn default() -> Self {
        Self { bind: "127.0.0.1:12345".into() }
    }
}

impl ProbeDefaults {
    /// Pick the per-service override when present, the default otherwise
    pub fn timeout(override_secs: Option<u64>, default_secs: u64) -> Duration {
        Duration::from_secs(override_secs.unwrap_or(default_secs).max(1))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default settings path ($XDG_CONFIG_HOME/netwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, SettingsError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(SettingsError::ConfigPathUnavailable);
    };

    Ok(path.join("netwatch/config.toml"))
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let probes = &self.probes;

        writeln!(f, "Current Settings:")?;
        write_title_1(f, "Store")?;
        write_1(f, "Path", &self.store.path.display())?;
        write_title_1(f, "Probe Defaults")?;
        write_1(f, "ICMP Timeout (s)", &probes.icmp_timeout_secs)?;
        write_1(f, "HTTP Timeout (s)", &probes.http_timeout_secs)?;
        write_1(f, "HTTPS Timeout (s)", &probes.https_timeout_secs)?;
        write_1(f, "NTP Timeout (s)", &probes.ntp_timeout_secs)?;
        write_1(f, "DNS Timeout (s)", &probes.dns_timeout_secs)?;
        write_1(f, "TCP Connect Timeout (s)", &probes.tcp_connect_timeout_secs)?;
        write_1(f, "UDP Timeout (s)", &probes.udp_timeout_secs)?;
        write_1(f, "Echo Timeout (s)", &probes.echo_timeout_secs)?;
        write_1(f, "Degraded Threshold (ms)", &probes.degraded_threshold_ms)?;
        write_title_1(f, "Echo Server")?;
        write_1(f, "Bind Address", &self.echo_server.bind)?;

        Ok(())
    }
}

impl Settings {
    /// Load settings from file
    ///
    /// Creates a default file in ~/.config/netwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// The store path is made absolute relative to the settings file.
    ///
    /// ```ignore
    /// let settings = config::Settings::from_config(None::<&path::Path>)?;
    /// println!("{}", settings);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, SettingsError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut settings = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| SettingsError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| SettingsError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let settings = Self::default();
            settings.write_config(&config_path)?;
            settings
        };

        if settings.store.path.is_relative() {
            if let Some(parent) = config_path.parent() {
                settings.store.path = parent.join(&settings.store.path);
            }
        }

        Ok(settings)
    }

    /// Serialize and write settings to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), SettingsError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| SettingsError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| SettingsError::WriteFailed { path: path.to_path_buf(), source })
    }
}
