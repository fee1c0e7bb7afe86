use std::fmt;
use std::net::TcpListener;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds allowed for reading a file in the raw view before giving up
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Realm announced in the Basic challenge when no system backend is in use
    #[serde(default = "default_realm")]
    pub realm: String,

    /// PAM service used for system account authentication
    #[serde(default = "default_pam_service")]
    pub pam_service: String,

    /// List dot-files and dot-directories in directory listings
    #[serde(default = "default_show_hidden")]
    pub show_hidden: bool,
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_realm() -> String {
    "http-file-server".to_string()
}

fn default_pam_service() -> String {
    "login".to_string()
}

fn default_show_hidden() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            realm: default_realm(),
            pam_service: default_pam_service(),
            show_hidden: default_show_hidden(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// How many ports past the starting one an `auto` scan will try.
const AUTO_PORT_SCAN_LIMIT: u16 = 100;

/// Listen port: either fixed, or the first free port at or after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Fixed(u16),
    Auto { start: u16 },
}

impl Default for PortSpec {
    fn default() -> Self {
        PortSpec::Auto { start: 8000 }
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();

        if let Some(rest) = lower.strip_prefix("auto") {
            let start = match rest.strip_prefix(':') {
                Some(n) => n
                    .parse()
                    .map_err(|_| format!("Invalid starting port in '{}'", s))?,
                None if rest.is_empty() => 8000,
                None => return Err(format!("Invalid port specification '{}'", s)),
            };
            return Ok(PortSpec::Auto { start });
        }

        s.parse()
            .map(PortSpec::Fixed)
            .map_err(|_| format!("Invalid port '{}': expected a number or auto[:N]", s))
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Fixed(port) => write!(f, "{}", port),
            PortSpec::Auto { start } => write!(f, "auto:{}", start),
        }
    }
}

impl PortSpec {
    /// Pick the concrete port to listen on for `host`.
    pub fn select(&self, host: &str) -> std::io::Result<u16> {
        match *self {
            PortSpec::Fixed(port) => Ok(port),
            PortSpec::Auto { start } => {
                let end = start.saturating_add(AUTO_PORT_SCAN_LIMIT);
                (start..=end)
                    .find(|port| TcpListener::bind((host, *port)).is_ok())
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::AddrInUse,
                            format!("No free port between {} and {}", start, end),
                        )
                    })
            }
        }
    }
}
