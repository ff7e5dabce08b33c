//! Startup configuration.
//!
//! Settings come from three layers: built-in defaults, an optional TOML file,
//! and command-line flags, each overriding the one before. The result is
//! immutable for the life of the process.
//!
//! ```toml
//! listen_port = 8017
//! default_host = "127.0.0.1"
//! default_port = 4000
//! max_connections = 200
//! blacklist = ["192.0.2.7"]
//!
//! [[destination]]
//! name = "Lost Souls"
//! host = "lostsouls.org"
//! port = 23
//! ```

use std::{
    fs,
    net::{IpAddr, Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::util::canonical_ip;

pub const DEFAULT_LISTEN_PORT: u16 = 8017;
pub const DEFAULT_MUD_HOST: &str = "127.0.0.1";
pub const DEFAULT_MUD_PORT: u16 = 4000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error in config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("destination #{index} in {}: {reason}", path.display())]
    Destination {
        path: PathBuf,
        index: usize,
        reason: &'static str,
    },
    #[error("{0} must be between 1 and 65535")]
    Port(&'static str),
}

/// A selectable game.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Destination {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// The menu's list of games, in the order they were configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<Destination>,
}

impl Directory {
    pub fn new(entries: Vec<Destination>) -> Self {
        Self { entries }
    }

    /// 1-based lookup, as shown in the menu.
    pub fn get(&self, choice: usize) -> Option<&Destination> {
        choice.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.entries.iter()
    }
}

/// The on-disk file, every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub listen_port: Option<u16>,
    pub default_host: Option<String>,
    pub default_port: Option<u16>,
    pub max_connections: Option<usize>,
    pub blacklist: Vec<IpAddr>,
    #[serde(rename = "destination")]
    pub destinations: Vec<Destination>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        for (i, dest) in file.destinations.iter().enumerate() {
            let reason = if dest.name.trim().is_empty() {
                Some("name is empty")
            } else if dest.host.trim().is_empty() {
                Some("host is empty")
            } else if dest.port == 0 {
                Some("port must be between 1 and 65535")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigError::Destination {
                    path: path.to_path_buf(),
                    index: i + 1,
                    reason,
                });
            }
        }
        Ok(file)
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen_port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub mud_host: Option<String>,
    pub mud_port: Option<u16>,
}

/// Everything the gateway needs to run.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    /// Where to go when the directory is empty.
    pub fallback: Destination,
    pub directory: Directory,
    /// 0 means unlimited.
    pub max_connections: usize,
    pub blacklist: Vec<IpAddr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            fallback: Destination {
                name: "default".to_string(),
                host: DEFAULT_MUD_HOST.to_string(),
                port: DEFAULT_MUD_PORT,
            },
            directory: Directory::default(),
            max_connections: 0,
            blacklist: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn resolve(file: Option<ConfigFile>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = GatewayConfig::default();

        if let Some(file) = file {
            if let Some(port) = file.listen_port {
                config.listen.set_port(port);
            }
            if let Some(host) = file.default_host {
                config.fallback.host = host;
            }
            if let Some(port) = file.default_port {
                config.fallback.port = port;
            }
            if let Some(max) = file.max_connections {
                config.max_connections = max;
            }
            config.blacklist = file.blacklist.into_iter().map(canonical_ip).collect();
            config.directory = Directory::new(file.destinations);
        }

        if let Some(bind) = overrides.bind {
            config.listen.set_ip(bind);
        }
        if let Some(port) = overrides.listen_port {
            config.listen.set_port(port);
        }
        if let Some(host) = overrides.mud_host {
            config.fallback.host = host;
        }
        if let Some(port) = overrides.mud_port {
            config.fallback.port = port;
        }

        if config.listen.port() == 0 {
            return Err(ConfigError::Port("listen port"));
        }
        if config.fallback.port == 0 {
            return Err(ConfigError::Port("default game port"));
        }
        Ok(config)
    }

    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.blacklist.contains(&canonical_ip(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
listen_port = 9000
default_host = "mud.example.org"
max_connections = 10
blacklist = ["192.0.2.7", "2001:db8::1"]

[[destination]]
name = "Alpha"
host = "alpha.example.org"
port = 4000

[[destination]]
name = "Beta"
host = "beta.example.org"
port = 5000

[[destination]]
name = "Gamma"
host = "::1"
port = 6000
"#;

    fn sample() -> ConfigFile {
        ConfigFile::parse(SAMPLE, Path::new("lantern.toml")).unwrap()
    }

    #[test]
    fn destinations_keep_file_order() {
        let config = GatewayConfig::resolve(Some(sample()), Overrides::default()).unwrap();
        let names: Vec<_> = config.directory.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta", "Gamma"]);
        assert_eq!(config.directory.get(2).unwrap().host, "beta.example.org");
        assert_eq!(config.directory.get(0), None);
        assert_eq!(config.directory.get(4), None);
    }

    #[test]
    fn command_line_beats_file_beats_defaults() {
        let config = GatewayConfig::resolve(Some(sample()), Overrides::default()).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.fallback.host, "mud.example.org");
        assert_eq!(config.fallback.port, DEFAULT_MUD_PORT);
        assert_eq!(config.max_connections, 10);

        let overrides = Overrides {
            listen_port: Some(7000),
            mud_port: Some(23),
            ..Default::default()
        };
        let config = GatewayConfig::resolve(Some(sample()), overrides).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.fallback.port, 23);

        let config = GatewayConfig::resolve(None, Overrides::default()).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_LISTEN_PORT);
        assert!(config.listen.ip().is_unspecified());
        assert_eq!(config.fallback.host, DEFAULT_MUD_HOST);
        assert!(config.directory.is_empty());
    }

    #[test]
    fn blacklist_matches_mapped_addresses() {
        let config = GatewayConfig::resolve(Some(sample()), Overrides::default()).unwrap();
        assert!(config.is_blocked("192.0.2.7".parse().unwrap()));
        assert!(config.is_blocked("::ffff:192.0.2.7".parse().unwrap()));
        assert!(config.is_blocked("2001:db8::1".parse().unwrap()));
        assert!(!config.is_blocked("192.0.2.8".parse().unwrap()));
    }

    #[test]
    fn parse_errors_report_the_line() {
        let text = "listen_port = 8017\n[[destination]]\nname = \"A\"\nport = nope\n";
        let err = ConfigFile::parse(text, Path::new("bad.toml")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad.toml"), "{}", msg);
        assert!(msg.contains("line 4"), "{}", msg);
    }

    #[test]
    fn incomplete_destinations_are_rejected() {
        let text = "[[destination]]\nname = \"\"\nhost = \"a\"\nport = 1\n";
        let err = ConfigFile::parse(text, Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Destination { index: 1, .. }));

        let text = "[[destination]]\nname = \"A\"\nport = 1\n";
        assert!(matches!(
            ConfigFile::parse(text, Path::new("x.toml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_ports_are_rejected() {
        let overrides = Overrides {
            mud_port: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            GatewayConfig::resolve(None, overrides),
            Err(ConfigError::Port(_))
        ));
    }
}
