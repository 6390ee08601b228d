//! Driver configuration.
//!
//! Loaded from TOML; every field has a default, so an empty or missing file
//! yields the stock layout:
//!
//! ```toml
//! data_dir = "/usr/share/netcf"
//! debug = false
//!
//! [probe]
//! proc_vlan_dir = "/proc/net/vlan"
//! sysfs_net_dir = "/sys/class/net"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding [`NetcfConfig::root`].
pub const ENV_ROOT: &str = "NETCF_ROOT";
/// Environment variable overriding [`NetcfConfig::data_dir`].
pub const ENV_DATADIR: &str = "NETCF_DATADIR";
/// Environment variable overriding [`NetcfConfig::debug`].
pub const ENV_DEBUG: &str = "NETCF_DEBUG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where interface-type probes look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// One regular file per VLAN device.
    #[serde(default = "default_proc_vlan_dir")]
    pub proc_vlan_dir: PathBuf,

    /// One directory per network device.
    #[serde(default = "default_sysfs_net_dir")]
    pub sysfs_net_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetcfConfig {
    /// Filesystem root the store works under; `None` means `/`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Holds `xml/` (stylesheets, schema) and `lenses/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Print store load diagnostics to stderr.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub probe: ProbeConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/usr/share/netcf")
}

fn default_proc_vlan_dir() -> PathBuf {
    PathBuf::from("/proc/net/vlan")
}

fn default_sysfs_net_dir() -> PathBuf {
    PathBuf::from("/sys/class/net")
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            proc_vlan_dir: default_proc_vlan_dir(),
            sysfs_net_dir: default_sysfs_net_dir(),
        }
    }
}

impl Default for NetcfConfig {
    fn default() -> Self {
        Self {
            root: None,
            data_dir: default_data_dir(),
            debug: false,
            probe: ProbeConfig::default(),
        }
    }
}

impl NetcfConfig {
    /// Load configuration from file, falling back to defaults if it does
    /// not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(Path::new("<string>"), content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Applies `NETCF_ROOT`, `NETCF_DATADIR` and `NETCF_DEBUG`. Empty
    /// values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(root) = env_value(ENV_ROOT) {
            self.root = Some(PathBuf::from(root));
        }
        if let Some(dir) = env_value(ENV_DATADIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = env_value(ENV_DEBUG) {
            match parse_flag(&flag) {
                Some(debug) => self.debug = debug,
                None => warn!(value = %flag, "ignoring unrecognized {}", ENV_DEBUG),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".to_string()));
        }
        if !self.probe.proc_vlan_dir.is_absolute() {
            return Err(ConfigError::Invalid(
                "probe.proc_vlan_dir must be an absolute path".to_string(),
            ));
        }
        if !self.probe.sysfs_net_dir.is_absolute() {
            return Err(ConfigError::Invalid(
                "probe.sysfs_net_dir must be an absolute path".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory of the stylesheets and the schema.
    pub fn xml_dir(&self) -> PathBuf {
        self.data_dir.join("xml")
    }

    /// Directory of the store's file grammars.
    pub fn lens_dir(&self) -> PathBuf {
        self.data_dir.join("lenses")
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn clear_env() {
        for name in [ENV_ROOT, ENV_DATADIR, ENV_DEBUG] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config() {
        let config = NetcfConfig::default();
        assert_eq!(config.root, None);
        assert_eq!(config.data_dir, PathBuf::from("/usr/share/netcf"));
        assert!(!config.debug);
        assert_eq!(config.probe.proc_vlan_dir, PathBuf::from("/proc/net/vlan"));
        assert_eq!(config.probe.sysfs_net_dir, PathBuf::from("/sys/class/net"));
        assert_eq!(config.lens_dir(), PathBuf::from("/usr/share/netcf/lenses"));
        assert_eq!(config.xml_dir(), PathBuf::from("/usr/share/netcf/xml"));
    }

    #[test]
    fn test_toml_deserialization() {
        let config = NetcfConfig::from_toml_str(
            r#"
root = "/tmp/netcf-root"
debug = true

[probe]
sysfs_net_dir = "/tmp/sys/class/net"
"#,
        )
        .unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/tmp/netcf-root")));
        assert!(config.debug);
        assert_eq!(config.probe.sysfs_net_dir, PathBuf::from("/tmp/sys/class/net"));
        // Unspecified values should use defaults
        assert_eq!(config.data_dir, PathBuf::from("/usr/share/netcf"));
        assert_eq!(config.probe.proc_vlan_dir, PathBuf::from("/proc/net/vlan"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = NetcfConfig::from_toml_str("debug = maybe").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = NetcfConfig::load_or_default("/nonexistent/netcf.toml").unwrap();
        assert_eq!(config, NetcfConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netcf.toml");
        let config = NetcfConfig {
            data_dir: PathBuf::from("/opt/netcf"),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(NetcfConfig::load_or_default(&path).unwrap(), config);
    }

    #[test]
    fn test_validate() {
        assert!(NetcfConfig::default().validate().is_ok());

        let mut config = NetcfConfig::default();
        config.data_dir = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = NetcfConfig::default();
        config.probe.proc_vlan_dir = PathBuf::from("proc/net/vlan");
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_ROOT, "/tmp/root");
        std::env::set_var(ENV_DATADIR, "/tmp/data");
        std::env::set_var(ENV_DEBUG, "yes");

        let config = NetcfConfig::default().with_env_overrides();
        clear_env();

        assert_eq!(config.root, Some(PathBuf::from("/tmp/root")));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert!(config.debug);
    }

    #[test]
    #[serial]
    fn test_env_overrides_ignore_empty_and_unknown() {
        clear_env();
        std::env::set_var(ENV_DATADIR, "");
        std::env::set_var(ENV_DEBUG, "sometimes");

        let config = NetcfConfig::default().with_env_overrides();
        clear_env();

        assert_eq!(config, NetcfConfig::default());
    }
}
