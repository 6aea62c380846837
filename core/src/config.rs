//! Runtime configuration and on-disk path layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BurrowError, Result};

/// Environment variable overriding the default home directory.
pub const HOME_ENV: &str = "BURROW_HOME";

/// Optional configuration file name inside the home directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory for images, containers and scratch space
    pub home: PathBuf,

    /// DNS resolver files copied into the sandbox, first existing wins
    pub resolv_conf_sources: Vec<PathBuf>,

    /// Registry used for names without a registry host
    pub default_registry: String,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            resolv_conf_sources: vec![
                PathBuf::from("/var/run/systemd/resolve/resolv.conf"),
                PathBuf::from("/etc/burrowresolv.conf"),
                PathBuf::from("/etc/resolv.conf"),
            ],
            default_registry: "docker.io".to_string(),
            insecure_registries: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration rooted at `home`.
    ///
    /// Reads `<home>/config.yaml` when present; otherwise returns defaults.
    /// The `home` field always reflects the directory passed in.
    pub fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let path = home.join(CONFIG_FILE);

        let mut config = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| {
                BurrowError::ConfigError(format!("failed to read {}: {}", path.display(), e))
            })?;
            let config = serde_yaml::from_str::<RuntimeConfig>(&data).map_err(|e| {
                BurrowError::ConfigError(format!("failed to parse {}: {}", path.display(), e))
            })?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            config
        } else {
            RuntimeConfig::default()
        };

        config.home = home;
        Ok(config)
    }

    /// Path layout derived from `home`.
    pub fn layout(&self) -> PathLayout {
        PathLayout::new(&self.home)
    }
}

/// Default home: `$BURROW_HOME`, else `~/.burrow`.
pub fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".burrow"))
        .unwrap_or_else(|| PathBuf::from(".burrow"))
}

/// Well-known subdirectories under the home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch space for in-flight pulls.
    pub fn temp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn images(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn containers(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Reserved for network namespaces; no networking is configured.
    pub fn net_ns(&self) -> PathBuf {
        self.root.join("net-ns")
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.temp(), self.images(), self.containers(), self.net_ns()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BurrowError::ConfigError(format!(
                    "failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = PathLayout::new("/srv/burrow");
        assert_eq!(layout.temp(), PathBuf::from("/srv/burrow/tmp"));
        assert_eq!(layout.images(), PathBuf::from("/srv/burrow/images"));
        assert_eq!(layout.containers(), PathBuf::from("/srv/burrow/containers"));
        assert_eq!(layout.net_ns(), PathBuf::from("/srv/burrow/net-ns"));
    }

    #[test]
    fn test_layout_ensure_creates_all_directories() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path().join("home"));
        layout.ensure().unwrap();

        assert!(layout.temp().is_dir());
        assert!(layout.images().is_dir());
        assert!(layout.containers().is_dir());
        assert!(layout.net_ns().is_dir());

        // Idempotent
        layout.ensure().unwrap();
    }

    #[test]
    fn test_default_config_resolv_order() {
        let config = RuntimeConfig::default();
        assert_eq!(config.resolv_conf_sources.len(), 3);
        assert_eq!(
            config.resolv_conf_sources[0],
            PathBuf::from("/var/run/systemd/resolve/resolv.conf")
        );
        assert_eq!(
            config.resolv_conf_sources[2],
            PathBuf::from("/etc/resolv.conf")
        );
        assert_eq!(config.default_registry, "docker.io");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = RuntimeConfig::load(tmp.path()).unwrap();
        assert_eq!(config.home, tmp.path());
        assert_eq!(config.default_registry, "docker.io");
    }

    #[test]
    fn test_load_reads_yaml_and_keeps_home() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "home: /elsewhere\ndefault_registry: registry.local:5000\ninsecure_registries:\n  - registry.local:5000\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(tmp.path()).unwrap();
        assert_eq!(config.home, tmp.path());
        assert_eq!(config.default_registry, "registry.local:5000");
        assert_eq!(config.insecure_registries, vec!["registry.local:5000"]);
        // Unspecified fields keep their defaults
        assert_eq!(config.resolv_conf_sources.len(), 3);
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "default_registry: [unclosed").unwrap();
        let err = RuntimeConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, BurrowError::ConfigError(_)));
    }

    #[test]
    #[serial]
    fn test_default_home_honors_env() {
        std::env::set_var(HOME_ENV, "/tmp/burrow-env-home");
        assert_eq!(default_home(), PathBuf::from("/tmp/burrow-env-home"));
        std::env::remove_var(HOME_ENV);
    }

    #[test]
    #[serial]
    fn test_default_home_falls_back_to_user_home() {
        std::env::remove_var(HOME_ENV);
        let home = default_home();
        assert!(home.ends_with(".burrow"));
    }
}
