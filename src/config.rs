//! Pin configuration - YAML files, environment overrides, startup validation
//!
//! Configuration is loaded exactly once, before the interceptor registers
//! with any rendering surface. Every malformed entry is a fatal
//! [`ConfigError`] at load time, never a per-request failure.
//!
//! ## File format
//!
//! ```yaml
//! build_mode: prod
//! hosts:
//!   - host: api.example.com
//!     pins:
//!       - "sha256:C5PmIOEZ5VuTq5mTvLYmKpBB0GnLKPBhOC8V/2HkvVA="
//!   - host: static.example.com
//!     cert_files:
//!       - certs/static-example.pem
//! ```
//!
//! `pins` are `sha256:<base64>` SPKI fingerprint literals; `cert_files` are
//! PEM certificates whose SPKI fingerprints are derived at load time. A host
//! may combine both; the union forms its accepted set.

use crate::pinning::fingerprint::{Fingerprint, FingerprintError};
use crate::pinning::store::{PinStore, PinnedHost, StoreError};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment variable naming the config file path
pub const ENV_CONFIG_PATH: &str = "WEBPIN_CONFIG";

/// Environment variable overriding the build mode (`dev` or `prod`)
pub const ENV_BUILD_MODE: &str = "WEBPIN_BUILD_MODE";

/// Configuration errors; all fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("host entry has an empty host name")]
    EmptyHost,

    #[error("no pins or certificate files configured for host {0}")]
    NoPinSources(String),

    #[error("invalid pin for host {host}: {source}")]
    InvalidPin {
        host: String,
        source: FingerprintError,
    },

    #[error("failed to read certificate file {path}: {source}")]
    CertRead {
        path: String,
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(String),

    #[error("invalid build mode {0:?} (expected \"dev\" or \"prod\")")]
    InvalidBuildMode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Build mode, fixed for the process lifetime
///
/// Threaded into the policy engine at construction; never a mutable static,
/// never toggled by remote input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Local/staging: pin failures degrade to the platform's default trust
    Dev,

    /// Production: pin failures fail closed
    #[default]
    Prod,
}

impl BuildMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(ConfigError::InvalidBuildMode(other.to_string())),
        }
    }
}

/// Pin sources for one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostPins {
    /// Exact host name (no wildcards)
    pub host: String,

    /// `sha256:<base64>` fingerprint literals
    #[serde(default)]
    pub pins: Vec<String>,

    /// PEM certificate files to derive fingerprints from
    #[serde(default)]
    pub cert_files: Vec<PathBuf>,
}

/// Static pin configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinConfig {
    /// Build mode for policy decisions
    #[serde(default)]
    pub build_mode: BuildMode,

    /// Pinned hosts
    #[serde(default)]
    pub hosts: Vec<HostPins>,
}

impl PinConfig {
    /// Create an empty configuration for the given mode
    pub fn new(build_mode: BuildMode) -> Self {
        Self {
            build_mode,
            hosts: Vec::new(),
        }
    }

    /// Add a host with fingerprint literals (builder style)
    pub fn with_host(
        mut self,
        host: impl Into<String>,
        pins: impl IntoIterator<Item = String>,
    ) -> Self {
        self.hosts.push(HostPins {
            host: host.into(),
            pins: pins.into_iter().collect(),
            cert_files: Vec::new(),
        });
        self
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::FileRead {
                path: path.as_ref().display().to_string(),
                source: e,
            })?;

        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// `WEBPIN_CONFIG` names the YAML file (empty config when unset);
    /// `WEBPIN_BUILD_MODE` overrides the file's build mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(mode) = std::env::var(ENV_BUILD_MODE) {
            config.build_mode = BuildMode::parse(&mode)?;
        }

        Ok(config)
    }

    /// Build mode this configuration selects
    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    /// Structural validation (pin literals are checked by `build_store`)
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.hosts {
            if entry.host.trim().is_empty() {
                return Err(ConfigError::EmptyHost);
            }
            if entry.pins.is_empty() && entry.cert_files.is_empty() {
                return Err(ConfigError::NoPinSources(entry.host.clone()));
            }
        }
        Ok(())
    }

    /// Parse all pin sources into an immutable store
    pub fn build_store(&self) -> Result<PinStore, ConfigError> {
        self.validate()?;

        let mut entries = Vec::with_capacity(self.hosts.len());

        for host_pins in &self.hosts {
            let mut fingerprints = Vec::new();

            for pin in &host_pins.pins {
                let fp = Fingerprint::parse(pin).map_err(|e| ConfigError::InvalidPin {
                    host: host_pins.host.clone(),
                    source: e,
                })?;
                fingerprints.push(fp);
            }

            for path in &host_pins.cert_files {
                fingerprints.extend(fingerprints_from_pem(&host_pins.host, path)?);
            }

            entries.push(PinnedHost::new(host_pins.host.clone(), fingerprints)?);
        }

        let store = PinStore::from_entries(entries)?;

        info!(
            pinned_hosts = store.len(),
            build_mode = ?self.build_mode,
            "pin store loaded"
        );

        Ok(store)
    }
}

/// Derive SPKI fingerprints from every certificate in a PEM file
fn fingerprints_from_pem(host: &str, path: &Path) -> Result<Vec<Fingerprint>, ConfigError> {
    let file = std::fs::File::open(path).map_err(|e| ConfigError::CertRead {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = std::io::BufReader::new(file);

    let mut fingerprints = Vec::new();
    for cert in certs_from_reader(&mut reader, path)? {
        let fp = Fingerprint::of_cert_der(&cert).map_err(|e| ConfigError::InvalidPin {
            host: host.to_string(),
            source: e,
        })?;
        fingerprints.push(fp);
    }

    if fingerprints.is_empty() {
        return Err(ConfigError::NoCertificate(path.display().to_string()));
    }

    Ok(fingerprints)
}

fn certs_from_reader(
    reader: &mut dyn BufRead,
    path: &Path,
) -> Result<Vec<Vec<u8>>, ConfigError> {
    rustls_pemfile::certs(reader)
        .map(|item| {
            item.map(|der| der.to_vec())
                .map_err(|e| ConfigError::CertRead {
                    path: path.display().to_string(),
                    source: e,
                })
        })
        .collect()
}
