//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Default driver address a surface host dials.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7071";

/// Default pause between losing a connection and dialing again.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Largest bitmap, in pixels, a host allocates for one surface, image read
/// or decoded image (8192 x 8192).
pub const DEFAULT_MAX_SURFACE_PIXELS: u64 = 8192 * 8192;

/// Top-level canvas-relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Settings for the surface host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Driver address, either `host:port` or a full `ws://` URL.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Load installed fonts for text rendering.
    #[serde(default = "default_true")]
    pub system_fonts: bool,

    /// Cap on width x height for any bitmap the driver can make the host allocate.
    #[serde(default = "default_max_surface_pixels")]
    pub max_surface_pixels: u64,

    /// Let `file://` image sources read from the host's filesystem.
    #[serde(default)]
    pub allow_file_images: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            system_fonts: true,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
            allow_file_images: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_address")]
    pub bind: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            bind: default_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate overrides such as "canvas_relay_host=debug".
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.into()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_max_surface_pixels() -> u64 {
    DEFAULT_MAX_SURFACE_PIXELS
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|e| panic!("invalid env pattern: {e}"))
});

/// Substitute `${ENV_VAR}` patterns with their environment values.
/// Unset variables become empty strings.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Default config file location: `~/.canvas_relay/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn host(&self) -> HostConfig {
        self.host.clone().unwrap_or_default()
    }

    pub fn driver(&self) -> DriverConfig {
        self.driver.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(host) = &self.host {
            if host.address.trim().is_empty() {
                errors.push("host.address cannot be empty".to_string());
            }
            if host.reconnect_delay_ms == 0 {
                warnings.push(
                    "host.reconnect_delay_ms is 0; a missing driver will be dialed in a tight loop"
                        .to_string(),
                );
            }
            if host.max_surface_pixels == 0 {
                errors.push("host.max_surface_pixels must be greater than 0".to_string());
            }
            if host.allow_file_images {
                warnings.push(
                    "host.allow_file_images is on; the driver can read images from this machine"
                        .to_string(),
                );
            }
        }

        if let Some(driver) = &self.driver {
            if driver.bind.trim().is_empty() {
                errors.push("driver.bind cannot be empty".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown logging.format '{}', using plain",
                    logging.format
                ));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                warnings.push(format!(
                    "Unknown logging.output '{}', using stderr",
                    logging.output
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for canvas-relay data: `~/.canvas_relay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".canvas_relay")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.host.is_none());
        assert_eq!(config.host().address, DEFAULT_ADDRESS);
        assert_eq!(config.host().reconnect_delay_ms, 1000);
        assert!(config.host().system_fonts);
        assert_eq!(config.host().max_surface_pixels, DEFAULT_MAX_SURFACE_PIXELS);
        assert!(!config.host().allow_file_images);
    }

    #[test]
    fn test_load_json5_with_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                // dial a remote driver
                host: {{ address: "10.0.0.5:9000", reconnect_delay_ms: 250, max_surface_pixels: 1000000 }},
                logging: {{ format: "json", filters: ["canvas_relay_host=debug"] }},
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        let host = config.host();
        assert_eq!(host.address, "10.0.0.5:9000");
        assert_eq!(host.reconnect_delay_ms, 250);
        assert_eq!(host.max_surface_pixels, 1_000_000);
        assert!(host.system_fonts);

        let logging = config.logging();
        assert_eq!(logging.format, "json");
        assert_eq!(logging.output, "stderr");
        assert_eq!(logging.filters, vec!["canvas_relay_host=debug"]);
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, the variable name is unique to this test.
        unsafe { std::env::set_var("CANVAS_RELAY_TEST_ADDR", "192.168.1.2:7071") };
        let out = substitute_env_vars(r#"{ host: { address: "${CANVAS_RELAY_TEST_ADDR}" } }"#);
        assert_eq!(out, r#"{ host: { address: "192.168.1.2:7071" } }"#);

        let out = substitute_env_vars("${CANVAS_RELAY_TEST_UNSET_VAR}");
        assert_eq!(out, "");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ host: ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = Config {
            host: Some(HostConfig {
                address: "  ".into(),
                reconnect_delay_ms: 0,
                system_fonts: false,
                max_surface_pixels: 0,
                allow_file_images: true,
            }),
            driver: None,
            logging: Some(LoggingConfig {
                format: "xml".into(),
                ..Default::default()
            }),
        };
        let (warnings, errors) = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("host.address"));
        assert!(errors[1].contains("host.max_surface_pixels"));
        assert_eq!(warnings.len(), 3);

        let (warnings, errors) = Config::default().validate();
        assert!(warnings.is_empty());
        assert!(errors.is_empty());
    }
}
