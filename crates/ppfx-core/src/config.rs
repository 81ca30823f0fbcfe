use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming the TOML file used by the default
/// configuration path.
pub const CONFIG_ENV: &str = "PPFX_CONFIG";

/// Default config location when `PPFX_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ppfx/config.toml";

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PpfxConfig {
    pub redirect: RedirectConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// Whether matching URLs are redirected at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Translate and probe; serve locally when possible.
    #[default]
    Redirect,
    /// Never redirect: every request goes to the remote backend.
    Passthrough,
}

/// What a read-path open does when the local probe fails with an error
/// other than "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeErrorPolicy {
    /// Fall back to the remote backend and log the anomaly.
    #[default]
    Remote,
    /// Surface the probe error to the caller.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub mode: RedirectMode,
    pub probe_error: ProbeErrorPolicy,
    /// Timeout applied when an operation passes 0 (default: 60)
    pub default_timeout_secs: u16,
    /// Prefix rules, in insertion order
    pub rules: Vec<RuleConfig>,
}

/// One remote-prefix → local-prefix rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub remote: String,
    pub local: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint of the remote store
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding the remote objects
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            mode: RedirectMode::Redirect,
            probe_error: ProbeErrorPolicy::Remote,
            default_timeout_secs: 60,
            rules: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "ppfx".into(),
            enforce_tls: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl PpfxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::invalid_argument(format!("parsing config: {e}")))
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::from_io(e, format!("reading config {}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Read `path` if it exists, otherwise warn and fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            Ok(Self::default())
        }
    }
}

/// Location consulted by the default configuration path.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl RedirectConfig {
    /// Redirect settings from the default config file, or built-in defaults.
    pub fn load_default() -> Result<Self> {
        Ok(PpfxConfig::load_or_default(&default_config_path())?.redirect)
    }

    /// Build from the string map handed to a plugin factory.
    ///
    /// Without any `prefix.*` entry the default configuration path is
    /// taken (see [`RedirectConfig::load_default`]) and the scalar keys
    /// present in the map are applied on top of it.
    pub fn from_plugin_map<I, K, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_plugin_map_or(entries, Self::load_default)
    }

    /// Same as [`RedirectConfig::from_plugin_map`] with an explicit fallback.
    pub fn from_plugin_map_or<I, K, V, F>(entries: I, fallback: F) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
        F: FnOnce() -> Result<Self>,
    {
        let mut rules: BTreeMap<(u64, String), RuleConfig> = BTreeMap::new();
        let mut mode = None;
        let mut probe_error = None;
        let mut timeout = None;

        for (key, value) in entries {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            if let Some(index) = key.strip_prefix("prefix.") {
                let order: u64 = index.parse().map_err(|_| {
                    Error::invalid_argument(format!("prefix key {key:?} needs a numeric index"))
                })?;
                rules.insert((order, key.to_string()), parse_rule(key, value)?);
                continue;
            }
            match key {
                "mode" => mode = Some(parse_mode(value)?),
                "probe_error" => probe_error = Some(parse_probe_error(value)?),
                "timeout" => {
                    timeout = Some(value.parse::<u16>().map_err(|_| {
                        Error::invalid_argument(format!("timeout {value:?} is not a number"))
                    })?)
                }
                _ => tracing::trace!(key, "ignoring unrecognized plugin config key"),
            }
        }

        let mut config = if rules.is_empty() {
            tracing::debug!("no prefix rules in plugin config, loading default configuration");
            fallback()?
        } else {
            RedirectConfig {
                rules: rules.into_values().collect(),
                ..Default::default()
            }
        };
        if let Some(mode) = mode {
            config.mode = mode;
        }
        if let Some(policy) = probe_error {
            config.probe_error = policy;
        }
        if let Some(secs) = timeout {
            config.default_timeout_secs = secs;
        }
        Ok(config)
    }
}

fn parse_rule(key: &str, value: &str) -> Result<RuleConfig> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(remote), Some(local), None) => Ok(RuleConfig {
            remote: remote.to_string(),
            local: local.to_string(),
        }),
        _ => Err(Error::invalid_argument(format!(
            "{key}: expected \"<remote-prefix> <local-prefix>\", got {value:?}"
        ))),
    }
}

fn parse_mode(value: &str) -> Result<RedirectMode> {
    match value.to_ascii_lowercase().as_str() {
        "redirect" => Ok(RedirectMode::Redirect),
        "passthrough" => Ok(RedirectMode::Passthrough),
        other => Err(Error::invalid_argument(format!("unknown mode {other:?}"))),
    }
}

fn parse_probe_error(value: &str) -> Result<ProbeErrorPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "remote" => Ok(ProbeErrorPolicy::Remote),
        "fail" => Ok(ProbeErrorPolicy::Fail),
        other => Err(Error::invalid_argument(format!(
            "unknown probe_error policy {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[redirect]
mode = "passthrough"
probe_error = "fail"
default_timeout_secs = 15

[[redirect.rules]]
remote = "/data/"
local = "/mnt/cache/"

[[redirect.rules]]
remote = "root://eos.example.org//eos/user"
local = "/eos/user"

[storage]
endpoint = "https://s3.example.com:8333"
region = "us-west-2"
bucket = "mirror"
enforce_tls = true

[log]
level = "debug"
format = "json"
"#;
        let config = PpfxConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.redirect.mode, RedirectMode::Passthrough);
        assert_eq!(config.redirect.probe_error, ProbeErrorPolicy::Fail);
        assert_eq!(config.redirect.default_timeout_secs, 15);
        assert_eq!(config.redirect.rules.len(), 2);
        assert_eq!(config.redirect.rules[0].remote, "/data/");
        assert_eq!(config.redirect.rules[1].local, "/eos/user");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.bucket, "mirror");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = PpfxConfig::from_toml_str("").unwrap();

        assert_eq!(config.redirect.mode, RedirectMode::Redirect);
        assert_eq!(config.redirect.probe_error, ProbeErrorPolicy::Remote);
        assert_eq!(config.redirect.default_timeout_secs, 60);
        assert!(config.redirect.rules.is_empty());
        assert_eq!(config.storage.endpoint, "http://localhost:8333");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PpfxConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.redirect.rules.is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[redirect.rules]]\nremote = \"/a\"\nlocal = \"/b\"\n",
        )
        .unwrap();
        let config = PpfxConfig::load(&path).unwrap();
        assert_eq!(
            config.redirect.rules,
            vec![RuleConfig {
                remote: "/a".into(),
                local: "/b".into()
            }]
        );
    }

    #[test]
    fn test_plugin_map_orders_rules_by_index() {
        let map = BTreeMap::from([
            ("prefix.10".to_string(), "/late /mnt/late".to_string()),
            ("prefix.2".to_string(), "/early /mnt/early".to_string()),
            ("lib".to_string(), "libXrdClProxyPrefix.so".to_string()),
            ("enable".to_string(), "true".to_string()),
            ("probe_error".to_string(), "fail".to_string()),
        ]);
        let config =
            RedirectConfig::from_plugin_map_or(map, || panic!("fallback not expected")).unwrap();

        assert_eq!(config.rules[0].remote, "/early");
        assert_eq!(config.rules[1].remote, "/late");
        assert_eq!(config.probe_error, ProbeErrorPolicy::Fail);
        assert_eq!(config.mode, RedirectMode::Redirect);
    }

    #[test]
    fn test_plugin_map_without_rules_takes_default_path() {
        let fallback = || {
            Ok(RedirectConfig {
                rules: vec![RuleConfig {
                    remote: "/from-file".into(),
                    local: "/mnt/file".into(),
                }],
                ..Default::default()
            })
        };
        let config = RedirectConfig::from_plugin_map_or([("timeout", "5")], fallback).unwrap();
        assert_eq!(config.rules[0].remote, "/from-file");
        assert_eq!(config.default_timeout_secs, 5);
    }

    #[test]
    fn test_plugin_map_rejects_malformed_values() {
        let no_default = || -> Result<RedirectConfig> { panic!("fallback not expected") };

        let err = RedirectConfig::from_plugin_map_or([("prefix.0", "/only-one")], no_default)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err =
            RedirectConfig::from_plugin_map_or([("prefix.x", "/a /b")], no_default).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = RedirectConfig::from_plugin_map_or(
            [("prefix.0", "/a /b"), ("mode", "sideways")],
            no_default,
        )
        .unwrap_err();
        assert!(err.message().contains("sideways"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = PpfxConfig::default();
        config.redirect.rules.push(RuleConfig {
            remote: "/data".into(),
            local: "/mnt/cache".into(),
        });
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = PpfxConfig::from_toml_str(&toml_str).unwrap();

        assert_eq!(parsed.redirect.rules, config.redirect.rules);
        assert_eq!(parsed.storage.endpoint, config.storage.endpoint);
    }
}
