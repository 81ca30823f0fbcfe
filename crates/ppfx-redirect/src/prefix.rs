//! Prefix rules and URL → local path translation.
//!
//! Rules are compared on normalized paths, at separator boundaries only:
//! a rule for `/foo` matches `/foo` and `/foo/bar`, never `/foo2`. The
//! longest matching remote prefix wins; equal lengths fall back to the
//! first rule inserted.

use std::path::{Path, PathBuf};

use ppfx_core::config::{RedirectConfig, RuleConfig};
use ppfx_core::path::{collapse, is_segment_prefix, normalize_url_path};
use ppfx_core::{Error, Result};

/// One remote-prefix → local-prefix rewrite, normalized at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRule {
    remote: String,
    local: String,
}

impl PrefixRule {
    pub fn new(remote: &str, local: &str) -> Result<Self> {
        if remote.trim().is_empty() {
            return Err(Error::invalid_argument("prefix rule with an empty remote prefix"));
        }
        let local = local.trim();
        if local.is_empty() {
            return Err(Error::invalid_argument(format!(
                "prefix rule for {remote:?} has an empty local prefix"
            )));
        }
        if !local.starts_with('/') {
            return Err(Error::invalid_argument(format!(
                "local prefix {local:?} must be an absolute path"
            )));
        }
        Ok(PrefixRule {
            remote: normalize_url_path(remote)?,
            local: collapse(local)?,
        })
    }

    /// Normalized remote prefix (no trailing separator unless it is `/`).
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn local(&self) -> &Path {
        Path::new(&self.local)
    }

    /// Rebuild the local path for a normalized remote path under this rule.
    fn rewrite(&self, path: &str) -> String {
        let rest = if self.remote == "/" {
            path.trim_start_matches('/')
        } else {
            path[self.remote.len()..].trim_start_matches('/')
        };
        match (rest.is_empty(), self.local == "/") {
            (true, _) => self.local.clone(),
            (false, true) => format!("/{rest}"),
            (false, false) => format!("{}/{rest}", self.local),
        }
    }
}

/// Ordered rule set, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    rules: Vec<PrefixRule>,
}

impl PrefixTable {
    pub fn new(rules: Vec<PrefixRule>) -> Self {
        PrefixTable { rules }
    }

    /// Build from the `[redirect]` rules of a config, validating each one.
    pub fn from_config(config: &RedirectConfig) -> Result<Self> {
        Self::from_rules(&config.rules)
    }

    pub fn from_rules(rules: &[RuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|r| PrefixRule::new(&r.remote, &r.local))
            .collect::<Result<Vec<_>>>()?;
        Ok(PrefixTable { rules })
    }

    pub fn rules(&self) -> &[PrefixRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of translating one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    /// The URL as the caller gave it; a remote route reuses it verbatim.
    pub url: String,
    /// Normalized path component of `url`.
    pub remote_path: String,
    /// Local candidate; `Some` only when a rule matched.
    pub local_path: Option<PathBuf>,
    /// Index of the matching rule in the table.
    pub rule: Option<usize>,
}

impl TranslationResult {
    pub fn matched(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Find the most specific rule for `url` and rewrite its path.
///
/// No match is not an error; a malformed URL is.
pub fn translate(table: &PrefixTable, url: &str) -> Result<TranslationResult> {
    let remote_path = normalize_url_path(url)?;

    let mut best: Option<(usize, &PrefixRule)> = None;
    for (index, rule) in table.rules.iter().enumerate() {
        if !is_segment_prefix(&rule.remote, &remote_path) {
            continue;
        }
        match best {
            Some((_, current)) if current.remote.len() >= rule.remote.len() => {}
            _ => best = Some((index, rule)),
        }
    }

    Ok(TranslationResult {
        url: url.to_string(),
        local_path: best.map(|(_, rule)| PathBuf::from(rule.rewrite(&remote_path))),
        rule: best.map(|(index, _)| index),
        remote_path,
    })
}
