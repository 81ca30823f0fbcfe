//! Remote health, checked against the prefixes the redirector mirrors.

use anyhow::{Context, Result};
use opendal::Operator;
use ppfx_core::config::RuleConfig;

use crate::namespace::dir_key;

/// Remote side of one prefix rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixHealth {
    pub remote: String,
    pub local: String,
    /// True when the remote store holds anything under the prefix.
    pub present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub prefixes: Vec<PrefixHealth>,
}

impl HealthReport {
    /// Remote prefixes with nothing behind them: every request under one
    /// that misses its local mirror will fail remotely too.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.prefixes
            .iter()
            .filter(|p| !p.present)
            .map(|p| p.remote.as_str())
    }
}

/// List the store root, then look under each rule's remote prefix.
pub async fn check_health(op: &Operator, rules: &[RuleConfig]) -> Result<HealthReport> {
    op.list("/")
        .await
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))?;

    let mut report = HealthReport::default();
    for rule in rules {
        let dir = dir_key(&rule.remote)
            .with_context(|| format!("bad remote prefix {:?}", rule.remote))?;
        let present = if dir == "/" {
            true
        } else {
            let entries = op
                .list(&dir)
                .await
                .with_context(|| format!("listing remote prefix {dir}"))?;
            entries.iter().any(|e| e.path() != dir)
        };
        tracing::debug!(remote = %rule.remote, present, "checked remote prefix");
        report.prefixes.push(PrefixHealth {
            remote: rule.remote.clone(),
            local: rule.local.clone(),
            present,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(remote: &str) -> RuleConfig {
        RuleConfig {
            remote: remote.into(),
            local: "/mnt/cache".into(),
        }
    }

    #[tokio::test]
    async fn reports_which_prefixes_exist_remotely() {
        let op = crate::memory_operator().unwrap();
        op.write("data/run1/f.root", b"x".to_vec()).await.unwrap();

        let report = check_health(&op, &[rule("/data/"), rule("/scratch"), rule("/")])
            .await
            .unwrap();
        let present: Vec<_> = report.prefixes.iter().map(|p| p.present).collect();
        assert_eq!(present, [true, false, true]);
        assert_eq!(report.missing().collect::<Vec<_>>(), ["/scratch"]);
    }

    #[test]
    fn health_check_from_sync_code() {
        let op = crate::memory_operator().unwrap();
        tokio_test::block_on(async {
            op.write("marker", b"x".to_vec()).await.unwrap();
            let report = check_health(&op, &[]).await.unwrap();
            assert!(report.prefixes.is_empty());
        });
    }

    #[tokio::test]
    async fn malformed_prefix_is_an_error() {
        let op = crate::memory_operator().unwrap();
        assert!(check_health(&op, &[rule("")]).await.is_err());
    }
}
