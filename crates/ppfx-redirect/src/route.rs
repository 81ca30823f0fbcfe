//! Local-vs-remote routing, decided once per open.

use std::path::{Path, PathBuf};

use ppfx_core::config::{ProbeErrorPolicy, RedirectConfig, RedirectMode};
use ppfx_core::{OpenFlags, Result};
use tracing::{debug, warn};

use crate::prefix::TranslationResult;
use crate::probe::{AccessIntent, ProbeResult};

/// Payload of a local route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRoute {
    pub path: PathBuf,
    /// False for a creation route whose target does not exist yet.
    pub exists: bool,
    pub size: u64,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Local(LocalRoute),
    /// Forward to the remote client with the original URL.
    Remote,
}

impl RouteDecision {
    pub fn is_local(&self) -> bool {
        matches!(self, RouteDecision::Local(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            RouteDecision::Local(local) => Some(&local.path),
            RouteDecision::Remote => None,
        }
    }
}

/// The configuration knobs routing depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutePolicy {
    pub mode: RedirectMode,
    pub probe_error: ProbeErrorPolicy,
}

impl From<&RedirectConfig> for RoutePolicy {
    fn from(config: &RedirectConfig) -> Self {
        RoutePolicy {
            mode: config.mode,
            probe_error: config.probe_error,
        }
    }
}

/// Route a file open.
///
/// Write-oriented flags probe for write access; everything else probes
/// for a readable regular file.
pub fn decide<P>(
    translation: &TranslationResult,
    flags: OpenFlags,
    policy: RoutePolicy,
    probe: P,
) -> Result<RouteDecision>
where
    P: FnOnce(&Path, AccessIntent) -> ProbeResult,
{
    let intent = if flags.is_write() {
        AccessIntent::Write
    } else {
        AccessIntent::ReadFile
    };
    decide_with(translation, intent, flags.is_creation(), policy, probe)
}

/// Route an operation with an explicit intent.
///
/// `creates` marks operations that bring the target into existence; they
/// stay local on a matched prefix even when the target is absent.
pub fn decide_with<P>(
    translation: &TranslationResult,
    intent: AccessIntent,
    creates: bool,
    policy: RoutePolicy,
    probe: P,
) -> Result<RouteDecision>
where
    P: FnOnce(&Path, AccessIntent) -> ProbeResult,
{
    if policy.mode == RedirectMode::Passthrough {
        return Ok(RouteDecision::Remote);
    }
    let Some(local) = translation.local_path.as_deref() else {
        debug!(url = %translation.url, "no prefix rule matched");
        return Ok(RouteDecision::Remote);
    };

    let result = probe(local, intent);

    if let Some(err) = result.error {
        if intent.is_read() && policy.probe_error == ProbeErrorPolicy::Remote {
            warn!(
                url = %translation.url,
                local = %local.display(),
                error = %err,
                "local probe failed, falling back to remote"
            );
            return Ok(RouteDecision::Remote);
        }
        return Err(err);
    }

    let route = LocalRoute {
        path: local.to_path_buf(),
        exists: result.exists,
        size: result.size,
        writable: result.writable,
    };
    let decision = if (result.usable && result.exists) || creates {
        RouteDecision::Local(route)
    } else {
        RouteDecision::Remote
    };

    debug!(
        url = %translation.url,
        local = %local.display(),
        exists = result.exists,
        usable = result.usable,
        local_route = decision.is_local(),
        "route decided"
    );
    Ok(decision)
}
