//! Dispatcher: the factory handing out file and filesystem handles.
//!
//! The prefix table is parsed once, when the dispatcher is built, and
//! shared read-only by every handle. Logging goes to the `tracing`
//! dispatcher injected at construction rather than the process default,
//! so embedders (and tests) decide where handle diagnostics end up.

use std::sync::Arc;
use std::time::Duration;

use ppfx_core::config::RedirectConfig;
use ppfx_core::path::normalize_url_path;
use ppfx_core::{Error, OpenFlags, Result};
use ppfx_storage::RemoteClient;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, Dispatch};

use crate::file::File;
use crate::filesystem::FileSystem;
use crate::prefix::{translate, PrefixTable, TranslationResult};
use crate::probe::{probe, AccessIntent};
use crate::route::{decide, decide_with, RouteDecision, RoutePolicy};

/// Everything a handle needs to route and reach its backends.
#[derive(Clone)]
pub(crate) struct Router {
    pub(crate) table: Arc<PrefixTable>,
    pub(crate) client: Arc<dyn RemoteClient>,
    pub(crate) policy: RoutePolicy,
    pub(crate) default_timeout: Duration,
}

impl Router {
    /// A zero timeout means "use the configured default".
    pub(crate) fn timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_timeout
        } else {
            requested
        }
    }

    pub(crate) fn route_open(
        &self,
        url: &str,
        flags: OpenFlags,
    ) -> Result<(TranslationResult, RouteDecision)> {
        let translation = translate(&self.table, url)?;
        let decision = decide(&translation, flags, self.policy, probe)?;
        Ok((translation, decision))
    }

    pub(crate) fn route(
        &self,
        url: &str,
        intent: AccessIntent,
        creates: bool,
    ) -> Result<(TranslationResult, RouteDecision)> {
        let translation = translate(&self.table, url)?;
        let decision = decide_with(&translation, intent, creates, self.policy, probe)?;
        Ok((translation, decision))
    }
}

/// A runtime the dispatcher started itself because none was running.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // Safe to drop from inside an async context, unlike `Runtime::drop`.
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

struct Inner {
    router: Router,
    logger: Dispatch,
    runtime: Handle,
    _owned: Option<OwnedRuntime>,
}

/// Factory for [`File`] and [`FileSystem`] handles.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

pub struct DispatcherBuilder {
    config: RedirectConfig,
    client: Arc<dyn RemoteClient>,
    logger: Option<Dispatch>,
    runtime: Option<Handle>,
}

impl DispatcherBuilder {
    /// Send handle diagnostics to `logger` instead of the default dispatcher.
    pub fn logger(mut self, logger: Dispatch) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Run handle workers on `runtime`.
    ///
    /// Without one, the ambient runtime is used, or a private
    /// multi-threaded runtime is started when there is none.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let table = PrefixTable::from_config(&self.config)?;
        let logger = self
            .logger
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));

        let (runtime, owned) = match self.runtime.or_else(|| Handle::try_current().ok()) {
            Some(handle) => (handle, None),
            None => {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .thread_name("ppfx-worker")
                    .build()
                    .map_err(|e| Error::from_io(e, "starting handle runtime"))?;
                (rt.handle().clone(), Some(OwnedRuntime(Some(rt))))
            }
        };

        tracing::dispatcher::with_default(&logger, || {
            info!(
                rules = table.len(),
                mode = ?self.config.mode,
                probe_error = ?self.config.probe_error,
                "prefix redirector ready"
            );
        });

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                router: Router {
                    table: Arc::new(table),
                    client: self.client,
                    policy: RoutePolicy::from(&self.config),
                    default_timeout: Duration::from_secs(u64::from(
                        self.config.default_timeout_secs,
                    )),
                },
                logger,
                runtime,
                _owned: owned,
            }),
        })
    }
}

impl Dispatcher {
    pub fn builder(config: RedirectConfig, client: Arc<dyn RemoteClient>) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            client,
            logger: None,
            runtime: None,
        }
    }

    /// Build from the string map a plugin loader hands over.
    ///
    /// See [`RedirectConfig::from_plugin_map`] for the accepted keys and
    /// the default-configuration path.
    pub fn from_plugin_map<I, K, V>(entries: I, client: Arc<dyn RemoteClient>) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::builder(RedirectConfig::from_plugin_map(entries)?, client).build()
    }

    /// A new, closed file handle. The route is chosen when it is opened.
    pub fn create_file(&self, url: &str) -> Result<File> {
        normalize_url_path(url)?;
        self.log(|| debug!(url, "creating file handle"));
        let inner = &self.inner;
        Ok(File::spawn(
            inner.router.clone(),
            inner.logger.clone(),
            inner.runtime.clone(),
        ))
    }

    /// A filesystem handle; each of its calls is routed on its own.
    pub fn create_file_system(&self, url: &str) -> Result<FileSystem> {
        let remote = self.inner.router.client.file_system(url)?;
        self.log(|| debug!(url, "creating filesystem handle"));
        Ok(FileSystem::new(
            url.to_string(),
            self.inner.router.clone(),
            remote,
            self.inner.logger.clone(),
            self.inner.runtime.clone(),
        ))
    }

    /// Route `url` as an open with `flags` would, without opening anything.
    pub fn resolve(&self, url: &str, flags: OpenFlags) -> Result<(TranslationResult, RouteDecision)> {
        self.log(|| self.inner.router.route_open(url, flags))
    }

    pub fn prefix_table(&self) -> &PrefixTable {
        &self.inner.router.table
    }

    fn log<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.inner.logger, f)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rules", &self.inner.router.table.rules())
            .field("policy", &self.inner.router.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppfx_core::config::RuleConfig;
    use ppfx_storage::OpendalClient;
    use tempfile::TempDir;

    #[test]
    fn handles_are_send_and_sync() {
        fn check<T: Send + Sync>() {}
        check::<Dispatcher>();
        check::<File>();
        check::<FileSystem>();
    }

    fn client() -> Arc<dyn RemoteClient> {
        Arc::new(OpendalClient::new(ppfx_storage::memory_operator().unwrap()))
    }

    #[test]
    fn invalid_rules_fail_the_build() {
        let config = RedirectConfig {
            rules: vec![RuleConfig {
                remote: "/data".into(),
                local: "relative".into(),
            }],
            ..Default::default()
        };
        assert!(Dispatcher::builder(config, client()).build().is_err());
    }

    #[test]
    fn plugin_map_builds_table() {
        let d = Dispatcher::from_plugin_map(
            [
                ("lib", "libXrdProxyPrefix.so"),
                ("prefix.2", "/b /mnt/b"),
                ("prefix.1", "/a /mnt/a"),
            ],
            client(),
        )
        .unwrap();
        let remotes: Vec<_> = d.prefix_table().rules().iter().map(|r| r.remote()).collect();
        assert_eq!(remotes, ["/a", "/b"]);
    }

    #[test]
    fn owns_a_runtime_outside_async_code() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"sync world").unwrap();
        let config = RedirectConfig {
            rules: vec![RuleConfig {
                remote: "/data".into(),
                local: dir.path().to_string_lossy().into_owned(),
            }],
            ..Default::default()
        };
        let d = Dispatcher::builder(config, client()).build().unwrap();

        let file = d.create_file("/data/f").unwrap();
        file.open("/data/f", OpenFlags::READ, ppfx_core::Access::NONE, Duration::ZERO)
            .wait()
            .unwrap();
        let chunk = file.read(5, 5, Duration::ZERO).wait().unwrap();
        assert_eq!(&chunk.data[..], b"world");
        file.close(Duration::ZERO).wait().unwrap();
    }

    #[test]
    fn resolve_reports_route_without_opening() {
        let dir = TempDir::new().unwrap();
        let config = RedirectConfig {
            rules: vec![RuleConfig {
                remote: "/data".into(),
                local: dir.path().to_string_lossy().into_owned(),
            }],
            ..Default::default()
        };
        let d = Dispatcher::builder(config, client()).build().unwrap();
        let (t, route) = d.resolve("/data/new", OpenFlags::NEW).unwrap();
        assert!(t.matched());
        assert!(route.is_local());
        assert!(!dir.path().join("new").exists());

        let (_, route) = d.resolve("/elsewhere", OpenFlags::READ).unwrap();
        assert_eq!(route, RouteDecision::Remote);
    }
}
