//! Filesystem handle: namespace calls, each routed on its own.
//!
//! Unlike a file, nothing is pinned here; every call translates, probes
//! and picks a backend. Queries probe for read access (probe failures
//! follow the configured policy) while mutations probe for write access
//! and surface probe failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ppfx_core::{Access, DirListFlags, DirListing, Error, MkDirFlags, Result, StatInfo};
use ppfx_storage::RemoteFileSystem;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::instrument::WithSubscriber;
use tracing::{debug, Dispatch};

use crate::factory::Router;
use crate::local::{self, blocking};
use crate::pending::Pending;
use crate::probe::AccessIntent;
use crate::route::RouteDecision;

/// A filesystem session created by [`crate::Dispatcher::create_file_system`].
pub struct FileSystem {
    url: String,
    router: Router,
    remote: Arc<dyn RemoteFileSystem>,
    logger: Dispatch,
    runtime: Handle,
}

impl FileSystem {
    pub(crate) fn new(
        url: String,
        router: Router,
        remote: Arc<dyn RemoteFileSystem>,
        logger: Dispatch,
        runtime: Handle,
    ) -> Self {
        FileSystem {
            url,
            router,
            remote,
            logger,
            runtime,
        }
    }

    /// The URL the session was created for.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stat(&self, path: &str, timeout: Duration) -> Pending<StatInfo> {
        let path = path.to_string();
        self.spawn("stat", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::ReadAny, false)? {
                (_, RouteDecision::Local(local)) => {
                    blocking(move || local::stat_path(&local.path)).await
                }
                (t, RouteDecision::Remote) => remote.stat(&t.url).await,
            }
        })
    }

    pub fn dir_list(&self, path: &str, flags: DirListFlags, timeout: Duration) -> Pending<DirListing> {
        let path = path.to_string();
        self.spawn("dir_list", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::ReadAny, false)? {
                // Entries are reported under the remote name of the directory.
                (t, RouteDecision::Local(local)) => {
                    blocking(move || local::dir_list(&local.path, t.remote_path, flags)).await
                }
                (t, RouteDecision::Remote) => remote.dir_list(&t.url, flags).await,
            }
        })
    }

    pub fn mkdir(
        &self,
        path: &str,
        flags: MkDirFlags,
        mode: Access,
        timeout: Duration,
    ) -> Pending<()> {
        let path = path.to_string();
        self.spawn("mkdir", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::Write, true)? {
                (_, RouteDecision::Local(local)) => {
                    blocking(move || local::mkdir(&local.path, flags, mode)).await
                }
                (t, RouteDecision::Remote) => remote.mkdir(&t.url, flags, mode).await,
            }
        })
    }

    pub fn rm(&self, path: &str, timeout: Duration) -> Pending<()> {
        let path = path.to_string();
        self.spawn("rm", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::Write, false)? {
                (_, RouteDecision::Local(local)) => blocking(move || local::rm(&local.path)).await,
                (t, RouteDecision::Remote) => remote.rm(&t.url).await,
            }
        })
    }

    pub fn rmdir(&self, path: &str, timeout: Duration) -> Pending<()> {
        let path = path.to_string();
        self.spawn("rmdir", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::Write, false)? {
                (_, RouteDecision::Local(local)) => {
                    blocking(move || local::rmdir(&local.path)).await
                }
                (t, RouteDecision::Remote) => remote.rmdir(&t.url).await,
            }
        })
    }

    /// Rename within one backend; a move between local and remote storage
    /// is unsupported.
    pub fn mv(&self, source: &str, dest: &str, timeout: Duration) -> Pending<()> {
        let (source, dest) = (source.to_string(), dest.to_string());
        self.spawn("mv", timeout, move |router, remote| async move {
            let (from_t, from) = router.route(&source, AccessIntent::Write, false)?;
            let (to_t, to) = router.route(&dest, AccessIntent::Write, true)?;
            match (from, to) {
                (RouteDecision::Local(a), RouteDecision::Local(b)) => {
                    blocking(move || local::mv(&a.path, &b.path)).await
                }
                (RouteDecision::Remote, RouteDecision::Remote) => {
                    remote.mv(&from_t.url, &to_t.url).await
                }
                _ => Err(Error::unsupported(format!(
                    "mv {source} -> {dest} would cross between local and remote storage"
                ))),
            }
        })
    }

    pub fn truncate(&self, path: &str, size: u64, timeout: Duration) -> Pending<()> {
        let path = path.to_string();
        self.spawn("truncate", timeout, move |router, remote| async move {
            match router.route(&path, AccessIntent::Write, false)? {
                (_, RouteDecision::Local(local)) => {
                    blocking(move || local::truncate_path(&local.path, size)).await
                }
                (t, RouteDecision::Remote) => remote.truncate(&t.url, size).await,
            }
        })
    }

    /// Run one call on the runtime under the injected logger.
    ///
    /// Dropping the returned token aborts the call if it is still running.
    fn spawn<T, F, Fut>(&self, op: &'static str, timeout: Duration, call: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Router, Arc<dyn RemoteFileSystem>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (mut reply, rx) = oneshot::channel();
        let timeout = self.router.timeout(timeout);
        let call = call(self.router.clone(), Arc::clone(&self.remote));

        let task = async move {
            let outcome = tokio::select! {
                _ = reply.closed() => None,
                result = tokio::time::timeout(timeout, call) => Some(result),
            };
            match outcome {
                None => debug!(op, "filesystem call abandoned"),
                Some(Ok(result)) => {
                    let _ = reply.send(result);
                }
                Some(Err(_)) => {
                    let _ = reply.send(Err(Error::timeout(format!(
                        "{op} timed out after {timeout:?}"
                    ))));
                }
            }
        };
        self.runtime.spawn(task.with_subscriber(self.logger.clone()));
        Pending::waiting(rx, self.runtime.clone())
    }
}
