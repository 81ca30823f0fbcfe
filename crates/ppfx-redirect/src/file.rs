//! File handle: one open object, served locally or remotely.
//!
//! A [`File`] is a thin front for a worker task that owns
//! the backend. Requests travel over an unbounded mpsc queue, each with a
//! oneshot reply, so completions come back in issuance order and `close`
//! waits behind whatever is already queued.
//!
//! ```text
//!   File (caller)          mpsc          Worker (runtime task)
//!   ┌──────────────┐   ──────────▶   ┌───────────────────────────┐
//!   │ .open()      │                 │ route once at open        │
//!   │ .read()      │   ◀──────────   │ Backend::Local | Remote   │
//!   │ .close()     │     oneshot     │ per-op timeout            │
//!   └──────────────┘                 └───────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use ppfx_core::{
    Access, ChunkInfo, Error, OpenFlags, ReadChunk, Result, StatInfo, VectorReadInfo,
};
use ppfx_storage::RemoteFile;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, trace, warn, Dispatch};

use crate::factory::Router;
use crate::local::LocalFile;
use crate::pending::Pending;
use crate::route::RouteDecision;

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Closed,
    Opening,
    Open,
    Closing,
    /// A fatal error occurred; only `close` is accepted.
    Error,
}

/// Properties stored on the handle and forwarded to a remote session.
const SETTABLE_PROPERTIES: [&str; 3] = ["ReadRecovery", "WriteRecovery", "FollowRedirects"];

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Open {
        url: String,
        flags: OpenFlags,
        mode: Access,
        timeout: Duration,
        reply: Reply<()>,
    },
    Close {
        timeout: Duration,
        reply: Reply<()>,
    },
    Stat {
        force: bool,
        timeout: Duration,
        reply: Reply<StatInfo>,
    },
    Read {
        offset: u64,
        size: u32,
        timeout: Duration,
        reply: Reply<ChunkInfo>,
    },
    Write {
        offset: u64,
        data: Bytes,
        timeout: Duration,
        reply: Reply<()>,
    },
    Sync {
        timeout: Duration,
        reply: Reply<()>,
    },
    Truncate {
        size: u64,
        timeout: Duration,
        reply: Reply<()>,
    },
    VectorRead {
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
        timeout: Duration,
        reply: Reply<VectorReadInfo>,
    },
    Fcntl {
        arg: Bytes,
        timeout: Duration,
        reply: Reply<Bytes>,
    },
    Visa {
        timeout: Duration,
        reply: Reply<Bytes>,
    },
    SetProperty {
        name: String,
        value: String,
    },
}

/// State visible to the caller without a round trip to the worker.
struct Status {
    state: FileState,
    route: Option<RouteDecision>,
    properties: BTreeMap<String, String>,
    /// `DataServer` / `LastURL` as reported by the remote session.
    remote_info: BTreeMap<String, String>,
}

fn lock(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A file handle created by [`crate::Dispatcher::create_file`].
pub struct File {
    tx: mpsc::UnboundedSender<Command>,
    status: Arc<Mutex<Status>>,
    runtime: Handle,
}

impl File {
    pub(crate) fn spawn(router: Router, logger: Dispatch, runtime: Handle) -> File {
        let (tx, rx) = mpsc::unbounded_channel();
        let properties = SETTABLE_PROPERTIES
            .iter()
            .map(|name| (name.to_string(), "true".to_string()))
            .collect();
        let status = Arc::new(Mutex::new(Status {
            state: FileState::Closed,
            route: None,
            properties,
            remote_info: BTreeMap::new(),
        }));
        let worker = Worker {
            rx,
            status: Arc::clone(&status),
            router,
            backend: None,
            url: String::new(),
        };
        runtime.spawn(worker.run().with_subscriber(logger));
        File {
            tx,
            status,
            runtime,
        }
    }

    /// Route `url` and open it on the chosen backend.
    ///
    /// A zero `timeout` uses the configured default, as for every operation.
    pub fn open(&self, url: &str, flags: OpenFlags, mode: Access, timeout: Duration) -> Pending<()> {
        {
            let mut status = lock(&self.status);
            if status.state != FileState::Closed {
                return self.ready(Err(Error::invalid_state(format!(
                    "open: handle is {:?}",
                    status.state
                ))));
            }
            status.state = FileState::Opening;
        }
        let url = url.to_string();
        self.send(|reply| Command::Open {
            url,
            flags,
            mode,
            timeout,
            reply,
        })
    }

    /// Release the backend. Closing a closed or failed handle succeeds.
    pub fn close(&self, timeout: Duration) -> Pending<()> {
        {
            let mut status = lock(&self.status);
            match status.state {
                FileState::Closed => return self.ready(Ok(())),
                FileState::Open => status.state = FileState::Closing,
                _ => {}
            }
        }
        self.send(|reply| Command::Close { timeout, reply })
    }

    /// Stat the open object. `force` bypasses remote caching; it has no
    /// effect on a local route.
    pub fn stat(&self, force: bool, timeout: Duration) -> Pending<StatInfo> {
        self.submit("stat", |reply| Command::Stat {
            force,
            timeout,
            reply,
        })
    }

    pub fn read(&self, offset: u64, size: u32, timeout: Duration) -> Pending<ChunkInfo> {
        self.submit("read", |reply| Command::Read {
            offset,
            size,
            timeout,
            reply,
        })
    }

    pub fn write(&self, offset: u64, data: impl Into<Bytes>, timeout: Duration) -> Pending<()> {
        let data = data.into();
        self.submit("write", |reply| Command::Write {
            offset,
            data,
            timeout,
            reply,
        })
    }

    pub fn sync(&self, timeout: Duration) -> Pending<()> {
        self.submit("sync", |reply| Command::Sync { timeout, reply })
    }

    pub fn truncate(&self, size: u64, timeout: Duration) -> Pending<()> {
        self.submit("truncate", |reply| Command::Truncate {
            size,
            timeout,
            reply,
        })
    }

    /// Read several chunks at once.
    ///
    /// Chunks carrying a buffer are read into it; the others are carved,
    /// in order, out of `buffer` (allocated when `None`).
    pub fn vector_read(
        &self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
        timeout: Duration,
    ) -> Pending<VectorReadInfo> {
        self.submit("vector_read", |reply| Command::VectorRead {
            chunks,
            buffer,
            timeout,
            reply,
        })
    }

    /// Backend-specific query; only the remote backend answers it.
    pub fn fcntl(&self, arg: impl Into<Bytes>, timeout: Duration) -> Pending<Bytes> {
        let arg = arg.into();
        self.submit("fcntl", |reply| Command::Fcntl {
            arg,
            timeout,
            reply,
        })
    }

    /// Access token of the remote session; unsupported on a local route.
    pub fn visa(&self, timeout: Duration) -> Pending<Bytes> {
        self.submit("visa", |reply| Command::Visa { timeout, reply })
    }

    pub fn is_open(&self) -> bool {
        self.state() == FileState::Open
    }

    pub fn state(&self) -> FileState {
        lock(&self.status).state
    }

    /// The route chosen by the last open, if any.
    pub fn route(&self) -> Option<RouteDecision> {
        lock(&self.status).route.clone()
    }

    /// Store a boolean property; it reaches the remote session if one is
    /// (or will be) in use. Returns false for unknown names or values.
    pub fn set_property(&self, name: &str, value: &str) -> bool {
        if !SETTABLE_PROPERTIES.contains(&name) || value.parse::<bool>().is_err() {
            return false;
        }
        lock(&self.status)
            .properties
            .insert(name.to_string(), value.to_string());
        // Applied at open if the worker has no session yet.
        let _ = self.tx.send(Command::SetProperty {
            name: name.to_string(),
            value: value.to_string(),
        });
        true
    }

    pub fn get_property(&self, name: &str) -> Option<String> {
        let status = lock(&self.status);
        match (name, status.route.as_ref()) {
            ("DataServer", Some(RouteDecision::Local(_))) => Some("localhost".to_string()),
            ("LastURL", Some(RouteDecision::Local(local))) => {
                Some(format!("file://{}", local.path.display()))
            }
            ("DataServer" | "LastURL", Some(RouteDecision::Remote)) => {
                status.remote_info.get(name).cloned()
            }
            ("DataServer" | "LastURL", None) => None,
            _ => status.properties.get(name).cloned(),
        }
    }

    /// Queue a data operation; rejected up front unless the handle is open.
    fn submit<T, F>(&self, op: &'static str, build: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Reply<T>) -> Command,
    {
        let state = self.state();
        if state != FileState::Open {
            return self.ready(Err(Error::invalid_state(format!(
                "{op}: handle is {state:?}"
            ))));
        }
        self.send(build)
    }

    fn send<T, F>(&self, build: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Reply<T>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).is_err() {
            return self.ready(Err(Error::invalid_state("handle worker has stopped")));
        }
        Pending::waiting(rx, self.runtime.clone())
    }

    fn ready<T: Send + 'static>(&self, result: Result<T>) -> Pending<T> {
        Pending::ready(result, self.runtime.clone())
    }
}

/// The backend a handle was routed to; fixed for the handle's lifetime.
enum Backend {
    Local(LocalFile),
    Remote(Box<dyn RemoteFile>),
}

impl Backend {
    async fn stat(&mut self, force: bool) -> Result<StatInfo> {
        match self {
            Backend::Local(f) => f.stat().await,
            Backend::Remote(r) => r.stat(force).await,
        }
    }

    async fn read(&mut self, offset: u64, size: u32) -> Result<ChunkInfo> {
        match self {
            Backend::Local(f) => f.read(offset, size).await,
            Backend::Remote(r) => r.read(offset, size).await,
        }
    }

    async fn write(&mut self, offset: u64, data: Bytes) -> Result<()> {
        match self {
            Backend::Local(f) => f.write(offset, data).await,
            Backend::Remote(r) => r.write(offset, data).await,
        }
    }

    async fn sync(&mut self) -> Result<()> {
        match self {
            Backend::Local(f) => f.sync().await,
            Backend::Remote(r) => r.sync().await,
        }
    }

    async fn truncate(&mut self, size: u64) -> Result<()> {
        match self {
            Backend::Local(f) => f.truncate(size).await,
            Backend::Remote(r) => r.truncate(size).await,
        }
    }

    async fn vector_read(
        &mut self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
    ) -> Result<VectorReadInfo> {
        match self {
            Backend::Local(f) => f.vector_read(chunks, buffer).await,
            Backend::Remote(r) => r.vector_read(chunks, buffer).await,
        }
    }

    async fn fcntl(&mut self, arg: Bytes) -> Result<Bytes> {
        match self {
            Backend::Local(f) => Err(Error::unsupported(format!(
                "fcntl on local file {}",
                f.path().display()
            ))),
            Backend::Remote(r) => r.fcntl(arg).await,
        }
    }

    async fn visa(&mut self) -> Result<Bytes> {
        match self {
            Backend::Local(f) => Err(Error::unsupported(format!(
                "visa on local file {}",
                f.path().display()
            ))),
            Backend::Remote(r) => r.visa().await,
        }
    }

    /// Local descriptors are released on drop; remote sessions flush here.
    async fn close(&mut self) -> Result<()> {
        match self {
            Backend::Local(_) => Ok(()),
            Backend::Remote(r) => r.close().await,
        }
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Command>,
    status: Arc<Mutex<Status>>,
    router: Router,
    backend: Option<Backend>,
    url: String,
}

impl Worker {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd).await;
        }
        // The handle was dropped; release whatever is still open.
        if let Some(mut backend) = self.backend.take() {
            let timeout = self.router.timeout(Duration::ZERO);
            match tokio::time::timeout(timeout, backend.close()).await {
                Ok(Ok(())) => debug!(url = %self.url, "released backend of dropped handle"),
                Ok(Err(e)) => warn!(url = %self.url, error = %e, "closing dropped handle failed"),
                Err(_) => warn!(url = %self.url, "closing dropped handle timed out"),
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Open {
                url,
                flags,
                mode,
                timeout,
                reply,
            } => self.open(url, flags, mode, timeout, reply).await,
            Command::Close { timeout, reply } => self.close(timeout, reply).await,
            Command::Stat {
                force,
                timeout,
                reply,
            } => {
                self.exec("stat", timeout, reply, |b| Box::pin(b.stat(force)))
                    .await
            }
            Command::Read {
                offset,
                size,
                timeout,
                reply,
            } => {
                self.exec("read", timeout, reply, |b| Box::pin(b.read(offset, size)))
                    .await
            }
            Command::Write {
                offset,
                data,
                timeout,
                reply,
            } => {
                self.exec("write", timeout, reply, |b| Box::pin(b.write(offset, data)))
                    .await
            }
            Command::Sync { timeout, reply } => {
                self.exec("sync", timeout, reply, |b| Box::pin(b.sync())).await
            }
            Command::Truncate {
                size,
                timeout,
                reply,
            } => {
                self.exec("truncate", timeout, reply, |b| Box::pin(b.truncate(size)))
                    .await
            }
            Command::VectorRead {
                chunks,
                buffer,
                timeout,
                reply,
            } => {
                self.exec("vector_read", timeout, reply, |b| {
                    Box::pin(b.vector_read(chunks, buffer))
                })
                .await
            }
            Command::Fcntl {
                arg,
                timeout,
                reply,
            } => {
                self.exec("fcntl", timeout, reply, |b| Box::pin(b.fcntl(arg)))
                    .await
            }
            Command::Visa { timeout, reply } => {
                self.exec("visa", timeout, reply, |b| Box::pin(b.visa())).await
            }
            Command::SetProperty { name, value } => {
                if let Some(Backend::Remote(remote)) = self.backend.as_mut() {
                    remote.set_property(&name, &value);
                }
            }
        }
    }

    fn set_state(&self, state: FileState) {
        lock(&self.status).state = state;
    }

    async fn open(
        &mut self,
        url: String,
        flags: OpenFlags,
        mode: Access,
        timeout: Duration,
        reply: Reply<()>,
    ) {
        if reply.is_closed() {
            trace!(url = %url, "open abandoned before it started");
            self.set_state(FileState::Closed);
            return;
        }
        let timeout = self.router.timeout(timeout);
        let opening = Self::open_backend(&self.router, &self.status, &url, flags, mode);
        let outcome = tokio::time::timeout(timeout, opening).await;
        let result = match outcome {
            Ok(Ok(backend)) => {
                self.backend = Some(backend);
                self.url = url;
                self.set_state(FileState::Open);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "open failed");
                self.set_state(FileState::Error);
                Err(e)
            }
            Err(_) => {
                {
                    let mut status = lock(&self.status);
                    status.state = FileState::Closed;
                    status.route = None;
                    status.remote_info.clear();
                }
                Err(Error::timeout(format!("open {url} timed out after {timeout:?}")))
            }
        };
        let _ = reply.send(result);
    }

    /// Route and open. Borrows only the shareable parts of the worker so
    /// the future stays `Send`.
    async fn open_backend(
        router: &Router,
        status: &Mutex<Status>,
        url: &str,
        flags: OpenFlags,
        mode: Access,
    ) -> Result<Backend> {
        let (translation, decision) = router.route_open(url, flags)?;
        lock(status).route = Some(decision.clone());

        match decision {
            RouteDecision::Local(local) => {
                info!(
                    url = %url,
                    local = %local.path.display(),
                    exists = local.exists,
                    "serving from local mirror"
                );
                Ok(Backend::Local(LocalFile::open(local.path, flags, mode).await?))
            }
            RouteDecision::Remote => {
                debug!(url = %url, "forwarding to remote");
                let properties = lock(status).properties.clone();
                let mut remote = router.client.file();
                for (name, value) in &properties {
                    remote.set_property(name, value);
                }
                remote.open(&translation.url, flags, mode).await?;
                {
                    let mut status = lock(status);
                    for name in ["DataServer", "LastURL"] {
                        if let Some(value) = remote.get_property(name) {
                            status.remote_info.insert(name.to_string(), value);
                        }
                    }
                }
                Ok(Backend::Remote(remote))
            }
        }
    }

    async fn close(&mut self, timeout: Duration, reply: Reply<()>) {
        let failed = lock(&self.status).state == FileState::Error;
        let timeout = self.router.timeout(timeout);

        let outcome = match self.backend.as_mut() {
            None => Ok(Ok(())),
            Some(backend) => tokio::time::timeout(timeout, backend.close()).await,
        };
        let result = match outcome {
            Err(_) if !failed => {
                // Keep the session so the owner can retry the close.
                self.set_state(FileState::Open);
                let _ = reply.send(Err(Error::timeout(format!(
                    "close {} timed out after {timeout:?}",
                    self.url
                ))));
                return;
            }
            Err(_) => Ok(()),
            Ok(Err(e)) if failed => {
                debug!(url = %self.url, error = %e, "ignoring close error on failed handle");
                Ok(())
            }
            Ok(result) => result,
        };

        self.backend = None;
        {
            let mut status = lock(&self.status);
            status.state = FileState::Closed;
            status.route = None;
            status.remote_info.clear();
        }
        debug!(url = %self.url, "handle closed");
        let _ = reply.send(result);
    }

    /// Run one data operation against the open backend.
    async fn exec<T, F>(&mut self, op: &'static str, timeout: Duration, reply: Reply<T>, f: F)
    where
        F: for<'a> FnOnce(&'a mut Backend) -> BoxFuture<'a, Result<T>>,
    {
        if reply.is_closed() {
            trace!(op, url = %self.url, "skipping abandoned operation");
            return;
        }
        let timeout = self.router.timeout(timeout);
        // Operations queued ahead of a close still run; `submit` stops new ones.
        let open = matches!(
            lock(&self.status).state,
            FileState::Open | FileState::Closing
        );

        let result = match self.backend.as_mut() {
            Some(backend) if open => match tokio::time::timeout(timeout, f(backend)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "{op} on {} timed out after {timeout:?}",
                    self.url
                ))),
            },
            _ => Err(Error::invalid_state(format!("{op}: handle is not open"))),
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(op, url = %self.url, error = %e, "fatal error, handle needs close");
                self.set_state(FileState::Error);
            } else {
                debug!(op, url = %self.url, error = %e, "operation failed");
            }
        }
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::Dispatcher;
    use ppfx_core::config::{RedirectConfig, RuleConfig};
    use ppfx_core::ErrorKind;
    use ppfx_storage::OpendalClient;
    use tempfile::TempDir;

    const T: Duration = Duration::ZERO;

    fn dispatcher(local: &TempDir) -> Dispatcher {
        let config = RedirectConfig {
            rules: vec![RuleConfig {
                remote: "/data/".into(),
                local: local.path().to_string_lossy().into_owned(),
            }],
            ..Default::default()
        };
        let op = ppfx_storage::memory_operator().unwrap();
        Dispatcher::builder(config, Arc::new(OpendalClient::new(op)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn data_ops_before_open_are_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dispatcher(&dir).create_file("/data/x").unwrap();
        let err = file.read(0, 10, T).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(file.state(), FileState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"abc").unwrap();
        let file = dispatcher(&dir).create_file("/data/f").unwrap();
        file.open("/data/f", OpenFlags::READ, Access::NONE, T).await.unwrap();
        assert!(file.is_open());

        file.close(T).await.unwrap();
        file.close(T).await.unwrap();
        assert_eq!(file.state(), FileState::Closed);
        assert_eq!(
            file.read(0, 1, T).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[tokio::test]
    async fn failed_open_moves_to_error_and_close_recovers() {
        let dir = TempDir::new().unwrap();
        let file = dispatcher(&dir).create_file("/data/absent").unwrap();
        // Not local, not remote either
        let err = file
            .open("/data/absent", OpenFlags::READ, Access::NONE, T)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(file.state(), FileState::Error);

        file.close(T).await.unwrap();
        assert_eq!(file.state(), FileState::Closed);
    }

    #[tokio::test]
    async fn double_open_is_invalid_state() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"abc").unwrap();
        let file = dispatcher(&dir).create_file("/data/f").unwrap();
        file.open("/data/f", OpenFlags::READ, Access::NONE, T).await.unwrap();
        let err = file
            .open("/data/f", OpenFlags::READ, Access::NONE, T)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(file.is_open());
    }

    #[tokio::test]
    async fn local_route_properties() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"abc").unwrap();
        let file = dispatcher(&dir).create_file("/data/f").unwrap();

        assert_eq!(file.get_property("FollowRedirects").as_deref(), Some("true"));
        assert!(file.set_property("FollowRedirects", "false"));
        assert!(!file.set_property("FollowRedirects", "maybe"));
        assert!(!file.set_property("NoSuchProperty", "true"));
        assert_eq!(file.get_property("DataServer"), None);

        file.open("/data/f", OpenFlags::READ, Access::NONE, T).await.unwrap();
        assert_eq!(file.get_property("FollowRedirects").as_deref(), Some("false"));
        assert_eq!(file.get_property("DataServer").as_deref(), Some("localhost"));
        assert_eq!(
            file.get_property("LastURL"),
            Some(format!("file://{}", dir.path().join("f").display()))
        );
    }

    #[tokio::test]
    async fn fcntl_and_visa_are_unsupported_locally() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"abc").unwrap();
        let file = dispatcher(&dir).create_file("/data/f").unwrap();
        file.open("/data/f", OpenFlags::READ, Access::NONE, T).await.unwrap();

        let err = file.fcntl(Bytes::from_static(b"q"), T).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(file.visa(T).await.unwrap_err().kind(), ErrorKind::Unsupported);
        // Unsupported is not fatal
        assert!(file.is_open());
    }

    #[tokio::test]
    async fn operations_complete_in_issuance_order() {
        let dir = TempDir::new().unwrap();
        let file = dispatcher(&dir).create_file("/data/out").unwrap();
        file.open("/data/out", OpenFlags::NEW, Access::NONE, T).await.unwrap();

        // Issue everything before awaiting anything.
        let w1 = file.write(0, &b"first"[..], T);
        let w2 = file.write(0, &b"FI"[..], T);
        let r = file.read(0, 5, T);
        let close = file.close(T);

        w1.await.unwrap();
        w2.await.unwrap();
        assert_eq!(&r.await.unwrap().data[..], b"FIrst");
        close.await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("out")).unwrap(), b"FIrst");
    }

    #[tokio::test]
    async fn writes_queued_before_close_reach_the_file() {
        let dir = TempDir::new().unwrap();
        let file = dispatcher(&dir).create_file("/data/o").unwrap();
        file.open("/data/o", OpenFlags::NEW, Access::NONE, T).await.unwrap();

        let write = file.write(0, &b"abc"[..], T);
        let close = file.close(T);
        assert_eq!(file.state(), FileState::Closing);
        // Nothing new is accepted once the close is queued
        assert_eq!(
            file.sync(T).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        write.await.unwrap();
        close.await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("o")).unwrap(), b"abc");
        assert_eq!(file.state(), FileState::Closed);
    }

    #[tokio::test]
    async fn cancelled_operation_is_skipped() {
        let dir = TempDir::new().unwrap();
        let file = dispatcher(&dir).create_file("/data/out").unwrap();
        file.open("/data/out", OpenFlags::NEW, Access::NONE, T).await.unwrap();

        file.write(0, &b"dropped"[..], T).cancel();
        file.sync(T).await.unwrap();
        assert_eq!(file.stat(false, T).await.unwrap().size, 0);
    }
}
