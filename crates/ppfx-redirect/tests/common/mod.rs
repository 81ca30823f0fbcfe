//! Shared fixtures: a recording remote client over OpenDAL's memory
//! backend, and a log capture for the injected dispatcher.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use opendal::Operator;
use ppfx_core::config::{RedirectConfig, RuleConfig};
use ppfx_core::{
    Access, ChunkInfo, OpenFlags, ReadChunk, Result, StatInfo, VectorReadInfo,
};
use ppfx_redirect::Dispatcher;
use ppfx_storage::{OpendalClient, RemoteClient, RemoteFile, RemoteFileSystem};

pub fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

/// What the remote side saw.
#[derive(Default)]
pub struct Calls {
    pub opened: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
}

impl Calls {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct RecordingClient {
    inner: OpendalClient,
    pub calls: Arc<Calls>,
    /// Added before every remote read.
    pub read_delay: Duration,
    /// Added before every remote open.
    pub open_delay: Duration,
}

impl RecordingClient {
    pub fn new(op: Operator) -> Self {
        RecordingClient {
            inner: OpendalClient::new(op),
            calls: Arc::new(Calls::default()),
            read_delay: Duration::ZERO,
            open_delay: Duration::ZERO,
        }
    }
}

impl RemoteClient for RecordingClient {
    fn file(&self) -> Box<dyn RemoteFile> {
        Box::new(RecordingFile {
            inner: self.inner.file(),
            calls: Arc::clone(&self.calls),
            read_delay: self.read_delay,
            open_delay: self.open_delay,
        })
    }

    fn file_system(&self, url: &str) -> Result<Arc<dyn RemoteFileSystem>> {
        self.inner.file_system(url)
    }
}

struct RecordingFile {
    inner: Box<dyn RemoteFile>,
    calls: Arc<Calls>,
    read_delay: Duration,
    open_delay: Duration,
}

#[async_trait]
impl RemoteFile for RecordingFile {
    async fn open(&mut self, url: &str, flags: OpenFlags, mode: Access) -> Result<()> {
        self.calls.opened.lock().unwrap().push(url.to_string());
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.inner.open(url, flags, mode).await
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }

    async fn stat(&mut self, force: bool) -> Result<StatInfo> {
        self.inner.stat(force).await
    }

    async fn read(&mut self, offset: u64, size: u32) -> Result<ChunkInfo> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.read(offset, size).await
    }

    async fn write(&mut self, offset: u64, data: Bytes) -> Result<()> {
        self.inner.write(offset, data).await
    }

    async fn sync(&mut self) -> Result<()> {
        self.inner.sync().await
    }

    async fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.truncate(size).await
    }

    async fn vector_read(
        &mut self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
    ) -> Result<VectorReadInfo> {
        self.inner.vector_read(chunks, buffer).await
    }

    async fn fcntl(&mut self, arg: Bytes) -> Result<Bytes> {
        self.inner.fcntl(arg).await
    }

    async fn visa(&mut self) -> Result<Bytes> {
        self.inner.visa().await
    }

    fn set_property(&mut self, name: &str, value: &str) -> bool {
        self.inner.set_property(name, value)
    }

    fn get_property(&self, name: &str) -> Option<String> {
        self.inner.get_property(name)
    }
}

/// Single rule mapping `remote` onto `local`.
pub fn config(remote: &str, local: &Path) -> RedirectConfig {
    RedirectConfig {
        rules: vec![RuleConfig {
            remote: remote.to_string(),
            local: local.to_string_lossy().into_owned(),
        }],
        ..Default::default()
    }
}

pub fn dispatcher(config: RedirectConfig, client: RecordingClient) -> (Dispatcher, Arc<Calls>) {
    let calls = Arc::clone(&client.calls);
    let d = Dispatcher::builder(config, Arc::new(client))
        .build()
        .expect("dispatcher");
    (d, calls)
}

/// Log sink for a `tracing_subscriber::fmt` subscriber.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn dispatch(&self) -> tracing::Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
