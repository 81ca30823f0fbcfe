//! Contract of the remote storage client.
//!
//! The redirector forwards every operation of a remote-routed handle to a
//! [`RemoteFile`] session, and every remote-routed namespace call to a
//! [`RemoteFileSystem`]. Implementations own their connection handling
//! and retries; errors come back already normalized to `ppfx_core::Error`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use opendal::Operator;
use ppfx_core::{
    Access, ChunkInfo, DirListFlags, DirListing, Error, MkDirFlags, OpenFlags, ReadChunk, Result,
    StatInfo, VectorReadInfo,
};

use crate::namespace::OpendalFileSystem;
use crate::object::OpendalFile;

/// One remote file session; opened once, used by a single owner.
#[async_trait]
pub trait RemoteFile: Send {
    async fn open(&mut self, url: &str, flags: OpenFlags, mode: Access) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    async fn stat(&mut self, force: bool) -> Result<StatInfo>;
    async fn read(&mut self, offset: u64, size: u32) -> Result<ChunkInfo>;
    async fn write(&mut self, offset: u64, data: Bytes) -> Result<()>;
    async fn sync(&mut self) -> Result<()>;
    async fn truncate(&mut self, size: u64) -> Result<()>;
    async fn vector_read(
        &mut self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
    ) -> Result<VectorReadInfo>;
    async fn fcntl(&mut self, arg: Bytes) -> Result<Bytes>;
    async fn visa(&mut self) -> Result<Bytes>;
    fn set_property(&mut self, name: &str, value: &str) -> bool;
    fn get_property(&self, name: &str) -> Option<String>;
}

/// Namespace operations against the remote store.
#[async_trait]
pub trait RemoteFileSystem: Send + Sync {
    async fn stat(&self, path: &str) -> Result<StatInfo>;
    async fn dir_list(&self, path: &str, flags: DirListFlags) -> Result<DirListing>;
    async fn mkdir(&self, path: &str, flags: MkDirFlags, mode: Access) -> Result<()>;
    async fn rm(&self, path: &str) -> Result<()>;
    async fn rmdir(&self, path: &str) -> Result<()>;
    async fn mv(&self, source: &str, dest: &str) -> Result<()>;
    async fn truncate(&self, path: &str, size: u64) -> Result<()>;
}

/// Factory for remote sessions, handed to the dispatcher.
pub trait RemoteClient: Send + Sync {
    fn file(&self) -> Box<dyn RemoteFile>;
    fn file_system(&self, url: &str) -> Result<Arc<dyn RemoteFileSystem>>;
}

/// Remote client over a single OpenDAL operator.
#[derive(Clone)]
pub struct OpendalClient {
    op: Operator,
}

impl OpendalClient {
    pub fn new(op: Operator) -> Self {
        OpendalClient { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }
}

impl RemoteClient for OpendalClient {
    fn file(&self) -> Box<dyn RemoteFile> {
        Box::new(OpendalFile::new(self.op.clone()))
    }

    fn file_system(&self, url: &str) -> Result<Arc<dyn RemoteFileSystem>> {
        // Validate the URL up front; namespace calls carry their own paths.
        ppfx_core::path::normalize_url_path(url)?;
        Ok(Arc::new(OpendalFileSystem::new(self.op.clone())))
    }
}

/// Normalize an OpenDAL error into the shared taxonomy.
pub(crate) fn remote_error(err: opendal::Error, context: impl std::fmt::Display) -> Error {
    Error::remote(format!("{context}: {err}"))
}

pub(crate) fn is_not_found(err: &opendal::Error) -> bool {
    err.kind() == opendal::ErrorKind::NotFound
}
