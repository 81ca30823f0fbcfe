//! File sessions over an object store.
//!
//! Objects have no positioned writes, so a session opened for writing
//! stages the whole object in memory and uploads it on `sync`/`close`.
//! Read-only sessions issue ranged reads clamped to the size observed at
//! open time, which gives the same short-read-at-EOF behavior as a local
//! `pread`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use opendal::{Metadata, Operator};
use ppfx_core::{
    vector_targets, Access, ChunkInfo, Error, OpenFlags, ReadChunk, Result, StatFlags, StatInfo,
    VectorReadInfo,
};
use tracing::debug;

use crate::client::{is_not_found, remote_error, RemoteFile};

pub struct OpendalFile {
    op: Operator,
    session: Option<Session>,
    properties: BTreeMap<String, String>,
}

struct Session {
    url: String,
    key: String,
    size: u64,
    mod_time: u64,
    /// Whole-object staging buffer; present when opened for writing.
    staged: Option<BytesMut>,
    dirty: bool,
}

impl OpendalFile {
    pub fn new(op: Operator) -> Self {
        OpendalFile {
            op,
            session: None,
            properties: BTreeMap::new(),
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("remote file is not open"))
    }

    async fn flush(op: &Operator, session: &mut Session) -> Result<()> {
        if !session.dirty {
            return Ok(());
        }
        let data = session
            .staged
            .as_ref()
            .map(|b| b.to_vec())
            .unwrap_or_default();
        op.write(&session.key, data)
            .await
            .map_err(|e| remote_error(e, format!("uploading {}", session.key)))?;
        session.dirty = false;
        session.mod_time = now_secs();
        debug!(key = %session.key, size = session.size, "flushed staged object");
        Ok(())
    }

    async fn read_range(&self, session: &Session, offset: u64, size: u32) -> Result<Bytes> {
        if let Some(staged) = &session.staged {
            let start = (offset as usize).min(staged.len());
            let end = (start + size as usize).min(staged.len());
            return Ok(Bytes::copy_from_slice(&staged[start..end]));
        }
        if offset >= session.size || size == 0 {
            return Ok(Bytes::new());
        }
        let end = (offset + size as u64).min(session.size);
        let buf = self
            .op
            .read_with(&session.key)
            .range(offset..end)
            .await
            .map_err(|e| remote_error(e, format!("reading {}", session.key)))?;
        Ok(buf.to_bytes())
    }
}

#[async_trait]
impl RemoteFile for OpendalFile {
    async fn open(&mut self, url: &str, flags: OpenFlags, _mode: Access) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("remote file is already open"));
        }
        let key = ppfx_core::path::object_key(url)?;

        let existing = match self.op.stat(&key).await {
            Ok(meta) => Some(meta),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(remote_error(e, format!("stat {key}"))),
        };

        let (size, mod_time, staged, dirty) = match existing {
            Some(meta) if meta.is_dir() => {
                return Err(Error::remote(format!("{key}: is a directory")));
            }
            Some(_) if flags.contains(OpenFlags::NEW) => {
                return Err(Error::remote(format!("{key}: file exists")));
            }
            Some(_) if flags.contains(OpenFlags::DELETE) => {
                (0, now_secs(), Some(BytesMut::new()), true)
            }
            Some(meta) if flags.is_write() => {
                let content = self
                    .op
                    .read(&key)
                    .await
                    .map_err(|e| remote_error(e, format!("reading {key}")))?;
                let staged = BytesMut::from(&content.to_bytes()[..]);
                (staged.len() as u64, mod_secs(&meta), Some(staged), false)
            }
            Some(meta) => (meta.content_length(), mod_secs(&meta), None, false),
            None if flags.is_creation() => (0, now_secs(), Some(BytesMut::new()), true),
            None => return Err(Error::remote(format!("{key}: no such file"))),
        };

        debug!(key = %key, size, writable = staged.is_some(), "remote file opened");
        self.session = Some(Session {
            url: url.to_string(),
            key,
            size,
            mod_time,
            staged,
            dirty,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        Self::flush(&self.op, &mut session).await
    }

    async fn stat(&mut self, _force: bool) -> Result<StatInfo> {
        let session = self.session()?;
        let mut flags = StatFlags::IS_READABLE;
        if session.staged.is_some() {
            flags |= StatFlags::IS_WRITABLE;
        }
        Ok(StatInfo {
            id: session.key.clone(),
            size: session.size,
            flags,
            mod_time: session.mod_time,
        })
    }

    async fn read(&mut self, offset: u64, size: u32) -> Result<ChunkInfo> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::invalid_state("remote file is not open"))?;
        let data = self.read_range(session, offset, size).await?;
        Ok(ChunkInfo {
            offset,
            length: data.len() as u32,
            data,
        })
    }

    async fn write(&mut self, offset: u64, data: Bytes) -> Result<()> {
        let Session {
            key,
            size,
            staged,
            dirty,
            ..
        } = self.session()?;
        let staged = staged
            .as_mut()
            .ok_or_else(|| Error::remote(format!("{key}: not opened for writing")))?;
        let start = offset as usize;
        let end = start + data.len();
        if staged.len() < end {
            staged.resize(end, 0);
        }
        staged[start..end].copy_from_slice(&data);
        *size = staged.len() as u64;
        *dirty = true;
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("remote file is not open"))?;
        Self::flush(&self.op, session).await
    }

    async fn truncate(&mut self, new_size: u64) -> Result<()> {
        let Session {
            key,
            size,
            staged,
            dirty,
            ..
        } = self.session()?;
        let staged = staged
            .as_mut()
            .ok_or_else(|| Error::remote(format!("{key}: not opened for writing")))?;
        staged.resize(new_size as usize, 0);
        *size = new_size;
        *dirty = true;
        Ok(())
    }

    async fn vector_read(
        &mut self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
    ) -> Result<VectorReadInfo> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::invalid_state("remote file is not open"))?;
        let mut results = Vec::with_capacity(chunks.len());
        for (index, mut target) in vector_targets(chunks, buffer)?.into_iter().enumerate() {
            let data = self
                .read_range(session, target.offset, target.buffer.len() as u32)
                .await
                .map_err(|e| {
                    Error::new(e.kind(), format!("vector read chunk {index}: {}", e.message()))
                })?;
            target.buffer[..data.len()].copy_from_slice(&data);
            results.push(target.finish(data.len()));
        }
        Ok(VectorReadInfo::from_chunks(results))
    }

    async fn fcntl(&mut self, _arg: Bytes) -> Result<Bytes> {
        let session = self.session()?;
        Err(Error::remote(format!("{}: fcntl is not supported by the object store", session.key)))
    }

    async fn visa(&mut self) -> Result<Bytes> {
        let session = self.session()?;
        Err(Error::remote(format!("{}: visa is not supported by the object store", session.key)))
    }

    fn set_property(&mut self, name: &str, value: &str) -> bool {
        match name {
            "ReadRecovery" | "WriteRecovery" | "FollowRedirects" => {
                self.properties.insert(name.to_string(), value.to_string());
                true
            }
            _ => false,
        }
    }

    fn get_property(&self, name: &str) -> Option<String> {
        match name {
            "DataServer" => Some(self.op.info().name().to_string()),
            "LastURL" => self.session.as_ref().map(|s| s.url.clone()),
            _ => self.properties.get(name).cloned(),
        }
    }
}

pub(crate) fn stat_from_metadata(key: &str, meta: &Metadata) -> StatInfo {
    let mut flags = StatFlags::IS_READABLE | StatFlags::IS_WRITABLE;
    if meta.is_dir() {
        flags |= StatFlags::IS_DIR;
    }
    StatInfo {
        id: key.to_string(),
        size: meta.content_length(),
        flags,
        mod_time: mod_secs(meta),
    }
}

fn mod_secs(meta: &Metadata) -> u64 {
    meta.last_modified()
        .map(SystemTime::from)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
