//! Namespace operations over an OpenDAL operator.

use async_trait::async_trait;
use opendal::Operator;
use ppfx_core::path::object_key;
use ppfx_core::{
    Access, DirEntry, DirListFlags, DirListing, Error, MkDirFlags, Result, StatInfo,
};
use tracing::debug;

use crate::client::{is_not_found, remote_error, RemoteFileSystem};
use crate::object::stat_from_metadata;

pub struct OpendalFileSystem {
    op: Operator,
}

impl OpendalFileSystem {
    pub fn new(op: Operator) -> Self {
        OpendalFileSystem { op }
    }
}

/// Directory keys carry a trailing separator in OpenDAL.
pub(crate) fn dir_key(path: &str) -> Result<String> {
    let key = object_key(path)?;
    Ok(if key.is_empty() { "/".to_string() } else { format!("{key}/") })
}

#[async_trait]
impl RemoteFileSystem for OpendalFileSystem {
    async fn stat(&self, path: &str) -> Result<StatInfo> {
        let key = object_key(path)?;
        match self.op.stat(&key).await {
            Ok(meta) => Ok(stat_from_metadata(&key, &meta)),
            Err(e) if is_not_found(&e) => {
                // Object stores only know directories by their trailing slash.
                let dir = dir_key(path)?;
                let meta = self
                    .op
                    .stat(&dir)
                    .await
                    .map_err(|e| remote_error(e, format!("stat {key}")))?;
                Ok(stat_from_metadata(&key, &meta))
            }
            Err(e) => Err(remote_error(e, format!("stat {key}"))),
        }
    }

    async fn dir_list(&self, path: &str, flags: DirListFlags) -> Result<DirListing> {
        let dir = dir_key(path)?;
        let entries = self
            .op
            .list(&dir)
            .await
            .map_err(|e| remote_error(e, format!("listing {dir}")))?;

        let mut listing = DirListing {
            parent: ppfx_core::path::normalize_url_path(path)?,
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            if entry.path() == dir {
                continue;
            }
            let name = entry.name().trim_end_matches('/').to_string();
            let stat = flags
                .contains(DirListFlags::STAT)
                .then(|| stat_from_metadata(entry.path(), entry.metadata()));
            listing.entries.push(DirEntry { name, stat });
        }
        debug!(dir = %dir, entries = listing.entries.len(), "remote dir listed");
        Ok(listing)
    }

    async fn mkdir(&self, path: &str, flags: MkDirFlags, _mode: Access) -> Result<()> {
        let dir = dir_key(path)?;
        if !flags.contains(MkDirFlags::MAKE_PATH) {
            if let Some(parent) = parent_dir_key(&dir) {
                self.op
                    .stat(&parent)
                    .await
                    .map_err(|e| remote_error(e, format!("mkdir {dir}: parent")))?;
            }
        }
        self.op
            .create_dir(&dir)
            .await
            .map_err(|e| remote_error(e, format!("mkdir {dir}")))
    }

    async fn rm(&self, path: &str) -> Result<()> {
        let key = object_key(path)?;
        // Deleting a missing object is not an error in OpenDAL; it is here.
        if let Err(e) = self.op.stat(&key).await {
            return Err(remote_error(e, format!("rm {key}")));
        }
        self.op
            .delete(&key)
            .await
            .map_err(|e| remote_error(e, format!("rm {key}")))
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let dir = dir_key(path)?;
        let children = self
            .op
            .list(&dir)
            .await
            .map_err(|e| remote_error(e, format!("rmdir {dir}")))?;
        if children.iter().any(|e| e.path() != dir) {
            return Err(Error::remote(format!("rmdir {dir}: directory not empty")));
        }
        self.op
            .delete(&dir)
            .await
            .map_err(|e| remote_error(e, format!("rmdir {dir}")))
    }

    async fn mv(&self, source: &str, dest: &str) -> Result<()> {
        let from = object_key(source)?;
        let to = object_key(dest)?;
        self.op
            .rename(&from, &to)
            .await
            .map_err(|e| remote_error(e, format!("mv {from} -> {to}")))
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let key = object_key(path)?;
        let mut data = self
            .op
            .read(&key)
            .await
            .map_err(|e| remote_error(e, format!("truncate {key}")))?
            .to_vec();
        data.resize(size as usize, 0);
        self.op
            .write(&key, data)
            .await
            .map(|_| ())
            .map_err(|e| remote_error(e, format!("truncate {key}")))
    }
}

fn parent_dir_key(dir: &str) -> Option<String> {
    let trimmed = dir.trim_end_matches('/');
    trimmed
        .rfind('/')
        .map(|idx| format!("{}/", &trimmed[..idx]))
}
