//! Local filesystem backend.
//!
//! Every call runs on tokio's blocking pool against a shared descriptor
//! using positioned I/O, so the handle never tracks a file cursor.

use std::fs::{DirBuilder, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ppfx_core::{
    vector_targets, Access, ChunkInfo, DirEntry, DirListFlags, DirListing, Error, ErrorKind,
    MkDirFlags, OpenFlags, ReadChunk, Result, StatFlags, StatInfo, VectorReadInfo,
};

/// Run a blocking filesystem call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::new(ErrorKind::Io, format!("local I/O task failed: {e}")).into_fatal())?
}

pub struct LocalFile {
    path: PathBuf,
    file: Arc<std::fs::File>,
}

impl LocalFile {
    pub async fn open(path: PathBuf, flags: OpenFlags, mode: Access) -> Result<Self> {
        blocking(move || {
            if flags.contains(OpenFlags::MAKE_PATH) && flags.is_creation() {
                if let Some(parent) = path.parent() {
                    DirBuilder::new()
                        .recursive(true)
                        .mode(Access::DEFAULT_DIR.bits() as u32)
                        .create(parent)
                        .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
                }
            }

            let mut options = OpenOptions::new();
            options.read(true).mode(mode.unix_mode(Access::DEFAULT_FILE));
            if flags.is_write() {
                options.write(true);
            }
            if flags.contains(OpenFlags::NEW) {
                options.create_new(true);
            } else if flags.contains(OpenFlags::DELETE) {
                options.create(true).truncate(true);
            }

            let file = options
                .open(&path)
                .map_err(|e| Error::from_io(e, format!("opening {}", path.display())))?;
            let meta = file
                .metadata()
                .map_err(|e| Error::from_io(e, format!("stat {}", path.display())))?;
            if meta.is_dir() {
                return Err(Error::invalid_argument(format!(
                    "{} is a directory",
                    path.display()
                )));
            }
            Ok(LocalFile {
                path,
                file: Arc::new(file),
            })
        })
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn stat(&self) -> Result<StatInfo> {
        let (file, path) = self.parts();
        blocking(move || {
            let meta = file
                .metadata()
                .map_err(|e| Error::from_io(e, format!("stat {}", path.display())))?;
            Ok(stat_info(&meta))
        })
        .await
    }

    pub async fn read(&self, offset: u64, size: u32) -> Result<ChunkInfo> {
        let (file, path) = self.parts();
        blocking(move || {
            let len = file
                .metadata()
                .map_err(|e| Error::from_io(e, format!("stat {}", path.display())))?
                .len();
            // Never allocate past end of file.
            let want = len.saturating_sub(offset).min(u64::from(size));
            let mut buf = BytesMut::zeroed(want as usize);
            let n = read_full_at(&file, &mut buf, offset)
                .map_err(|e| Error::from_io(e, format!("reading {}", path.display())))?;
            buf.truncate(n);
            Ok(ChunkInfo {
                offset,
                length: n as u32,
                data: buf.freeze(),
            })
        })
        .await
    }

    pub async fn write(&self, offset: u64, data: Bytes) -> Result<()> {
        let (file, path) = self.parts();
        blocking(move || {
            file.write_all_at(&data, offset)
                .map_err(|e| Error::from_io(e, format!("writing {}", path.display())))
        })
        .await
    }

    pub async fn sync(&self) -> Result<()> {
        let (file, path) = self.parts();
        blocking(move || {
            file.sync_all()
                .map_err(|e| Error::from_io(e, format!("syncing {}", path.display())))
        })
        .await
    }

    pub async fn truncate(&self, size: u64) -> Result<()> {
        let (file, path) = self.parts();
        blocking(move || {
            file.set_len(size)
                .map_err(|e| Error::from_io(e, format!("truncating {}", path.display())))
        })
        .await
    }

    /// One positioned read per chunk; the first failing chunk fails the lot.
    pub async fn vector_read(
        &self,
        chunks: Vec<ReadChunk>,
        buffer: Option<BytesMut>,
    ) -> Result<VectorReadInfo> {
        let (file, path) = self.parts();
        blocking(move || {
            let targets = vector_targets(chunks, buffer)?;
            let mut results = Vec::with_capacity(targets.len());
            for (index, mut target) in targets.into_iter().enumerate() {
                let n = read_full_at(&file, &mut target.buffer, target.offset).map_err(|e| {
                    Error::from_io(
                        e,
                        format!(
                            "vector read chunk {index} at offset {} of {}",
                            target.offset,
                            path.display()
                        ),
                    )
                })?;
                results.push(target.finish(n));
            }
            Ok(VectorReadInfo::from_chunks(results))
        })
        .await
    }

    fn parts(&self) -> (Arc<std::fs::File>, PathBuf) {
        (Arc::clone(&self.file), self.path.clone())
    }
}

/// Fill `buf` from `offset`, stopping early only at end of file.
fn read_full_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Translate local metadata into the remote client's stat shape.
pub fn stat_info(meta: &Metadata) -> StatInfo {
    let mode = meta.mode();
    let mut flags = StatFlags::NONE;
    if meta.is_dir() {
        flags |= StatFlags::IS_DIR;
    } else if !meta.is_file() {
        flags |= StatFlags::OTHER;
    }
    if mode & 0o111 != 0 {
        flags |= StatFlags::X_BIT_SET;
    }
    if mode & 0o444 != 0 {
        flags |= StatFlags::IS_READABLE;
    }
    if mode & 0o222 != 0 {
        flags |= StatFlags::IS_WRITABLE;
    }
    StatInfo {
        id: format!("{}:{}", meta.dev(), meta.ino()),
        size: meta.len(),
        flags,
        mod_time: meta.mtime().max(0) as u64,
    }
}

// Namespace operations used by the filesystem handle.

pub(crate) fn stat_path(path: &Path) -> Result<StatInfo> {
    let meta = std::fs::metadata(path)
        .map_err(|e| Error::from_io(e, format!("stat {}", path.display())))?;
    Ok(stat_info(&meta))
}

pub(crate) fn dir_list(path: &Path, parent: String, flags: DirListFlags) -> Result<DirListing> {
    let reader = std::fs::read_dir(path)
        .map_err(|e| Error::from_io(e, format!("listing {}", path.display())))?;
    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry.map_err(|e| Error::from_io(e, format!("listing {}", path.display())))?;
        let stat = if flags.contains(DirListFlags::STAT) {
            // Entries can vanish between readdir and stat; list them without one.
            entry.metadata().ok().map(|m| stat_info(&m))
        } else {
            None
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            stat,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(DirListing { parent, entries })
}

pub(crate) fn mkdir(path: &Path, flags: MkDirFlags, mode: Access) -> Result<()> {
    DirBuilder::new()
        .recursive(flags.contains(MkDirFlags::MAKE_PATH))
        .mode(mode.unix_mode(Access::DEFAULT_DIR))
        .create(path)
        .map_err(|e| Error::from_io(e, format!("mkdir {}", path.display())))
}

pub(crate) fn rm(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| Error::from_io(e, format!("rm {}", path.display())))
}

pub(crate) fn rmdir(path: &Path) -> Result<()> {
    std::fs::remove_dir(path).map_err(|e| Error::from_io(e, format!("rmdir {}", path.display())))
}

pub(crate) fn mv(source: &Path, dest: &Path) -> Result<()> {
    std::fs::rename(source, dest).map_err(|e| {
        Error::from_io(e, format!("mv {} -> {}", source.display(), dest.display()))
    })
}

pub(crate) fn truncate_path(path: &Path, size: u64) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_len(size))
        .map_err(|e| Error::from_io(e, format!("truncate {}", path.display())))
}
