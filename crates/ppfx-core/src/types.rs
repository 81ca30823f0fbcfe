//! Request/response shapes shared by the handle, the local backend and
//! the remote client. Numeric flag values follow the XRootD client so
//! callers written against the remote API keep their constants.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Error, Result};

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident: $repr:ty { $($(#[$fmeta:meta])* $flag:ident = $value:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            pub const NONE: $name = $name(0);
            $($(#[$fmeta])* pub const $flag: $name = $name($value);)*

            pub const fn from_bits(bits: $repr) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            /// True if every bit of `other` is set.
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if any bit of `other` is set.
            pub const fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Open flags (`kXR_*` open options).
    OpenFlags: u16 {
        COMPRESS = 0x0001;
        /// Open a new file, truncating an existing one.
        DELETE = 0x0002;
        FORCE = 0x0004;
        /// Open a new file, failing if it exists.
        NEW = 0x0008;
        READ = 0x0010;
        UPDATE = 0x0020;
        REFRESH = 0x0080;
        /// Create missing parent directories.
        MAKE_PATH = 0x0100;
        APPEND = 0x0200;
        REPLICA = 0x0800;
        POSC = 0x1000;
        NO_WAIT = 0x2000;
        SEQ_IO = 0x4000;
        WRITE = 0x8000;
    }
}

impl OpenFlags {
    /// The object may not exist yet and should be created.
    pub const fn is_creation(self) -> bool {
        self.intersects(OpenFlags(Self::NEW.0 | Self::DELETE.0))
    }

    /// Any flag that requests modification of the object.
    pub const fn is_write(self) -> bool {
        self.intersects(OpenFlags(
            Self::UPDATE.0 | Self::WRITE.0 | Self::APPEND.0 | Self::NEW.0 | Self::DELETE.0,
        ))
    }

    pub const fn is_read_only(self) -> bool {
        !self.is_write()
    }
}

flag_set! {
    /// Creation mode; bit-for-bit identical to POSIX permission bits.
    Access: u16 {
        UR = 0x100;
        UW = 0x080;
        UX = 0x040;
        GR = 0x020;
        GW = 0x010;
        GX = 0x008;
        OR = 0x004;
        OW = 0x002;
        OX = 0x001;
    }
}

impl Access {
    /// Mode used when creating a file and the caller passed `NONE`.
    pub const DEFAULT_FILE: Access = Access(0o644);
    pub const DEFAULT_DIR: Access = Access(0o755);

    pub fn unix_mode(self, fallback: Access) -> u32 {
        if self.0 == 0 {
            fallback.0 as u32
        } else {
            self.0 as u32
        }
    }
}

flag_set! {
    StatFlags: u32 {
        X_BIT_SET = 1;
        IS_DIR = 2;
        OTHER = 4;
        OFFLINE = 8;
        IS_READABLE = 16;
        IS_WRITABLE = 32;
        POSC_PENDING = 64;
        BACKUP_EXISTS = 128;
    }
}

flag_set! {
    DirListFlags: u8 {
        /// Attach a `StatInfo` to every entry.
        STAT = 1;
    }
}

flag_set! {
    MkDirFlags: u8 {
        MAKE_PATH = 1;
    }
}

/// Object metadata in the shape the remote client reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatInfo {
    pub id: String,
    pub size: u64,
    pub flags: StatFlags,
    /// Modification time, seconds since the Unix epoch.
    pub mod_time: u64,
}

impl StatInfo {
    pub fn is_dir(&self) -> bool {
        self.flags.contains(StatFlags::IS_DIR)
    }
}

/// Result of a single read: where it started, how much came back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkInfo {
    pub offset: u64,
    pub length: u32,
    pub data: Bytes,
}

/// One element of a vector read request.
///
/// A chunk carrying its own `buffer` is filled in place; chunks without
/// one are carved out of the contiguous buffer of the request.
#[derive(Debug, Clone, Default)]
pub struct ReadChunk {
    pub offset: u64,
    pub length: u32,
    pub buffer: Option<BytesMut>,
}

impl ReadChunk {
    pub fn new(offset: u64, length: u32) -> Self {
        ReadChunk {
            offset,
            length,
            buffer: None,
        }
    }

    pub fn with_buffer(offset: u64, length: u32, buffer: BytesMut) -> Self {
        ReadChunk {
            offset,
            length,
            buffer: Some(buffer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorReadInfo {
    /// Total bytes read across all chunks.
    pub size: u32,
    pub chunks: Vec<ChunkInfo>,
}

impl VectorReadInfo {
    pub fn from_chunks(chunks: Vec<ChunkInfo>) -> Self {
        let size = chunks.iter().map(|c| c.length).sum();
        VectorReadInfo { size, chunks }
    }
}

/// A chunk paired with the exact-length buffer it will be read into.
#[derive(Debug)]
pub struct ChunkTarget {
    pub offset: u64,
    pub buffer: BytesMut,
}

impl ChunkTarget {
    /// Keep the first `read` bytes and turn the target into a result.
    pub fn finish(mut self, read: usize) -> ChunkInfo {
        self.buffer.truncate(read);
        ChunkInfo {
            offset: self.offset,
            length: read as u32,
            data: self.buffer.freeze(),
        }
    }
}

/// Resolve the destination buffer of every chunk of a vector read.
///
/// Chunks that carry their own buffer use it; the rest are split, in
/// order, from `contiguous` (allocated when the caller supplied none, and
/// grown when it is too short).
pub fn vector_targets(
    chunks: Vec<ReadChunk>,
    contiguous: Option<BytesMut>,
) -> Result<Vec<ChunkTarget>> {
    if chunks.is_empty() {
        return Err(Error::invalid_argument("vector read with no chunks"));
    }
    let mut total: u64 = 0;
    let mut shared_len: usize = 0;
    for chunk in &chunks {
        total += chunk.length as u64;
        if chunk.buffer.is_none() {
            shared_len += chunk.length as usize;
        }
    }
    if total > u32::MAX as u64 {
        return Err(Error::invalid_argument(format!(
            "vector read of {total} bytes exceeds the 4 GiB limit"
        )));
    }

    let mut shared = contiguous.unwrap_or_default();
    shared.clear();
    shared.resize(shared_len, 0);

    Ok(chunks
        .into_iter()
        .map(|chunk| {
            let len = chunk.length as usize;
            let buffer = match chunk.buffer {
                Some(mut own) => {
                    own.clear();
                    own.resize(len, 0);
                    own
                }
                None => shared.split_to(len),
            };
            ChunkTarget {
                offset: chunk.offset,
                buffer,
            }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: Option<StatInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirListing {
    pub parent: String,
    pub entries: Vec<DirEntry>,
}
