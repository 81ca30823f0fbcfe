//! ppfx-core: shared types, configuration schema, and the error taxonomy
//! used by both the local and the remote side of the redirector.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{
    Access, ChunkInfo, DirEntry, DirListFlags, DirListing, MkDirFlags, OpenFlags, ReadChunk,
    StatFlags, StatInfo, VectorReadInfo, ChunkTarget, vector_targets,
};
