//! Local mirror probing.
//!
//! A probe is a single metadata lookup (plus `access(2)` checks) on the
//! candidate path. "Not found" is a clean negative verdict; any other
//! failure is reported in [`ProbeResult::error`] so routing can decide
//! whether to fall back or surface it.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use ppfx_core::Error;

/// What the caller intends to do with the probed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    /// Read a regular file; directories are not usable.
    ReadFile,
    /// Stat or list; directories are fine.
    ReadAny,
    /// Modify the path, or create it in an existing writable parent.
    Write,
}

impl AccessIntent {
    pub fn is_read(self) -> bool {
        matches!(self, AccessIntent::ReadFile | AccessIntent::ReadAny)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    pub usable: bool,
    pub exists: bool,
    pub size: u64,
    pub is_directory: bool,
    pub writable: bool,
    /// Modification time, seconds since the Unix epoch.
    pub mod_time: u64,
    /// Failure other than "not found"; `usable` is false when set.
    pub error: Option<Error>,
}

impl ProbeResult {
    fn not_found() -> Self {
        ProbeResult::default()
    }

    fn failed(err: Error) -> Self {
        ProbeResult {
            error: Some(err),
            ..ProbeResult::default()
        }
    }
}

/// Probe `path` for the given intent.
pub fn probe(path: &Path, intent: AccessIntent) -> ProbeResult {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if is_absent(&e) => {
            return match intent {
                AccessIntent::Write => probe_parent(path),
                _ => ProbeResult::not_found(),
            };
        }
        Err(e) => return ProbeResult::failed(Error::from_io(e, format!("probing {}", path.display()))),
    };

    let readable = match access(path, libc::R_OK) {
        Ok(ok) => ok,
        Err(e) => return ProbeResult::failed(Error::from_io(e, format!("access {}", path.display()))),
    };
    let writable = match access(path, libc::W_OK) {
        Ok(ok) => ok,
        Err(e) => return ProbeResult::failed(Error::from_io(e, format!("access {}", path.display()))),
    };

    let is_directory = meta.is_dir();
    let usable = match intent {
        AccessIntent::ReadFile => readable && !is_directory,
        AccessIntent::ReadAny => readable,
        AccessIntent::Write => writable,
    };

    ProbeResult {
        usable,
        exists: true,
        size: meta.len(),
        is_directory,
        writable,
        mod_time: meta.mtime().max(0) as u64,
        error: None,
    }
}

/// A missing write target is usable when its parent directory is writable.
fn probe_parent(path: &Path) -> ProbeResult {
    let Some(parent) = path.parent() else {
        return ProbeResult::not_found();
    };
    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => match access(parent, libc::W_OK) {
            Ok(writable) => ProbeResult {
                usable: writable,
                writable,
                ..ProbeResult::default()
            },
            Err(e) => ProbeResult::failed(Error::from_io(e, format!("access {}", parent.display()))),
        },
        Ok(_) => ProbeResult::not_found(),
        Err(e) if is_absent(&e) => ProbeResult::not_found(),
        Err(e) => ProbeResult::failed(Error::from_io(e, format!("probing {}", parent.display()))),
    }
}

/// ENOENT, or a path component that is not a directory.
fn is_absent(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}

/// `access(2)`: Ok(false) for a plain permission refusal, Err for anything else.
fn access(path: &Path, mode: libc::c_int) -> io::Result<bool> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    if unsafe { libc::access(c_path.as_ptr(), mode) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EROFS) | Some(libc::ENOENT) => Ok(false),
        _ => Err(err),
    }
}
