//! ppfx-redirect: transparent prefix redirection in front of a remote client
//!
//! A URL under a configured remote prefix is translated to a local path;
//! if the local mirror is usable the handle is served from local storage,
//! otherwise every call is forwarded to the remote client. The route is
//! chosen once per handle, at open time.

pub mod factory;
pub mod file;
pub mod filesystem;
pub mod local;
pub mod pending;
pub mod prefix;
pub mod probe;
pub mod route;

pub use factory::{Dispatcher, DispatcherBuilder};
pub use file::{File, FileState};
pub use filesystem::FileSystem;
pub use pending::{Pending, ResponseHandler};
pub use prefix::{translate, PrefixRule, PrefixTable, TranslationResult};
pub use probe::{probe, AccessIntent, ProbeResult};
pub use route::{decide, decide_with, LocalRoute, RouteDecision, RoutePolicy};
