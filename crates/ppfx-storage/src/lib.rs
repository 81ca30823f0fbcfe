//! ppfx-storage: the remote side of the redirector
//!
//! `client` defines the contract the redirector consumes (a per-URL file
//! session and a namespace view); `object` and `namespace` implement it
//! over an OpenDAL operator.

pub mod client;
pub mod health;
pub mod namespace;
pub mod object;
pub mod operator;

pub use client::{OpendalClient, RemoteClient, RemoteFile, RemoteFileSystem};
pub use health::{check_health, HealthReport, PrefixHealth};
pub use operator::{connect, memory_client, memory_operator, s3_operator, Credentials};
