//! Patch and resource synchronization for game-client installations.
//!
//! [`PatchEngine`] fetches versioned patch manifests from a server's patch
//! directory, resolves their dependencies, stages the files they list, applies
//! their boot-configuration and protocol updates, and on request transfers the
//! staged files into the client directory. Originals of replaced files are
//! captured once in the [`ResourceCache`], so a client can always be restored.

pub mod boot;
pub mod cache;
pub mod engine;
pub mod error;
pub mod ldf;
pub mod manifest;
pub mod rejection;
pub mod resolver;
pub mod server;
pub mod store;
pub mod transfer;
pub mod transport;
pub mod util;
pub mod version;

pub use boot::BootConfig;
pub use cache::{ReplacedResource, ResourceCache};
pub use engine::{PatchEngine, RestoreSummary, UpdateSummary};
pub use error::{Error, ErrorList, Result};
pub use manifest::{Manifest, Patch};
pub use rejection::RejectionList;
pub use resolver::Resolver;
pub use server::Server;
pub use store::{MemoryStore, SqliteStore, Store};
pub use transfer::TransferSummary;
pub use transport::{DirTransport, HttpTransport, Transport};
