//! Remote object store: Drive API client and the store capability

pub mod client;
pub mod errors;
pub mod memory;
pub mod store;
pub mod types;

pub use client::DriveClient;
pub use errors::DriveError;
pub use memory::{MemoryStore, StoreOp};
pub use store::{DriveStore, RemoteStore};
pub use types::*;
