//! drivefs - a hierarchical filesystem over Google Drive
//!
//! Google Drive stores a graph: objects may sit in several folders and
//! siblings may share a name. This crate resolves slash-separated paths onto
//! that graph, caches what it learns, and translates filesystem operations
//! into Drive API calls.

pub mod cache;
pub mod config;
pub mod drive;
pub mod fs;

pub use config::{Credentials, DeleteMode, DriveFsConfig, DriveUrl};
pub use drive::{DriveClient, DriveStore, MemoryStore, RemoteStore};
pub use fs::{DriveFs, FsError};
