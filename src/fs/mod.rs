//! Hierarchical filesystem over the Drive object graph

pub mod drivefs;
pub mod errors;
pub mod info;
pub mod mode;
pub mod path;
pub mod resolver;
pub mod stream;

pub use drivefs::DriveFs;
pub use errors::FsError;
pub use info::{DirEntry, Info, InfoPatch};
pub use mode::OpenMode;
pub use path::FsPath;
pub use resolver::PathResolver;
pub use stream::{FileStream, ReadStream, WriteStream};
