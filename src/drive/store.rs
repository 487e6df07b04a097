//! Remote object store capability
//!
//! The filesystem layer only sees the store through [`RemoteStore`]: a small,
//! blocking, id-keyed request/response surface. [`DriveStore`] provides it on
//! top of the async [`DriveClient`].

use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::client::DriveClient;
use super::errors::DriveError;
use super::types::{ChildPage, ObjectId, ObjectPatch, ObjectSpec, Permission, RemoteObject, SearchQuery};

/// Blocking, id-keyed access to the remote object graph.
///
/// Implementations own their timeout and retry policy; callers never retry.
pub trait RemoteStore: Send + Sync {
    /// Create an empty object inside `parent`.
    fn create_object(&self, parent: &ObjectId, spec: &ObjectSpec)
        -> Result<RemoteObject, DriveError>;

    fn get_metadata(&self, id: &ObjectId) -> Result<RemoteObject, DriveError>;

    /// List one page of the non-trashed children of `parent`, optionally
    /// restricted to children called `name`. Order is stable across calls.
    fn list_children(
        &self,
        parent: &ObjectId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError>;

    /// One page of the non-trashed objects anywhere in the corpus that
    /// match `query`, in the same stable order as listings.
    fn search(&self, query: &SearchQuery, page_token: Option<&str>)
        -> Result<ChildPage, DriveError>;

    /// Grant a permission; the object reports itself shared afterwards.
    fn create_permission(&self, id: &ObjectId, permission: &Permission) -> Result<(), DriveError>;

    /// Add and remove parent links in a single call.
    fn update_parents(
        &self,
        id: &ObjectId,
        add: &[ObjectId],
        remove: &[ObjectId],
    ) -> Result<RemoteObject, DriveError>;

    fn update_metadata(&self, id: &ObjectId, patch: &ObjectPatch)
        -> Result<RemoteObject, DriveError>;

    /// Replace the object's content.
    fn upload_content(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        resumable: bool,
    ) -> Result<RemoteObject, DriveError>;

    /// Download content; `range` is an inclusive `(start, end)` byte range.
    fn download_content(
        &self,
        id: &ObjectId,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, DriveError>;

    /// Convert a native document to `mime_type` and download the result.
    fn export_content(&self, id: &ObjectId, mime_type: &str) -> Result<Vec<u8>, DriveError>;

    /// Server-side copy producing a new object under `parent`.
    fn copy_object(
        &self,
        id: &ObjectId,
        parent: &ObjectId,
        name: &str,
    ) -> Result<RemoteObject, DriveError>;

    /// Permanently delete the object.
    fn delete(&self, id: &ObjectId) -> Result<(), DriveError>;
}

/// Blocking [`RemoteStore`] backed by the Drive v3 API.
///
/// Owns a small tokio runtime for the HTTP client. Calls block the current
/// thread and must not be made from inside another tokio runtime.
pub struct DriveStore {
    client: DriveClient,
    runtime: Runtime,
}

impl DriveStore {
    pub fn new(client: DriveClient) -> Result<Self, DriveError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("drivefs-io")
            .enable_all()
            .build()
            .map_err(|e| DriveError::Request(format!("failed to start runtime: {}", e)))?;

        debug!("Drive store runtime started");
        Ok(Self { client, runtime })
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

impl RemoteStore for DriveStore {
    fn create_object(
        &self,
        parent: &ObjectId,
        spec: &ObjectSpec,
    ) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.create_object(parent, spec))
    }

    fn get_metadata(&self, id: &ObjectId) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.get_metadata(id))
    }

    fn list_children(
        &self,
        parent: &ObjectId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        self.block_on(self.client.list_children(parent, name, page_token))
    }

    fn search(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        self.block_on(self.client.search(query, page_token))
    }

    fn create_permission(&self, id: &ObjectId, permission: &Permission) -> Result<(), DriveError> {
        self.block_on(self.client.create_permission(id, permission))
    }

    fn update_parents(
        &self,
        id: &ObjectId,
        add: &[ObjectId],
        remove: &[ObjectId],
    ) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.update_parents(id, add, remove))
    }

    fn update_metadata(
        &self,
        id: &ObjectId,
        patch: &ObjectPatch,
    ) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.update_metadata(id, patch))
    }

    fn upload_content(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        resumable: bool,
    ) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.upload_content(id, bytes, resumable))
    }

    fn download_content(
        &self,
        id: &ObjectId,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, DriveError> {
        self.block_on(self.client.download_content(id, range))
    }

    fn export_content(&self, id: &ObjectId, mime_type: &str) -> Result<Vec<u8>, DriveError> {
        self.block_on(self.client.export_content(id, mime_type))
    }

    fn copy_object(
        &self,
        id: &ObjectId,
        parent: &ObjectId,
        name: &str,
    ) -> Result<RemoteObject, DriveError> {
        self.block_on(self.client.copy_object(id, parent, name))
    }

    fn delete(&self, id: &ObjectId) -> Result<(), DriveError> {
        self.block_on(self.client.delete(id))
    }
}
