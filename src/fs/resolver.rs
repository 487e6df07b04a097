//! Path Resolver
//!
//! Maps slash-separated paths onto object ids by walking one segment at a
//! time from the configured root. Each step consults the `(parent, name)`
//! cache first and falls back to a name-filtered remote listing.
//!
//! The remote graph allows several children of one parent to share a name.
//! Resolution picks the first non-trashed match in the store's listing
//! order, so repeated lookups agree with each other and with `list`. The
//! other same-named siblings stay reachable only through listings. This is a
//! known limitation of projecting the graph onto a tree, not an error.

use std::sync::Arc;

use tracing::debug;

use super::errors::FsError;
use super::path::FsPath;
use crate::cache::MetadataCache;
use crate::drive::{ObjectId, RemoteObject, RemoteStore};

pub struct PathResolver {
    store: Arc<dyn RemoteStore>,
    cache: Arc<MetadataCache>,
    root: ObjectId,
}

impl PathResolver {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<MetadataCache>, root: ObjectId) -> Self {
        Self { store, cache, root }
    }

    /// Id every path is resolved under
    pub fn root(&self) -> &ObjectId {
        &self.root
    }

    /// Resolve a raw path string to an object id
    pub fn resolve(&self, path: &str) -> Result<ObjectId, FsError> {
        let path = FsPath::parse(path)?;
        self.resolve_path(&path)
    }

    /// Resolve a normalized path to an object id
    pub fn resolve_path(&self, path: &FsPath) -> Result<ObjectId, FsError> {
        let mut current = self.root.clone();
        for (depth, segment) in path.segments().iter().enumerate() {
            current = match self.child(&current, segment, path)? {
                Some(id) => id,
                None => {
                    debug!(path = %path, depth = depth, segment = %segment, "Path segment not found");
                    return Err(FsError::ResourceNotFound(path.to_string()));
                }
            };
        }
        Ok(current)
    }

    /// Resolve a path and return the object's metadata
    pub fn resolve_object(&self, path: &FsPath) -> Result<RemoteObject, FsError> {
        let id = self.resolve_path(path)?;
        let object = self.metadata(&id, path)?;
        if object.trashed {
            return Err(FsError::ResourceNotFound(path.to_string()));
        }
        Ok(object)
    }

    /// Like [`resolve_object`](Self::resolve_object), but a missing path is `None`
    pub fn find(&self, path: &FsPath) -> Result<Option<RemoteObject>, FsError> {
        match self.resolve_object(path) {
            Ok(object) => Ok(Some(object)),
            Err(FsError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Metadata for an id, from cache or the store
    pub fn metadata(&self, id: &ObjectId, path: &FsPath) -> Result<RemoteObject, FsError> {
        if let Some(object) = self.cache.get(id) {
            return Ok(object);
        }
        let generation = self.cache.generation();
        let object = self
            .store
            .get_metadata(id)
            .map_err(|e| FsError::from_remote(&path.to_string(), e))?;
        self.cache.put(object.clone(), generation);
        Ok(object)
    }

    /// Find the child of `parent` called `name`
    pub fn child(
        &self,
        parent: &ObjectId,
        name: &str,
        path: &FsPath,
    ) -> Result<Option<ObjectId>, FsError> {
        if let Some(id) = self.cache.get_child(parent, name) {
            return Ok(Some(id));
        }

        let generation = self.cache.generation();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .store
                .list_children(parent, Some(name), page_token.as_deref())
                .map_err(|e| FsError::from_remote(&path.to_string(), e))?;

            if let Some(found) = page
                .entries
                .into_iter()
                .find(|o| !o.trashed && o.name == name)
            {
                debug!(parent = %parent, name = name, id = %found.id, "Resolved path segment");
                let id = found.id.clone();
                self.cache.put_child(parent, name, found, generation);
                return Ok(Some(id));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(None),
            }
        }
    }
}
