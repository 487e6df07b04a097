//! Drive Filesystem
//!
//! Implements the hierarchical filesystem operations over the remote object
//! graph. Each operation resolves its paths fresh through the
//! [`PathResolver`], issues remote calls through the [`RemoteStore`], and
//! invalidates every cache entry it may have changed before returning,
//! whether the remote call succeeded or not.
//!
//! The graph allows shapes a tree cannot express. This layer keeps the tree
//! contract as follows:
//! - an object linked under several parents keeps one identity; removing it
//!   through one path only detaches that link
//! - duplicate sibling names resolve to the first match in listing order
//! - moves between parents are a single parent-set update, so the object is
//!   never orphaned; an operation needing a second remote call reports
//!   [`FsError::PartiallyApplied`] if that call fails

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::errors::FsError;
use super::info::{DirEntry, Info, InfoPatch};
use super::mode::OpenMode;
use super::path::{validate_name, FsPath};
use super::resolver::PathResolver;
use super::stream::{FileStream, ReadStream, WriteStream, WriteTarget};
use crate::cache::MetadataCache;
use crate::config::{DeleteMode, DriveFsConfig};
use crate::drive::{
    DriveError, ObjectId, ObjectPatch, ObjectSpec, Permission, RemoteObject, RemoteStore,
    SearchQuery, DEFAULT_CONTENT_TYPE, SHARING_URL,
};

/// Map remote failures on `path` into the taxonomy
fn remote(path: &FsPath) -> impl FnOnce(DriveError) -> FsError {
    let path = path.to_string();
    move |e| FsError::from_remote(&path, e)
}

/// A filesystem view of the object graph below one root folder
pub struct DriveFs {
    store: Arc<dyn RemoteStore>,
    cache: Arc<MetadataCache>,
    resolver: PathResolver,
    config: DriveFsConfig,
}

impl DriveFs {
    /// Open the filesystem anchored at `config.root_id` (or the store root).
    ///
    /// The anchor is fetched once so that its canonical id is used for every
    /// resolution; it must be an existing folder.
    pub fn new(store: Arc<dyn RemoteStore>, config: DriveFsConfig) -> Result<Self, FsError> {
        let cache = Arc::new(MetadataCache::with_capacity(config.cache_capacity));
        let anchor = config
            .root_id
            .as_deref()
            .map(ObjectId::from)
            .unwrap_or_else(ObjectId::root);
        Self::anchored(store, cache, config, &anchor)
    }

    fn anchored(
        store: Arc<dyn RemoteStore>,
        cache: Arc<MetadataCache>,
        config: DriveFsConfig,
        anchor: &ObjectId,
    ) -> Result<Self, FsError> {
        let generation = cache.generation();
        let root = store
            .get_metadata(anchor)
            .map_err(|e| FsError::from_remote(anchor.as_str(), e))?;
        if root.trashed {
            return Err(FsError::ResourceNotFound(anchor.to_string()));
        }
        if !root.is_folder() {
            return Err(FsError::DirectoryExpected(anchor.to_string()));
        }

        info!(root = %root.id, name = %root.name, "Drive filesystem ready");
        let resolver = PathResolver::new(store.clone(), cache.clone(), root.id.clone());
        cache.put(root, generation);

        Ok(Self {
            store,
            cache,
            resolver,
            config,
        })
    }

    /// Id of the folder all paths are resolved under
    pub fn root_id(&self) -> &ObjectId {
        self.resolver.root()
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn config(&self) -> &DriveFsConfig {
        &self.config
    }

    /// A filesystem rooted at the directory `path`, sharing this one's cache
    pub fn open_dir(&self, path: &str) -> Result<DriveFs, FsError> {
        let path = FsPath::parse(path)?;
        let dir = self.lookup(&path)?;
        if !dir.is_folder() {
            return Err(FsError::DirectoryExpected(path.to_string()));
        }
        Self::anchored(
            self.store.clone(),
            self.cache.clone(),
            self.config.clone(),
            &dir.id,
        )
    }

    // ---- lookups ----

    fn lookup(&self, path: &FsPath) -> Result<RemoteObject, FsError> {
        self.resolver.resolve_object(path)
    }

    /// Resolve the folder that holds `path`, returning it with the leaf name
    fn parent_dir<'p>(&self, path: &'p FsPath) -> Result<(RemoteObject, &'p str), FsError> {
        let (parent_path, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Err(FsError::invalid_resource("/", "the root has no parent")),
        };
        let parent = self.lookup(&parent_path)?;
        if !parent.is_folder() {
            return Err(FsError::DirectoryExpected(parent_path.to_string()));
        }
        Ok((parent, name))
    }

    /// The active child `name` of `parent`, if there is one
    fn child_object(
        &self,
        parent: &ObjectId,
        name: &str,
        path: &FsPath,
    ) -> Result<Option<RemoteObject>, FsError> {
        let Some(id) = self.resolver.child(parent, name, path)? else {
            return Ok(None);
        };
        match self.resolver.metadata(&id, path) {
            Ok(object) if !object.trashed => Ok(Some(object)),
            Ok(_) | Err(FsError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every active child of `parent`, across all pages
    fn children(&self, parent: &ObjectId, path: &FsPath) -> Result<Vec<RemoteObject>, FsError> {
        let generation = self.cache.generation();
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = self
                .store
                .list_children(parent, None, page_token.as_deref())
                .map_err(remote(path))?;
            pages += 1;
            entries.extend(page.entries.into_iter().filter(|o| !o.trashed));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(path = %path, pages = pages, entries = entries.len(), "Listed directory");
        self.cache.put_listing(parent, &entries, generation);
        Ok(entries)
    }

    /// Resolve `path` to an object id
    pub fn resolve(&self, path: &str) -> Result<ObjectId, FsError> {
        self.resolver.resolve(path)
    }

    pub fn exists(&self, path: &str) -> Result<bool, FsError> {
        let path = FsPath::parse(path)?;
        Ok(self.resolver.find(&path)?.is_some())
    }

    pub fn is_dir(&self, path: &str) -> Result<bool, FsError> {
        let path = FsPath::parse(path)?;
        Ok(self.resolver.find(&path)?.is_some_and(|o| o.is_folder()))
    }

    pub fn is_file(&self, path: &str) -> Result<bool, FsError> {
        let path = FsPath::parse(path)?;
        Ok(self.resolver.find(&path)?.is_some_and(|o| !o.is_folder()))
    }

    // ---- listing ----

    /// List a directory. Siblings sharing a name are all returned.
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let path = FsPath::parse(path)?;
        let dir = self.lookup(&path)?;
        if !dir.is_folder() {
            return Err(FsError::DirectoryExpected(path.to_string()));
        }
        let children = self.children(&dir.id, &path)?;
        Ok(children.iter().map(DirEntry::from).collect())
    }

    pub fn list_names(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.list(path)?.into_iter().map(|e| e.name).collect())
    }

    /// List a directory with full attributes for each entry
    pub fn scan(&self, path: &str) -> Result<Vec<Info>, FsError> {
        let path = FsPath::parse(path)?;
        let dir = self.lookup(&path)?;
        if !dir.is_folder() {
            return Err(FsError::DirectoryExpected(path.to_string()));
        }
        let children = self.children(&dir.id, &path)?;
        Ok(children.iter().map(Info::from_object).collect())
    }

    // ---- attributes ----

    pub fn info(&self, path: &str) -> Result<Info, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;
        let mut info = Info::from_object(&object);
        if path.is_root() {
            info.name = String::new();
        }
        Ok(info)
    }

    /// Update the mutable attributes (name, modified time, app properties) of `path`
    pub fn set_info(&self, path: &str, patch: &InfoPatch) -> Result<Info, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;
        if patch.is_empty() {
            return Ok(Info::from_object(&object));
        }

        let mut name = None;
        if let Some(new_name) = &patch.name {
            validate_name(new_name)?;
            if path.is_root() {
                return Err(FsError::invalid_resource("/", "the root cannot be renamed"));
            }
            if *new_name != object.name {
                let (parent, _) = self.parent_dir(&path)?;
                let target = path.parent().unwrap_or_default().child(new_name);
                if let Some(other) = self.child_object(&parent.id, new_name, &target)? {
                    if other.id != object.id {
                        return Err(FsError::DestinationExists(target.to_string()));
                    }
                }
                name = Some(new_name.clone());
            }
        }

        let remote_patch = ObjectPatch {
            name,
            modified_time: patch.modified,
            trashed: None,
            app_properties: patch.app_properties.clone(),
        };
        if remote_patch.is_empty() {
            return Ok(Info::from_object(&object));
        }

        let result = self.store.update_metadata(&object.id, &remote_patch);
        self.cache.invalidate_object(&object.id, &object.parents);
        let updated = result.map_err(remote(&path))?;

        info!(path = %path, id = %object.id, "Updated attributes");
        Ok(Info::from_object(&updated))
    }

    // ---- content ----

    /// Open `path` with an `fopen`-style mode (`r`, `w`, `x`, `a`)
    pub fn open(&self, path: &str, mode: &str) -> Result<FileStream, FsError> {
        match OpenMode::from_str(mode)? {
            OpenMode::Read => self.open_read(path).map(FileStream::Reader),
            write_mode => self.open_write(path, write_mode).map(FileStream::Writer),
        }
    }

    /// Open an existing file for reading
    pub fn open_read(&self, path: &str) -> Result<ReadStream, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;
        if object.is_folder() {
            return Err(FsError::FileExpected(path.to_string()));
        }
        if object.is_native_document() {
            return Err(FsError::invalid_resource(
                &path.to_string(),
                format!("{} has no byte content; export it instead", object.mime_type),
            ));
        }
        debug!(path = %path, id = %object.id, "Opened for reading");
        Ok(ReadStream::new(
            self.store.clone(),
            &object,
            path.to_string(),
            self.config.read_chunk_size,
        ))
    }

    /// Open `path` for writing; nothing is stored until the stream closes
    pub fn open_write(&self, path: &str, mode: OpenMode) -> Result<WriteStream, FsError> {
        self.open_write_created(path, mode, None)
    }

    /// Like [`open_write`](Self::open_write), recording `created` as the
    /// creation time if the stream creates a new file
    pub fn open_write_created(
        &self,
        path: &str,
        mode: OpenMode,
        created: Option<DateTime<Utc>>,
    ) -> Result<WriteStream, FsError> {
        if !mode.is_write() {
            return Err(FsError::InvalidMode("r".to_string()));
        }
        let path = FsPath::parse(path)?;
        let (parent, name) = self.parent_dir(&path)?;
        let existing = self.child_object(&parent.id, name, &path)?;

        let target = match (mode, existing) {
            (_, Some(object)) if object.is_folder() => {
                return Err(FsError::FileExpected(path.to_string()));
            }
            (_, Some(object)) if object.is_native_document() => {
                return Err(FsError::invalid_resource(
                    &path.to_string(),
                    format!("{} cannot be overwritten with bytes", object.mime_type),
                ));
            }
            (OpenMode::CreateNew, Some(_)) => {
                return Err(FsError::DestinationExists(path.to_string()));
            }
            (OpenMode::Append, None) => {
                return Err(FsError::ResourceNotFound(path.to_string()));
            }
            (_, Some(object)) => object,
            (_, None) => {
                debug!(path = %path, "Opened new file for writing");
                return Ok(self.writer(&path, WriteTarget::Create {
                    parent: parent.id,
                    spec: ObjectSpec::new(name, DEFAULT_CONTENT_TYPE).created_at(created),
                }));
            }
        };

        let mut stream = self.writer(&path, WriteTarget::Replace {
            id: target.id.clone(),
            parents: target.parents.clone(),
        });

        if mode == OpenMode::Append {
            // Length from the store, not the cache
            let current = self.store.get_metadata(&target.id).map_err(remote(&path))?;
            if current.size.unwrap_or(0) > 0 {
                let existing = self
                    .store
                    .download_content(&target.id, None)
                    .map_err(remote(&path))?;
                stream.write_all(&existing)?;
            }
            debug!(path = %path, size = stream.len(), "Opened for appending");
        } else {
            debug!(path = %path, id = %target.id, "Opened for overwriting");
        }
        Ok(stream)
    }

    fn writer(&self, path: &FsPath, target: WriteTarget) -> WriteStream {
        WriteStream::new(
            self.store.clone(),
            self.cache.clone(),
            path.to_string(),
            target,
            self.config.spool_threshold,
            self.config.resumable_threshold,
        )
    }

    /// Read a whole file
    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.open_read(path)?.drain()
    }

    /// Create or overwrite a file with `data`
    pub fn write_bytes(&self, path: &str, data: &[u8]) -> Result<RemoteObject, FsError> {
        let mut stream = self.open_write(path, OpenMode::Write)?;
        stream.write_all(data)?;
        stream.close()
    }

    /// Download a native document converted to `mime_type`
    pub fn export(&self, path: &str, mime_type: &str) -> Result<Vec<u8>, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;
        if object.is_folder() {
            return Err(FsError::FileExpected(path.to_string()));
        }
        if !object.is_native_document() {
            return Err(FsError::invalid_resource(
                &path.to_string(),
                "only native documents can be exported",
            ));
        }
        self.store
            .export_content(&object.id, mime_type)
            .map_err(remote(&path))
    }

    // ---- directories ----

    /// Create a directory. With `recreate`, an existing directory is returned
    /// instead of failing.
    pub fn make_directory(&self, path: &str, recreate: bool) -> Result<ObjectId, FsError> {
        let path = FsPath::parse(path)?;
        self.make_dir_at(&path, recreate)
    }

    fn make_dir_at(&self, path: &FsPath, recreate: bool) -> Result<ObjectId, FsError> {
        if path.is_root() {
            return if recreate {
                Ok(self.root_id().clone())
            } else {
                Err(FsError::DirectoryExists(path.to_string()))
            };
        }

        let (parent, name) = self.parent_dir(path)?;
        if let Some(existing) = self.child_object(&parent.id, name, path)? {
            if recreate && existing.is_folder() {
                return Ok(existing.id);
            }
            return Err(FsError::DirectoryExists(path.to_string()));
        }

        let result = self.store.create_object(&parent.id, &ObjectSpec::folder(name));
        self.cache.invalidate_children(&parent.id);
        let created = result.map_err(remote(path))?;

        info!(path = %path, id = %created.id, "Created directory");
        Ok(created.id)
    }

    /// Create a directory and any missing ancestors
    pub fn make_directories(&self, path: &str, recreate: bool) -> Result<ObjectId, FsError> {
        let path = FsPath::parse(path)?;
        if path.is_root() {
            return self.make_dir_at(&path, recreate);
        }

        let mut current = FsPath::root();
        let mut id = self.root_id().clone();
        let last = path.segments().len() - 1;
        for (depth, segment) in path.segments().iter().enumerate() {
            current = current.join(segment)?;
            match self.resolver.find(&current)? {
                Some(object) if !object.is_folder() => {
                    return Err(FsError::DirectoryExpected(current.to_string()));
                }
                Some(_) if depth == last && !recreate => {
                    return Err(FsError::DirectoryExists(current.to_string()));
                }
                Some(object) => id = object.id,
                None => id = self.make_dir_at(&current, false)?,
            }
        }
        Ok(id)
    }

    // ---- removal ----

    /// Detach `object` from `parent`, or drop it if that is its only parent
    fn unlink(&self, object: &RemoteObject, parent: &ObjectId, path: &FsPath) -> Result<(), FsError> {
        // The parent set decides between detach and delete; never trust the cache for it
        let current = self.store.get_metadata(&object.id);
        self.cache.invalidate(&object.id);
        let object = &current.map_err(remote(path))?;

        let detach = object.parents.len() > 1;
        let result = if detach {
            self.store
                .update_parents(&object.id, &[], std::slice::from_ref(parent))
                .map(|_| ())
        } else {
            match self.config.delete_mode {
                DeleteMode::Trash => self
                    .store
                    .update_metadata(&object.id, &ObjectPatch::trash())
                    .map(|_| ()),
                DeleteMode::Permanent => self.store.delete(&object.id),
            }
        };
        self.cache
            .invalidate_object(&object.id, object.parents.iter().chain([parent]));
        result.map_err(remote(path))?;

        if detach {
            info!(path = %path, id = %object.id, "Detached object from parent");
        } else {
            info!(path = %path, id = %object.id, mode = ?self.config.delete_mode, "Removed object");
        }
        Ok(())
    }

    /// Remove everything below `dir`, depth first
    fn remove_contents(&self, dir: &RemoteObject, path: &FsPath) -> Result<(), FsError> {
        for child in self.children(&dir.id, path)? {
            let child_path = path.child(&child.name);
            // A folder shared with other parents stays intact there
            if child.is_folder() && child.parents.len() <= 1 {
                self.remove_contents(&child, &child_path)?;
            }
            self.unlink(&child, &dir.id, &child_path)?;
        }
        Ok(())
    }

    /// Remove a file
    pub fn remove(&self, path: &str) -> Result<(), FsError> {
        let path = FsPath::parse(path)?;
        if path.is_root() {
            return Err(FsError::invalid_resource("/", "the root cannot be removed"));
        }
        let (parent, name) = self.parent_dir(&path)?;
        let object = self
            .child_object(&parent.id, name, &path)?
            .ok_or_else(|| FsError::ResourceNotFound(path.to_string()))?;
        if object.is_folder() {
            return Err(FsError::FileExpected(path.to_string()));
        }
        self.unlink(&object, &parent.id, &path)
    }

    /// Remove a directory; its contents too when `recursive`
    pub fn remove_directory(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let path = FsPath::parse(path)?;
        if path.is_root() {
            return Err(FsError::invalid_resource("/", "the root cannot be removed"));
        }
        let (parent, name) = self.parent_dir(&path)?;
        let dir = self
            .child_object(&parent.id, name, &path)?
            .ok_or_else(|| FsError::ResourceNotFound(path.to_string()))?;
        if !dir.is_folder() {
            return Err(FsError::DirectoryExpected(path.to_string()));
        }

        if recursive {
            self.remove_contents(&dir, &path)?;
        } else if !self.children(&dir.id, &path)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty(path.to_string()));
        }
        self.unlink(&dir, &parent.id, &path)
    }

    /// Remove a directory and everything below it. On the root, only the
    /// contents are removed.
    pub fn remove_tree(&self, path: &str) -> Result<(), FsError> {
        let parsed = FsPath::parse(path)?;
        if parsed.is_root() {
            let root = self.lookup(&parsed)?;
            return self.remove_contents(&root, &parsed);
        }
        self.remove_directory(path, true)
    }

    // ---- move and copy ----

    /// Move or rename `src` to `dst`, keeping the object id
    pub fn move_path(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), FsError> {
        let src = FsPath::parse(src)?;
        let dst = FsPath::parse(dst)?;
        if src.is_root() {
            return Err(FsError::invalid_resource("/", "the root cannot be moved"));
        }
        if dst.is_root() {
            return Err(FsError::invalid_resource("/", "the root cannot be replaced"));
        }

        let (src_parent, src_name) = self.parent_dir(&src)?;
        let object = self
            .child_object(&src_parent.id, src_name, &src)?
            .ok_or_else(|| FsError::ResourceNotFound(src.to_string()))?;
        if src == dst {
            return Ok(());
        }
        if object.is_folder() && dst.starts_with(&src) {
            return Err(FsError::invalid_resource(
                &src.to_string(),
                "a directory cannot be moved into itself",
            ));
        }

        let (dst_parent, dst_name) = self.parent_dir(&dst)?;

        let mut replaced = false;
        if let Some(existing) = self.child_object(&dst_parent.id, dst_name, &dst)? {
            // Already linked there under a second parent: only src's link goes
            if existing.id != object.id {
                if !overwrite || existing.is_folder() {
                    return Err(FsError::DestinationExists(dst.to_string()));
                }
                self.unlink(&existing, &dst_parent.id, &dst)?;
                replaced = true;
            }
        }

        let result = self.relink(&object, &src_parent.id, &dst_parent.id, dst_name, &dst, replaced);
        self.cache.invalidate_object(
            &object.id,
            object.parents.iter().chain([&src_parent.id, &dst_parent.id]),
        );
        result?;

        info!(src = %src, dst = %dst, id = %object.id, "Moved object");
        Ok(())
    }

    /// Rename `path` within its directory
    pub fn rename(&self, path: &str, new_name: &str) -> Result<(), FsError> {
        validate_name(new_name)?;
        let parsed = FsPath::parse(path)?;
        let parent = parsed
            .parent()
            .ok_or_else(|| FsError::invalid_resource("/", "the root cannot be renamed"))?;
        let dst = parent.join(new_name)?;
        self.move_path(path, &dst.to_string(), false)
    }

    /// Issue the remote calls of a move; `earlier_change` marks that the
    /// destination was already replaced
    fn relink(
        &self,
        object: &RemoteObject,
        from: &ObjectId,
        to: &ObjectId,
        name: &str,
        dst: &FsPath,
        earlier_change: bool,
    ) -> Result<(), FsError> {
        let failed = |step: &'static str, applied: bool, source: DriveError| {
            if applied {
                FsError::PartiallyApplied {
                    path: dst.to_string(),
                    step,
                    source,
                }
            } else {
                FsError::from_remote(&dst.to_string(), source)
            }
        };

        let mut current_name = object.name.clone();
        if from != to {
            let moved = self
                .store
                .update_parents(&object.id, std::slice::from_ref(to), std::slice::from_ref(from))
                .map_err(|e| failed("reparent", earlier_change, e))?;
            current_name = moved.name;
        }
        if current_name != name {
            self.store
                .update_metadata(&object.id, &ObjectPatch::rename(name))
                .map_err(|e| failed("rename", earlier_change || from != to, e))?;
        }
        Ok(())
    }

    /// Copy the file `src` to `dst`; the copy has its own id and lifecycle
    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> Result<ObjectId, FsError> {
        let src = FsPath::parse(src)?;
        let dst = FsPath::parse(dst)?;
        let object = self.lookup(&src)?;
        if object.is_folder() {
            return Err(FsError::FileExpected(src.to_string()));
        }

        let (dst_parent, dst_name) = self.parent_dir(&dst)?;

        let mut replaced = false;
        if let Some(existing) = self.child_object(&dst_parent.id, dst_name, &dst)? {
            if !overwrite || existing.is_folder() || existing.id == object.id {
                return Err(FsError::DestinationExists(dst.to_string()));
            }
            self.unlink(&existing, &dst_parent.id, &dst)?;
            replaced = true;
        }

        let result = self.store.copy_object(&object.id, &dst_parent.id, dst_name);
        self.cache.invalidate_children(&dst_parent.id);
        let copied = result.map_err(|source| {
            if replaced {
                FsError::PartiallyApplied {
                    path: dst.to_string(),
                    step: "copy",
                    source,
                }
            } else {
                FsError::from_remote(&dst.to_string(), source)
            }
        })?;

        info!(src = %src, dst = %dst, id = %copied.id, "Copied file");
        Ok(copied.id)
    }

    // ---- shortcuts, search and sharing ----

    /// Create a shortcut at `path` pointing at the file `target`
    pub fn add_shortcut(&self, path: &str, target: &str) -> Result<ObjectId, FsError> {
        let path = FsPath::parse(path)?;
        let target_path = FsPath::parse(target)?;
        let target = self.lookup(&target_path)?;
        if target.is_folder() {
            return Err(FsError::FileExpected(target_path.to_string()));
        }

        let (parent, name) = self.parent_dir(&path)?;
        if self.child_object(&parent.id, name, &path)?.is_some() {
            return Err(FsError::DestinationExists(path.to_string()));
        }

        let spec = ObjectSpec::shortcut(name, target.id.clone());
        let result = self.store.create_object(&parent.id, &spec);
        self.cache.invalidate_children(&parent.id);
        let created = result.map_err(remote(&path))?;

        info!(path = %path, target = %target_path, id = %created.id, "Created shortcut");
        Ok(created.id)
    }

    /// Every object in the corpus matching `query`, wherever it is linked
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<Info>, FsError> {
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .store
                .search(query, page_token.as_deref())
                .map_err(|e| FsError::from_remote("/", e))?;
            results.extend(page.entries.iter().filter(|o| !o.trashed).map(Info::from_object));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(query = ?query, results = results.len(), "Searched corpus");
        Ok(results)
    }

    /// Grant `permission` on `path` and return its sharing URL
    pub fn share(&self, path: &str, permission: &Permission) -> Result<String, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;

        let result = self.store.create_permission(&object.id, permission);
        self.cache.invalidate(&object.id);
        result.map_err(remote(&path))?;

        info!(path = %path, id = %object.id, role = ?permission.role, "Shared object");
        Ok(format!("{}{}", SHARING_URL, object.id))
    }

    /// Whether `path` exists and is shared, so that it has a URL
    pub fn has_url(&self, path: &str) -> Result<bool, FsError> {
        let path = FsPath::parse(path)?;
        Ok(self.resolver.find(&path)?.is_some_and(|o| o.shared))
    }

    /// Sharing URL of `path`; fails with `NoUrl` unless it is shared
    pub fn url(&self, path: &str) -> Result<String, FsError> {
        let path = FsPath::parse(path)?;
        let object = self.lookup(&path)?;
        if !object.shared {
            return Err(FsError::NoUrl {
                path: path.to_string(),
                reason: "not shared",
            });
        }
        Ok(format!("{}{}", SHARING_URL, object.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{MemoryStore, ShareRole, StoreOp, FOLDER_MIME_TYPE};
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashSet};
    use std::io::Read;
    use std::sync::Mutex;

    use crate::drive::ChildPage;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Store that runs a hook while a full directory listing is in flight,
    /// after the page has been read but before it is returned
    struct RacingStore {
        inner: Arc<MemoryStore>,
        hook: Mutex<Option<Hook>>,
    }

    impl RacingStore {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                hook: Mutex::new(None),
            }
        }

        fn during_next_listing(&self, hook: impl FnOnce() + Send + 'static) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }
    }

    impl RemoteStore for RacingStore {
        fn create_object(&self, parent: &ObjectId, spec: &ObjectSpec) -> Result<RemoteObject, DriveError> {
            self.inner.create_object(parent, spec)
        }

        fn get_metadata(&self, id: &ObjectId) -> Result<RemoteObject, DriveError> {
            self.inner.get_metadata(id)
        }

        fn list_children(
            &self,
            parent: &ObjectId,
            name: Option<&str>,
            page_token: Option<&str>,
        ) -> Result<ChildPage, DriveError> {
            let page = self.inner.list_children(parent, name, page_token)?;
            if name.is_none() {
                let hook = self.hook.lock().unwrap().take();
                if let Some(hook) = hook {
                    hook();
                }
            }
            Ok(page)
        }

        fn search(&self, query: &SearchQuery, page_token: Option<&str>) -> Result<ChildPage, DriveError> {
            self.inner.search(query, page_token)
        }

        fn create_permission(&self, id: &ObjectId, permission: &Permission) -> Result<(), DriveError> {
            self.inner.create_permission(id, permission)
        }

        fn update_parents(
            &self,
            id: &ObjectId,
            add: &[ObjectId],
            remove: &[ObjectId],
        ) -> Result<RemoteObject, DriveError> {
            self.inner.update_parents(id, add, remove)
        }

        fn update_metadata(&self, id: &ObjectId, patch: &ObjectPatch) -> Result<RemoteObject, DriveError> {
            self.inner.update_metadata(id, patch)
        }

        fn upload_content(&self, id: &ObjectId, bytes: &[u8], resumable: bool) -> Result<RemoteObject, DriveError> {
            self.inner.upload_content(id, bytes, resumable)
        }

        fn download_content(&self, id: &ObjectId, range: Option<(u64, u64)>) -> Result<Vec<u8>, DriveError> {
            self.inner.download_content(id, range)
        }

        fn export_content(&self, id: &ObjectId, mime_type: &str) -> Result<Vec<u8>, DriveError> {
            self.inner.export_content(id, mime_type)
        }

        fn copy_object(&self, id: &ObjectId, parent: &ObjectId, name: &str) -> Result<RemoteObject, DriveError> {
            self.inner.copy_object(id, parent, name)
        }

        fn delete(&self, id: &ObjectId) -> Result<(), DriveError> {
            self.inner.delete(id)
        }
    }

    fn racing_setup() -> (Arc<MemoryStore>, Arc<RacingStore>, Arc<DriveFs>) {
        let store = Arc::new(MemoryStore::new());
        let racing = Arc::new(RacingStore::new(store.clone()));
        let fs = Arc::new(DriveFs::new(racing.clone(), DriveFsConfig::default()).unwrap());
        (store, racing, fs)
    }

    fn setup() -> (Arc<MemoryStore>, DriveFs) {
        setup_with(MemoryStore::new(), DriveFsConfig::default())
    }

    fn setup_with(store: MemoryStore, config: DriveFsConfig) -> (Arc<MemoryStore>, DriveFs) {
        let store = Arc::new(store);
        let fs = DriveFs::new(store.clone(), config).unwrap();
        (store, fs)
    }

    #[test]
    fn test_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DriveFs>();
    }

    #[test]
    fn test_make_directory_resolves_idempotently() {
        let (_, fs) = setup();
        let id = fs.make_directory("/docs", false).unwrap();
        for _ in 0..3 {
            assert_eq!(fs.resolve("/docs").unwrap(), id);
            assert_eq!(fs.resolve("/docs/").unwrap(), id);
        }
        assert!(fs.is_dir("/docs").unwrap());
    }

    #[test]
    fn test_make_directory_collisions() {
        let (_, fs) = setup();
        let id = fs.make_directory("/d", false).unwrap();
        assert!(matches!(
            fs.make_directory("/d", false),
            Err(FsError::DirectoryExists(_))
        ));
        assert_eq!(fs.make_directory("/d", true).unwrap(), id);

        fs.write_bytes("/f", b"").unwrap();
        assert!(matches!(
            fs.make_directory("/f", true),
            Err(FsError::DirectoryExists(_))
        ));
        assert!(matches!(
            fs.make_directory("/missing/d", false),
            Err(FsError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_make_directories() {
        let (_, fs) = setup();
        let id = fs.make_directories("/a/b/c", false).unwrap();
        assert_eq!(fs.resolve("/a/b/c").unwrap(), id);
        assert_eq!(fs.make_directories("/a/b/c", true).unwrap(), id);
        assert!(matches!(
            fs.make_directories("/a/b/c", false),
            Err(FsError::DirectoryExists(_))
        ));

        fs.write_bytes("/a/file", b"x").unwrap();
        assert!(matches!(
            fs.make_directories("/a/file/deeper", false),
            Err(FsError::DirectoryExpected(_))
        ));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (_, fs) = setup();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs.write_bytes("/blob.bin", &data).unwrap();
        assert_eq!(fs.read_bytes("/blob.bin").unwrap(), data);

        let mut stream = fs.open("/blob.bin", "rb").unwrap();
        let mut streamed = Vec::new();
        stream.read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed, data);
    }

    #[test]
    fn test_small_read_chunks_cover_whole_file() {
        let config = DriveFsConfig {
            read_chunk_size: 3,
            ..DriveFsConfig::default()
        };
        let (store, fs) = setup_with(MemoryStore::new(), config);
        fs.write_bytes("/f", b"0123456789").unwrap();
        assert_eq!(fs.read_bytes("/f").unwrap(), b"0123456789");
        assert_eq!(store.calls(StoreOp::Download), 4);
    }

    #[test]
    fn test_hello_scenario() {
        let (_, fs) = setup();
        fs.make_directories("/test-googledrivefs/sub", false).unwrap();
        fs.write_bytes("/test-googledrivefs/sub/a.txt", b"hello").unwrap();

        assert_eq!(fs.list_names("/test-googledrivefs/sub").unwrap(), vec!["a.txt"]);
        assert_eq!(fs.read_bytes("/test-googledrivefs/sub/a.txt").unwrap(), b"hello");

        fs.remove("/test-googledrivefs/sub/a.txt").unwrap();
        assert!(fs.list_names("/test-googledrivefs/sub").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_names_resolve_deterministically() {
        let (store, fs) = setup();
        let first = store.insert_object(&ObjectId::root(), "dup", "text/plain", b"first");
        store.insert_object(&ObjectId::root(), "dup", "text/plain", b"second");

        for _ in 0..3 {
            assert_eq!(fs.resolve("/dup").unwrap(), first);
        }
        // Listing shows both; it must not change which one the path denotes
        let entries = fs.list("/").unwrap();
        assert_eq!(entries.iter().filter(|e| e.name == "dup").count(), 2);
        assert_eq!(fs.resolve("/dup").unwrap(), first);
        assert_eq!(fs.read_bytes("/dup").unwrap(), b"first");
    }

    #[test]
    fn test_pagination_completeness() {
        let (store, fs) = setup_with(MemoryStore::with_page_size(2), DriveFsConfig::default());
        for i in 0..5 {
            store.insert_object(&ObjectId::root(), &format!("f{}", i), "text/plain", b"");
        }

        let entries = fs.list("/").unwrap();
        assert_eq!(entries.len(), 5);
        let ids: HashSet<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(store.calls(StoreOp::ListChildren), 3);
    }

    #[test]
    fn test_list_requires_directory() {
        let (_, fs) = setup();
        fs.write_bytes("/f", b"x").unwrap();
        assert!(matches!(fs.list("/f"), Err(FsError::DirectoryExpected(_))));
        assert!(matches!(fs.list("/nope"), Err(FsError::ResourceNotFound(_))));
    }

    #[test]
    fn test_scan_returns_attributes() {
        let (_, fs) = setup();
        fs.make_directory("/d", false).unwrap();
        fs.write_bytes("/f", b"abc").unwrap();

        let infos = fs.scan("/").unwrap();
        let dir = infos.iter().find(|i| i.name == "d").unwrap();
        let file = infos.iter().find(|i| i.name == "f").unwrap();
        assert!(dir.is_dir);
        assert_eq!(file.size, Some(3));
    }

    #[test]
    fn test_remove_directory_requires_empty_unless_recursive() {
        let (store, fs) = setup();
        fs.make_directories("/t/a/b", false).unwrap();
        fs.write_bytes("/t/a/f", b"1").unwrap();
        let inner = fs.write_bytes("/t/a/b/g", b"2").unwrap();

        assert!(matches!(
            fs.remove_directory("/t", false),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert!(fs.exists("/t/a/b/g").unwrap());

        fs.remove_directory("/t", true).unwrap();
        assert!(!fs.exists("/t").unwrap());
        assert!(store.object(&inner.id).unwrap().trashed);
    }

    #[test]
    fn test_remove_type_checks() {
        let (_, fs) = setup();
        fs.make_directory("/d", false).unwrap();
        fs.write_bytes("/f", b"x").unwrap();

        assert!(matches!(fs.remove("/d"), Err(FsError::FileExpected(_))));
        assert!(matches!(
            fs.remove_directory("/f", false),
            Err(FsError::DirectoryExpected(_))
        ));
        assert!(matches!(fs.remove("/missing"), Err(FsError::ResourceNotFound(_))));
        assert!(matches!(fs.remove("/"), Err(FsError::ResourceInvalid { .. })));
        assert!(matches!(
            fs.remove_directory("/", true),
            Err(FsError::ResourceInvalid { .. })
        ));
    }

    #[test]
    fn test_remove_tree_on_root_keeps_root() {
        let (_, fs) = setup();
        fs.make_directories("/a/b", false).unwrap();
        fs.write_bytes("/c", b"").unwrap();

        fs.remove_tree("/").unwrap();
        assert!(fs.list("/").unwrap().is_empty());
        assert!(fs.is_dir("/").unwrap());
    }

    #[test]
    fn test_delete_modes() {
        let (store, fs) = setup();
        let trashed = fs.write_bytes("/t", b"").unwrap();
        fs.remove("/t").unwrap();
        assert!(store.object(&trashed.id).unwrap().trashed);

        let config = DriveFsConfig {
            delete_mode: DeleteMode::Permanent,
            ..DriveFsConfig::default()
        };
        let (store, fs) = setup_with(MemoryStore::new(), config);
        let deleted = fs.write_bytes("/p", b"").unwrap();
        fs.remove("/p").unwrap();
        assert!(store.object(&deleted.id).is_none());
    }

    #[test]
    fn test_removal_invalidates_cached_resolution() {
        let (_, fs) = setup();
        let old = fs.write_bytes("/f", b"1").unwrap();
        assert_eq!(fs.resolve("/f").unwrap(), old.id);

        fs.remove("/f").unwrap();
        assert!(matches!(fs.resolve("/f"), Err(FsError::ResourceNotFound(_))));

        let new = fs.write_bytes("/f", b"2").unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(fs.resolve("/f").unwrap(), new.id);
    }

    #[test]
    fn test_multi_parent_remove_detaches_one_link() {
        let (store, fs) = setup();
        let a = fs.make_directory("/a", false).unwrap();
        let b = fs.make_directory("/b", false).unwrap();
        let shared = fs.write_bytes("/a/shared", b"x").unwrap();
        store.update_parents(&shared.id, &[b.clone()], &[]).unwrap();

        assert_eq!(fs.resolve("/b/shared").unwrap(), shared.id);
        fs.remove("/a/shared").unwrap();

        assert!(matches!(
            fs.resolve("/a/shared"),
            Err(FsError::ResourceNotFound(_))
        ));
        assert_eq!(fs.resolve("/b/shared").unwrap(), shared.id);
        let remaining = store.object(&shared.id).unwrap();
        assert!(!remaining.trashed);
        assert_eq!(remaining.parents, vec![b]);
        assert!(!remaining.has_parent(&a));
    }

    #[test]
    fn test_move_keeps_identity() {
        let (store, fs) = setup();
        let file = fs.write_bytes("/a.txt", b"content").unwrap();
        let dir = fs.make_directory("/d", false).unwrap();

        fs.move_path("/a.txt", "/d/b.txt", false).unwrap();

        assert!(matches!(fs.resolve("/a.txt"), Err(FsError::ResourceNotFound(_))));
        assert_eq!(fs.resolve("/d/b.txt").unwrap(), file.id);
        assert_eq!(store.object(&file.id).unwrap().parents, vec![dir]);
        assert_eq!(fs.read_bytes("/d/b.txt").unwrap(), b"content");
        assert_eq!(fs.list_names("/").unwrap(), vec!["d"]);
    }

    #[test]
    fn test_rename_in_place_is_a_name_update() {
        let (store, fs) = setup();
        let file = fs.write_bytes("/old", b"x").unwrap();

        fs.rename("/old", "new").unwrap();
        assert_eq!(fs.resolve("/new").unwrap(), file.id);
        assert!(!fs.exists("/old").unwrap());
        assert_eq!(store.calls(StoreOp::UpdateParents), 0);
        assert!(matches!(fs.rename("/new", "a/b"), Err(FsError::InvalidPath { .. })));
    }

    #[test]
    fn test_move_errors() {
        let (_, fs) = setup();
        fs.write_bytes("/a", b"a").unwrap();
        fs.write_bytes("/b", b"b").unwrap();
        fs.make_directories("/p/q", false).unwrap();

        assert!(matches!(
            fs.move_path("/missing", "/x", false),
            Err(FsError::ResourceNotFound(_))
        ));
        assert!(matches!(
            fs.move_path("/a", "/b", false),
            Err(FsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.move_path("/a", "/p", true),
            Err(FsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.move_path("/p", "/p/q/p", false),
            Err(FsError::ResourceInvalid { .. })
        ));
        assert!(matches!(
            fs.move_path("/", "/x", false),
            Err(FsError::ResourceInvalid { .. })
        ));
        // Nothing moved
        assert_eq!(fs.read_bytes("/a").unwrap(), b"a");
    }

    #[test]
    fn test_move_with_overwrite_replaces_file() {
        let (_, fs) = setup();
        let a = fs.write_bytes("/a", b"a").unwrap();
        fs.write_bytes("/b", b"b").unwrap();

        fs.move_path("/a", "/b", true).unwrap();
        assert_eq!(fs.resolve("/b").unwrap(), a.id);
        assert_eq!(fs.read_bytes("/b").unwrap(), b"a");
        assert_eq!(fs.list_names("/").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_failed_move_leaves_source_in_place() {
        let (store, fs) = setup();
        let file = fs.write_bytes("/a", b"a").unwrap();
        fs.make_directory("/d", false).unwrap();
        store.fail_next(StoreOp::UpdateParents);

        assert!(matches!(
            fs.move_path("/a", "/d/a", false),
            Err(FsError::RemoteUnavailable { .. })
        ));
        assert_eq!(fs.resolve("/a").unwrap(), file.id);
        assert!(!fs.exists("/d/a").unwrap());
    }

    #[test]
    fn test_failed_move_after_overwrite_is_partially_applied() {
        let (store, fs) = setup();
        fs.write_bytes("/a", b"a").unwrap();
        fs.make_directory("/d", false).unwrap();
        fs.write_bytes("/d/a", b"old").unwrap();
        store.fail_next(StoreOp::UpdateParents);

        assert!(matches!(
            fs.move_path("/a", "/d/a", true),
            Err(FsError::PartiallyApplied { step: "reparent", .. })
        ));
        // The replaced destination is gone, the source remains
        assert!(!fs.exists("/d/a").unwrap());
        assert!(fs.exists("/a").unwrap());
    }

    #[test]
    fn test_copy_is_independent() {
        let (_, fs) = setup();
        let original = fs.write_bytes("/src", b"data").unwrap();
        fs.make_directory("/d", false).unwrap();

        let copy = fs.copy("/src", "/d/dst", false).unwrap();
        assert_ne!(copy, original.id);
        assert_eq!(fs.resolve("/d/dst").unwrap(), copy);

        fs.write_bytes("/d/dst", b"changed").unwrap();
        assert_eq!(fs.read_bytes("/src").unwrap(), b"data");
        assert_eq!(fs.read_bytes("/d/dst").unwrap(), b"changed");

        assert!(matches!(
            fs.copy("/src", "/d/dst", false),
            Err(FsError::DestinationExists(_))
        ));
        fs.copy("/src", "/d/dst", true).unwrap();
        assert_eq!(fs.read_bytes("/d/dst").unwrap(), b"data");
        assert!(matches!(fs.copy("/d", "/e", false), Err(FsError::FileExpected(_))));
    }

    #[test]
    fn test_open_modes() {
        let (_, fs) = setup();
        let file = fs.write_bytes("/f", b"abc").unwrap();
        fs.make_directory("/d", false).unwrap();

        assert!(matches!(fs.open("/f", "x"), Err(FsError::DestinationExists(_))));
        assert!(matches!(fs.open("/nope", "a"), Err(FsError::ResourceNotFound(_))));
        assert!(matches!(fs.open("/nope", "r"), Err(FsError::ResourceNotFound(_))));
        assert!(matches!(fs.open("/d", "r"), Err(FsError::FileExpected(_))));
        assert!(matches!(fs.open("/d", "w"), Err(FsError::FileExpected(_))));
        assert!(matches!(fs.open("/no/f", "w"), Err(FsError::ResourceNotFound(_))));
        assert!(matches!(fs.open("/f/g", "w"), Err(FsError::DirectoryExpected(_))));
        assert!(matches!(fs.open("/f", "r+"), Err(FsError::InvalidMode(_))));

        let mut appender = fs.open("/f", "ab").unwrap();
        appender.write_all(b"def").unwrap();
        appender.close().unwrap();
        assert_eq!(fs.read_bytes("/f").unwrap(), b"abcdef");

        // Overwrite keeps the id
        let rewritten = fs.write_bytes("/f", b"z").unwrap();
        assert_eq!(rewritten.id, file.id);
        assert_eq!(fs.read_bytes("/f").unwrap(), b"z");

        let mut exclusive = fs.open("/new", "x").unwrap();
        exclusive.write_all(b"n").unwrap();
        exclusive.close().unwrap();
        assert_eq!(fs.read_bytes("/new").unwrap(), b"n");
    }

    #[test]
    fn test_new_file_invisible_until_close() {
        let (_, fs) = setup();
        let mut stream = fs.open_write("/pending", OpenMode::Write).unwrap();
        stream.write_all(b"later").unwrap();
        assert!(!fs.exists("/pending").unwrap());

        stream.close().unwrap();
        assert!(fs.is_file("/pending").unwrap());
    }

    #[test]
    fn test_failed_upload_leaves_nothing_behind() {
        let (store, fs) = setup();
        store.fail_next(StoreOp::Upload);

        assert!(matches!(
            fs.write_bytes("/f", b"data"),
            Err(FsError::RemoteUnavailable { .. })
        ));
        assert!(!fs.exists("/f").unwrap());
        assert!(fs.list("/").unwrap().is_empty());
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn test_native_documents() {
        let (store, fs) = setup();
        store.insert_object(
            &ObjectId::root(),
            "sheet",
            "application/vnd.google-apps.spreadsheet",
            b"",
        );
        fs.write_bytes("/plain", b"x").unwrap();

        assert!(matches!(fs.open("/sheet", "r"), Err(FsError::ResourceInvalid { .. })));
        assert!(matches!(fs.open("/sheet", "w"), Err(FsError::ResourceInvalid { .. })));
        assert_eq!(fs.export("/sheet", "text/csv").unwrap(), b"sheet as text/csv");
        assert!(matches!(
            fs.export("/plain", "text/csv"),
            Err(FsError::ResourceInvalid { .. })
        ));
        assert_eq!(fs.info("/sheet").unwrap().size, None);
    }

    #[test]
    fn test_info() {
        let (_, fs) = setup();
        let root = fs.info("/").unwrap();
        assert_eq!(root.name, "");
        assert!(root.is_dir);

        let file = fs.write_bytes("/f.txt", b"12345").unwrap();
        let info = fs.info("/f.txt").unwrap();
        assert_eq!(info.name, "f.txt");
        assert_eq!(info.size, Some(5));
        assert_eq!(info.id, file.id);
        assert!(info.modified.is_some());
        assert!(info.is_file());
    }

    #[test]
    fn test_set_info() {
        let (_, fs) = setup();
        let file = fs.write_bytes("/f", b"x").unwrap();
        fs.write_bytes("/h", b"y").unwrap();
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let info = fs
            .set_info(
                "/f",
                &InfoPatch {
                    name: Some("g".to_string()),
                    modified: Some(when),
                    ..InfoPatch::default()
                },
            )
            .unwrap();
        assert_eq!(info.name, "g");
        assert_eq!(info.modified, Some(when));
        assert_eq!(fs.resolve("/g").unwrap(), file.id);
        assert!(!fs.exists("/f").unwrap());

        let rename_to = |name: &str| InfoPatch {
            name: Some(name.to_string()),
            ..InfoPatch::default()
        };
        assert!(matches!(
            fs.set_info("/g", &rename_to("h")),
            Err(FsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.set_info("/g", &rename_to("a:b")),
            Err(FsError::InvalidPath { .. })
        ));
        assert!(matches!(
            fs.set_info("/", &rename_to("x")),
            Err(FsError::ResourceInvalid { .. })
        ));
    }

    #[test]
    fn test_configured_root_bounds_the_view() {
        let store = MemoryStore::new();
        let anchor = store.insert_object(&ObjectId::root(), "anchor", FOLDER_MIME_TYPE, b"");
        store.insert_object(&anchor, "inner.txt", "text/plain", b"in");
        let outside = store.insert_object(&ObjectId::root(), "outside", "text/plain", b"out");

        let config = DriveFsConfig {
            root_id: Some(anchor.to_string()),
            ..DriveFsConfig::default()
        };
        let (store, fs) = setup_with(store, config);
        assert_eq!(fs.root_id(), &anchor);
        assert_eq!(fs.list_names("/").unwrap(), vec!["inner.txt"]);
        assert!(!fs.exists("/outside").unwrap());
        assert!(matches!(fs.resolve("/.."), Err(FsError::InvalidPath { .. })));

        let file_root = DriveFsConfig {
            root_id: Some(outside.to_string()),
            ..DriveFsConfig::default()
        };
        assert!(matches!(
            DriveFs::new(store, file_root),
            Err(FsError::DirectoryExpected(_))
        ));
    }

    #[test]
    fn test_open_dir() {
        let (_, fs) = setup();
        fs.make_directories("/x/y", false).unwrap();
        fs.write_bytes("/x/y/f", b"deep").unwrap();

        let sub = fs.open_dir("/x").unwrap();
        assert_eq!(sub.read_bytes("/y/f").unwrap(), b"deep");
        assert!(matches!(fs.open_dir("/x/y/f"), Err(FsError::DirectoryExpected(_))));
    }

    #[test]
    fn test_concurrent_writers() {
        let (_, fs) = setup();
        let fs = Arc::new(fs);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let fs = fs.clone();
                std::thread::spawn(move || {
                    let path = format!("/file-{}", i);
                    fs.write_bytes(&path, path.as_bytes()).unwrap();
                    assert_eq!(fs.read_bytes(&path).unwrap(), path.as_bytes());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(fs.list("/").unwrap().len(), 4);
    }

    #[test]
    fn test_remove_during_listing_is_not_overwritten() {
        let (store, racing, fs) = racing_setup();
        fs.make_directory("/d", false).unwrap();
        let file = fs.write_bytes("/d/f", b"x").unwrap();
        assert!(fs.exists("/d/f").unwrap());

        let remover = fs.clone();
        racing.during_next_listing(move || {
            std::thread::spawn(move || remover.remove("/d/f").unwrap())
                .join()
                .unwrap();
        });

        // The listing was read before the removal landed
        assert_eq!(fs.list_names("/d").unwrap(), vec!["f".to_string()]);
        assert!(store.object(&file.id).unwrap().trashed);

        assert!(!fs.exists("/d/f").unwrap());
        assert!(!fs.exists("/d/f").unwrap());
        assert!(fs.list_names("/d").unwrap().is_empty());
        assert!(fs.cache().stale_puts() >= 1);
    }

    #[test]
    fn test_create_during_listing_is_visible() {
        let (_, racing, fs) = racing_setup();
        fs.make_directory("/d", false).unwrap();
        fs.write_bytes("/d/a", b"a").unwrap();

        let writer = fs.clone();
        racing.during_next_listing(move || {
            std::thread::spawn(move || {
                writer.write_bytes("/d/b", b"b").unwrap();
            })
            .join()
            .unwrap();
        });

        assert_eq!(fs.list_names("/d").unwrap(), vec!["a".to_string()]);
        assert_eq!(fs.read_bytes("/d/b").unwrap(), b"b");
        assert_eq!(fs.list_names("/d").unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_removers_and_listers_agree() {
        let (_, fs) = setup();
        fs.make_directory("/shared", false).unwrap();
        for i in 0..8 {
            fs.write_bytes(&format!("/shared/f{}", i), b"x").unwrap();
        }
        let fs = Arc::new(fs);

        let removers: Vec<_> = (0..8)
            .map(|i| {
                let fs = fs.clone();
                std::thread::spawn(move || fs.remove(&format!("/shared/f{}", i)).unwrap())
            })
            .collect();
        let listers: Vec<_> = (0..4)
            .map(|_| {
                let fs = fs.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        fs.list("/shared").unwrap();
                    }
                })
            })
            .collect();
        for handle in removers.into_iter().chain(listers) {
            handle.join().unwrap();
        }

        for i in 0..8 {
            assert!(!fs.exists(&format!("/shared/f{}", i)).unwrap());
        }
        assert!(fs.list("/shared").unwrap().is_empty());
    }

    #[test]
    fn test_info_reports_md5() {
        let (_, fs) = setup();
        fs.write_bytes("/file", b"xxxx").unwrap();
        assert_eq!(
            fs.info("/file").unwrap().md5.as_deref(),
            Some("ea416ed0759d46a8de58f63a59077499")
        );

        fs.make_directory("/dir", false).unwrap();
        assert_eq!(fs.info("/dir").unwrap().md5, None);
    }

    #[test]
    fn test_shortcuts() {
        let (_, fs) = setup();
        fs.write_bytes("/file", b"").unwrap();
        fs.make_directory("/parent", false).unwrap();
        fs.write_bytes("/parent/file", b"").unwrap();
        assert!(!fs.info("/parent/file").unwrap().is_shortcut);

        assert!(matches!(
            fs.add_shortcut("/shortcut", "/parent"),
            Err(FsError::FileExpected(_))
        ));
        assert!(matches!(
            fs.add_shortcut("/shortcut", "/file2"),
            Err(FsError::ResourceNotFound(_))
        ));
        assert!(matches!(
            fs.add_shortcut("/file", "/parent/file"),
            Err(FsError::DestinationExists(_))
        ));
        assert!(matches!(
            fs.add_shortcut("/parent2/shortcut", "/file"),
            Err(FsError::ResourceNotFound(_))
        ));

        let target = fs.resolve("/file").unwrap();
        fs.add_shortcut("/shortcut", "/file").unwrap();
        let info = fs.info("/shortcut").unwrap();
        assert!(info.is_shortcut);
        assert_eq!(info.shortcut_target, Some(target));

        fs.remove("/shortcut").unwrap();
        assert!(!fs.exists("/shortcut").unwrap());
        assert!(fs.exists("/file").unwrap());
    }

    #[test]
    fn test_search_by_name_and_mime_type() {
        let (_, fs) = setup();
        fs.make_directory("/dir", false).unwrap();
        fs.write_bytes("/dir/needle", b"").unwrap();
        fs.write_bytes("/needle.txt", b"text").unwrap();

        let found = fs.search(&SearchQuery::name("needle")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "needle");

        let mime_type = fs.info("/needle.txt").unwrap().mime_type;
        let hits = fs
            .search(&SearchQuery::mime_type(mime_type).and(SearchQuery::name("needle.txt")))
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = fs
            .search(&SearchQuery::mime_type("application/pdf").and(SearchQuery::name("needle.txt")))
            .unwrap();
        assert!(misses.is_empty());

        fs.remove("/needle.txt").unwrap();
        assert!(fs.search(&SearchQuery::name("needle.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_sharing_urls() {
        let (_, fs) = setup();
        let file = fs.write_bytes("/file", b"x").unwrap();

        assert!(!fs.has_url("/file").unwrap());
        assert!(!fs.has_url("/missing").unwrap());
        assert!(matches!(fs.url("/file"), Err(FsError::NoUrl { .. })));

        let url = fs.share("/file", &Permission::anyone(ShareRole::Reader)).unwrap();
        assert_eq!(url, format!("https://drive.google.com/open?id={}", file.id));
        assert!(fs.has_url("/file").unwrap());
        assert_eq!(fs.url("/file").unwrap(), url);
        assert!(fs.info("/file").unwrap().shared);

        assert!(matches!(
            fs.share("/missing", &Permission::user(ShareRole::Writer, "a@example.com")),
            Err(FsError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_app_properties_through_set_info() {
        let (_, fs) = setup();
        fs.write_bytes("/f", b"boogle boggle").unwrap();
        assert!(fs.info("/f").unwrap().app_properties.is_empty());

        let props = |key: &str, value: Option<&str>| InfoPatch {
            app_properties: Some(BTreeMap::from([(key.to_string(), value.map(str::to_string))])),
            ..InfoPatch::default()
        };

        fs.set_info("/f", &props("a", Some("a value"))).unwrap();
        let info = fs.info("/f").unwrap();
        assert_eq!(info.app_properties.get("a").map(String::as_str), Some("a value"));

        // Other metadata updates leave the properties alone
        fs.set_info(
            "/f",
            &InfoPatch {
                modified: Some(Utc.with_ymd_and_hms(2000, 1, 1, 14, 42, 42).unwrap()),
                ..InfoPatch::default()
            },
        )
        .unwrap();
        assert_eq!(fs.info("/f").unwrap().app_properties.len(), 1);

        fs.set_info("/f", &props("a", None)).unwrap();
        assert!(fs.info("/f").unwrap().app_properties.is_empty());
    }

    #[test]
    fn test_write_with_creation_time() {
        let (_, fs) = setup();
        let created = Utc.with_ymd_and_hms(1999, 1, 1, 14, 42, 42).unwrap();

        let mut stream = fs
            .open_write_created("/file2", OpenMode::Write, Some(created))
            .unwrap();
        stream.write_all(b"file2").unwrap();
        stream.close().unwrap();
        assert_eq!(fs.info("/file2").unwrap().created, Some(created));

        // Only a newly created file takes the requested time
        let mut stream = fs
            .open_write_created("/file2", OpenMode::Write, Some(Utc::now()))
            .unwrap();
        stream.write_all(b"again").unwrap();
        stream.close().unwrap();
        assert_eq!(fs.info("/file2").unwrap().created, Some(created));
    }
}
