//! In-memory object graph
//!
//! A [`RemoteStore`] that keeps the whole graph in process. It follows the
//! remote model rather than a tree: objects can have several parents and
//! siblings can share a name. Listings are paged in insertion order.
//! Call counters and one-shot fault injection make it usable for
//! exercising the filesystem layer without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::Utc;
use md5::{Digest, Md5};

use super::errors::DriveError;
use super::store::RemoteStore;
use super::types::{
    ChildPage, ObjectId, ObjectPatch, ObjectSpec, Permission, RemoteObject, SearchQuery,
    ShortcutDetails, FOLDER_MIME_TYPE, NATIVE_MIME_PREFIX,
};

/// Remote calls, for counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    GetMetadata,
    ListChildren,
    Search,
    Share,
    UpdateParents,
    UpdateMetadata,
    Upload,
    Download,
    Export,
    Copy,
    Delete,
}

fn content_md5(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Folders and native documents have no byte content
fn has_bytes(mime_type: &str) -> bool {
    mime_type != FOLDER_MIME_TYPE && !mime_type.starts_with(NATIVE_MIME_PREFIX)
}

/// Cut one page out of a complete, ordered result set
fn paginate(
    matching: Vec<RemoteObject>,
    page_token: Option<&str>,
    page_size: usize,
) -> Result<ChildPage, DriveError> {
    let start = match page_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| DriveError::Request(format!("bad page token: {}", token)))?,
        None => 0,
    };

    let end = (start + page_size).min(matching.len());
    let entries = matching
        .get(start..end)
        .map(<[RemoteObject]>::to_vec)
        .unwrap_or_default();
    let next_page_token = (end < matching.len()).then(|| end.to_string());

    Ok(ChildPage {
        entries,
        next_page_token,
    })
}

#[derive(Debug, Clone)]
struct StoredObject {
    meta: RemoteObject,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ObjectId, StoredObject>,
    /// Creation order; listings follow it
    order: Vec<ObjectId>,
    next_id: u64,
    calls: HashMap<StoreOp, usize>,
    faults: Vec<StoreOp>,
}

impl State {
    fn allocate_id(&mut self) -> ObjectId {
        self.next_id += 1;
        ObjectId::new(format!("obj-{}", self.next_id))
    }

    fn get(&self, id: &ObjectId) -> Result<&StoredObject, DriveError> {
        self.objects
            .get(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: &ObjectId) -> Result<&mut StoredObject, DriveError> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    fn require_folder(&self, id: &ObjectId) -> Result<(), DriveError> {
        if self.get(id)?.meta.is_folder() {
            Ok(())
        } else {
            Err(DriveError::Request(format!("{} is not a folder", id)))
        }
    }

    /// Active objects matching `keep`, in creation order
    fn active<F>(&self, keep: F) -> Vec<RemoteObject>
    where
        F: Fn(&RemoteObject) -> bool,
    {
        self.order
            .iter()
            .filter_map(|id| self.objects.get(id))
            .map(|o| &o.meta)
            .filter(|m| !m.trashed && keep(m))
            .cloned()
            .collect()
    }

    fn insert(&mut self, meta: RemoteObject, content: Vec<u8>) -> RemoteObject {
        self.order.push(meta.id.clone());
        self.objects.insert(
            meta.id.clone(),
            StoredObject {
                meta: meta.clone(),
                content,
            },
        );
        meta
    }

    /// Count the call and fire a pending fault for it
    fn enter(&mut self, op: StoreOp) -> Result<(), DriveError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(pos) = self.faults.iter().position(|f| *f == op) {
            self.faults.remove(pos);
            return Err(DriveError::Server(503, format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

/// In-memory [`RemoteStore`]
pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

impl MemoryStore {
    /// Create a store holding only the root folder
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let mut state = State::default();
        let now = Utc::now();
        state.insert(
            RemoteObject {
                id: ObjectId::root(),
                name: "My Drive".to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                parents: Vec::new(),
                size: None,
                modified_time: Some(now),
                created_time: Some(now),
                trashed: false,
                md5_checksum: None,
                shared: false,
                shortcut_details: None,
                app_properties: BTreeMap::new(),
            },
            Vec::new(),
        );

        Self {
            state: Mutex::new(state),
            page_size: page_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an object directly, bypassing any filesystem rules.
    /// Lets callers build graph shapes a tree cannot express.
    pub fn insert_object(
        &self,
        parent: &ObjectId,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> ObjectId {
        let mut state = self.lock();
        let id = state.allocate_id();
        let now = Utc::now();
        let binary = has_bytes(mime_type);
        state.insert(
            RemoteObject {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                parents: vec![parent.clone()],
                size: binary.then_some(content.len() as u64),
                modified_time: Some(now),
                created_time: Some(now),
                trashed: false,
                md5_checksum: binary.then(|| content_md5(content)),
                shared: false,
                shortcut_details: None,
                app_properties: BTreeMap::new(),
            },
            content.to_vec(),
        );
        id
    }

    /// Stored content of an object, if it exists
    pub fn content(&self, id: &ObjectId) -> Option<Vec<u8>> {
        self.lock().objects.get(id).map(|o| o.content.clone())
    }

    /// Current metadata of an object, trashed or not
    pub fn object(&self, id: &ObjectId) -> Option<RemoteObject> {
        self.lock().objects.get(id).map(|o| o.meta.clone())
    }

    /// Number of stored objects, including the root and trashed objects
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Make the next call of `op` fail with a server error
    pub fn fail_next(&self, op: StoreOp) {
        self.lock().faults.push(op);
    }

    /// How many times `op` has been called
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn create_object(
        &self,
        parent: &ObjectId,
        spec: &ObjectSpec,
    ) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Create)?;
        state.require_folder(parent)?;

        let shortcut_details = match &spec.shortcut_target {
            Some(target) => Some(ShortcutDetails {
                target_id: target.clone(),
                target_mime_type: Some(state.get(target)?.meta.mime_type.clone()),
            }),
            None => None,
        };

        let id = state.allocate_id();
        let now = Utc::now();
        let binary = has_bytes(&spec.mime_type);
        Ok(state.insert(
            RemoteObject {
                id,
                name: spec.name.clone(),
                mime_type: spec.mime_type.clone(),
                parents: vec![parent.clone()],
                size: binary.then_some(0),
                modified_time: Some(now),
                created_time: Some(spec.created_time.unwrap_or(now)),
                trashed: false,
                md5_checksum: binary.then(|| content_md5(&[])),
                shared: false,
                shortcut_details,
                app_properties: BTreeMap::new(),
            },
            Vec::new(),
        ))
    }

    fn get_metadata(&self, id: &ObjectId) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::GetMetadata)?;
        Ok(state.get(id)?.meta.clone())
    }

    fn list_children(
        &self,
        parent: &ObjectId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::ListChildren)?;
        state.get(parent)?;

        let matching = state.active(|m| m.has_parent(parent) && name.map_or(true, |n| m.name == n));
        paginate(matching, page_token, self.page_size)
    }

    fn search(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Search)?;

        let matching = state.active(|m| query.matches(m));
        paginate(matching, page_token, self.page_size)
    }

    fn create_permission(&self, id: &ObjectId, _permission: &Permission) -> Result<(), DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Share)?;

        state.get_mut(id)?.meta.shared = true;
        Ok(())
    }

    fn update_parents(
        &self,
        id: &ObjectId,
        add: &[ObjectId],
        remove: &[ObjectId],
    ) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::UpdateParents)?;
        for parent in add {
            state.require_folder(parent)?;
        }

        let object = state.get_mut(id)?;
        object.meta.parents.retain(|p| !remove.contains(p));
        for parent in add {
            if !object.meta.has_parent(parent) {
                object.meta.parents.push(parent.clone());
            }
        }
        Ok(object.meta.clone())
    }

    fn update_metadata(
        &self,
        id: &ObjectId,
        patch: &ObjectPatch,
    ) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::UpdateMetadata)?;

        let object = state.get_mut(id)?;
        if let Some(name) = &patch.name {
            object.meta.name = name.clone();
        }
        if let Some(modified) = patch.modified_time {
            object.meta.modified_time = Some(modified);
        }
        if let Some(trashed) = patch.trashed {
            object.meta.trashed = trashed;
        }
        if let Some(properties) = &patch.app_properties {
            for (key, value) in properties {
                match value {
                    Some(value) => {
                        object.meta.app_properties.insert(key.clone(), value.clone());
                    }
                    None => {
                        object.meta.app_properties.remove(key);
                    }
                }
            }
        }
        Ok(object.meta.clone())
    }

    fn upload_content(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        _resumable: bool,
    ) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Upload)?;

        let object = state.get_mut(id)?;
        if object.meta.is_folder() || object.meta.is_native_document() {
            return Err(DriveError::Request(format!("{} has no byte content", id)));
        }
        object.content = bytes.to_vec();
        object.meta.size = Some(bytes.len() as u64);
        object.meta.md5_checksum = Some(content_md5(bytes));
        object.meta.modified_time = Some(Utc::now());
        Ok(object.meta.clone())
    }

    fn download_content(
        &self,
        id: &ObjectId,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Download)?;

        let object = state.get(id)?;
        if object.meta.is_folder() || object.meta.is_native_document() {
            return Err(DriveError::Forbidden(format!("{} is not downloadable", id)));
        }
        let len = object.content.len();
        let (start, end) = match range {
            Some((start, end)) => {
                let end = (end as usize).saturating_add(1).min(len);
                ((start as usize).min(end), end)
            }
            None => (0, len),
        };
        Ok(object.content[start..end].to_vec())
    }

    fn export_content(&self, id: &ObjectId, mime_type: &str) -> Result<Vec<u8>, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Export)?;

        let object = state.get(id)?;
        if !object.meta.is_native_document() {
            return Err(DriveError::Forbidden(format!("{} is not exportable", id)));
        }
        Ok(format!("{} as {}", object.meta.name, mime_type).into_bytes())
    }

    fn copy_object(
        &self,
        id: &ObjectId,
        parent: &ObjectId,
        name: &str,
    ) -> Result<RemoteObject, DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Copy)?;
        state.require_folder(parent)?;

        let source = state.get(id)?.clone();
        if source.meta.is_folder() {
            return Err(DriveError::Request(format!("{} is a folder", id)));
        }

        let new_id = state.allocate_id();
        let now = Utc::now();
        let meta = RemoteObject {
            id: new_id,
            name: name.to_string(),
            parents: vec![parent.clone()],
            modified_time: Some(now),
            created_time: Some(now),
            trashed: false,
            shared: false,
            ..source.meta
        };
        Ok(state.insert(meta, source.content))
    }

    fn delete(&self, id: &ObjectId) -> Result<(), DriveError> {
        let mut state = self.lock();
        state.enter(StoreOp::Delete)?;

        if *id == ObjectId::root() {
            return Err(DriveError::Forbidden("cannot delete the root".to_string()));
        }
        state
            .objects
            .remove(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        state.order.retain(|o| o != id);
        for object in state.objects.values_mut() {
            object.meta.parents.retain(|p| p != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(page: &ChildPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_paging_follows_insertion_order() {
        let store = MemoryStore::with_page_size(2);
        let root = ObjectId::root();
        for name in ["a", "b", "c"] {
            store.create_object(&root, &ObjectSpec::new(name, "text/plain")).unwrap();
        }

        let first = store.list_children(&root, None, None).unwrap();
        assert_eq!(names(&first), vec!["a", "b"]);
        let token = first.next_page_token.unwrap();

        let second = store.list_children(&root, None, Some(&token)).unwrap();
        assert_eq!(names(&second), vec!["c"]);
        assert!(second.next_page_token.is_none());
    }

    #[test]
    fn test_duplicate_names_and_name_filter() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        let first = store.insert_object(&root, "dup", "text/plain", b"1");
        let second = store.insert_object(&root, "dup", "text/plain", b"2");
        store.insert_object(&root, "other", "text/plain", b"3");

        let page = store.list_children(&root, Some("dup"), None).unwrap();
        let ids: Vec<_> = page.entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_trashed_objects_are_not_listed() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        let id = store.insert_object(&root, "gone", "text/plain", b"");
        store.update_metadata(&id, &ObjectPatch::trash()).unwrap();

        let page = store.list_children(&root, None, None).unwrap();
        assert!(page.entries.is_empty());
        assert!(store.object(&id).unwrap().trashed);
    }

    #[test]
    fn test_multiple_parents() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        let dir = store.insert_object(&root, "dir", FOLDER_MIME_TYPE, b"");
        let file = store.insert_object(&root, "f", "text/plain", b"x");

        let updated = store.update_parents(&file, &[dir.clone()], &[]).unwrap();
        assert_eq!(updated.parents.len(), 2);
        assert_eq!(store.list_children(&dir, None, None).unwrap().entries.len(), 1);
        assert_eq!(store.list_children(&root, Some("f"), None).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_ranged_download_is_clipped() {
        let store = MemoryStore::new();
        let id = store.insert_object(&ObjectId::root(), "f", "text/plain", b"hello");
        assert_eq!(store.download_content(&id, Some((1, 2))).unwrap(), b"el");
        assert_eq!(store.download_content(&id, Some((3, 100))).unwrap(), b"lo");
        assert_eq!(store.download_content(&id, None).unwrap(), b"hello");
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        store.fail_next(StoreOp::Create);

        let spec = ObjectSpec::new("a", "text/plain");
        assert!(store.create_object(&root, &spec).is_err());
        assert!(store.create_object(&root, &spec).is_ok());
        assert_eq!(store.calls(StoreOp::Create), 2);
    }

    #[test]
    fn test_native_documents_are_not_downloadable() {
        let store = MemoryStore::new();
        let id = store.insert_object(
            &ObjectId::root(),
            "sheet",
            "application/vnd.google-apps.spreadsheet",
            b"",
        );
        assert!(store.download_content(&id, None).is_err());
        assert_eq!(
            store.export_content(&id, "text/csv").unwrap(),
            b"sheet as text/csv"
        );
    }

    #[test]
    fn test_md5_tracks_content() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        let id = store.insert_object(&root, "f", "text/plain", b"xxxx");
        assert_eq!(
            store.object(&id).unwrap().md5_checksum.as_deref(),
            Some("ea416ed0759d46a8de58f63a59077499")
        );

        let updated = store.upload_content(&id, b"", false).unwrap();
        assert_eq!(
            updated.md5_checksum.as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );

        let dir = store.create_object(&root, &ObjectSpec::folder("d")).unwrap();
        assert_eq!(dir.md5_checksum, None);
    }

    #[test]
    fn test_search_spans_folders() {
        let store = MemoryStore::with_page_size(1);
        let root = ObjectId::root();
        let dir = store.insert_object(&root, "dir", FOLDER_MIME_TYPE, b"");
        let first = store.insert_object(&root, "x", "text/plain", b"");
        let second = store.insert_object(&dir, "x", "application/pdf", b"");
        let trashed = store.insert_object(&dir, "x", "text/plain", b"");
        store.update_metadata(&trashed, &ObjectPatch::trash()).unwrap();

        let query = SearchQuery::name("x");
        let page = store.search(&query, None).unwrap();
        assert_eq!(page.entries[0].id, first);
        let token = page.next_page_token.unwrap();
        let page = store.search(&query, Some(&token)).unwrap();
        assert_eq!(page.entries[0].id, second);
        assert!(page.next_page_token.is_none());

        let query = SearchQuery::mime_type("application/pdf").and(SearchQuery::name("x"));
        let page = store.search(&query, None).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id, second);
    }

    #[test]
    fn test_shortcut_and_properties() {
        let store = MemoryStore::new();
        let root = ObjectId::root();
        let target = store.insert_object(&root, "t", "text/plain", b"x");

        let link = store
            .create_object(&root, &ObjectSpec::shortcut("link", target.clone()))
            .unwrap();
        assert!(link.is_shortcut());
        assert_eq!(link.size, None);
        assert_eq!(link.shortcut_details.unwrap().target_id, target);
        assert!(store
            .create_object(&root, &ObjectSpec::shortcut("bad", ObjectId::from("nope")))
            .is_err());

        let mut set = BTreeMap::new();
        set.insert("a".to_string(), Some("1".to_string()));
        set.insert("b".to_string(), Some("2".to_string()));
        let patch = ObjectPatch {
            app_properties: Some(set),
            ..ObjectPatch::default()
        };
        store.update_metadata(&target, &patch).unwrap();

        let mut unset = BTreeMap::new();
        unset.insert("a".to_string(), None);
        let patch = ObjectPatch {
            app_properties: Some(unset),
            ..ObjectPatch::default()
        };
        let updated = store.update_metadata(&target, &patch).unwrap();
        assert_eq!(updated.app_properties.len(), 1);
        assert_eq!(updated.app_properties.get("b").map(String::as_str), Some("2"));

        store
            .create_permission(&target, &Permission::anyone(crate::drive::ShareRole::Reader))
            .unwrap();
        assert!(store.object(&target).unwrap().shared);
    }
}
