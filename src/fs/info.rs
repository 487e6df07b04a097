//! Filesystem attributes
//!
//! Converts remote metadata into the attribute set the filesystem exposes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::drive::{ObjectId, RemoteObject};

/// Attributes of one filesystem entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Info {
    pub name: String,
    pub is_dir: bool,
    /// Byte size; None for directories and native documents
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub id: ObjectId,
    pub mime_type: String,
    pub parents: Vec<ObjectId>,
    /// Hex MD5 of the content; None for directories and native documents
    pub md5: Option<String>,
    pub shared: bool,
    pub is_shortcut: bool,
    pub shortcut_target: Option<ObjectId>,
    pub app_properties: BTreeMap<String, String>,
}

impl Info {
    /// Build attributes from remote metadata
    pub fn from_object(object: &RemoteObject) -> Self {
        let is_dir = object.is_folder();
        Self {
            name: object.name.clone(),
            is_dir,
            size: if is_dir { None } else { object.size },
            modified: object.modified_time,
            created: object.created_time,
            id: object.id.clone(),
            mime_type: object.mime_type.clone(),
            parents: object.parents.clone(),
            md5: if is_dir { None } else { object.md5_checksum.clone() },
            shared: object.shared,
            is_shortcut: object.is_shortcut(),
            shortcut_target: object.shortcut_details.as_ref().map(|d| d.target_id.clone()),
            app_properties: object.app_properties.clone(),
        }
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir
    }
}

/// Mutable attributes; unset fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoPatch {
    pub name: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    /// Merged into the existing properties; a None value removes the key
    pub app_properties: Option<BTreeMap<String, Option<String>>>,
}

impl InfoPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.modified.is_none() && self.app_properties.is_none()
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub id: ObjectId,
    pub is_dir: bool,
}

impl From<&RemoteObject> for DirEntry {
    fn from(object: &RemoteObject) -> Self {
        Self {
            name: object.name.clone(),
            id: object.id.clone(),
            is_dir: object.is_folder(),
        }
    }
}
