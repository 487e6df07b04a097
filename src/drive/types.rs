//! Drive API types
//!
//! Defines the object model of the remote store as the Drive v3 API returns it,
//! plus the request bodies the client sends back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// MIME type of a shortcut pointing at another object
pub const SHORTCUT_MIME_TYPE: &str = "application/vnd.google-apps.shortcut";

/// Prefix shared by all Drive-native types (Docs, Sheets, shortcuts, folders)
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// MIME type attached to uploaded content when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Alias Drive accepts for the authenticated user's root folder
pub const ROOT_ALIAS: &str = "root";

/// Browser link prefix for a shared object; the object id is appended
pub const SHARING_URL: &str = "https://drive.google.com/open?id=";

/// Opaque, store-assigned object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self(ROOT_ALIAS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Deserialize a size that Drive encodes as a decimal string.
/// Plain numbers are accepted too; absent or null means "no byte content".
fn deserialize_flexible_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleSizeVisitor;

    impl<'de> de::Visitor<'de> for FlexibleSizeVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<u64>, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<u64>, E> {
            u64::try_from(value)
                .map(Some)
                .map_err(|_| de::Error::custom("negative value for size"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<u64>, E> {
            value.parse::<u64>().map(Some).map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(FlexibleSizeVisitor)
}

/// One node of the remote object graph
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Immutable object id
    pub id: ObjectId,
    /// Display name, not unique among siblings
    pub name: String,
    /// MIME type, including the folder and native-document sentinels
    pub mime_type: String,
    /// Containers this object is linked into (empty only for a root)
    #[serde(default)]
    pub parents: Vec<ObjectId>,
    /// Byte size; absent for folders and native documents
    #[serde(default, deserialize_with = "deserialize_flexible_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trashed: bool,
    /// Hex MD5 of the content; only binary files carry one
    #[serde(default)]
    pub md5_checksum: Option<String>,
    /// Someone other than the owner has access
    #[serde(default)]
    pub shared: bool,
    /// Set on shortcuts only
    #[serde(default)]
    pub shortcut_details: Option<ShortcutDetails>,
    /// Private key/value properties of the calling application
    #[serde(default)]
    pub app_properties: BTreeMap<String, String>,
}

/// Where a shortcut points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    pub target_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_mime_type: Option<String>,
}

impl RemoteObject {
    /// Check if this object is a container
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_shortcut(&self) -> bool {
        self.mime_type == SHORTCUT_MIME_TYPE
    }

    /// Check if this is a Drive-native document with no raw byte representation
    pub fn is_native_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }

    pub fn has_parent(&self, parent: &ObjectId) -> bool {
        self.parents.iter().any(|p| p == parent)
    }
}

/// One page of a child listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPage {
    #[serde(rename = "files", default)]
    pub entries: Vec<RemoteObject>,
    /// Token for the next page (None on the last page)
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Mutable metadata fields accepted by a metadata update
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
    /// Keys mapped to None are removed; keys not named are left alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_properties: Option<BTreeMap<String, Option<String>>>,
}

impl ObjectPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn trash() -> Self {
        Self {
            trashed: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.modified_time.is_none()
            && self.trashed.is_none()
            && self.app_properties.is_none()
    }
}

/// Attributes of an object to create
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSpec {
    pub name: String,
    pub mime_type: String,
    /// Creation time to record instead of the server's clock
    pub created_time: Option<DateTime<Utc>>,
    /// Makes the new object a shortcut to this target
    pub shortcut_target: Option<ObjectId>,
}

impl ObjectSpec {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            created_time: None,
            shortcut_target: None,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self::new(name, FOLDER_MIME_TYPE)
    }

    pub fn shortcut(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            shortcut_target: Some(target),
            ..Self::new(name, SHORTCUT_MIME_TYPE)
        }
    }

    pub fn created_at(mut self, created_time: Option<DateTime<Utc>>) -> Self {
        self.created_time = created_time;
        self
    }
}

/// Request body for object creation and server-side copies
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewObject<'a> {
    pub name: &'a str,
    pub parents: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortcut_details: Option<ShortcutDetails>,
}

impl<'a> NewObject<'a> {
    pub fn from_spec(parent: &'a ObjectId, spec: &'a ObjectSpec) -> Self {
        Self {
            name: spec.name.as_str(),
            parents: [parent.as_str()],
            mime_type: Some(spec.mime_type.as_str()),
            created_time: spec.created_time,
            shortcut_details: spec.shortcut_target.clone().map(|target_id| ShortcutDetails {
                target_id,
                target_mime_type: None,
            }),
        }
    }

    pub fn copy(parent: &'a ObjectId, name: &'a str) -> Self {
        Self {
            name,
            parents: [parent.as_str()],
            mime_type: None,
            created_time: None,
            shortcut_details: None,
        }
    }
}

/// Corpus-wide search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    NameEquals(String),
    MimeTypeEquals(String),
    /// Every term must match; an empty list matches everything
    And(Vec<SearchQuery>),
}

impl SearchQuery {
    pub fn name(name: impl Into<String>) -> Self {
        Self::NameEquals(name.into())
    }

    pub fn mime_type(mime_type: impl Into<String>) -> Self {
        Self::MimeTypeEquals(mime_type.into())
    }

    /// Conjunction of `self` and `other`
    pub fn and(self, other: SearchQuery) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn matches(&self, object: &RemoteObject) -> bool {
        match self {
            Self::NameEquals(name) => object.name == *name,
            Self::MimeTypeEquals(mime_type) => object.mime_type == *mime_type,
            Self::And(terms) => terms.iter().all(|t| t.matches(object)),
        }
    }
}

/// Access level granted by a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ShareRole {
    Reader,
    Commenter,
    Writer,
    FileOrganizer,
    Organizer,
    Owner,
}

#[derive(Debug, Error)]
#[error("unknown sharing role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for ShareRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Self::Reader),
            "commenter" => Ok(Self::Commenter),
            "writer" => Ok(Self::Writer),
            "fileOrganizer" => Ok(Self::FileOrganizer),
            "organizer" => Ok(Self::Organizer),
            "owner" => Ok(Self::Owner),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Who a permission is granted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantee {
    /// Anyone holding the link
    Anyone,
    /// One account, by email address
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub role: ShareRole,
    pub grantee: Grantee,
}

impl Permission {
    pub fn anyone(role: ShareRole) -> Self {
        Self {
            role,
            grantee: Grantee::Anyone,
        }
    }

    pub fn user(role: ShareRole, email: impl Into<String>) -> Self {
        Self {
            role,
            grantee: Grantee::User(email.into()),
        }
    }
}

/// Request body for a permission grant
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionBody<'a> {
    pub role: ShareRole,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<&'a str>,
}

impl<'a> From<&'a Permission> for PermissionBody<'a> {
    fn from(permission: &'a Permission) -> Self {
        let (kind, email_address) = match &permission.grantee {
            Grantee::Anyone => ("anyone", None),
            Grantee::User(email) => ("user", Some(email.as_str())),
        };
        Self {
            role: permission.role,
            kind,
            email_address,
        }
    }
}
