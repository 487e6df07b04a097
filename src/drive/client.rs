//! Google Drive API Client
//!
//! Provides authenticated access to the Drive v3 REST API: metadata queries,
//! child listings and searches, parent/metadata updates, permission grants,
//! media upload and download.

use std::time::Duration;

use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info, warn};

use super::errors::DriveError;
use super::types::{
    ChildPage, NewObject, ObjectId, ObjectPatch, ObjectSpec, Permission, PermissionBody,
    RemoteObject, SearchQuery, DEFAULT_CONTENT_TYPE,
};

/// Drive v3 metadata endpoint
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// Drive v3 media upload endpoint
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Metadata fields requested for every object
const OBJECT_FIELDS: &str = "id,name,mimeType,parents,size,modifiedTime,createdTime,trashed,\
md5Checksum,shared,shortcutDetails,appProperties";

/// Fields requested for listings
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,parents,size,modifiedTime,\
createdTime,trashed,md5Checksum,shared,shortcutDetails,appProperties)";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Resumable upload chunk size (must be a multiple of 256 KiB)
const RESUMABLE_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Default listing page size
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Escape a value for use inside a single-quoted Drive query literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Render a search filter as a Drive `q` expression; None matches everything
fn render_query(query: &SearchQuery) -> Option<String> {
    match query {
        SearchQuery::NameEquals(name) => Some(format!("name = '{}'", escape_query(name))),
        SearchQuery::MimeTypeEquals(mime_type) => {
            Some(format!("mimeType = '{}'", escape_query(mime_type)))
        }
        SearchQuery::And(terms) => {
            let parts: Vec<String> = terms.iter().filter_map(render_query).collect();
            match parts.len() {
                0 => None,
                1 => parts.into_iter().next(),
                _ => Some(format!("({})", parts.join(" and "))),
            }
        }
    }
}

/// Next upload offset from the `Range` header of a 308 reply.
///
/// The header names the inclusive byte range the server holds, always
/// starting at 0. No header means nothing has been stored yet.
fn resume_offset(range: Option<&str>) -> Result<usize, DriveError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .filter(|(start, _)| start.trim() == "0")
        .and_then(|(_, last)| last.trim().parse::<usize>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| DriveError::Decode(format!("malformed resumable Range header: {}", range)))
}

/// Send a request and turn non-success statuses into errors
async fn execute(request: RequestBuilder) -> Result<Response, DriveError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DriveError::from_status(status.as_u16(), &body))
}

async fn decode_object(response: Response) -> Result<RemoteObject, DriveError> {
    response
        .json()
        .await
        .map_err(|e| DriveError::Decode(e.to_string()))
}

/// Drive API client for making authenticated requests
#[derive(Clone)]
pub struct DriveClient {
    /// HTTP client for making requests
    http_client: Client,
    /// OAuth access token presented as a bearer token
    access_token: String,
    /// Shared drive to scope listings to (None for the user's own corpus)
    drive_id: Option<String>,
    /// Page size for child listings
    page_size: u32,
}

impl DriveClient {
    /// Create a client for an already-acquired access token
    pub fn new(access_token: &str) -> Result<Self, DriveError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DriveError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            access_token: access_token.to_string(),
            drive_id: None,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Scope listings to a shared drive
    pub fn with_drive_id(mut self, drive_id: Option<String>) -> Self {
        self.drive_id = drive_id;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Build a request with auth and the shared-drive flag attached
    fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .query(&[("supportsAllDrives", "true")])
    }

    /// Execute an operation with retry logic and backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, target: &str, f: F) -> Result<T, DriveError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DriveError>>,
    {
        let backoff_ms = [500u64, 1000, 2000];

        let mut attempt = 0;
        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
                    warn!(
                        operation = operation,
                        target = target,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying Drive operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(operation = operation, target = target, error = %e, "Drive operation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Create an empty object
    pub async fn create_object(
        &self,
        parent: &ObjectId,
        spec: &ObjectSpec,
    ) -> Result<RemoteObject, DriveError> {
        let name = spec.name.as_str();
        info!(parent = %parent, name = name, mime_type = %spec.mime_type, "Creating Drive object");

        let body = NewObject::from_spec(parent, spec);
        let body = &body;

        let created = self
            .with_retry("create", name, move || async move {
                let response = execute(
                    self.request(reqwest::Method::POST, FILES_URL)
                        .query(&[("fields", OBJECT_FIELDS)])
                        .json(body),
                )
                .await?;
                decode_object(response).await
            })
            .await?;

        info!(id = %created.id, name = name, "Created Drive object");
        Ok(created)
    }

    /// Get object metadata by id
    pub async fn get_metadata(&self, id: &ObjectId) -> Result<RemoteObject, DriveError> {
        let url = format!("{}/{}", FILES_URL, id);
        let url = url.as_str();

        self.with_retry("get", id.as_str(), move || async move {
            let response = execute(
                self.request(reqwest::Method::GET, url)
                    .query(&[("fields", OBJECT_FIELDS)]),
            )
            .await?;
            decode_object(response).await
        })
        .await
    }

    /// List one page of non-trashed children, ordered by creation time
    pub async fn list_children(
        &self,
        parent: &ObjectId,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        let mut query = format!("'{}' in parents and trashed = false", escape_query(parent.as_str()));
        if let Some(name) = name {
            query.push_str(&format!(" and name = '{}'", escape_query(name)));
        }
        let page_size = self.page_size.to_string();
        let query = query.as_str();
        let page_size = page_size.as_str();

        debug!(parent = %parent, name = ?name, token = ?page_token, "Listing children from Drive");

        let page = self
            .with_retry("list", parent.as_str(), move || async move {
                let mut request = self.request(reqwest::Method::GET, FILES_URL).query(&[
                    ("q", query),
                    ("fields", LIST_FIELDS),
                    ("pageSize", page_size),
                    ("orderBy", "createdTime"),
                    ("includeItemsFromAllDrives", "true"),
                ]);
                if let Some(drive_id) = self.drive_id.as_deref() {
                    request = request.query(&[("corpora", "drive"), ("driveId", drive_id)]);
                }
                if let Some(token) = page_token {
                    request = request.query(&[("pageToken", token)]);
                }
                let response = execute(request).await?;
                response
                    .json::<ChildPage>()
                    .await
                    .map_err(|e| DriveError::Decode(e.to_string()))
            })
            .await?;

        debug!(
            parent = %parent,
            count = page.entries.len(),
            more = page.next_page_token.is_some(),
            "Listed children page"
        );
        Ok(page)
    }

    /// Search the whole corpus for non-trashed objects, ordered by creation time
    pub async fn search(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
    ) -> Result<ChildPage, DriveError> {
        let q = match render_query(query) {
            Some(filter) => format!("trashed = false and {}", filter),
            None => "trashed = false".to_string(),
        };
        let page_size = self.page_size.to_string();
        let q = q.as_str();
        let page_size = page_size.as_str();

        debug!(query = q, token = ?page_token, "Searching Drive");

        self.with_retry("search", q, move || async move {
            let mut request = self.request(reqwest::Method::GET, FILES_URL).query(&[
                ("q", q),
                ("fields", LIST_FIELDS),
                ("pageSize", page_size),
                ("orderBy", "createdTime"),
                ("includeItemsFromAllDrives", "true"),
            ]);
            if let Some(drive_id) = self.drive_id.as_deref() {
                request = request.query(&[("corpora", "drive"), ("driveId", drive_id)]);
            }
            if let Some(token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = execute(request).await?;
            response
                .json::<ChildPage>()
                .await
                .map_err(|e| DriveError::Decode(e.to_string()))
        })
        .await
    }

    /// Grant a permission on an object
    pub async fn create_permission(
        &self,
        id: &ObjectId,
        permission: &Permission,
    ) -> Result<(), DriveError> {
        info!(id = %id, role = ?permission.role, grantee = ?permission.grantee, "Sharing Drive object");

        let url = format!("{}/{}/permissions", FILES_URL, id);
        let url = url.as_str();
        let body = PermissionBody::from(permission);
        let body = &body;

        self.with_retry("share", id.as_str(), move || async move {
            execute(self.request(reqwest::Method::POST, url).json(body)).await?;
            Ok(())
        })
        .await
    }

    /// Add and remove parents in one request
    pub async fn update_parents(
        &self,
        id: &ObjectId,
        add: &[ObjectId],
        remove: &[ObjectId],
    ) -> Result<RemoteObject, DriveError> {
        let join = |ids: &[ObjectId]| {
            ids.iter()
                .map(ObjectId::as_str)
                .collect::<Vec<_>>()
                .join(",")
        };
        let add_parents = join(add);
        let remove_parents = join(remove);

        info!(id = %id, add = %add_parents, remove = %remove_parents, "Updating Drive parents");

        let url = format!("{}/{}", FILES_URL, id);
        let url = url.as_str();
        let add_parents = add_parents.as_str();
        let remove_parents = remove_parents.as_str();

        self.with_retry("update_parents", id.as_str(), move || async move {
            let mut request = self
                .request(reqwest::Method::PATCH, url)
                .query(&[("fields", OBJECT_FIELDS)]);
            if !add_parents.is_empty() {
                request = request.query(&[("addParents", add_parents)]);
            }
            if !remove_parents.is_empty() {
                request = request.query(&[("removeParents", remove_parents)]);
            }
            let response = execute(request.json(&serde_json::json!({}))).await?;
            decode_object(response).await
        })
        .await
    }

    /// Update mutable metadata (name, modified time, trashed)
    pub async fn update_metadata(
        &self,
        id: &ObjectId,
        patch: &ObjectPatch,
    ) -> Result<RemoteObject, DriveError> {
        info!(id = %id, patch = ?patch, "Updating Drive metadata");

        let url = format!("{}/{}", FILES_URL, id);
        let url = url.as_str();

        self.with_retry("update", id.as_str(), move || async move {
            let response = execute(
                self.request(reqwest::Method::PATCH, url)
                    .query(&[("fields", OBJECT_FIELDS)])
                    .json(patch),
            )
            .await?;
            decode_object(response).await
        })
        .await
    }

    /// Replace object content, using the resumable protocol when requested
    pub async fn upload_content(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        resumable: bool,
    ) -> Result<RemoteObject, DriveError> {
        info!(id = %id, size = bytes.len(), resumable = resumable, "Uploading content to Drive");

        let updated = if resumable && !bytes.is_empty() {
            self.with_retry("upload", id.as_str(), move || self.upload_resumable(id, bytes))
                .await?
        } else {
            let url = format!("{}/{}", UPLOAD_URL, id);
            let url = url.as_str();
            self.with_retry("upload", id.as_str(), move || async move {
                let response = execute(
                    self.request(reqwest::Method::PATCH, url)
                        .query(&[("uploadType", "media"), ("fields", OBJECT_FIELDS)])
                        .header("Content-Type", DEFAULT_CONTENT_TYPE)
                        .body(bytes.to_vec()),
                )
                .await?;
                decode_object(response).await
            })
            .await?
        };

        info!(id = %id, size = ?updated.size, "Content uploaded to Drive");
        Ok(updated)
    }

    /// Run one resumable upload session from start to finish
    async fn upload_resumable(&self, id: &ObjectId, bytes: &[u8]) -> Result<RemoteObject, DriveError> {
        let url = format!("{}/{}", UPLOAD_URL, id);
        let total = bytes.len();

        let response = execute(
            self.request(reqwest::Method::PATCH, &url)
                .query(&[("uploadType", "resumable"), ("fields", OBJECT_FIELDS)])
                .header("X-Upload-Content-Type", DEFAULT_CONTENT_TYPE)
                .header("X-Upload-Content-Length", total)
                .json(&serde_json::json!({})),
        )
        .await?;

        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DriveError::Decode("resumable session without Location".to_string()))?;

        debug!(id = %id, total = total, "Started resumable upload session");

        let mut offset = 0usize;
        let mut stalled = 0;
        loop {
            let end = offset.saturating_add(RESUMABLE_CHUNK_SIZE).min(total);
            let response = self
                .http_client
                .put(&session)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, end - 1, total))
                .body(bytes[offset..end].to_vec())
                .send()
                .await?;

            match response.status().as_u16() {
                200 | 201 => return decode_object(response).await,
                // Resume Incomplete: the Range header says what the server has
                308 => {
                    let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
                    let next = resume_offset(range)?;
                    debug!(id = %id, offset = next, total = total, "Uploaded resumable chunk");
                    if next >= total {
                        return Err(DriveError::Decode(
                            "resumable upload incomplete after final chunk".to_string(),
                        ));
                    }
                    if next <= offset {
                        stalled += 1;
                        if stalled > MAX_RETRIES {
                            return Err(DriveError::Server(
                                308,
                                format!("resumable upload stuck at byte {}", next),
                            ));
                        }
                        warn!(id = %id, offset = next, attempt = stalled, "Resending resumable chunk");
                    } else {
                        stalled = 0;
                    }
                    offset = next;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(DriveError::from_status(status, &body));
                }
            }
        }
    }

    /// Download object content
    ///
    /// # Arguments
    /// * `id` - Object id
    /// * `range` - Optional inclusive (start, end) byte range for partial downloads
    pub async fn download_content(
        &self,
        id: &ObjectId,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, DriveError> {
        let url = format!("{}/{}", FILES_URL, id);
        let url = url.as_str();

        debug!(id = %id, range = ?range, "Downloading content from Drive");

        let bytes = self
            .with_retry("download", id.as_str(), move || async move {
                let mut request = self
                    .request(reqwest::Method::GET, url)
                    .query(&[("alt", "media")]);
                if let Some((start, end)) = range {
                    request = request.header(RANGE, format!("bytes={}-{}", start, end));
                }
                let response = execute(request).await?;
                Ok(response.bytes().await?.to_vec())
            })
            .await?;

        debug!(id = %id, size = bytes.len(), "Downloaded content from Drive");
        Ok(bytes)
    }

    /// Export a native document in the requested format
    pub async fn export_content(&self, id: &ObjectId, mime_type: &str) -> Result<Vec<u8>, DriveError> {
        let url = format!("{}/{}/export", FILES_URL, id);
        let url = url.as_str();

        info!(id = %id, mime_type = mime_type, "Exporting Drive document");

        self.with_retry("export", id.as_str(), move || async move {
            let response = execute(
                self.http_client
                    .get(url)
                    .bearer_auth(&self.access_token)
                    .query(&[("mimeType", mime_type)]),
            )
            .await?;
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    /// Server-side copy into `parent`
    pub async fn copy_object(
        &self,
        id: &ObjectId,
        parent: &ObjectId,
        name: &str,
    ) -> Result<RemoteObject, DriveError> {
        info!(source = %id, parent = %parent, name = name, "Copying Drive object");

        let url = format!("{}/{}/copy", FILES_URL, id);
        let url = url.as_str();
        let body = NewObject::copy(parent, name);
        let body = &body;

        let copied = self
            .with_retry("copy", id.as_str(), move || async move {
                let response = execute(
                    self.request(reqwest::Method::POST, url)
                        .query(&[("fields", OBJECT_FIELDS)])
                        .json(body),
                )
                .await?;
                decode_object(response).await
            })
            .await?;

        info!(source = %id, copy = %copied.id, "Copied Drive object");
        Ok(copied)
    }

    /// Permanently delete an object (bypasses the trash)
    pub async fn delete(&self, id: &ObjectId) -> Result<(), DriveError> {
        let url = format!("{}/{}", FILES_URL, id);
        let url = url.as_str();

        info!(id = %id, "Deleting Drive object");

        self.with_retry("delete", id.as_str(), move || async move {
            execute(self.request(reqwest::Method::DELETE, url)).await?;
            Ok(())
        })
        .await
    }
}
