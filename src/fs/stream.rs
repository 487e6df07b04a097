//! Stream Adapter
//!
//! Byte streams over remote objects. Reads download lazily, one byte range
//! at a time. Writes are buffered locally (spilling to a temporary file when
//! large) and reach the store only when the stream is closed.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::SpooledTempFile;
use tracing::{debug, info, warn};

use super::errors::FsError;
use crate::cache::MetadataCache;
use crate::drive::{ObjectId, ObjectSpec, RemoteObject, RemoteStore};

/// Forward-only reader over an object's content
pub struct ReadStream {
    store: Arc<dyn RemoteStore>,
    id: ObjectId,
    path: String,
    /// Size at open time; reading stops here
    size: u64,
    /// Offset of the next byte to download
    position: u64,
    chunk_size: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl ReadStream {
    pub(crate) fn new(
        store: Arc<dyn RemoteStore>,
        object: &RemoteObject,
        path: String,
        chunk_size: u64,
    ) -> Self {
        Self {
            store,
            id: object.id.clone(),
            path,
            size: object.size.unwrap_or(0),
            position: 0,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            buffer_pos: 0,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Content length as of opening
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Download the next byte range; false once the content is exhausted
    fn fill(&mut self) -> Result<bool, FsError> {
        if self.position >= self.size {
            return Ok(false);
        }
        let end = self.position.saturating_add(self.chunk_size).min(self.size) - 1;
        let chunk = self
            .store
            .download_content(&self.id, Some((self.position, end)))
            .map_err(|e| FsError::from_remote(&self.path, e))?;

        debug!(id = %self.id, start = self.position, end = end, got = chunk.len(), "Read range");

        if chunk.is_empty() {
            // Content shrank remotely since open
            self.size = self.position;
            return Ok(false);
        }
        self.position += chunk.len() as u64;
        self.buffer = chunk;
        self.buffer_pos = 0;
        Ok(true)
    }

    /// Read everything that is left, keeping the error taxonomy intact
    pub(crate) fn drain(mut self) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::with_capacity(self.size.saturating_sub(self.position) as usize);
        loop {
            out.extend_from_slice(&self.buffer[self.buffer_pos..]);
            self.buffer_pos = self.buffer.len();
            if !self.fill()? {
                return Ok(out);
            }
        }
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffer_pos >= self.buffer.len() && !self.fill()? {
            return Ok(0);
        }
        let available = &self.buffer[self.buffer_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.buffer_pos += n;
        Ok(n)
    }
}

/// Where a write stream commits
#[derive(Debug, Clone)]
pub(crate) enum WriteTarget {
    /// Create a new object on close
    Create { parent: ObjectId, spec: ObjectSpec },
    /// Replace the content of an existing object on close
    Replace {
        id: ObjectId,
        parents: Vec<ObjectId>,
    },
}

/// Buffered writer that uploads on close
///
/// Nothing is visible remotely until [`close`](WriteStream::close) returns
/// `Ok`. A failed upload of a new file deletes the object it created.
/// Dropping an unclosed stream commits it and only logs a failure, so call
/// `close` to observe errors.
pub struct WriteStream {
    store: Arc<dyn RemoteStore>,
    cache: Arc<MetadataCache>,
    path: String,
    target: WriteTarget,
    buffer: SpooledTempFile,
    written: u64,
    resumable_threshold: usize,
    finished: bool,
}

impl WriteStream {
    pub(crate) fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<MetadataCache>,
        path: String,
        target: WriteTarget,
        spool_threshold: usize,
        resumable_threshold: usize,
    ) -> Self {
        Self {
            store,
            cache,
            path,
            target,
            buffer: SpooledTempFile::new(spool_threshold),
            written: 0,
            resumable_threshold,
            finished: false,
        }
    }

    /// Bytes buffered so far
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Upload the buffered content and return the committed object
    pub fn close(mut self) -> Result<RemoteObject, FsError> {
        self.commit()
    }

    fn commit(&mut self) -> Result<RemoteObject, FsError> {
        self.finished = true;

        let mut bytes = Vec::with_capacity(self.written as usize);
        self.buffer.seek(SeekFrom::Start(0))?;
        self.buffer.read_to_end(&mut bytes)?;
        let resumable = bytes.len() >= self.resumable_threshold;

        match self.target.clone() {
            WriteTarget::Create { parent, spec } => self.commit_new(&parent, &spec, &bytes, resumable),
            WriteTarget::Replace { id, parents } => {
                let result = self.store.upload_content(&id, &bytes, resumable);
                self.cache.invalidate_object(&id, &parents);
                let updated = result.map_err(|e| FsError::from_remote(&self.path, e))?;
                info!(path = %self.path, id = %id, size = bytes.len(), "Committed file content");
                Ok(updated)
            }
        }
    }

    fn commit_new(
        &self,
        parent: &ObjectId,
        spec: &ObjectSpec,
        bytes: &[u8],
        resumable: bool,
    ) -> Result<RemoteObject, FsError> {
        let created = self.store.create_object(parent, spec);
        self.cache.invalidate_children(parent);
        let created = created.map_err(|e| FsError::from_remote(&self.path, e))?;

        match self.store.upload_content(&created.id, bytes, resumable) {
            Ok(uploaded) => {
                self.cache.invalidate_object(&uploaded.id, [parent]);
                info!(path = %self.path, id = %uploaded.id, size = bytes.len(), "Committed new file");
                Ok(uploaded)
            }
            Err(upload_err) => {
                let rollback = self.store.delete(&created.id);
                self.cache.invalidate_object(&created.id, [parent]);
                match rollback {
                    Ok(()) => {
                        debug!(path = %self.path, id = %created.id, "Rolled back failed upload");
                        Err(FsError::from_remote(&self.path, upload_err))
                    }
                    Err(rollback_err) => {
                        warn!(
                            path = %self.path,
                            id = %created.id,
                            error = %rollback_err,
                            "Failed to remove object after upload failure"
                        );
                        Err(FsError::PartiallyApplied {
                            path: self.path.clone(),
                            step: "upload",
                            source: upload_err,
                        })
                    }
                }
            }
        }
    }
}

impl Write for WriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.buffer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    /// Flushes the local buffer only; content is uploaded on close
    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

impl Drop for WriteStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.commit() {
            warn!(path = %self.path, error = %e, "Write stream dropped without close; commit failed");
        }
    }
}

/// A stream returned by [`DriveFs::open`](super::DriveFs::open)
pub enum FileStream {
    Reader(ReadStream),
    Writer(WriteStream),
}

impl FileStream {
    /// Release the stream; a writer commits and returns the stored object
    pub fn close(self) -> Result<Option<RemoteObject>, FsError> {
        match self {
            FileStream::Reader(_) => Ok(None),
            FileStream::Writer(writer) => writer.close().map(Some),
        }
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileStream::Reader(reader) => reader.read(buf),
            FileStream::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is open for writing",
            )),
        }
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileStream::Writer(writer) => writer.write(buf),
            FileStream::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is open for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileStream::Writer(writer) => writer.flush(),
            FileStream::Reader(_) => Ok(()),
        }
    }
}
