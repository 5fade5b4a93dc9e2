//! Narrow interfaces to the external stores, plus in-memory versions used
//! by the master binary and by tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::job::JobId;
use crate::results::JobResult;

/// Opaque handle into a blob store.
pub type BlobRef = String;

pub trait BlobStore: Send + Sync {
    fn fetch(&self, blob: &str) -> Result<Vec<u8>>;
    fn store(&self, bytes: Vec<u8>) -> Result<BlobRef>;
}

/// Receives terminal job results. Called by whoever subscribes to the
/// completion stream, never by the scheduler itself.
pub trait MetadataStore: Send + Sync {
    fn update(&self, job_id: &JobId, result: &JobResult) -> Result<()>;
    fn get(&self, job_id: &JobId) -> Option<JobResult>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<BlobRef, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob under a caller-chosen ref (e.g. a raw upload).
    pub fn put(&self, blob: impl Into<BlobRef>, bytes: Vec<u8>) {
        lock(&self.blobs).insert(blob.into(), bytes);
    }

    pub fn len(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn fetch(&self, blob: &str) -> Result<Vec<u8>> {
        lock(&self.blobs)
            .get(blob)
            .cloned()
            .ok_or_else(|| Error::storage(format!("blob {blob} not found")))
    }

    fn store(&self, bytes: Vec<u8>) -> Result<BlobRef> {
        let blob = format!("blob-{}", uuid::Uuid::new_v4());
        lock(&self.blobs).insert(blob.clone(), bytes);
        Ok(blob)
    }
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    results: Mutex<HashMap<JobId, JobResult>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn update(&self, job_id: &JobId, result: &JobResult) -> Result<()> {
        lock(&self.results).insert(job_id.clone(), result.clone());
        Ok(())
    }

    fn get(&self, job_id: &JobId) -> Option<JobResult> {
        lock(&self.results).get(job_id).cloned()
    }
}
