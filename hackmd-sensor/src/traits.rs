use crate::types::{FetchScope, RawPayload, Result};
use async_trait::async_trait;

/// Where notes come from. The HTTP `Fetcher` is the production implementation;
/// tests substitute fixtures.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Human-readable name for logs
    fn source_name(&self) -> String;

    /// Up to `limit` notes for `scope`, each with its body filled in where it could be fetched.
    async fn list_documents(&self, scope: &FetchScope, limit: usize) -> Result<Vec<RawPayload>>;

    /// Full record (metadata and content) of a single note.
    async fn get_document(&self, note_id: &str) -> Result<RawPayload>;
}
