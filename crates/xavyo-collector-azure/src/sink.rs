//! Destination for the finished document.

use async_trait::async_trait;

use crate::document::CollectionDocument;
use crate::CollectorResult;

/// Receives the consolidated document once per successful run.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Takes ownership of the document.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Sink` if the document cannot be written.
    async fn emit(&self, document: CollectionDocument) -> CollectorResult<()>;
}
