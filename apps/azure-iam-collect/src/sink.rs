use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use xavyo_collector_azure::{CollectionDocument, CollectorError, CollectorResult, DocumentSink};

/// Writes the document as JSON to a file, or to stdout when no path is set.
#[derive(Debug, Clone)]
pub struct JsonWriterSink {
    path: Option<PathBuf>,
    pretty: bool,
}

impl JsonWriterSink {
    pub fn new(path: Option<PathBuf>, pretty: bool) -> Self {
        Self { path, pretty }
    }

    fn render(&self, document: &CollectionDocument) -> CollectorResult<Vec<u8>> {
        let mut bytes = if self.pretty {
            serde_json::to_vec_pretty(document)?
        } else {
            serde_json::to_vec(document)?
        };
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[async_trait]
impl DocumentSink for JsonWriterSink {
    async fn emit(&self, document: CollectionDocument) -> CollectorResult<()> {
        let bytes = self.render(&document)?;
        match &self.path {
            Some(path) => {
                tokio::fs::write(path, &bytes).await.map_err(|e| {
                    CollectorError::Sink(format!("failed to write {}: {e}", path.display()))
                })?;
                tracing::info!(path = %path.display(), bytes = bytes.len(), "Document written");
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(&bytes)
                    .and_then(|()| stdout.flush())
                    .map_err(|e| CollectorError::Sink(format!("failed to write stdout: {e}")))?;
            }
        }
        Ok(())
    }
}
