//! Rendering and persistence of the generated PAC file

pub mod pac;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::PacDocument;

pub use pac::{render_pac, PacFileSink};

/// Destination for a generated document
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, document: &PacDocument) -> Result<()>;
}
