//! File ingestion: turn an uploaded file into text for summarization.
//!
//! Plain text is the only supported format. PDF is recognised but not yet
//! supported, and reported distinctly from other rejections.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_PDF: &str = "application/pdf";
/// Generic default of upload clients; carries no format information.
const OCTET_STREAM: &str = "application/octet-stream";

/// Extensions advertised to the user.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[".txt", ".pdf"];

/// Advertised upload size guidance. Larger files are logged, not rejected.
pub const SIZE_GUIDANCE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("File appears to be empty")]
    Empty,

    #[error("PDF support is being implemented. Please try with a .txt file for now.")]
    PdfNotSupported,

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Failed to read {filename}: {source}")]
    Read {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

/// A file offered by the user, before any decoding.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    /// Declared content type; inferred from the extension when absent.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub async fn from_path(path: &Path) -> Result<Self, IngestError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Read {
            filename: filename.clone(),
            source,
        })?;
        Ok(Self {
            filename,
            content_type: None,
            bytes,
        })
    }

    pub fn content_type(&self) -> String {
        match self.content_type.as_deref().map(essence) {
            Some(ct) if !ct.is_empty() && ct != OCTET_STREAM => ct,
            _ => content_type_for(&self.filename).unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub content: String,
    pub filename: String,
}

/// Content type implied by a filename's extension.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(TEXT_PLAIN),
        "pdf" => Some(APPLICATION_PDF),
        _ => None,
    }
}

/// `text/plain; charset=utf-8` -> `text/plain`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn ingest(file: &UploadedFile) -> Result<IngestedFile, IngestError> {
    let content_type = file.content_type();
    debug!(
        "Ingesting {} ({} bytes, type '{content_type}')",
        file.filename,
        file.bytes.len()
    );

    if file.bytes.len() > SIZE_GUIDANCE_BYTES {
        warn!(
            "{} is {} bytes, above the advertised 10MB guidance",
            file.filename,
            file.bytes.len()
        );
    }

    match content_type.as_str() {
        TEXT_PLAIN => {
            let text = String::from_utf8_lossy(&file.bytes);
            let content = text.trim();
            if content.is_empty() {
                return Err(IngestError::Empty);
            }
            Ok(IngestedFile {
                content: content.to_string(),
                filename: file.filename.clone(),
            })
        }
        APPLICATION_PDF => Err(IngestError::PdfNotSupported),
        other => Err(IngestError::UnsupportedType(if other.is_empty() {
            file.filename.clone()
        } else {
            other.to_string()
        })),
    }
}

/// Ingest the first file of a multi-file drop; the rest are ignored.
pub fn ingest_first(files: &[UploadedFile]) -> Option<Result<IngestedFile, IngestError>> {
    let (first, rest) = files.split_first()?;
    if !rest.is_empty() {
        debug!("Ignoring {} additional file(s)", rest.len());
    }
    Some(ingest(first))
}
