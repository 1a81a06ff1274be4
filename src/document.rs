use log::{debug, info, warn};
use mime_guess::from_path;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IngestionError;

/// Form feed, used by text exports to separate pages
const PAGE_BREAK: char = '\u{000C}';

/// A source document with its raw extracted text, one entry per page
#[derive(Debug, Clone)]
pub struct Document {
    /// The document's file name, used as the source identifier
    pub source_filename: String,
    /// The document's MIME type
    pub mime_type: String,
    /// Raw text of each page, in page order (page numbers are 1-based)
    pub pages: Vec<String>,
}

impl Document {
    /// Load a document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self, IngestionError> {
        let path = file_path.as_ref();
        let source_filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestionError::Extraction {
                path: path.display().to_string(),
                reason: "invalid file name".to_string(),
            })?
            .to_string();

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type {} for {}", mime_type, source_filename);

        let pages = read_pages(path, &mime_type)?;

        Ok(Document {
            source_filename,
            mime_type,
            pages,
        })
    }

    /// Build a document from in-memory pages
    pub fn from_pages(source_filename: impl Into<String>, pages: Vec<String>) -> Self {
        Document {
            source_filename: source_filename.into(),
            mime_type: "text/plain".to_string(),
            pages,
        }
    }
}

/// Extract per-page text based on the MIME type
fn read_pages(path: &Path, mime_type: &str) -> Result<Vec<String>, IngestionError> {
    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Extracting PDF document: {}", path.display());
            let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| {
                IngestionError::Extraction {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

            if pages.iter().all(|page| page.trim().is_empty()) {
                warn!(
                    "Extracted PDF content of {} is empty or whitespace only",
                    path.display()
                );
            }
            Ok(pages)
        }

        mime if mime.starts_with("text/") => {
            info!("Reading text document: {}", path.display());
            let content = fs::read_to_string(path).map_err(|source| IngestionError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Ok(content.split(PAGE_BREAK).map(str::to_string).collect())
        }

        _ => Err(IngestionError::UnsupportedFormat {
            path: path.display().to_string(),
            mime_type: mime_type.to_string(),
        }),
    }
}

/// Whether the ingestion path knows how to read this file
pub fn is_supported(path: &Path) -> bool {
    let mime = from_path(path).first_or_octet_stream();
    mime.essence_str() == "application/pdf" || mime.type_() == "text"
}

/// List the supported documents of a directory, sorted by file name
pub fn list_documents<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, IngestionError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| IngestionError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported(path))
        .collect();
    paths.sort();

    Ok(paths)
}
