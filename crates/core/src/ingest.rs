use crate::chunking::normalize_whitespace;
use crate::extractor::{join_pages, LopdfExtractor, PdfExtractor};
use crate::{Document, IngestError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Builds a [`Document`] from already extracted text.
pub fn document_from_text(filename: &str, text: &str) -> Document {
    let normalized = normalize_whitespace(text);
    Document {
        document_id: digest_bytes(normalized.as_bytes()),
        filename: filename.to_string(),
        text: normalized,
        uploaded_at: Utc::now(),
    }
}

pub fn document_from_pdf(filename: &str, bytes: &[u8]) -> Result<Document, IngestError> {
    document_from_pdf_with(&LopdfExtractor, filename, bytes)
}

pub fn document_from_pdf_with(
    extractor: &dyn PdfExtractor,
    filename: &str,
    bytes: &[u8],
) -> Result<Document, IngestError> {
    let pages = extractor.extract_pages(bytes, filename)?;
    let text = normalize_whitespace(&join_pages(&pages));

    Ok(Document {
        document_id: digest_bytes(bytes),
        filename: filename.to_string(),
        text,
        uploaded_at: Utc::now(),
    })
}

pub fn load_pdf_file(path: &Path) -> Result<Document, IngestError> {
    let bytes = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    document_from_pdf(name, &bytes)
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct IngestionReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub fn load_pdfs_best_effort(paths: &[PathBuf]) -> IngestionReport {
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in paths {
        match load_pdf_file(path) {
            Ok(document) => documents.push(document),
            Err(error) => skipped_files.push(SkippedPdf {
                path: path.clone(),
                reason: error.to_string(),
            }),
        }
    }

    IngestionReport {
        documents,
        skipped_files,
    }
}

pub fn ingest_folder_best_effort(folder: &Path) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    Ok(load_pdfs_best_effort(&files))
}
