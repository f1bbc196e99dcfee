use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::stored_object;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("Failed to read file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),
}

stored_object!(FileInfo, "file", {
    sha256: String,
    path: String,
    file_name: String,
    mime_type: String
});

impl FileInfo {
    pub fn new(path: String, file_name: String, mime_type: String, bytes: &[u8]) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            sha256: Self::get_sha(bytes),
            path,
            file_name,
            mime_type,
        }
    }

    pub fn get_sha(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn guess_mime_type(file_name: &str) -> String {
        match file_name.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
            "pdf" => "application/pdf",
            "txt" | "md" => "text/plain",
            "csv" => "text/csv",
            "json" => "application/json",
            "html" | "htm" => "text/html",
            _ => "application/octet-stream",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        let a = FileInfo::get_sha(b"hello world");
        let b = FileInfo::get_sha(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(FileInfo::guess_mime_type("report.pdf"), "application/pdf");
        assert_eq!(FileInfo::guess_mime_type("notes.md"), "text/plain");
        assert_eq!(FileInfo::guess_mime_type("unknown"), "application/octet-stream");
    }
}
