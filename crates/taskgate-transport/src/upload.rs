//! File upload side channel.
//!
//! Clients post base64 payloads before starting a task and pass the returned
//! reference names in `uploadedFiles`. Uploads are not tied to any session.

use std::path::{Path, PathBuf};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Largest decoded file accepted.
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Request body limit, leaving room for base64 expansion of a few files.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Upload error.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No files in upload")]
    Empty,
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    #[error("File {name} is not valid base64: {source}")]
    Decode {
        name: String,
        source: base64::DecodeError,
    },
    #[error("File {name} is {size} bytes, over the upload limit")]
    TooLarge { name: String, size: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Empty | Self::InvalidName(_) | Self::Decode { .. } => StatusCode::BAD_REQUEST,
        };
        if status.is_server_error() {
            tracing::error!("Upload failed: {self}");
        } else {
            tracing::warn!("Upload rejected: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// One uploaded file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFile {
    pub name: String,
    /// Base64 encoded contents.
    pub data: String,
}

/// Body of `POST /upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
}

/// Reference assigned to one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    pub original_name: String,
    pub reference: String,
    pub size: usize,
}

/// Response of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<StoredUpload>,
}

/// Directory that uploaded files are written to.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a stored upload, if `reference` names one.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        is_plain_name(reference)
            .then(|| self.dir.join(reference))
            .filter(|path| path.is_file())
    }

    /// Decode and store every file, all or nothing on validation.
    ///
    /// # Errors
    /// Returns error if any file is invalid or cannot be written.
    pub async fn save_all(&self, request: UploadRequest) -> Result<UploadResponse, UploadError> {
        if request.files.is_empty() {
            return Err(UploadError::Empty);
        }

        let mut decoded = Vec::with_capacity(request.files.len());
        for file in request.files {
            if !is_plain_name(&file.name) {
                return Err(UploadError::InvalidName(file.name));
            }
            let bytes = STANDARD
                .decode(file.data.as_bytes())
                .map_err(|source| UploadError::Decode {
                    name: file.name.clone(),
                    source,
                })?;
            if bytes.len() > MAX_FILE_BYTES {
                return Err(UploadError::TooLarge {
                    name: file.name,
                    size: bytes.len(),
                });
            }
            decoded.push((file.name, bytes));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut stored = Vec::with_capacity(decoded.len());
        for (name, bytes) in decoded {
            let reference = format!("{}-{name}", Uuid::new_v4().simple());
            tokio::fs::write(self.dir.join(&reference), &bytes).await?;
            tracing::info!(file = %name, reference = %reference, size = bytes.len(), "Stored upload");
            stored.push(StoredUpload {
                original_name: name,
                reference,
                size: bytes.len(),
            });
        }
        Ok(UploadResponse { files: stored })
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

async fn upload_handler(
    State(store): State<UploadStore>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, UploadError> {
    store.save_all(request).await.map(Json)
}

/// Router serving `POST /upload`.
#[must_use]
pub fn create_upload_router(store: UploadStore) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> UploadStore {
        UploadStore::new(std::env::temp_dir().join(format!("taskgate-upload-{}", Uuid::new_v4())))
    }

    fn file(name: &str, contents: &[u8]) -> UploadFile {
        UploadFile {
            name: name.into(),
            data: STANDARD.encode(contents),
        }
    }

    #[tokio::test]
    async fn test_save_assigns_unique_references() {
        let store = temp_store();
        let response = store
            .save_all(UploadRequest {
                files: vec![file("a.txt", b"alpha"), file("a.txt", b"again")],
            })
            .await
            .unwrap();

        let [first, second] = response.files.as_slice() else {
            panic!("expected two uploads");
        };
        assert_ne!(first.reference, second.reference);
        assert!(first.reference.ends_with("-a.txt"));
        assert_eq!(first.size, 5);

        let path = store.resolve(&first.reference).unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"alpha");

        let _ = tokio::fs::remove_dir_all(store.dir()).await;
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let store = temp_store();
        assert!(matches!(
            store.save_all(UploadRequest { files: vec![] }).await,
            Err(UploadError::Empty)
        ));
        assert!(matches!(
            store
                .save_all(UploadRequest {
                    files: vec![file("../escape", b"x")]
                })
                .await,
            Err(UploadError::InvalidName(_))
        ));
        let bad = UploadFile {
            name: "b.bin".into(),
            data: "***".into(),
        };
        assert!(matches!(
            store.save_all(UploadRequest { files: vec![bad] }).await,
            Err(UploadError::Decode { .. })
        ));
        // Nothing written for rejected requests.
        assert!(!store.dir().exists());
    }

    #[test]
    fn test_resolve_refuses_traversal() {
        let store = temp_store();
        assert!(store.resolve("../etc/passwd").is_none());
        assert!(store.resolve("missing").is_none());
    }
}
