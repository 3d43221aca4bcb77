//! Upload service: store bytes, hand back a URL the relay can carry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{AppResult, AppState};

/// File types accepted by extension, and as a token of the declared mime.
pub const ALLOWED_TYPES: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "webp", "mp4", "webm", "ogg", "wav", "mp3",
];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file was uploaded")]
    NoFile,
    /// Names only the check that failed, never the client's values.
    #[error("file type not allowed: unsupported {0}")]
    Rejected(&'static str),
    #[error("upload could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("upload could not be stored: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoFile | Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Multipart(e) => e.status(),
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Image,
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Uploaded {
    pub success: bool,
    pub filename: String,
    pub url: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub kind: UploadKind,
}

pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh unique name and return that name.
    pub async fn save(&self, ext: &str, bytes: &[u8]) -> Result<String, UploadError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let filename = format!(
            "{millis}-{}.{ext}",
            rand::random_range(0..1_000_000_000u32)
        );
        tokio::fs::write(self.dir.join(&filename), bytes).await?;
        Ok(filename)
    }
}

/// Check an upload's name and declared mime. Returns the lowercased
/// extension and what kind of media it is.
pub fn classify(file_name: &str, mime: &str) -> Result<(String, UploadKind), UploadError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = mime.to_ascii_lowercase();

    if !ALLOWED_TYPES.contains(&ext.as_str()) {
        return Err(UploadError::Rejected("extension"));
    }
    if !ALLOWED_TYPES.iter().any(|token| mime.contains(token)) {
        return Err(UploadError::Rejected("content type"));
    }

    let kind = match mime.split('/').next() {
        Some("image") => UploadKind::Image,
        Some("video") => UploadKind::Video,
        Some("audio") => UploadKind::Audio,
        _ => match ext.as_str() {
            "mp4" | "webm" => UploadKind::Video,
            "ogg" | "wav" | "mp3" => UploadKind::Audio,
            _ => UploadKind::Image,
        },
    };
    Ok((ext, kind))
}

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[debug_handler(state = AppState)]
pub async fn upload(
    State(store): State<Arc<UploadStore>>,
    mut multipart: Multipart,
) -> AppResult<Json<Uploaded>> {
    while let Some(field) = multipart.next_field().await.map_err(UploadError::from)? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or_default().to_owned();
        let mime = field.content_type().unwrap_or_default().to_owned();
        let (ext, kind) = classify(&original, &mime)?;

        let bytes = field.bytes().await.map_err(UploadError::from)?;
        let filename = store.save(&ext, &bytes).await?;
        tracing::info!(file = %filename, bytes = bytes.len(), "upload stored");

        return Ok(Json(Uploaded {
            success: true,
            url: format!("/uploads/{filename}"),
            filename,
            mime,
            kind,
        }));
    }
    Err(UploadError::NoFile.into())
}
