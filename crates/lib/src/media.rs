//! Opaque binary attachments (images, voice recordings) and their transport encoding.
//!
//! The bytes only ever travel to the model as base64 inline data; the conversation
//! keeps a [`MediaRef`] describing what was attached.

use base64::Engine;
use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is empty")]
    Empty(String),
}

/// Binary payload from a media source (file picker, microphone capture).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub name: Option<String>,
}

/// Display-side handle to an attachment: what it is, not its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub mime_type: String,
    pub byte_len: usize,
    pub name: Option<String>,
}

/// One part of an outbound message, in the shape the model endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Base64 (standard alphabet) encoded bytes.
    InlineData { mime_type: String, data: String },
}

impl Media {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read a file and infer its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self, MediaError> {
        let bytes = std::fs::read(path).map_err(|source| MediaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(MediaError::Empty(path.display().to_string()));
        }
        let mut media = Self::new(bytes, mime_type_for_path(path));
        if let Some(name) = path.file_name() {
            media.name = Some(name.to_string_lossy().into_owned());
        }
        Ok(media)
    }

    pub fn to_ref(&self) -> MediaRef {
        MediaRef {
            mime_type: self.mime_type.clone(),
            byte_len: self.bytes.len(),
            name: self.name.clone(),
        }
    }

    /// Encode for transport. An empty MIME type is sent as octet-stream.
    pub fn to_part(&self) -> Part {
        let mime_type = if self.mime_type.trim().is_empty() {
            OCTET_STREAM.to_string()
        } else {
            self.mime_type.clone()
        };
        Part::InlineData {
            mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(&self.bytes),
        }
    }
}

/// MIME type from file extension (case-insensitive); unknown => application/octet-stream.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "webm" => "audio/webm",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => OCTET_STREAM,
    }
}
