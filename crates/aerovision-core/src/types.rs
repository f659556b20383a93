//! AeroVision Core Type Definitions
//!
//! Defines fundamental types used throughout the client.

use std::path::Path;

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Server-assigned job identifier (opaque string)
pub type JobId = String;

/// Client-side session identifier (ULID)
pub type SessionId = String;

// =============================================================================
// Upload Token
// =============================================================================

/// Server-issued filename returned by a successful upload.
///
/// Opaque handle for subsequent detect calls; it has no lifecycle beyond the
/// session - the server is the durable owner of the uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadToken(pub String);

impl UploadToken {
    /// Returns the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// File Kind
// =============================================================================

/// Kind of media file submitted for detection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Video,
    Image,
}

impl FileKind {
    /// Multipart field name the server expects the file under
    pub fn field_name(&self) -> &'static str {
        match self {
            FileKind::Video => "video",
            FileKind::Image => "image",
        }
    }

    /// File extensions the server accepts for this kind
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            FileKind::Video => &["mp4", "avi", "mov", "mkv", "webm"],
            FileKind::Image => &["jpg", "jpeg", "png", "bmp", "tiff", "webp"],
        }
    }

    /// Returns true if the path's extension is acceptable for this kind
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.allowed_extensions()
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Video => write!(f, "video"),
            FileKind::Image => write!(f, "image"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_kind_field_names() {
        assert_eq!(FileKind::Video.field_name(), "video");
        assert_eq!(FileKind::Image.field_name(), "image");
    }

    #[test]
    fn test_file_kind_accepts_known_extensions() {
        assert!(FileKind::Video.accepts(&PathBuf::from("clip.mp4")));
        assert!(FileKind::Video.accepts(&PathBuf::from("CLIP.MKV")));
        assert!(FileKind::Image.accepts(&PathBuf::from("photo.jpeg")));

        assert!(!FileKind::Video.accepts(&PathBuf::from("photo.jpg")));
        assert!(!FileKind::Image.accepts(&PathBuf::from("clip.mp4")));
        assert!(!FileKind::Video.accepts(&PathBuf::from("noextension")));
    }

    #[test]
    fn test_upload_token_display() {
        let token = UploadToken("drone_footage.mp4".to_string());
        assert_eq!(token.to_string(), "drone_footage.mp4");
        assert_eq!(token.as_str(), "drone_footage.mp4");
    }
}
