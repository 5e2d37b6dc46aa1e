//! What a request addresses: a named API method, an upload server, or a
//! custom URL.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HTTP verb used for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Parameters travel in the query string.
    Get,
    /// Media travels as a multipart body.
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// How media payloads are named in a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    /// `file1`, `file2`, ... (multi-photo album uploads).
    IndexedFile,
    /// `photo`
    Photo,
    /// `file`
    File,
    /// `video_file`
    Video,
}

impl PartType {
    /// Returns the multipart field name for the media at `index` (0-based).
    #[must_use]
    pub fn field_name(self, index: usize) -> String {
        match self {
            Self::IndexedFile => format!("file{}", index + 1),
            Self::Photo => "photo".to_string(),
            Self::File => "file".to_string(),
            Self::Video => "video_file".to_string(),
        }
    }
}

/// A media payload for upload.
///
/// The bytes are shared, so retries and clones do not copy them.
#[derive(Clone, PartialEq, Eq)]
pub struct Media {
    data: Arc<[u8]>,
    extension: String,
}

impl Media {
    /// Creates a media payload with a file extension (without the dot).
    pub fn new(data: impl Into<Vec<u8>>, extension: impl Into<String>) -> Self {
        Self {
            data: Arc::from(data.into()),
            extension: extension.into(),
        }
    }

    /// Creates a JPEG image.
    pub fn jpg(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, "jpg")
    }

    /// Creates a PNG image.
    pub fn png(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, "png")
    }

    /// Returns the bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the file extension.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Returns the file name sent in the multipart part.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("file.{}", self.extension)
    }
}

impl std::fmt::Debug for Media {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Media")
            .field("extension", &self.extension)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// The addressable target of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// A named API method.
    Api {
        /// Method name, e.g. `photos.getUploadServer`.
        method: String,
    },
    /// A media upload to a server URL.
    Upload {
        /// Upload server URL.
        url: String,
        /// Ordered payloads.
        media: Vec<Media>,
        /// Multipart naming mode.
        part_type: PartType,
    },
    /// A call to an arbitrary URL.
    Url {
        /// Target URL.
        url: String,
    },
}

impl RequestKind {
    /// Returns the HTTP verb this kind uses.
    #[must_use]
    pub const fn http_method(&self) -> HttpMethod {
        match self {
            Self::Upload { .. } => HttpMethod::Post,
            Self::Api { .. } | Self::Url { .. } => HttpMethod::Get,
        }
    }

    /// Returns true for named API calls.
    #[must_use]
    pub const fn is_api(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Api { method } => method,
            Self::Upload { url, .. } | Self::Url { url } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_field_names() {
        assert_eq!(PartType::IndexedFile.field_name(0), "file1");
        assert_eq!(PartType::IndexedFile.field_name(4), "file5");
        assert_eq!(PartType::Photo.field_name(3), "photo");
        assert_eq!(PartType::Video.field_name(0), "video_file");
    }

    #[test]
    fn test_kind_http_method() {
        let upload = RequestKind::Upload {
            url: "http://upload".to_string(),
            media: vec![Media::jpg(vec![1, 2, 3])],
            part_type: PartType::Photo,
        };
        assert_eq!(upload.http_method(), HttpMethod::Post);

        let api = RequestKind::Api {
            method: "users.get".to_string(),
        };
        assert_eq!(api.http_method(), HttpMethod::Get);
        assert_eq!(api.label(), "users.get");
    }

    #[test]
    fn test_media_clone_shares_bytes() {
        let media = Media::png(vec![0u8; 16]);
        let copy = media.clone();
        assert_eq!(copy.len(), 16);
        assert_eq!(copy.file_name(), "file.png");
        assert_eq!(format!("{media:?}"), "Media { extension: \"png\", bytes: 16 }");
    }
}
