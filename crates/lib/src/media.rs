//! Media classification: normalize heterogeneous attachment envelopes into a
//! platform-neutral record, plus the temp spool used when dispatching
//! downloaded files.
//!
//! Classification is pure over the envelope; the raw bytes come from a
//! caller-supplied source so the platform download mechanism stays out of
//! this module.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media download failed: {0}")]
    Download(String),
}

/// Attachment kind, produced once by classification and matched exhaustively
/// everywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    /// Extension used when neither the platform filename nor the MIME table
    /// yields one.
    pub fn fallback_extension(self) -> &'static str {
        match self {
            MediaKind::Image => ".jpg",
            MediaKind::Video => ".mp4",
            MediaKind::Audio => ".mp3",
            MediaKind::Sticker => ".webp",
            MediaKind::Document => ".bin",
        }
    }

    /// Operator-facing kind name used in generated attachment captions.
    pub fn friendly_name(self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Sticker => "Foto",
            MediaKind::Video => "Video",
            MediaKind::Audio => "Audio",
            MediaKind::Document => "Archivo",
        }
    }

    /// Whether this kind carries a caption. Audio and stickers never do.
    pub fn carries_caption(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video | MediaKind::Document)
    }

    /// Re-derive the kind from a MIME type. Inverse of the container type for
    /// classified media: stickers come through as `image/webp`.
    pub fn from_mime(mime: &str) -> MediaKind {
        let mime = strip_mime_params(mime);
        if mime == "image/webp" {
            return MediaKind::Sticker;
        }
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

/// One media container inside a chat message envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub mime_type: String,
    /// Platform-supplied filename (documents usually have one).
    pub file_name: Option<String>,
    pub caption: Option<String>,
}

/// Platform-specific message envelope: at most one non-null container is
/// meaningful. Albums wrap multiple items and are rejected by the relay
/// before classification; each inner item arrives later as its own event.
#[derive(Debug, Clone, Default)]
pub struct MediaEnvelope {
    pub image: Option<MediaDescriptor>,
    pub video: Option<MediaDescriptor>,
    pub audio: Option<MediaDescriptor>,
    pub document: Option<MediaDescriptor>,
    pub sticker: Option<MediaDescriptor>,
    pub album: bool,
}

impl MediaEnvelope {
    /// Most specific non-null container, or `None` for text-only envelopes.
    pub fn kind(&self) -> Option<MediaKind> {
        self.descriptor().map(|(_, kind)| kind)
    }

    fn descriptor(&self) -> Option<(&MediaDescriptor, MediaKind)> {
        if let Some(d) = &self.image {
            Some((d, MediaKind::Image))
        } else if let Some(d) = &self.video {
            Some((d, MediaKind::Video))
        } else if let Some(d) = &self.audio {
            Some((d, MediaKind::Audio))
        } else if let Some(d) = &self.document {
            Some((d, MediaKind::Document))
        } else if let Some(d) = &self.sticker {
            Some((d, MediaKind::Sticker))
        } else {
            None
        }
    }

    /// Caption of the active container, honoring the per-kind caption rules.
    pub fn caption(&self) -> Option<String> {
        self.descriptor().and_then(|(desc, kind)| {
            if kind.carries_caption() {
                desc.caption.clone()
            } else {
                None
            }
        })
    }
}

/// Platform-neutral attachment record. Never persisted; lives for one relay
/// operation.
#[derive(Debug, Clone)]
pub struct NormalizedMedia {
    pub buffer: Vec<u8>,
    pub kind: MediaKind,
    pub file_name: String,
    pub mime_type: String,
    pub caption: Option<String>,
    pub original_file_name: Option<String>,
}

/// Classify an envelope and fetch its bytes. The byte source is invoked
/// exactly once per classified item and never for text-only envelopes.
pub async fn classify<F, Fut>(
    envelope: &MediaEnvelope,
    byte_source: F,
) -> Result<Option<NormalizedMedia>, MediaError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<u8>, String>>,
{
    let Some((desc, kind)) = envelope.descriptor() else {
        return Ok(None);
    };
    let caption = if kind.carries_caption() {
        desc.caption.clone()
    } else {
        None
    };
    let file_name = derive_file_name(desc, kind);
    let buffer = byte_source().await.map_err(MediaError::Download)?;
    Ok(Some(NormalizedMedia {
        buffer,
        kind,
        file_name,
        mime_type: desc.mime_type.clone(),
        caption,
        original_file_name: desc.file_name.clone(),
    }))
}

/// Filename policy: platform filename with a recognizable extension, else the
/// MIME table, else a generated unique name with the kind fallback extension.
fn derive_file_name(desc: &MediaDescriptor, kind: MediaKind) -> String {
    let table_ext =
        extension_from_mime(&desc.mime_type).unwrap_or_else(|| kind.fallback_extension());
    match &desc.file_name {
        Some(name) if Path::new(name).extension().is_some() => name.clone(),
        Some(name) => format!("{}{}", name, table_ext),
        None => format!("{}{}", uuid::Uuid::new_v4(), table_ext),
    }
}

/// Kind of a workspace-side attachment: MIME prefix first, extension second,
/// document when unknown. Never yields a sticker.
pub fn kind_for_file(file_name: &str, mime_type: &str) -> MediaKind {
    let mime = strip_mime_params(mime_type);
    if !mime.is_empty() {
        if mime.starts_with("image/") {
            return MediaKind::Image;
        }
        if mime.starts_with("video/") {
            return MediaKind::Video;
        }
        if mime.starts_with("audio/") {
            return MediaKind::Audio;
        }
        return MediaKind::Document;
    }
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => MediaKind::Image,
        "mp4" | "mkv" | "avi" | "mov" | "webm" => MediaKind::Video,
        "mp3" | "ogg" | "wav" | "m4a" | "aac" => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}

/// MIME-type-to-extension table for the formats both platforms actually
/// produce. Parameters (`; codecs=opus`) are ignored.
pub fn extension_from_mime(mime_type: &str) -> Option<&'static str> {
    match strip_mime_params(mime_type) {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        "video/mp4" => Some(".mp4"),
        "video/mpeg" => Some(".mpeg"),
        "video/quicktime" => Some(".mov"),
        "video/webm" => Some(".webm"),
        "video/x-msvideo" => Some(".avi"),
        "audio/mpeg" => Some(".mp3"),
        "audio/ogg" => Some(".ogg"),
        "audio/aac" => Some(".aac"),
        "audio/wav" => Some(".wav"),
        "audio/mp4" => Some(".m4a"),
        "application/pdf" => Some(".pdf"),
        "application/zip" => Some(".zip"),
        "application/msword" => Some(".doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(".docx")
        }
        "application/vnd.ms-excel" => Some(".xls"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(".xlsx"),
        "text/plain" => Some(".txt"),
        "text/html" => Some(".html"),
        "application/json" => Some(".json"),
        _ => None,
    }
}

fn strip_mime_params(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or(mime_type).trim()
}

/// Default spool directory for downloaded attachments awaiting dispatch.
pub fn default_spool_dir() -> PathBuf {
    std::env::temp_dir().join("wsbridge-spool")
}

/// A downloaded attachment spilled to disk for the duration of one dispatch.
/// The file is deleted when the guard drops, success or failure.
pub struct SpooledFile {
    path: PathBuf,
}

impl SpooledFile {
    pub async fn write(dir: &Path, bytes: &[u8], extension: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}{}", uuid::Uuid::new_v4(), extension));
        tokio::fs::write(&path, bytes).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("media: failed to remove spool file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Remove spool files older than `max_age`. Called periodically; errors are
/// logged, not propagated.
pub async fn sweep_stale_spool(dir: &Path, max_age: Duration) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            log::warn!("media: spool sweep cannot read {}: {}", dir.display(), e);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let stale = modified
            .elapsed()
            .map(|age| age > max_age)
            .unwrap_or(false);
        if stale {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                log::warn!(
                    "media: spool sweep failed to remove {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }
}
