use std::path::{Path, PathBuf};

use bytes::Bytes;
use snafu::{OptionExt, ResultExt, Snafu};

pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A file queued for the next send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub content: Bytes,
}

/// Identity used for deduplication: two files with the same name and size are the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    pub name: String,
    pub size: u64,
}

impl AttachedFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            mime_type: mime_type.into(),
            content,
        }
    }

    pub fn key(&self) -> AttachmentKey {
        AttachmentKey {
            name: self.name.clone(),
            size: self.size,
        }
    }

    pub fn is_audio(&self) -> bool {
        has_top_level_type(&self.mime_type, "audio")
    }

    pub fn is_image(&self) -> bool {
        has_top_level_type(&self.mime_type, "image")
    }

    /// Reads a file from disk, inferring its MIME type from the extension.
    pub async fn read_from_path(path: impl AsRef<Path>) -> AttachmentResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context(MissingFileNameSnafu {
                stage: "read-attachment",
                path: path.to_path_buf(),
            })?;
        let content = tokio::fs::read(path).await.context(ReadFileSnafu {
            stage: "read-attachment",
            path: path.to_path_buf(),
        })?;

        Ok(Self::new(name, mime_type_for_path(path), content))
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AttachmentError {
    #[snafu(display("path {path:?} has no file name"))]
    MissingFileName { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read attachment {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Files queued for the next send, deduplicated by `(name, size)`.
#[derive(Debug, Clone, Default)]
pub struct AttachmentStager {
    files: Vec<AttachedFile>,
}

impl AttachmentStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a file. Returns false when a file with the same identity is already queued.
    pub fn stage(&mut self, file: AttachedFile) -> bool {
        let key = file.key();
        if self.files.iter().any(|staged| staged.key() == key) {
            tracing::debug!(name = %key.name, size = key.size, "attachment already staged");
            return false;
        }

        self.files.push(file);
        true
    }

    pub fn list(&self) -> &[AttachedFile] {
        &self.files
    }

    pub fn remove(&mut self, index: usize) -> Option<AttachedFile> {
        if index < self.files.len() {
            Some(self.files.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Drains the queue for one send; attachments are single-use.
    pub fn take(&mut self) -> Vec<AttachedFile> {
        std::mem::take(&mut self.files)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_top_level_type(mime_type: &str, top_level: &str) -> bool {
    mime_type
        .trim()
        .split('/')
        .next()
        .is_some_and(|kind| kind.eq_ignore_ascii_case(top_level))
        && mime_type.contains('/')
}

/// Best-effort MIME type from a file extension.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => FALLBACK_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, body: &'static str) -> AttachedFile {
        AttachedFile::new(name, "text/plain", body)
    }

    #[test]
    fn staging_same_identity_twice_is_a_no_op() {
        let mut stager = AttachmentStager::new();
        assert!(stager.stage(file("a.txt", "abc")));
        assert!(!stager.stage(file("a.txt", "xyz")));
        assert_eq!(stager.len(), 1);
        assert_eq!(stager.list()[0].content, Bytes::from_static(b"abc"));
    }

    #[test]
    fn same_name_different_size_is_a_different_file() {
        let mut stager = AttachmentStager::new();
        assert!(stager.stage(file("a.txt", "abc")));
        assert!(stager.stage(file("a.txt", "abcd")));
        assert_eq!(stager.len(), 2);
    }

    #[test]
    fn staged_identities_stay_unique_over_long_sequences() {
        let mut stager = AttachmentStager::new();
        let bodies: [&'static str; 3] = ["x", "xy", "xyz"];
        for round in 0..30 {
            let name = format!("f{}.txt", round % 4);
            stager.stage(AttachedFile::new(name, "text/plain", bodies[round % 3]));
        }

        let keys = stager.list().iter().map(AttachedFile::key).collect::<Vec<_>>();
        for (index, key) in keys.iter().enumerate() {
            assert!(!keys[index + 1..].contains(key));
        }
        assert_eq!(keys.len(), 12);
    }

    #[test]
    fn list_keeps_insertion_order_and_remove_by_index() {
        let mut stager = AttachmentStager::new();
        stager.stage(file("one", "1"));
        stager.stage(file("two", "22"));
        stager.stage(file("three", "333"));

        let removed = stager.remove(1).map(|file| file.name);
        assert_eq!(removed.as_deref(), Some("two"));
        assert!(stager.remove(9).is_none());

        let names = stager
            .list()
            .iter()
            .map(|file| file.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["one", "three"]);
    }

    #[test]
    fn take_and_clear_empty_the_queue() {
        let mut stager = AttachmentStager::new();
        stager.stage(file("one", "1"));
        assert_eq!(stager.take().len(), 1);
        assert!(stager.is_empty());

        stager.stage(file("two", "2"));
        stager.clear();
        assert!(stager.is_empty());
    }

    #[test]
    fn mime_classification_helpers() {
        assert!(AttachedFile::new("n.mp3", "audio/mpeg", "").is_audio());
        assert!(AttachedFile::new("n.mp3", "AUDIO/ogg", "").is_audio());
        assert!(!AttachedFile::new("n", "audiobook", "").is_audio());
        assert!(AttachedFile::new("p.png", "image/png", "").is_image());
        assert_eq!(mime_type_for_path(Path::new("clip.M4A")), "audio/mp4");
        assert_eq!(mime_type_for_path(Path::new("noext")), FALLBACK_MIME_TYPE);
    }
}
