use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported file type: {0}")]
    Unsupported(PathBuf),
    #[error("Live photo video has no matching still image: {0}")]
    OrphanVideo(PathBuf),
}

/// Raw bytes of one input file. Never mutated once loaded.
#[derive(Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    pub data: Arc<Vec<u8>>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.data.len())
            .finish()
    }
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: Arc::new(data),
        }
    }

    /// Read a file from disk; the mime type comes from the extension
    pub async fn from_path(path: &Path) -> Result<Self, IntakeError> {
        let kind = MediaKind::of(path).ok_or_else(|| IntakeError::Unsupported(path.into()))?;
        let data = tokio::fs::read(path).await.map_err(|source| IntakeError::Io {
            path: path.into(),
            source,
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!("Loaded {} ({} bytes)", name, data.len());
        Ok(SourceFile::new(name, kind.mime_type(), data))
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// How an item is uploaded. The live variant owns its video, so a
/// live photo without a video cannot be represented.
#[derive(Debug, Clone)]
pub enum UploadMode {
    Static,
    LivePhoto { video: SourceFile },
}

impl UploadMode {
    pub fn video(&self) -> Option<&SourceFile> {
        match self {
            UploadMode::Static => None,
            UploadMode::LivePhoto { video } => Some(video),
        }
    }

    pub fn is_live_photo(&self) -> bool {
        matches!(self, UploadMode::LivePhoto { .. })
    }
}

/// One file handed to the queue
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file: SourceFile,
    pub mode: UploadMode,
}

impl NewUpload {
    pub fn still(file: SourceFile) -> Self {
        Self {
            file,
            mode: UploadMode::Static,
        }
    }

    pub fn live(file: SourceFile, video: SourceFile) -> Self {
        Self {
            file,
            mode: UploadMode::LivePhoto { video },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Still(&'static str),
    Video(&'static str),
}

impl MediaKind {
    fn of(path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let kind = match ext.as_str() {
            "jpg" | "jpeg" => MediaKind::Still("image/jpeg"),
            "png" => MediaKind::Still("image/png"),
            "webp" => MediaKind::Still("image/webp"),
            "gif" => MediaKind::Still("image/gif"),
            "bmp" => MediaKind::Still("image/bmp"),
            "tif" | "tiff" => MediaKind::Still("image/tiff"),
            "heic" | "heif" if cfg!(feature = "heic") => MediaKind::Still("image/heic"),
            "mov" => MediaKind::Video("video/quicktime"),
            "mp4" => MediaKind::Video("video/mp4"),
            _ => return None,
        };
        Some(kind)
    }

    fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Still(mime) | MediaKind::Video(mime) => mime,
        }
    }
}

/// Pairing key: same directory, same case-insensitive stem
fn stem_key(path: &Path) -> (PathBuf, String) {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    (parent, stem)
}

/// Group input paths into stills, pairing each with a same-stem video.
///
/// Order follows the stills' order in `paths`. Duplicate paths are dropped.
pub fn pair_live_photos(paths: &[PathBuf]) -> Result<Vec<(PathBuf, Option<PathBuf>)>, IntakeError> {
    let mut stills: Vec<PathBuf> = Vec::new();
    let mut videos: HashMap<(PathBuf, String), PathBuf> = HashMap::new();

    for path in paths {
        match MediaKind::of(path) {
            Some(MediaKind::Still(_)) => {
                if !stills.contains(path) {
                    stills.push(path.clone());
                }
            }
            Some(MediaKind::Video(_)) => {
                videos.insert(stem_key(path), path.clone());
            }
            None => return Err(IntakeError::Unsupported(path.clone())),
        }
    }

    let mut pairs = Vec::with_capacity(stills.len());
    for still in stills {
        let video = videos.remove(&stem_key(&still));
        pairs.push((still, video));
    }

    if let Some(orphan) = videos.into_values().next() {
        warn!("Video {} has no matching still", orphan.display());
        return Err(IntakeError::OrphanVideo(orphan));
    }

    Ok(pairs)
}

/// Load paths from disk as queue-ready uploads
pub async fn load_uploads(paths: &[PathBuf]) -> Result<Vec<NewUpload>, IntakeError> {
    let mut uploads = Vec::new();
    for (still, video) in pair_live_photos(paths)? {
        let file = SourceFile::from_path(&still).await?;
        let upload = match video {
            Some(video) => NewUpload::live(file, SourceFile::from_path(&video).await?),
            None => NewUpload::still(file),
        };
        uploads.push(upload);
    }
    Ok(uploads)
}
