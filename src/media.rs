//! Shareable media resources: the probed `Resource` record, the external
//! probe and hashing interfaces, and the share-directory walk that feeds
//! the content directory at startup.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cds::ContentTree;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported media format: {0}")]
    Unsupported(PathBuf),
    #[error("I/O error probing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What kind of item a resource is. Audio-only and audio+video streams are
/// distinguished because music must never land in the video hierarchy,
/// while movies with and without sound browse the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    AudioVideo,
    Photo,
}

impl MediaKind {
    pub fn upnp_class(&self) -> &'static str {
        match self {
            MediaKind::Audio => "object.item.audioItem.musicTrack",
            MediaKind::Photo => "object.item.imageItem.photo",
            MediaKind::Video | MediaKind::AudioVideo => "object.item.videoItem.movie",
        }
    }
}

/// DLNA.ORG_PN media format conformance points recognized by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlnaProfile {
    Mp3,
    Lpcm,
    JpegSm,
    JpegMed,
    JpegLrg,
    PngLrg,
    Mpeg1,
    MpegPsNtsc,
    MpegPsPal,
}

impl DlnaProfile {
    /// The DLNA.ORG_PN token for protocolInfo attributes.
    pub fn name(&self) -> &'static str {
        match self {
            DlnaProfile::Mp3 => "MP3",
            DlnaProfile::Lpcm => "LPCM",
            DlnaProfile::JpegSm => "JPEG_SM",
            DlnaProfile::JpegMed => "JPEG_MED",
            DlnaProfile::JpegLrg => "JPEG_LRG",
            DlnaProfile::PngLrg => "PNG_LRG",
            DlnaProfile::Mpeg1 => "MPEG1",
            DlnaProfile::MpegPsNtsc => "MPEG_PS_NTSC",
            DlnaProfile::MpegPsPal => "MPEG_PS_PAL",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DlnaProfile::Mp3 => "audio/mpeg",
            DlnaProfile::Lpcm => "audio/L16",
            DlnaProfile::JpegSm | DlnaProfile::JpegMed | DlnaProfile::JpegLrg => "image/jpeg",
            DlnaProfile::PngLrg => "image/png",
            DlnaProfile::Mpeg1 | DlnaProfile::MpegPsNtsc | DlnaProfile::MpegPsPal => "video/mpeg",
        }
    }

    /// Canonical file extension used in resource URLs.
    pub fn extension(&self) -> &'static str {
        match self {
            DlnaProfile::Mp3 => "mp3",
            DlnaProfile::Lpcm => "pcm",
            DlnaProfile::JpegSm | DlnaProfile::JpegMed | DlnaProfile::JpegLrg => "jpg",
            DlnaProfile::PngLrg => "png",
            DlnaProfile::Mpeg1 | DlnaProfile::MpegPsNtsc | DlnaProfile::MpegPsPal => "mpg",
        }
    }
}

impl fmt::Display for DlnaProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A probed shareable resource. Produced by a [`MediaProbe`]; everything
/// the content directory and the HTTP streamer need to describe and serve
/// the file without re-opening it for inspection.
#[derive(Debug, Clone)]
pub struct Resource {
    pub path: PathBuf,
    pub size: u64,
    /// Play length in microseconds; `None` when the probe cannot tell
    /// (photos, or formats the probe does not inspect deeply).
    pub duration_micros: Option<u64>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub profile: DlnaProfile,
    pub kind: MediaKind,
}

impl Resource {
    /// Display title: the file name without its extension.
    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn mime(&self) -> &'static str {
        self.profile.mime()
    }

    /// `res@duration` value in `H:MM:SS` form, when the length is known.
    pub fn didl_duration(&self) -> Option<String> {
        let micros = self.duration_micros?;
        let secs = micros / 1_000_000;
        Some(format!(
            "{}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ))
    }
}

/// Media inspection interface. The default implementation classifies by
/// file extension only; a codec-aware prober can be substituted without
/// touching the content directory.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<Resource, ProbeError>;
}

/// Content identity interface: a stable 32-hex-digit digest for a file
/// path or an arbitrary string.
pub trait HashProvider: Send + Sync {
    fn digest_str(&self, input: &str) -> String;

    fn digest_path(&self, path: &Path) -> String {
        self.digest_str(&path.to_string_lossy())
    }
}

/// MD5-backed [`HashProvider`]; 128 bits formatted as lowercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Hash;

impl HashProvider for Md5Hash {
    fn digest_str(&self, input: &str) -> String {
        use std::fmt::Write;
        let digest = Md5::digest(input.as_bytes());
        let mut out = String::with_capacity(32);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

fn classify_extension(ext: &str) -> Option<(MediaKind, DlnaProfile)> {
    match ext {
        "mp3" => Some((MediaKind::Audio, DlnaProfile::Mp3)),
        "pcm" | "wav" => Some((MediaKind::Audio, DlnaProfile::Lpcm)),
        "jpg" | "jpeg" => Some((MediaKind::Photo, DlnaProfile::JpegMed)),
        "png" => Some((MediaKind::Photo, DlnaProfile::PngLrg)),
        "m1v" => Some((MediaKind::Video, DlnaProfile::Mpeg1)),
        "mpg" | "mpeg" => Some((MediaKind::AudioVideo, DlnaProfile::MpegPsPal)),
        _ => None,
    }
}

/// Extension-driven probe. Fills in the byte size from the file system and
/// classifies kind and profile from the extension; stream-level fields stay
/// unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionProbe;

#[async_trait]
impl MediaProbe for ExtensionProbe {
    async fn probe(&self, path: &Path) -> Result<Resource, ProbeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let (kind, profile) =
            classify_extension(&ext).ok_or_else(|| ProbeError::Unsupported(path.to_path_buf()))?;

        let meta = tokio::fs::metadata(path).await.map_err(|e| ProbeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Resource {
            path: path.to_path_buf(),
            size: meta.len(),
            duration_micros: None,
            bitrate: None,
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
            profile,
            kind,
        })
    }
}

/// Walk the share directory and populate the content tree: one replicated
/// folder per subdirectory, one item per recognized file. Unrecognized
/// files are skipped, unreadable directories are logged and skipped.
pub async fn scan_share(
    tree: &mut ContentTree,
    share_root: &Path,
    probe: &dyn MediaProbe,
) -> anyhow::Result<usize> {
    let share_root = share_root
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("share root {}: {e}", share_root.display()))?;

    let mut added = 0usize;
    let mut pending = vec![(share_root, tree.root_id().to_owned())];

    while let Some((dir, parent_id)) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                match tree.add_folder(&path.to_string_lossy(), &name, &parent_id) {
                    Ok(folder_id) => pending.push((path, folder_id)),
                    Err(e) => warn!("could not add folder {}: {e}", path.display()),
                }
            } else if file_type.is_file() {
                match probe.probe(&path).await {
                    Ok(resource) => match tree.add_item(resource, &parent_id) {
                        Ok(_) => added += 1,
                        Err(e) => warn!("could not add item {}: {e}", path.display()),
                    },
                    Err(ProbeError::Unsupported(_)) => {
                        debug!("ignoring non-media file {}", path.display());
                    }
                    Err(e) => warn!("probe failed: {e}"),
                }
            }
        }
    }

    Ok(added)
}
