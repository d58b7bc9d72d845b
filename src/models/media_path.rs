//! Classification of requested object paths.
//!
//! Two closed enumerations drive request handling:
//! - [`Access`] decides whether a bearer token is required.
//! - [`AssetKind`] decides how long a full response may be cached.

use std::time::Duration;

/// Prefixes served without authentication.
const PUBLIC_PREFIXES: [&str; 3] = ["thumbnails/", "test/", "gallery/"];

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const DOCUMENT_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];
const STREAMING_EXTENSIONS: [&str; 3] = ["mp4", "mp3", "mov"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
}

impl Access {
    pub fn of(key: &str) -> Self {
        if PUBLIC_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
            Access::Public
        } else {
            Access::Protected
        }
    }
}

/// Caching category of an asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    /// Images, thumbnails and public test assets.
    Image,
    Document,
    /// Audio and video.
    Streaming,
    Other,
}

impl AssetKind {
    /// Categorize `key` by prefix and extension. Earlier categories win.
    pub fn of(key: &str) -> Self {
        let ext = extension(key);
        let ext = ext.as_deref();

        if has_extension(ext, &IMAGE_EXTENSIONS)
            || key.starts_with("thumbnails/")
            || key.starts_with("test/")
        {
            AssetKind::Image
        } else if key.starts_with("docs/") || has_extension(ext, &DOCUMENT_EXTENSIONS) {
            AssetKind::Document
        } else if key.starts_with("videos/")
            || key.starts_with("audios/")
            || has_extension(ext, &STREAMING_EXTENSIONS)
        {
            AssetKind::Streaming
        } else {
            AssetKind::Other
        }
    }

    /// Shared-cache lifetime for a full response of this kind.
    pub fn cache_ttl(self) -> Duration {
        match self {
            AssetKind::Image => Duration::from_secs(30 * 24 * 60 * 60),
            AssetKind::Document => Duration::from_secs(7 * 24 * 60 * 60),
            AssetKind::Streaming => Duration::from_secs(24 * 60 * 60),
            AssetKind::Other => Duration::from_secs(60 * 60),
        }
    }
}

/// A decoded object key together with its classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPath {
    pub key: String,
    pub access: Access,
    pub kind: AssetKind,
}

impl MediaPath {
    /// Derive the object key from a raw URI path: percent-decode, then drop a
    /// single leading slash. Returns `None` for an empty or undecodable path.
    pub fn from_uri_path(raw: &str) -> Option<Self> {
        let decoded = urlencoding::decode(raw).ok()?;
        let key = decoded.strip_prefix('/').unwrap_or(&*decoded);
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key))
    }

    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let access = Access::of(&key);
        let kind = AssetKind::of(&key);
        Self { key, access, kind }
    }

    pub fn is_public(&self) -> bool {
        self.access == Access::Public
    }
}

fn has_extension(ext: Option<&str>, set: &[&str]) -> bool {
    ext.map(|ext| set.iter().any(|candidate| *candidate == ext))
        .unwrap_or(false)
}

/// Lowercased extension of the last path segment.
fn extension(key: &str) -> Option<String> {
    let file = key.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_prefixes_are_public() {
        for key in ["thumbnails/abc.jpg", "test/q1/fig.png", "gallery/event.mp4"] {
            assert_eq!(Access::of(key), Access::Public, "{key}");
        }
    }

    #[test]
    fn everything_else_is_protected() {
        for key in [
            "videos/xyz.mp4",
            "docs/syllabus.pdf",
            "thumbnails",
            "Thumbnails/abc.jpg",
            "tests/x.png",
            "a/thumbnails/abc.jpg",
        ] {
            assert_eq!(Access::of(key), Access::Protected, "{key}");
        }
    }

    #[test]
    fn asset_kind_by_prefix_and_extension() {
        assert_eq!(AssetKind::of("thumbnails/a.bin"), AssetKind::Image);
        assert_eq!(AssetKind::of("test/q1/answer"), AssetKind::Image);
        assert_eq!(AssetKind::of("videos/cover.JPG"), AssetKind::Image);
        assert_eq!(AssetKind::of("docs/notes.txt"), AssetKind::Document);
        assert_eq!(AssetKind::of("uploads/report.docx"), AssetKind::Document);
        assert_eq!(AssetKind::of("videos/lesson-1"), AssetKind::Streaming);
        assert_eq!(AssetKind::of("audios/intro.ogg"), AssetKind::Streaming);
        assert_eq!(AssetKind::of("misc/clip.mov"), AssetKind::Streaming);
        assert_eq!(AssetKind::of("misc/data.json"), AssetKind::Other);
        assert_eq!(AssetKind::of("gallery/event.gif"), AssetKind::Other);
    }

    #[test]
    fn cache_ttls() {
        assert_eq!(AssetKind::Image.cache_ttl().as_secs(), 2_592_000);
        assert_eq!(AssetKind::Document.cache_ttl().as_secs(), 604_800);
        assert_eq!(AssetKind::Streaming.cache_ttl().as_secs(), 86_400);
        assert_eq!(AssetKind::Other.cache_ttl().as_secs(), 3_600);
    }

    #[test]
    fn from_uri_path_decodes_and_strips_one_slash() {
        let path = MediaPath::from_uri_path("/videos/intro%20lesson.mp4").unwrap();
        assert_eq!(path.key, "videos/intro lesson.mp4");
        assert_eq!(path.access, Access::Protected);
        assert_eq!(path.kind, AssetKind::Streaming);

        let path = MediaPath::from_uri_path("//double").unwrap();
        assert_eq!(path.key, "/double");
    }

    #[test]
    fn from_uri_path_rejects_empty_and_invalid() {
        assert!(MediaPath::from_uri_path("/").is_none());
        assert!(MediaPath::from_uri_path("").is_none());
        assert!(MediaPath::from_uri_path("/%FF%FE").is_none());
    }
}
