//! Content-addressed asset store with a loopback HTTP transfer server.
//!
//! Extensions and consumers exchange bulk binary content (screenshots,
//! exports, generated files) by hash instead of inlining it into tool
//! payloads. The store deduplicates by content hash and the transfer
//! server moves bytes over loopback HTTP.
//!
//! # Architecture
//!
//! ```text
//! {asset_dir}/
//!   index.json            # metadata index, debounced writes
//!   3fa9c2...e1.png       # {hash}.{ext}, ext derived from MIME type
//!   81bb07...44.part      # in-flight upload, renamed into place on commit
//! ```
//!
//! Asset files and the index are always written to a temp path first and
//! atomically renamed, so a crash never leaves a half-written file under
//! a final name.

// Rust guideline compliant 2026-07

pub mod server;
pub mod store;

pub use server::AssetServer;
pub use store::AssetStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::ASSET_HASH_LEN;

/// Metadata for one stored asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Content hash; also the index key and filename stem.
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
    /// MIME type claimed at upload time.
    pub mime: String,
    /// Pixel width for image assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height for image assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// When the asset was first stored.
    pub created_at: DateTime<Utc>,
    /// Last time the asset was uploaded, downloaded, or touched.
    pub last_access: DateTime<Utc>,
}

impl AssetRecord {
    /// Filename of this asset inside the store directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.hash, extension_for_mime(&self.mime))
    }

    /// Download URL for this asset relative to a transfer server base.
    #[must_use]
    pub fn url(&self, base: &str) -> String {
        format!("{}/assets/{}", base.trim_end_matches('/'), self.hash)
    }
}

/// Compute the content hash of a byte buffer.
///
/// Uses the first 16 bytes of SHA-256 as hex (32 chars) — enough
/// uniqueness for a single-machine store, shorter than the full digest.
#[must_use]
pub fn asset_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Finish an incremental SHA-256 into the truncated hex form.
#[must_use]
pub fn finish_hash(hasher: Sha256) -> String {
    let hash = hasher.finalize();
    hash[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether a string is a well-formed asset hash (32 lowercase hex chars).
#[must_use]
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == ASSET_HASH_LEN
        && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// File extension for a MIME type.
///
/// Unknown types fall back to `bin`; the stored MIME is authoritative
/// when serving, the extension only helps humans poking at the directory.
#[must_use]
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/json" => "json",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/html" => "html",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => "bin",
    }
}

/// Best-effort inverse of [`extension_for_mime`], used when recovering
/// orphan files whose index entry was lost.
#[must_use]
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" => "text/html",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_hash_is_stable_and_truncated() {
        let a = asset_hash(b"hello world");
        let b = asset_hash(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), ASSET_HASH_LEN);
        assert!(is_valid_hash(&a));
    }

    #[test]
    fn test_incremental_hash_matches_buffer_hash() {
        let mut hasher = Sha256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(finish_hash(hasher), asset_hash(b"hello world"));
    }

    #[test]
    fn test_is_valid_hash() {
        assert!(is_valid_hash(&"a1".repeat(16)));
        assert!(!is_valid_hash(""));
        assert!(!is_valid_hash("short"));
        assert!(!is_valid_hash(&"A1".repeat(16)), "uppercase rejected");
        assert!(!is_valid_hash(&"g1".repeat(16)), "non-hex rejected");
        assert!(!is_valid_hash(&"a1".repeat(17)), "too long rejected");
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/x-unknown"), "bin");
    }

    #[test]
    fn test_mime_extension_mapping_round_trips() {
        // Orphan recovery derives a mime from the extension and then a
        // file name from that mime; the pair must agree for known types.
        for ext in ["png", "jpg", "gif", "webp", "svg", "json", "pdf", "txt", "html", "mp4", "webm"] {
            assert_eq!(extension_for_mime(mime_for_extension(ext)), ext);
        }
        assert_eq!(mime_for_extension("xyz"), "application/octet-stream");
    }

    #[test]
    fn test_record_file_name_and_url() {
        let record = AssetRecord {
            hash: "ab".repeat(16),
            size: 10,
            mime: "image/png".to_string(),
            width: Some(32),
            height: Some(32),
            created_at: Utc::now(),
            last_access: Utc::now(),
        };
        assert_eq!(record.file_name(), format!("{}.png", "ab".repeat(16)));
        assert_eq!(
            record.url("http://127.0.0.1:8123/"),
            format!("http://127.0.0.1:8123/assets/{}", "ab".repeat(16))
        );
    }

    #[test]
    fn test_record_serde_shape() {
        let record = AssetRecord {
            hash: "cd".repeat(16),
            size: 42,
            mime: "text/plain".to_string(),
            width: None,
            height: None,
            created_at: Utc::now(),
            last_access: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["hash"], record.hash);
        assert_eq!(json["size"], 42);
        assert_eq!(json["lastAccess"], serde_json::to_value(record.last_access).unwrap());
        assert!(json.get("width").is_none(), "absent dimensions are omitted");

        let back: AssetRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
