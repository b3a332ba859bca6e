//! Asset store: content-addressed files plus a persistent metadata index.
//!
//! The index lives in `index.json` next to the asset files. Mutations
//! mark the index dirty and (re)arm a short debounce timer, so bursts of
//! uploads produce one write instead of dozens; [`AssetStore::flush`]
//! forces the write at shutdown. Asset files arrive as `*.part` temp
//! files and are renamed into place only once their content hash is
//! known, so the store never contains a half-written asset under a
//! final name.

// Rust guideline compliant 2026-08

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::AssetRecord;
use crate::constants::{ASSET_INDEX_DEBOUNCE, ASSET_SWEEP_INTERVAL_CAP, PARTIAL_UPLOAD_MAX_AGE};
use crate::error::HubError;
use crate::timer::ResetTimer;

const INDEX_FILE: &str = "index.json";

/// What a startup reconcile found and repaired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index entries whose asset file had vanished.
    pub dropped_entries: usize,
    /// Asset files with no index entry, re-adopted into the index.
    pub recovered_orphans: usize,
    /// Abandoned `*.part` upload files.
    pub deleted_partials: usize,
}

impl ReconcileReport {
    fn is_clean(&self) -> bool {
        self.dropped_entries == 0 && self.recovered_orphans == 0 && self.deleted_partials == 0
    }
}

struct StoreInner {
    root: PathBuf,
    ttl: Duration,
    index: Mutex<HashMap<String, AssetRecord>>,
    index_timer: Mutex<ResetTimer>,
}

/// Shared handle to the content-addressed asset store.
///
/// Clones share the same index, so the hub event loop, the transfer
/// server, and the sweeper task all see one consistent view.
#[derive(Clone)]
pub struct AssetStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for AssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStore")
            .field("root", &self.inner.root)
            .field("assets", &self.len())
            .finish_non_exhaustive()
    }
}

impl AssetStore {
    /// Open the store at `root`, loading and reconciling the index.
    ///
    /// A corrupt index is renamed aside to `index.json.bad` and the store
    /// starts empty rather than refusing to start.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or scanned.
    pub fn open(root: PathBuf, ttl: Duration) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create asset directory: {}", root.display()))?;

        let index = load_index(&root);
        log::info!(
            "[Assets] Store opened at {} ({} asset(s) indexed)",
            root.display(),
            index.len()
        );

        let store = Self {
            inner: Arc::new(StoreInner {
                root,
                ttl,
                index: Mutex::new(index),
                index_timer: Mutex::new(ResetTimer::new()),
            }),
        };

        let report = store.reconcile(PARTIAL_UPLOAD_MAX_AGE)?;
        if !report.is_clean() {
            log::info!(
                "[Assets] Reconciled store: {} dead entries, {} orphans recovered, {} stale partials",
                report.dropped_entries,
                report.recovered_orphans,
                report.deleted_partials
            );
        }
        Ok(store)
    }

    /// Directory the store lives in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Fresh temp path for an in-flight upload, inside the store directory
    /// so the final rename never crosses a filesystem boundary.
    #[must_use]
    pub fn partial_path(&self) -> PathBuf {
        self.inner.root.join(format!("{}.part", uuid::Uuid::new_v4()))
    }

    /// Move a fully received upload into the store under its content hash.
    ///
    /// If the hash is already present the upload is a duplicate: the temp
    /// file is discarded and the existing record returned with a refreshed
    /// access time. Otherwise the temp file is renamed into place and a
    /// new record inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn commit_upload(
        &self,
        partial: &Path,
        hash: String,
        size: u64,
        mime: String,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<AssetRecord> {
        let now = Utc::now();

        let existing = {
            let mut index = lock(&self.inner.index);
            index.get_mut(&hash).map(|record| {
                record.last_access = now;
                record.clone()
            })
        };
        if let Some(record) = existing {
            let _ = fs::remove_file(partial);
            log::debug!("[Assets] Duplicate upload for {hash}, reusing existing file");
            self.schedule_index_write();
            return Ok(record);
        }

        let record = AssetRecord {
            hash: hash.clone(),
            size,
            mime,
            width,
            height,
            created_at: now,
            last_access: now,
        };
        let final_path = self.inner.root.join(record.file_name());
        fs::rename(partial, &final_path).with_context(|| {
            format!("Failed to move upload into place: {}", final_path.display())
        })?;

        lock(&self.inner.index).insert(hash.clone(), record.clone());
        self.schedule_index_write();
        log::info!("[Assets] Stored {hash} ({size} bytes, {})", record.mime);
        Ok(record)
    }

    /// Fast path for re-uploads of content the store already holds.
    ///
    /// If the record exists and its file is still on disk, refresh any
    /// caller-supplied metadata in place and return the record without
    /// re-hashing or rewriting bytes. Returns `None` when a real upload
    /// is needed.
    pub fn refresh_existing(
        &self,
        hash: &str,
        mime: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Option<AssetRecord> {
        let current = self.lookup(hash)?;
        let current_path = self.inner.root.join(current.file_name());
        if !current_path.exists() {
            return None;
        }

        let updated = {
            let mut index = lock(&self.inner.index);
            let record = index.get_mut(hash)?;
            if let Some(mime) = mime {
                record.mime = mime;
            }
            if width.is_some() {
                record.width = width;
            }
            if height.is_some() {
                record.height = height;
            }
            record.last_access = Utc::now();
            record.clone()
        };

        // A MIME change changes the derived file name; move the bytes
        // along so the record still points at them.
        let new_path = self.inner.root.join(updated.file_name());
        if new_path != current_path {
            if let Err(e) = fs::rename(&current_path, &new_path) {
                log::warn!(
                    "[Assets] Failed to rename {} to {}: {e}",
                    current_path.display(),
                    new_path.display()
                );
            }
        }

        self.schedule_index_write();
        log::debug!("[Assets] Refreshed existing asset {hash}");
        Some(updated)
    }

    /// Look up a record without touching its access time.
    #[must_use]
    pub fn lookup(&self, hash: &str) -> Option<AssetRecord> {
        lock(&self.inner.index).get(hash).cloned()
    }

    /// Batch lookup, refreshing the access time of every hit.
    ///
    /// The result is aligned with `hashes`: misses come back as `None`
    /// and never fail the batch.
    #[must_use]
    pub fn get_many(&self, hashes: &[String]) -> Vec<Option<AssetRecord>> {
        let now = Utc::now();
        let (records, any_hit) = {
            let mut index = lock(&self.inner.index);
            let mut any_hit = false;
            let records = hashes
                .iter()
                .map(|hash| {
                    index.get_mut(hash).map(|record| {
                        record.last_access = now;
                        any_hit = true;
                        record.clone()
                    })
                })
                .collect();
            (records, any_hit)
        };
        if any_hit {
            self.schedule_index_write();
        }
        records
    }

    /// Refresh an asset's access time, keeping it ahead of the TTL sweep.
    ///
    /// Returns `false` for unknown hashes.
    pub fn touch(&self, hash: &str) -> bool {
        let touched = {
            let mut index = lock(&self.inner.index);
            match index.get_mut(hash) {
                Some(record) => {
                    record.last_access = Utc::now();
                    true
                }
                None => false,
            }
        };
        if touched {
            self.schedule_index_write();
        }
        touched
    }

    /// Open an asset's content for streaming, refreshing its access time.
    ///
    /// Returns `Ok(None)` for hashes the store has never seen. If the
    /// index entry exists but the file is gone from disk, the entry is
    /// dropped and the asset reported as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidHashFormat`] for malformed hashes.
    pub async fn open_stream(
        &self,
        hash: &str,
    ) -> Result<Option<(tokio::fs::File, AssetRecord)>, HubError> {
        if !super::is_valid_hash(hash) {
            return Err(HubError::InvalidHashFormat(hash.to_string()));
        }
        let Some(record) = self.lookup(hash) else {
            return Ok(None);
        };

        let path = self.inner.root.join(record.file_name());
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                self.touch(hash);
                Ok(Some((file, record)))
            }
            Err(e) => {
                // File vanished under us; heal the index.
                log::warn!("[Assets] Index entry {hash} has no file ({e}), dropping");
                lock(&self.inner.index).remove(hash);
                self.schedule_index_write();
                Ok(None)
            }
        }
    }

    /// Delete an asset and its file. Returns `false` for unknown hashes.
    pub fn remove(&self, hash: &str) -> bool {
        let record = lock(&self.inner.index).remove(hash);
        match record {
            Some(record) => {
                let path = self.inner.root.join(record.file_name());
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("[Assets] Failed to delete {}: {e}", path.display());
                }
                self.schedule_index_write();
                log::info!("[Assets] Removed {hash}");
                true
            }
            None => false,
        }
    }

    /// All records, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<AssetRecord> {
        let mut records: Vec<AssetRecord> = lock(&self.inner.index).values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Number of stored assets.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.index).len()
    }

    /// Whether the store holds no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.index).is_empty()
    }

    /// Total bytes across all stored assets.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        lock(&self.inner.index).values().map(|r| r.size).sum()
    }

    /// Write the index to disk now, cancelling any pending debounced write.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn flush(&self) -> Result<()> {
        lock(&self.inner.index_timer).cancel();
        self.inner.write_index_now()
    }

    /// Remove every asset whose access time has fallen behind the TTL.
    ///
    /// `now` is a parameter so expiry is testable without waiting out the
    /// TTL. A zero TTL disables sweeping entirely. Returns how many
    /// assets were removed.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        if self.inner.ttl.is_zero() {
            return 0;
        }

        let expired: Vec<AssetRecord> = {
            let mut index = lock(&self.inner.index);
            let hashes: Vec<String> = index
                .values()
                .filter(|record| {
                    // Negative ages (clock skew) never expire.
                    (now - record.last_access)
                        .to_std()
                        .is_ok_and(|age| age > self.inner.ttl)
                })
                .map(|record| record.hash.clone())
                .collect();
            hashes.iter().filter_map(|h| index.remove(h)).collect()
        };

        let count = expired.len();
        for record in expired {
            let path = self.inner.root.join(record.file_name());
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("[Assets] Failed to delete expired {}: {e}", path.display());
            }
        }
        if count > 0 {
            log::info!("[Assets] Swept {count} expired asset(s)");
            self.schedule_index_write();
        }
        count
    }

    /// Spawn the periodic TTL sweeper.
    ///
    /// The sweep interval is the TTL capped at a ceiling so short TTLs
    /// expire promptly without a long TTL meaning a near-dormant sweeper.
    /// Returns `None` when the TTL is zero (sweeping disabled).
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.inner.ttl.is_zero() {
            log::info!("[Assets] TTL sweeping disabled");
            return None;
        }
        let period = self.inner.ttl.min(ASSET_SWEEP_INTERVAL_CAP);
        let store = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The immediate first tick would re-sweep right after reconcile.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep_once(Utc::now());
                    }
                }
            }
        }))
    }

    /// Bring the index and the directory back into agreement.
    ///
    /// Drops index entries whose file is missing, adopts orphan
    /// `<hash>.<ext>` files back into the index (so losing the index
    /// never strands readable bytes), and deletes `*.part` files older
    /// than `max_partial_age` — a live upload's temp file is younger
    /// than that.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be read.
    pub fn reconcile(&self, max_partial_age: Duration) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        {
            let mut index = lock(&self.inner.index);
            let dead: Vec<String> = index
                .values()
                .filter(|record| !self.inner.root.join(record.file_name()).exists())
                .map(|record| record.hash.clone())
                .collect();
            for hash in dead {
                log::warn!("[Assets] Dropping index entry with missing file: {hash}");
                index.remove(&hash);
                report.dropped_entries += 1;
            }
        }

        let entries = fs::read_dir(&self.inner.root).with_context(|| {
            format!("Failed to scan asset directory: {}", self.inner.root.display())
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(INDEX_FILE) {
                continue;
            }

            if name.ends_with(".part") {
                let stale = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|mtime| mtime.elapsed().ok())
                    .is_none_or(|age| age >= max_partial_age);
                if stale {
                    log::debug!("[Assets] Deleting stale partial upload: {name}");
                    let _ = fs::remove_file(&path);
                    report.deleted_partials += 1;
                }
                continue;
            }

            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if super::is_valid_hash(stem) => {
                    if lock(&self.inner.index).contains_key(stem) {
                        continue;
                    }
                    if self.adopt_orphan(&path, stem, &entry) {
                        report.recovered_orphans += 1;
                    }
                }
                _ => log::debug!("[Assets] Ignoring unrecognized file: {name}"),
            }
        }

        if report.dropped_entries > 0 || report.recovered_orphans > 0 {
            self.schedule_index_write();
        }
        Ok(report)
    }

    /// Re-index an asset file that has no record, using stat metadata and
    /// a MIME type guessed from the extension.
    fn adopt_orphan(&self, path: &Path, hash: &str, entry: &fs::DirEntry) -> bool {
        let meta = entry.metadata().ok();
        let size = meta.as_ref().map_or(0, std::fs::Metadata::len);
        let stamp = meta
            .and_then(|m| m.modified().ok())
            .map_or_else(Utc::now, DateTime::<Utc>::from);
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let record = AssetRecord {
            hash: hash.to_string(),
            size,
            mime: super::mime_for_extension(ext).to_string(),
            width: None,
            height: None,
            created_at: stamp,
            last_access: stamp,
        };
        // The record's derived file name must point at the actual bytes;
        // an unknown extension maps to `.bin`, so move the file along.
        let derived = self.inner.root.join(record.file_name());
        if derived != *path {
            if let Err(e) = fs::rename(path, &derived) {
                log::warn!("[Assets] Could not adopt orphan {}: {e}", path.display());
                return false;
            }
        }

        log::info!("[Assets] Recovered orphan asset {hash} ({size} bytes)");
        lock(&self.inner.index).insert(hash.to_string(), record);
        true
    }

    /// Arm (or re-arm) the debounced index write.
    fn schedule_index_write(&self) {
        let inner = Arc::clone(&self.inner);
        lock(&self.inner.index_timer).schedule(ASSET_INDEX_DEBOUNCE, move || {
            if let Err(e) = inner.write_index_now() {
                log::error!("[Assets] Failed to write index: {e}");
            }
        });
    }
}

impl StoreInner {
    /// Serialize the index and atomically replace `index.json`.
    fn write_index_now(&self) -> Result<()> {
        let records: Vec<AssetRecord> = lock(&self.index).values().cloned().collect();
        let json = serde_json::to_string_pretty(&records).context("Failed to encode index")?;

        let final_path = self.root.join(INDEX_FILE);
        let tmp_path = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("Failed to replace {}", final_path.display()))?;
        log::debug!("[Assets] Index written ({} record(s))", records.len());
        Ok(())
    }
}

/// Load the index file, starting empty (and setting the bad file aside)
/// when it is missing or unreadable.
fn load_index(root: &Path) -> HashMap<String, AssetRecord> {
    let path = root.join(INDEX_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => return HashMap::new(),
    };
    match serde_json::from_str::<Vec<AssetRecord>>(&content) {
        Ok(records) => records
            .into_iter()
            .map(|record| (record.hash.clone(), record))
            .collect(),
        Err(e) => {
            log::warn!("[Assets] Corrupt index at {}: {e}. Starting empty.", path.display());
            let _ = fs::rename(&path, root.join(format!("{INDEX_FILE}.bad")));
            HashMap::new()
        }
    }
}

/// Lock a store mutex, recovering the guard if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::asset_hash;
    use chrono::TimeDelta;

    const TTL: Duration = Duration::from_secs(3600);

    fn open_store(tmp: &tempfile::TempDir) -> AssetStore {
        AssetStore::open(tmp.path().join("assets"), TTL).unwrap()
    }

    /// Write `bytes` as a committed upload, returning the record.
    fn store_bytes(store: &AssetStore, bytes: &[u8], mime: &str) -> AssetRecord {
        let partial = store.partial_path();
        fs::write(&partial, bytes).unwrap();
        store
            .commit_upload(
                &partial,
                asset_hash(bytes),
                bytes.len() as u64,
                mime.to_string(),
                None,
                None,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_and_lookup() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);

        let record = store_bytes(&store, b"pixels", "image/png");
        assert_eq!(record.size, 6);
        assert_eq!(record.mime, "image/png");
        assert!(store.root().join(record.file_name()).exists());

        assert_eq!(store.lookup(&record.hash), Some(record.clone()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 6);
        assert!(store.lookup("0".repeat(32).as_str()).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_upload_is_deduplicated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);

        let first = store_bytes(&store, b"same bytes", "image/png");
        let partial = store.partial_path();
        fs::write(&partial, b"same bytes").unwrap();
        let second = store
            .commit_upload(&partial, first.hash.clone(), 10, "image/png".to_string(), None, None)
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(second.hash, first.hash);
        assert_eq!(second.created_at, first.created_at, "original record kept");
        assert!(second.last_access >= first.last_access);
        assert!(!partial.exists(), "duplicate temp file must be discarded");
    }

    #[tokio::test]
    async fn test_open_stream_returns_content_and_touches() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let record = store_bytes(&store, b"stream me", "text/plain");
        let before = store.lookup(&record.hash).unwrap().last_access;

        let (mut file, streamed) = store
            .open_stream(&record.hash)
            .await
            .unwrap()
            .expect("known asset");
        assert_eq!(streamed.hash, record.hash);

        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut content)
            .await
            .unwrap();
        assert_eq!(content, b"stream me");

        assert!(store.lookup(&record.hash).unwrap().last_access >= before);
    }

    #[tokio::test]
    async fn test_open_stream_unknown_and_invalid() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);

        assert!(store.open_stream(&"a1".repeat(16)).await.unwrap().is_none());
        match store.open_stream("not-a-hash").await {
            Err(HubError::InvalidHashFormat(_)) => {}
            other => panic!("Expected InvalidHashFormat, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_stream_heals_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let record = store_bytes(&store, b"doomed", "text/plain");

        fs::remove_file(store.root().join(record.file_name())).unwrap();
        assert!(store.open_stream(&record.hash).await.unwrap().is_none());
        assert!(store.lookup(&record.hash).is_none(), "dead entry dropped");
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_entry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let record = store_bytes(&store, b"temporary", "text/plain");

        assert!(store.remove(&record.hash));
        assert!(!store.root().join(record.file_name()).exists());
        assert!(store.is_empty());
        assert!(!store.remove(&record.hash), "second remove is a no-op");
    }

    #[tokio::test]
    async fn test_flush_persists_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("assets");

        let record = {
            let store = AssetStore::open(root.clone(), TTL).unwrap();
            let record = store_bytes(&store, b"durable", "application/json");
            store.flush().unwrap();
            record
        };

        let reopened = AssetStore::open(root, TTL).unwrap();
        assert_eq!(reopened.lookup(&record.hash).map(|r| r.size), Some(record.size));
    }

    #[tokio::test]
    async fn test_debounced_index_write_lands() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let index_path = store.root().join(INDEX_FILE);

        store_bytes(&store, b"debounce", "text/plain");
        assert!(!index_path.exists(), "write should be deferred");

        tokio::time::sleep(ASSET_INDEX_DEBOUNCE + Duration::from_millis(300)).await;
        assert!(index_path.exists(), "debounced write should have landed");
    }

    #[tokio::test]
    async fn test_corrupt_index_is_set_aside() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("assets");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(INDEX_FILE), b"{{{ definitely not json").unwrap();

        let store = AssetStore::open(root.clone(), TTL).unwrap();
        assert!(store.is_empty());
        assert!(root.join("index.json.bad").exists());
    }

    #[tokio::test]
    async fn test_reconcile_drops_dead_entries_and_recovers_orphans() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("assets");

        {
            let store = AssetStore::open(root.clone(), TTL).unwrap();
            let record = store_bytes(&store, b"will vanish", "text/plain");
            store.flush().unwrap();
            fs::remove_file(root.join(record.file_name())).unwrap();
        }
        // A file the index knows nothing about.
        let orphan_hash = "f0".repeat(16);
        fs::write(root.join(format!("{orphan_hash}.png")), b"orphan").unwrap();

        let store = AssetStore::open(root.clone(), TTL).unwrap();
        assert_eq!(store.len(), 1, "dead entry dropped, orphan adopted");
        let recovered = store.lookup(&orphan_hash).expect("orphan recovered");
        assert_eq!(recovered.size, 6);
        assert_eq!(recovered.mime, "image/png");
        assert!(root.join(format!("{orphan_hash}.png")).exists());
    }

    #[tokio::test]
    async fn test_reconcile_renames_orphan_with_unknown_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("assets");
        fs::create_dir_all(&root).unwrap();
        let hash = "e7".repeat(16);
        fs::write(root.join(format!("{hash}.weird")), b"mystery bytes").unwrap();

        let store = AssetStore::open(root.clone(), TTL).unwrap();
        let recovered = store.lookup(&hash).expect("orphan recovered");
        assert_eq!(recovered.mime, "application/octet-stream");
        // The file now lives under the name the record derives.
        assert!(root.join(format!("{hash}.bin")).exists());
        assert!(!root.join(format!("{hash}.weird")).exists());
        assert!(store.open_stream(&hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_unrecognized_files_alone() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("assets");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("notes.txt"), b"not an asset").unwrap();

        let store = AssetStore::open(root.clone(), TTL).unwrap();
        assert!(store.is_empty());
        assert!(root.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_refresh_existing_updates_metadata_in_place() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let record = store_bytes(&store, b"reusable", "application/octet-stream");

        let refreshed = store
            .refresh_existing(&record.hash, Some("image/png".to_string()), Some(100), Some(50))
            .expect("record exists with file");
        assert_eq!(refreshed.mime, "image/png");
        assert_eq!(refreshed.width, Some(100));
        assert_eq!(refreshed.height, Some(50));
        assert_eq!(refreshed.created_at, record.created_at);
        // File followed the mime-derived name change.
        assert!(store.root().join(refreshed.file_name()).exists());
        assert!(!store.root().join(record.file_name()).exists());

        // Omitted fields are left as they were.
        let unchanged = store.refresh_existing(&record.hash, None, None, None).unwrap();
        assert_eq!(unchanged.mime, "image/png");
        assert_eq!(unchanged.width, Some(100));

        assert!(store.refresh_existing(&"00".repeat(16), None, None, None).is_none());
    }

    #[tokio::test]
    async fn test_refresh_existing_requires_file_on_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let record = store_bytes(&store, b"ghost", "text/plain");
        fs::remove_file(store.root().join(record.file_name())).unwrap();

        assert!(
            store.refresh_existing(&record.hash, None, None, None).is_none(),
            "missing file forces a real upload"
        );
    }

    #[tokio::test]
    async fn test_get_many_aligns_hits_and_misses() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let a = store_bytes(&store, b"first", "text/plain");
        let b = store_bytes(&store, b"second", "text/plain");
        let before = store.lookup(&a.hash).unwrap().last_access;

        let hashes = vec![a.hash.clone(), "00".repeat(16), b.hash.clone()];
        let records = store.get_many(&hashes);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_ref().map(|r| r.hash.clone()), Some(a.hash.clone()));
        assert!(records[1].is_none());
        assert_eq!(records[2].as_ref().map(|r| r.hash.clone()), Some(b.hash));

        assert!(store.lookup(&a.hash).unwrap().last_access >= before, "hits touched");
    }

    #[tokio::test]
    async fn test_reconcile_partial_age_cutoff() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let partial = store.partial_path();
        fs::write(&partial, b"in flight").unwrap();

        // Generous cutoff: the fresh partial survives.
        let report = store.reconcile(Duration::from_secs(3600)).unwrap();
        assert_eq!(report.deleted_partials, 0);
        assert!(partial.exists());

        // Zero cutoff: everything counts as stale.
        let report = store.reconcile(Duration::ZERO).unwrap();
        assert_eq!(report.deleted_partials, 1);
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open_store(&tmp);
        let old = store_bytes(&store, b"old asset", "text/plain");
        let fresh = store_bytes(&store, b"fresh asset", "text/plain");

        // Backdate `old` past the TTL by rewriting its access time.
        {
            let mut index = lock(&store.inner.index);
            index.get_mut(&old.hash).unwrap().last_access =
                Utc::now() - TimeDelta::seconds(7200);
        }

        assert_eq!(store.sweep_once(Utc::now()), 1);
        assert!(store.lookup(&old.hash).is_none());
        assert!(!store.root().join(old.file_name()).exists());
        assert!(store.lookup(&fresh.hash).is_some());

        // Far enough in the future, the fresh one expires too.
        assert_eq!(store.sweep_once(Utc::now() + TimeDelta::seconds(7200)), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_sweep() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = AssetStore::open(tmp.path().join("assets"), Duration::ZERO).unwrap();
        store_bytes(&store, b"immortal", "text/plain");

        let far_future = Utc::now() + TimeDelta::days(3650);
        assert_eq!(store.sweep_once(far_future), 0);
        assert_eq!(store.len(), 1);
        assert!(store.spawn_sweeper(CancellationToken::new()).is_none());
    }
}
