//! Capture persistence.
//!
//! Two interchangeable backends keep a copy of every normalized frame:
//! - `DirectoryStore`: direct filesystem paths, `<pictures>/<album>/asl_image_<local time>.<ext>`.
//! - `CollectionStore`: a managed media collection. A pending record is inserted
//!   into the collection index first, the encoded image is streamed into the blob
//!   the record owns, and the record is finalised. A failed stream removes the
//!   record again.
//!
//! `select_store` picks one from the platform's storage capabilities.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use rusqlite::{params, Connection};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::config::StorageSettings;
use crate::frame::NormalizedFrame;
use crate::{ErrorKind, PipelineError};

/// File name prefix shared by both backends.
pub const FILE_PREFIX: &str = "asl_image_";

/// Name of the collection index database inside the media root.
pub const COLLECTION_INDEX: &str = "media_index.db";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    #[default]
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ImageEncoding::Png),
            "jpeg" | "jpg" => Some(ImageEncoding::Jpeg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "png",
            ImageEncoding::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }
}

/// Where a persisted image ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredImage {
    /// Filesystem path or collection URI.
    pub location: String,
    pub bytes: u64,
}

/// Persistence backend for normalized frames.
pub trait FrameStore: Send {
    fn name(&self) -> &'static str;

    /// Encode and persist one frame. Failures carry `PersistenceFailure`.
    fn persist(&mut self, frame: &NormalizedFrame, captured_at: DateTime<Local>)
        -> Result<StoredImage>;
}

fn persistence_failure(err: anyhow::Error) -> anyhow::Error {
    PipelineError::new(ErrorKind::PersistenceFailure, format!("{:#}", err)).into()
}

/// Encode a frame; JPEG is written at full quality.
pub fn encode_image(frame: &NormalizedFrame, encoding: ImageEncoding) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match encoding {
        ImageEncoding::Png => frame
            .image()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("encode PNG")?,
        ImageEncoding::Jpeg => JpegEncoder::new_with_quality(&mut bytes, 100)
            .encode_image(frame.image())
            .context("encode JPEG")?,
    }
    Ok(bytes)
}

// ----------------------------------------------------------------------------
// DirectoryStore
// ----------------------------------------------------------------------------

pub struct DirectoryStore {
    dir: PathBuf,
    encoding: ImageEncoding,
}

impl DirectoryStore {
    /// Store under `<pictures_dir>/<album>`. The directory is created on first save.
    pub fn new(pictures_dir: &Path, album: &str, encoding: ImageEncoding) -> Self {
        Self {
            dir: pictures_dir.join(album),
            encoding,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, captured_at: DateTime<Local>) -> PathBuf {
        let stem = format!("{}{}", FILE_PREFIX, captured_at.format("%Y%m%d_%H%M%S"));
        let ext = self.encoding.extension();
        let mut path = self.dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.{}", stem, n, ext));
            n += 1;
        }
        path
    }

    fn write(&self, frame: &NormalizedFrame, captured_at: DateTime<Local>) -> Result<StoredImage> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create capture directory {}", self.dir.display()))?;
        let bytes = encode_image(frame, self.encoding)?;
        let path = self.file_path(captured_at);
        std::fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(StoredImage {
            location: path.display().to_string(),
            bytes: bytes.len() as u64,
        })
    }
}

impl FrameStore for DirectoryStore {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn persist(
        &mut self,
        frame: &NormalizedFrame,
        captured_at: DateTime<Local>,
    ) -> Result<StoredImage> {
        self.write(frame, captured_at).map_err(persistence_failure)
    }
}

// ----------------------------------------------------------------------------
// CollectionStore
// ----------------------------------------------------------------------------

/// One finalised entry of the media collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionRecord {
    pub id: i64,
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub relative_path: String,
    pub size_bytes: i64,
    pub sha256: String,
}

pub struct CollectionStore {
    conn: Connection,
    media_root: PathBuf,
    relative_path: String,
    encoding: ImageEncoding,
}

impl CollectionStore {
    /// Open (or create) the collection rooted at `media_root`; images are filed
    /// under `Pictures/<album>`.
    pub fn open(media_root: &Path, album: &str, encoding: ImageEncoding) -> Result<Self> {
        std::fs::create_dir_all(media_root)
            .with_context(|| format!("create media root {}", media_root.display()))?;
        let conn = Connection::open(media_root.join(COLLECTION_INDEX))?;
        let mut store = Self {
            conn,
            media_root: media_root.to_path_buf(),
            relative_path: format!("Pictures/{}", album),
            encoding,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              display_name TEXT NOT NULL,
              mime_type TEXT NOT NULL,
              relative_path TEXT NOT NULL,
              date_added INTEGER NOT NULL,
              size_bytes INTEGER NOT NULL DEFAULT 0,
              sha256 TEXT,
              is_pending INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_images_date ON images(date_added);
            "#,
        )?;
        Ok(())
    }

    pub fn uri_for(id: i64) -> String {
        format!("content://asl/images/{}", id)
    }

    /// Finalised records, oldest first.
    pub fn records(&self) -> Result<Vec<CollectionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, display_name, mime_type, relative_path, size_bytes, sha256
            FROM images WHERE is_pending = 0 ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            Ok(CollectionRecord {
                id,
                uri: Self::uri_for(id),
                display_name: row.get(1)?,
                mime_type: row.get(2)?,
                relative_path: row.get(3)?,
                size_bytes: row.get(4)?,
                sha256: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Filesystem location of a record's blob.
    pub fn blob_path(&self, record: &CollectionRecord) -> PathBuf {
        self.media_root
            .join(&record.relative_path)
            .join(&record.display_name)
    }

    fn insert_pending(&self, display_name: &str, captured_at: DateTime<Local>) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO images(display_name, mime_type, relative_path, date_added, is_pending)
            VALUES (?1, ?2, ?3, ?4, 1)
            "#,
            params![
                display_name,
                self.encoding.mime_type(),
                self.relative_path,
                captured_at.timestamp()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn stream_blob(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create collection folder {}", parent.display()))?;
        }
        let mut out = std::fs::File::create(path)
            .with_context(|| format!("open output stream {}", path.display()))?;
        out.write_all(bytes)?;
        out.flush()?;
        Ok(())
    }

    fn write(&self, frame: &NormalizedFrame, captured_at: DateTime<Local>) -> Result<StoredImage> {
        let bytes = encode_image(frame, self.encoding)?;
        let ext = self.encoding.extension();
        let mut display_name = format!(
            "{}{}.{}",
            FILE_PREFIX,
            captured_at.timestamp_millis(),
            ext
        );
        let id = self.insert_pending(&display_name, captured_at)?;

        let folder = self.media_root.join(&self.relative_path);
        if folder.join(&display_name).exists() {
            display_name = format!(
                "{}{} ({}).{}",
                FILE_PREFIX,
                captured_at.timestamp_millis(),
                id,
                ext
            );
        }
        let blob = folder.join(&display_name);

        if let Err(e) = self.stream_blob(&blob, &bytes) {
            // Cleanup failures are logged; the stream error is what the caller sees.
            if let Err(del) = self
                .conn
                .execute("DELETE FROM images WHERE id = ?1", params![id])
            {
                log::warn!("collection: could not drop pending record {}: {}", id, del);
            }
            if let Err(rm) = std::fs::remove_file(&blob) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("collection: could not remove {}: {}", blob.display(), rm);
                }
            }
            return Err(e);
        }

        let digest = hex::encode(Sha256::digest(&bytes));
        self.conn.execute(
            r#"
            UPDATE images SET display_name = ?1, size_bytes = ?2, sha256 = ?3, is_pending = 0
            WHERE id = ?4
            "#,
            params![display_name, bytes.len() as i64, digest, id],
        )?;

        Ok(StoredImage {
            location: Self::uri_for(id),
            bytes: bytes.len() as u64,
        })
    }
}

impl FrameStore for CollectionStore {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn persist(
        &mut self,
        frame: &NormalizedFrame,
        captured_at: DateTime<Local>,
    ) -> Result<StoredImage> {
        self.write(frame, captured_at).map_err(persistence_failure)
    }
}

// ----------------------------------------------------------------------------
// Backend selection
// ----------------------------------------------------------------------------

/// Storage features the running platform offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageCapabilities {
    /// A managed media collection is available (scoped storage).
    pub scoped_storage: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Collection when scoped storage is available, directory otherwise.
    #[default]
    Auto,
    Directory,
    Collection,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(StorageBackend::Auto),
            "directory" => Some(StorageBackend::Directory),
            "collection" => Some(StorageBackend::Collection),
            _ => None,
        }
    }

    /// Resolve `Auto` against the platform.
    pub fn resolve(&self, caps: &StorageCapabilities) -> StorageBackend {
        match self {
            StorageBackend::Auto if caps.scoped_storage => StorageBackend::Collection,
            StorageBackend::Auto => StorageBackend::Directory,
            other => *other,
        }
    }
}

/// Open the configured persistence backend.
pub fn select_store(
    settings: &StorageSettings,
    caps: &StorageCapabilities,
) -> Result<Box<dyn FrameStore>> {
    let store: Box<dyn FrameStore> = match settings.backend.resolve(caps) {
        StorageBackend::Collection => Box::new(CollectionStore::open(
            &settings.root,
            &settings.album,
            settings.encoding,
        )?),
        _ => Box::new(DirectoryStore::new(
            &settings.root,
            &settings.album,
            settings.encoding,
        )),
    };
    log::info!(
        "capture storage: {} backend under {}",
        store.name(),
        settings.root.display()
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, s).single().unwrap()
    }

    #[test]
    fn directory_store_names_files_by_local_time() {
        let root = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(root.path(), "ASL_Images", ImageEncoding::Png);
        let stored = store
            .persist(&NormalizedFrame::filled(30), at(9, 5, 7))
            .unwrap();
        let expected = root.path().join("ASL_Images/asl_image_20260314_090507.png");
        assert_eq!(stored.location, expected.display().to_string());
        assert!(expected.exists());

        let reloaded = image::open(&expected).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (64, 64));
        assert_eq!(reloaded.get_pixel(0, 0).0, [30, 30, 30]);
    }

    #[test]
    fn directory_store_never_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(root.path(), "ASL_Images", ImageEncoding::Jpeg);
        let a = store.persist(&NormalizedFrame::filled(1), at(10, 0, 0)).unwrap();
        let b = store.persist(&NormalizedFrame::filled(2), at(10, 0, 0)).unwrap();
        assert_ne!(a.location, b.location);
        assert!(b.location.ends_with("asl_image_20260314_100000_1.jpg"));
    }

    #[test]
    fn directory_failure_is_persistence_failure() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut store = DirectoryStore::new(&blocker, "ASL_Images", ImageEncoding::Png);
        let err = store
            .persist(&NormalizedFrame::filled(0), at(1, 2, 3))
            .unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(ErrorKind::PersistenceFailure)
        );
    }

    #[test]
    fn collection_store_finalises_records() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            CollectionStore::open(root.path(), "ASL_Images", ImageEncoding::Png).unwrap();
        let stored = store
            .persist(&NormalizedFrame::filled(77), at(12, 0, 0))
            .unwrap();
        assert_eq!(stored.location, "content://asl/images/1");

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.mime_type, "image/png");
        assert_eq!(record.relative_path, "Pictures/ASL_Images");
        assert!(record.display_name.starts_with(FILE_PREFIX));
        assert_eq!(record.size_bytes as u64, stored.bytes);

        let blob = std::fs::read(store.blob_path(record)).unwrap();
        assert_eq!(record.sha256, hex::encode(Sha256::digest(&blob)));
    }

    #[test]
    fn collection_store_keeps_same_millisecond_captures_apart() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            CollectionStore::open(root.path(), "ASL_Images", ImageEncoding::Jpeg).unwrap();
        store.persist(&NormalizedFrame::filled(1), at(8, 0, 0)).unwrap();
        store.persist(&NormalizedFrame::filled(2), at(8, 0, 0)).unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].display_name, records[1].display_name);
        assert!(store.blob_path(&records[1]).exists());
    }

    #[test]
    fn failed_stream_removes_pending_record() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            CollectionStore::open(root.path(), "ASL_Images", ImageEncoding::Png).unwrap();
        // A file where the album folder should be makes the stream fail.
        std::fs::create_dir_all(root.path().join("Pictures")).unwrap();
        std::fs::write(root.path().join("Pictures/ASL_Images"), b"blocker").unwrap();

        let err = store
            .persist(&NormalizedFrame::filled(0), at(8, 0, 0))
            .unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(ErrorKind::PersistenceFailure)
        );
        let pending: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pending, 0);
        assert!(err.to_string().contains("create collection folder"), "{}", err);
    }

    #[test]
    fn stream_error_survives_failed_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let mut store =
            CollectionStore::open(root.path(), "ASL_Images", ImageEncoding::Png).unwrap();
        std::fs::create_dir_all(root.path().join("Pictures")).unwrap();
        std::fs::write(root.path().join("Pictures/ASL_Images"), b"blocker").unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER keep_images BEFORE DELETE ON images \
                 BEGIN SELECT RAISE(ABORT, 'images are read-only'); END;",
            )
            .unwrap();

        let err = store
            .persist(&NormalizedFrame::filled(0), at(8, 0, 1))
            .unwrap_err();
        assert_eq!(
            PipelineError::kind_of(&err),
            Some(ErrorKind::PersistenceFailure)
        );
        let text = err.to_string();
        assert!(text.contains("create collection folder"), "{}", text);
        assert!(!text.contains("read-only"), "{}", text);
        // The pending row stays behind and is never listed as finalised.
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn auto_backend_follows_scoped_storage() {
        let scoped = StorageCapabilities {
            scoped_storage: true,
        };
        let legacy = StorageCapabilities::default();
        assert_eq!(StorageBackend::Auto.resolve(&scoped), StorageBackend::Collection);
        assert_eq!(StorageBackend::Auto.resolve(&legacy), StorageBackend::Directory);
        assert_eq!(
            StorageBackend::Directory.resolve(&scoped),
            StorageBackend::Directory
        );
    }
}
