use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};

use crate::types::{COLUMN_COUNT, DataKind, PHYSICAL_ROWS, WeatherCube};

pub const DEFAULT_BACKUP_DIR: &str = "backup";
pub const FORMAT_VERSION: u32 = 1;
const EXTENSION: &str = "cube";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to encode backup {path}: {source}")]
    Encode {
        path: PathBuf,
        source: bincode::Error,
    },
    #[error("Corrupt backup {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl BackupError {
    fn io(path: &Path, source: io::Error) -> Self {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        BackupError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// On-disk form of a cube. Field order matters: [`BackupInfo`] decodes a prefix.
#[derive(Debug, Serialize, Deserialize)]
struct BackupRecord {
    format_version: u32,
    kind: DataKind,
    created_at: DateTime<Utc>,
    years: Vec<i32>,
    rows: usize,
    cols: usize,
    cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub format_version: u32,
    pub kind: DataKind,
    pub created_at: DateTime<Utc>,
    pub years: Vec<i32>,
}

impl BackupInfo {
    pub fn time_len(&self) -> usize {
        self.years.len()
    }
}

/// Not safe for concurrent sessions sharing the directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dir_exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn create_dir(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.dir).map_err(|e| BackupError::io(&self.dir, e))?;
        log::info!("Created backup directory {}", self.dir.display());
        Ok(())
    }

    pub fn path_for(&self, kind: DataKind) -> PathBuf {
        self.dir.join(format!("{}.{}", kind.slug(), EXTENSION))
    }

    pub fn has_backup(&self, kind: DataKind) -> bool {
        self.path_for(kind).is_file()
    }

    pub fn write(&self, cube: &WeatherCube) -> Result<(), BackupError> {
        let path = self.path_for(cube.kind());
        let record = BackupRecord {
            format_version: FORMAT_VERSION,
            kind: cube.kind(),
            created_at: Utc::now(),
            years: cube.years().to_vec(),
            rows: PHYSICAL_ROWS,
            cols: COLUMN_COUNT,
            cells: cube.cells().to_vec(),
        };

        let file = File::create(&path).map_err(|e| BackupError::io(&path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut encoder, &record).map_err(|source| BackupError::Encode {
            path: path.clone(),
            source,
        })?;
        encoder
            .finish()
            .and_then(|mut w| w.flush())
            .map_err(|e| BackupError::io(&path, e))?;

        log::info!(
            "Wrote {} backup ({} time slices) to {}",
            cube.kind(),
            cube.time_len(),
            path.display()
        );
        Ok(())
    }

    /// `Ok(None)` when no backup of `kind` exists.
    pub fn read(&self, kind: DataKind) -> Result<Option<WeatherCube>, BackupError> {
        let path = self.path_for(kind);
        let Some(reader) = self.open(&path)? else {
            log::warn!("No {} backup at {}", kind, path.display());
            return Ok(None);
        };

        let record: BackupRecord = bincode::deserialize_from(reader)
            .map_err(|e| BackupError::corrupt(&path, e.to_string()))?;
        check_header(&path, kind, record.format_version, record.kind)?;
        if record.rows != PHYSICAL_ROWS || record.cols != COLUMN_COUNT {
            return Err(BackupError::corrupt(
                &path,
                format!("slice shape {}x{}", record.rows, record.cols),
            ));
        }

        let cube = WeatherCube::from_cells(record.kind, record.years, record.cells)
            .map_err(|e| BackupError::corrupt(&path, e.to_string()))?;
        log::info!(
            "Loaded {} backup from {} (written {})",
            kind,
            path.display(),
            record.created_at
        );
        Ok(Some(cube))
    }

    pub fn info(&self, kind: DataKind) -> Result<Option<BackupInfo>, BackupError> {
        let path = self.path_for(kind);
        let Some(reader) = self.open(&path)? else {
            return Ok(None);
        };
        let info: BackupInfo = bincode::deserialize_from(reader)
            .map_err(|e| BackupError::corrupt(&path, e.to_string()))?;
        check_header(&path, kind, info.format_version, info.kind)?;
        Ok(Some(info))
    }

    /// Removes the backup of `kind`; a missing file is not an error.
    pub fn destroy(&self, kind: DataKind) -> Result<(), BackupError> {
        let path = self.path_for(kind);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::warn!("Removed {} backup {}", kind, path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::io(&path, e)),
        }
    }

    /// Destroys the old backup, then writes `cube`.
    ///
    /// A failure after the destroy leaves no backup of that kind behind.
    pub fn overwrite(&self, cube: &WeatherCube) -> Result<(), BackupError> {
        self.replace(cube.kind(), || self.write(cube))
    }

    fn replace(
        &self,
        kind: DataKind,
        write: impl FnOnce() -> Result<(), BackupError>,
    ) -> Result<(), BackupError> {
        self.destroy(kind)?;
        write().inspect_err(|e| log::error!("{} backup lost: {}", kind, e))
    }

    fn open(&self, path: &Path) -> Result<Option<GzDecoder<BufReader<File>>>, BackupError> {
        match File::open(path) {
            Ok(file) => Ok(Some(GzDecoder::new(BufReader::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::io(path, e)),
        }
    }
}

fn check_header(
    path: &Path,
    expected: DataKind,
    version: u32,
    kind: DataKind,
) -> Result<(), BackupError> {
    if version != FORMAT_VERSION {
        return Err(BackupError::corrupt(
            path,
            format!("format version {version}, expected {FORMAT_VERSION}"),
        ));
    }
    if kind != expected {
        return Err(BackupError::corrupt(
            path,
            format!("holds {kind} data, expected {expected}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::sample_grid;
    use tempfile::TempDir;

    fn cube(kind: DataKind, tags: &[&str]) -> WeatherCube {
        let years = (1961..).take(tags.len()).collect();
        let grids = tags.iter().map(|t| sample_grid(t)).collect();
        WeatherCube::from_grids(kind, years, grids).unwrap()
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        let original = cube(DataKind::Temperature, &["a", "b,5", "Plzeňský"]);

        store.write(&original).unwrap();
        let restored = store.read(DataKind::Temperature).unwrap();

        assert_eq!(restored, Some(original));
        assert!(store.has_backup(DataKind::Temperature));
        assert!(!store.has_backup(DataKind::Precipitation));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        assert!(store.read(DataKind::Temperature).unwrap().is_none());

        let missing_dir = BackupStore::new(tmp.path().join("absent"));
        assert!(!missing_dir.dir_exists());
        assert!(missing_dir.read(DataKind::Precipitation).unwrap().is_none());
        assert!(missing_dir.info(DataKind::Precipitation).unwrap().is_none());
    }

    #[test]
    fn test_files_per_kind() {
        let store = BackupStore::new("backup");
        assert_eq!(store.path_for(DataKind::Temperature), Path::new("backup/temper.cube"));
        assert_eq!(store.path_for(DataKind::Precipitation), Path::new("backup/precip.cube"));
    }

    #[test]
    fn test_destroy_and_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        store.destroy(DataKind::Precipitation).unwrap();

        store.write(&cube(DataKind::Precipitation, &["old"])).unwrap();
        store.write(&cube(DataKind::Temperature, &["keep"])).unwrap();
        let fresh = cube(DataKind::Precipitation, &["new", "newer"]);
        store.overwrite(&fresh).unwrap();

        assert_eq!(store.read(DataKind::Precipitation).unwrap(), Some(fresh));
        assert!(store.has_backup(DataKind::Temperature));

        store.destroy(DataKind::Precipitation).unwrap();
        assert!(!store.has_backup(DataKind::Precipitation));
        assert!(store.has_backup(DataKind::Temperature));
    }

    #[test]
    fn test_info_reads_header() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        store.write(&cube(DataKind::Temperature, &["a", "b"])).unwrap();

        let info = store.info(DataKind::Temperature).unwrap().unwrap();
        assert_eq!(info.kind, DataKind::Temperature);
        assert_eq!(info.years, vec![1961, 1962]);
        assert_eq!(info.time_len(), 2);
        assert_eq!(info.format_version, FORMAT_VERSION);
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        fs::write(store.path_for(DataKind::Temperature), b"not a backup").unwrap();

        let err = store.read(DataKind::Temperature).unwrap_err();
        assert!(matches!(err, BackupError::Corrupt { .. }));
    }

    #[test]
    fn test_kind_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        store.write(&cube(DataKind::Temperature, &["a"])).unwrap();
        fs::copy(
            store.path_for(DataKind::Temperature),
            store.path_for(DataKind::Precipitation),
        )
        .unwrap();

        let err = store.read(DataKind::Precipitation).unwrap_err();
        assert!(matches!(err, BackupError::Corrupt { .. }));
    }

    #[test]
    fn test_write_into_plain_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("plain");
        fs::write(&plain, b"not a directory").unwrap();
        let store = BackupStore::new(&plain);

        let err = store.write(&cube(DataKind::Temperature, &["a"])).unwrap_err();

        assert!(matches!(err, BackupError::Io { ref path, .. } if path.starts_with(&plain)));
        assert!(!store.has_backup(DataKind::Temperature));
    }

    #[test]
    fn test_failed_write_after_destroy_loses_backup() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        store.write(&cube(DataKind::Temperature, &["old"])).unwrap();
        let plain = tmp.path().join("plain");
        fs::write(&plain, b"not a directory").unwrap();
        let broken = BackupStore::new(&plain);
        let fresh = cube(DataKind::Temperature, &["new"]);

        let err = store
            .replace(DataKind::Temperature, || broken.write(&fresh))
            .unwrap_err();

        assert!(matches!(err, BackupError::Io { .. }));
        assert!(!store.has_backup(DataKind::Temperature));
        assert!(store.read(DataKind::Temperature).unwrap().is_none());
    }

    #[test]
    fn test_create_dir() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path().join("nested").join("backup"));
        assert!(!store.dir_exists());
        store.create_dir().unwrap();
        assert!(store.dir_exists());
    }
}
