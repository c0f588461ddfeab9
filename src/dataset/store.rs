//! The merged bin dataset: directory scan, merge, dedup and a lazily built,
//! immutable per-process copy.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::{info, warn};

use super::normalize::{decode_text, normalize_csv};
use super::types::{DatasetError, WasteBin};

/// Lazily loaded bin dataset rooted at one directory.
///
/// The first access scans and merges every CSV; later accesses reuse the
/// result. Concurrent first accesses load once. A failed load is not cached,
/// so the next access tries again.
pub struct BinStore {
    dir: PathBuf,
    cell: OnceLock<Vec<WasteBin>>,
    init: Mutex<()>,
}

impl BinStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Borrow the shared, immutable dataset, loading it on first use.
    pub fn shared(&self) -> Result<&[WasteBin], DatasetError> {
        if let Some(bins) = self.cell.get() {
            return Ok(bins);
        }

        let _guard = self.init.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(bins) = self.cell.get() {
            return Ok(bins);
        }

        let bins = load_dir(&self.dir)?;
        Ok(self.cell.get_or_init(|| bins))
    }

    /// An independent copy of the dataset; callers may filter or sort freely.
    pub fn all(&self) -> Result<Vec<WasteBin>, DatasetError> {
        Ok(self.shared()?.to_vec())
    }

    pub fn find(&self, id: &str) -> Result<Option<WasteBin>, DatasetError> {
        Ok(self.shared()?.iter().find(|b| b.id == id).cloned())
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Every `*.csv` directly under `dir`, in sorted order.
pub fn discover_csv(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(DatasetError::NoDataFound(dir.to_path_buf()));
        }
        Err(source) => {
            return Err(DatasetError::Io { file: dir.display().to_string(), source });
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Scan, normalise and merge every CSV in `dir`.
pub fn load_dir(dir: &Path) -> Result<Vec<WasteBin>, DatasetError> {
    let paths = discover_csv(dir)?;
    if paths.is_empty() {
        return Err(DatasetError::NoDataFound(dir.to_path_buf()));
    }
    load_files(&paths)
}

/// Normalise and merge the given files in order.
pub fn load_files(paths: &[PathBuf]) -> Result<Vec<WasteBin>, DatasetError> {
    if paths.is_empty() {
        return Err(DatasetError::NoDataFound(PathBuf::new()));
    }

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let file = path.display().to_string();
        let bytes = fs::read(path).map_err(|source| DatasetError::Io { file: file.clone(), source })?;
        let text = decode_text(&bytes, &file)?;
        sources.push(normalize_csv(text.as_bytes(), &file)?);
    }

    let total: usize = sources.iter().map(Vec::len).sum();
    let merged = merge_dedup(sources);
    if merged.len() < total {
        warn!(dropped = total - merged.len(), "duplicate bin ids across sources");
    }
    info!(files = paths.len(), bins = merged.len(), "bin dataset loaded");
    Ok(merged)
}

/// Concatenate sources, keeping the first occurrence of each id.
pub fn merge_dedup(sources: Vec<Vec<WasteBin>>) -> Vec<WasteBin> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .flatten()
        .filter(|bin| seen.insert(bin.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::types::Region;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_empty_dir_is_no_data() {
        let dir = TempDir::new().unwrap();
        write(&dir, "readme.txt", "not a csv");
        assert!(matches!(load_dir(dir.path()), Err(DatasetError::NoDataFound(_))));
    }

    #[test]
    fn test_missing_dir_is_no_data() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(load_dir(&missing), Err(DatasetError::NoDataFound(_))));
    }

    #[test]
    fn test_merge_with_overlapping_ids() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a_mapo.csv", "시군구명,위도,경도\n마포구,37.55,126.91\n마포구,37.56,126.92\n");
        // Same region and positions → same generated ids as file a
        write(&dir, "b_mapo_dup.csv", "자치구명,Y좌표,X좌표\n마포구,37.70,126.70\n");
        write(&dir, "c_guro.csv", "구명,위도,경도\n구로구,37.49,126.88\n");

        let bins = load_dir(dir.path()).unwrap();
        let ids: Vec<_> = bins.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["마포구-0", "마포구-1", "구로구-0"]);
        // first occurrence kept
        assert_eq!(bins[0].lat, 37.55);

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_bom_file_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bom.csv");
        let mut body = b"\xEF\xBB\xBF".to_vec();
        body.extend_from_slice("시군구명,위도,경도\n성북구,37.59,127.01\n".as_bytes());
        fs::write(&path, body).unwrap();

        let bins = load_files(&[path]).unwrap();
        assert_eq!(bins[0].region, Region::Seongbuk);
    }

    #[test]
    fn test_cp949_file_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guro_cp949.csv");
        // "시군구명,위도,경도\n구로구,37.5,126.9\n" in CP949
        let mut body = vec![0xBD, 0xC3, 0xB1, 0xBA, 0xB1, 0xB8, 0xB8, 0xED, b','];
        body.extend_from_slice(&[0xC0, 0xA7, 0xB5, 0xB5, b',', 0xB0, 0xE6, 0xB5, 0xB5, b'\n']);
        body.extend_from_slice(&[0xB1, 0xB8, 0xB7, 0xCE, 0xB1, 0xB8]);
        body.extend_from_slice(b",37.5,126.9\n");
        fs::write(&path, body).unwrap();

        let bins = load_files(&[path]).unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].region, Region::Guro);
        assert_eq!(bins[0].id, "구로구-0");
    }

    #[test]
    fn test_missing_column_propagates() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ok.csv", "시군구명,위도,경도\n마포구,37.55,126.91\n");
        write(&dir, "broken.csv", "시군구명,주소\n마포구,어딘가\n");
        assert!(matches!(load_dir(dir.path()), Err(DatasetError::MissingColumn { .. })));
    }

    #[test]
    fn test_store_loads_once_and_copies() {
        let dir = TempDir::new().unwrap();
        write(&dir, "bins.csv", "시군구명,위도,경도\n중랑구,37.60,127.09\n");
        let store = BinStore::new(dir.path());
        assert!(!store.is_loaded());

        let mut copy = store.all().unwrap();
        assert!(store.is_loaded());
        copy[0].lat = 0.0;
        copy.clear();

        // Removing the file after the first load changes nothing
        fs::remove_file(dir.path().join("bins.csv")).unwrap();
        let again = store.all().unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].lat, 37.60);
        assert!(store.find("중랑구-0").unwrap().is_some());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let dir = TempDir::new().unwrap();
        let store = BinStore::new(dir.path());
        assert!(store.all().is_err());
        write(&dir, "late.csv", "시군구명,위도,경도\n서초구,37.48,127.03\n");
        assert_eq!(store.all().unwrap().len(), 1);
    }
}
