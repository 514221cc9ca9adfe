use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::chunk::ChunkRecord;
use crate::coords::{ChunkCoord, Vec3};
use crate::entity::RegistryError;

pub const SAVE_FORMAT_VERSION: u32 = 1;
const CHUNKS_DIR: &str = "chunks";
const META_FILE: &str = "world.json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {} at {json_path}", path.display())]
    Decode {
        path: PathBuf,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("chunk ({}, {}) holds {actual} tiles, expected {expected}", coord.x, coord.y)]
    TileCount {
        coord: ChunkCoord,
        expected: usize,
        actual: usize,
    },
    #[error("save format version {actual} is not supported (expected {expected})")]
    UnsupportedVersion { expected: u32, actual: u32 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Where a chunk goes when it leaves residency, and where it comes back from.
pub trait ChunkStorage: fmt::Debug {
    fn contains(&self, coord: ChunkCoord) -> bool;
    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, PersistenceError>;
    fn save(&mut self, coord: ChunkCoord, record: &ChunkRecord) -> Result<(), PersistenceError>;
}

/// Layout of one save directory:
/// `<root>/world.json` and `<root>/chunks/<chunk_x>/<chunk_y>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePaths {
    root: PathBuf,
}

impl SavePaths {
    pub fn new(save_root: impl Into<PathBuf>, save_name: &str) -> Self {
        Self {
            root: save_root.into().join(save_name),
        }
    }

    pub fn from_dir(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    pub fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        self.root
            .join(CHUNKS_DIR)
            .join(coord.x.to_string())
            .join(format!("{}.json", coord.y))
    }
}

#[derive(Debug, Clone)]
pub struct DiskChunkStore {
    paths: SavePaths,
}

impl DiskChunkStore {
    pub fn new(paths: SavePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SavePaths {
        &self.paths
    }
}

impl ChunkStorage for DiskChunkStore {
    fn contains(&self, coord: ChunkCoord) -> bool {
        self.paths.chunk_path(coord).is_file()
    }

    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, PersistenceError> {
        let path = self.paths.chunk_path(coord);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                warn!(path = %path.display(), error = %source, "chunk_read_failed");
                return Err(PersistenceError::Io { path, source });
            }
        };
        let record: ChunkRecord = parse_json(&path, &raw)?;
        debug!(chunk_x = coord.x, chunk_y = coord.y, "chunk_file_loaded");
        Ok(Some(record))
    }

    fn save(&mut self, coord: ChunkCoord, record: &ChunkRecord) -> Result<(), PersistenceError> {
        let path = self.paths.chunk_path(coord);
        write_json_atomic(&path, record)?;
        debug!(chunk_x = coord.x, chunk_y = coord.y, "chunk_file_saved");
        Ok(())
    }
}

/// Chunk storage kept in memory; records survive only as long as the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    records: HashMap<ChunkCoord, ChunkRecord>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ChunkStorage for MemoryChunkStore {
    fn contains(&self, coord: ChunkCoord) -> bool {
        self.records.contains_key(&coord)
    }

    fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, PersistenceError> {
        Ok(self.records.get(&coord).cloned())
    }

    fn save(&mut self, coord: ChunkCoord, record: &ChunkRecord) -> Result<(), PersistenceError> {
        self.records.insert(coord, record.clone());
        Ok(())
    }
}

/// World-level state that lives outside chunk files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMeta {
    pub format_version: u32,
    pub seed: u32,
    pub chunk_size: u32,
    pub next_entity_id: u64,
    pub viewpoint: Vec3,
}

impl SaveMeta {
    pub fn read(paths: &SavePaths) -> Result<Option<Self>, PersistenceError> {
        let path = paths.meta_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        let meta: SaveMeta = parse_json(&path, &raw)?;
        if meta.format_version != SAVE_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                expected: SAVE_FORMAT_VERSION,
                actual: meta.format_version,
            });
        }
        Ok(Some(meta))
    }

    pub fn write(&self, paths: &SavePaths) -> Result<(), PersistenceError> {
        write_json_atomic(&paths.meta_path(), self)
    }
}

fn parse_json<T: DeserializeOwned>(path: &Path, raw: &str) -> Result<T, PersistenceError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
        let json_path = error.path().to_string();
        let source = error.into_inner();
        warn!(
            path = %path.display(),
            json_path = %json_path,
            error = %source,
            "save_file_decode_failed"
        );
        PersistenceError::Decode {
            path: path.to_path_buf(),
            json_path,
            source,
        }
    })
}

/// Serialises `value` as pretty JSON next to `path` and renames it into place,
/// so readers never observe a half-written file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let io_error = |source: io::Error| {
        warn!(path = %path.display(), error = %source, "save_file_write_failed");
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, text.as_bytes()).map_err(io_error)?;
    if let Err(source) = replace_file(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(source));
    }
    Ok(())
}

fn replace_file(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    match fs::remove_file(final_path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    fs::rename(tmp_path, final_path)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("save");
    path.with_file_name(format!("{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, EntityRecord};
    use crate::world::tile::Tile;
    use tempfile::TempDir;

    fn record() -> ChunkRecord {
        ChunkRecord {
            id: 7,
            size: 1,
            location: Vec3::xy(-1.0, 2.0),
            tiles: vec![Tile::new(14, -1, 2, true)],
            entities: vec![EntityRecord {
                classname: "critter".to_string(),
                id: EntityId(3),
                location: Vec3::xy(-0.5, 2.5),
                prev_location: Vec3::xy(-0.5, 2.5),
                size: Vec3::new(0.6, 0.6, 0.8),
                solid: true,
                fields: serde_json::json!({ "bumps": 2 }),
            }],
        }
    }

    #[test]
    fn chunk_paths_are_keyed_by_coordinates() {
        let paths = SavePaths::new("/saves", "alpha");
        assert_eq!(
            paths.chunk_path(ChunkCoord::new(-1, 2)),
            PathBuf::from("/saves/alpha/chunks/-1/2.json")
        );
        assert_eq!(paths.meta_path(), PathBuf::from("/saves/alpha/world.json"));
    }

    #[test]
    fn disk_store_round_trips_records() {
        let temp = TempDir::new().expect("tempdir");
        let mut store = DiskChunkStore::new(SavePaths::new(temp.path(), "alpha"));
        let coord = ChunkCoord::new(-1, 2);

        assert!(!store.contains(coord));
        assert_eq!(store.load(coord).expect("load missing"), None);

        store.save(coord, &record()).expect("save");
        assert!(store.contains(coord));
        assert_eq!(store.load(coord).expect("load"), Some(record()));

        let mut updated = record();
        updated.entities.clear();
        store.save(coord, &updated).expect("overwrite");
        assert_eq!(store.load(coord).expect("reload"), Some(updated));
        let tmp = temp_path_for(&store.paths().chunk_path(coord));
        assert!(!tmp.exists());
    }

    #[test]
    fn decode_errors_report_json_path() {
        let temp = TempDir::new().expect("tempdir");
        let paths = SavePaths::from_dir(temp.path());
        let coord = ChunkCoord::new(0, 0);
        let path = paths.chunk_path(coord);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(
            &path,
            r#"{"id":1,"size":1,"location":{"x":0,"y":0,"z":0},"tiles":[{"id":"grass"}]}"#,
        )
        .expect("write");

        let error = DiskChunkStore::new(paths).load(coord).expect_err("bad tile id");
        match error {
            PersistenceError::Decode { json_path, .. } => assert_eq!(json_path, "tiles[0].id"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn meta_round_trip_and_version_check() {
        let temp = TempDir::new().expect("tempdir");
        let paths = SavePaths::new(temp.path(), "alpha");
        assert_eq!(SaveMeta::read(&paths).expect("missing"), None);

        let mut meta = SaveMeta {
            format_version: SAVE_FORMAT_VERSION,
            seed: 9,
            chunk_size: 64,
            next_entity_id: 120,
            viewpoint: Vec3::xy(10.0, -3.0),
        };
        meta.write(&paths).expect("write meta");
        assert_eq!(SaveMeta::read(&paths).expect("read meta"), Some(meta.clone()));

        meta.format_version = 99;
        meta.write(&paths).expect("write meta");
        assert!(matches!(
            SaveMeta::read(&paths),
            Err(PersistenceError::UnsupportedVersion { actual: 99, .. })
        ));
    }

    #[test]
    fn memory_store_keeps_latest_record() {
        let mut store = MemoryChunkStore::new();
        let coord = ChunkCoord::new(3, 3);
        store.save(coord, &record()).expect("save");
        store.save(coord, &record()).expect("save again");
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(coord).expect("load"), Some(record()));
    }
}
