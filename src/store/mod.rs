//! Game persistence - keyed load/save/delete behind a trait
//!
//! The engine never locks; each store serializes access to its own records
//! and concurrent calls for different game ids are independent.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::state::GameRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("game '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Storage collaborator keyed by game id.
pub trait GameStore: Send + Sync {
    fn load(&self, id: &str) -> Result<GameRecord, StoreError>;
    fn save(&self, record: &GameRecord) -> Result<(), StoreError>;
    fn delete(&self, id: &str) -> Result<(), StoreError>;
    /// Name-alias lookup used as a fallback when the primary key misses.
    fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<GameRecord>, StoreError>;
}

impl<T: GameStore + ?Sized> GameStore for Box<T> {
    fn load(&self, id: &str) -> Result<GameRecord, StoreError> {
        (**self).load(id)
    }

    fn save(&self, record: &GameRecord) -> Result<(), StoreError> {
        (**self).save(record)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete(id)
    }

    fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<GameRecord>, StoreError> {
        (**self).find_by_name(owner_id, name)
    }
}

/// In-memory store, the default for tests and self-play runs.
#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<HashMap<String, GameRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameStore for MemoryStore {
    fn load(&self, id: &str) -> Result<GameRecord, StoreError> {
        let games = self.games.lock().unwrap_or_else(|e| e.into_inner());
        games
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, record: &GameRecord) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(|e| e.into_inner());
        games.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(|e| e.into_inner());
        games
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<GameRecord>, StoreError> {
        let games = self.games.lock().unwrap_or_else(|e| e.into_inner());
        Ok(games
            .values()
            .find(|g| g.owner_id == owner_id && g.name == name)
            .cloned())
    }
}

/// One pretty-printed JSON file per game under a directory.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }
}

impl GameStore for FileStore {
    fn load(&self, id: &str) -> Result<GameRecord, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, record: &GameRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        // write-then-rename so a crashed save never leaves a torn record
        let tmp = self.base_dir.join(format!("{}.json.tmp", record.id));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.path_for(&record.id))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<GameRecord>, StoreError> {
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let Ok(record) = serde_json::from_str::<GameRecord>(&contents) else {
                continue;
            };
            if record.owner_id == owner_id && record.name == name {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GameState, MapSize, PlayerRoster, WorldMap, PLAYER_TAG};

    fn record(id: &str, owner: &str, name: &str) -> GameRecord {
        let state = GameState {
            turn: 1,
            current_player: PLAYER_TAG.to_string(),
            player: PlayerRoster::default(),
            ai: vec![PlayerRoster::default()],
            map: WorldMap::unexplored(MapSize {
                width: 4,
                height: 4,
            }),
        };
        GameRecord::new(id, owner, name, "tutorial", state)
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.save(&record("g1", "u1", "First Empire")).unwrap();

        let loaded = store.load("g1").unwrap();
        assert_eq!(loaded.name, "First Empire");

        assert!(matches!(store.load("nope"), Err(StoreError::NotFound(_))));

        store.delete("g1").unwrap();
        assert!(store.load("g1").is_err());
    }

    #[test]
    fn memory_store_finds_by_owner_and_name() {
        let store = MemoryStore::new();
        store.save(&record("g1", "u1", "Alpha")).unwrap();
        store.save(&record("g2", "u2", "Alpha")).unwrap();

        let found = store.find_by_name("u2", "Alpha").unwrap().unwrap();
        assert_eq!(found.id, "g2");
        assert!(store.find_by_name("u3", "Alpha").unwrap().is_none());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.save(&record("g1", "u1", "Saved Empire")).unwrap();
        let loaded = store.load("g1").unwrap();
        assert_eq!(loaded.owner_id, "u1");

        let found = store.find_by_name("u1", "Saved Empire").unwrap();
        assert!(found.is_some());

        store.delete("g1").unwrap();
        assert!(matches!(store.load("g1"), Err(StoreError::NotFound(_))));
    }
}
