use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::components::channel::ChannelState;
use crate::engine::components::echo::EchoBusState;
use crate::engine::components::master::MasterState;
use crate::engine::components::reverb::ReverbBusState;

/// A complete, named capture of the console: every channel strip,
/// both effect buses and the master bus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MixSnapshot {
    pub name: String,
    pub master: MasterState,
    pub reverb: ReverbBusState,
    pub echo: EchoBusState,
    /// Channel states keyed by channel name, so a snapshot survives
    /// stems being reordered in the song file.
    pub channels: BTreeMap<String, ChannelState>,
}

/// Snapshots for all songs, keyed by song id, optionally backed by a JSON file.
pub struct SnapshotStore {
    snapshots: HashMap<String, Vec<MixSnapshot>>,
    path: Option<PathBuf>,
}
impl SnapshotStore {
    /// An in-memory store that is never written to disk.
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            path: None,
        }
    }

    /// Open the store backed by the JSON file at `path`.
    ///
    /// A missing file simply means an empty store; it is created on the first
    /// [`Self::persist`].
    pub fn open(path: &Path) -> Result<Self, SnapshotIoError> {
        let snapshots = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| SnapshotIoError::Corrupt(path.to_path_buf(), format!("{e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SnapshotIoError::Io(path.to_path_buf(), format!("{e}"))),
        };

        Ok(Self {
            snapshots,
            path: Some(path.to_path_buf()),
        })
    }

    /// Store a snapshot under its song. A snapshot with the same name
    /// for the same song is replaced.
    pub fn add(&mut self, song_id: &str, snapshot: MixSnapshot) {
        let snapshots = self.snapshots.entry(song_id.to_owned()).or_default();
        match snapshots.iter_mut().find(|s| s.name == snapshot.name) {
            Some(existing) => *existing = snapshot,
            None => snapshots.push(snapshot),
        }
    }

    /// All snapshots stored for the song, in insertion order.
    pub fn list(&self, song_id: &str) -> &[MixSnapshot] {
        self.snapshots
            .get(song_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, song_id: &str, name: &str) -> Option<&MixSnapshot> {
        self.list(song_id).iter().find(|s| s.name == name)
    }

    /// Write the store back to its file. A no-op for in-memory stores.
    pub fn persist(&self) -> Result<(), SnapshotIoError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_string_pretty(&self.snapshots)
            .map_err(|e| SnapshotIoError::Io(path.clone(), format!("{e}")))?;
        fs::write(path, contents).map_err(|e| SnapshotIoError::Io(path.clone(), format!("{e}")))
    }
}
impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum SnapshotIoError {
    Io(PathBuf, String),
    Corrupt(PathBuf, String),
}
impl Display for SnapshotIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, msg) => write!(f, "Failed to access snapshot file {path:?}: {msg}"),
            Self::Corrupt(path, msg) => {
                write!(f, "Snapshot file {path:?} could not be parsed: {msg}")
            }
        }
    }
}
impl Error for SnapshotIoError {}
