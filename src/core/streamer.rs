//! Schema descriptors ("streamer infos") and the process-wide registry
//!
//! Every file carries the descriptors of the classes it stores in one
//! StreamerInfo record. Descriptors are shared across files through a
//! [`StreamerRegistry`]: append-only, deduplicated by identity, guarded by a
//! single lock so files opened on different threads can register at once.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// On-disk layout description of one class version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamerInfo {
    /// Class name
    pub name: String,

    /// Class title
    pub title: String,

    /// Checksum of the class layout
    pub checksum: u32,

    /// Version of the described class
    pub class_version: i32,
}

impl StreamerInfo {
    pub fn new(name: impl Into<String>, class_version: i32, checksum: u32) -> Self {
        StreamerInfo {
            name: name.into(),
            title: String::new(),
            checksum,
            class_version,
        }
    }

    /// Registry identity: class name, class version and checksum
    pub fn id(&self) -> StreamerId {
        StreamerId {
            name: self.name.clone(),
            class_version: self.class_version,
            checksum: self.checksum,
        }
    }
}

/// Identity under which a descriptor is deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamerId {
    pub name: String,
    pub class_version: i32,
    pub checksum: u32,
}

#[derive(Debug, Default)]
struct Entries {
    index: HashMap<StreamerId, usize>,
    infos: Vec<Arc<StreamerInfo>>,
}

/// Append-only collection of schema descriptors shared between files
#[derive(Debug, Default)]
pub struct StreamerRegistry {
    entries: Mutex<Entries>,
}

static GLOBAL: OnceLock<Arc<StreamerRegistry>> = OnceLock::new();

impl StreamerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every file opened without an explicit one
    pub fn global() -> Arc<StreamerRegistry> {
        GLOBAL.get_or_init(|| Arc::new(StreamerRegistry::new())).clone()
    }

    /// Register a descriptor, returning the shared instance for its identity
    ///
    /// A descriptor already present is kept and returned unchanged.
    pub fn add(&self, info: impl Into<Arc<StreamerInfo>>) -> Arc<StreamerInfo> {
        let info = info.into();
        let mut entries = self.entries.lock();
        let id = info.id();
        if let Some(&i) = entries.index.get(&id) {
            return entries.infos[i].clone();
        }

        debug!(
            "Registering streamer info {} (version {}, checksum {:#x})",
            info.name, info.class_version, info.checksum
        );
        let i = entries.infos.len();
        entries.infos.push(info.clone());
        entries.index.insert(id, i);
        info
    }

    /// Descriptor for a class version, first registered wins on checksum clashes
    pub fn get(&self, name: &str, class_version: i32) -> Option<Arc<StreamerInfo>> {
        let entries = self.entries.lock();
        entries
            .infos
            .iter()
            .find(|si| si.name == name && si.class_version == class_version)
            .cloned()
    }

    /// Every registered descriptor, in registration order
    pub fn snapshot(&self) -> Vec<Arc<StreamerInfo>> {
        self.entries.lock().infos.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
