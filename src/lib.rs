//! # rootio - ROOT File Container Engine
//!
//! `rootio` reads and writes the container layer of the ROOT data format:
//! the file header, the keyed records it points at, the root directory and
//! its key table, the schema descriptors ("streamer infos") and the
//! free-space list.
//!
//! - **Open** runs a staged bootstrap (magic, header, directory, streamer
//!   infos, keys); failures name the stage that raised them
//! - **Create** lays out a fresh header and root directory, then commits the
//!   keys list, streamer infos and free segments on close
//! - **Large files** switch to 8-byte pointers once data passes 2 GB
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rootio::{File, Result, Value};
//!
//! # fn main() -> Result<()> {
//! let mut f = File::create("hello.root")?;
//! f.put("greeting", "", &Value::ObjString("hello".to_string()))?;
//! f.close()?;
//!
//! let mut f = File::open("hello.root")?;
//! for key in f.keys() {
//!     println!("{};{} ({})", key.name(), key.cycle(), key.class());
//! }
//! let greeting = f.get("greeting;1")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Builder
//!
//! ```rust,no_run
//! use rootio::{RootFileBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let f = RootFileBuilder::new()
//!     .path("/data/run-42.root")
//!     .title("Run 42")
//!     .create()?;
//! f.close()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    allocator, buffer, datime, directory, error, file, header, io, key, object, streamer,
    validation,
};

pub use crate::core::{
    allocator::{FreeBlock, FreeList},
    directory::Directory,
    error::{Result, RootError, Stage},
    file::File,
    header::Header,
    io::{ReadOnlyStorage, ReadWriteStorage, Storage},
    key::Key,
    object::{List, Named, Value},
    streamer::{StreamerInfo, StreamerRegistry},
    validation::NameCycle,
};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for opening or creating files with non-default settings
///
/// # Examples
///
/// ```rust,no_run
/// use rootio::{RootFileBuilder, StreamerRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(StreamerRegistry::new());
/// let f = RootFileBuilder::new()
///     .path("data.root")
///     .registry(registry.clone())
///     .open()?;
/// println!("{} descriptors registered", registry.len());
/// # Ok::<(), rootio::RootError>(())
/// ```
#[derive(Debug, Default)]
pub struct RootFileBuilder {
    path: Option<PathBuf>,
    title: Option<String>,
    registry: Option<Arc<StreamerRegistry>>,
}

impl RootFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the title of the root directory (create only)
    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Register schema descriptors here instead of the process-wide registry
    pub fn registry(mut self, registry: Arc<StreamerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn take_path(&mut self) -> Result<PathBuf> {
        self.path.take().ok_or_else(|| {
            RootError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path must be set",
            ))
        })
    }

    /// Create a new file, truncating any existing one
    pub fn create(mut self) -> Result<File> {
        let path = self.take_path()?;
        let title = self.title.unwrap_or_default();
        info!("Building file {} with title '{}'", path.display(), title);

        let registry = self.registry.unwrap_or_else(StreamerRegistry::global);
        File::create_with_registry(&path, &title, registry)
    }

    /// Open an existing file for reading
    pub fn open(mut self) -> Result<File> {
        let path = self.take_path()?;
        if self.title.is_some() {
            debug!("Ignoring title when opening {}", path.display());
        }

        let registry = self.registry.unwrap_or_else(StreamerRegistry::global);
        File::open_with_registry(&path, registry)
    }
}
