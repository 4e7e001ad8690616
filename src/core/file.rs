//! File handle: open/create, bootstrap sequencing and commit on close
//!
//! Opening a file runs a fixed sequence, each step depending on the previous
//! one: magic check, header decode, root directory record, StreamerInfo
//! list, keys list. The last three are delegated to collaborators and their
//! failures are reported with the [`Stage`] that raised them.
//!
//! Files created through this handle are committed when closed (or dropped):
//! the StreamerInfo list, the keys list, the directory record, the free
//! segments and finally the header are rewritten.

use crate::allocator::{FreeBlock, FreeList};
use crate::buffer::{tstring_sizeof, RBuffer, WBuffer};
use crate::datime::Datime;
use crate::directory::Directory;
use crate::error::{Result, RootError, Stage};
use crate::header::{
    Header, K_BEGIN, K_START_BIG_FILE, LARGE_FILE_FLAG, LARGE_HEADER_SIZE, ROOT_VERSION, UUID_SIZE,
};
use crate::io::{ReadOnlyStorage, ReadWriteStorage, Storage};
use crate::key::Key;
use crate::object::{self, List, Value};
use crate::streamer::{StreamerInfo, StreamerRegistry};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Class name of the file's own records
pub const FILE_CLASS: &str = "TFile";

const STREAMER_INFO_NAME: &str = "StreamerInfo";
const STREAMER_INFO_TITLE: &str = "Doubly linked list";

/// Identity of an open file
///
/// Keys hold a weak reference to it; once the file is closed the token is
/// gone and the keys report themselves detached.
#[derive(Debug)]
pub struct FileToken {
    id: u64,
}

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

impl FileToken {
    fn new() -> Arc<Self> {
        Arc::new(FileToken {
            id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

fn new_uuid() -> [u8; UUID_SIZE] {
    let mut uuid = [0u8; UUID_SIZE];
    // 2-byte uuid version, then the 16 bytes
    uuid[1] = 1;
    uuid[2..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    uuid
}

/// An open ROOT file
pub struct File {
    storage: Option<Box<dyn Storage>>,
    id: String,
    token: Arc<FileToken>,
    header: Header,
    dir: Directory,
    si_key: Option<Key>,
    sinfos: Vec<Arc<StreamerInfo>>,
    blocks: FreeList,
    registry: Arc<StreamerRegistry>,
    writable: bool,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("header", &self.header)
            .field("keys", &self.dir.keys.len())
            .field("writable", &self.writable)
            .finish()
    }
}

impl File {
    fn empty(
        storage: Box<dyn Storage>,
        id: &str,
        registry: Arc<StreamerRegistry>,
        writable: bool,
    ) -> Self {
        File {
            storage: Some(storage),
            id: id.to_string(),
            token: FileToken::new(),
            header: Header::new(),
            dir: Directory::default(),
            si_key: None,
            sinfos: Vec::new(),
            blocks: FreeList::new(),
            registry,
            writable,
        }
    }

    /// Open an existing file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_registry(path, StreamerRegistry::global())
    }

    pub(crate) fn open_with_registry<P: AsRef<Path>>(
        path: P,
        registry: Arc<StreamerRegistry>,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ROOT file: {}", path.display());
        let storage = ReadOnlyStorage::open(path)?;
        Self::from_storage(Box::new(storage), &path.display().to_string(), registry)
    }

    /// Read a file from any seekable source
    pub fn from_reader<R>(reader: R, name: &str) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        Self::from_storage(
            Box::new(ReadOnlyStorage::new(reader)),
            name,
            StreamerRegistry::global(),
        )
    }

    /// Open a file over a storage adapter, registering descriptors in `registry`
    pub fn from_storage(
        storage: Box<dyn Storage>,
        name: &str,
        registry: Arc<StreamerRegistry>,
    ) -> Result<Self> {
        let mut file = File::empty(storage, name, registry, false);
        file.bootstrap()?;
        info!(
            "Opened {}: version {}, {} keys, {} streamer infos",
            file.id,
            file.version(),
            file.dir.keys.len(),
            file.sinfos.len()
        );
        Ok(file)
    }

    /// Create a new file, truncating any existing one
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_registry(path, "", StreamerRegistry::global())
    }

    pub(crate) fn create_with_registry<P: AsRef<Path>>(
        path: P,
        title: &str,
        registry: Arc<StreamerRegistry>,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!("Creating ROOT file: {}", path.display());
        let storage = ReadWriteStorage::create(path)?;
        Self::create_with(
            Box::new(storage),
            &path.display().to_string(),
            title,
            registry,
        )
    }

    /// Create a file over a writable storage adapter
    pub fn create_with(
        storage: Box<dyn Storage>,
        name: &str,
        title: &str,
        registry: Arc<StreamerRegistry>,
    ) -> Result<Self> {
        let mut file = File::empty(storage, name, registry, true);
        file.dir = Directory::new(name, title);
        if let Err(e) = file.write_header() {
            file.writable = false;
            return Err(e);
        }
        Ok(file)
    }

    fn bootstrap(&mut self) -> Result<()> {
        self.read_header()?;

        {
            let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
            self.dir
                .read_dir_info(storage, &self.header)
                .map_err(RootError::at_stage(Stage::DirectoryInfos))?;
        }

        self.read_streamer_info()
            .map_err(RootError::at_stage(Stage::StreamerInfos))?;

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        self.dir
            .read_keys(storage, &self.token)
            .map_err(RootError::at_stage(Stage::FileKeys))?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        let mut buf = vec![0u8; LARGE_HEADER_SIZE];
        let n = storage.read_at(&mut buf, 0)?;
        buf.truncate(n);

        let header = Header::decode(&buf).map_err(|e| match e {
            RootError::InvalidMagic(_) => RootError::InvalidMagic(self.id.clone()),
            other => other,
        })?;
        header.validate()?;

        debug!(
            "Header: version={} begin={} end={} units={} seek_info={}",
            header.version, header.begin, header.end, header.units, header.seek_info
        );
        self.header = header;
        Ok(())
    }

    fn read_streamer_info(&mut self) -> Result<()> {
        let (pos, end) = (self.header.seek_info, self.header.end);
        if pos <= 0 || pos >= end {
            return Err(RootError::InvalidStreamerInfoPointer { pos, end });
        }
        let nbytes = self.header.nbytes_info;
        if nbytes <= 0 || pos + nbytes as i64 > end {
            return Err(RootError::Format(format!(
                "invalid StreamerInfo record length {}",
                nbytes
            )));
        }

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        let mut data = vec![0u8; nbytes as usize];
        let n = storage.read_at(&mut data, pos as u64)?;
        if n != data.len() {
            return Err(RootError::ShortRead {
                expected: data.len(),
                actual: n,
            });
        }

        let mut key = Key::unmarshal(&mut RBuffer::new(&data))?;
        if key.seek_key != pos {
            return Err(RootError::SeekKeyMismatch {
                expected: pos,
                found: key.seek_key,
            });
        }
        key.attach(&self.token);

        let payload = key.payload_of(&data)?;
        let list = match object::decode(&key.class, payload, key.keylen as i64)? {
            Value::List(list) => list,
            other => {
                return Err(RootError::Format(format!(
                    "StreamerInfo record holds a {} instead of a list",
                    other.class()
                )))
            }
        };

        let mut sinfos = Vec::with_capacity(list.items.len());
        for item in list.items {
            match item {
                Value::StreamerInfo(si) => {
                    self.registry.add(si.clone());
                    sinfos.push(si);
                }
                other => warn!("Skipping {} entry in StreamerInfo list", other.class()),
            }
        }

        debug!("Read {} streamer infos", sinfos.len());
        self.sinfos = sinfos;
        self.si_key = Some(key);
        Ok(())
    }

    /// Lay out the header and the root directory of a new file
    fn write_header(&mut self) -> Result<()> {
        let version = ROOT_VERSION;
        // pointer width is fixed before `end` is known
        let wide = version >= LARGE_FILE_FLAG;

        self.header = Header::new();
        self.header.version = version;
        self.header.uuid = new_uuid();
        self.dir.uuid = self.header.uuid;
        self.blocks = FreeList::with_block(K_BEGIN, K_START_BIG_FILE);

        let namelen = tstring_sizeof(&self.dir.name) + tstring_sizeof(&self.dir.title);
        let nbytes = namelen + Directory::record_size(version) as i32;
        let (name, title) = (self.dir.name.clone(), self.dir.title.clone());
        let key = self.new_key(&name, &title, FILE_CLASS, nbytes)?;

        self.header.nbytes_name = key.keylen as i32 + namelen;
        self.dir.nbytes_name = self.header.nbytes_name;
        self.dir.seek_dir = key.seek_key;
        self.header.seek_free = 0;
        self.header.nbytes_free = 0;
        self.header.end = self.blocks.trailing_first().unwrap_or(K_BEGIN);
        self.header.nfree = self.blocks.len() as i32;
        self.header.units = 4;
        self.header.fold_large_file();
        self.header.compression = 1;

        let mut w = WBuffer::new();
        self.header.encode_as(&mut w, version, wide);
        let header = w.into_bytes()?;
        let payload = self.directory_payload()?;

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        storage.write_at(&header, 0)?;
        key.write_record(storage, &payload)?;

        debug!(
            "Created {}: nbytes_name={} end={}",
            self.id, self.header.nbytes_name, self.header.end
        );
        Ok(())
    }

    fn directory_payload(&self) -> Result<Vec<u8>> {
        let mut w = WBuffer::new();
        w.write_string(&self.dir.name);
        w.write_string(&self.dir.title);
        self.dir.marshal(&mut w);
        w.into_bytes()
    }

    /// Allocate space for a record with an `objlen`-byte payload
    fn new_key(&mut self, name: &str, title: &str, class: &str, objlen: i32) -> Result<Key> {
        let mut key = Key::new(name, title, class, objlen, false);
        if self.header.end + key.nbytes as i64 > K_START_BIG_FILE {
            key = Key::new(name, title, class, objlen, true);
        }

        let nbytes = key.nbytes as i64;
        key.seek_key = self
            .blocks
            .allocate(nbytes)
            .ok_or(RootError::OutOfSpace(nbytes))?;
        key.seek_pdir = self.header.begin;
        if let Some(end) = self.blocks.trailing_first() {
            self.header.end = self.header.end.max(end);
        }
        key.attach(&self.token);
        Ok(key)
    }

    /// Stream `value` into a new record
    fn write_object(&mut self, name: &str, title: &str, value: &Value, cycle: i16) -> Result<Key> {
        let class = value.class().to_string();
        let sized = Key::new(name, title, &class, 0, false);
        let mut payload = object::encode(value, sized.keylen as i64)?;

        let mut key = self.new_key(name, title, &class, payload.len() as i32)?;
        if key.keylen != sized.keylen {
            // tags are relative to the key record; same length, new values
            payload = object::encode(value, key.keylen as i64)?;
        }
        key.cycle = cycle;

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        key.write_record(storage, &payload)?;
        debug!(
            "Wrote {};{} ({}) at {}: {} bytes",
            name, cycle, class, key.seek_key, key.nbytes
        );
        Ok(key)
    }

    /// Store `value` under `name`, as the next cycle of that name
    pub fn put(&mut self, name: &str, title: &str, value: &Value) -> Result<&Key> {
        if !self.writable {
            return Err(RootError::ReadOnly);
        }
        if self.storage.is_none() {
            return Err(RootError::Closed);
        }

        let cycle = self.dir.next_cycle(name)?;
        let key = self.write_object(name, title, value, cycle)?;
        self.dir.keys.push(key);
        let last = self.dir.keys.len() - 1;
        Ok(&self.dir.keys[last])
    }

    /// Record a class descriptor to be written with the file
    pub fn add_streamer_info(&mut self, info: StreamerInfo) -> Result<Arc<StreamerInfo>> {
        if !self.writable {
            return Err(RootError::ReadOnly);
        }
        let id = info.id();
        if let Some(si) = self.sinfos.iter().find(|si| si.id() == id) {
            return Ok(si.clone());
        }
        let si = Arc::new(info);
        self.registry.add(si.clone());
        self.sinfos.push(si.clone());
        Ok(si)
    }

    /// Object stored under a `name[;cycle]` specification
    pub fn get(&mut self, namecycle: &str) -> Result<Value> {
        let key = self.dir.key(namecycle)?.clone();
        self.read_object(&key)
    }

    /// Load and decode the object a key describes
    pub fn read_object(&mut self, key: &Key) -> Result<Value> {
        if !key.belongs_to(&self.token) {
            return Err(RootError::Closed);
        }
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        let payload = key.load_payload(storage)?;
        object::decode(&key.class, &payload, key.keylen as i64)
    }

    /// Load the free segments record into the free list
    ///
    /// Segments are read until one extends past the header's `end`.
    pub fn read_free_segments(&mut self) -> Result<&FreeList> {
        let (seek, nbytes) = (self.header.seek_free, self.header.nbytes_free);
        if seek <= 0 || nbytes <= 0 {
            return Ok(&self.blocks);
        }

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        let mut data = vec![0u8; nbytes as usize];
        let n = storage.read_at(&mut data, seek as u64)?;
        if n != data.len() {
            return Err(RootError::ShortRead {
                expected: data.len(),
                actual: n,
            });
        }

        let key = Key::unmarshal(&mut RBuffer::new(&data))?;
        if key.seek_key != seek {
            return Err(RootError::SeekKeyMismatch {
                expected: seek,
                found: key.seek_key,
            });
        }

        let mut r = RBuffer::new(key.payload_of(&data)?);
        let mut blocks = FreeList::new();
        while r.remaining() > 0 {
            let blk = FreeBlock::unmarshal(&mut r)?;
            if blk.first == 0 && blk.last == 0 {
                break;
            }
            blocks.release(blk.first, blk.last);
            if blk.last > self.header.end {
                break;
            }
        }

        debug!("Read {} free segments", blocks.len());
        self.blocks = blocks;
        Ok(&self.blocks)
    }

    fn commit(&mut self) -> Result<()> {
        self.write_streamer_info()?;
        self.write_keys_list()?;
        self.write_dir_header()?;
        self.write_free_segments()?;
        self.write_file_header()?;
        info!(
            "Committed {}: {} keys, end={}",
            self.id,
            self.dir.keys.len(),
            self.header.end
        );
        Ok(())
    }

    fn write_streamer_info(&mut self) -> Result<()> {
        let list = Value::List(List {
            name: String::new(),
            items: self.sinfos.iter().cloned().map(Value::StreamerInfo).collect(),
        });
        let key = self.write_object(STREAMER_INFO_NAME, STREAMER_INFO_TITLE, &list, 1)?;
        self.header.seek_info = key.seek_key;
        self.header.nbytes_info = key.nbytes;
        self.si_key = Some(key);
        Ok(())
    }

    fn write_keys_list(&mut self) -> Result<()> {
        let nbytes = self.dir.keys_list_size();
        let (name, title) = (self.dir.name.clone(), self.dir.title.clone());
        let key = self.new_key(&name, &title, FILE_CLASS, nbytes)?;

        let mut w = WBuffer::with_limit(nbytes as usize);
        self.dir.marshal_keys_list(&mut w);
        let payload = w.into_bytes()?;

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        key.write_record(storage, &payload)?;
        self.dir.seek_keys = key.seek_key;
        self.dir.nbytes_keys = key.nbytes;
        Ok(())
    }

    fn write_dir_header(&mut self) -> Result<()> {
        self.dir.mtime = Datime::now();
        let mut w = WBuffer::new();
        self.dir.marshal(&mut w);
        let record = w.into_bytes()?;

        let offset = self.dir.seek_dir + self.header.nbytes_name as i64;
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        storage.write_at(&record, offset as u64)?;
        Ok(())
    }

    fn write_free_segments(&mut self) -> Result<()> {
        // sized for wide segments; unused bytes stay zero
        let nbytes = self.blocks.len() as i32 * 18;
        let (name, title) = (self.dir.name.clone(), self.dir.title.clone());
        let key = self.new_key(&name, &title, FILE_CLASS, nbytes)?;

        let mut w = WBuffer::with_limit(nbytes as usize);
        for blk in self.blocks.iter() {
            blk.marshal(&mut w);
        }
        w.pad_to(nbytes as usize);
        let payload = w.into_bytes()?;

        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        key.write_record(storage, &payload)?;
        self.header.seek_free = key.seek_key;
        self.header.nbytes_free = key.nbytes;
        Ok(())
    }

    fn write_file_header(&mut self) -> Result<()> {
        if let Some(end) = self.blocks.trailing_first() {
            self.header.end = end;
        }
        self.header.nfree = self.blocks.len() as i32;
        self.header.fold_large_file();

        let bytes = self.header.to_bytes()?;
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        storage.write_at(&bytes, 0)?;
        Ok(())
    }

    fn close_inner(&mut self) -> Result<()> {
        let committed = if self.writable && self.storage.is_some() {
            self.commit()
        } else {
            Ok(())
        };
        self.writable = false;

        self.dir.detach_keys();
        if let Some(key) = self.si_key.as_mut() {
            key.detach();
        }
        // keys handed out earlier lose their link with the old token
        self.token = FileToken::new();

        let closed = match self.storage.take() {
            Some(mut storage) => storage.close().map_err(RootError::from),
            None => Ok(()),
        };
        committed.and(closed)
    }

    /// Commit pending writes and release the storage
    pub fn close(mut self) -> Result<()> {
        info!("Closing {}", self.id);
        self.close_inner()
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Read at an absolute offset
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        Ok(storage.read_at(buf, offset)?)
    }

    /// Read from the current position
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        Ok(storage.read(buf)?)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let storage = self.storage.as_deref_mut().ok_or(RootError::Closed)?;
        Ok(storage.seek(pos)?)
    }

    /// Current position
    pub fn tell(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    /// Path or name the file was opened with
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Format version, without the large-file flag
    pub fn version(&self) -> i32 {
        self.header.normalized_version()
    }

    /// Major release that wrote the file (`60600` is release 6)
    pub fn major_version(&self) -> i32 {
        self.version() / 10000
    }

    pub fn name(&self) -> &str {
        &self.dir.name
    }

    pub fn title(&self) -> &str {
        &self.dir.title
    }

    pub fn class(&self) -> &str {
        FILE_CLASS
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    /// Keys of the root directory, in on-disk order
    pub fn keys(&self) -> &[Key] {
        &self.dir.keys
    }

    pub fn streamer_infos(&self) -> &[Arc<StreamerInfo>] {
        &self.sinfos
    }

    /// Key of the StreamerInfo record, once read or written
    pub fn streamer_info_key(&self) -> Option<&Key> {
        self.si_key.as_ref()
    }

    /// Free list; empty for files opened for reading until
    /// [`read_free_segments`](File::read_free_segments) is called
    pub fn free_blocks(&self) -> &FreeList {
        &self.blocks
    }

    pub fn registry(&self) -> &Arc<StreamerRegistry> {
        &self.registry
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.storage.is_some() {
            if let Err(e) = self.close_inner() {
                warn!("Failed to close {}: {}", self.id, e);
            }
        }
    }
}
