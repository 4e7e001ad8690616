//! Key records: the length-prefixed header in front of every stored object
//!
//! ```text
//! nbytes    i32   record length on disk (negative: free gap)
//! version   i16   +1000 when seek fields are 8 bytes
//! objlen    i32   uncompressed payload length
//! datime    u32   packed write time
//! keylen    i16   header length
//! cycle     i16
//! seek_key  i32/i64  offset of the record itself
//! seek_pdir i32/i64  offset of the parent directory
//! class, name, title   length-prefixed strings
//! ```

use crate::buffer::{tstring_sizeof, RBuffer, WBuffer};
use crate::datime::Datime;
use crate::error::{Result, RootError};
use crate::file::FileToken;
use crate::io::Storage;
use std::sync::{Arc, Weak};

/// Class version of key records written by this crate
pub const KEY_VERSION: i16 = 4;

/// Class name reported for free gaps
pub const GAP_CLASS: &str = "[GAP]";

/// Header of one stored object
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) nbytes: i32,
    pub(crate) version: i16,
    pub(crate) objlen: i32,
    pub(crate) datime: Datime,
    pub(crate) keylen: i16,
    pub(crate) cycle: i16,
    pub(crate) seek_key: i64,
    pub(crate) seek_pdir: i64,
    pub(crate) class: String,
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) file: Option<Weak<FileToken>>,
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.nbytes == other.nbytes
            && self.version == other.version
            && self.objlen == other.objlen
            && self.datime == other.datime
            && self.keylen == other.keylen
            && self.cycle == other.cycle
            && self.seek_key == other.seek_key
            && self.seek_pdir == other.seek_pdir
            && self.class == other.class
            && self.name == other.name
            && self.title == other.title
    }
}

impl Key {
    /// Unplaced key for a payload of `objlen` bytes
    ///
    /// `large` selects 8-byte seek fields. The caller assigns `seek_key`.
    pub fn new(name: &str, title: &str, class: &str, objlen: i32, large: bool) -> Self {
        let mut key = Key {
            nbytes: 0,
            version: if large { KEY_VERSION + 1000 } else { KEY_VERSION },
            objlen,
            datime: Datime::now(),
            keylen: 0,
            cycle: 1,
            seek_key: 0,
            seek_pdir: 0,
            class: class.to_string(),
            name: name.to_string(),
            title: title.to_string(),
            file: None,
        };
        key.keylen = key.sizeof() as i16;
        key.nbytes = key.keylen as i32 + objlen;
        key
    }

    /// Header length for the current version and strings
    pub fn sizeof(&self) -> i32 {
        let seeks = if self.is_large() { 16 } else { 8 };
        18 + seeks
            + tstring_sizeof(&self.class)
            + tstring_sizeof(&self.name)
            + tstring_sizeof(&self.title)
    }

    pub fn is_large(&self) -> bool {
        self.version > 1000
    }

    pub fn is_gap(&self) -> bool {
        self.class == GAP_CLASS
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn cycle(&self) -> i16 {
        self.cycle
    }

    /// Record length on disk
    pub fn nbytes(&self) -> i32 {
        self.nbytes
    }

    /// Uncompressed payload length
    pub fn objlen(&self) -> i32 {
        self.objlen
    }

    pub fn keylen(&self) -> i16 {
        self.keylen
    }

    pub fn seek_key(&self) -> i64 {
        self.seek_key
    }

    pub fn seek_pdir(&self) -> i64 {
        self.seek_pdir
    }

    pub fn datime(&self) -> Datime {
        self.datime
    }

    /// True while the file this key was read from or written to is open
    pub fn is_attached(&self) -> bool {
        self.file.as_ref().map_or(false, |w| w.strong_count() > 0)
    }

    pub(crate) fn attach(&mut self, token: &Arc<FileToken>) {
        self.file = Some(Arc::downgrade(token));
    }

    pub(crate) fn detach(&mut self) {
        self.file = None;
    }

    /// True if this key belongs to the file identified by `token`
    pub(crate) fn belongs_to(&self, token: &Arc<FileToken>) -> bool {
        match self.file.as_ref().and_then(Weak::upgrade) {
            Some(owner) => Arc::ptr_eq(&owner, token),
            None => false,
        }
    }

    pub fn unmarshal(r: &mut RBuffer<'_>) -> Result<Key> {
        let nbytes = r.read_i32();
        r.err()?;
        if nbytes < 0 {
            return Ok(Key {
                nbytes: nbytes.saturating_neg(),
                version: KEY_VERSION,
                objlen: 0,
                datime: Datime::default(),
                keylen: 0,
                cycle: 0,
                seek_key: 0,
                seek_pdir: 0,
                class: GAP_CLASS.to_string(),
                name: String::new(),
                title: String::new(),
                file: None,
            });
        }

        let version = r.read_i16();
        let objlen = r.read_i32();
        let datime = Datime(r.read_u32());
        let keylen = r.read_i16();
        let cycle = r.read_i16();
        let (seek_key, seek_pdir) = if version > 1000 {
            (r.read_i64(), r.read_i64())
        } else {
            (r.read_i32() as i64, r.read_i32() as i64)
        };
        let class = r.read_string();
        let name = r.read_string();
        let title = r.read_string();
        r.err()?;

        if keylen <= 0 || (nbytes as i64) < keylen as i64 {
            return Err(RootError::Format(format!(
                "key {:?}: invalid lengths nbytes={} keylen={}",
                name, nbytes, keylen
            )));
        }

        Ok(Key {
            nbytes,
            version,
            objlen,
            datime,
            keylen,
            cycle,
            seek_key,
            seek_pdir,
            class,
            name,
            title,
            file: None,
        })
    }

    pub fn marshal(&self, w: &mut WBuffer) {
        w.write_i32(self.nbytes);
        w.write_i16(self.version);
        w.write_i32(self.objlen);
        w.write_u32(self.datime.0);
        w.write_i16(self.keylen);
        w.write_i16(self.cycle);
        if self.is_large() {
            w.write_i64(self.seek_key);
            w.write_i64(self.seek_pdir);
        } else {
            w.write_i32(self.seek_key as i32);
            w.write_i32(self.seek_pdir as i32);
        }
        w.write_string(&self.class);
        w.write_string(&self.name);
        w.write_string(&self.title);
    }

    /// Read the whole record at `seek_key` and return its payload
    ///
    /// The header found on disk must point back at `seek_key`.
    pub(crate) fn load_payload(&self, storage: &mut dyn Storage) -> Result<Vec<u8>> {
        if self.seek_key <= 0 {
            return Err(RootError::Format(format!(
                "key {:?} has no location in the file",
                self.name
            )));
        }
        let mut data = vec![0u8; self.nbytes as usize];
        let n = storage.read_at(&mut data, self.seek_key as u64)?;
        if n != data.len() {
            return Err(RootError::ShortRead {
                expected: data.len(),
                actual: n,
            });
        }

        let on_disk = Key::unmarshal(&mut RBuffer::new(&data))?;
        if on_disk.seek_key != self.seek_key {
            return Err(RootError::SeekKeyMismatch {
                expected: self.seek_key,
                found: on_disk.seek_key,
            });
        }

        Ok(self.payload_of(&data)?.to_vec())
    }

    /// Payload slice of a record buffer starting with this key's header
    pub(crate) fn payload_of<'a>(&self, record: &'a [u8]) -> Result<&'a [u8]> {
        let stored = self.nbytes - self.keylen as i32;
        if self.objlen > stored {
            return Err(RootError::CompressedPayload {
                class: self.class.clone(),
                nbytes: stored,
                objlen: self.objlen,
            });
        }

        let start = self.keylen as usize;
        let end = start + self.objlen.max(0) as usize;
        if end > record.len() {
            return Err(RootError::ShortRead {
                expected: end,
                actual: record.len(),
            });
        }
        Ok(&record[start..end])
    }

    /// Write the header followed by `payload` at `seek_key`
    pub(crate) fn write_record(&self, storage: &mut dyn Storage, payload: &[u8]) -> Result<()> {
        let mut w = WBuffer::with_limit(self.nbytes as usize);
        self.marshal(&mut w);
        w.write_bytes(payload);
        w.pad_to(self.nbytes as usize);
        let bytes = w.into_bytes()?;
        storage.write_at(&bytes, self.seek_key as u64)?;
        Ok(())
    }
}
