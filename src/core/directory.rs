//! Root directory of a file: its persisted record and its key table
//!
//! The directory record follows the file's header key and its name/title
//! strings, at `begin + nbytes_name`:
//!
//! ```text
//! version      i16      +1000 when seek fields are 8 bytes
//! ctime        u32
//! mtime        u32
//! nbytes_keys  i32      length of the keys list record
//! nbytes_name  i32
//! seek_dir     i32/i64
//! seek_parent  i32/i64
//! seek_keys    i32/i64  offset of the keys list record
//! uuid         18 bytes
//! [3 x i32 padding on the narrow layout]
//! ```

use crate::buffer::{RBuffer, WBuffer};
use crate::datime::Datime;
use crate::error::{Result, RootError};
use crate::file::FileToken;
use crate::header::{Header, K_START_BIG_FILE, UUID_SIZE};
use crate::io::Storage;
use crate::key::Key;
use crate::validation::NameCycle;
use std::sync::Arc;
use tracing::debug;

/// Class version of directory records written by this crate
pub const DIRECTORY_VERSION: i16 = 5;

/// Bounds accepted for the header's `nbytes_name`
const NBYTES_NAME_RANGE: std::ops::RangeInclusive<i32> = 10..=10000;

fn read_exact_at(storage: &mut dyn Storage, len: usize, offset: i64) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    let n = storage.read_at(&mut data, offset as u64)?;
    if n != len {
        return Err(RootError::ShortRead {
            expected: len,
            actual: n,
        });
    }
    Ok(data)
}

/// The top-level directory of a file
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) ctime: Datime,
    pub(crate) mtime: Datime,
    pub(crate) nbytes_keys: i32,
    pub(crate) nbytes_name: i32,
    pub(crate) seek_dir: i64,
    pub(crate) seek_parent: i64,
    pub(crate) seek_keys: i64,
    pub(crate) uuid: [u8; UUID_SIZE],
    pub(crate) keys: Vec<Key>,
}

impl Directory {
    pub fn new(name: &str, title: &str) -> Self {
        let now = Datime::now();
        Directory {
            name: name.to_string(),
            title: title.to_string(),
            ctime: now,
            mtime: now,
            ..Default::default()
        }
    }

    /// Size of the persisted directory record for a file version
    pub fn record_size(version: i32) -> i64 {
        let mut nbytes = 22; // version, nbytes_keys, nbytes_name, 3 narrow seeks
        nbytes += 4 + 4; // ctime, mtime
        nbytes += UUID_SIZE as i64;
        if version >= 40000 {
            // room for 8-byte seeks
            nbytes += 12;
        }
        nbytes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn seek_keys(&self) -> i64 {
        self.seek_keys
    }

    pub fn seek_dir(&self) -> i64 {
        self.seek_dir
    }

    fn is_large(&self) -> bool {
        self.seek_dir > K_START_BIG_FILE
            || self.seek_parent > K_START_BIG_FILE
            || self.seek_keys > K_START_BIG_FILE
    }

    /// Load name, title and directory record from the start of the file
    pub fn read_dir_info(&mut self, storage: &mut dyn Storage, header: &Header) -> Result<()> {
        if !NBYTES_NAME_RANGE.contains(&header.nbytes_name) {
            return Err(RootError::Format(format!(
                "cannot read directory info: nbytes_name={} out of range",
                header.nbytes_name
            )));
        }

        let nbytes = header.nbytes_name as i64 + Self::record_size(header.version);
        if header.begin + nbytes > header.end {
            return Err(RootError::Format(format!(
                "incorrect header length ({}) or incorrect end of file length ({})",
                header.begin + nbytes,
                header.end
            )));
        }

        let data = read_exact_at(storage, nbytes as usize, header.begin)?;

        let key = Key::unmarshal(&mut RBuffer::new(&data))?;
        let keylen = key.keylen as usize;
        if keylen > header.nbytes_name as usize {
            return Err(RootError::Format(format!(
                "directory key length {} exceeds nbytes_name {}",
                keylen, header.nbytes_name
            )));
        }

        let mut r = RBuffer::new(&data[keylen..]);
        self.name = r.read_string();
        self.title = r.read_string();
        r.err()?;

        self.unmarshal(&mut RBuffer::new(&data[header.nbytes_name as usize..]))?;
        debug!(
            "Directory {:?}: seek_keys={} nbytes_keys={}",
            self.name, self.seek_keys, self.nbytes_keys
        );
        Ok(())
    }

    /// Load the keys list record; a directory without one has no keys
    pub fn read_keys(&mut self, storage: &mut dyn Storage, token: &Arc<FileToken>) -> Result<()> {
        if self.seek_keys <= 0 {
            self.keys.clear();
            return Ok(());
        }
        if self.nbytes_keys <= 0 {
            return Err(RootError::Format(format!(
                "invalid keys list length {}",
                self.nbytes_keys
            )));
        }

        let data = read_exact_at(storage, self.nbytes_keys as usize, self.seek_keys)?;
        let mut r = RBuffer::new(&data);
        let hdr = Key::unmarshal(&mut r)?;
        if hdr.seek_key != self.seek_keys {
            return Err(RootError::SeekKeyMismatch {
                expected: self.seek_keys,
                found: hdr.seek_key,
            });
        }

        r.set_pos(hdr.keylen as usize);
        let nkeys = r.read_i32();
        r.err()?;
        if nkeys < 0 {
            return Err(RootError::Format(format!("negative key count {}", nkeys)));
        }

        let mut keys = Vec::with_capacity((nkeys as usize).min(r.remaining()));
        for _ in 0..nkeys {
            let mut key = Key::unmarshal(&mut r)?;
            key.attach(token);
            keys.push(key);
        }
        debug!("Read {} keys", keys.len());
        self.keys = keys;
        Ok(())
    }

    /// Key matching a `name[;cycle]` specification
    ///
    /// Without a cycle the highest cycle for the name is returned.
    pub fn key(&self, namecycle: &str) -> Result<&Key> {
        let spec = NameCycle::new(namecycle)?;
        let mut matching = self.keys.iter().filter(|k| k.name == spec.name());
        let found = match spec.cycle() {
            Some(cycle) => matching.find(|k| k.cycle == cycle),
            None => matching.max_by_key(|k| k.cycle),
        };
        found.ok_or_else(|| RootError::NotFound(namecycle.to_string()))
    }

    /// Cycle to give a new key named `name`
    pub fn next_cycle(&self, name: &str) -> Result<i16> {
        match self.keys.iter().filter(|k| k.name == name).map(|k| k.cycle).max() {
            None => Ok(1),
            Some(c) => c.checked_add(1).ok_or_else(|| {
                RootError::Format(format!("no cycle left for {:?} after {}", name, c))
            }),
        }
    }

    /// Invalidate every key's link to the file and drop the key table
    pub(crate) fn detach_keys(&mut self) {
        for key in &mut self.keys {
            key.detach();
        }
        self.keys.clear();
    }

    pub fn unmarshal(&mut self, r: &mut RBuffer<'_>) -> Result<()> {
        let version = r.read_i16();
        self.ctime = Datime(r.read_u32());
        self.mtime = Datime(r.read_u32());
        self.nbytes_keys = r.read_i32();
        self.nbytes_name = r.read_i32();
        if version > 1000 {
            self.seek_dir = r.read_i64();
            self.seek_parent = r.read_i64();
            self.seek_keys = r.read_i64();
        } else {
            self.seek_dir = r.read_i32() as i64;
            self.seek_parent = r.read_i32() as i64;
            self.seek_keys = r.read_i32() as i64;
        }
        if version % 1000 > 1 {
            self.uuid = r.read_array();
        }
        r.err()
    }

    pub fn marshal(&self, w: &mut WBuffer) {
        let large = self.is_large();
        let version = if large {
            DIRECTORY_VERSION + 1000
        } else {
            DIRECTORY_VERSION
        };

        w.write_i16(version);
        w.write_u32(self.ctime.0);
        w.write_u32(self.mtime.0);
        w.write_i32(self.nbytes_keys);
        w.write_i32(self.nbytes_name);
        if large {
            w.write_i64(self.seek_dir);
            w.write_i64(self.seek_parent);
            w.write_i64(self.seek_keys);
        } else {
            w.write_i32(self.seek_dir as i32);
            w.write_i32(self.seek_parent as i32);
            w.write_i32(self.seek_keys as i32);
        }
        w.write_bytes(&self.uuid);
        if !large {
            for _ in 0..3 {
                w.write_i32(0);
            }
        }
    }

    /// Keys list payload: the key count, then every key header
    pub(crate) fn marshal_keys_list(&self, w: &mut WBuffer) {
        w.write_i32(self.keys.len() as i32);
        for key in &self.keys {
            key.marshal(w);
        }
    }

    pub(crate) fn keys_list_size(&self) -> i32 {
        4 + self.keys.iter().map(|k| k.keylen as i32).sum::<i32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_keys(specs: &[(&str, i16)]) -> Directory {
        let mut dir = Directory::new("f.root", "");
        for &(name, cycle) in specs {
            let mut key = Key::new(name, "", "TObjString", 8, false);
            key.cycle = cycle;
            dir.keys.push(key);
        }
        dir
    }

    #[test]
    fn test_record_size_matches_marshal() {
        let mut dir = Directory::new("f.root", "title");
        dir.seek_dir = 100;
        dir.seek_keys = 400;
        let mut w = WBuffer::new();
        dir.marshal(&mut w);
        assert_eq!(w.len() as i64, Directory::record_size(61400));

        dir.seek_keys = K_START_BIG_FILE + 1;
        let mut w = WBuffer::new();
        dir.marshal(&mut w);
        assert_eq!(w.len() as i64, Directory::record_size(61400));

        assert_eq!(Directory::record_size(30000), 48);
    }

    #[test]
    fn test_record_roundtrip() {
        let mut dir = Directory::new("f.root", "title");
        dir.nbytes_keys = 70;
        dir.nbytes_name = 58;
        dir.seek_dir = 100;
        dir.seek_keys = K_START_BIG_FILE + 5;
        dir.uuid[1] = 1;
        dir.uuid[9] = 0x42;
        let mut w = WBuffer::new();
        dir.marshal(&mut w);
        let bytes = w.into_bytes().unwrap();

        let mut back = Directory::default();
        back.unmarshal(&mut RBuffer::new(&bytes)).unwrap();
        assert_eq!(back.seek_keys, K_START_BIG_FILE + 5);
        assert_eq!(back.nbytes_keys, 70);
        assert_eq!(back.nbytes_name, 58);
        assert_eq!(back.ctime, dir.ctime);
        assert_eq!(back.uuid, dir.uuid);
    }

    #[test]
    fn test_key_lookup_by_cycle() {
        let dir = with_keys(&[("h", 1), ("h", 3), ("g", 1), ("h", 2)]);

        assert_eq!(dir.key("h").unwrap().cycle(), 3);
        assert_eq!(dir.key("h;9999").unwrap().cycle(), 3);
        assert_eq!(dir.key("h;2").unwrap().cycle(), 2);
        assert_eq!(dir.key("g").unwrap().cycle(), 1);

        let err = dir.key("h;4").unwrap_err();
        assert!(err.is_not_found());
        let err = dir.key("missing;1").unwrap_err();
        assert!(matches!(err, RootError::NotFound(ref s) if s == "missing;1"));
        assert!(matches!(dir.key("h;x"), Err(RootError::InvalidNameCycle(_))));
    }

    #[test]
    fn test_next_cycle() {
        let dir = with_keys(&[("h", 1), ("h", 3)]);
        assert_eq!(dir.next_cycle("h").unwrap(), 4);
        assert_eq!(dir.next_cycle("new").unwrap(), 1);
    }

    #[test]
    fn test_next_cycle_exhausted() {
        let dir = with_keys(&[("h", i16::MAX), ("g", 7)]);
        let err = dir.next_cycle("h").unwrap_err();
        assert!(err.is_format_error());
        assert_eq!(dir.next_cycle("g").unwrap(), 8);
    }

    #[test]
    fn test_keys_list_size() {
        let dir = with_keys(&[("h", 1), ("g", 1)]);
        let mut w = WBuffer::new();
        dir.marshal_keys_list(&mut w);
        assert_eq!(w.len() as i32, dir.keys_list_size());
    }
}
