//! Byte-addressable backing stores for ROOT files
//!
//! The container only needs positioned reads and writes, a movable cursor
//! and a close hook. Anything implementing [`Storage`] can back a file: a
//! local file, an in-memory buffer, or a remote object behind a `Read + Seek`
//! adapter.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Capability interface to the bytes of a ROOT file
pub trait Storage: Send {
    /// Read into `buf` starting at `offset`, stopping early only at end of data
    ///
    /// Returns the number of bytes read.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write all of `buf` at `offset`
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Read from the current position
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Flush pending writes and release the store
    fn close(&mut self) -> io::Result<()>;
}

fn read_full_at<R: Read + Seek>(inner: &mut R, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    inner.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    while total < buf.len() {
        match inner.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Storage over any `Read + Seek` source; writes are refused
#[derive(Debug)]
pub struct ReadOnlyStorage<R> {
    inner: R,
}

impl<R: Read + Seek + Send> ReadOnlyStorage<R> {
    pub fn new(inner: R) -> Self {
        ReadOnlyStorage { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl ReadOnlyStorage<File> {
    /// Open a local file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(ReadOnlyStorage::new(File::open(path)?))
    }
}

impl<R: Read + Seek + Send> Storage for ReadOnlyStorage<R> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_full_at(&mut self.inner, buf, offset)
    }

    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "storage is open read-only",
        ))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Storage over any `Read + Write + Seek` target
#[derive(Debug)]
pub struct ReadWriteStorage<T> {
    inner: T,
}

impl<T: Read + Write + Seek + Send> ReadWriteStorage<T> {
    pub fn new(inner: T) -> Self {
        ReadWriteStorage { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl ReadWriteStorage<File> {
    /// Create (or truncate) a local file for writing
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(ReadWriteStorage::new(file))
    }
}

impl<T: Read + Write + Seek + Send> Storage for ReadWriteStorage<T> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_full_at(&mut self.inner, buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_at_stops_at_end() {
        let mut s = ReadOnlyStorage::new(Cursor::new(vec![1u8, 2, 3, 4, 5]));
        let mut buf = [0u8; 4];
        assert_eq!(s.read_at(&mut buf, 3).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let mut s = ReadOnlyStorage::new(Cursor::new(vec![0u8; 8]));
        let err = s.write_at(b"x", 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_write_past_end_extends() {
        let mut s = ReadWriteStorage::new(Cursor::new(Vec::new()));
        s.write_at(b"root", 10).unwrap();
        s.close().unwrap();
        let data = s.into_inner().into_inner();
        assert_eq!(data.len(), 14);
        assert_eq!(&data[10..], b"root");
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut s = ReadWriteStorage::create(temp.path()).unwrap();
            s.write_at(b"hello", 0).unwrap();
            s.close().unwrap();
        }

        let mut s = ReadOnlyStorage::open(temp.path()).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(s.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        s.seek(SeekFrom::Start(1)).unwrap();
        let mut two = [0u8; 2];
        assert_eq!(s.read(&mut two).unwrap(), 2);
        assert_eq!(&two, b"el");
    }
}
