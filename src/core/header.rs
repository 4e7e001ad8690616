use crate::buffer::{RBuffer, WBuffer};
use crate::error::{Result, RootError};
use serde::{Deserialize, Serialize};

/// File identifier at byte 0
pub const MAGIC: [u8; 4] = *b"root";

/// First byte after the file header; the first data record starts here
pub const K_BEGIN: i64 = 100;

/// Offsets past this point need 8-byte pointer fields
pub const K_START_BIG_FILE: i64 = 2_000_000_000;

/// Added to the stored version when pointer fields are 8 bytes wide
pub const LARGE_FILE_FLAG: i32 = 1_000_000;

/// Format version written by this crate
pub const ROOT_VERSION: i32 = 61400;

/// Size of the unique identifier: 2-byte version followed by 16 bytes
pub const UUID_SIZE: usize = 18;

/// Encoded header size with 4-byte pointers
pub const SMALL_HEADER_SIZE: usize = 45 + UUID_SIZE;

/// Encoded header size with 8-byte pointers
pub const LARGE_HEADER_SIZE: usize = 57 + UUID_SIZE;

/// ROOT file header
///
/// Occupies bytes `0..K_BEGIN`. Layout, big-endian, with the large-file
/// widths in brackets:
///
/// ```text
///  0..4            "root"
///  4..8            version     (+1000000 when pointers are 8 bytes)
///  8..12           begin
/// 12..16 [12..20]  end
/// 16..20 [20..28]  seek_free
/// 20..24 [28..32]  nbytes_free
/// 24..28 [32..36]  nfree
/// 28..32 [36..40]  nbytes_name
/// 32..33 [40..41]  units
/// 33..37 [41..45]  compression
/// 37..41 [45..53]  seek_info
/// 41..45 [53..57]  nbytes_info
/// 45..63 [57..75]  uuid
/// ```
///
/// `version` is kept normalized (below [`LARGE_FILE_FLAG`]) after decoding;
/// the width lives in `units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Format version
    pub version: i32,

    /// Pointer to the first data record
    pub begin: i64,

    /// Pointer to the first free byte at end of file
    pub end: i64,

    /// Pointer to the free segments record
    pub seek_free: i64,

    /// Number of bytes in the free segments record
    pub nbytes_free: i32,

    /// Number of free blocks
    pub nfree: i32,

    /// Number of bytes of the root directory key plus its name and title
    pub nbytes_name: i32,

    /// Width of file pointers, 4 or 8
    pub units: u8,

    /// Compression level and algorithm
    pub compression: i32,

    /// Pointer to the StreamerInfo record
    pub seek_info: i64,

    /// Number of bytes in the StreamerInfo record
    pub nbytes_info: i32,

    /// Universal unique identifier
    pub uuid: [u8; UUID_SIZE],
}

impl Default for Header {
    fn default() -> Self {
        Header::new()
    }
}

impl Header {
    pub fn new() -> Self {
        Header {
            version: ROOT_VERSION,
            begin: K_BEGIN,
            end: K_BEGIN,
            seek_free: 0,
            nbytes_free: 0,
            nfree: 0,
            nbytes_name: 0,
            units: 4,
            compression: 1,
            seek_info: 0,
            nbytes_info: 0,
            uuid: [0; UUID_SIZE],
        }
    }

    /// True when pointer fields are 8 bytes wide
    pub fn is_large(&self) -> bool {
        self.units == 8 || self.version >= LARGE_FILE_FLAG
    }

    /// Version with the large-file flag removed
    pub fn normalized_version(&self) -> i32 {
        self.version % LARGE_FILE_FLAG
    }

    /// Switch to 8-byte pointers once `end` passes the small-file limit
    ///
    /// Adds [`LARGE_FILE_FLAG`] to `version` and sets `units = 8`. Calling it
    /// on a header that is already folded leaves it unchanged.
    pub fn fold_large_file(&mut self) {
        if self.version < LARGE_FILE_FLAG && self.end > K_START_BIG_FILE {
            self.version += LARGE_FILE_FLAG;
            self.units = 8;
        }
    }

    /// Decode the header from the first bytes of a file
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = RBuffer::new(bytes);

        let magic: [u8; 4] = r.read_array();
        r.err()
            .map_err(|e| RootError::Format(format!("failed to read file magic: {}", e)))?;
        if magic != MAGIC {
            return Err(RootError::InvalidMagic(
                String::from_utf8_lossy(&magic).into_owned(),
            ));
        }

        let mut header = Header::new();
        header.version = r.read_i32();
        header.begin = r.read_i32() as i64;
        if header.version < LARGE_FILE_FLAG {
            header.end = r.read_i32() as i64;
            header.seek_free = r.read_i32() as i64;
            header.nbytes_free = r.read_i32();
            header.nfree = r.read_i32();
            header.nbytes_name = r.read_i32();
            header.units = r.read_u8();
            header.compression = r.read_i32();
            header.seek_info = r.read_i32() as i64;
            header.nbytes_info = r.read_i32();
        } else {
            header.end = r.read_i64();
            header.seek_free = r.read_i64();
            header.nbytes_free = r.read_i32();
            header.nfree = r.read_i32();
            header.nbytes_name = r.read_i32();
            header.units = r.read_u8();
            header.compression = r.read_i32();
            header.seek_info = r.read_i64();
            header.nbytes_info = r.read_i32();
        }
        header.version %= LARGE_FILE_FLAG;
        header.uuid = r.read_array();

        r.err()
            .map_err(|e| RootError::Format(format!("truncated file header: {}", e)))?;

        Ok(header)
    }

    /// Check structural invariants of a decoded header
    pub fn validate(&self) -> Result<()> {
        if self.version <= 0 {
            return Err(RootError::Format(format!("invalid version {}", self.version)));
        }

        if self.units != 4 && self.units != 8 {
            return Err(RootError::Format(format!(
                "invalid pointer width {} (expected 4 or 8)",
                self.units
            )));
        }

        if self.begin >= self.end {
            return Err(RootError::Format(format!(
                "begin ({}) must precede end ({})",
                self.begin, self.end
            )));
        }

        Ok(())
    }

    /// Encode the header, choosing the pointer width from the header itself
    ///
    /// Large headers are written with the version folded, so encoding an
    /// already-folded header yields the same bytes.
    pub fn encode(&self, w: &mut WBuffer) {
        let wide = self.is_large();
        let version = if wide {
            self.normalized_version() + LARGE_FILE_FLAG
        } else {
            self.normalized_version()
        };
        self.encode_as(w, version, wide);
    }

    /// Encode with an explicit stored version and pointer width
    ///
    /// The create path decides both before folding the in-memory header.
    pub fn encode_as(&self, w: &mut WBuffer, version: i32, wide: bool) {
        w.write_bytes(&MAGIC);
        w.write_i32(version);
        w.write_i32(self.begin as i32);
        if !wide {
            w.write_i32(self.end as i32);
            w.write_i32(self.seek_free as i32);
            w.write_i32(self.nbytes_free);
            w.write_i32(self.nfree);
            w.write_i32(self.nbytes_name);
            w.write_u8(self.units);
            w.write_i32(self.compression);
            w.write_i32(self.seek_info as i32);
            w.write_i32(self.nbytes_info);
        } else {
            w.write_i64(self.end);
            w.write_i64(self.seek_free);
            w.write_i32(self.nbytes_free);
            w.write_i32(self.nfree);
            w.write_i32(self.nbytes_name);
            w.write_u8(self.units);
            w.write_i32(self.compression);
            w.write_i64(self.seek_info);
            w.write_i32(self.nbytes_info);
        }
        w.write_bytes(&self.uuid);
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = WBuffer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut header = Header::new();
        header.version = 60600;
        header.end = 403;
        header.seek_free = 349;
        header.nbytes_free = 54;
        header.nfree = 1;
        header.nbytes_name = 58;
        header.seek_info = 215;
        header.nbytes_info = 85;
        header.uuid[1] = 1;
        header.uuid[17] = 0xAB;
        header
    }

    #[test]
    fn test_small_layout() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes.len(), SMALL_HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"root");
        assert_eq!(&bytes[4..8], &60600i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &100i32.to_be_bytes());
        assert_eq!(&bytes[12..16], &403i32.to_be_bytes());
        assert_eq!(bytes[32], 4);
        assert_eq!(&bytes[37..41], &215i32.to_be_bytes());
        assert_eq!(bytes[62], 0xAB);
    }

    #[test]
    fn test_roundtrip_small() {
        let header = sample();
        let decoded = Header::decode(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, header);
        decoded.validate().unwrap();
    }

    #[test]
    fn test_large_fold_is_idempotent() {
        let mut header = sample();
        header.end = K_START_BIG_FILE + 1;
        header.seek_info = K_START_BIG_FILE - 10;
        header.fold_large_file();
        assert_eq!(header.units, 8);
        assert_eq!(header.version, 60600 + LARGE_FILE_FLAG);

        header.fold_large_file();
        assert_eq!(header.version, 60600 + LARGE_FILE_FLAG);

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), LARGE_HEADER_SIZE);
        assert_eq!(&bytes[4..8], &(60600 + LARGE_FILE_FLAG).to_be_bytes());

        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded.version, 60600);
        assert_eq!(decoded.units, 8);
        assert_eq!(decoded.end, K_START_BIG_FILE + 1);
        assert_eq!(decoded.seek_info, K_START_BIG_FILE - 10);

        // Re-encoding the normalized header folds again to the same bytes
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_no_fold_below_threshold() {
        let mut header = sample();
        header.end = K_START_BIG_FILE;
        header.fold_large_file();
        assert_eq!(header.units, 4);
        assert_eq!(header.version, 60600);
        assert!(!header.is_large());
    }

    #[test]
    fn test_encode_as_keeps_prefold_width() {
        let mut header = sample();
        let version = header.version;
        let wide = header.is_large();
        header.end = K_START_BIG_FILE + 100;
        header.fold_large_file();

        let mut w = WBuffer::new();
        header.encode_as(&mut w, version, wide);
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes.len(), SMALL_HEADER_SIZE);
        assert_eq!(&bytes[4..8], &60600i32.to_be_bytes());
        assert_eq!(bytes[32], 8);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"CART");
        let err = Header::decode(&bytes).unwrap_err();
        assert!(matches!(err, RootError::InvalidMagic(ref m) if m == "CART"));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample().to_bytes().unwrap();
        let err = Header::decode(&bytes[..30]).unwrap_err();
        assert!(matches!(err, RootError::Format(_)));

        let err = Header::decode(b"ro").unwrap_err();
        assert!(matches!(err, RootError::Format(_)));
    }

    #[test]
    fn test_validate_rejects_bad_units() {
        let mut header = sample();
        header.units = 5;
        assert!(header.validate().is_err());

        let mut header = sample();
        header.end = header.begin;
        assert!(header.validate().is_err());
    }
}
