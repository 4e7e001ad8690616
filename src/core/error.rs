use std::fmt;
use thiserror::Error;

/// Bootstrap stage that delegates to a collaborator while opening a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Root directory record at `begin + nbytes_name`
    DirectoryInfos,
    /// StreamerInfo list record at `seek_info`
    StreamerInfos,
    /// Keys list record at the directory's `seek_keys`
    FileKeys,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DirectoryInfos => "directory infos",
            Stage::StreamerInfos => "streamer infos",
            Stage::FileKeys => "file keys",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RootError {
    #[error("{0:?} is not a ROOT file (invalid magic)")]
    InvalidMagic(String),

    #[error("Invalid file format: {0}")]
    Format(String),

    #[error("Key self-offset mismatch: record read at {expected} claims to live at {found}")]
    SeekKeyMismatch { expected: i64, found: i64 },

    #[error("Buffer overrun: need {need} bytes at offset {pos}, buffer holds {len}")]
    BufferOverrun { pos: usize, need: usize, len: usize },

    #[error("Short read: requested [{expected}] bytes, read [{actual}] bytes from file")]
    ShortRead { expected: usize, actual: usize },

    #[error("Invalid pointer to StreamerInfo (pos={pos} end={end})")]
    InvalidStreamerInfoPointer { pos: i64, end: i64 },

    #[error("Failed to read ROOT {stage}: {source}")]
    Bootstrap {
        stage: Stage,
        #[source]
        source: Box<RootError>,
    },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid name;cycle specification: {0:?}")]
    InvalidNameCycle(String),

    #[error("Out of space: no free block can hold {0} bytes")]
    OutOfSpace(i64),

    #[error("File is closed")]
    Closed,

    #[error("File is open read-only")]
    ReadOnly,

    #[error("Compressed payloads are not supported (class {class}, {nbytes} bytes on disk for {objlen} bytes)")]
    CompressedPayload {
        class: String,
        nbytes: i32,
        objlen: i32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RootError {
    pub(crate) fn at_stage(stage: Stage) -> impl FnOnce(RootError) -> RootError {
        move |err| RootError::Bootstrap {
            stage,
            source: Box::new(err),
        }
    }

    /// Innermost error, looking through bootstrap stage wrappers
    pub fn root_cause(&self) -> &RootError {
        match self {
            RootError::Bootstrap { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stage that failed, for errors raised while opening a file
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RootError::Bootstrap { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True for corrupt or foreign content (never retried)
    pub fn is_format_error(&self) -> bool {
        matches!(
            self.root_cause(),
            RootError::InvalidMagic(_)
                | RootError::Format(_)
                | RootError::SeekKeyMismatch { .. }
                | RootError::BufferOverrun { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), RootError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapping_keeps_cause() {
        let err = RootError::at_stage(Stage::StreamerInfos)(RootError::InvalidStreamerInfoPointer {
            pos: 0,
            end: 400,
        });

        assert_eq!(err.stage(), Some(Stage::StreamerInfos));
        assert!(matches!(
            err.root_cause(),
            RootError::InvalidStreamerInfoPointer { pos: 0, end: 400 }
        ));
        assert!(err.to_string().contains("streamer infos"));
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_not_found_is_not_format_error() {
        let err = RootError::NotFound("missing;1".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_format_error());

        let err = RootError::InvalidMagic("data.root".to_string());
        assert!(err.is_format_error());
        assert!(!err.is_not_found());
    }
}
