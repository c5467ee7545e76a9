//! Reader for Varian FDF scanner exports.
//!
//! An FDF file is a free-form text header terminated by a form-feed byte,
//! followed by a raw block of 32-bit floats. A scan is usually a directory of
//! such files, one 2D slice each, which [`assemble`] stitches into a 3D or 4D
//! volume.
mod format;
mod geometry;
mod header;
mod payload;
mod procpar;
mod volume;

#[cfg(test)]
#[path = "../test/tests.rs"]
mod tests;

pub use format::{Endian, PackFormat};
pub use geometry::{orient, rot90, voxel_spacing};
pub use header::{Header, HeaderBuilder, normalize_unit, parse_header};
pub use payload::{Payload, read_payload};
pub use procpar::Gradients;
pub use volume::{Slice, Volume, assemble, read_slice};

// Optional file features
#[cfg(feature = "file")]
mod fdffile;
#[cfg(test)]
#[cfg(feature = "file")]
#[path = "../test/fdffile_test.rs"]
mod fdffile_test;

#[cfg(feature = "mmap")]
pub use fdffile::FdfMmap;

#[cfg(feature = "file")]
pub use fdffile::{FdfFile, LoadOptions, load, read_directory, read_file};

// Error type

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {source}", .path.display())]
    File {
        path: std::path::PathBuf,
        #[source]
        source: Box<Error>,
    },
    #[error("No form-feed byte found before end of header")]
    MissingSentinel,
    #[error("Malformed header field `{field}` in line {line:?}")]
    MalformedHeader { field: &'static str, line: String },
    #[error("Required header field `{0}` is missing")]
    MissingField(&'static str),
    #[error("Invalid value {value:?} for header field `{field}`")]
    InvalidValue { field: &'static str, value: String },
    #[error("Payload needs {expected} bytes but only {available} are available")]
    PayloadSize { expected: usize, available: usize },
    #[error("Invalid dimensions: {0}")]
    Shape(String),
    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("No slices to assemble")]
    EmptyInput,
    #[error("Orientation matrix is singular")]
    SingularOrientation,
    #[cfg(feature = "mmap")]
    #[error("Memory mapping error: {0}")]
    Mmap(std::io::Error),
}

impl Error {
    /// Attaches the path of the file being read.
    pub(crate) fn in_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        Error::File {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
