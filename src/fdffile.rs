use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::{
    Error, Gradients, Header, Result, Slice, Volume, assemble, orient, parse_header, read_payload,
};

#[cfg(feature = "mmap")]
use crate::Payload;
#[cfg(feature = "mmap")]
use std::io::Cursor;

/// Options for [`load`], [`read_file`] and [`read_directory`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    extension: String,
    companion: String,
    mmap: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            extension: "fdf".to_owned(),
            companion: "procpar".to_owned(),
            mmap: false,
        }
    }
}

impl LoadOptions {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extension of slice files in a directory, without the dot.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Name of the acquisition parameter file next to the data.
    pub fn companion(mut self, name: impl Into<String>) -> Self {
        self.companion = name.into();
        self
    }

    /// Read files through a memory map instead of buffered I/O.
    #[cfg(feature = "mmap")]
    pub fn mmap(mut self, enabled: bool) -> Self {
        self.mmap = enabled;
        self
    }
}

/// FDF file read through a buffered reader.
pub struct FdfFile {
    path: PathBuf,
    reader: BufReader<File>,
    header: Header,
    header_end: u64,
}

impl FdfFile {
    /// Opens `path` and parses its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_inner(path).map_err(|e| e.in_file(path))
    }

    fn open_inner(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let (header, header_end) = parse_header(&mut reader)?;

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            header,
            header_end,
        })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw payload in file order.
    pub fn read_data(&mut self) -> Result<Vec<f32>> {
        read_payload(&mut self.reader, self.header.format(), self.header_end)
            .map_err(|e| e.in_file(&self.path))
    }

    /// Decodes and orients the payload.
    pub fn read_slice(mut self) -> Result<Slice> {
        let values = self.read_data()?;
        let data = orient(values, self.header.shape()).map_err(|e| e.in_file(&self.path))?;
        Ok(Slice::new(data, self.header))
    }
}

#[cfg(feature = "mmap")]
/// FDF file read through a memory map.
pub struct FdfMmap {
    path: PathBuf,
    map: memmap2::Mmap,
    header: Header,
    header_end: u64,
}

#[cfg(feature = "mmap")]
impl FdfMmap {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_inner(path).map_err(|e| e.in_file(path))
    }

    fn open_inner(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping; the file must not be truncated while mapped.
        let map = unsafe { memmap2::Mmap::map(&file).map_err(Error::Mmap)? };
        let (header, header_end) = parse_header(&mut Cursor::new(&map[..]))?;

        Ok(Self {
            path: path.to_path_buf(),
            map,
            header,
            header_end,
        })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Payload bytes borrowed from the mapping.
    pub fn payload(&self) -> Result<Payload<'_>> {
        Payload::from_tail(self.header.format(), &self.map, self.header_end)
            .map_err(|e| e.in_file(&self.path))
    }

    pub fn read_slice(&self) -> Result<Slice> {
        let values = self.payload()?.to_vec_f32();
        let data = orient(values, self.header.shape()).map_err(|e| e.in_file(&self.path))?;
        Ok(Slice::new(data, self.header.clone()))
    }
}

/// Reads and orients a single FDF file.
pub fn read_file(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Slice> {
    let path = path.as_ref();
    #[cfg(feature = "mmap")]
    if options.mmap {
        return FdfMmap::open(path)?.read_slice();
    }
    #[cfg(not(feature = "mmap"))]
    let _ = options;
    FdfFile::open(path)?.read_slice()
}

/// Reads every slice file in `dir`, in file name order, and assembles them.
///
/// Fails on the first file that cannot be read.
pub fn read_directory(dir: impl AsRef<Path>, options: &LoadOptions) -> Result<Volume> {
    let dir = dir.as_ref();
    let pattern = Path::new(&glob::Pattern::escape(&dir.to_string_lossy()))
        .join(format!("*.{}", options.extension));
    let mut files = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| Error::from(e).in_file(dir))?
        .map(|entry| {
            entry.map_err(|e| {
                let path = e.path().to_path_buf();
                Error::from(e.into_error()).in_file(path)
            })
        })
        .collect::<Result<Vec<PathBuf>>>()?;
    files.retain(|path| path.is_file());
    files.sort();
    log::debug!("reading {} slice files from {}", files.len(), dir.display());

    let slices = files
        .iter()
        .map(|path| read_file(path, options))
        .collect::<Result<Vec<_>>>()?;
    assemble(slices).map_err(|e| e.in_file(dir))
}

/// Loads an FDF file or a directory of slice files.
///
/// Gradient information is taken from the companion parameter file next to
/// the data. A missing companion file is not an error.
pub fn load(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Volume> {
    let path = path.as_ref();
    let (volume, dir) = if path.is_dir() {
        (read_directory(path, options)?, path)
    } else {
        let dir = path.parent().unwrap_or(Path::new("."));
        (Volume::from(read_file(path, options)?), dir)
    };

    let companion = dir.join(&options.companion);
    if !companion.exists() {
        log::warn!(
            "Could not find the procpar file {}. Gradient information, if any, \
             needs a procpar file in the fdf directory.",
            companion.display()
        );
        return Ok(volume);
    }

    match Gradients::from_file(&companion).map_err(|e| e.in_file(&companion))? {
        Some(gradients) => Ok(volume.with_gradients(gradients)),
        None => Ok(volume),
    }
}
