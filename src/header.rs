use std::io::BufRead;
use std::sync::LazyLock;

use nalgebra::Matrix4;
use regex::Regex;

use crate::procpar::Gradients;
use crate::{Endian, Error, PackFormat, Result, geometry};

/// First byte of the line separating the text header from the payload.
pub const FORM_FEED: u8 = 0x0C;

/// Value of a scalar declaration such as `int slice_no = 1;` or
/// `char *studyid = "s_01";`.
static NAMED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"= *"*(.*[^"])"* *;"#).expect("valid regex"));

/// Numbers in a bracketed float array, e.g. `{3.840000,3.840000,0.035000}`.
static FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("valid regex"));

/// Numbers in a bracketed integer array, e.g. `{128, 128}`.
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Quoted two-letter unit, e.g. `"cm"`.
static UNIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[a-z]{2}""#).expect("valid regex"));

type Setter = fn(&mut HeaderBuilder, &str) -> Result<()>;

/// Scalar tags, tried in order; the first tag found on a line wins.
const SCALAR_TAGS: &[(&str, Setter)] = &[
    ("echos", HeaderBuilder::set_nechoes),
    ("echo_no", HeaderBuilder::set_echo_no),
    ("nslices", HeaderBuilder::set_nslices),
    ("slice_no", HeaderBuilder::set_slice_no),
    ("bigendian", HeaderBuilder::set_endian),
    ("array_dim", HeaderBuilder::set_array_dim),
    ("studyid", HeaderBuilder::set_studyid),
];

/// True when `tag` occurs in `line` after its first byte.
///
/// A declaration always starts with its type, so a match at column 0 is not
/// a declaration of `tag`.
#[inline]
fn has_tag(line: &str, tag: &str) -> bool {
    line.find(tag).is_some_and(|idx| idx > 0)
}

/// Rewrites units the output format cannot express. `cm` becomes `mm`.
#[inline]
pub fn normalize_unit(unit: &str) -> &str {
    if unit == "cm" { "mm" } else { unit }
}

fn parse_count(field: &'static str, value: &str) -> Result<u32> {
    let number = parse_number(field, value)?;
    if number.fract() != 0.0 || number < 0.0 || number > f64::from(u32::MAX) {
        return Err(Error::InvalidValue {
            field,
            value: value.to_owned(),
        });
    }
    Ok(number as u32)
}

fn parse_number(field: &'static str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::InvalidValue {
            field,
            value: value.to_owned(),
        })
}

fn floats(field: &'static str, line: &str) -> Result<Vec<f64>> {
    FLOAT
        .find_iter(line)
        .map(|m| parse_number(field, m.as_str()))
        .collect()
}

/// Accumulates header fields line by line.
///
/// The shape starts out unknown; [`finish`](Self::finish) refuses to build a
/// header whose matrix was never declared.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    shape: Option<Vec<usize>>,
    endian: Endian,
    real_voxel_dim: Option<Vec<f64>>,
    xyz_units: Option<String>,
    t_units: Option<String>,
    orientation: Option<[f64; 9]>,
    origin: Option<Vec<f64>>,
    array_dim: Option<f64>,
    nechoes: Option<u32>,
    echo_no: Option<u32>,
    nslices: Option<u32>,
    slice_no: Option<u32>,
    studyid: Option<String>,
}

impl HeaderBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one line of header text.
    pub fn parse_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end();

        if let Some(&(tag, set)) = SCALAR_TAGS.iter().find(|(tag, _)| has_tag(line, tag)) {
            let value = NAMED_VALUE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .ok_or_else(|| Error::MalformedHeader {
                    field: tag,
                    line: line.to_owned(),
                })?;
            log::trace!("{tag} = {}", value.as_str());
            set(self, value.as_str())?;
        }

        if has_tag(line, "abscissa") {
            let unit = UNIT
                .find(line)
                .map(|m| m.as_str().trim_matches('"'))
                .ok_or_else(|| Error::MalformedHeader {
                    field: "abscissa",
                    line: line.to_owned(),
                })?;
            self.xyz_units = Some(normalize_unit(unit).to_owned());
            self.t_units = Some("unknown".to_owned());
        } else if has_tag(line, "roi") {
            // Declared in cm, kept in mm.
            let extents = floats("roi", line)?;
            self.real_voxel_dim = Some(extents.into_iter().map(|v| v * 10.0).collect());
        } else if has_tag(line, "orientation") {
            let cosines = floats("orientation", line)?;
            let matrix: [f64; 9] = cosines.try_into().map_err(|_| Error::MalformedHeader {
                field: "orientation",
                line: line.to_owned(),
            })?;
            self.orientation = Some(matrix);
        } else if has_tag(line, "origin") {
            let origin = floats("origin", line)?;
            if !(1..=3).contains(&origin.len()) {
                return Err(Error::MalformedHeader {
                    field: "origin",
                    line: line.to_owned(),
                });
            }
            self.origin = Some(origin);
        } else if has_tag(line, "matrix") {
            let shape = DIGITS
                .find_iter(line)
                .map(|m| {
                    m.as_str().parse::<usize>().map_err(|_| Error::InvalidValue {
                        field: "matrix",
                        value: m.as_str().to_owned(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.shape = Some(shape);
        }

        Ok(())
    }

    fn set_nechoes(&mut self, value: &str) -> Result<()> {
        self.nechoes = Some(parse_count("echos", value)?);
        Ok(())
    }

    fn set_echo_no(&mut self, value: &str) -> Result<()> {
        self.echo_no = Some(parse_count("echo_no", value)?);
        Ok(())
    }

    fn set_nslices(&mut self, value: &str) -> Result<()> {
        self.nslices = Some(parse_count("nslices", value)?);
        Ok(())
    }

    fn set_slice_no(&mut self, value: &str) -> Result<()> {
        self.slice_no = Some(parse_count("slice_no", value)?);
        Ok(())
    }

    fn set_endian(&mut self, value: &str) -> Result<()> {
        let flag = value
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidValue {
                field: "bigendian",
                value: value.to_owned(),
            })?;
        self.endian = Endian::from_flag(flag);
        Ok(())
    }

    fn set_array_dim(&mut self, value: &str) -> Result<()> {
        self.array_dim = Some(parse_number("array_dim", value)?);
        Ok(())
    }

    fn set_studyid(&mut self, value: &str) -> Result<()> {
        self.studyid = Some(value.to_owned());
        Ok(())
    }

    /// Validates the accumulated fields and derives the payload format and
    /// voxel spacing.
    pub fn finish(self) -> Result<Header> {
        let shape = self.shape.ok_or(Error::MissingField("matrix"))?;
        if shape.is_empty() || shape.contains(&0) {
            return Err(Error::Shape(format!("declared matrix {shape:?}")));
        }
        let real_voxel_dim = self.real_voxel_dim.ok_or(Error::MissingField("roi"))?;

        let count = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| Error::Shape(format!("matrix {shape:?} overflows")))?;
        let format = PackFormat::new(self.endian, count);
        if format.byte_size().is_none() {
            return Err(Error::Shape(format!("matrix {shape:?} overflows")));
        }

        let voxel_dim = geometry::voxel_spacing(&shape, &real_voxel_dim);

        Ok(Header {
            shape,
            endian: self.endian,
            voxel_dim,
            real_voxel_dim,
            xyz_units: self.xyz_units,
            t_units: self.t_units,
            orientation: self.orientation,
            origin: self.origin,
            array_dim: self.array_dim,
            format,
            nechoes: self.nechoes,
            echo_no: self.echo_no,
            nslices: self.nslices,
            slice_no: self.slice_no,
            studyid: self.studyid,
            gradients: None,
        })
    }
}

/// Metadata of one FDF file, or of an assembled volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Native (file order) dimensions, or the array shape once assembled
    shape: Vec<usize>,
    endian: Endian,
    /// Physical size of one voxel per axis, in mm
    voxel_dim: Vec<f64>,
    /// Physical extent of the field of view per axis, in mm
    real_voxel_dim: Vec<f64>,
    xyz_units: Option<String>,
    t_units: Option<String>,
    /// Row-major 3×3 direction cosines
    orientation: Option<[f64; 9]>,
    origin: Option<Vec<f64>>,
    array_dim: Option<f64>,
    format: PackFormat,
    nechoes: Option<u32>,
    echo_no: Option<u32>,
    nslices: Option<u32>,
    slice_no: Option<u32>,
    studyid: Option<String>,
    gradients: Option<Gradients>,
}

impl Header {
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn voxel_dim(&self) -> &[f64] {
        &self.voxel_dim
    }

    #[inline]
    pub fn real_voxel_dim(&self) -> &[f64] {
        &self.real_voxel_dim
    }

    #[inline]
    pub fn xyz_units(&self) -> Option<&str> {
        self.xyz_units.as_deref()
    }

    #[inline]
    pub fn t_units(&self) -> Option<&str> {
        self.t_units.as_deref()
    }

    #[inline]
    pub fn orientation(&self) -> Option<&[f64; 9]> {
        self.orientation.as_ref()
    }

    #[inline]
    pub fn origin(&self) -> Option<&[f64]> {
        self.origin.as_deref()
    }

    #[inline]
    pub fn array_dim(&self) -> Option<f64> {
        self.array_dim
    }

    /// Repetition count along the slice axis, `array_dim` truncated to an
    /// integer.
    pub fn repetitions(&self) -> Result<i64> {
        self.array_dim
            .map(|dim| dim as i64)
            .ok_or(Error::MissingField("array_dim"))
    }

    #[inline]
    pub fn format(&self) -> PackFormat {
        self.format
    }

    #[inline]
    pub fn nechoes(&self) -> Option<u32> {
        self.nechoes
    }

    #[inline]
    pub fn echo_no(&self) -> Option<u32> {
        self.echo_no
    }

    #[inline]
    pub fn nslices(&self) -> Option<u32> {
        self.nslices
    }

    #[inline]
    pub fn slice_no(&self) -> Option<u32> {
        self.slice_no
    }

    #[inline]
    pub fn studyid(&self) -> Option<&str> {
        self.studyid.as_deref()
    }

    #[inline]
    pub fn gradients(&self) -> Option<&Gradients> {
        self.gradients.as_ref()
    }

    /// Returns this header carrying diffusion gradient information.
    pub fn with_gradients(self, gradients: Gradients) -> Self {
        Self {
            gradients: Some(gradients),
            ..self
        }
    }

    /// Inverse of the direction cosines, before voxel scaling and the switch
    /// to RAS+ axes.
    pub fn affine(&self) -> Result<Matrix4<f64>> {
        geometry::affine(self.orientation.as_ref())
    }

    /// Voxel-to-world transform for a NIfTI qform: directions scaled by
    /// [`voxel_dim`](Self::voxel_dim), x and y mirrored into RAS+, and the
    /// negated origin as translation.
    pub fn qform(&self) -> Result<Matrix4<f64>> {
        geometry::qform(
            self.orientation.as_ref(),
            &self.voxel_dim,
            self.origin.as_deref(),
        )
    }

    /// Copy of this header describing an assembled array.
    pub(crate) fn with_geometry(&self, shape: Vec<usize>, voxel_dim: Vec<f64>) -> Self {
        Self {
            shape,
            voxel_dim,
            ..self.clone()
        }
    }
}

/// Reads the text header of an FDF stream.
///
/// Stops at the first line starting with a form feed and returns the header
/// together with the byte offset of that form feed. Only the form feed itself
/// is consumed, so the reader is left on the first payload byte.
pub fn parse_header<R: BufRead>(reader: &mut R) -> Result<(Header, u64)> {
    let mut builder = HeaderBuilder::new();
    let mut line = Vec::new();
    let mut offset = 0u64;

    loop {
        let at_sentinel = match reader.fill_buf()?.first() {
            Some(&byte) => byte == FORM_FEED,
            None => return Err(Error::MissingSentinel),
        };
        if at_sentinel {
            reader.consume(1);
            break;
        }

        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        let text = std::str::from_utf8(&line).map_err(|_| Error::MalformedHeader {
            field: "text",
            line: String::from_utf8_lossy(&line).into_owned(),
        })?;
        builder.parse_line(text)?;
        offset += read as u64;
    }

    let header = builder.finish()?;
    log::debug!(
        "parsed header: shape {:?}, {:?} endian, voxel_dim {:?}, format {}",
        header.shape(),
        header.endian(),
        header.voxel_dim(),
        header.format()
    );
    Ok((header, offset))
}
