//! Diffusion gradients from the `procpar` acquisition parameter file, and
//! the FSL-style `bval`/`bvec` side-car files derived from them.
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::{Error, Result};

/// b-values and gradient directions, one entry per acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub bvalues: Vec<f64>,
    /// Phase-encode direction (`dpe`), negated to go from LAS to RAS.
    pub x: Vec<f64>,
    /// Readout direction (`dro`).
    pub y: Vec<f64>,
    /// Slice direction (`dsl`).
    pub z: Vec<f64>,
}

/// Values on the line following a parameter name. The first token repeats
/// the value count and is skipped.
fn values(field: &'static str, line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .skip(1)
        .map(|token| {
            token.parse::<f64>().map_err(|_| Error::InvalidValue {
                field,
                value: token.to_owned(),
            })
        })
        .collect()
}

/// Formats a float the way the downstream tools write them: integral values
/// keep one decimal (`1000.0`).
fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|&v| format_value(v))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Gradients {
    /// Extracts gradients from procpar text.
    ///
    /// Returns `None` unless `bvalue`, `dpe`, `dro` and `dsl` are all present.
    pub fn parse<R: BufRead>(reader: R) -> Result<Option<Self>> {
        let (mut bval, mut dpe, mut dro, mut dsl) = (None, None, None, None);

        let mut lines = reader.lines();
        while let Some(line) = lines.next() {
            let line = line?;
            if line.starts_with("bvalue") {
                bval = lines.next().transpose()?;
            } else if line.starts_with("dpe ") {
                dpe = lines.next().transpose()?;
            } else if line.starts_with("dro ") {
                dro = lines.next().transpose()?;
            } else if line.starts_with("dsl ") {
                dsl = lines.next().transpose()?;
            }
        }

        let (Some(bval), Some(dpe), Some(dro), Some(dsl)) = (bval, dpe, dro, dsl) else {
            log::debug!("procpar lacks complete gradient information");
            return Ok(None);
        };

        Ok(Some(Self {
            bvalues: values("bvalue", &bval)?,
            x: values("dpe", &dpe)?.into_iter().map(|v| -v).collect(),
            y: values("dro", &dro)?,
            z: values("dsl", &dsl)?,
        }))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Writes the b-values as one space-separated line.
    pub fn write_bvals<W: Write>(&self, mut writer: W) -> Result<()> {
        write!(writer, "{}", join(&self.bvalues))?;
        Ok(())
    }

    /// Writes the x, y and z components as three space-separated lines.
    pub fn write_bvecs<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "{}", join(&self.x))?;
        writeln!(writer, "{}", join(&self.y))?;
        write!(writer, "{}", join(&self.z))?;
        Ok(())
    }

    /// Writes the `bval` and `bvec` side-car files.
    pub fn save(&self, bval_path: impl AsRef<Path>, bvec_path: impl AsRef<Path>) -> Result<()> {
        let bval_path = bval_path.as_ref();
        let file = File::create(bval_path).map_err(|e| Error::from(e).in_file(bval_path))?;
        let mut bvals = BufWriter::new(file);
        self.write_bvals(&mut bvals)?;
        bvals.flush()?;

        let bvec_path = bvec_path.as_ref();
        let file = File::create(bvec_path).map_err(|e| Error::from(e).in_file(bvec_path))?;
        let mut bvecs = BufWriter::new(file);
        self.write_bvecs(&mut bvecs)?;
        bvecs.flush()?;
        Ok(())
    }
}
