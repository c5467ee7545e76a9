use std::io::{BufRead, Seek};
use std::path::Path;

use ndarray::{ArrayD, Axis, IxDyn};

use crate::{Error, Gradients, Header, Result, orient, parse_header, read_payload};

/// One decoded FDF file.
#[derive(Debug, Clone)]
pub struct Slice {
    data: ArrayD<f32>,
    header: Header,
}

impl Slice {
    #[inline]
    pub fn new(data: ArrayD<f32>, header: Header) -> Self {
        Self { data, header }
    }

    #[inline]
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn into_parts(self) -> (ArrayD<f32>, Header) {
        (self.data, self.header)
    }
}

/// A 3D or 4D image with its consolidated header.
#[derive(Debug, Clone)]
pub struct Volume {
    data: ArrayD<f32>,
    header: Header,
}

impl Volume {
    #[inline]
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn into_parts(self) -> (ArrayD<f32>, Header) {
        (self.data, self.header)
    }

    pub fn with_gradients(self, gradients: Gradients) -> Self {
        Self {
            data: self.data,
            header: self.header.with_gradients(gradients),
        }
    }

    /// Writes `bval`/`bvec` side-cars when the header carries gradients.
    /// Returns whether anything was written.
    pub fn save_gradients(
        &self,
        bval_path: impl AsRef<Path>,
        bvec_path: impl AsRef<Path>,
    ) -> Result<bool> {
        match self.header.gradients() {
            Some(gradients) => {
                gradients.save(bval_path, bvec_path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl From<Slice> for Volume {
    fn from(slice: Slice) -> Self {
        Self {
            data: slice.data,
            header: slice.header,
        }
    }
}

/// Decodes one FDF stream: header, payload, then orientation.
pub fn read_slice<R: BufRead + Seek>(reader: &mut R) -> Result<Slice> {
    let (header, header_end) = parse_header(reader)?;
    let values = read_payload(reader, header.format(), header_end)?;
    let data = orient(values, header.shape())?;
    Ok(Slice { data, header })
}

/// Stacks 2D slices into (x, y, slice), splitting the slice axis into
/// (space, time) when the header declares repetitions.
fn stack_planes(stacked: ArrayD<f32>, base: &Header) -> Result<(ArrayD<f32>, Vec<f64>)> {
    if stacked.ndim() != 3 {
        return Err(Error::Shape(format!(
            "cannot assemble slices of shape {:?}",
            &stacked.shape()[1..]
        )));
    }
    let mut data = stacked.permuted_axes(IxDyn(&[1, 2, 0]));
    let shape = data.shape().to_vec();

    let mut voxel_dim = base.voxel_dim().to_vec();
    if shape.len() > voxel_dim.len() {
        let missing = shape.len() - voxel_dim.len();
        let tail: Vec<f64> = base
            .real_voxel_dim()
            .iter()
            .skip(voxel_dim.len())
            .take(missing)
            .copied()
            .collect();
        voxel_dim.extend(tail);
    }

    let time = base.repetitions()?;
    if time > 1 {
        let time = time as usize;
        let depth = shape[2];
        if depth % time != 0 {
            return Err(Error::Shape(format!(
                "{depth} slices do not split into {time} repetitions"
            )));
        }
        let split = [shape[0], shape[1], depth / time, time];
        log::debug!("splitting {depth} slices into {} x {time}", depth / time);
        voxel_dim.push(1.0);
        data = data
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&split))
            .map_err(|e| Error::Shape(format!("cannot reshape to {split:?}: {e}")))?;
    }

    Ok((data, voxel_dim))
}

/// Stacks slices that are volumes themselves into a 4D image.
fn stack_volumes(stacked: ArrayD<f32>, base: &Header) -> Result<(ArrayD<f32>, Vec<f64>)> {
    if stacked.ndim() != 4 {
        return Err(Error::Shape(format!(
            "cannot assemble slices of shape {:?}",
            &stacked.shape()[1..]
        )));
    }
    let mut data = stacked.permuted_axes(IxDyn(&[3, 2, 1, 0]));
    data.swap_axes(0, 1);

    let mut voxel_dim = base.voxel_dim().to_vec();
    voxel_dim.push(1.0);
    Ok((data, voxel_dim))
}

/// Assembles decoded slices into one volume.
///
/// `slices` must already be in acquisition order (sorted file names); it
/// defines the order along the stacking axis. The first slice's header is
/// the base of the result, with shape and voxel spacing replaced.
pub fn assemble(slices: Vec<Slice>) -> Result<Volume> {
    let first = slices.first().ok_or(Error::EmptyInput)?;
    let base = &first.header;
    let slice_shape = first.data.shape();

    if let Some((idx, odd)) = slices
        .iter()
        .enumerate()
        .find(|(_, slice)| slice.data.shape() != slice_shape)
    {
        return Err(Error::Shape(format!(
            "slice {idx} has shape {:?}, expected {slice_shape:?}",
            odd.data.shape()
        )));
    }

    let views: Vec<_> = slices.iter().map(|slice| slice.data.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)
        .map_err(|e| Error::Shape(format!("cannot stack slices: {e}")))?;

    let (data, voxel_dim) = if stacked.ndim() < 4 {
        stack_planes(stacked, base)?
    } else {
        stack_volumes(stacked, base)?
    };

    let data = data.as_standard_layout().into_owned();
    let header = base.with_geometry(data.shape().to_vec(), voxel_dim);
    log::debug!(
        "assembled {} slices into {:?}, voxel_dim {:?}",
        slices.len(),
        header.shape(),
        header.voxel_dim()
    );

    Ok(Volume { data, header })
}
