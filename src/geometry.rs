//! Reconciles the scanner's pixel ordering with the volume axis convention.
use nalgebra::{Matrix3, Matrix4, Vector3};
use ndarray::{ArrayD, Axis, IxDyn};

use crate::{Error, Result};

/// Physical size of one voxel per axis: the field of view divided by the
/// matrix size. Extra entries on either side are ignored.
pub fn voxel_spacing(shape: &[usize], real_voxel_dim: &[f64]) -> Vec<f64> {
    shape
        .iter()
        .zip(real_voxel_dim)
        .map(|(&len, &extent)| extent / len as f64)
        .collect()
}

/// Rotates `array` by 90° `turns` times in the plane of its first two axes,
/// counter-clockwise from axis 0 towards axis 1.
pub fn rot90<T>(mut array: ArrayD<T>, turns: usize) -> Result<ArrayD<T>> {
    if array.ndim() < 2 {
        return Err(Error::Shape(format!(
            "cannot rotate a {}-dimensional array",
            array.ndim()
        )));
    }
    for _ in 0..turns % 4 {
        array.invert_axis(Axis(1));
        array.swap_axes(0, 1);
    }
    Ok(array)
}

fn squeeze<T>(mut array: ArrayD<T>) -> ArrayD<T> {
    while let Some(axis) = array.shape().iter().position(|&len| len == 1) {
        array = array.index_axis_move(Axis(axis), 0);
    }
    array
}

/// Shapes a decoded payload into an oriented array.
///
/// The payload is laid out with the first declared dimension varying
/// fastest. Singleton axes are dropped, 3D data is brought from
/// (x, y, z) to (z, y, x) storage order, and the in-plane axes are rotated by
/// 270° and then flipped along axis 1 to match the scanner's acquisition
/// handedness.
pub fn orient(values: Vec<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    let native: Vec<usize> = shape.iter().rev().copied().collect();
    let len = values.len();
    let array = ArrayD::from_shape_vec(IxDyn(&native), values)
        .map_err(|e| Error::Shape(format!("cannot reshape {len} values to {native:?}: {e}")))?;
    let mut array = squeeze(array);

    if shape.len() > 2 {
        match array.ndim() {
            3 => array = array.permuted_axes(IxDyn(&[2, 1, 0])),
            // Singleton axes were squeezed away; nothing left to permute.
            0..=2 => {}
            n => {
                return Err(Error::Shape(format!(
                    "matrix {shape:?} decodes to {n} non-singleton axes"
                )));
            }
        }
    }

    let mut array = rot90(array, 3)?;
    array.invert_axis(Axis(1));
    Ok(array.as_standard_layout().into_owned())
}

/// Inverse of the direction cosines as a homogeneous transform, identity when
/// no orientation is declared.
pub(crate) fn affine(orientation: Option<&[f64; 9]>) -> Result<Matrix4<f64>> {
    Ok(directions(orientation)?.to_homogeneous())
}

/// Voxel-to-world transform in RAS+ handed to the NIfTI writer.
///
/// Direction columns are scaled to unit length and then by the voxel size
/// (missing axes count as 1). The x and y rows are mirrored and the
/// translation column carries the negated origin.
pub(crate) fn qform(
    orientation: Option<&[f64; 9]>,
    voxel_dim: &[f64],
    origin: Option<&[f64]>,
) -> Result<Matrix4<f64>> {
    let directions = directions(orientation)?;
    let zooms = Vector3::from_fn(|i, _| voxel_dim.get(i).copied().unwrap_or(1.0));
    let norms = Vector3::from_fn(|i, _| directions.column(i).norm());
    let las_to_ras = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0));

    let rotation = las_to_ras * directions * Matrix3::from_diagonal(&zooms.component_div(&norms));
    let mut qform = rotation.to_homogeneous();
    if let Some(origin) = origin {
        for (row, &value) in origin.iter().take(3).enumerate() {
            qform[(row, 3)] = -value;
        }
    }
    Ok(qform)
}

fn directions(orientation: Option<&[f64; 9]>) -> Result<Matrix3<f64>> {
    match orientation {
        Some(cosines) => Matrix3::from_row_slice(cosines)
            .try_inverse()
            .ok_or(Error::SingularOrientation),
        None => Ok(Matrix3::identity()),
    }
}
