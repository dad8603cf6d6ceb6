//! Shape arithmetic shared by validation, lowering and the reference kernels
//!
//! Dimensions are `u32` throughout, matching the wire format of graph
//! descriptions; counts are widened to `usize` with overflow checks.

use crate::data_type::DataType;
use crate::error::ShapeError;

/// Number of elements, or an error if the product overflows `usize`.
pub fn element_count(dimensions: &[u32]) -> Result<usize, ShapeError> {
    dimensions.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d as usize)
            .ok_or_else(|| ShapeError::Overflow(dimensions.to_vec()))
    })
}

/// Packed byte length of a tensor, `None` on overflow.
pub fn byte_length(dimensions: &[u32], data_type: DataType) -> Option<usize> {
    element_count(dimensions)
        .ok()?
        .checked_mul(data_type.bytes_per_element())
}

/// Broadcast two shapes with the numpy general broadcasting rule.
///
/// Shapes are right-aligned; each aligned pair must be equal or contain a 1.
/// A pair with a zero-sized side is rejected.
pub fn broadcast_shapes(lhs: &[u32], rhs: &[u32]) -> Result<Vec<u32>, ShapeError> {
    let rank = lhs.len().max(rhs.len());
    let mut result = Vec::with_capacity(rank);

    for i in 0..rank {
        let a = lhs.len().checked_sub(i + 1).map(|idx| lhs[idx]).unwrap_or(1);
        let b = rhs.len().checked_sub(i + 1).map(|idx| rhs[idx]).unwrap_or(1);
        let axis = rank - i - 1;

        if a == 0 || b == 0 {
            return Err(ShapeError::ZeroSizedDimension {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
                axis,
            });
        }

        if a == b || b == 1 {
            result.push(a);
        } else if a == 1 {
            result.push(b);
        } else {
            return Err(ShapeError::NotBroadcastable {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
                axis,
            });
        }
    }

    result.reverse();
    Ok(result)
}

/// True if `from` can be stretched to `to` without changing `to`.
pub fn is_unidirectionally_broadcastable(from: &[u32], to: &[u32]) -> bool {
    if from.len() > to.len() {
        return false;
    }
    from.iter()
        .rev()
        .zip(to.iter().rev())
        .all(|(&f, &t)| f == t || f == 1)
}

/// Row-major element strides for `dimensions`.
pub fn default_strides(dimensions: &[u32]) -> Vec<u32> {
    let mut strides = vec![1u32; dimensions.len()];
    for i in (0..dimensions.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1].saturating_mul(dimensions[i + 1]);
    }
    strides
}

/// Check that `permutation` is a permutation of `0..rank`.
pub fn validate_permutation(permutation: &[u32], rank: usize) -> Result<(), ShapeError> {
    let invalid = || ShapeError::InvalidPermutation {
        permutation: permutation.to_vec(),
        rank,
    };
    if permutation.len() != rank {
        return Err(invalid());
    }
    let mut seen = vec![false; rank];
    for &axis in permutation {
        let axis = axis as usize;
        if axis >= rank || seen[axis] {
            return Err(invalid());
        }
        seen[axis] = true;
    }
    Ok(())
}

/// Reorder `values` so that `out[i] = values[permutation[i]]`.
pub fn permute<T: Copy>(values: &[T], permutation: &[u32]) -> Vec<T> {
    permutation.iter().map(|&axis| values[axis as usize]).collect()
}

/// Permutation that undoes `permutation`.
pub fn inverse_permutation(permutation: &[u32]) -> Vec<u32> {
    let mut inverse = vec![0u32; permutation.len()];
    for (i, &axis) in permutation.iter().enumerate() {
        inverse[axis as usize] = i as u32;
    }
    inverse
}

/// Output extent of a sliding window along one spatial axis (floor rounding).
pub fn windowed_output_size(
    input: u32,
    window: u32,
    padding_begin: u32,
    padding_end: u32,
    stride: u32,
    dilation: u32,
) -> Result<u32, ShapeError> {
    if stride == 0 || dilation == 0 {
        return Err(ShapeError::invalid("strides and dilations must be positive"));
    }
    if window == 0 {
        return Err(ShapeError::invalid("window size must be positive"));
    }
    let effective_window = (window as u64 - 1) * dilation as u64 + 1;
    let padded = input as u64 + padding_begin as u64 + padding_end as u64;
    if padded < effective_window {
        return Err(ShapeError::invalid(format!(
            "window {effective_window} is larger than the padded input {padded}"
        )));
    }
    let size = (padded - effective_window) / stride as u64 + 1;
    u32::try_from(size).map_err(|_| ShapeError::invalid("output size overflows u32"))
}
