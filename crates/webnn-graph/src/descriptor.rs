//! Backend-facing tensor descriptors
//!
//! A [`TensorDescriptor`] maps a buffer's bytes onto logical tensor indices.
//! Broadcast and transpose are expressed purely by rewriting dimensions and
//! strides; no data is copied.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_type::DataType;
use crate::error::ShapeError;
use crate::operand::Operand;
use crate::shape;

/// Capability flags attached to a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorFlags(u32);

impl TensorFlags {
    pub const NONE: TensorFlags = TensorFlags(0);
    /// Storage is initialised once by the backend and reused across executions.
    pub const OWNED_BY_BACKEND: TensorFlags = TensorFlags(1);

    pub const fn contains(self, other: TensorFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TensorFlags) -> TensorFlags {
        TensorFlags(self.0 | other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub data_type: DataType,
    pub dimensions: Vec<u32>,
    /// Element strides; `None` means packed row-major
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strides: Option<Vec<u32>>,
    #[serde(default)]
    pub flags: TensorFlags,
}

impl TensorDescriptor {
    pub fn new(data_type: DataType, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            data_type,
            dimensions: dimensions.into(),
            strides: None,
            flags: TensorFlags::NONE,
        }
    }

    pub fn from_operand(operand: &Operand) -> Self {
        Self::new(operand.data_type, operand.dimensions.clone())
    }

    pub fn with_flags(mut self, flags: TensorFlags) -> Self {
        self.flags = self.flags.union(flags);
        self
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn element_count(&self) -> usize {
        self.dimensions.iter().map(|&d| d as usize).product()
    }

    /// Strides actually in effect, explicit or row-major.
    pub fn effective_strides(&self) -> Vec<u32> {
        match &self.strides {
            Some(strides) => strides.clone(),
            None => shape::default_strides(&self.dimensions),
        }
    }

    pub fn is_packed(&self) -> bool {
        match &self.strides {
            None => true,
            Some(strides) => *strides == shape::default_strides(&self.dimensions),
        }
    }

    /// Byte length of the logical tensor when stored packed.
    pub fn packed_byte_length(&self) -> Option<usize> {
        shape::byte_length(&self.dimensions, self.data_type)
    }

    /// Bytes of backing storage the view addresses, i.e. one past the
    /// furthest reachable element.
    pub fn total_bytes(&self) -> Option<usize> {
        if self.dimensions.iter().any(|&d| d == 0) {
            return Some(0);
        }
        let strides = self.effective_strides();
        let mut last = 0usize;
        for (&dim, &stride) in self.dimensions.iter().zip(&strides) {
            let span = (dim as usize - 1).checked_mul(stride as usize)?;
            last = last.checked_add(span)?;
        }
        last.checked_add(1)?
            .checked_mul(self.data_type.bytes_per_element())
    }

    /// Zero-stride view that reads this tensor as `target` shape.
    pub fn broadcast_to(&self, target: &[u32]) -> Result<TensorDescriptor, ShapeError> {
        if !shape::is_unidirectionally_broadcastable(&self.dimensions, target) {
            return Err(ShapeError::NotBroadcastable {
                lhs: self.dimensions.clone(),
                rhs: target.to_vec(),
                axis: target.len().saturating_sub(1),
            });
        }

        let source_strides = self.effective_strides();
        let offset = target.len() - self.rank();
        let strides = target
            .iter()
            .enumerate()
            .map(|(axis, &dim)| {
                if axis < offset {
                    return 0;
                }
                let source = axis - offset;
                if self.dimensions[source] == dim {
                    source_strides[source]
                } else {
                    0
                }
            })
            .collect();

        Ok(TensorDescriptor {
            data_type: self.data_type,
            dimensions: target.to_vec(),
            strides: Some(strides),
            flags: self.flags,
        })
    }

    /// View with axes reordered: `out.dimensions[i] = dimensions[permutation[i]]`.
    pub fn transpose(&self, permutation: &[u32]) -> Result<TensorDescriptor, ShapeError> {
        shape::validate_permutation(permutation, self.rank())?;
        let strides = self.effective_strides();
        Ok(TensorDescriptor {
            data_type: self.data_type,
            dimensions: shape::permute(&self.dimensions, permutation),
            strides: Some(shape::permute(&strides, permutation)),
            flags: self.flags,
        })
    }

    /// Same descriptor relabelled to `dimensions`; only valid on packed views.
    pub fn reshape(&self, dimensions: &[u32]) -> Result<TensorDescriptor, ShapeError> {
        let from_count = self.element_count();
        let to_count = shape::element_count(dimensions)?;
        if from_count != to_count {
            return Err(ShapeError::ElementCountMismatch {
                from: self.dimensions.clone(),
                to: dimensions.to_vec(),
                from_count,
                to_count,
            });
        }
        if !self.is_packed() {
            return Err(ShapeError::invalid("cannot reshape a strided view"));
        }
        Ok(TensorDescriptor {
            data_type: self.data_type,
            dimensions: dimensions.to_vec(),
            strides: None,
            flags: self.flags,
        })
    }

    /// True if one descriptor is an axis permutation of the other.
    pub fn is_transform_equivalent(&self, other: &TensorDescriptor) -> bool {
        if self.data_type != other.data_type || self.rank() != other.rank() {
            return false;
        }
        let mut lhs: Vec<(u32, u32)> = self
            .dimensions
            .iter()
            .copied()
            .zip(self.effective_strides())
            .collect();
        let mut rhs: Vec<(u32, u32)> = other
            .dimensions
            .iter()
            .copied()
            .zip(other.effective_strides())
            .collect();
        lhs.sort_unstable();
        rhs.sort_unstable();
        lhs == rhs
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.data_type, self.dimensions)?;
        if let Some(strides) = &self.strides {
            write!(f, " strides={strides:?}")?;
        }
        Ok(())
    }
}
