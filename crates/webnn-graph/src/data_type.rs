//! Operand element types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width element type of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float32,
    Float16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int8,
    Uint8,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Float32,
        DataType::Float16,
        DataType::Int32,
        DataType::Uint32,
        DataType::Int64,
        DataType::Uint64,
        DataType::Int8,
        DataType::Uint8,
    ];

    /// Size of one element in bytes.
    pub const fn bytes_per_element(self) -> usize {
        match self {
            DataType::Float32 | DataType::Int32 | DataType::Uint32 => 4,
            DataType::Float16 => 2,
            DataType::Int64 | DataType::Uint64 => 8,
            DataType::Int8 | DataType::Uint8 => 1,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float16)
    }

    pub const fn is_signed(self) -> bool {
        !matches!(self, DataType::Uint32 | DataType::Uint64 | DataType::Uint8)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float16 => "float16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small set of data types, used for per-operator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SupportedDataTypes(u16);

impl SupportedDataTypes {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < DataType::ALL.len() {
            bits |= DataType::ALL[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn from_slice(types: &[DataType]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < types.len() {
            bits |= types[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn float16_to_32() -> Self {
        Self::from_slice(&[DataType::Float16, DataType::Float32])
    }

    pub const fn contains(self, data_type: DataType) -> bool {
        self.0 & data_type.bit() != 0
    }

    pub const fn with(self, data_type: DataType) -> Self {
        Self(self.0 | data_type.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = DataType> {
        DataType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl fmt::Display for SupportedDataTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(DataType::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
