//! # webnn-graph
//!
//! Backend-neutral graph IR for the WebNN engine.
//!
//! A [`GraphInfo`] is an operand table plus a topologically ordered operator
//! list. It is built with [`GraphBuilder`] or parsed from JSON, checked once
//! with [`validate`], and then handed to a backend for lowering. Lowering
//! works on [`TensorDescriptor`]s, which describe broadcast and transposed
//! views of a buffer without copying it.
//!
//! ```rust
//! use webnn_graph::{validate, DataType, GraphBuilder, OperatorKind};
//!
//! let mut builder = GraphBuilder::new();
//! let x = builder.input("input", DataType::Float32, &[1, 2, 3, 4]);
//! builder.output_operation("output", OperatorKind::Relu, &[x]).unwrap();
//! let graph = builder.build();
//!
//! assert!(validate(&graph).is_ok());
//! ```

pub mod builder;
pub mod data_type;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod infer;
pub mod operand;
pub mod operator;
pub mod shape;
pub mod validator;

pub use builder::GraphBuilder;
pub use data_type::{DataType, SupportedDataTypes};
pub use descriptor::{TensorDescriptor, TensorFlags};
pub use error::{Result, ShapeError, ValidationError};
pub use graph::GraphInfo;
pub use infer::{infer_output, Inferred};
pub use operand::{Operand, OperandId, OperandKind};
pub use operator::{
    Activation, BinaryOp, ComparisonOp, Conv2dAttributes, GemmAttributes, InputLayout,
    InterpolationMode, Operator, OperatorKind, Pool2dAttributes, PoolKind, Resample2dAttributes,
    UnaryOp,
};
pub use validator::validate;
