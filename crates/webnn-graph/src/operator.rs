//! Operators: the computation steps of a graph
//!
//! `OperatorKind` is a closed, internally tagged enum; every variant carries
//! its own attribute record so that the JSON form of a graph is
//! self-describing:
//!
//! ```json
//! { "kind": { "type": "conv2d", "padding": [1, 1, 1, 1] }, "inputs": [0, 1], "outputs": [2] }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::operand::OperandId;

/// Elementwise binary operators (numpy broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Pow => "pow",
        }
    }
}

/// Comparison operators; the graph-level result is uint8 (0 or 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Equal,
    Greater,
    GreaterOrEqual,
    Lesser,
    LesserOrEqual,
}

impl ComparisonOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "equal",
            ComparisonOp::Greater => "greater",
            ComparisonOp::GreaterOrEqual => "greater_or_equal",
            ComparisonOp::Lesser => "lesser",
            ComparisonOp::LesserOrEqual => "lesser_or_equal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Ceil,
    Cos,
    Exp,
    Floor,
    Log,
    Neg,
    Reciprocal,
    Sin,
    Sqrt,
    Tan,
}

impl UnaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Cos => "cos",
            UnaryOp::Exp => "exp",
            UnaryOp::Floor => "floor",
            UnaryOp::Log => "log",
            UnaryOp::Neg => "neg",
            UnaryOp::Reciprocal => "reciprocal",
            UnaryOp::Sin => "sin",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Tan => "tan",
        }
    }

    /// Accepts signed integer inputs as well as floats.
    pub const fn accepts_integers(self) -> bool {
        matches!(self, UnaryOp::Abs | UnaryOp::Neg)
    }
}

/// Axis order of 4-D image tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    #[default]
    Nchw,
    Nhwc,
}

impl InputLayout {
    /// Permutation taking this layout to NCHW.
    pub const fn to_nchw(self) -> [u32; 4] {
        match self {
            InputLayout::Nchw => [0, 1, 2, 3],
            InputLayout::Nhwc => [0, 3, 1, 2],
        }
    }

    /// Permutation taking NCHW back to this layout.
    pub const fn from_nchw(self) -> [u32; 4] {
        match self {
            InputLayout::Nchw => [0, 1, 2, 3],
            InputLayout::Nhwc => [0, 2, 3, 1],
        }
    }

    /// Indices of the (channel, height, width) axes.
    pub const fn chw_axes(self) -> (usize, usize, usize) {
        match self {
            InputLayout::Nchw => (1, 2, 3),
            InputLayout::Nhwc => (3, 1, 2),
        }
    }
}

/// Activation fused into a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu { alpha: f32 },
    Clamp { min_value: f32, max_value: f32 },
}

impl Activation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::LeakyRelu { .. } => "leaky_relu",
            Activation::Clamp { .. } => "clamp",
        }
    }
}

fn ones2() -> [u32; 2] {
    [1, 1]
}

fn one() -> u32 {
    1
}

fn one_f32() -> f32 {
    1.0
}

/// Convolution attributes. The filter is always OIHW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dAttributes {
    /// `[top, bottom, left, right]`
    #[serde(default)]
    pub padding: [u32; 4],
    #[serde(default = "ones2")]
    pub strides: [u32; 2],
    #[serde(default = "ones2")]
    pub dilations: [u32; 2],
    #[serde(default = "one")]
    pub groups: u32,
    #[serde(default)]
    pub input_layout: InputLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<Activation>,
}

impl Default for Conv2dAttributes {
    fn default() -> Self {
        Self {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
            input_layout: InputLayout::Nchw,
            activation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Average,
    Max,
}

/// Pooling attributes. Output sizes round down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool2dAttributes {
    pub kind: PoolKind,
    /// Defaults to the full spatial extent of the input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_dimensions: Option<[u32; 2]>,
    /// `[top, bottom, left, right]`
    #[serde(default)]
    pub padding: [u32; 4],
    #[serde(default = "ones2")]
    pub strides: [u32; 2],
    #[serde(default = "ones2")]
    pub dilations: [u32; 2],
    #[serde(default)]
    pub layout: InputLayout,
}

impl Pool2dAttributes {
    pub fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            window_dimensions: None,
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            layout: InputLayout::Nchw,
        }
    }

    pub fn with_window(mut self, height: u32, width: u32) -> Self {
        self.window_dimensions = Some([height, width]);
        self
    }
}

/// `alpha * A' * B' + beta * C`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmAttributes {
    #[serde(default = "one_f32")]
    pub alpha: f32,
    #[serde(default = "one_f32")]
    pub beta: f32,
    #[serde(default)]
    pub a_transpose: bool,
    #[serde(default)]
    pub b_transpose: bool,
}

impl Default for GemmAttributes {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    #[default]
    NearestNeighbor,
    Linear,
}

fn spatial_axes() -> [u32; 2] {
    [2, 3]
}

/// Two-axis resampling. `sizes` wins over `scales` when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resample2dAttributes {
    #[serde(default)]
    pub mode: InterpolationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scales: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<[u32; 2]>,
    #[serde(default = "spatial_axes")]
    pub axes: [u32; 2],
}

impl Default for Resample2dAttributes {
    fn default() -> Self {
        Self {
            mode: InterpolationMode::NearestNeighbor,
            scales: None,
            sizes: None,
            axes: [2, 3],
        }
    }
}

/// Closed operator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorKind {
    ElementwiseBinary { op: BinaryOp },
    Comparison { op: ComparisonOp },
    ElementwiseUnary { op: UnaryOp },
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu {
        #[serde(default = "default_leaky_alpha")]
        alpha: f32,
    },
    /// Row-wise softmax over a 2-D input
    Softmax,
    Clamp {
        #[serde(default = "f32_lowest")]
        min_value: f32,
        #[serde(default = "f32_max")]
        max_value: f32,
    },
    Conv2d(Conv2dAttributes),
    Pool2d(Pool2dAttributes),
    /// Target shape is the output operand's dimensions
    Reshape,
    Transpose { permutation: Vec<u32> },
    Concat { axis: u32 },
    Gemm(GemmAttributes),
    /// Target type is the output operand's data type
    Cast,
    Resample2d(Resample2dAttributes),
    Gather {
        #[serde(default)]
        axis: u32,
    },
}

fn default_leaky_alpha() -> f32 {
    0.01
}

fn f32_lowest() -> f32 {
    f32::MIN
}

fn f32_max() -> f32 {
    f32::MAX
}

impl OperatorKind {
    pub const fn add() -> Self {
        OperatorKind::ElementwiseBinary { op: BinaryOp::Add }
    }

    pub const fn binary(op: BinaryOp) -> Self {
        OperatorKind::ElementwiseBinary { op }
    }

    pub const fn comparison(op: ComparisonOp) -> Self {
        OperatorKind::Comparison { op }
    }

    pub const fn unary(op: UnaryOp) -> Self {
        OperatorKind::ElementwiseUnary { op }
    }

    /// Short name used in error messages and traces.
    pub const fn name(&self) -> &'static str {
        match self {
            OperatorKind::ElementwiseBinary { op } => op.as_str(),
            OperatorKind::Comparison { op } => op.as_str(),
            OperatorKind::ElementwiseUnary { op } => op.as_str(),
            OperatorKind::Relu => "relu",
            OperatorKind::Sigmoid => "sigmoid",
            OperatorKind::Tanh => "tanh",
            OperatorKind::LeakyRelu { .. } => "leaky_relu",
            OperatorKind::Softmax => "softmax",
            OperatorKind::Clamp { .. } => "clamp",
            OperatorKind::Conv2d(_) => "conv2d",
            OperatorKind::Pool2d(attrs) => match attrs.kind {
                PoolKind::Average => "average_pool2d",
                PoolKind::Max => "max_pool2d",
            },
            OperatorKind::Reshape => "reshape",
            OperatorKind::Transpose { .. } => "transpose",
            OperatorKind::Concat { .. } => "concat",
            OperatorKind::Gemm(_) => "gemm",
            OperatorKind::Cast => "cast",
            OperatorKind::Resample2d(_) => "resample2d",
            OperatorKind::Gather { .. } => "gather",
        }
    }

    /// Accepted number of inputs, `(min, max)`.
    pub const fn input_arity(&self) -> (usize, usize) {
        match self {
            OperatorKind::ElementwiseBinary { .. }
            | OperatorKind::Comparison { .. }
            | OperatorKind::Gather { .. } => (2, 2),
            OperatorKind::Conv2d(_) | OperatorKind::Gemm(_) => (2, 3),
            OperatorKind::Concat { .. } => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One computation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub kind: OperatorKind,
    pub inputs: Vec<OperandId>,
    pub outputs: Vec<OperandId>,
}

impl Operator {
    pub fn new(kind: OperatorKind, inputs: impl Into<Vec<OperandId>>, output: OperandId) -> Self {
        Self {
            kind,
            inputs: inputs.into(),
            outputs: vec![output],
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
