//! Backend node graph produced by lowering

use serde::Serialize;
use std::fmt;

use webnn_graph::{
    Activation, BinaryOp, ComparisonOp, GemmAttributes, InterpolationMode, OperandId, PoolKind,
    TensorDescriptor, UnaryOp,
};

/// Index of a node in [`LoweredGraph::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a node input's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeSource {
    /// Program input slot (graph input or constant)
    Slot(u32),
    /// Output of an earlier node
    Node(NodeId),
}

/// A producer plus the view consumers read it through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutput {
    pub source: NodeSource,
    pub desc: TensorDescriptor,
}

/// Name of a node's result.
///
/// Internal names come from a counter local to one lowering pass and can
/// never collide with an operand id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeLabel {
    Operand(OperandId),
    Internal(u64),
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeLabel::Operand(id) => write!(f, "operand {id}"),
            NodeLabel::Internal(n) => write!(f, "internal #{n}"),
        }
    }
}

/// `x * scale + bias`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleBias {
    pub scale: f32,
    pub bias: f32,
}

/// Backend-native operations. Spatial operations are channel-first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    Identity {
        scale_bias: Option<ScaleBias>,
    },
    Binary(BinaryOp),
    Compare(ComparisonOp),
    Unary(UnaryOp),
    Activation(Activation),
    Softmax,
    Conv2d {
        padding: [u32; 4],
        strides: [u32; 2],
        dilations: [u32; 2],
        groups: u32,
        activation: Option<Activation>,
    },
    Pool2d {
        kind: PoolKind,
        window: [u32; 2],
        padding: [u32; 4],
        strides: [u32; 2],
        dilations: [u32; 2],
    },
    Gemm(GemmAttributes),
    Concat {
        axis: u32,
    },
    Cast,
    Resample2d {
        mode: InterpolationMode,
        scales: [f32; 2],
    },
}

impl NodeKind {
    pub const fn name(&self) -> &'static str {
        match self {
            NodeKind::Identity { .. } => "identity",
            NodeKind::Binary(op) => op.as_str(),
            NodeKind::Compare(op) => op.as_str(),
            NodeKind::Unary(op) => op.as_str(),
            NodeKind::Activation(activation) => activation.as_str(),
            NodeKind::Softmax => "softmax",
            NodeKind::Conv2d { .. } => "conv2d",
            NodeKind::Pool2d { .. } => "pool2d",
            NodeKind::Gemm(_) => "gemm",
            NodeKind::Concat { .. } => "concat",
            NodeKind::Cast => "cast",
            NodeKind::Resample2d { .. } => "resample2d",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<NodeOutput>,
    /// Layout the node writes through; may be strided when the stored
    /// result keeps a layout different from the one the node computes in
    pub output: TensorDescriptor,
    pub label: NodeLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SlotKind {
    Input { name: String },
    Constant,
}

/// Positional input binding of a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSlot {
    pub operand: OperandId,
    pub kind: SlotKind,
    pub desc: TensorDescriptor,
}

impl InputSlot {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            SlotKind::Input { name } => Some(name),
            SlotKind::Constant => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.kind == SlotKind::Constant
    }

    /// Packed byte length the slot binding must cover.
    pub fn byte_length(&self) -> usize {
        self.desc.packed_byte_length().unwrap_or(0)
    }
}

/// Positional output binding of a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSlot {
    pub name: String,
    pub operand: OperandId,
    pub node: NodeId,
    pub desc: TensorDescriptor,
}

impl OutputSlot {
    pub fn byte_length(&self) -> usize {
        self.desc.packed_byte_length().unwrap_or(0)
    }
}

/// Result of one lowering pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredGraph {
    pub nodes: Vec<Node>,
    pub input_slots: Vec<InputSlot>,
    pub output_slots: Vec<OutputSlot>,
}

impl LoweredGraph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn input_slot(&self, name: &str) -> Option<(usize, &InputSlot)> {
        self.input_slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.name() == Some(name))
    }

    pub fn constant_slots(&self) -> impl Iterator<Item = (usize, &InputSlot)> {
        self.input_slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_constant())
    }

    /// Output slot a node writes into directly, if any.
    pub fn output_slot_of(&self, node: NodeId) -> Option<usize> {
        self.output_slots.iter().position(|slot| slot.node == node)
    }

    /// Deterministic byte form, used to share compiled programs.
    pub fn fingerprint(&self) -> Vec<u8> {
        // Serializing plain data to a Vec cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
