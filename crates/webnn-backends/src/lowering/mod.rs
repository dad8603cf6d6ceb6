//! Lowering of a validated graph into backend nodes
//!
//! Lowering walks the operator list once, in order, keeping an arena that
//! maps every operand seen so far to the node (or input slot) holding its
//! bytes and the view consumers read it through. Views carry all layout
//! work: broadcasts become zero strides, transposes become permuted strides
//! and reshapes are a relabel of the arena entry.
//!
//! ```text
//! GraphInfo ──► GraphLowering ──► LoweredGraph
//!                  │  arena: OperandId → NodeOutput
//!                  │  input slots created on first use
//!                  └─ identity nodes appended for outputs that need them
//! ```

mod node;

pub use node::{
    InputSlot, LoweredGraph, Node, NodeId, NodeKind, NodeLabel, NodeOutput, NodeSource, OutputSlot,
    ScaleBias, SlotKind,
};

use std::collections::{HashMap, HashSet};

use webnn_graph::{
    Activation, ComparisonOp, DataType, GemmAttributes, GraphInfo, InputLayout, Operand, OperandId,
    OperandKind, Operator, OperatorKind, PoolKind, TensorDescriptor, TensorFlags, UnaryOp,
};

use webnn_tracing::timed_block;

use crate::backend::BackendCapabilities;
use crate::error::{BackendError, Result};

/// Lower `graph` for a backend with `capabilities`.
///
/// The graph must already be validated; structural problems surface as
/// `Binding` errors rather than validation errors.
///
/// # Errors
///
/// `NotSupported` naming the first operator the backend cannot express.
#[tracing::instrument(skip(graph, capabilities), fields(operators = graph.operators.len()))]
pub fn lower(graph: &GraphInfo, capabilities: &BackendCapabilities) -> Result<LoweredGraph> {
    let (lowered, duration_us) = timed_block!("lower", {
        let mut pass = GraphLowering::new(graph, capabilities);
        for (index, operator) in graph.operators.iter().enumerate() {
            pass.lower_operator(index, operator)?;
        }
        pass.finish()?
    });

    tracing::debug!(
        nodes = lowered.nodes.len(),
        input_slots = lowered.input_slots.len(),
        output_slots = lowered.output_slots.len(),
        duration_us,
        "graph_lowered"
    );
    Ok(lowered)
}

struct GraphLowering<'a> {
    graph: &'a GraphInfo,
    capabilities: &'a BackendCapabilities,
    arena: HashMap<OperandId, NodeOutput>,
    nodes: Vec<Node>,
    input_slots: Vec<InputSlot>,
    next_internal: u64,
}

impl<'a> GraphLowering<'a> {
    fn new(graph: &'a GraphInfo, capabilities: &'a BackendCapabilities) -> Self {
        Self {
            graph,
            capabilities,
            arena: HashMap::new(),
            nodes: Vec::new(),
            input_slots: Vec::new(),
            next_internal: 0,
        }
    }

    fn operand(&self, id: OperandId) -> Result<&'a Operand> {
        self.graph
            .operand(id)
            .map_err(|e| BackendError::binding(e.to_string()))
    }

    /// Arena entry for `id`, creating an input slot for graph inputs and
    /// constants on first use.
    fn value(&mut self, id: OperandId) -> Result<NodeOutput> {
        if let Some(entry) = self.arena.get(&id) {
            return Ok(entry.clone());
        }

        let operand = self.operand(id)?;
        let (kind, desc) = match operand.kind {
            OperandKind::Input => {
                let name = operand
                    .non_empty_name()
                    .ok_or_else(|| BackendError::binding(format!("input operand {id} has no name")))?;
                (
                    SlotKind::Input { name: name.to_string() },
                    TensorDescriptor::from_operand(operand),
                )
            }
            OperandKind::Constant => (
                SlotKind::Constant,
                TensorDescriptor::from_operand(operand).with_flags(TensorFlags::OWNED_BY_BACKEND),
            ),
            OperandKind::Output | OperandKind::Intermediate => {
                return Err(BackendError::binding(format!(
                    "operand {id} is read before it is produced"
                )));
            }
        };

        let slot = self.input_slots.len() as u32;
        self.input_slots.push(InputSlot {
            operand: id,
            kind,
            desc: desc.clone(),
        });
        let entry = NodeOutput {
            source: NodeSource::Slot(slot),
            desc,
        };
        self.arena.insert(id, entry.clone());
        Ok(entry)
    }

    fn push_node(
        &mut self,
        kind: NodeKind,
        inputs: Vec<NodeOutput>,
        output: TensorDescriptor,
        label: NodeLabel,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            kind,
            inputs,
            output,
            label,
        });
        id
    }

    fn internal_label(&mut self) -> NodeLabel {
        let label = NodeLabel::Internal(self.next_internal);
        self.next_internal += 1;
        label
    }

    /// Push a node producing operand `id` and record it in the arena.
    fn emit(
        &mut self,
        id: OperandId,
        kind: NodeKind,
        inputs: Vec<NodeOutput>,
        output: TensorDescriptor,
        stored: TensorDescriptor,
    ) {
        let node = self.push_node(kind, inputs, output, NodeLabel::Operand(id));
        self.arena.insert(
            id,
            NodeOutput {
                source: NodeSource::Node(node),
                desc: stored,
            },
        );
    }

    fn emit_packed(&mut self, id: OperandId, kind: NodeKind, inputs: Vec<NodeOutput>, output: &Operand) {
        let desc = TensorDescriptor::from_operand(output);
        self.emit(id, kind, inputs, desc.clone(), desc);
    }

    fn check_supported(&self, index: usize, operator: &Operator, output: &Operand) -> Result<()> {
        let name = operator.name();
        let max_rank = self.capabilities.max_rank;

        let mut operands = Vec::with_capacity(operator.inputs.len() + 1);
        for &id in &operator.inputs {
            operands.push(self.operand(id)?);
        }
        if let Some(too_big) = operands.iter().chain([&output]).find(|o| o.rank() > max_rank) {
            return Err(BackendError::not_supported(
                name,
                index,
                format!("rank {} exceeds the backend maximum of {max_rank}", too_big.rank()),
            ));
        }

        if let Some(first) = operands.first() {
            if !self.capabilities.data_type_limits.supports(name, first.data_type) {
                return Err(BackendError::not_supported(
                    name,
                    index,
                    format!("data type {} is outside the backend's limits", first.data_type),
                ));
            }
        }
        Ok(())
    }

    fn lower_operator(&mut self, index: usize, operator: &Operator) -> Result<()> {
        let out_id = operator.outputs.first().copied().ok_or_else(|| {
            BackendError::binding(format!("operator {index} ({}) has no output", operator.name()))
        })?;
        let output = self.operand(out_id)?;
        self.check_supported(index, operator, output)?;

        match &operator.kind {
            OperatorKind::ElementwiseBinary { op } => {
                let inputs = self.broadcast_inputs(operator, &output.dimensions)?;
                self.emit_packed(out_id, NodeKind::Binary(*op), inputs, output);
            }
            OperatorKind::Comparison { op } => {
                let inputs = self.broadcast_inputs(operator, &output.dimensions)?;
                self.lower_comparison(out_id, *op, inputs, output);
            }
            OperatorKind::ElementwiseUnary { op: UnaryOp::Neg } => {
                let input = self.value(operator.inputs[0])?;
                let kind = NodeKind::Identity {
                    scale_bias: Some(ScaleBias {
                        scale: -1.0,
                        bias: 0.0,
                    }),
                };
                self.emit_packed(out_id, kind, vec![input], output);
            }
            OperatorKind::ElementwiseUnary { op } => {
                let input = self.value(operator.inputs[0])?;
                self.emit_packed(out_id, NodeKind::Unary(*op), vec![input], output);
            }
            OperatorKind::Relu => self.lower_activation(out_id, Activation::Relu, operator, output)?,
            OperatorKind::Sigmoid => self.lower_activation(out_id, Activation::Sigmoid, operator, output)?,
            OperatorKind::Tanh => self.lower_activation(out_id, Activation::Tanh, operator, output)?,
            OperatorKind::LeakyRelu { alpha } => {
                let activation = Activation::LeakyRelu { alpha: *alpha };
                self.lower_activation(out_id, activation, operator, output)?;
            }
            OperatorKind::Clamp {
                min_value,
                max_value,
            } => {
                let activation = Activation::Clamp {
                    min_value: *min_value,
                    max_value: *max_value,
                };
                self.lower_activation(out_id, activation, operator, output)?;
            }
            OperatorKind::Softmax => {
                let input = self.value(operator.inputs[0])?;
                self.emit_packed(out_id, NodeKind::Softmax, vec![input], output);
            }
            OperatorKind::Conv2d(attrs) => {
                let mut inputs = Vec::with_capacity(operator.inputs.len());
                let input = self.value(operator.inputs[0])?;
                inputs.push(self.to_required_layout(input, attrs.input_layout)?);
                for &id in &operator.inputs[1..] {
                    inputs.push(self.value(id)?);
                }
                let kind = NodeKind::Conv2d {
                    padding: attrs.padding,
                    strides: attrs.strides,
                    dilations: attrs.dilations,
                    groups: attrs.groups,
                    activation: attrs.activation,
                };
                self.emit_spatial(out_id, kind, inputs, output, attrs.input_layout)?;
            }
            OperatorKind::Pool2d(attrs) => {
                if attrs.kind == PoolKind::Average && attrs.dilations != [1, 1] {
                    return Err(BackendError::not_supported(
                        operator.name(),
                        index,
                        "dilated average pooling",
                    ));
                }
                let source = self.operand(operator.inputs[0])?;
                let (_, h_axis, w_axis) = attrs.layout.chw_axes();
                let window = attrs
                    .window_dimensions
                    .unwrap_or([source.dimensions[h_axis], source.dimensions[w_axis]]);

                let input = self.value(operator.inputs[0])?;
                let input = self.to_required_layout(input, attrs.layout)?;
                let kind = NodeKind::Pool2d {
                    kind: attrs.kind,
                    window,
                    padding: attrs.padding,
                    strides: attrs.strides,
                    dilations: attrs.dilations,
                };
                self.emit_spatial(out_id, kind, vec![input], output, attrs.layout)?;
            }
            OperatorKind::Resample2d(attrs) => {
                let layout = match attrs.axes {
                    [2, 3] => InputLayout::Nchw,
                    [1, 2] => InputLayout::Nhwc,
                    axes => {
                        return Err(BackendError::not_supported(
                            operator.name(),
                            index,
                            format!("resampling over axes {axes:?}"),
                        ));
                    }
                };
                let source = self.operand(operator.inputs[0])?;
                let scales = match (attrs.sizes, attrs.scales) {
                    (None, Some(scales)) => scales,
                    _ => {
                        let [a0, a1] = attrs.axes.map(|axis| axis as usize);
                        [
                            output.dimensions[a0] as f32 / source.dimensions[a0] as f32,
                            output.dimensions[a1] as f32 / source.dimensions[a1] as f32,
                        ]
                    }
                };

                let input = self.value(operator.inputs[0])?;
                let input = self.to_required_layout(input, layout)?;
                let kind = NodeKind::Resample2d {
                    mode: attrs.mode,
                    scales,
                };
                self.emit_spatial(out_id, kind, vec![input], output, layout)?;
            }
            OperatorKind::Reshape => {
                let input = self.value(operator.inputs[0])?;
                let input = if input.desc.is_packed() {
                    input
                } else {
                    self.materialize(input)
                };
                let desc = input.desc.reshape(&output.dimensions)?;
                self.arena.insert(
                    out_id,
                    NodeOutput {
                        source: input.source,
                        desc,
                    },
                );
            }
            OperatorKind::Transpose { permutation } => {
                let input = self.value(operator.inputs[0])?;
                let view = NodeOutput {
                    source: input.source,
                    desc: input.desc.transpose(permutation)?,
                };
                self.emit_packed(out_id, NodeKind::Identity { scale_bias: None }, vec![view], output);
            }
            OperatorKind::Concat { axis } => {
                let inputs = operator
                    .inputs
                    .iter()
                    .map(|&id| self.value(id))
                    .collect::<Result<Vec<_>>>()?;
                self.emit_packed(out_id, NodeKind::Concat { axis: *axis }, inputs, output);
            }
            OperatorKind::Gemm(attrs) => {
                let mut a = self.value(operator.inputs[0])?;
                let mut b = self.value(operator.inputs[1])?;
                if attrs.a_transpose {
                    a.desc = a.desc.transpose(&[1, 0])?;
                }
                if attrs.b_transpose {
                    b.desc = b.desc.transpose(&[1, 0])?;
                }
                let mut inputs = vec![a, b];
                if let Some(&c_id) = operator.inputs.get(2) {
                    let c = self.value(c_id)?;
                    inputs.push(NodeOutput {
                        source: c.source,
                        desc: c.desc.broadcast_to(&output.dimensions)?,
                    });
                }
                let kind = NodeKind::Gemm(GemmAttributes {
                    alpha: attrs.alpha,
                    beta: attrs.beta,
                    a_transpose: false,
                    b_transpose: false,
                });
                self.emit_packed(out_id, kind, inputs, output);
            }
            OperatorKind::Cast => {
                let input = self.value(operator.inputs[0])?;
                self.emit_packed(out_id, NodeKind::Cast, vec![input], output);
            }
            OperatorKind::Gather { .. } => {
                return Err(BackendError::not_supported(
                    operator.name(),
                    index,
                    "gather has no device implementation",
                ));
            }
        }
        Ok(())
    }

    fn lower_activation(
        &mut self,
        out_id: OperandId,
        activation: Activation,
        operator: &Operator,
        output: &Operand,
    ) -> Result<()> {
        let input = self.value(operator.inputs[0])?;
        self.emit_packed(out_id, NodeKind::Activation(activation), vec![input], output);
        Ok(())
    }

    fn broadcast_inputs(&mut self, operator: &Operator, target: &[u32]) -> Result<Vec<NodeOutput>> {
        operator
            .inputs
            .iter()
            .map(|&id| {
                let input = self.value(id)?;
                let desc = if input.desc.dimensions == target {
                    input.desc
                } else {
                    input.desc.broadcast_to(target)?
                };
                Ok(NodeOutput {
                    source: input.source,
                    desc,
                })
            })
            .collect()
    }

    /// Native comparison plus a cast when the device's boolean type is not
    /// `uint8`.
    fn lower_comparison(&mut self, out_id: OperandId, op: ComparisonOp, inputs: Vec<NodeOutput>, output: &Operand) {
        let native = self.capabilities.native_boolean;
        if native == DataType::Uint8 {
            self.emit_packed(out_id, NodeKind::Compare(op), inputs, output);
            return;
        }

        let native_desc = TensorDescriptor::new(native, output.dimensions.clone());
        let label = self.internal_label();
        let compare = self.push_node(NodeKind::Compare(op), inputs, native_desc.clone(), label);
        let boolean = NodeOutput {
            source: NodeSource::Node(compare),
            desc: native_desc,
        };
        self.emit_packed(out_id, NodeKind::Cast, vec![boolean], output);
    }

    /// Permutation from `layout` to the backend's required layout.
    fn layout_permutation(&self, layout: InputLayout) -> Option<[u32; 4]> {
        let required = self.capabilities.required_layout;
        if layout == required {
            return None;
        }
        let to_nchw = layout.to_nchw();
        Some(required.from_nchw().map(|axis| to_nchw[axis as usize]))
    }

    fn to_required_layout(&self, input: NodeOutput, layout: InputLayout) -> Result<NodeOutput> {
        match self.layout_permutation(layout) {
            None => Ok(input),
            Some(permutation) => Ok(NodeOutput {
                source: input.source,
                desc: input.desc.transpose(&permutation)?,
            }),
        }
    }

    /// Spatial node computing in the required layout while its stored bytes
    /// stay packed in the caller's layout.
    fn emit_spatial(
        &mut self,
        out_id: OperandId,
        kind: NodeKind,
        inputs: Vec<NodeOutput>,
        output: &Operand,
        layout: InputLayout,
    ) -> Result<()> {
        let stored = TensorDescriptor::from_operand(output);
        let written = match self.layout_permutation(layout) {
            None => stored.clone(),
            Some(permutation) => stored.transpose(&permutation)?,
        };
        self.emit(out_id, kind, inputs, written, stored);
        Ok(())
    }

    /// Copy a strided view into a fresh packed node.
    fn materialize(&mut self, input: NodeOutput) -> NodeOutput {
        let packed = TensorDescriptor::new(input.desc.data_type, input.desc.dimensions.clone());
        let label = self.internal_label();
        let node = self.push_node(
            NodeKind::Identity { scale_bias: None },
            vec![input],
            packed.clone(),
            label,
        );
        NodeOutput {
            source: NodeSource::Node(node),
            desc: packed,
        }
    }

    fn finish(mut self) -> Result<LoweredGraph> {
        let mut claimed = HashSet::new();
        let mut output_slots = Vec::with_capacity(self.graph.outputs.len());

        for &id in &self.graph.outputs {
            let operand = self.operand(id)?;
            let name = operand
                .non_empty_name()
                .ok_or_else(|| BackendError::binding(format!("output operand {id} has no name")))?
                .to_string();
            let entry = self
                .arena
                .get(&id)
                .cloned()
                .ok_or_else(|| BackendError::binding(format!("output {name} is never produced")))?;
            let desc = TensorDescriptor::from_operand(operand);

            let direct = match entry.source {
                NodeSource::Node(node) if entry.desc.is_packed() && !claimed.contains(&node) => Some(node),
                _ => None,
            };
            let node = match direct {
                Some(node) => node,
                None => self.push_node(
                    NodeKind::Identity { scale_bias: None },
                    vec![entry],
                    desc.clone(),
                    NodeLabel::Operand(id),
                ),
            };
            claimed.insert(node);
            output_slots.push(OutputSlot {
                name,
                operand: id,
                node,
                desc,
            });
        }

        Ok(LoweredGraph {
            nodes: self.nodes,
            input_slots: self.input_slots,
            output_slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DataTypeLimits;
    use webnn_graph::{
        BinaryOp, Conv2dAttributes, GraphBuilder, Pool2dAttributes, Resample2dAttributes,
        SupportedDataTypes,
    };

    fn cpu_like() -> BackendCapabilities {
        BackendCapabilities {
            native_boolean: DataType::Uint32,
            ..BackendCapabilities::default()
        }
    }

    #[test]
    fn broadcast_inputs_get_zero_strides() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("a", DataType::Float32, &[2, 3]);
        let b = builder.constant_f32(&[3], &[1.0, 2.0, 3.0]);
        builder.output_operation("out", OperatorKind::add(), &[a, b]).unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();

        assert_eq!(lowered.nodes.len(), 1);
        let add = &lowered.nodes[0];
        assert_eq!(add.kind, NodeKind::Binary(BinaryOp::Add));
        assert!(add.inputs[0].desc.is_packed());
        assert_eq!(add.inputs[1].desc.strides, Some(vec![0, 1]));
        assert_eq!(lowered.constant_slots().count(), 1);
        assert!(lowered.input_slots[1].desc.flags.contains(TensorFlags::OWNED_BY_BACKEND));
    }

    #[test]
    fn comparison_is_decomposed_for_non_uint8_booleans() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("a", DataType::Float32, &[4]);
        let b = builder.input("b", DataType::Float32, &[4]);
        builder
            .output_operation("out", OperatorKind::comparison(ComparisonOp::Greater), &[a, b])
            .unwrap();
        let graph = builder.build();

        let lowered = lower(&graph, &cpu_like()).unwrap();
        assert_eq!(lowered.nodes.len(), 2);
        assert_eq!(lowered.nodes[0].label, NodeLabel::Internal(0));
        assert_eq!(lowered.nodes[0].output.data_type, DataType::Uint32);
        assert_eq!(lowered.nodes[1].kind, NodeKind::Cast);
        assert_eq!(lowered.nodes[1].output.data_type, DataType::Uint8);

        let native = lower(&graph, &BackendCapabilities::default()).unwrap();
        assert_eq!(native.nodes.len(), 1);
    }

    #[test]
    fn neg_becomes_scaled_identity() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[3]);
        builder
            .output_operation("y", OperatorKind::unary(UnaryOp::Neg), &[x])
            .unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();
        assert_eq!(
            lowered.nodes[0].kind,
            NodeKind::Identity {
                scale_bias: Some(ScaleBias {
                    scale: -1.0,
                    bias: 0.0
                })
            }
        );
    }

    #[test]
    fn nhwc_conv_is_transposed_to_nchw() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 4, 4, 2]);
        let w = builder.constant_f32(&[3, 2, 1, 1], &[0.0; 6]);
        let attrs = Conv2dAttributes {
            input_layout: InputLayout::Nhwc,
            ..Conv2dAttributes::default()
        };
        builder
            .output_operation("y", OperatorKind::Conv2d(attrs), &[x, w])
            .unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();

        let conv = &lowered.nodes[0];
        assert_eq!(conv.inputs[0].desc.dimensions, vec![1, 2, 4, 4]);
        assert_eq!(conv.inputs[0].desc.strides, Some(vec![32, 1, 8, 2]));
        // computed as NCHW, stored as packed NHWC [1, 4, 4, 3]
        assert_eq!(conv.output.dimensions, vec![1, 3, 4, 4]);
        assert_eq!(conv.output.strides, Some(vec![48, 1, 12, 3]));
        assert_eq!(lowered.output_slots[0].desc.dimensions, vec![1, 4, 4, 3]);
        assert_eq!(lowered.output_slots[0].node, conv.id);
    }

    #[test]
    fn reshape_relabels_without_a_node() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2, 3]);
        let r = builder.operation(OperatorKind::Relu, &[x]).unwrap();
        builder.reshape(r, &[6], Some("y")).unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();

        assert_eq!(lowered.nodes.len(), 1);
        assert_eq!(lowered.output_slots[0].node, NodeId(0));
        assert_eq!(lowered.output_slots[0].desc.dimensions, vec![6]);
    }

    #[test]
    fn output_bound_to_input_gets_identity() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2, 2]);
        builder.reshape(x, &[4], Some("y")).unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();

        assert_eq!(lowered.nodes.len(), 1);
        assert_eq!(lowered.nodes[0].kind, NodeKind::Identity { scale_bias: None });
        assert_eq!(lowered.nodes[0].inputs[0].source, NodeSource::Slot(0));
    }

    #[test]
    fn shared_producer_gets_identity_for_second_output() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[4]);
        let r = builder.output_operation("first", OperatorKind::Relu, &[x]).unwrap();
        builder.reshape(r, &[2, 2], Some("second")).unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();

        assert_eq!(lowered.nodes.len(), 2);
        assert_eq!(lowered.output_slots[0].node, NodeId(0));
        assert_eq!(lowered.output_slots[1].node, NodeId(1));
        assert_eq!(lowered.nodes[1].inputs[0].source, NodeSource::Node(NodeId(0)));
    }

    #[test]
    fn transpose_is_identity_over_permuted_view() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[2, 3]);
        builder
            .output_operation("y", OperatorKind::Transpose { permutation: vec![1, 0] }, &[x])
            .unwrap();
        let lowered = lower(&builder.build(), &cpu_like()).unwrap();
        let node = &lowered.nodes[0];
        assert_eq!(node.inputs[0].desc.dimensions, vec![3, 2]);
        assert_eq!(node.inputs[0].desc.strides, Some(vec![1, 3]));
        assert!(node.output.is_packed());
    }

    #[test]
    fn unsupported_cases_name_the_operator() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[4, 3]);
        let i = builder.input("i", DataType::Int32, &[2]);
        builder
            .output_operation("y", OperatorKind::Gather { axis: 0 }, &[x, i])
            .unwrap();
        let err = lower(&builder.build(), &cpu_like()).unwrap_err();
        assert!(matches!(err, BackendError::NotSupported { ref operator, index: 0, .. } if operator == "gather"));

        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 1, 4, 4]);
        let mut attrs = Pool2dAttributes::new(PoolKind::Average).with_window(2, 2);
        attrs.dilations = [2, 2];
        builder.output_operation("y", OperatorKind::Pool2d(attrs), &[x]).unwrap();
        assert!(matches!(
            lower(&builder.build(), &cpu_like()),
            Err(BackendError::NotSupported { .. })
        ));

        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 2, 2, 2]);
        let attrs = Resample2dAttributes {
            axes: [0, 1],
            ..Resample2dAttributes::default()
        };
        builder.output_operation("y", OperatorKind::Resample2d(attrs), &[x]).unwrap();
        assert!(matches!(
            lower(&builder.build(), &cpu_like()),
            Err(BackendError::NotSupported { .. })
        ));
    }

    #[test]
    fn rank_and_type_limits() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", DataType::Float32, &[1, 1, 1, 1, 2]);
        builder.output_operation("y", OperatorKind::Relu, &[x]).unwrap();
        let graph = builder.build();
        let narrow = BackendCapabilities {
            max_rank: 4,
            ..cpu_like()
        };
        assert!(matches!(lower(&graph, &narrow), Err(BackendError::NotSupported { .. })));

        let mut builder = GraphBuilder::new();
        let a = builder.input("a", DataType::Int32, &[2]);
        builder.output_operation("y", OperatorKind::add(), &[a, a]).unwrap();
        let limited = BackendCapabilities {
            data_type_limits: DataTypeLimits::new().with("add", SupportedDataTypes::float16_to_32()),
            ..cpu_like()
        };
        let err = lower(&builder.build(), &limited).unwrap_err();
        assert!(err.to_string().contains("add"));
    }

    #[test]
    fn fingerprint_is_stable() {
        let build = || {
            let mut builder = GraphBuilder::new();
            let x = builder.input("x", DataType::Float32, &[2]);
            builder.output_operation("y", OperatorKind::Sigmoid, &[x]).unwrap();
            builder.build()
        };
        let a = lower(&build(), &cpu_like()).unwrap();
        let b = lower(&build(), &cpu_like()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
