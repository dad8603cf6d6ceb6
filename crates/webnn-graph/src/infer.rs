//! Output type and shape inference per operator kind

use crate::data_type::DataType;
use crate::error::ShapeError;
use crate::operand::Operand;
use crate::operator::{
    Activation, Conv2dAttributes, GemmAttributes, OperatorKind, Pool2dAttributes, PoolKind,
    Resample2dAttributes,
};
use crate::shape;

/// Inferred type and shape of an operator's single output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inferred {
    pub data_type: DataType,
    pub dimensions: Vec<u32>,
}

impl Inferred {
    fn new(data_type: DataType, dimensions: Vec<u32>) -> Self {
        Self {
            data_type,
            dimensions,
        }
    }
}

/// Infer the output of `kind` applied to `inputs`.
///
/// `target` is the declared output operand. Reshape takes its shape and cast
/// takes its type from it; other kinds ignore it.
pub fn infer_output(
    kind: &OperatorKind,
    inputs: &[&Operand],
    target: Option<&Operand>,
) -> Result<Inferred, ShapeError> {
    let (min, max) = kind.input_arity();
    if inputs.len() < min || inputs.len() > max {
        return Err(ShapeError::invalid(format!(
            "expected {} inputs, got {}",
            if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} to {max}")
            },
            inputs.len()
        )));
    }

    match kind {
        OperatorKind::ElementwiseBinary { .. } => {
            let data_type = same_type(inputs[0], inputs[1])?;
            let dims = shape::broadcast_shapes(&inputs[0].dimensions, &inputs[1].dimensions)?;
            Ok(Inferred::new(data_type, dims))
        }
        OperatorKind::Comparison { .. } => {
            same_type(inputs[0], inputs[1])?;
            let dims = shape::broadcast_shapes(&inputs[0].dimensions, &inputs[1].dimensions)?;
            Ok(Inferred::new(DataType::Uint8, dims))
        }
        OperatorKind::ElementwiseUnary { op } => {
            let input = inputs[0];
            if op.accepts_integers() {
                require_signed(input.data_type)?;
            } else {
                require_float(input.data_type)?;
            }
            Ok(same_as(input))
        }
        OperatorKind::Relu => {
            require_signed(inputs[0].data_type)?;
            Ok(same_as(inputs[0]))
        }
        OperatorKind::Sigmoid | OperatorKind::Tanh | OperatorKind::LeakyRelu { .. } => {
            require_float(inputs[0].data_type)?;
            Ok(same_as(inputs[0]))
        }
        OperatorKind::Softmax => {
            require_float(inputs[0].data_type)?;
            require_rank(inputs[0], 2)?;
            Ok(same_as(inputs[0]))
        }
        OperatorKind::Clamp {
            min_value,
            max_value,
        } => {
            check_clamp_range(*min_value, *max_value)?;
            Ok(same_as(inputs[0]))
        }
        OperatorKind::Conv2d(attrs) => infer_conv2d(attrs, inputs),
        OperatorKind::Pool2d(attrs) => infer_pool2d(attrs, inputs[0]),
        OperatorKind::Reshape => {
            let target = target.ok_or_else(|| ShapeError::invalid("reshape needs a target shape"))?;
            let from_count = shape::element_count(&inputs[0].dimensions)?;
            let to_count = shape::element_count(&target.dimensions)?;
            if from_count != to_count {
                return Err(ShapeError::ElementCountMismatch {
                    from: inputs[0].dimensions.clone(),
                    to: target.dimensions.clone(),
                    from_count,
                    to_count,
                });
            }
            Ok(Inferred::new(inputs[0].data_type, target.dimensions.clone()))
        }
        OperatorKind::Transpose { permutation } => {
            shape::validate_permutation(permutation, inputs[0].rank())?;
            Ok(Inferred::new(
                inputs[0].data_type,
                shape::permute(&inputs[0].dimensions, permutation),
            ))
        }
        OperatorKind::Concat { axis } => infer_concat(*axis, inputs),
        OperatorKind::Gemm(attrs) => infer_gemm(attrs, inputs),
        OperatorKind::Cast => {
            let target = target.ok_or_else(|| ShapeError::invalid("cast needs a target type"))?;
            Ok(Inferred::new(target.data_type, inputs[0].dimensions.clone()))
        }
        OperatorKind::Resample2d(attrs) => infer_resample2d(attrs, inputs[0]),
        OperatorKind::Gather { axis } => {
            let (input, indices) = (inputs[0], inputs[1]);
            let axis = *axis as usize;
            if axis >= input.rank() {
                return Err(ShapeError::invalid(format!(
                    "axis {axis} is out of range for rank {}",
                    input.rank()
                )));
            }
            if !matches!(
                indices.data_type,
                DataType::Int32 | DataType::Uint32 | DataType::Int64 | DataType::Uint64
            ) {
                return Err(ShapeError::DataTypeMismatch {
                    expected: "int32, uint32, int64 or uint64 indices".into(),
                    actual: indices.data_type,
                });
            }
            let mut dims = input.dimensions[..axis].to_vec();
            dims.extend_from_slice(&indices.dimensions);
            dims.extend_from_slice(&input.dimensions[axis + 1..]);
            Ok(Inferred::new(input.data_type, dims))
        }
    }
}

fn same_as(operand: &Operand) -> Inferred {
    Inferred::new(operand.data_type, operand.dimensions.clone())
}

fn same_type(lhs: &Operand, rhs: &Operand) -> Result<DataType, ShapeError> {
    if lhs.data_type != rhs.data_type {
        return Err(ShapeError::DataTypeMismatch {
            expected: lhs.data_type.to_string(),
            actual: rhs.data_type,
        });
    }
    Ok(lhs.data_type)
}

fn require_float(data_type: DataType) -> Result<(), ShapeError> {
    if data_type.is_float() {
        Ok(())
    } else {
        Err(ShapeError::DataTypeMismatch {
            expected: "float32 or float16".into(),
            actual: data_type,
        })
    }
}

fn require_signed(data_type: DataType) -> Result<(), ShapeError> {
    if data_type.is_signed() {
        Ok(())
    } else {
        Err(ShapeError::DataTypeMismatch {
            expected: "a signed type".into(),
            actual: data_type,
        })
    }
}

fn require_rank(operand: &Operand, expected: usize) -> Result<(), ShapeError> {
    if operand.rank() != expected {
        return Err(ShapeError::RankMismatch {
            expected,
            actual: operand.rank(),
        });
    }
    Ok(())
}

fn check_clamp_range(min_value: f32, max_value: f32) -> Result<(), ShapeError> {
    if min_value.is_nan() || max_value.is_nan() || min_value > max_value {
        return Err(ShapeError::invalid(format!(
            "clamp range [{min_value}, {max_value}] is empty"
        )));
    }
    Ok(())
}

fn infer_conv2d(attrs: &Conv2dAttributes, inputs: &[&Operand]) -> Result<Inferred, ShapeError> {
    let (input, filter) = (inputs[0], inputs[1]);
    require_float(input.data_type)?;
    require_rank(input, 4)?;
    require_rank(filter, 4)?;
    same_type(input, filter)?;

    if attrs.groups == 0 {
        return Err(ShapeError::invalid("groups must be positive"));
    }
    if let Some(Activation::Clamp {
        min_value,
        max_value,
    }) = attrs.activation
    {
        check_clamp_range(min_value, max_value)?;
    }

    let (c_axis, h_axis, w_axis) = attrs.input_layout.chw_axes();
    let batch = input.dimensions[0];
    let channels = input.dimensions[c_axis];
    let [out_channels, filter_channels, filter_h, filter_w] =
        [filter.dimensions[0], filter.dimensions[1], filter.dimensions[2], filter.dimensions[3]];

    if (filter_channels as u64) * (attrs.groups as u64) != channels as u64 {
        return Err(ShapeError::invalid(format!(
            "input has {channels} channels but filter expects {filter_channels} x {} groups",
            attrs.groups
        )));
    }
    if out_channels % attrs.groups != 0 {
        return Err(ShapeError::invalid(format!(
            "{out_channels} output channels are not divisible into {} groups",
            attrs.groups
        )));
    }

    if let Some(bias) = inputs.get(2) {
        same_type(input, bias)?;
        if bias.dimensions != [out_channels] {
            return Err(ShapeError::invalid(format!(
                "bias shape {:?} does not match {out_channels} output channels",
                bias.dimensions
            )));
        }
    }

    let [top, bottom, left, right] = attrs.padding;
    let out_h = shape::windowed_output_size(
        input.dimensions[h_axis],
        filter_h,
        top,
        bottom,
        attrs.strides[0],
        attrs.dilations[0],
    )?;
    let out_w = shape::windowed_output_size(
        input.dimensions[w_axis],
        filter_w,
        left,
        right,
        attrs.strides[1],
        attrs.dilations[1],
    )?;

    let mut dims = vec![0u32; 4];
    dims[0] = batch;
    dims[c_axis] = out_channels;
    dims[h_axis] = out_h;
    dims[w_axis] = out_w;
    Ok(Inferred::new(input.data_type, dims))
}

fn infer_pool2d(attrs: &Pool2dAttributes, input: &Operand) -> Result<Inferred, ShapeError> {
    require_rank(input, 4)?;
    if attrs.kind == PoolKind::Average {
        require_float(input.data_type)?;
    }

    let (_, h_axis, w_axis) = attrs.layout.chw_axes();
    let [window_h, window_w] = attrs
        .window_dimensions
        .unwrap_or([input.dimensions[h_axis], input.dimensions[w_axis]]);
    let [top, bottom, left, right] = attrs.padding;

    let out_h = shape::windowed_output_size(
        input.dimensions[h_axis],
        window_h,
        top,
        bottom,
        attrs.strides[0],
        attrs.dilations[0],
    )?;
    let out_w = shape::windowed_output_size(
        input.dimensions[w_axis],
        window_w,
        left,
        right,
        attrs.strides[1],
        attrs.dilations[1],
    )?;

    let mut dims = input.dimensions.clone();
    dims[h_axis] = out_h;
    dims[w_axis] = out_w;
    Ok(Inferred::new(input.data_type, dims))
}

fn infer_concat(axis: u32, inputs: &[&Operand]) -> Result<Inferred, ShapeError> {
    let first = inputs[0];
    let axis = axis as usize;
    if axis >= first.rank() {
        return Err(ShapeError::invalid(format!(
            "axis {axis} is out of range for rank {}",
            first.rank()
        )));
    }

    let mut dims = first.dimensions.clone();
    for input in &inputs[1..] {
        same_type(first, input)?;
        require_rank(input, first.rank())?;
        for (i, (&a, &b)) in first.dimensions.iter().zip(&input.dimensions).enumerate() {
            if i != axis && a != b {
                return Err(ShapeError::invalid(format!(
                    "concat inputs {:?} and {:?} differ outside axis {axis}",
                    first.dimensions, input.dimensions
                )));
            }
        }
        dims[axis] = dims[axis]
            .checked_add(input.dimensions[axis])
            .ok_or_else(|| ShapeError::Overflow(dims.clone()))?;
    }
    Ok(Inferred::new(first.data_type, dims))
}

fn infer_gemm(attrs: &GemmAttributes, inputs: &[&Operand]) -> Result<Inferred, ShapeError> {
    let (a, b) = (inputs[0], inputs[1]);
    require_float(a.data_type)?;
    require_rank(a, 2)?;
    require_rank(b, 2)?;
    same_type(a, b)?;

    let (m, k_a) = if attrs.a_transpose {
        (a.dimensions[1], a.dimensions[0])
    } else {
        (a.dimensions[0], a.dimensions[1])
    };
    let (k_b, n) = if attrs.b_transpose {
        (b.dimensions[1], b.dimensions[0])
    } else {
        (b.dimensions[0], b.dimensions[1])
    };
    if k_a != k_b {
        return Err(ShapeError::invalid(format!(
            "inner dimensions differ: {k_a} vs {k_b}"
        )));
    }

    let dims = vec![m, n];
    if let Some(c) = inputs.get(2) {
        same_type(a, c)?;
        if !shape::is_unidirectionally_broadcastable(&c.dimensions, &dims) {
            return Err(ShapeError::NotBroadcastable {
                lhs: c.dimensions.clone(),
                rhs: dims,
                axis: 0,
            });
        }
    }
    Ok(Inferred::new(a.data_type, dims))
}

fn infer_resample2d(attrs: &Resample2dAttributes, input: &Operand) -> Result<Inferred, ShapeError> {
    require_rank(input, 4)?;
    require_float(input.data_type)?;

    let [a0, a1] = attrs.axes;
    if a0 == a1 || a0 >= 4 || a1 >= 4 {
        return Err(ShapeError::invalid(format!(
            "resample axes {:?} must be two distinct axes below 4",
            attrs.axes
        )));
    }

    let mut dims = input.dimensions.clone();
    match (attrs.sizes, attrs.scales) {
        (Some(sizes), _) => {
            if sizes.contains(&0) {
                return Err(ShapeError::invalid("resample sizes must be positive"));
            }
            dims[a0 as usize] = sizes[0];
            dims[a1 as usize] = sizes[1];
        }
        (None, scales) => {
            let scales = scales.unwrap_or([1.0, 1.0]);
            for (axis, scale) in [a0, a1].into_iter().zip(scales) {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(ShapeError::invalid(format!(
                        "resample scale {scale} must be positive"
                    )));
                }
                let scaled = (input.dimensions[axis as usize] as f64 * scale as f64).floor();
                if scaled < 1.0 || scaled > u32::MAX as f64 {
                    return Err(ShapeError::invalid(format!(
                        "resample scale {scale} gives an empty or oversized axis"
                    )));
                }
                dims[axis as usize] = scaled as u32;
            }
        }
    }
    Ok(Inferred::new(input.data_type, dims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::OperandKind;
    use crate::operator::{BinaryOp, ComparisonOp, InputLayout};

    fn operand(data_type: DataType, dims: &[u32]) -> Operand {
        Operand::new(OperandKind::Intermediate, data_type, dims)
    }

    fn f32_operand(dims: &[u32]) -> Operand {
        operand(DataType::Float32, dims)
    }

    #[test]
    fn binary_broadcasts() {
        let a = f32_operand(&[1, 2, 3, 1]);
        let b = f32_operand(&[1, 1, 1, 2]);
        let out = infer_output(&OperatorKind::binary(BinaryOp::Add), &[&a, &b], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 2, 3, 2]);
    }

    #[test]
    fn binary_rejects_mixed_types() {
        let a = f32_operand(&[2]);
        let b = operand(DataType::Int32, &[2]);
        assert!(matches!(
            infer_output(&OperatorKind::add(), &[&a, &b], None),
            Err(ShapeError::DataTypeMismatch { .. })
        ));
    }

    #[test]
    fn comparison_outputs_uint8() {
        let a = f32_operand(&[3]);
        let out = infer_output(&OperatorKind::comparison(ComparisonOp::Greater), &[&a, &a], None).unwrap();
        assert_eq!(out.data_type, DataType::Uint8);
    }

    #[test]
    fn conv2d_padding_same() {
        let input = f32_operand(&[1, 1, 5, 5]);
        let filter = f32_operand(&[1, 1, 3, 3]);
        let attrs = Conv2dAttributes {
            padding: [1, 1, 1, 1],
            ..Conv2dAttributes::default()
        };
        let out = infer_output(&OperatorKind::Conv2d(attrs), &[&input, &filter], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 1, 5, 5]);
    }

    #[test]
    fn conv2d_nhwc_keeps_layout() {
        let input = f32_operand(&[1, 5, 5, 2]);
        let filter = f32_operand(&[4, 2, 3, 3]);
        let bias = f32_operand(&[4]);
        let attrs = Conv2dAttributes {
            input_layout: InputLayout::Nhwc,
            ..Conv2dAttributes::default()
        };
        let out = infer_output(&OperatorKind::Conv2d(attrs), &[&input, &filter, &bias], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 3, 3, 4]);
    }

    #[test]
    fn conv2d_rejects_bad_bias_and_channels() {
        let input = f32_operand(&[1, 2, 5, 5]);
        let filter = f32_operand(&[4, 2, 3, 3]);
        let bias = f32_operand(&[3]);
        let kind = OperatorKind::Conv2d(Conv2dAttributes::default());
        assert!(infer_output(&kind, &[&input, &filter, &bias], None).is_err());

        let wrong = f32_operand(&[4, 3, 3, 3]);
        assert!(infer_output(&kind, &[&input, &wrong], None).is_err());
    }

    #[test]
    fn pool_defaults_to_global_window() {
        let input = f32_operand(&[1, 3, 4, 4]);
        let attrs = Pool2dAttributes::new(PoolKind::Average);
        let out = infer_output(&OperatorKind::Pool2d(attrs), &[&input], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 3, 1, 1]);
    }

    #[test]
    fn reshape_and_cast_use_target() {
        let input = f32_operand(&[1, 2, 3, 4]);
        let ok = f32_operand(&[1, 1, 6, 4]);
        let bad = f32_operand(&[1, 1, 6, 5]);
        assert_eq!(
            infer_output(&OperatorKind::Reshape, &[&input], Some(&ok)).unwrap().dimensions,
            vec![1, 1, 6, 4]
        );
        assert!(matches!(
            infer_output(&OperatorKind::Reshape, &[&input], Some(&bad)),
            Err(ShapeError::ElementCountMismatch { .. })
        ));
        assert!(infer_output(&OperatorKind::Reshape, &[&input], None).is_err());

        let target = operand(DataType::Int8, &[1, 2, 3, 4]);
        assert_eq!(
            infer_output(&OperatorKind::Cast, &[&input], Some(&target)).unwrap().data_type,
            DataType::Int8
        );
    }

    #[test]
    fn gemm_inner_dimensions_and_c() {
        let a = f32_operand(&[2, 3]);
        let b = f32_operand(&[3, 4]);
        let c = f32_operand(&[1, 4]);
        let kind = OperatorKind::Gemm(GemmAttributes::default());
        assert_eq!(infer_output(&kind, &[&a, &b, &c], None).unwrap().dimensions, vec![2, 4]);

        let transposed = OperatorKind::Gemm(GemmAttributes {
            b_transpose: true,
            ..GemmAttributes::default()
        });
        assert!(infer_output(&transposed, &[&a, &b], None).is_err());

        let bad_c = f32_operand(&[3, 4]);
        assert!(infer_output(&kind, &[&a, &b, &bad_c], None).is_err());
    }

    #[test]
    fn concat_sums_axis() {
        let a = f32_operand(&[1, 2, 3]);
        let b = f32_operand(&[1, 4, 3]);
        let out = infer_output(&OperatorKind::Concat { axis: 1 }, &[&a, &b], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 6, 3]);
        assert!(infer_output(&OperatorKind::Concat { axis: 2 }, &[&a, &b], None).is_err());
    }

    #[test]
    fn resample_axes_must_be_distinct() {
        let input = f32_operand(&[1, 1, 2, 2]);
        let attrs = Resample2dAttributes {
            scales: Some([2.0, 2.0]),
            ..Resample2dAttributes::default()
        };
        let out = infer_output(&OperatorKind::Resample2d(attrs.clone()), &[&input], None).unwrap();
        assert_eq!(out.dimensions, vec![1, 1, 4, 4]);

        let dup = Resample2dAttributes {
            axes: [2, 2],
            ..attrs
        };
        assert!(infer_output(&OperatorKind::Resample2d(dup), &[&input], None).is_err());
    }

    #[test]
    fn gather_shape() {
        let input = f32_operand(&[4, 5]);
        let indices = operand(DataType::Int32, &[2, 3]);
        let out = infer_output(&OperatorKind::Gather { axis: 0 }, &[&input, &indices], None).unwrap();
        assert_eq!(out.dimensions, vec![2, 3, 5]);
        let bad = f32_operand(&[2]);
        assert!(infer_output(&OperatorKind::Gather { axis: 0 }, &[&input, &bad], None).is_err());
    }

    #[test]
    fn clamp_range_checked() {
        let input = f32_operand(&[2]);
        let kind = OperatorKind::Clamp {
            min_value: 3.0,
            max_value: 0.0,
        };
        assert!(infer_output(&kind, &[&input], None).is_err());
    }

    #[test]
    fn arity_checked() {
        let a = f32_operand(&[2]);
        assert!(infer_output(&OperatorKind::add(), &[&a], None).is_err());
        assert!(infer_output(&OperatorKind::Relu, &[&a, &a], None).is_err());
    }
}
