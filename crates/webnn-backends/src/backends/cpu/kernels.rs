//! Reference kernels
//!
//! Kernels work on dense row-major tensors. Element conversion and strided
//! addressing happen in the executor, so every kernel sees packed inputs in
//! the layout of its node's input views.
//!
//! Three element lanes exist:
//!
//! - [`run_bits`]: raw element bits, for nodes that only move data
//! - [`run_integer`]: `i128`, which holds every int64 and uint64 value exactly
//! - [`run`]: `f64`, for everything else

use webnn_graph::{Activation, BinaryOp, ComparisonOp, InterpolationMode, PoolKind, UnaryOp};

use crate::error::{BackendError, Result};
use crate::lowering::{NodeKind, ScaleBias};

/// Dense row-major tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T = f64> {
    pub dims: Vec<u32>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    pub fn new(dims: impl Into<Vec<u32>>, data: Vec<T>) -> Self {
        Self {
            dims: dims.into(),
            data,
        }
    }

    fn dim(&self, axis: usize) -> usize {
        self.dims[axis] as usize
    }
}

fn expect_rank<T>(tensor: &Tensor<T>, rank: usize, kernel: &str) -> Result<()> {
    if tensor.dims.len() != rank {
        return Err(BackendError::Other(format!(
            "{kernel} expects rank {rank}, got {:?}",
            tensor.dims
        )));
    }
    Ok(())
}

fn input<'t, T>(inputs: &'t [Tensor<T>], index: usize, kernel: &str) -> Result<&'t Tensor<T>> {
    inputs
        .get(index)
        .ok_or_else(|| BackendError::Other(format!("{kernel} is missing input {index}")))
}

/// Run `kind` over `inputs`, producing `output_dims` values.
pub fn run(kind: &NodeKind, inputs: &[Tensor], output_dims: &[u32]) -> Result<Vec<f64>> {
    let name = kind.name();
    match kind {
        NodeKind::Identity { scale_bias } => Ok(identity(&input(inputs, 0, name)?.data, *scale_bias)),
        NodeKind::Cast => Ok(input(inputs, 0, name)?.data.clone()),
        NodeKind::Binary(op) => {
            let (a, b) = (input(inputs, 0, name)?, input(inputs, 1, name)?);
            Ok(a.data.iter().zip(&b.data).map(|(&x, &y)| binary(*op, x, y)).collect())
        }
        NodeKind::Compare(op) => {
            let (a, b) = (input(inputs, 0, name)?, input(inputs, 1, name)?);
            Ok(a.data
                .iter()
                .zip(&b.data)
                .map(|(&x, &y)| if compare(*op, x, y) { 1.0 } else { 0.0 })
                .collect())
        }
        NodeKind::Unary(op) => Ok(input(inputs, 0, name)?.data.iter().map(|&x| unary(*op, x)).collect()),
        NodeKind::Activation(activation) => Ok(input(inputs, 0, name)?
            .data
            .iter()
            .map(|&x| activate(activation, x))
            .collect()),
        NodeKind::Softmax => softmax(input(inputs, 0, name)?),
        NodeKind::Conv2d {
            padding,
            strides,
            dilations,
            groups,
            activation,
        } => {
            let params = Conv2dParams {
                padding: *padding,
                strides: *strides,
                dilations: *dilations,
                groups: *groups,
            };
            let mut out = conv2d(
                input(inputs, 0, name)?,
                input(inputs, 1, name)?,
                inputs.get(2),
                &params,
                output_dims,
            )?;
            if let Some(activation) = activation {
                for value in &mut out {
                    *value = activate(activation, *value);
                }
            }
            Ok(out)
        }
        NodeKind::Pool2d {
            kind,
            window,
            padding,
            strides,
            dilations,
        } => {
            let params = Pool2dParams {
                kind: *kind,
                window: *window,
                padding: *padding,
                strides: *strides,
                dilations: *dilations,
            };
            pool2d(input(inputs, 0, name)?, &params, output_dims)
        }
        NodeKind::Gemm(attrs) => gemm(
            input(inputs, 0, name)?,
            input(inputs, 1, name)?,
            inputs.get(2),
            attrs.alpha as f64,
            attrs.beta as f64,
        ),
        NodeKind::Concat { axis } => concat(inputs, *axis as usize, output_dims),
        NodeKind::Resample2d { mode, scales } => resample2d(input(inputs, 0, name)?, *mode, *scales, output_dims),
    }
}

// ================================================================================================
// Bit and integer lanes
// ================================================================================================

/// Whether `kind` only moves elements, so raw bits can pass through.
pub fn moves_bits(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Identity { scale_bias: None } | NodeKind::Cast | NodeKind::Concat { .. }
    )
}

/// Run a data-movement node over raw element bits.
pub fn run_bits(kind: &NodeKind, inputs: &[Tensor<u64>], output_dims: &[u32]) -> Result<Vec<u64>> {
    let name = kind.name();
    match kind {
        NodeKind::Identity { scale_bias: None } | NodeKind::Cast => Ok(input(inputs, 0, name)?.data.clone()),
        NodeKind::Concat { axis } => concat(inputs, *axis as usize, output_dims),
        _ => Err(BackendError::Other(format!("{name} does not only move elements"))),
    }
}

/// Whether `kind` has an exact integer kernel.
pub fn has_integer_kernel(kind: &NodeKind) -> bool {
    match kind {
        NodeKind::Identity { scale_bias } => {
            scale_bias.is_none_or(|ScaleBias { scale, bias }| scale.fract() == 0.0 && bias.fract() == 0.0)
        }
        NodeKind::Cast | NodeKind::Binary(_) | NodeKind::Compare(_) | NodeKind::Concat { .. } => true,
        NodeKind::Unary(op) => matches!(op, UnaryOp::Abs | UnaryOp::Ceil | UnaryOp::Floor | UnaryOp::Neg),
        NodeKind::Activation(activation) => matches!(activation, Activation::Relu | Activation::Clamp { .. }),
        NodeKind::Pool2d { kind, .. } => *kind == PoolKind::Max,
        _ => false,
    }
}

/// Run `kind` in integer arithmetic. Results may exceed the output type;
/// the executor saturates on store.
pub fn run_integer(kind: &NodeKind, inputs: &[Tensor<i128>], output_dims: &[u32]) -> Result<Vec<i128>> {
    let name = kind.name();
    match kind {
        NodeKind::Identity { scale_bias: None } | NodeKind::Cast => Ok(input(inputs, 0, name)?.data.clone()),
        NodeKind::Identity {
            scale_bias: Some(ScaleBias { scale, bias }),
        } if scale.fract() == 0.0 && bias.fract() == 0.0 => {
            let (scale, bias) = (*scale as i128, *bias as i128);
            Ok(input(inputs, 0, name)?
                .data
                .iter()
                .map(|&x| x.saturating_mul(scale).saturating_add(bias))
                .collect())
        }
        NodeKind::Binary(op) => {
            let (a, b) = (input(inputs, 0, name)?, input(inputs, 1, name)?);
            Ok(a.data.iter().zip(&b.data).map(|(&x, &y)| integer_binary(*op, x, y)).collect())
        }
        NodeKind::Compare(op) => {
            let (a, b) = (input(inputs, 0, name)?, input(inputs, 1, name)?);
            Ok(a.data.iter().zip(&b.data).map(|(&x, &y)| i128::from(compare(*op, x, y))).collect())
        }
        NodeKind::Unary(UnaryOp::Abs) => Ok(input(inputs, 0, name)?.data.iter().map(|x| x.saturating_abs()).collect()),
        NodeKind::Unary(UnaryOp::Neg) => Ok(input(inputs, 0, name)?.data.iter().map(|x| x.saturating_neg()).collect()),
        NodeKind::Unary(UnaryOp::Ceil | UnaryOp::Floor) => Ok(input(inputs, 0, name)?.data.clone()),
        NodeKind::Activation(Activation::Relu) => Ok(input(inputs, 0, name)?.data.iter().map(|&x| x.max(0)).collect()),
        NodeKind::Activation(Activation::Clamp {
            min_value,
            max_value,
        }) => {
            let (low, high) = (min_value.ceil() as i128, max_value.floor() as i128);
            Ok(input(inputs, 0, name)?.data.iter().map(|&x| x.max(low).min(high)).collect())
        }
        NodeKind::Pool2d {
            kind: PoolKind::Max,
            window,
            padding,
            strides,
            dilations,
        } => {
            let params = Pool2dParams {
                kind: PoolKind::Max,
                window: *window,
                padding: *padding,
                strides: *strides,
                dilations: *dilations,
            };
            pool_windows(input(inputs, 0, name)?, &params, output_dims, |window| {
                window.iter().copied().max().unwrap_or(0)
            })
        }
        NodeKind::Concat { axis } => concat(inputs, *axis as usize, output_dims),
        _ => Err(BackendError::Other(format!("{name} has no integer kernel"))),
    }
}

/// Division truncates toward zero; dividing by zero yields zero.
fn integer_binary(op: BinaryOp, x: i128, y: i128) -> i128 {
    match op {
        BinaryOp::Add => x.saturating_add(y),
        BinaryOp::Sub => x.saturating_sub(y),
        BinaryOp::Mul => x.saturating_mul(y),
        BinaryOp::Div => x.checked_div(y).unwrap_or(0),
        BinaryOp::Max => x.max(y),
        BinaryOp::Min => x.min(y),
        BinaryOp::Pow => integer_pow(x, y),
    }
}

fn integer_pow(x: i128, y: i128) -> i128 {
    if y < 0 {
        return match x {
            1 => 1,
            -1 if y % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        };
    }
    let exponent = u32::try_from(y).unwrap_or(u32::MAX);
    x.checked_pow(exponent).unwrap_or(if x < 0 && exponent % 2 == 1 {
        i128::MIN
    } else {
        i128::MAX
    })
}

fn identity(data: &[f64], scale_bias: Option<ScaleBias>) -> Vec<f64> {
    match scale_bias {
        None => data.to_vec(),
        Some(ScaleBias { scale, bias }) => data.iter().map(|&x| x * scale as f64 + bias as f64).collect(),
    }
}

fn binary(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Max => x.max(y),
        BinaryOp::Min => x.min(y),
        BinaryOp::Pow => x.powf(y),
    }
}

fn compare<T: PartialOrd>(op: ComparisonOp, x: T, y: T) -> bool {
    match op {
        ComparisonOp::Equal => x == y,
        ComparisonOp::Greater => x > y,
        ComparisonOp::GreaterOrEqual => x >= y,
        ComparisonOp::Lesser => x < y,
        ComparisonOp::LesserOrEqual => x <= y,
    }
}

fn unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Neg => -x,
        UnaryOp::Reciprocal => 1.0 / x,
        UnaryOp::Sin => x.sin(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Tan => x.tan(),
    }
}

fn activate(activation: &Activation, x: f64) -> f64 {
    match *activation {
        Activation::Relu => {
            if x < 0.0 {
                0.0
            } else {
                x
            }
        }
        Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        Activation::Tanh => x.tanh(),
        Activation::LeakyRelu { alpha } => {
            if x < 0.0 {
                x * alpha as f64
            } else {
                x
            }
        }
        Activation::Clamp {
            min_value,
            max_value,
        } => x.clamp(min_value as f64, max_value as f64),
    }
}

fn softmax(input: &Tensor) -> Result<Vec<f64>> {
    expect_rank(input, 2, "softmax")?;
    let columns = input.dim(1);
    let mut out = Vec::with_capacity(input.data.len());
    if columns == 0 {
        return Ok(out);
    }
    for row in input.data.chunks(columns) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        out.extend(exps.iter().map(|&e| e / sum));
    }
    Ok(out)
}

struct Conv2dParams {
    padding: [u32; 4],
    strides: [u32; 2],
    dilations: [u32; 2],
    groups: u32,
}

/// Input position `out * stride + k * dilation - pad_begin`, if inside the input.
fn source_index(out: usize, k: usize, stride: u32, dilation: u32, pad_begin: u32, extent: usize) -> Option<usize> {
    let position = (out * stride as usize + k * dilation as usize).checked_sub(pad_begin as usize)?;
    (position < extent).then_some(position)
}

/// NCHW input, OIHW filter, optional `[O]` bias.
fn conv2d(
    input: &Tensor,
    filter: &Tensor,
    bias: Option<&Tensor>,
    params: &Conv2dParams,
    output_dims: &[u32],
) -> Result<Vec<f64>> {
    expect_rank(input, 4, "conv2d")?;
    expect_rank(filter, 4, "conv2d")?;
    let (batch, channels, in_h, in_w) = (input.dim(0), input.dim(1), input.dim(2), input.dim(3));
    let (out_channels, filter_channels, kernel_h, kernel_w) =
        (filter.dim(0), filter.dim(1), filter.dim(2), filter.dim(3));
    let (out_h, out_w) = (output_dims[2] as usize, output_dims[3] as usize);
    let groups = params.groups as usize;
    if groups == 0 || filter_channels * groups != channels {
        return Err(BackendError::Other(format!(
            "conv2d filter {:?} does not match input {:?} in {groups} groups",
            filter.dims, input.dims
        )));
    }
    let out_per_group = out_channels / groups;
    let [top, _, left, _] = params.padding;

    let mut out = vec![0.0; batch * out_channels * out_h * out_w];
    for n in 0..batch {
        for o in 0..out_channels {
            let group = o / out_per_group.max(1);
            let base = bias.map(|b| b.data[o]).unwrap_or(0.0);
            for y in 0..out_h {
                for x in 0..out_w {
                    let mut acc = base;
                    for fc in 0..filter_channels {
                        let c = group * filter_channels + fc;
                        for ky in 0..kernel_h {
                            let Some(iy) = source_index(y, ky, params.strides[0], params.dilations[0], top, in_h)
                            else {
                                continue;
                            };
                            for kx in 0..kernel_w {
                                let Some(ix) =
                                    source_index(x, kx, params.strides[1], params.dilations[1], left, in_w)
                                else {
                                    continue;
                                };
                                let value = input.data[((n * channels + c) * in_h + iy) * in_w + ix];
                                let weight = filter.data[((o * filter_channels + fc) * kernel_h + ky) * kernel_w + kx];
                                acc += value * weight;
                            }
                        }
                    }
                    out[((n * out_channels + o) * out_h + y) * out_w + x] = acc;
                }
            }
        }
    }
    Ok(out)
}

struct Pool2dParams {
    kind: PoolKind,
    window: [u32; 2],
    padding: [u32; 4],
    strides: [u32; 2],
    dilations: [u32; 2],
}

/// NCHW pooling. Padded positions are skipped, so averages divide by the
/// number of real elements under the window.
fn pool2d(input: &Tensor, params: &Pool2dParams, output_dims: &[u32]) -> Result<Vec<f64>> {
    pool_windows(input, params, output_dims, |window| match params.kind {
        _ if window.is_empty() => 0.0,
        PoolKind::Average => window.iter().sum::<f64>() / window.len() as f64,
        PoolKind::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Reduce every pooling window with `reduce`, which sees only in-bounds elements.
fn pool_windows<T: Copy>(
    input: &Tensor<T>,
    params: &Pool2dParams,
    output_dims: &[u32],
    reduce: impl Fn(&[T]) -> T,
) -> Result<Vec<T>> {
    expect_rank(input, 4, "pool2d")?;
    let (batch, channels, in_h, in_w) = (input.dim(0), input.dim(1), input.dim(2), input.dim(3));
    let (out_h, out_w) = (output_dims[2] as usize, output_dims[3] as usize);
    let [window_h, window_w] = params.window.map(|w| w as usize);
    let [top, _, left, _] = params.padding;

    let mut out = Vec::with_capacity(batch * channels * out_h * out_w);
    let mut window = Vec::with_capacity(window_h * window_w);
    for plane in input.data.chunks(in_h * in_w).take(batch * channels) {
        for y in 0..out_h {
            for x in 0..out_w {
                window.clear();
                for ky in 0..window_h {
                    let Some(iy) = source_index(y, ky, params.strides[0], params.dilations[0], top, in_h) else {
                        continue;
                    };
                    for kx in 0..window_w {
                        let Some(ix) = source_index(x, kx, params.strides[1], params.dilations[1], left, in_w)
                        else {
                            continue;
                        };
                        window.push(plane[iy * in_w + ix]);
                    }
                }
                out.push(reduce(&window));
            }
        }
    }
    Ok(out)
}

/// `alpha * a · b + beta * c` with `a: [M, K]`, `b: [K, N]`, `c: [M, N]`.
fn gemm(a: &Tensor, b: &Tensor, c: Option<&Tensor>, alpha: f64, beta: f64) -> Result<Vec<f64>> {
    expect_rank(a, 2, "gemm")?;
    expect_rank(b, 2, "gemm")?;
    let (m, k, n) = (a.dim(0), a.dim(1), b.dim(1));
    if b.dim(0) != k {
        return Err(BackendError::Other(format!(
            "gemm inner dimensions differ: {:?} x {:?}",
            a.dims, b.dims
        )));
    }

    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let dot: f64 = (0..k).map(|p| a.data[i * k + p] * b.data[p * n + j]).sum();
            let addend = c.map(|c| beta * c.data[i * n + j]).unwrap_or(0.0);
            out[i * n + j] = alpha * dot + addend;
        }
    }
    Ok(out)
}

fn concat<T: Copy>(inputs: &[Tensor<T>], axis: usize, output_dims: &[u32]) -> Result<Vec<T>> {
    if axis >= output_dims.len() {
        return Err(BackendError::Other(format!("concat axis {axis} is out of range")));
    }
    let outer: usize = output_dims[..axis].iter().map(|&d| d as usize).product();
    let inner: usize = output_dims[axis + 1..].iter().map(|&d| d as usize).product();

    let mut out = Vec::with_capacity(outer * output_dims[axis] as usize * inner);
    for o in 0..outer {
        for tensor in inputs {
            let block = tensor.dim(axis) * inner;
            out.extend_from_slice(&tensor.data[o * block..(o + 1) * block]);
        }
    }
    Ok(out)
}

/// NCHW resampling over H and W.
fn resample2d(input: &Tensor, mode: InterpolationMode, scales: [f32; 2], output_dims: &[u32]) -> Result<Vec<f64>> {
    expect_rank(input, 4, "resample2d")?;
    let (in_h, in_w) = (input.dim(2), input.dim(3));
    let (out_h, out_w) = (output_dims[2] as usize, output_dims[3] as usize);
    let planes = input.dim(0) * input.dim(1);
    let [scale_h, scale_w] = scales.map(f64::from);

    let mut out = Vec::with_capacity(planes * out_h * out_w);
    for plane in input.data.chunks(in_h * in_w).take(planes) {
        for y in 0..out_h {
            for x in 0..out_w {
                let value = match mode {
                    InterpolationMode::NearestNeighbor => {
                        let iy = nearest(y, scale_h, in_h);
                        let ix = nearest(x, scale_w, in_w);
                        plane[iy * in_w + ix]
                    }
                    InterpolationMode::Linear => {
                        let (y0, y1, fy) = linear(y, scale_h, in_h);
                        let (x0, x1, fx) = linear(x, scale_w, in_w);
                        let top = plane[y0 * in_w + x0] * (1.0 - fx) + plane[y0 * in_w + x1] * fx;
                        let bottom = plane[y1 * in_w + x0] * (1.0 - fx) + plane[y1 * in_w + x1] * fx;
                        top * (1.0 - fy) + bottom * fy
                    }
                };
                out.push(value);
            }
        }
    }
    Ok(out)
}

fn nearest(dst: usize, scale: f64, extent: usize) -> usize {
    ((dst as f64 / scale).floor() as usize).min(extent - 1)
}

/// Half-pixel source coordinate clamped to the input.
fn linear(dst: usize, scale: f64, extent: usize) -> (usize, usize, f64) {
    let max = (extent - 1) as f64;
    let src = ((dst as f64 + 0.5) / scale - 0.5).clamp(0.0, max);
    let lower = src.floor();
    let upper = (lower + 1.0).min(max);
    (lower as usize, upper as usize, src - lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use webnn_graph::GemmAttributes;

    fn run_one(kind: NodeKind, inputs: Vec<Tensor>, output_dims: &[u32]) -> Vec<f64> {
        run(&kind, &inputs, output_dims).unwrap()
    }

    #[test]
    fn conv2d_with_padding() {
        // 3x3 ones filter over 0..25 with "same" padding
        let input = Tensor::new([1, 1, 5, 5], (0..25).map(f64::from).collect());
        let filter = Tensor::new([1, 1, 3, 3], vec![1.0; 9]);
        let kind = NodeKind::Conv2d {
            padding: [1, 1, 1, 1],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
            activation: None,
        };
        let out = run_one(kind, vec![input, filter], &[1, 1, 5, 5]);
        assert_eq!(
            out,
            vec![
                12.0, 21.0, 27.0, 33.0, 24.0, 33.0, 54.0, 63.0, 72.0, 51.0, 63.0, 99.0, 108.0, 117.0, 81.0, 93.0,
                144.0, 153.0, 162.0, 111.0, 72.0, 111.0, 117.0, 123.0, 84.0
            ]
        );
    }

    #[test]
    fn conv2d_bias_and_fused_relu() {
        let input = Tensor::new([1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let filter = Tensor::new([2, 1, 1, 1], vec![1.0, -1.0]);
        let bias = Tensor::new([2], vec![0.5, 0.5]);
        let kind = NodeKind::Conv2d {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
            activation: Some(Activation::Relu),
        };
        let out = run_one(kind, vec![input, filter, bias], &[1, 2, 2, 2]);
        assert_eq!(out, vec![1.5, 2.5, 3.5, 4.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn depthwise_conv_uses_groups() {
        let input = Tensor::new([1, 2, 1, 1], vec![3.0, 5.0]);
        let filter = Tensor::new([2, 1, 1, 1], vec![2.0, 10.0]);
        let kind = NodeKind::Conv2d {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 2,
            activation: None,
        };
        assert_eq!(run_one(kind, vec![input, filter], &[1, 2, 1, 1]), vec![6.0, 50.0]);
    }

    #[test]
    fn pools() {
        let input = Tensor::new([1, 1, 4, 4], (1..=16).map(f64::from).collect());
        let pool = |kind| NodeKind::Pool2d {
            kind,
            window: [2, 2],
            padding: [0; 4],
            strides: [2, 2],
            dilations: [1, 1],
        };
        assert_eq!(
            run_one(pool(PoolKind::Max), vec![input.clone()], &[1, 1, 2, 2]),
            vec![6.0, 8.0, 14.0, 16.0]
        );
        assert_eq!(
            run_one(pool(PoolKind::Average), vec![input], &[1, 1, 2, 2]),
            vec![3.5, 5.5, 11.5, 13.5]
        );
    }

    #[test]
    fn average_pool_excludes_padding() {
        let input = Tensor::new([1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let kind = NodeKind::Pool2d {
            kind: PoolKind::Average,
            window: [2, 2],
            padding: [1, 0, 1, 0],
            strides: [1, 1],
            dilations: [1, 1],
        };
        // top-left window only covers input[0][0]
        let out = run_one(kind, vec![input], &[1, 1, 2, 2]);
        assert_eq!(out, vec![1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let input = Tensor::new([2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        let out = run_one(NodeKind::Softmax, vec![input], &[2, 3]);
        assert!((out[..3].iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((out[2] - 0.665_240_955_774_821_6).abs() < 1e-9);
        assert!(out[3..].iter().all(|&v| (v - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn gemm_alpha_beta() {
        let a = Tensor::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::new([2, 2], vec![5.0, 6.0, 7.0, 8.0]);
        let c = Tensor::new([2, 2], vec![1.0, 1.0, 1.0, 1.0]);
        let kind = NodeKind::Gemm(GemmAttributes {
            alpha: 2.0,
            beta: 3.0,
            ..GemmAttributes::default()
        });
        assert_eq!(run_one(kind, vec![a, b, c], &[2, 2]), vec![41.0, 47.0, 89.0, 103.0]);
    }

    #[test]
    fn concat_interleaves_blocks() {
        let a = Tensor::new([2, 1], vec![1.0, 2.0]);
        let b = Tensor::new([2, 2], vec![3.0, 4.0, 5.0, 6.0]);
        let out = run_one(NodeKind::Concat { axis: 1 }, vec![a, b], &[2, 3]);
        assert_eq!(out, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn nearest_and_linear_upsampling() {
        let input = Tensor::new([1, 1, 1, 2], vec![0.0, 4.0]);
        let nearest = NodeKind::Resample2d {
            mode: InterpolationMode::NearestNeighbor,
            scales: [1.0, 2.0],
        };
        assert_eq!(
            run_one(nearest, vec![input.clone()], &[1, 1, 1, 4]),
            vec![0.0, 0.0, 4.0, 4.0]
        );
        let linear = NodeKind::Resample2d {
            mode: InterpolationMode::Linear,
            scales: [1.0, 2.0],
        };
        assert_eq!(run_one(linear, vec![input], &[1, 1, 1, 4]), vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn elementwise_kinds() {
        let a = Tensor::new([3], vec![-1.0, 0.5, 2.0]);
        let b = Tensor::new([3], vec![1.0, 0.5, 1.0]);
        assert_eq!(
            run_one(NodeKind::Compare(ComparisonOp::GreaterOrEqual), vec![a.clone(), b.clone()], &[3]),
            vec![0.0, 1.0, 1.0]
        );
        assert_eq!(
            run_one(NodeKind::Binary(BinaryOp::Pow), vec![a.clone(), b], &[3]),
            vec![-1.0, 0.5f64.powf(0.5), 2.0]
        );
        assert_eq!(
            run_one(NodeKind::Activation(Activation::LeakyRelu { alpha: 0.5 }), vec![a.clone()], &[3]),
            vec![-0.5, 0.5, 2.0]
        );
        assert_eq!(
            run_one(
                NodeKind::Identity {
                    scale_bias: Some(ScaleBias { scale: -1.0, bias: 0.0 })
                },
                vec![a],
                &[3]
            ),
            vec![1.0, -0.5, -2.0]
        );
    }

    #[test]
    fn relu_passes_nan_through() {
        let input = Tensor::new([3], vec![f64::NAN, -1.0, 1.0]);
        let out = run_one(NodeKind::Activation(Activation::Relu), vec![input], &[3]);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[0.0, 1.0]);
    }

    #[test]
    fn bit_lane_keeps_every_bit() {
        let bits = vec![(1u64 << 60) + 1, 0x7f80_0001, u64::MAX];
        let moved = run_bits(
            &NodeKind::Identity { scale_bias: None },
            &[Tensor::new([3], bits.clone())],
            &[3],
        )
        .unwrap();
        assert_eq!(moved, bits);

        let a = Tensor::new([1, 1], vec![u64::MAX]);
        let b = Tensor::new([1, 1], vec![(1u64 << 53) + 1]);
        let joined = run_bits(&NodeKind::Concat { axis: 1 }, &[a, b], &[1, 2]).unwrap();
        assert_eq!(joined, vec![u64::MAX, (1u64 << 53) + 1]);
    }

    #[test]
    fn bit_lane_rejects_arithmetic() {
        assert!(!moves_bits(&NodeKind::Binary(BinaryOp::Add)));
        assert!(run_bits(&NodeKind::Softmax, &[Tensor::new([1, 1], vec![0])], &[1, 1]).is_err());
    }

    #[test]
    fn integer_kernels_stay_exact_above_f64_precision() {
        let big = (1i128 << 60) + 1;
        let a = Tensor::new([3], vec![big, -7, 7]);
        let b = Tensor::new([3], vec![1, 2, 0]);
        let run_int = |kind: NodeKind, inputs: Vec<Tensor<i128>>| run_integer(&kind, &inputs, &[3]).unwrap();

        assert_eq!(
            run_int(NodeKind::Binary(BinaryOp::Add), vec![a.clone(), b.clone()]),
            vec![big + 1, -5, 7]
        );
        assert_eq!(
            run_int(NodeKind::Binary(BinaryOp::Div), vec![a.clone(), b.clone()]),
            vec![big, -3, 0]
        );
        assert_eq!(
            run_int(NodeKind::Compare(ComparisonOp::Greater), vec![a.clone(), b]),
            vec![1, 0, 1]
        );
        assert_eq!(
            run_int(
                NodeKind::Identity {
                    scale_bias: Some(ScaleBias { scale: -1.0, bias: 0.0 })
                },
                vec![a.clone()]
            ),
            vec![-big, 7, -7]
        );
        assert_eq!(
            run_int(
                NodeKind::Activation(Activation::Clamp {
                    min_value: -0.5,
                    max_value: 5.5
                }),
                vec![a]
            ),
            vec![5, 0, 5]
        );
    }

    #[test]
    fn integer_pow_handles_negative_exponents() {
        assert_eq!(integer_pow(2, 10), 1024);
        assert_eq!(integer_pow(2, -1), 0);
        assert_eq!(integer_pow(-1, -3), -1);
        assert_eq!(integer_pow(10, 200), i128::MAX);
    }

    #[test]
    fn integer_lane_covers_exact_kinds_only() {
        assert!(has_integer_kernel(&NodeKind::Unary(UnaryOp::Neg)));
        assert!(!has_integer_kernel(&NodeKind::Unary(UnaryOp::Sqrt)));
        assert!(!has_integer_kernel(&NodeKind::Identity {
            scale_bias: Some(ScaleBias { scale: 0.5, bias: 0.0 })
        }));
        assert!(!has_integer_kernel(&NodeKind::Softmax));
    }
}
