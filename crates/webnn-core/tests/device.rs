//! Device timing, faults, loss and standalone buffers

use std::collections::HashMap;

use futures::executor::block_on;
use half::f16;
use proptest::prelude::*;
use serial_test::serial;
use webnn_backends::{Backend, CpuBackend, CpuBackendOptions};
use webnn_core::{
    Adapter, Buffer, Context, ContextOptions, ErrorCode, LostReason, NamedBuffers, NamedBytes, Result,
    BUFFER_ALIGNMENT,
};
use webnn_graph::{BinaryOp, DataType, GraphBuilder, GraphInfo, OperatorKind, TensorDescriptor};

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn f32_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cpu(options: CpuBackendOptions) -> (Adapter<CpuBackend>, Context<CpuBackend>) {
    webnn_tracing::init_test_tracing();
    let adapter = Adapter::cpu(options);
    let context = adapter.create_context(ContextOptions::default());
    (adapter, context)
}

fn relu_graph(len: u32) -> GraphInfo {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", DataType::Float32, &[len]);
    builder
        .output_operation("y", OperatorKind::Relu, &[x])
        .expect("relu is valid");
    builder.build()
}

fn bias_graph() -> GraphInfo {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", DataType::Float32, &[2]);
    let bias = builder.constant_f32(&[2], &[10.0, 20.0]);
    builder
        .output_operation("y", OperatorKind::binary(BinaryOp::Add), &[x, bias])
        .expect("same shapes add");
    builder.build()
}

fn input(values: &[f32]) -> NamedBytes {
    HashMap::from([("x".to_string(), f32_bytes(values))])
}

// ===== Fence timing =====

#[tokio::test]
async fn compute_resolves_only_after_the_device_finishes() -> Result<()> {
    let (adapter, context) = cpu(CpuBackendOptions::default());
    let compiled = context.create_graph(&relu_graph(4)).await?;
    let inputs = input(&[-1.0, 1.0, -2.0, 2.0]);

    adapter.backend().pause();
    let mut pending = Box::pin(context.compute(&compiled, &inputs));
    assert!(futures::poll!(pending.as_mut()).is_pending());
    assert!(context.last_submitted_fence() > context.completed_fence());

    adapter.backend().resume();
    let outputs = pending.await?;
    assert_eq!(f32_values(&outputs["y"]), vec![0.0, 1.0, 0.0, 2.0]);
    assert!(context.completed_fence() >= context.last_submitted_fence());
    Ok(())
}

#[tokio::test]
async fn contexts_on_one_adapter_share_the_queue() -> Result<()> {
    let (adapter, first) = cpu(CpuBackendOptions::default());
    let second = adapter.create_context(ContextOptions::default());
    assert_ne!(first.id(), second.id());

    let a = first.create_graph(&relu_graph(2)).await?;
    let b = second.create_graph(&relu_graph(2)).await?;
    first.compute(&a, &input(&[1.0, -1.0])).await?;
    let before = second.last_submitted_fence();
    second.compute(&b, &input(&[1.0, -1.0])).await?;
    assert!(second.last_submitted_fence() > before);
    assert_eq!(first.last_submitted_fence(), second.last_submitted_fence());
    Ok(())
}

// ===== Faults and loss =====

#[tokio::test]
async fn faulted_compute_reinitializes_on_the_next_run() -> Result<()> {
    let (adapter, context) = cpu(CpuBackendOptions::default());
    let compiled = context.create_graph(&bias_graph()).await?;
    assert!(compiled.is_initialized());

    adapter.backend().fail_next_submission("injected fault");
    let err = context.compute(&compiled, &input(&[1.0, 2.0])).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unknown);
    assert_eq!(err.lost_reason(), None);
    assert!(!compiled.is_initialized());
    assert!(!context.is_lost());

    let outputs = context.compute(&compiled, &input(&[1.0, 2.0])).await?;
    assert_eq!(f32_values(&outputs["y"]), vec![11.0, 22.0]);
    assert!(compiled.is_initialized());
    Ok(())
}

#[tokio::test]
async fn exhausted_memory_loses_the_context() {
    let (adapter, context) = cpu(CpuBackendOptions::default().with_memory_budget(64));
    let bystander = adapter.create_context(ContextOptions::default());

    let err = context
        .create_buffer(&TensorDescriptor::new(DataType::Float32, vec![1024]))
        .unwrap_err();
    assert_eq!(err.lost_reason(), Some(LostReason::OutOfMemory));
    assert_eq!(err.code(), ErrorCode::Unknown);

    // loss is permanent, even for requests that would fit
    let err = context
        .create_buffer(&TensorDescriptor::new(DataType::Float32, vec![1]))
        .unwrap_err();
    assert_eq!(err.lost_reason(), Some(LostReason::OutOfMemory));
    assert_eq!(context.lost_reason(), Some(LostReason::OutOfMemory));

    assert!(!bystander.is_lost());
    assert!(bystander
        .create_buffer(&TensorDescriptor::new(DataType::Float32, vec![1]))
        .is_ok());
}

#[tokio::test]
async fn removed_device_loses_every_context() -> Result<()> {
    let (adapter, context) = cpu(CpuBackendOptions::default());
    let other = adapter.create_context(ContextOptions::default());
    let compiled = context.create_graph(&relu_graph(2)).await?;

    adapter.backend().remove_device();

    let err = context.compute(&compiled, &input(&[1.0, 2.0])).await.unwrap_err();
    assert_eq!(err.lost_reason(), Some(LostReason::DeviceRemoved));
    let err = other.create_graph(&relu_graph(2)).await.unwrap_err();
    assert_eq!(err.lost_reason(), Some(LostReason::DeviceRemoved));
    assert!(context.is_lost() && other.is_lost());
    Ok(())
}

// ===== Standalone buffers =====

fn memory_models() -> [CpuBackendOptions; 2] {
    [
        CpuBackendOptions::default(),
        CpuBackendOptions::default().with_unified_memory(true),
    ]
}

#[tokio::test]
async fn buffer_write_then_read_round_trips() -> Result<()> {
    for options in memory_models() {
        let (_adapter, context) = cpu(options);
        let values = [f16::from_f32(1.5), f16::from_f32(-2.0), f16::from_f32(0.25)];
        let buffer = context.create_buffer(&TensorDescriptor::new(DataType::Float16, vec![3]))?;
        assert_eq!(buffer.byte_length(), 6);
        assert_eq!(buffer.allocation_size(), 8);

        let bytes: Vec<u8> = bytemuck::cast_slice(&values).to_vec();
        context.write_buffer(&buffer, &bytes).await?;
        assert_eq!(context.read_buffer(&buffer).await?, bytes);
    }
    Ok(())
}

#[tokio::test]
async fn buffer_requests_are_checked() -> Result<()> {
    let (_adapter, context) = cpu(CpuBackendOptions::default());
    let buffer = context.create_buffer(&TensorDescriptor::new(DataType::Float32, vec![2]))?;

    let err = context.write_buffer(&buffer, &[0; 4]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRequest);

    let (_, other) = cpu(CpuBackendOptions::default());
    let err = other.read_buffer(&buffer).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRequest);

    let err = context
        .create_buffer(&TensorDescriptor::new(DataType::Float32, vec![u32::MAX, u32::MAX, u32::MAX]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    Ok(())
}

#[tokio::test]
async fn dispatch_runs_on_bound_buffers() -> Result<()> {
    for options in memory_models() {
        let (_adapter, context) = cpu(options);
        let compiled = context.create_graph(&relu_graph(4)).await?;
        let descriptor = TensorDescriptor::new(DataType::Float32, vec![4]);
        let x = context.create_buffer(&descriptor)?;
        let y = context.create_buffer(&descriptor)?;

        context
            .write_buffer(&x, &f32_bytes(&[-3.0, 3.0, -0.5, 0.5]))
            .await?;
        let inputs: NamedBuffers = HashMap::from([("x".to_string(), x.clone())]);
        let outputs: NamedBuffers = HashMap::from([("y".to_string(), y.clone())]);
        context.dispatch(&compiled, &inputs, &outputs)?;

        assert_eq!(x.last_submission_fence(), y.last_submission_fence());
        assert!(y.last_submission_fence() > 0);
        assert_eq!(
            f32_values(&context.read_buffer(&y).await?),
            vec![0.0, 3.0, 0.0, 0.5]
        );
    }
    Ok(())
}

#[tokio::test]
async fn dispatch_rejects_mismatched_bindings() -> Result<()> {
    let (_adapter, context) = cpu(CpuBackendOptions::default());
    let compiled = context.create_graph(&relu_graph(4)).await?;
    let x: Buffer = context.create_buffer(&TensorDescriptor::new(DataType::Float32, vec![4]))?;
    let wrong = context.create_buffer(&TensorDescriptor::new(DataType::Float32, vec![2, 2]))?;

    let bind = |buffer: &Buffer| HashMap::from([("x".to_string(), buffer.clone())]);
    let out = |buffer: &Buffer| HashMap::from([("y".to_string(), buffer.clone())]);

    let aliased = context.dispatch(&compiled, &bind(&x), &out(&x)).unwrap_err();
    assert_eq!(aliased.code(), ErrorCode::InvalidRequest);

    let reshaped = context.dispatch(&compiled, &bind(&x), &out(&wrong)).unwrap_err();
    assert_eq!(reshaped.code(), ErrorCode::InvalidRequest);

    let missing = context.dispatch(&compiled, &bind(&x), &HashMap::new()).unwrap_err();
    assert_eq!(missing.code(), ErrorCode::InvalidRequest);
    assert_eq!(x.last_submission_fence(), 0);
    Ok(())
}

/// `len` elements of `data_type` taken from the front of `pool`.
fn element_bytes(pool: &[u8], data_type: DataType, len: u32) -> Vec<u8> {
    pool[..len as usize * data_type.bytes_per_element()].to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buffer_bytes_round_trip_for_every_type(
        type_index in 0..DataType::ALL.len(),
        len in 1u32..24,
        pool in prop::collection::vec(any::<u8>(), 192),
    ) {
        let data_type = DataType::ALL[type_index];
        let bytes = element_bytes(&pool, data_type, len);
        for options in memory_models() {
            let (_adapter, context) = cpu(options);
            let buffer = context
                .create_buffer(&TensorDescriptor::new(data_type, vec![len]))
                .expect("small buffers fit");
            block_on(context.write_buffer(&buffer, &bytes)).expect("write matches the buffer");
            prop_assert_eq!(block_on(context.read_buffer(&buffer)).expect("read"), bytes.clone());
        }
    }

    #[test]
    fn reshaped_bytes_pass_through_compute(
        type_index in 0..DataType::ALL.len(),
        len in 1u32..24,
        pool in prop::collection::vec(any::<u8>(), 192),
    ) {
        let data_type = DataType::ALL[type_index];
        let bytes = element_bytes(&pool, data_type, len);
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", data_type, &[len]);
        builder.reshape(x, &[1, len], Some("y")).expect("same element count");
        let graph = builder.build();
        let inputs = HashMap::from([("x".to_string(), bytes.clone())]);

        for options in memory_models() {
            let (_adapter, context) = cpu(options);
            let compiled = block_on(context.create_graph(&graph)).expect("reshape compiles");
            let outputs = block_on(context.compute(&compiled, &inputs)).expect("reshape runs");
            prop_assert_eq!(&outputs["y"], &bytes);
        }
    }
}

proptest! {
    #[test]
    fn buffer_allocation_is_aligned(dims in prop::collection::vec(1u32..16, 0..4)) {
        let (_adapter, context) = cpu(CpuBackendOptions::default());
        let buffer = context
            .create_buffer(&TensorDescriptor::new(DataType::Uint8, dims.clone()))
            .expect("small buffers fit");
        let packed: usize = dims.iter().map(|&d| d as usize).product();
        prop_assert_eq!(buffer.byte_length(), packed);
        prop_assert_eq!(buffer.allocation_size() % BUFFER_ALIGNMENT, 0);
        prop_assert!(buffer.allocation_size() >= packed);
    }
}

// ===== Configuration =====

#[test]
#[serial]
fn env_selects_unified_memory() {
    std::env::set_var("WEBNN_CPU_UMA", "true");
    std::env::set_var("WEBNN_CPU_MEMORY_BUDGET", "4096");
    let options = CpuBackendOptions::from_env();
    std::env::remove_var("WEBNN_CPU_UMA");
    std::env::remove_var("WEBNN_CPU_MEMORY_BUDGET");

    assert!(options.unified_memory);
    assert_eq!(options.memory_budget, Some(4096));

    let (_adapter, context) = cpu(options);
    assert!(context.adapter().backend().capabilities().is_uma);
}

#[test]
#[serial]
fn env_defaults_to_discrete_memory() {
    std::env::remove_var("WEBNN_CPU_UMA");
    let options = CpuBackendOptions::from_env();
    assert!(!options.unified_memory);
}
