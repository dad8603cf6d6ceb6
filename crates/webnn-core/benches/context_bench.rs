use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::executor::block_on;
use webnn_backends::CpuBackendOptions;
use webnn_core::{Adapter, ContextOptions};
use webnn_graph::{BinaryOp, DataType, GraphBuilder, GraphInfo, OperatorKind};
use webnn_tracing::{init_global_tracing, TracingConfig};

/// `relu(x + bias)` over a `[1, n]` row.
fn bias_relu(n: u32) -> GraphInfo {
    let mut builder = GraphBuilder::new();
    let x = builder.input("x", DataType::Float32, &[1, n]);
    let bias = builder.constant_f32(&[n], &vec![0.5; n as usize]);
    let sum = builder
        .operation(OperatorKind::binary(BinaryOp::Add), &[x, bias])
        .unwrap();
    builder.output_operation("y", OperatorKind::Relu, &[sum]).unwrap();
    builder.build()
}

fn benchmark_create_graph(c: &mut Criterion) {
    // WEBNN_TRACING_PROFILE=performance for span timings
    let _ = init_global_tracing(&TracingConfig::from_env());
    let mut group = c.benchmark_group("create_graph");
    let adapter = Adapter::cpu(CpuBackendOptions::default());

    for size in [16u32, 1_024, 65_536].iter() {
        let graph = bias_relu(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &graph, |b, graph| {
            let context = adapter.create_context(ContextOptions::default());
            b.iter(|| {
                // cached after the first iteration, so this measures constant upload
                let compiled = block_on(context.create_graph(graph)).unwrap();
                black_box(compiled.outputs().len());
            });
        });
    }

    group.finish();
}

fn benchmark_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute");

    for unified_memory in [false, true] {
        let adapter = Adapter::cpu(CpuBackendOptions::default().with_unified_memory(unified_memory));
        let context = adapter.create_context(ContextOptions::default());

        for size in [16u32, 1_024, 65_536].iter() {
            let compiled = block_on(context.create_graph(&bias_relu(*size))).unwrap();
            let data: Vec<f32> = (0..*size).map(|i| i as f32 - (*size / 2) as f32).collect();
            let inputs = HashMap::from([("x".to_string(), bytemuck::cast_slice(&data).to_vec())]);

            let id = format!("{}/{size}", if unified_memory { "uma" } else { "discrete" });
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                b.iter(|| {
                    let outputs = block_on(context.compute(&compiled, &inputs)).unwrap();
                    black_box(outputs["y"].len());
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_create_graph, benchmark_compute);
criterion_main!(benches);
