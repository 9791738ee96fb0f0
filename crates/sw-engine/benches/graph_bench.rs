//! Criterion benchmarks for the render graph on the software backend.
//!
//! - **Frame**: `bind` + `render` of a mix graph at several buffer sizes
//! - **Mutate**: insert and remove a stage between frames
//!
//! Run with: `cargo bench -p sw-engine`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sw_engine::stages::{constant, final_stage, gain_effect, multitrack_join};
use sw_engine::{RenderGraph, StageConfig};
use sw_gpu::{builtin_shaders, SoftwareBackend};

const BUFFER_SIZES: &[u32] = &[128, 512, 2048];

fn make_mix(config: StageConfig, tracks: usize) -> RenderGraph {
    let lib = builtin_shaders();
    let mut join = multitrack_join(config, &lib, tracks).unwrap();
    let mut fin = final_stage(config, &lib).unwrap();
    let mut stages = Vec::new();
    for i in 0..tracks {
        let mut src = constant(config, &lib, 0.1 * i as f32).unwrap();
        src.connect_render_stage(&mut join).unwrap();
        stages.push(src);
    }
    join.connect_render_stage(&mut fin).unwrap();
    let terminal = fin.gid();
    stages.push(join);
    stages.push(fin);
    RenderGraph::new(stages, terminal).unwrap()
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/frame");
    for &frames in BUFFER_SIZES {
        let config = StageConfig {
            frames_per_buffer: frames,
            ..StageConfig::default()
        };
        let mut gpu = SoftwareBackend::new();
        let mut graph = make_mix(config, 4);
        graph.initialize(&mut gpu).unwrap();
        let mut time = 0;
        group.bench_with_input(BenchmarkId::from_parameter(frames), &frames, |b, _| {
            b.iter(|| {
                graph.bind(&mut gpu).unwrap();
                graph.render(&mut gpu, time).unwrap();
                time = time.wrapping_add(1);
                black_box(graph.output_buffer());
            });
        });
        graph.release(&mut gpu);
    }
    group.finish();
}

fn bench_mutation(c: &mut Criterion) {
    let config = StageConfig::default();
    let lib = builtin_shaders();
    let mut graph = make_mix(config, 4);
    let terminal = graph.terminal();
    c.bench_function("graph/insert_remove", |b| {
        b.iter(|| {
            let stage = gain_effect(config, &lib).unwrap();
            let id = stage.gid();
            graph.insert_render_stage_infront(terminal, stage).unwrap();
            black_box(graph.remove_render_stage(id).unwrap());
        });
    });
}

criterion_group!(benches, bench_frame, bench_mutation);
criterion_main!(benches);
