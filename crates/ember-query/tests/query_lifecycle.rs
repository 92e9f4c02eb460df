//! End-to-end query lifecycle against the simulated device.

mod common;

use common::SimDevice;
use ember_query::cmd::event;
use ember_query::{
    DeviceCaps, DeviceContext, DriverStat, QueryKind, QueryResult, QueryState,
};
use pretty_assertions::assert_eq;

#[test]
fn occlusion_counter_end_minus_begin() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx
        .create_query(&mut mem, QueryKind::OcclusionCounter)
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);

    // Simulate the device writing begin=10, end=17 plus the matching
    // sequence into the current window.
    let r = q.region().expect("occlusion query has pooled storage");
    let w = q.window_base();
    r.write_u32(w, q.sequence());
    r.write_u32(w + 4, 17);
    r.write_u32(w + 20, 10);

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::Unsigned(7)
    );
    assert_eq!(q.state(), QueryState::Ready);
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn nested_occlusion_chains_to_enclosing_counter() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    // The inner query's begin chains a baseline report; its end reports the
    // final counter. 17 - 10 = 7 samples inside the inner window.
    sim.feed(event::SAMPLE_COUNT, &[10, 17]);

    let mut outer = ctx
        .create_query(&mut mem, QueryKind::OcclusionCounter)
        .unwrap();
    let mut inner = ctx
        .create_query(&mut mem, QueryKind::OcclusionCounter)
        .unwrap();

    ctx.begin_query(&mut mem, &mut sink, &mut outer).unwrap();
    assert!(sim.with_state(|s| s.sample_count_enabled));

    ctx.begin_query(&mut mem, &mut sink, &mut inner).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut inner);
    sim.run();

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut inner, true)
            .unwrap(),
        QueryResult::Unsigned(7)
    );

    ctx.end_query(&mut mem, &mut sink, &mut outer);
    // Last active occlusion query ended: counting is switched back off.
    assert!(!sim.with_state(|s| s.sample_count_enabled));

    ctx.destroy_query(&mut mem, &mut sink, inner);
    ctx.destroy_query(&mut mem, &mut sink, outer);
}

#[test]
fn repeated_cycles_leave_earlier_windows_intact() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx
        .create_query(&mut mem, QueryKind::OcclusionCounter)
        .unwrap();

    // Three cycles without an intervening read; each begin re-initializes
    // only its own fresh window.
    for _ in 0..3 {
        ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
        ctx.end_query(&mut mem, &mut sink, &mut q);
    }

    let r = q.region().unwrap();
    // Write a distinct count into each cycle's window.
    for (i, count) in [100u32, 200, 300].iter().enumerate() {
        let w = i as u32 * 32;
        r.write_u32(w, i as u32 + 1); // sequence of that cycle
        r.write_u32(w + 4, *count);
        r.write_u32(w + 20, 0);
    }

    // The first cycle's record still holds its own values.
    assert_eq!(r.read_u32(0), 1);
    assert_eq!(r.read_u32(4), 100);
    // The current (third) window decodes independently.
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::Unsigned(300)
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn pipeline_statistics_reports_per_stage_deltas() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    // Begin report pops first, end report second: delta = stage index + 1.
    for (i, ev) in event::PIPELINE_STAGES.iter().enumerate() {
        let begin = i as u64 * 10;
        let end = begin + i as u64 + 1;
        sim.feed(*ev, &[begin, end]);
    }

    let mut q = ctx
        .create_query(&mut mem, QueryKind::PipelineStatistics)
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);
    sim.run();

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::PipelineStatistics([1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn primitives_generated_uses_stream_rebinding() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let ev = event::for_stream(event::GENERATED_PRIMS, 2);
    sim.feed(ev, &[40, 100]);

    let mut q = ctx
        .create_query(&mut mem, QueryKind::PrimitivesGenerated { stream: 2 })
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);
    sim.run();

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::Unsigned(60)
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn gpu_finished_is_end_only_and_true_once_signalled() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx.create_query(&mut mem, QueryKind::GpuFinished).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::NotReady
    );
    sim.run();
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::Boolean(true)
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn nonblocking_poll_flushes_at_most_once() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx.create_query(&mut mem, QueryKind::GpuFinished).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);
    assert_eq!(sim.submits(), 0);

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::NotReady
    );
    assert_eq!(sim.submits(), 1);
    assert_eq!(q.state(), QueryState::Flushed);

    // Polling again does not kick another submit.
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::NotReady
    );
    assert_eq!(sim.submits(), 1);

    sim.run();
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, false)
            .unwrap(),
        QueryResult::Boolean(true)
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn time_elapsed_blocking_wait_drives_the_device() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx.create_query(&mut mem, QueryKind::TimeElapsed).unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    sim.with_state(|s| s.timestamp = 5_000);
    ctx.end_query(&mut mem, &mut sink, &mut q);

    // No explicit run: the blocking result waits the device forward. Both
    // reports execute with the same simulated clock, so the elapsed time
    // comes out zero and the sync was counted.
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::Unsigned(0)
    );
    assert_eq!(ctx.stats().get(DriverStat::QuerySyncCount), 1);
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn stream_output_offset_save_serializes_once() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    sim.feed(event::for_stream(event::STREAM_BUFFER_OFFSET, 1), &[768]);

    let mut q = ctx
        .create_query(&mut mem, QueryKind::TransformFeedbackBufferOffset)
        .unwrap();
    let mut serialize = true;
    ctx.save_stream_output_offset(&mut mem, &mut sink, &mut q, 1, &mut serialize);
    assert!(!serialize);
    assert_eq!(sim.with_state(|s| s.serializes), 1);
    assert_eq!(ctx.stats().get(DriverStat::GpuSerializeCount), 1);

    sim.run();
    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::Unsigned(768)
    );

    // A second save with serialization already owed by nobody stays quiet.
    let mut serialize = false;
    ctx.save_stream_output_offset(&mut mem, &mut sink, &mut q, 1, &mut serialize);
    assert_eq!(sim.with_state(|s| s.serializes), 1);
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn transform_feedback_stats_reports_both_counters() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let written = event::for_stream(event::STREAM_VERTICES_WRITTEN, 0);
    let needed = event::for_stream(event::STREAM_PRIMS_NEEDED, 0);
    sim.feed(written, &[5, 25]);
    sim.feed(needed, &[10, 40]);

    let mut q = ctx
        .create_query(&mut mem, QueryKind::TransformFeedbackStats { stream: 0 })
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);
    sim.run();

    assert_eq!(
        ctx.query_result(&mut mem, &mut sink, &mut q, true).unwrap(),
        QueryResult::StreamOutStats {
            written: 20,
            generated: 30
        }
    );
    ctx.destroy_query(&mut mem, &mut sink, q);
}

#[test]
fn destroyed_active_query_is_ended_first() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx
        .create_query(&mut mem, QueryKind::OcclusionCounter)
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    assert!(sim.with_state(|s| s.sample_count_enabled));

    ctx.destroy_query(&mut mem, &mut sink, q);
    // The implicit end disabled sample counting again.
    assert!(!sim.with_state(|s| s.sample_count_enabled));

    // Storage went back through the deferred path; it frees on the fence.
    assert_eq!(ctx.pool_free_bytes(), 4096 - 256);
    sim.run();
    assert_eq!(ctx.pool_free_bytes(), 4096);
}

#[test]
fn inline_result_feed_references_the_record() {
    let sim = SimDevice::new();
    let mut mem = sim.memory();
    let mut sink = sim.sink();
    let mut ctx = DeviceContext::new(DeviceCaps::default());

    let mut q = ctx
        .create_query(&mut mem, QueryKind::PrimitivesEmitted { stream: 0 })
        .unwrap();
    ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
    ctx.end_query(&mut mem, &mut sink, &mut q);

    ctx.emit_query_inline(&mut sink, &q, 8);
    let fetches = sim.with_state(|s| s.inline_fetches.clone());
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].2, 4);
    ctx.destroy_query(&mut mem, &mut sink, q);
}
