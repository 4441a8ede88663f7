//! End-to-end raster runs: traversal order, persistence keys, cancellation.

mod common;

use common::checkerboard;
use scan::{
    AutofocusParams, CancelToken, RasterConfig, RasterEvent, RasterRunner, ScanError, StackParams,
};
use shared::camera_interface::MockCamera;
use shared::image_sink::MemorySink;
use shared::stage_interface::MockStage;
use std::sync::{Arc, Mutex};

#[test]
fn serpentine_traversal_keys_tiles_by_logical_column() {
    let mut stage = MockStage::new();
    let mut camera = MockCamera::repeating(checkerboard(50)).with_name("scripted-cam");
    let mut sink = MemorySink::new();
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
    cfg.capture = true;

    let reached = Arc::new(Mutex::new(Vec::new()));
    let log = reached.clone();
    let summary = RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg)
        .with_lens("10x")
        .on_event(move |event| {
            if let RasterEvent::TileReached { row, col, .. } = *event {
                log.lock().unwrap().push((row, col));
            }
        })
        .run()
        .unwrap();

    assert_eq!(summary.tiles, 6);
    assert_eq!(summary.captures, 6);
    // Odd rows are walked right-to-left.
    assert_eq!(
        *reached.lock().unwrap(),
        vec![(0, 0), (0, 1), (0, 2), (1, 2), (1, 1), (1, 0)]
    );
    // Filenames carry the logical column, not the visit order.
    let names: Vec<_> = sink.saved.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "tile_r0000_c0000",
            "tile_r0000_c0001",
            "tile_r0000_c0002",
            "tile_r0001_c0002",
            "tile_r0001_c0001",
            "tile_r0001_c0000",
        ]
    );
    assert!(sink
        .saved
        .iter()
        .all(|s| s.metadata.lens.as_deref() == Some("10x")));
    assert_eq!(sink.saved[0].metadata.camera, "scripted-cam");
}

#[test]
fn non_serpentine_rows_return_to_the_row_start() {
    let mut stage = MockStage::new();
    let mut camera = MockCamera::new(Vec::new());
    let mut sink = MemorySink::new();
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
    cfg.serpentine = false;

    RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg)
        .run()
        .unwrap();

    // The hop from the end of row 0 at (2, 0) to the start of row 1 at
    // (0, 1) is a single relative move.
    assert!(stage
        .relative_moves
        .iter()
        .any(|&(dx, dy, _)| (dx + 2.0).abs() < 1e-9 && (dy - 1.0).abs() < 1e-9));
}

#[test]
fn cancellation_after_a_settle_stops_before_tile_operations() {
    let slot: Arc<Mutex<Option<CancelToken>>> = Arc::new(Mutex::new(None));
    let hook = slot.clone();
    // The first tile needs no move; the second settle is the arrival at
    // the third tile.
    let mut stage = MockStage::new().with_wait_hook(move |count| {
        if count == 2 {
            if let Some(token) = hook.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
    });
    let mut camera = MockCamera::repeating(checkerboard(50));
    let mut sink = MemorySink::new();
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
    cfg.capture = true;

    let reached = Arc::new(Mutex::new(0usize));
    let count = reached.clone();
    let result = {
        let mut runner = RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg).on_event(
            move |event| {
                if matches!(event, RasterEvent::TileReached { .. }) {
                    *count.lock().unwrap() += 1;
                }
            },
        );
        *slot.lock().unwrap() = Some(runner.cancel_token());
        runner.run()
    };

    assert!(matches!(result, Err(ScanError::Cancelled)));
    // Two tiles completed; the third tile's move finished but nothing was
    // captured there.
    assert_eq!(*reached.lock().unwrap(), 2);
    assert_eq!(sink.saved.len(), 2);
}

#[test]
fn save_failures_are_skipped_without_aborting_the_run() {
    let mut stage = MockStage::new();
    let mut camera = MockCamera::repeating(checkerboard(50));
    let mut sink = MemorySink::new();
    sink.fail_with = Some("disk full".to_string());
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
    cfg.capture = true;

    let summary = RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg)
        .run()
        .unwrap();

    assert_eq!(summary.tiles, 6);
    assert_eq!(summary.captures, 0);
    assert!(sink.saved.is_empty());
}

#[test]
fn invalid_autofocus_parameters_abort_the_run() {
    let mut stage = MockStage::new();
    let mut camera = MockCamera::repeating(checkerboard(50));
    let mut sink = MemorySink::new();
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
    cfg.autofocus = Some(AutofocusParams {
        coarse_step_mm: 0.0,
        ..AutofocusParams::default()
    });

    let result = RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg).run();
    assert!(matches!(result, Err(ScanError::InvalidArgument(_))));
}

#[test]
fn per_tile_focus_stack_uses_the_tile_prefix() {
    let mut stage = MockStage::new();
    let mut camera = MockCamera::repeating(checkerboard(50));
    let mut sink = MemorySink::new();
    let mut cfg = RasterConfig::rectangle((0.0, 0.0), (1.0, 1.0), 1, 1);
    cfg.stack = Some(StackParams {
        range_mm: 0.04,
        step_mm: 0.02,
        feed_mm_per_min: 240.0,
    });

    let summary = RasterRunner::new(&mut stage, &mut camera, &mut sink, cfg)
        .run()
        .unwrap();

    assert_eq!(summary.tiles, 1);
    let names: Vec<_> = sink.saved.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(names, vec!["tile_r0000_c0000_z000", "tile_r0000_c0000_z001"]);
    // The stack restores the Z it started from.
    assert!(stage.z.abs() < 1e-12);
}
