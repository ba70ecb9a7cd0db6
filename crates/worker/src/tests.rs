use std::time::Duration;

use crossbeam_channel::bounded;
use model::{
    Bitmap, ColorRgba, EngineConfig, InputPoint, PostProcess, RenderOptions, RenderOverrides,
};
use protocol::{RequestKind, WorkerRequest, WorkerResponse};

use crate::{CancelToken, RenderSession, SessionError};

fn test_options() -> RenderOptions {
    RenderOptions {
        config: EngineConfig::default(),
        overrides: RenderOverrides::default(),
        base_size: 8.0,
        color: ColorRgba::new(0.2, 0.4, 0.8, 1.0),
        width: 64,
        height: 64,
        pixel_ratio: 1.0,
        post_process: None,
    }
}

fn test_path() -> Vec<InputPoint> {
    vec![
        InputPoint {
            x: 10.0,
            y: 10.0,
            time_ms: 0.0,
            pressure: 0.8,
            tilt: 1.0,
            heading: 0.0,
            speed: 0.0,
        },
        InputPoint {
            x: 50.0,
            y: 40.0,
            time_ms: 16.0,
            pressure: 0.6,
            tilt: 1.0,
            heading: 0.0,
            speed: 0.4,
        },
    ]
}

#[test]
fn ping_round_trips_through_worker_thread() {
    let mut session = RenderSession::create();
    session.init(64, 64, None).expect("init session");
    let alive = session
        .ping(Duration::from_secs(5))
        .expect("ping must not fail");
    assert!(alive);
    session.dispose();
}

#[test]
fn render_before_init_fails_only_that_call() {
    let mut session = RenderSession::create();
    let error = session
        .render_stroke(None, test_options(), test_path(), Some(1), None)
        .expect_err("render before init must fail");
    assert!(matches!(error, SessionError::Worker(_)));

    // The session stays usable.
    session.init(64, 64, None).expect("init after failed render");
    session
        .render_stroke(None, test_options(), test_path(), Some(1), None)
        .expect("render after init");
    session.dispose();
}

#[test]
fn session_render_matches_direct_renderer() {
    let mut session = RenderSession::create();
    session.init(64, 64, None).expect("init session");
    let via_session = session
        .render_stroke(None, test_options(), test_path(), Some(42), None)
        .expect("render via session");
    session.dispose();

    let mut direct = Bitmap::new(64, 64).expect("create direct target");
    renderer::render_stroke(&mut direct, &test_options(), &test_path(), Some(42))
        .expect("render directly");
    assert_eq!(via_session, direct);
}

#[test]
fn snapshot_returns_last_rendered_layer() {
    let mut session = RenderSession::create();
    if session.is_fallback() {
        return;
    }
    session.init(64, 64, None).expect("init session");
    let rendered = session
        .render_stroke(Some(3), test_options(), test_path(), Some(7), None)
        .expect("render onto layer");
    let snapshot = session
        .snapshot(Some(3))
        .expect("snapshot layer")
        .expect("threaded session must return a snapshot");
    assert_eq!(snapshot, rendered);

    // An untouched layer reads back fully transparent.
    let untouched = session
        .snapshot(Some(99))
        .expect("snapshot untouched layer")
        .expect("threaded session must return a snapshot");
    assert!(untouched.pixels().iter().all(|byte| *byte == 0));
    session.dispose();
}

#[test]
fn snapshot_is_unavailable_in_fallback_mode() {
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init fallback session");
    session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect("render in fallback mode");
    assert!(session.is_fallback());
    assert_eq!(session.snapshot(None).expect("snapshot call"), None);
}

#[test]
fn resize_before_init_is_rejected() {
    let mut session = RenderSession::local();
    let error = session
        .resize(128, 128, None)
        .expect_err("resize before init must fail");
    assert!(matches!(error, SessionError::Worker(_)));
}

#[test]
fn cancelled_render_leaves_kind_busy_until_response_drained() {
    let (request_sender, request_receiver) = bounded(8);
    let (response_sender, response_receiver) = bounded(8);
    let mut session = RenderSession::from_channels(request_sender, response_receiver);

    let token = CancelToken::new();
    token.cancel();
    let error = session
        .render_stroke(None, test_options(), test_path(), None, Some(&token))
        .expect_err("pre-cancelled wait must abandon");
    assert_eq!(error, SessionError::Cancelled);
    assert_eq!(
        request_receiver.recv().expect("request was sent").kind(),
        RequestKind::RenderStroke
    );

    // No response yet, so the kind is still gated.
    let error = session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect_err("second render while first unresolved");
    assert_eq!(error, SessionError::Busy(RequestKind::RenderStroke));

    // The worker answers in request order: the abandoned render first, then
    // the ping. The late bitmap is drained and discarded, other kinds are
    // not gated.
    response_sender
        .send(WorkerResponse::Bitmap {
            bitmap: Bitmap::new(1, 1).expect("late bitmap"),
            layer_id: None,
        })
        .expect("queue late response");
    response_sender
        .send(WorkerResponse::Pong)
        .expect("queue pong");
    assert!(session.ping(Duration::from_secs(1)).expect("ping"));

    // With the late response retired, the render kind is free again.
    response_sender
        .send(WorkerResponse::Bitmap {
            bitmap: Bitmap::new(2, 2).expect("fresh bitmap"),
            layer_id: None,
        })
        .expect("queue fresh response");
    let bitmap = session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect("render after drain");
    assert_eq!(bitmap.width(), 2);
}

#[test]
fn ping_gates_while_unresolved_and_wait_order_is_fifo() {
    let (request_sender, _request_receiver) = bounded(8);
    let (response_sender, response_receiver) = bounded(8);
    let mut session = RenderSession::from_channels(request_sender, response_receiver);

    // Silent worker: the ping times out but stays in flight.
    assert!(!session.ping(Duration::from_millis(20)).expect("first ping"));
    let error = session
        .ping(Duration::from_millis(20))
        .expect_err("second ping while first unresolved");
    assert_eq!(error, SessionError::Busy(RequestKind::Ping));

    // One pong settles the abandoned ping, the next answers the new one.
    response_sender
        .send(WorkerResponse::Pong)
        .expect("queue first pong");
    response_sender
        .send(WorkerResponse::Pong)
        .expect("queue second pong");
    assert!(session.ping(Duration::from_secs(1)).expect("ping after drain"));
}

#[test]
fn worker_error_fails_the_awaiting_call() {
    let (request_sender, _request_receiver) = bounded(8);
    let (response_sender, response_receiver) = bounded(8);
    let mut session = RenderSession::from_channels(request_sender, response_receiver);

    response_sender
        .send(WorkerResponse::Error {
            message: "surface lost".to_owned(),
        })
        .expect("queue error");
    let error = session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect_err("worker error must fail the call");
    assert_eq!(error, SessionError::Worker("surface lost".to_owned()));
}

#[test]
fn reserved_done_response_is_ignored() {
    let (request_sender, _request_receiver) = bounded(8);
    let (response_sender, response_receiver) = bounded(8);
    let mut session = RenderSession::from_channels(request_sender, response_receiver);

    response_sender
        .send(WorkerResponse::Done { id: Some(1) })
        .expect("queue done");
    response_sender
        .send(WorkerResponse::Pong)
        .expect("queue pong");
    assert!(session.ping(Duration::from_secs(1)).expect("ping"));
}

#[test]
fn dispose_is_idempotent_and_blocks_further_calls() {
    let mut session = RenderSession::create();
    session.init(32, 32, None).expect("init session");
    session.dispose();
    session.dispose();
    assert_eq!(
        session.ping(Duration::from_millis(10)),
        Err(SessionError::Disposed)
    );
}

#[test]
fn post_processed_render_returns_a_same_sized_bitmap() {
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init session");
    let mut options = test_options();
    options.post_process = Some(PostProcess {
        blur_sigma: Some(6.0),
        extract_normal_map: true,
    });
    let processed = session
        .render_stroke(None, options, test_path(), Some(3), None)
        .expect("render with post-processing");
    assert_eq!(processed.width(), 64);
    assert_eq!(processed.height(), 64);

    let mut plain = Bitmap::new(64, 64).expect("create plain target");
    renderer::render_stroke(&mut plain, &test_options(), &test_path(), Some(3))
        .expect("render without post-processing");
    if gpu::GpuSurface::create(4, 4).is_some() {
        // Normal extraction rewrites every pixel and emits opaque alpha.
        assert_ne!(processed, plain);
        assert!(processed.pixels().chunks_exact(4).all(|pixel| pixel[3] == 255));
    } else {
        // Without a shader context post-processing is skipped, not failed.
        assert_eq!(processed, plain);
    }
}

#[test]
fn blur_only_post_process_keeps_the_stroke_footprint() {
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init session");
    let mut options = test_options();
    options.post_process = Some(PostProcess {
        blur_sigma: Some(6.0),
        extract_normal_map: false,
    });
    let blurred = session
        .render_stroke(None, options, test_path(), Some(3), None)
        .expect("render with blur");
    assert_eq!(blurred.width(), 64);
    assert!(blurred.pixels().iter().any(|byte| *byte != 0));
}

#[test]
fn tiny_pixel_ratio_still_yields_a_renderable_surface() {
    let mut session = RenderSession::create();
    if session.is_fallback() {
        return;
    }
    session
        .init(64, 64, Some(0.001))
        .expect("init with sub-pixel ratio");
    let snapshot = session
        .snapshot(Some(1))
        .expect("snapshot untouched layer")
        .expect("threaded session must return a snapshot");
    assert_eq!(snapshot.width(), 1);
    assert_eq!(snapshot.height(), 1);
    session.dispose();
}

#[test]
fn render_into_raster_target_fills_the_callers_bitmap() {
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init session");
    let mut target = Bitmap::new(1, 1).expect("create target");
    session
        .render_stroke_into(
            crate::StrokeTarget::Raster(&mut target),
            None,
            test_options(),
            test_path(),
            Some(5),
            None,
        )
        .expect("render into raster target");
    assert_eq!(target.width(), 64);
    assert!(target.pixels().iter().any(|byte| *byte != 0));
}

#[test]
fn render_into_gpu_target_uploads_the_result() {
    let Some(surface) = gpu::GpuSurface::create(64, 64) else {
        return;
    };
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init session");
    session
        .render_stroke_into(
            crate::StrokeTarget::Gpu(&surface),
            None,
            test_options(),
            test_path(),
            Some(5),
            None,
        )
        .expect("render into shader target");
    let uploaded = surface.read_backing_pixels().expect("read backing pixels");
    assert!(uploaded.pixels().iter().any(|byte| *byte != 0));
}

#[test]
fn metrics_count_rendered_strokes() {
    let mut session = RenderSession::local();
    session.init(64, 64, None).expect("init session");
    session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect("first stroke");
    session
        .render_stroke(None, test_options(), test_path(), None, None)
        .expect("second stroke");
    assert_eq!(session.metrics().strokes_rendered(), 2);
    assert!(session.metrics().average_round_trip_ms().is_some());
    assert!(session.metrics().hud_line().contains("strokes 2"));
}
