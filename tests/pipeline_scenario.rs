use std::time::Duration;

use phone_sentinel::{
    AlertScheduler, AnnotationRenderer, BoundingBox, CaptureConfig, Detection,
    DetectionStateTracker, FireDecision, Frame, InferenceOutcome, ManualClock, Pipeline,
    RecordingAudioSink, ScriptedBackend, ScriptedResponse, StopCause, SyntheticSource,
    TrackerConfig,
};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 72;

fn stub_source(frames: u64) -> Box<SyntheticSource> {
    Box::new(
        SyntheticSource::new(CaptureConfig {
            source: format!("stub://desk?frames={}", frames),
            width: WIDTH,
            height: HEIGHT,
            target_fps: 0,
        })
        .expect("synthetic source"),
    )
}

fn tracker(skip: u32) -> DetectionStateTracker {
    DetectionStateTracker::new(TrackerConfig::new("cell phone", 0.5, skip).expect("tracker"))
}

fn phone_at(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Detection {
    Detection::new(
        "cell phone",
        confidence,
        BoundingBox::new(x1, y1, x2, y2).expect("bbox"),
    )
}

#[test]
fn phone_appears_then_leaves() {
    let phone_box = BoundingBox::new(10, 10, 50, 50).expect("bbox");
    let backend = ScriptedBackend::new([
        ScriptedResponse::Detections(vec![phone_at(10, 10, 50, 50, 0.9)]),
        ScriptedResponse::Detections(vec![
            Detection::new("cup", 0.95, phone_box),
            phone_at(60, 20, 80, 40, 0.3),
        ]),
    ]);
    let calls = backend.call_counter();
    let clock = ManualClock::new();
    let sink = RecordingAudioSink::new();

    let mut pipeline = Pipeline::new(
        stub_source(8),
        Box::new(backend),
        tracker(3),
        AlertScheduler::new(Duration::from_secs(11)),
    )
    .with_clock(Box::new(clock.clone()))
    .with_audio_sink(Box::new(sink.clone()));

    let mut reports = Vec::new();
    while let Some(report) = pipeline.step() {
        reports.push(report);
        // Frame 6 lands well past the cooldown of the frame-3 alert.
        clock.advance(Duration::from_secs(4));
    }
    assert_eq!(reports.len(), 8);
    assert_eq!(pipeline.stop_cause(), Some(&StopCause::SourceEnded));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    for report in &reports[..2] {
        assert_eq!(report.inference, InferenceOutcome::Skipped);
        assert!(!report.state.target_present);
        assert!(report.state.boxes.is_empty());
        assert_eq!(report.alert, Some(FireDecision::NoTarget));
    }

    let frame3 = &reports[2];
    assert_eq!(frame3.index, 3);
    assert_eq!(frame3.inference, InferenceOutcome::Ran);
    assert!(frame3.state.target_present);
    assert_eq!(frame3.state.boxes, vec![phone_box]);
    assert!(frame3.alert.is_some_and(|alert| alert.fired()));

    for report in &reports[3..5] {
        assert_eq!(report.inference, InferenceOutcome::Skipped);
        assert_eq!(report.state.boxes, vec![phone_box]);
        assert_eq!(report.alert, Some(FireDecision::SuppressedByCooldown));
    }

    for report in &reports[5..] {
        assert!(!report.state.target_present);
        assert!(report.state.boxes.is_empty());
        assert_eq!(report.alert, Some(FireDecision::NoTarget));
    }
    assert_eq!(reports[5].inference, InferenceOutcome::Ran);

    assert_eq!(sink.starts(), 1);
    assert_eq!(pipeline.scheduler().fired_count(), 1);
    assert_eq!(pipeline.stats().alerts_fired, 1);
    assert!(reports.iter().all(|report| report.part.is_some()));
}

#[test]
fn skipped_frames_render_the_last_inferred_boxes() {
    let backend = ScriptedBackend::new([ScriptedResponse::Detections(vec![phone_at(
        10, 10, 50, 50, 0.9,
    )])]);
    let mut pipeline = Pipeline::new(
        stub_source(5),
        Box::new(backend),
        tracker(3),
        AlertScheduler::default(),
    );

    let renderer = AnnotationRenderer::default();
    let plain = Frame::filled(WIDTH, HEIGHT, [0, 0, 0]).expect("frame");
    let mut rendered_states = Vec::new();
    while let Some(report) = pipeline.step() {
        rendered_states.push(report.state);
    }

    // Frames 4 and 5 reuse frame 3's state, so they draw the same outline.
    let frame3 = renderer.render(&plain, &rendered_states[2]);
    let frame5 = renderer.render(&plain, &rendered_states[4]);
    assert_eq!(frame3.as_raw(), frame5.as_raw());
    assert_eq!(frame5.get_pixel(10, 30).0, [255, 0, 0]);
    assert_eq!(frame5.get_pixel(50, 50).0, [255, 0, 0]);
    assert_eq!(frame5.get_pixel(30, 30).0, [0, 0, 0]);
}

#[test]
fn inference_error_leaves_state_bit_for_bit() {
    let backend = ScriptedBackend::new([
        ScriptedResponse::Detections(vec![phone_at(5, 5, 25, 25, 0.8)]),
        ScriptedResponse::Fail("onnx runtime error".to_string()),
        ScriptedResponse::Detections(Vec::new()),
    ]);
    let clock = ManualClock::new();
    let sink = RecordingAudioSink::new();
    let mut pipeline = Pipeline::new(
        stub_source(6),
        Box::new(backend),
        tracker(2),
        AlertScheduler::new(Duration::from_secs(1)),
    )
    .with_clock(Box::new(clock.clone()))
    .with_audio_sink(Box::new(sink.clone()));

    pipeline.step().expect("frame 1");
    let frame2 = pipeline.step().expect("frame 2");
    assert!(frame2.alert.is_some_and(|alert| alert.fired()));

    clock.advance(Duration::from_secs(30));
    let frame3 = pipeline.step().expect("frame 3");
    assert!(frame3.alert.is_some_and(|alert| alert.fired()));

    let state_before = pipeline.current_state().clone();
    let last_fired_before = pipeline.scheduler().last_fired_at();
    let fired_count_before = pipeline.scheduler().fired_count();

    // Past the cooldown, so only the failed inference keeps the alert quiet.
    clock.advance(Duration::from_secs(30));
    let frame4 = pipeline.step().expect("frame 4");
    assert_eq!(frame4.inference, InferenceOutcome::Failed);
    assert_eq!(pipeline.current_state(), &state_before);
    assert_eq!(pipeline.scheduler().last_fired_at(), last_fired_before);
    assert_eq!(pipeline.scheduler().fired_count(), fired_count_before);
    assert_eq!(sink.starts(), 2);

    // The loop keeps going: frame 6 runs inference again and clears the state.
    pipeline.step().expect("frame 5");
    let frame6 = pipeline.step().expect("frame 6");
    assert_eq!(frame6.inference, InferenceOutcome::Ran);
    assert!(pipeline.current_state().boxes.is_empty());
    assert_eq!(pipeline.stats().inference_failures, 1);
    assert_eq!(pipeline.stats().inference_runs, 2);
}

#[test]
fn continuous_presence_fires_once_per_cooldown_window() {
    let detections =
        (0..40).map(|_| ScriptedResponse::Detections(vec![phone_at(1, 1, 20, 20, 0.7)]));
    let clock = ManualClock::new();
    let sink = RecordingAudioSink::new();
    let mut pipeline = Pipeline::new(
        stub_source(40),
        Box::new(ScriptedBackend::new(detections)),
        tracker(1),
        AlertScheduler::new(Duration::from_secs(11)),
    )
    .with_clock(Box::new(clock.clone()))
    .with_audio_sink(Box::new(sink.clone()));

    let mut fired_on = Vec::new();
    while let Some(report) = pipeline.step() {
        if report.alert.is_some_and(|alert| alert.fired()) {
            fired_on.push(report.index);
        }
        clock.advance(Duration::from_secs(1));
    }

    // Frame n is seen at t = n - 1 seconds; a fire needs strictly more than 11 s.
    assert_eq!(fired_on, vec![1, 13, 25, 37]);
    assert_eq!(sink.starts(), 4);
}

#[test]
fn busy_audio_sink_still_counts_the_alert() {
    let sink = RecordingAudioSink::new();
    sink.set_playing(true);
    let backend = ScriptedBackend::new([ScriptedResponse::Detections(vec![phone_at(
        1, 1, 9, 9, 0.99,
    )])]);
    let mut pipeline = Pipeline::new(
        stub_source(1),
        Box::new(backend),
        tracker(1),
        AlertScheduler::default(),
    )
    .with_audio_sink(Box::new(sink.clone()));

    let report = pipeline.step().expect("frame 1");
    assert!(report.alert.is_some_and(|alert| alert.fired()));
    assert_eq!(sink.starts(), 0);
    assert!(pipeline.scheduler().last_fired_at().is_some());
}
