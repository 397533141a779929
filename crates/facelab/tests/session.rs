//! End-to-end tests of the session state machine over scripted
//! hardware and vision backends.

use facelab::{
    AnnotationTag, Backends, Config, Mode, SessionController, SessionError, SessionEvent, Summary,
};
use facelab_core::mock::{CannedTrainer, ScriptedDetector};
use facelab_core::{BoundingBox, DetectParams, GrayImage};
use facelab_hw::camera::ReadError;
use facelab_hw::{Frame, FrameSource};
use facelab_store::Gallery;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const FRAME_W: u32 = 32;
const FRAME_H: u32 = 24;

/// Serves uniform frames, then ends the stream. Tracks live handles so
/// tests can assert the worker released the device.
struct TestCamera {
    remaining: usize,
    delay: Duration,
    live: Arc<AtomicUsize>,
}

impl FrameSource for TestCamera {
    fn read_frame(&mut self) -> Result<Frame, ReadError> {
        if self.remaining == 0 {
            return Err(ReadError::EndOfStream);
        }
        self.remaining -= 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(Frame::from_raw(
            vec![100; (FRAME_W * FRAME_H * 3) as usize],
            FRAME_W,
            FRAME_H,
        )
        .unwrap())
    }
}

impl Drop for TestCamera {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct CameraCounters {
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

fn scripted_cameras(frames: usize, delay: Duration) -> (facelab::CameraFactory, CameraCounters) {
    let opened = Arc::new(AtomicUsize::new(0));
    let live = Arc::new(AtomicUsize::new(0));
    let counters = CameraCounters { opened: opened.clone(), live: live.clone() };
    let factory: facelab::CameraFactory = Arc::new(move |_index| {
        opened.fetch_add(1, Ordering::SeqCst);
        live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestCamera { remaining: frames, delay, live: live.clone() })
            as Box<dyn FrameSource>)
    });
    (factory, counters)
}

fn one_face_detectors() -> facelab::DetectorFactory {
    Arc::new(|| Ok(Box::new(ScriptedDetector::always(vec![BoundingBox::new(4, 4, 12, 12)]))))
}

fn test_config(root: &Path, ceiling: usize) -> Config {
    Config {
        camera_index: 0,
        data_dir: root.join("subjects"),
        model_path: root.join("model.json"),
        detector_model_path: root.join("det.onnx"),
        capture_ceiling: ceiling,
        working_width: FRAME_W,
        sample_size: 8,
        distance_threshold: 8000.0,
        mirror_preview: false,
        detect_params: DetectParams::default(),
    }
}

fn backends(cameras: facelab::CameraFactory) -> Backends {
    Backends {
        cameras,
        detectors: one_face_detectors(),
        trainer: Arc::new(CannedTrainer::constant(0, 10.0)),
    }
}

/// Pump events, finishing on the terminal one, until the controller
/// returns to idle. Returns everything observed.
async fn drive_to_idle(
    controller: &mut SessionController,
    events: &mut UnboundedReceiver<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed");
        let terminal = event.is_terminal();
        let idle = matches!(event, SessionEvent::ModeChanged(Mode::Idle));
        seen.push(event);
        if terminal {
            controller.finish();
        }
        if idle {
            break;
        }
    }
    seen
}

fn terminal_of(events: &[SessionEvent]) -> &SessionEvent {
    events.iter().find(|e| e.is_terminal()).expect("no terminal event")
}

#[tokio::test]
async fn test_capture_stops_at_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), 351);
    let (cameras, counters) = scripted_cameras(usize::MAX, Duration::ZERO);
    let (mut controller, mut events) = SessionController::new(config.clone(), backends(cameras));

    controller.start_capture("alice").unwrap();
    assert_eq!(controller.mode(), Mode::Capturing);

    let seen = drive_to_idle(&mut controller, &mut events).await;
    match terminal_of(&seen) {
        SessionEvent::Completed(Summary::Capture { subject, samples }) => {
            assert_eq!(subject, "alice");
            assert_eq!(*samples, 351);
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    let gallery = Gallery::new(config.data_dir);
    assert_eq!(gallery.sample_count("alice").unwrap(), 351);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0, "camera not released");
}

#[tokio::test]
async fn test_capture_persists_min_of_faces_and_ceiling() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), 351);
    // Only five frames before the stream ends, one face each.
    let (cameras, _) = scripted_cameras(5, Duration::ZERO);
    let (mut controller, mut events) = SessionController::new(config.clone(), backends(cameras));

    controller.start_capture("bob").unwrap();
    let seen = drive_to_idle(&mut controller, &mut events).await;

    match terminal_of(&seen) {
        SessionEvent::Completed(Summary::Capture { samples, .. }) => assert_eq!(*samples, 5),
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert_eq!(Gallery::new(config.data_dir).sample_count("bob").unwrap(), 5);
}

#[test]
fn test_capture_rejects_blank_names() {
    let tmp = tempfile::tempdir().unwrap();
    let (cameras, counters) = scripted_cameras(usize::MAX, Duration::ZERO);
    let (mut controller, _events) =
        SessionController::new(test_config(tmp.path(), 351), backends(cameras));

    for bad in ["", "   ", "\t", "a/b", "../escape"] {
        match controller.start_capture(bad) {
            Err(SessionError::Validation(_)) => {}
            other => panic!("expected validation error for {bad:?}, got {other:?}"),
        }
    }
    assert_eq!(controller.mode(), Mode::Idle);
    assert_eq!(counters.opened.load(Ordering::SeqCst), 0, "camera must not be touched");
}

#[test]
fn test_training_requires_enrolled_subjects() {
    let tmp = tempfile::tempdir().unwrap();
    let (cameras, _) = scripted_cameras(0, Duration::ZERO);
    let (mut controller, _events) =
        SessionController::new(test_config(tmp.path(), 351), backends(cameras));

    match controller.start_training() {
        Err(SessionError::Precondition(_)) => {}
        other => panic!("expected precondition error, got {other:?}"),
    }
    assert_eq!(controller.mode(), Mode::Idle);
}

#[test]
fn test_recognize_requires_trained_model() {
    let tmp = tempfile::tempdir().unwrap();
    let (cameras, counters) = scripted_cameras(usize::MAX, Duration::ZERO);
    let (mut controller, _events) =
        SessionController::new(test_config(tmp.path(), 351), backends(cameras));

    match controller.start_recognize() {
        Err(SessionError::Precondition(_)) => {}
        other => panic!("expected precondition error, got {other:?}"),
    }
    assert_eq!(controller.mode(), Mode::Idle);
    assert_eq!(counters.opened.load(Ordering::SeqCst), 0, "camera must not be touched");
}

#[tokio::test]
async fn test_start_rejected_while_active_and_during_teardown() {
    let tmp = tempfile::tempdir().unwrap();
    let (cameras, _) = scripted_cameras(usize::MAX, Duration::from_millis(1));
    let (mut controller, mut events) =
        SessionController::new(test_config(tmp.path(), 351), backends(cameras));

    controller.start_detect().unwrap();
    assert!(matches!(controller.start_capture("alice"), Err(SessionError::Busy)));
    assert!(matches!(controller.start_training(), Err(SessionError::Busy)));

    // After stop the mode stays non-idle until the terminal event is
    // acknowledged, so starts are still rejected.
    controller.stop();
    assert!(matches!(controller.start_detect(), Err(SessionError::Busy)));

    drive_to_idle(&mut controller, &mut events).await;
    assert_eq!(controller.mode(), Mode::Idle);
}

#[tokio::test]
async fn test_stop_releases_camera_and_allows_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let (cameras, counters) = scripted_cameras(usize::MAX, Duration::from_millis(1));
    let (mut controller, mut events) =
        SessionController::new(test_config(tmp.path(), 351), backends(cameras));

    controller.start_detect().unwrap();
    controller.stop();
    let seen = drive_to_idle(&mut controller, &mut events).await;
    assert!(matches!(terminal_of(&seen), SessionEvent::Completed(Summary::Watch { .. })));
    assert_eq!(counters.live.load(Ordering::SeqCst), 0, "camera not released");

    // Restart proves the first handle was dropped before the second open.
    controller.start_detect().unwrap();
    controller.stop();
    drive_to_idle(&mut controller, &mut events).await;
    assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_during_capture_persists_partial_set() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), 351);
    let (cameras, counters) = scripted_cameras(usize::MAX, Duration::from_millis(1));
    let (mut controller, mut events) = SessionController::new(config.clone(), backends(cameras));

    controller.start_capture("alice").unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    controller.stop();
    let seen = drive_to_idle(&mut controller, &mut events).await;

    let samples = match terminal_of(&seen) {
        SessionEvent::Completed(Summary::Capture { samples, .. }) => *samples,
        other => panic!("unexpected terminal event: {other:?}"),
    };
    assert!(samples < 351, "stop was ignored and capture ran to the ceiling");
    // Nothing was written past the stop point.
    assert_eq!(Gallery::new(config.data_dir).sample_count("alice").unwrap(), samples);
    assert_eq!(controller.mode(), Mode::Idle);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0, "camera not released");
}

#[tokio::test]
async fn test_recognition_resolves_labels_from_model_file() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), 351);

    // Enroll two subjects and train; the artifact records the sorted
    // subject list, so label 1 must resolve to "bob".
    let gallery = Gallery::new(config.data_dir.clone());
    let sample = GrayImage::from_raw(vec![60; 64], 8, 8).unwrap();
    for name in ["bob", "alice"] {
        gallery.create_subject(name).unwrap();
        gallery.save_sample(name, 0, &sample).unwrap();
    }

    let (cameras, _) = scripted_cameras(2, Duration::ZERO);
    let backends = Backends {
        cameras,
        detectors: one_face_detectors(),
        trainer: Arc::new(CannedTrainer::constant(1, 10.0)),
    };
    let (mut controller, mut events) = SessionController::new(config, backends);

    controller.start_training().unwrap();
    let seen = drive_to_idle(&mut controller, &mut events).await;
    match terminal_of(&seen) {
        SessionEvent::Completed(Summary::Training { trained, subjects, .. }) => {
            assert!(trained);
            assert_eq!(*subjects, 2);
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    let file = facelab_store::load_model(&tmp.path().join("model.json")).unwrap();
    assert_eq!(file.labels, vec!["alice", "bob"]);

    controller.start_recognize().unwrap();
    let seen = drive_to_idle(&mut controller, &mut events).await;
    let annotation = seen
        .iter()
        .find_map(|e| match e {
            SessionEvent::FrameReady(f) => f.annotations.first().cloned(),
            _ => None,
        })
        .expect("no annotated frame");
    assert_eq!(annotation.tag, AnnotationTag::Match);
    assert_eq!(annotation.label.as_deref(), Some("bob"));
    assert_eq!(annotation.distance, Some(10.0));
}

#[tokio::test]
async fn test_events_arrive_in_order_on_one_channel() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), 3);
    let (cameras, _) = scripted_cameras(usize::MAX, Duration::ZERO);
    let (mut controller, mut events) = SessionController::new(config, backends(cameras));

    controller.start_capture("carol").unwrap();
    let seen = drive_to_idle(&mut controller, &mut events).await;

    // Mode change first, terminal before the final idle transition.
    assert!(matches!(seen.first(), Some(SessionEvent::ModeChanged(Mode::Capturing))));
    assert!(matches!(seen.last(), Some(SessionEvent::ModeChanged(Mode::Idle))));
    let terminal_at = seen.iter().position(SessionEvent::is_terminal).unwrap();
    assert_eq!(terminal_at, seen.len() - 2);

    // Progress is monotone and ends at the ceiling.
    let fractions: Vec<f32> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.last(), Some(&1.0));
}
