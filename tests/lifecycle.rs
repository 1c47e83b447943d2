// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use yolo_annotator::detection::FixedDetector;
use yolo_annotator::input::SyntheticSource;
use yolo_annotator::{
    Annotator, ControlError, Detector, EndReason, FrameReceiver, FrameSource, HandoffPolicy,
    LoadError, OpenError, PipelineConfig, PipelineEvent, PipelineState, PlaybackController,
    StyleMap,
};

/// 足够长的输入源, 测试期间不会自然结束
const ENDLESS: u64 = 1_000_000;

fn controller_with_counter(closes: Arc<AtomicUsize>) -> (PlaybackController, FrameReceiver) {
    let opener = move |_: &str| -> Result<Box<dyn FrameSource>, OpenError> {
        Ok(Box::new(
            SyntheticSource::new(ENDLESS)
                .with_read_delay(Duration::from_millis(1))
                .with_close_counter(closes.clone()),
        ))
    };
    let loader =
        |_: &str| -> Result<Box<dyn Detector>, LoadError> { Ok(Box::new(FixedDetector::empty())) };
    let config = PipelineConfig {
        handoff: HandoffPolicy::Lossless { capacity: 4 },
        pace_to_source: false,
        ..Default::default()
    };
    PlaybackController::with_backends(config, Annotator::new(StyleMap::default()), opener, loader)
}

fn next_frame_index(rx: &mut FrameReceiver) -> u64 {
    match rx.recv_timeout(Duration::from_secs(5)) {
        Some(PipelineEvent::Frame(frame)) => frame.index(),
        other => panic!("expected frame, got {:?}", other),
    }
}

/// 取完所有已交付的帧, 直到安静 `quiet` 时长
fn drain_frames(rx: &mut FrameReceiver, quiet: Duration) -> Vec<u64> {
    let mut indices = Vec::new();
    while let Some(event) = rx.recv_timeout(quiet) {
        match event {
            PipelineEvent::Frame(frame) => indices.push(frame.index()),
            PipelineEvent::StreamEnded(reason) => panic!("unexpected end: {:?}", reason),
        }
    }
    indices
}

#[test]
fn test_open_missing_locator() {
    let (controller, mut rx) =
        PlaybackController::new(PipelineConfig::default(), Annotator::new(StyleMap::default()));

    let err = controller
        .open("videos/definitely-missing.mp4", "stub")
        .unwrap_err();
    assert!(matches!(err, ControlError::Open(OpenError::NotFound(_))));
    assert_eq!(controller.state(), PipelineState::Stopped);
    assert!(!controller.has_worker());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_none());
}

#[test]
fn test_missing_model_keeps_stopped() {
    let (controller, _rx) =
        PlaybackController::new(PipelineConfig::default(), Annotator::new(StyleMap::default()));

    let err = controller
        .open("synthetic:5", "models/missing.onnx")
        .unwrap_err();
    assert!(matches!(err, ControlError::Load(LoadError::NotFound(_))));
    assert_eq!(controller.state(), PipelineState::Stopped);
    assert!(!controller.has_worker());
}

#[test]
fn test_stopped_rejects_commands() {
    let (controller, _rx) = controller_with_counter(Arc::default());
    assert!(matches!(controller.pause(), Err(ControlError::NotOpen)));
    assert!(matches!(controller.resume(), Err(ControlError::NotOpen)));
    assert!(matches!(controller.close(), Err(ControlError::NotOpen)));
    assert_eq!(controller.state(), PipelineState::Stopped);
}

#[test]
fn test_pause_then_close_releases_source() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (controller, mut rx) = controller_with_counter(closes.clone());

    controller.open("synthetic", "stub").unwrap();
    next_frame_index(&mut rx);

    controller.pause().unwrap();
    assert_eq!(controller.state(), PipelineState::Paused);
    // 暂停不释放输入源
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    controller.close().unwrap();
    assert_eq!(controller.state(), PipelineState::Stopped);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!controller.has_worker());

    // close 之后只剩结束通知
    let mut ended = None;
    while let Some(event) = rx.recv_timeout(Duration::from_millis(200)) {
        match event {
            PipelineEvent::StreamEnded(reason) => ended = Some(reason),
            PipelineEvent::Frame(_) => assert!(ended.is_none(), "frame after stream end"),
        }
    }
    assert_eq!(ended, Some(EndReason::Closed));
}

#[test]
fn test_close_twice() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (controller, _rx) = controller_with_counter(closes.clone());

    controller.open("synthetic", "stub").unwrap();
    controller.close().unwrap();
    assert!(matches!(controller.close(), Err(ControlError::NotOpen)));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_close() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (controller, _rx) = controller_with_counter(closes.clone());
    let controller = Arc::new(controller);
    controller.open("synthetic", "stub").unwrap();

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let controller = controller.clone();
            std::thread::spawn(move || controller.close().is_ok())
        })
        .collect();
    let succeeded = callers
        .into_iter()
        .map(|caller| caller.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(controller.state(), PipelineState::Stopped);
}

#[test]
fn test_pause_resume_keeps_order() {
    let (controller, mut rx) = controller_with_counter(Arc::default());
    controller.open("synthetic", "stub").unwrap();

    let mut indices: Vec<u64> = (0..5).map(|_| next_frame_index(&mut rx)).collect();

    controller.pause().unwrap();
    indices.extend(drain_frames(&mut rx, Duration::from_millis(200)));

    // 暂停期间没有新帧
    assert!(rx.recv_timeout(Duration::from_millis(150)).is_none());
    let paused_at = *indices.last().unwrap();

    controller.resume().unwrap();
    let resumed: Vec<u64> = (0..5).map(|_| next_frame_index(&mut rx)).collect();
    assert_eq!(resumed[0], paused_at + 1);
    indices.extend(resumed);

    let expected: Vec<u64> = (0..indices.len() as u64).collect();
    assert_eq!(indices, expected);

    controller.close().unwrap();
}

#[test]
fn test_reopen_after_close() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (controller, mut rx) = controller_with_counter(closes.clone());

    controller.open("synthetic", "stub").unwrap();
    next_frame_index(&mut rx);
    controller.close().unwrap();

    controller.open("synthetic", "stub").unwrap();
    assert_eq!(controller.session(), 2);

    // 旧会话的结束通知先于新会话的帧
    let mut saw_end = false;
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Some(PipelineEvent::StreamEnded(EndReason::Closed)) => saw_end = true,
            Some(PipelineEvent::Frame(frame)) if saw_end => {
                assert_eq!(frame.index(), 0);
                break;
            }
            Some(PipelineEvent::Frame(_)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    controller.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}
