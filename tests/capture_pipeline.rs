use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{Rgb, RgbImage};

use asl_capture::classify::ClassifierLoader;
use asl_capture::ingest::{FileConfig, SourceStats};
use asl_capture::sink::{ChannelDisplay, DirectoryStore, ImageEncoding, ResultBoard};
use asl_capture::{
    decide, encode, CaptureService, Classifier, ClassifierSession, FileSource, FrameNormalizer,
    FrameOutcome, FrameSource, InputTensor, Notice, Permissions, Pipeline, PixelFormat,
    ProbabilityVector, RateGate, RawFrame, SessionPolicy, SyntheticSource, TriggerMode, UiEvent,
    LABEL_COUNT,
};

/// Scores "B" at 0.7 and counts how often it ran.
struct LetterB {
    calls: Arc<AtomicUsize>,
}

impl Classifier for LetterB {
    fn name(&self) -> &'static str {
        "letter_b"
    }

    fn classify(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        assert_eq!(input.len(), 12288);
        assert!(input.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scores = vec![0.0; LABEL_COUNT];
        scores[0] = 0.1;
        scores[1] = 0.7;
        scores[2] = 0.05;
        ProbabilityVector::new(scores)
    }
}

fn letter_b_session(calls: &Arc<AtomicUsize>, policy: SessionPolicy) -> ClassifierSession {
    let calls = Arc::clone(calls);
    let loader: ClassifierLoader = Arc::new(move || {
        Ok(Box::new(LetterB {
            calls: Arc::clone(&calls),
        }) as Box<dyn Classifier>)
    });
    ClassifierSession::new("letter_b", loader, policy)
}

fn write_still(dir: &std::path::Path, name: &str, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    img.save(dir.join(name)).unwrap();
}

fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn stills_flow_from_source_to_display_and_disk() {
    let stills = tempfile::tempdir().unwrap();
    write_still(stills.path(), "a.png", 120, 80);
    write_still(stills.path(), "b.png", 60, 90);
    let pictures = tempfile::tempdir().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::new(
        FrameNormalizer::default(),
        letter_b_session(&calls, SessionPolicy::PerInference),
        Box::new(ChannelDisplay::new(tx.clone())),
    )
    .with_store(Box::new(DirectoryStore::new(
        pictures.path(),
        "ASL_Images",
        ImageEncoding::Png,
    )));

    let mut source = FileSource::new(FileConfig {
        path: stills.path().display().to_string(),
        target_fps: 200,
        rotation_degrees: 90,
        loop_playback: true,
    })
    .unwrap();
    assert_eq!(source.files().len(), 2);
    source.connect().unwrap();

    let mut service = CaptureService::spawn(
        Box::new(source),
        pipeline,
        RateGate::new(TriggerMode::Throttled(Duration::from_millis(50))),
        Permissions::default(),
        Box::new(ChannelDisplay::new(tx)),
    )
    .unwrap();

    assert!(service.start().unwrap());
    assert!(wait_for(|| service.stats().saved >= 2));
    assert!(service.stop());
    service.shutdown();

    let stats = service.stats();
    assert!(stats.classified >= 2);
    assert_eq!(stats.decode_failures, 0);
    assert!(stats.denied > 0, "throttling should deny frames: {}", stats);
    assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.classified);

    let saved: Vec<_> = std::fs::read_dir(pictures.path().join("ASL_Images"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(saved.len() as u64, stats.saved);
    for path in &saved {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("asl_image_") && name.ends_with(".png"), "{}", name);
        assert_eq!(image::open(path).unwrap().to_rgb8().dimensions(), (64, 64));
    }

    // Replay what the UI thread would render.
    let mut board = ResultBoard::new();
    let mut toasts = Vec::new();
    let mut shown = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let UiEvent::Prediction(_) = &event {
            board.apply(&event);
            shown.push(board.text().to_string());
        } else if let Some(toast) = board.apply(&event) {
            toasts.push(toast);
        }
    }
    assert!(shown.iter().all(|text| text == "Prediction: B (70.00%)"));
    assert_eq!(toasts.first().map(String::as_str), Some("Image capturing started"));
    assert!(toasts.iter().any(|t| t.starts_with("Image saved: ")));
    assert!(toasts.iter().any(|t| t == "Image capturing stopped"));
}

#[test]
fn synthetic_source_feeds_periodic_capture() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new(
        FrameNormalizer::default(),
        letter_b_session(&calls, SessionPolicy::Pooled),
        Box::new(asl_capture::LogDisplay),
    );
    let source = SyntheticSource::new(asl_capture::ingest::SyntheticConfig {
        url: "stub://test".to_string(),
        target_fps: 100,
        width: 64,
        height: 48,
        rotation_degrees: 0,
        frame_limit: None,
    });

    let mut service = CaptureService::spawn(
        Box::new(source),
        pipeline,
        RateGate::new(TriggerMode::Periodic(Duration::from_secs(3600))),
        Permissions::default(),
        Box::new(asl_capture::LogDisplay),
    )
    .unwrap();

    // Periodic capture fires on start, then waits for the next interval.
    service.start().unwrap();
    assert!(wait_for(|| service.stats().classified == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(service.stats().classified, 1);

    // Restarting resets the schedule.
    service.stop();
    service.start().unwrap();
    assert!(wait_for(|| service.stats().classified == 2));
    service.shutdown();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Every third frame is a truncated JPEG.
struct FlakySource {
    produced: u64,
}

impl FrameSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        std::thread::sleep(Duration::from_millis(5));
        self.produced += 1;
        let frame = if self.produced % 3 == 0 {
            RawFrame::new(vec![0xFF, 0xD8, 0x00], 32, 32, PixelFormat::Jpeg, 0)?
        } else {
            RawFrame::new(vec![200; 32 * 32 * 4], 32, 32, PixelFormat::Rgba8888, 180)?
        };
        Ok(Some(frame.with_sequence(self.produced)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            source: "flaky".to_string(),
        }
    }
}

#[test]
fn malformed_frame_is_dropped_and_capture_continues() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let pipeline = Pipeline::new(
        FrameNormalizer::default(),
        letter_b_session(&calls, SessionPolicy::PerInference),
        Box::new(ChannelDisplay::new(tx.clone())),
    );
    let mut service = CaptureService::spawn(
        Box::new(FlakySource { produced: 0 }),
        pipeline,
        RateGate::new(TriggerMode::Throttled(Duration::ZERO)),
        Permissions::default(),
        Box::new(ChannelDisplay::new(tx)),
    )
    .unwrap();
    service.start().unwrap();
    assert!(wait_for(|| {
        let stats = service.stats();
        stats.classified >= 3 && stats.decode_failures >= 2
    }));
    service.shutdown();

    let stats = service.stats();
    assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.classified);
    assert_eq!(stats.inference_failures, 0);
    // Decode failures never produce a notice.
    let notices: Vec<Notice> = rx
        .try_iter()
        .filter_map(|event| match event {
            UiEvent::Notice(notice) => Some(notice),
            _ => None,
        })
        .collect();
    assert_eq!(notices, vec![Notice::CaptureStarted]);
}

#[test]
fn blank_frames_encode_to_extremes() {
    for (value, expected) in [(0u8, 0.0f32), (255, 1.0)] {
        let frame = RawFrame::new(vec![value; 100 * 50 * 3], 100, 50, PixelFormat::Rgb24, 0)
            .unwrap();
        let normalized = FrameNormalizer::default().normalize(&frame).unwrap();
        let tensor = encode(&normalized);
        assert_eq!(tensor.len(), 12288);
        assert!(tensor.as_slice().iter().all(|v| *v == expected));
    }
}

#[test]
fn one_frame_through_the_pipeline_by_hand() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut session = letter_b_session(&calls, SessionPolicy::PerInference);
    let frame = RawFrame::new(vec![10; 64 * 64 * 3], 64, 64, PixelFormat::Rgb24, 0).unwrap();
    let tensor = encode(&FrameNormalizer::default().normalize(&frame).unwrap());
    let prediction = decide(&session.infer(&tensor).unwrap());
    assert_eq!(prediction.label, "B");
    assert!((prediction.confidence - 0.7).abs() < f32::EPSILON);

    let mut pipeline = Pipeline::new(
        FrameNormalizer::default(),
        session,
        Box::new(asl_capture::LogDisplay),
    );
    match pipeline.process(frame) {
        FrameOutcome::Processed { prediction, .. } => {
            assert_eq!(prediction.map(|p| p.label), Some("B"))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
