mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use common::{
    detector, single_shot, switch, wait_for, RecordingSink, ScriptedSource, FRAME_SIZE,
};
use occupancy_counter::control::Indicator;
use occupancy_counter::{
    Aggregator, ControlState, ControlSwitch, Frame, FrameSource, Pipeline, TriggerMode,
};

const SCRIPT: [u32; 15] = [1, 2, 3, 4, 5, 1, 2, 3, 4, 5, 1, 2, 3, 4, 5];

#[test]
fn fifteen_frames_make_three_samples() {
    let sink = RecordingSink::default();
    let switch = switch();
    switch.press().unwrap();

    let pipeline = Pipeline::new(
        detector(),
        ScriptedSource::factory(SCRIPT.to_vec()),
        Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
        Box::new(sink.clone()),
        switch,
        None,
        single_shot(),
    );
    let handle = pipeline.spawn().unwrap();
    let stats = wait_for(|| handle.stats(), |s| s.frames == 15 && s.capture_errors > 0);
    assert_eq!(handle.aggregator().pending().unwrap(), 0);
    handle.stop().unwrap();

    assert_eq!(stats.frames, 15);
    assert_eq!(stats.samples, 3);
    assert_eq!(stats.uploads_ok, 3);
    assert_eq!(stats.detect_errors, 0);

    let samples = sink.samples.lock().unwrap();
    assert_eq!(samples.len(), 3);
    for sample in samples.iter() {
        assert_eq!(sample.counts, vec![1, 2, 3, 4, 5]);
        assert_eq!(sample.statistic, 3);
    }
}

#[test]
fn stopped_switch_holds_capture_until_pressed() {
    let sink = RecordingSink::default();
    let switch = switch();
    let pipeline = Pipeline::new(
        detector(),
        ScriptedSource::factory(vec![2; 5]),
        Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
        Box::new(sink.clone()),
        switch.clone(),
        None,
        single_shot(),
    );
    let handle = pipeline.spawn().unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(handle.stats().frames, 0);
    assert_eq!(switch.state().unwrap(), ControlState::Stopped);

    handle.switch().press().unwrap();
    let stats = wait_for(|| handle.stats(), |s| s.samples == 1);
    assert_eq!(stats.frames, 5);

    // pausing again stops consumption of further frames
    handle.switch().press().unwrap();
    handle.stop().unwrap();
    assert_eq!(sink.samples.lock().unwrap()[0].statistic, 2);
}

#[test]
fn timer_trigger_reports_from_its_own_thread() {
    let sink = RecordingSink::default();
    let switch = switch();
    switch.press().unwrap();

    let mut settings = single_shot();
    settings.capture_interval = Duration::from_millis(5);
    let pipeline = Pipeline::new(
        detector(),
        ScriptedSource::factory(vec![3; 200]),
        Aggregator::new(2, TriggerMode::OnTimer).unwrap(),
        Box::new(sink.clone()),
        switch,
        None,
        settings,
    );
    let handle = pipeline.spawn().unwrap();
    let stats = wait_for(|| handle.stats(), |s| s.samples >= 2);
    handle.stop().unwrap();

    assert!(stats.samples >= 2);
    for sample in sink.samples.lock().unwrap().iter() {
        assert_eq!(sample.counts, vec![3, 3]);
        assert_eq!(sample.statistic, 3);
    }
}

#[test]
fn source_open_failure_is_fatal() {
    let failing: occupancy_counter::ingest::SourceFactory =
        Box::new(|| Err(anyhow::anyhow!("camera /dev/video9 unavailable")));
    let pipeline = Pipeline::new(
        detector(),
        failing,
        Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
        Box::new(RecordingSink::default()),
        switch(),
        None,
        single_shot(),
    );
    let err = pipeline.spawn().err().expect("spawn fails");
    assert!(err.to_string().contains("/dev/video9"));
}

#[test]
fn stub_camera_runs_continuously_with_preview() {
    let dir = tempfile::tempdir().unwrap();
    let preview = dir.path().join("preview.jpg");

    let mut cfg = occupancy_counter::CounterConfig::default();
    cfg.watch = true;
    cfg.preview_path = preview.clone();
    cfg.camera.device = "stub://bench".to_string();
    cfg.camera.width = 64;
    cfg.camera.height = 48;
    cfg.camera.target_fps = 0;
    cfg.camera.warm_up = Duration::ZERO;
    cfg.detector.model_path = "stub://".into();
    cfg.detector.labels_path = dir.path().join("labels.txt");
    cfg.detector.input_width = 32;
    cfg.detector.input_height = 32;
    cfg.aggregation.collection_limit = 3;
    cfg.gpio.button_pin = None;
    cfg.gpio.led_pin = None;

    let pipeline = Pipeline::from_config(&cfg).unwrap();
    pipeline.switch().press().unwrap();
    let handle = pipeline.spawn().unwrap();
    let stats = wait_for(|| handle.stats(), |s| s.frames >= 5);
    handle.stop().unwrap();

    assert!(stats.frames >= 5);
    assert!(preview.exists());
}

#[derive(Clone, Default)]
struct RecordingIndicator {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl Indicator for RecordingIndicator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn set(&mut self, on: bool) -> Result<()> {
        self.levels.lock().unwrap().push(on);
        Ok(())
    }
}

fn running_pipeline(indicator: RecordingIndicator) -> Pipeline {
    let switch = Arc::new(ControlSwitch::new(Box::new(indicator)).unwrap());
    switch.press().unwrap();
    Pipeline::new(
        detector(),
        ScriptedSource::factory(vec![1; 50]),
        Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
        Box::new(RecordingSink::default()),
        switch,
        None,
        single_shot(),
    )
}

#[test]
fn stop_turns_indicator_off() {
    let indicator = RecordingIndicator::default();
    let levels = indicator.levels.clone();
    let handle = running_pipeline(indicator).spawn().unwrap();
    wait_for(|| handle.stats(), |s| s.frames > 0);
    assert_eq!(levels.lock().unwrap().last(), Some(&true));

    handle.stop().unwrap();
    assert_eq!(levels.lock().unwrap().last(), Some(&false));
}

#[test]
fn dropping_handle_turns_indicator_off() {
    let indicator = RecordingIndicator::default();
    let levels = indicator.levels.clone();
    let handle = running_pipeline(indicator).spawn().unwrap();
    wait_for(|| handle.stats(), |s| s.frames > 0);
    assert_eq!(levels.lock().unwrap().last(), Some(&true));

    drop(handle);
    assert_eq!(levels.lock().unwrap().last(), Some(&false));
}

/// Hands out frames queued before the pipeline resumed, then live frames.
struct QueuedThenLiveSource {
    queued: VecDeque<Frame>,
    live_left: u32,
    captured: u64,
}

impl FrameSource for QueuedThenLiveSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.captured += 1;
        if let Some(frame) = self.queued.pop_front() {
            return Ok(frame);
        }
        if self.live_left == 0 {
            return Err(anyhow!("script exhausted"));
        }
        self.live_left -= 1;
        let pixels = vec![1u8; (FRAME_SIZE * FRAME_SIZE * 3) as usize];
        Frame::new(pixels, FRAME_SIZE, FRAME_SIZE, self.captured)
    }

    fn frames_captured(&self) -> u64 {
        self.captured
    }

    fn describe(&self) -> String {
        "queued-then-live".to_string()
    }
}

#[test]
fn frames_queued_while_paused_are_not_counted() {
    let pixels = vec![9u8; (FRAME_SIZE * FRAME_SIZE * 3) as usize];
    let queued: VecDeque<Frame> = (1..=3)
        .map(|seq| Frame::new(pixels.clone(), FRAME_SIZE, FRAME_SIZE, seq).unwrap())
        .collect();
    let factory: occupancy_counter::ingest::SourceFactory = Box::new(move || {
        Ok(Box::new(QueuedThenLiveSource {
            queued,
            live_left: 5,
            captured: 0,
        }) as Box<dyn FrameSource>)
    });

    let sink = RecordingSink::default();
    let switch = switch();
    let pipeline = Pipeline::new(
        detector(),
        factory,
        Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
        Box::new(sink.clone()),
        switch.clone(),
        None,
        single_shot(),
    );
    let handle = pipeline.spawn().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    switch.press().unwrap();

    let stats = wait_for(|| handle.stats(), |s| s.samples == 1);
    handle.stop().unwrap();

    assert_eq!(stats.stale_frames, 3);
    assert_eq!(stats.frames, 5);
    let samples = sink.samples.lock().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].counts, vec![1; 5]);
}
