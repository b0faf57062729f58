//! Composition root: camera → detector → aggregation window → upload.
//!
//! A running pipeline is a small fixed set of threads sharing one stop flag:
//! - `capture`: owns the frame source and the detector. Each cycle waits for
//!   the switch to be RUNNING, grabs a frame, counts persons and feeds the
//!   aggregation window. In push-full mode it also uploads the sample a full
//!   window produces.
//! - `report` (timer trigger only): on a fixed cadence, moves the latest count
//!   into the window and uploads any sample that falls out.
//! - `button` (when a button is configured): forwards presses to the switch.
//!
//! Every loop checks the stop flag at least once per iteration, so
//! `PipelineHandle::stop` returns within one capture cycle (plus any upload
//! already in flight, bounded by the upload timeout).

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::aggregate::{Aggregator, Sample, TriggerMode};
use crate::config::CounterConfig;
use crate::control::{self, ButtonInput, ControlSwitch};
use crate::detect::{self, Detector};
use crate::frame;
use crate::ingest::{self, CaptureMode, ContinuousCapture, FrameSource, SourceFactory};
use crate::transport::{self, SampleSink};

const STATE_POLL: Duration = Duration::from_millis(200);
const SLEEP_SLICE: Duration = Duration::from_millis(50);
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const STREAM_QUEUE_DEPTH: usize = 2;

/// Loop cadence and output options.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub capture_mode: CaptureMode,
    /// Pause after each capture cycle.
    pub capture_interval: Duration,
    /// Timer-trigger cadence; ignored for push-full aggregation.
    pub report_interval: Duration,
    /// Annotated JPEG of the latest frame; `None` disables the preview.
    pub preview_path: Option<PathBuf>,
}

impl PipelineSettings {
    /// Watch mode streams continuously, paces by the device and writes a preview.
    pub fn from_config(cfg: &CounterConfig) -> Self {
        if cfg.watch {
            Self {
                capture_mode: CaptureMode::Continuous,
                capture_interval: Duration::ZERO,
                report_interval: cfg.aggregation.report_interval,
                preview_path: Some(cfg.preview_path.clone()),
            }
        } else {
            Self {
                capture_mode: CaptureMode::SingleShot,
                capture_interval: cfg.capture_interval,
                report_interval: cfg.aggregation.report_interval,
                preview_path: None,
            }
        }
    }
}

/// Running counters, updated by the pipeline threads.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames: AtomicU64,
    capture_errors: AtomicU64,
    detect_errors: AtomicU64,
    /// Frames captured before the latest resume and skipped.
    stale_frames: AtomicU64,
    samples: AtomicU64,
    uploads_ok: AtomicU64,
    uploads_failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub capture_errors: u64,
    pub detect_errors: u64,
    pub stale_frames: u64,
    pub samples: u64,
    pub uploads_ok: u64,
    pub uploads_failed: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            detect_errors: self.detect_errors.load(Ordering::Relaxed),
            stale_frames: self.stale_frames.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            uploads_ok: self.uploads_ok.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Assembled but not yet running pipeline.
pub struct Pipeline {
    detector: Detector,
    source: SourceFactory,
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn SampleSink>,
    switch: Arc<ControlSwitch>,
    button: Option<Box<dyn ButtonInput>>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        detector: Detector,
        source: SourceFactory,
        aggregator: Aggregator,
        sink: Box<dyn SampleSink>,
        switch: Arc<ControlSwitch>,
        button: Option<Box<dyn ButtonInput>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            detector,
            source,
            aggregator: Arc::new(aggregator),
            sink: Arc::from(sink),
            switch,
            button,
            settings,
        }
    }

    /// Build every component from configuration.
    ///
    /// Model, labels, GPIO and endpoint problems fail here; the camera is
    /// opened (and may fail) in `spawn`.
    pub fn from_config(cfg: &CounterConfig) -> Result<Self> {
        let detector = detect::detector_from_settings(&cfg.detector)?;
        let aggregator = Aggregator::new(cfg.aggregation.collection_limit, cfg.trigger_mode())?;
        let sink = transport::sink_from_settings(&cfg.upload)?;
        let indicator = control::indicator_from_settings(&cfg.gpio)?;
        let button = control::button_from_settings(&cfg.gpio)?;
        let switch = Arc::new(ControlSwitch::new(indicator)?);
        Ok(Self::new(
            detector,
            ingest::camera_factory(cfg.camera.clone()),
            aggregator,
            sink,
            switch,
            button,
            PipelineSettings::from_config(cfg),
        ))
    }

    pub fn switch(&self) -> Arc<ControlSwitch> {
        self.switch.clone()
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        self.aggregator.clone()
    }

    /// Open the frame source on the capture thread and start every loop.
    ///
    /// Returns once the source is open; a source that cannot be opened is
    /// returned as an error and no thread is left running.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let Pipeline {
            detector,
            source,
            aggregator,
            sink,
            switch,
            button,
            settings,
        } = self;

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PipelineStats::default());
        let mut handle = PipelineHandle {
            stop: stop.clone(),
            stats: stats.clone(),
            switch: switch.clone(),
            aggregator: aggregator.clone(),
            joins: Vec::new(),
        };

        let capture_mode = settings.capture_mode;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let capture = CaptureLoop {
            detector,
            aggregator: aggregator.clone(),
            sink: sink.clone(),
            switch: switch.clone(),
            stats: stats.clone(),
            stop: stop.clone(),
            settings: settings.clone(),
        };
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut source = match open_source(source, capture_mode) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(source.describe()));
                        source
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                capture.run(source.as_mut());
                log::info!(
                    "capture stopped after {} frames; releasing {}",
                    source.frames_captured(),
                    source.describe()
                );
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited during start-up"));
        match ready.and_then(|r| r) {
            Ok(description) => {
                handle.joins.push(("capture", join));
                log::info!(
                    "pipeline: capturing from {} ({:?}, window {}, trigger {:?})",
                    description,
                    capture_mode,
                    aggregator.collection_limit(),
                    aggregator.mode()
                );
            }
            Err(err) => {
                let _ = join.join();
                return Err(err);
            }
        }

        if aggregator.mode() == TriggerMode::OnTimer {
            let report = ReportLoop {
                aggregator,
                sink,
                stats,
                stop: stop.clone(),
                interval: settings.report_interval,
            };
            let join = std::thread::Builder::new()
                .name("report".to_string())
                .spawn(move || report.run());
            match join {
                Ok(join) => handle.joins.push(("report", join)),
                Err(err) => {
                    handle.shutdown();
                    return Err(err.into());
                }
            }
        }

        if let Some(button) = button {
            match control::spawn_button_listener(button, switch, stop) {
                Ok(join) => handle.joins.push(("button", join)),
                Err(err) => {
                    handle.shutdown();
                    return Err(err);
                }
            }
        }

        Ok(handle)
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    switch: Arc<ControlSwitch>,
    aggregator: Arc<Aggregator>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn switch(&self) -> &Arc<ControlSwitch> {
        &self.switch
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Signal every loop to exit, join them, and turn the indicator off.
    pub fn stop(mut self) -> Result<()> {
        let panicked = self.shutdown();
        if let Some(name) = panicked {
            return Err(anyhow!("{} thread panicked", name));
        }
        self.switch.release_indicator()
    }

    fn shutdown(&mut self) -> Option<&'static str> {
        self.stop.store(true, Ordering::SeqCst);
        let mut panicked = None;
        for (name, join) in self.joins.drain(..) {
            if join.join().is_err() {
                log::error!("{} thread panicked", name);
                panicked = Some(name);
            }
        }
        panicked
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if !self.joins.is_empty() {
            self.shutdown();
            if let Err(err) = self.switch.release_indicator() {
                log::warn!("indicator not released: {:#}", err);
            }
        }
    }
}

fn open_source(factory: SourceFactory, mode: CaptureMode) -> Result<Box<dyn FrameSource>> {
    match mode {
        CaptureMode::SingleShot => factory(),
        CaptureMode::Continuous => Ok(Box::new(ContinuousCapture::spawn(
            factory,
            STREAM_QUEUE_DEPTH,
        )?)),
    }
}

fn deliver(sink: &dyn SampleSink, sample: &Sample, stats: &PipelineStats) {
    PipelineStats::bump(&stats.samples);
    log::info!(
        "sample ready: statistic={} counts={:?}",
        sample.statistic,
        sample.counts
    );
    if sink.send(sample) {
        PipelineStats::bump(&stats.uploads_ok);
    } else {
        PipelineStats::bump(&stats.uploads_failed);
    }
}

/// Sleep for `duration`, waking early when `stop` is set. Returns whether stopped.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

struct CaptureLoop {
    detector: Detector,
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn SampleSink>,
    switch: Arc<ControlSwitch>,
    stats: Arc<PipelineStats>,
    stop: Arc<AtomicBool>,
    settings: PipelineSettings,
}

impl CaptureLoop {
    fn run(mut self, source: &mut dyn FrameSource) {
        let mut last_health = Instant::now();
        let mut running = false;
        // Frames captured before this instant predate the resume.
        let mut resumed_at: Option<Instant> = None;
        while !self.stop.load(Ordering::SeqCst) {
            match self.switch.wait_until_running(STATE_POLL) {
                Ok(true) => {
                    if !running {
                        running = true;
                        resumed_at = Some(Instant::now());
                    }
                }
                Ok(false) => {
                    running = false;
                    continue;
                }
                Err(err) => {
                    log::error!("capture: {:#}", err);
                    break;
                }
            }

            let pause = if self.cycle(source, &mut resumed_at) {
                self.settings.capture_interval
            } else {
                CAPTURE_RETRY_DELAY.max(self.settings.capture_interval)
            };
            if !pause.is_zero() && sleep_unless_stopped(pause, &self.stop) {
                break;
            }

            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.stats.snapshot();
                let state = self
                    .switch
                    .state()
                    .map(|s| format!("{:?}", s))
                    .unwrap_or_else(|_| "unknown".to_string());
                log::info!(
                    "health: state={} source={} frames={} capture_errors={} detect_errors={} samples={} uploaded={} dropped={}",
                    state,
                    if source.is_healthy() { "ok" } else { "degraded" },
                    stats.frames,
                    stats.capture_errors,
                    stats.detect_errors,
                    stats.samples,
                    stats.uploads_ok,
                    stats.uploads_failed
                );
                last_health = Instant::now();
            }
        }
    }

    /// One capture → detect → aggregate pass. `false` when the frame was lost.
    fn cycle(&mut self, source: &mut dyn FrameSource, resumed_at: &mut Option<Instant>) -> bool {
        let frame = loop {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    PipelineStats::bump(&self.stats.capture_errors);
                    log::warn!("frame capture failed: {:#}", err);
                    return false;
                }
            };
            // A streaming source keeps the frames it queued while paused.
            match *resumed_at {
                Some(resumed) if frame.captured_at() < resumed => {
                    PipelineStats::bump(&self.stats.stale_frames);
                    log::debug!("skipping frame {} captured before resume", frame.sequence);
                }
                _ => {
                    *resumed_at = None;
                    break frame;
                }
            }
        };
        PipelineStats::bump(&self.stats.frames);

        let started = Instant::now();
        let result = match self.detector.detect(&frame) {
            Ok(result) => result,
            Err(err) => {
                PipelineStats::bump(&self.stats.detect_errors);
                log::warn!("detection failed on frame {}: {:#}", frame.sequence, err);
                return true;
            }
        };
        let count = result.count();
        log::debug!(
            "frame {}: {} person(s), inference {} ms",
            frame.sequence,
            count,
            started.elapsed().as_millis()
        );

        match self.aggregator.record(count) {
            Ok(Some(sample)) => deliver(self.sink.as_ref(), &sample, &self.stats),
            Ok(None) => {}
            Err(err) => log::error!("aggregation failed: {:#}", err),
        }

        if let Some(path) = &self.settings.preview_path {
            let written = frame::annotate(&frame, &result.detections)
                .and_then(|image| frame::write_preview(&image, path));
            if let Err(err) = written {
                log::warn!("preview not written: {:#}", err);
            }
        }
        true
    }
}

struct ReportLoop {
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn SampleSink>,
    stats: Arc<PipelineStats>,
    stop: Arc<AtomicBool>,
    interval: Duration,
}

impl ReportLoop {
    fn run(self) {
        while !sleep_unless_stopped(self.interval, &self.stop) {
            match self.aggregator.tick() {
                Ok(Some(sample)) => deliver(self.sink.as_ref(), &sample, &self.stats),
                Ok(None) => {}
                Err(err) => {
                    log::error!("report: {:#}", err);
                    break;
                }
            }
        }
        log::info!("report loop stopped");
    }
}
