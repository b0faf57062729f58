//! Continuous capture.
//!
//! A dedicated thread opens the source and pulls frames as fast as the device
//! delivers them into a bounded queue. The capture loop consumes the queue
//! through the same `FrameSource` interface as a single-shot source.
//!
//! The queue is bounded so a slow consumer back-pressures the device instead
//! of accumulating stale frames.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{FrameSource, SourceFactory};
use crate::frame::Frame;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Frame stream fed by a background capture thread.
pub struct ContinuousCapture {
    rx: Option<Receiver<Frame>>,
    stop: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    received: u64,
    description: String,
}

impl ContinuousCapture {
    /// Open the source on a new thread and start streaming.
    ///
    /// Returns the factory's error when the device cannot be opened.
    pub fn spawn(factory: SourceFactory, queue_depth: usize) -> Result<Self> {
        let (frame_tx, frame_rx) = mpsc::sync_channel(queue_depth.max(1));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let healthy = Arc::new(AtomicBool::new(true));

        let stop_thread = stop.clone();
        let healthy_thread = healthy.clone();
        let join = std::thread::Builder::new()
            .name("frame-stream".to_string())
            .spawn(move || {
                let mut source = match factory() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(source.describe()));
                        source
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                stream_frames(source.as_mut(), frame_tx, &stop_thread, &healthy_thread);
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("frame stream thread exited during start-up"));
        let description = match ready.and_then(|r| r) {
            Ok(description) => description,
            Err(err) => {
                let _ = join.join();
                return Err(err);
            }
        };
        log::info!("ContinuousCapture: streaming from {}", description);

        Ok(Self {
            rx: Some(frame_rx),
            stop,
            healthy,
            join: Some(join),
            received: 0,
            description,
        })
    }
}

fn stream_frames(
    source: &mut dyn FrameSource,
    tx: SyncSender<Frame>,
    stop: &AtomicBool,
    healthy: &AtomicBool,
) {
    let mut consecutive_errors = 0u32;
    while !stop.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                healthy.store(true, Ordering::SeqCst);
                if tx.send(frame).is_err() {
                    // consumer gone
                    break;
                }
            }
            Err(err) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                healthy.store(false, Ordering::SeqCst);
                log::warn!("continuous capture failed: {:#}", err);
                let backoff = Duration::from_millis(100 * consecutive_errors as u64);
                std::thread::sleep(backoff.min(MAX_ERROR_BACKOFF));
            }
        }
    }
    log::info!(
        "continuous capture from {} stopped after {} frames",
        source.describe(),
        source.frames_captured()
    );
}

impl FrameSource for ContinuousCapture {
    fn connect(&mut self) -> Result<()> {
        // Connected by the stream thread in `spawn`.
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| anyhow!("continuous capture already shut down"))?;
        match rx.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => {
                self.received += 1;
                Ok(frame)
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(anyhow!("no frame from {} within {:?}", self.description, RECV_TIMEOUT))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("frame stream from {} ended", self.description))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn frames_captured(&self) -> u64 {
        self.received
    }

    fn describe(&self) -> String {
        format!("{} (continuous)", self.description)
    }
}

impl Drop for ContinuousCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the receiver unblocks a producer waiting on a full queue.
        self.rx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("frame stream thread panicked");
            }
        }
    }
}
