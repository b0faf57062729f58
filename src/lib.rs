//! Occupancy counter
//!
//! Samples a camera, counts the people in each frame with an object-detection
//! model, aggregates the counts over a short rolling window and reports each
//! window to a remote endpoint. A push button pauses and resumes counting.
//!
//! # Architecture
//!
//! The pipeline holds a few rules by construction:
//!
//! 1. **One window lock**: appending a count and flushing a full window happen
//!    in one critical section, whichever thread triggers it.
//! 2. **Lossy telemetry**: an upload failure drops that sample; the window is
//!    reset regardless and the pipeline keeps running.
//! 3. **Device ownership**: the camera is opened, read and released by the
//!    capture thread only.
//! 4. **Clean shutdown**: one stop flag ends every loop within an iteration;
//!    threads are joined and the indicator is switched off.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, scaling, annotated previews
//! - `ingest`: Frame sources (V4L2 camera, `stub://` synthetic, continuous streaming)
//! - `detect`: Inference engines, label files, person filtering
//! - `aggregate`: Rolling window and order statistic
//! - `transport`: Sample delivery (HTTP upload, log-only)
//! - `control`: Run/pause switch, button and indicator GPIO
//! - `pipeline`: Thread wiring and shutdown
//! - `config`: File, environment and command-line configuration

pub mod aggregate;
pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod transport;

pub use aggregate::{order_statistic, Aggregator, Sample, TriggerMode};
pub use config::{ConfigOverrides, CounterConfig, StatisticKey};
pub use control::{ControlState, ControlSwitch};
pub use detect::{Detection, Detector, FrameResult};
pub use frame::Frame;
pub use ingest::{CaptureMode, FrameSource};
pub use pipeline::{Pipeline, PipelineHandle, PipelineSettings, StatsSnapshot};
pub use transport::SampleSink;
