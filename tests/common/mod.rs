#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use occupancy_counter::control::LogIndicator;
use occupancy_counter::detect::{BoundingBox, Detection, InferenceEngine, Labels};
use occupancy_counter::ingest::SourceFactory;
use occupancy_counter::{
    CaptureMode, ControlSwitch, Detector, Frame, FrameSource, PipelineSettings, Sample,
    SampleSink, StatsSnapshot,
};

pub const FRAME_SIZE: u32 = 4;

/// Frames whose first pixel byte encodes the number of persons in them.
pub struct ScriptedSource {
    counts: VecDeque<u32>,
    captured: u64,
}

impl ScriptedSource {
    pub fn factory(counts: Vec<u32>) -> SourceFactory {
        Box::new(move || {
            Ok(Box::new(ScriptedSource {
                counts: counts.into(),
                captured: 0,
            }) as Box<dyn FrameSource>)
        })
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let count = self
            .counts
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))?;
        self.captured += 1;
        let pixels = vec![count as u8; (FRAME_SIZE * FRAME_SIZE * 3) as usize];
        Frame::new(pixels, FRAME_SIZE, FRAME_SIZE, self.captured)
    }

    fn frames_captured(&self) -> u64 {
        self.captured
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Reports `pixel[0]` persons plus one low-confidence person and one cat.
pub struct PixelCountEngine;

impl InferenceEngine for PixelCountEngine {
    fn name(&self) -> &'static str {
        "pixel-count"
    }

    fn input_size(&self) -> (u32, u32) {
        (FRAME_SIZE, FRAME_SIZE)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let persons = frame.pixels()[0] as usize;
        let bbox = BoundingBox {
            ymin: 0.1,
            xmin: 0.1,
            ymax: 0.5,
            xmax: 0.5,
        };
        let mut detections: Vec<Detection> = (0..persons)
            .map(|_| Detection {
                bbox,
                class_id: 0,
                score: 0.9,
            })
            .collect();
        detections.push(Detection {
            bbox,
            class_id: 0,
            score: 0.2,
        });
        detections.push(Detection {
            bbox,
            class_id: 16,
            score: 0.95,
        });
        Ok(detections)
    }
}

pub fn detector() -> Detector {
    let labels = Labels::parse("0 person\n16 cat\n");
    Detector::new(Box::new(PixelCountEngine), labels, 0, 0.5).unwrap()
}

pub fn switch() -> Arc<ControlSwitch> {
    Arc::new(ControlSwitch::new(Box::new(LogIndicator)).unwrap())
}

pub fn single_shot() -> PipelineSettings {
    PipelineSettings {
        capture_mode: CaptureMode::SingleShot,
        capture_interval: Duration::ZERO,
        report_interval: Duration::from_millis(10),
        preview_path: None,
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub samples: Arc<Mutex<Vec<Sample>>>,
}

impl SampleSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, sample: &Sample) -> bool {
        self.samples.lock().unwrap().push(sample.clone());
        true
    }
}

/// Poll `stats` until `done` holds or the deadline passes.
pub fn wait_for(
    stats: impl Fn() -> StatsSnapshot,
    done: impl Fn(&StatsSnapshot) -> bool,
) -> StatsSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = stats();
        if done(&snapshot) || Instant::now() >= deadline {
            return snapshot;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// How the local test server answers.
#[derive(Clone, Copy)]
pub enum Reply {
    Status(u16),
    Drop,
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: String,
}

/// Serve every connection on a background thread; requests are recorded.
pub fn serve(reply: Reply) -> (SocketAddr, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            match reply {
                Reply::Drop => drop(stream),
                Reply::Status(code) => {
                    if let Ok(request) = read_request(&mut stream) {
                        recorded.lock().unwrap().push(request);
                    }
                    let response = format!(
                        "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        code
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
            }
        }
    });
    (addr, requests)
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        head.push_str(&line);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    Ok(CapturedRequest {
        head,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
