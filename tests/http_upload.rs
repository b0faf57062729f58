mod common;

use std::time::Duration;

use chrono::Local;

use common::{detector, serve, single_shot, switch, wait_for, Reply, ScriptedSource};
use occupancy_counter::config::UploadSettings;
use occupancy_counter::transport::HttpUploader;
use occupancy_counter::{Aggregator, Pipeline, Sample, SampleSink, StatisticKey, TriggerMode};

fn settings(endpoint: String) -> UploadSettings {
    UploadSettings {
        endpoint: Some(endpoint),
        username: None,
        password: None,
        timeout: Duration::from_secs(1),
        statistic_key: StatisticKey::Mode,
    }
}

fn sample() -> Sample {
    Sample {
        counts: vec![0, 2, 1, 3, 1],
        statistic: 1,
        timestamp: Local::now(),
    }
}

#[test]
fn accepted_upload_carries_record_and_basic_auth() {
    let (addr, requests) = serve(Reply::Status(200));
    let mut upload = settings(format!("http://{}/admin/pi", addr));
    upload.username = Some("pi".to_string());
    upload.password = Some("s3cret".to_string());
    let uploader = HttpUploader::new(&upload).unwrap();

    assert!(uploader.send(&sample()));

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.head.starts_with("POST /admin/pi "));
    assert!(request.head.contains("Basic cGk6czNjcmV0"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["img1"], 0);
    assert_eq!(body["img5"], 1);
    assert_eq!(body["mode"], 1);
    assert!(body["timestamp"].is_string());
}

#[test]
fn server_error_is_reported_not_raised() {
    let (addr, _) = serve(Reply::Status(500));
    let uploader = HttpUploader::new(&settings(format!("http://{}/pi", addr))).unwrap();
    assert!(!uploader.send(&sample()));
}

#[test]
fn dropped_connection_is_reported_not_raised() {
    let (addr, _) = serve(Reply::Drop);
    let uploader = HttpUploader::new(&settings(format!("http://{}/pi", addr))).unwrap();
    assert!(!uploader.send(&sample()));
}

#[test]
fn unreachable_endpoint_is_reported_not_raised() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let uploader = HttpUploader::new(&settings(format!("http://{}/pi", addr))).unwrap();
    assert!(!uploader.send(&sample()));
}

#[test]
fn failed_uploads_drop_samples_and_pipeline_keeps_running() {
    for reply in [Reply::Status(500), Reply::Drop] {
        let (addr, _) = serve(reply);
        let uploader = HttpUploader::new(&settings(format!("http://{}/pi", addr))).unwrap();
        let switch = switch();
        switch.press().unwrap();

        let pipeline = Pipeline::new(
            detector(),
            ScriptedSource::factory(vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5, 1, 2, 3, 4, 5]),
            Aggregator::new(5, TriggerMode::OnPushFull).unwrap(),
            Box::new(uploader),
            switch,
            None,
            single_shot(),
        );
        let handle = pipeline.spawn().unwrap();
        let stats = wait_for(|| handle.stats(), |s| s.frames == 15 && s.uploads_failed == 3);
        assert_eq!(handle.aggregator().pending().unwrap(), 0);
        handle.stop().unwrap();

        assert_eq!(stats.frames, 15);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.uploads_failed, 3);
        assert_eq!(stats.uploads_ok, 0);
    }
}
