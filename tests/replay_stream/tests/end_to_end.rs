use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::write::GzEncoder;
use flate2::Compression;
use replay_archive::{load_archive, SignalSet};
use replay_scheduler::{CycleScheduler, ReplayConfig, Reporter, ShutdownFlag, Verbosity};
use replay_timestamps::min_timestamp;
use replay_transport::{preflight, CollectorConfig, HttpSink, SharedSink};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SPAN: &str = r#"{"resourceSpans":[{"scopeSpans":[{"spans":[{"name":"checkout","startTimeUnixNano":"1000000000","endTimeUnixNano":"1250000000"}]}]}]}"#;
const LOG: &str = r#"{"resourceLogs":[{"scopeLogs":[{"logRecords":[{"timeUnixNano": "1100000000","body":{"stringValue":"id 1100000000"}}]}]}]}"#;

fn write_archive(dir: &TempDir, entries: &[(&str, &str)]) -> PathBuf {
    let archive = dir.path().join("sample.tar.gz");
    let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_mode(0o644);
        header.set_size(contents.len() as u64);
        header.set_cksum();
        builder.append(&header, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    archive
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

fn body(request: &Request) -> String {
    String::from_utf8(request.body.clone()).unwrap()
}

async fn replay_once(archive: &Path, config: CollectorConfig, cycle_seconds: f64) -> String {
    preflight(archive, &config).await.expect("preflight passes");
    let timeline = load_archive(archive, &SignalSet::all()).unwrap();
    let sink: SharedSink = Arc::new(HttpSink::connect(config).unwrap());
    let reporter = Reporter::new(Vec::new(), Verbosity::Verbose, SignalSet::all());
    let replay = ReplayConfig {
        cycle_seconds,
        rate: 1.0,
        max_cycles: Some(1),
    };
    let mut scheduler =
        CycleScheduler::new(timeline, replay, sink, reporter, ShutdownFlag::new()).unwrap();
    scheduler.run().await;
    String::from_utf8(scheduler.into_reporter().into_inner()).unwrap()
}

#[tokio::test]
async fn replays_archive_into_current_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/traces"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/logs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let archive = write_archive(&dir, &[("traces.json", SPAN), ("logs.json", LOG)]);

    let before = unix_nanos();
    let console = replay_once(&archive, CollectorConfig::new(server.uri(), "hdx-key"), 1.0).await;
    let after = unix_nanos();

    let requests = server.received_requests().await.unwrap();
    let posts: Vec<&Request> = requests
        .iter()
        .filter(|request| request.method.as_str() == "POST")
        .collect();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].url.path(), "/v1/traces");
    assert_eq!(posts[1].url.path(), "/v1/logs");

    let span = body(posts[0]);
    let start = min_timestamp(&span).unwrap();
    assert!(start >= before && start < before + 1_000_000_000);
    // all fields of a batch share one offset, so the span keeps its 250ms length
    assert!(span.contains(&format!(r#""endTimeUnixNano":"{}""#, start + 250_000_000)));
    serde_json::from_str::<serde_json::Value>(&span).unwrap();

    let log = body(posts[1]);
    let logged = min_timestamp(&log).unwrap();
    // 100ms of archive maps onto the whole 1s cycle
    assert_eq!(logged, start + 1_000_000_000);
    assert!(logged <= after + 1_000_000_000);
    assert!(log.contains(r#""timeUnixNano": ""#));
    assert!(log.contains("id 1100000000"));

    assert!(console.contains("] traces batch 1/2"));
    assert!(console.contains("] logs batch 2/2"));
    assert!(console.contains("Sent 2 batches (0 errors)."));
}

#[tokio::test]
async fn collector_errors_do_not_end_the_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let archive = write_archive(&dir, &[("traces.json", SPAN), ("logs.json", LOG)]);

    let console =
        replay_once(&archive, CollectorConfig::new(server.uri(), "hdx-key"), 0.05).await;

    assert!(console.contains("  WARN: traces HTTP 503"));
    assert!(console.contains("  WARN: logs HTTP 503"));
    assert!(console.contains("--- Cycle 1 complete"));
    assert!(console.contains("Sent 2 batches (2 errors)."));
}

#[tokio::test]
async fn shutdown_during_long_wait_skips_remaining_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/traces"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/logs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();
    let archive = write_archive(&dir, &[("traces.json", SPAN), ("logs.json", LOG)]);

    let timeline = load_archive(&archive, &SignalSet::all()).unwrap();
    let sink: SharedSink =
        Arc::new(HttpSink::connect(CollectorConfig::new(server.uri(), "hdx-key")).unwrap());
    let reporter = Reporter::new(Vec::new(), Verbosity::Normal, SignalSet::all());
    let shutdown = ShutdownFlag::new();
    let config = ReplayConfig {
        cycle_seconds: 3_600.0,
        ..ReplayConfig::default()
    };
    let mut scheduler =
        CycleScheduler::new(timeline, config, sink, reporter, shutdown.clone()).unwrap();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.request();
    });
    let summary = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("scheduler stops promptly");
    stopper.await.unwrap();

    assert_eq!((summary.cycles, summary.sent, summary.errors), (1, 1, 0));
    let console = String::from_utf8(scheduler.into_reporter().into_inner()).unwrap();
    assert_eq!(console.matches("Stopped after").count(), 1);
}
