use httpmock::prelude::*;
use reqwest::Client;
use small_flow::{
    Body, ConcatSink, Encoding, FileSink, HttpSource, ManualTicker, Pipeline, ProgressOptions,
    ProgressStage, ProgressUpdate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn progress() -> (ProgressStage, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let stage = ProgressStage::with_ticker(
        ProgressOptions::default(),
        Arc::new(ManualTicker::default()),
    )
    .on_progress(move |update| sink.lock().unwrap().push(update.clone()));
    (stage, updates)
}

#[tokio::test]
async fn test_length_from_received_response() {
    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(GET).path("/10kb.test");
        then.status(200).body(vec![b'a'; 10 * 1024]);
    });

    let response = Client::new()
        .get(server.url("/10kb.test"))
        .send()
        .await
        .unwrap();
    let (stage, updates) = progress();
    let handle = stage.handle();
    let (sink, body) = ConcatSink::channel(Some(Encoding::Buffer));

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(HttpSource::from_response(response))
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    api_mock.assert();
    assert_eq!(handle.length(), 10 * 1024);
    assert_eq!(body.await.unwrap(), Body::Bytes(vec![b'a'; 10 * 1024]));

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.transferred, 10 * 1024);
    assert!(updates.iter().all(|u| u.length == 10 * 1024));
}

#[tokio::test]
async fn test_length_from_late_headers() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/slow.bin");
        then.status(200)
            .delay(Duration::from_millis(50))
            .body(vec![7u8; 4096]);
    });

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("slow.bin");
    let (stage, updates) = progress();
    let handle = stage.handle();
    let (length_tx, mut length_rx) = tokio::sync::mpsc::unbounded_channel();
    handle.on_length(move |length| {
        let _ = length_tx.send(length);
    });

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(HttpSource::get(&Client::new(), &server.url("/slow.bin")))
            .stage(stage)
            .stage(FileSink::create(&output))
            .run()
            .await
    );

    assert_eq!(std::fs::read(&output).unwrap().len(), 4096);
    // 標頭在背景套用，可能晚於資料
    let length = tokio::time::timeout(Duration::from_secs(1), length_rx.recv())
        .await
        .unwrap();
    assert_eq!(length, Some(4096));
    assert_eq!(handle.length(), 4096);
    assert_eq!(updates.lock().unwrap().last().unwrap().transferred, 4096);
}

#[tokio::test]
async fn test_compressed_response_leaves_length_unknown() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/gz");
        then.status(200)
            .header("content-encoding", "gzip")
            .body(vec![0u8; 64]);
    });

    let response = Client::new().get(server.url("/gz")).send().await.unwrap();
    let (stage, updates) = progress();
    let handle = stage.handle();
    let (sink, _body) = ConcatSink::channel(None);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(HttpSource::from_response(response))
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    assert_eq!(handle.length(), 0);
    assert!(updates.lock().unwrap().iter().all(|u| u.percentage == 0.0));
}

#[tokio::test]
async fn test_http_failure_fails_the_pipeline() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/gone");
        then.status(500);
    });

    let (stage, _updates) = progress();
    let (sink, _body) = ConcatSink::channel(None);
    let err = Pipeline::new()
        .stage(HttpSource::get(&Client::new(), &server.url("/gone")))
        .stage(stage)
        .stage(sink)
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("500"));
}
