use serde_json::json;
use small_flow::{
    Body, Chunk, ConcatSink, Encoding, FlowError, IterSource, ManualTicker, MapStage,
    PassThrough, Pipeline, ProducerMetadata, ProgressOptions, ProgressStage, ProgressState,
    ProgressUpdate,
};
use std::sync::{Arc, Mutex};

type Updates = Arc<Mutex<Vec<ProgressUpdate>>>;

fn progress(options: ProgressOptions) -> (ProgressStage, Updates) {
    let updates: Updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let stage = ProgressStage::with_ticker(options, Arc::new(ManualTicker::default()))
        .on_progress(move |update| sink.lock().unwrap().push(update.clone()));
    (stage, updates)
}

fn ten_byte_chunks(count: usize) -> IterSource {
    IterSource::new((0..count).map(|_| Chunk::from(vec![b'x'; 10])).collect::<Vec<_>>())
}

#[tokio::test]
async fn test_unknown_length_reports_running_totals() {
    let (stage, updates) = progress(ProgressOptions::default());
    let (sink, _body) = ConcatSink::channel(None);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(ten_byte_chunks(3))
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    let updates = updates.lock().unwrap();
    let transferred: Vec<u64> = updates.iter().map(|u| u.transferred).collect();
    assert_eq!(transferred, vec![10, 20, 30, 30]);
    assert!(updates.iter().all(|u| u.percentage == 0.0 && u.length == 0));
    assert_eq!(updates.last().unwrap().delta, 0);
}

#[tokio::test]
async fn test_known_length_ends_at_hundred_percent() {
    let (stage, updates) = progress(ProgressOptions {
        length: 30,
        ..Default::default()
    });
    let handle = stage.handle();
    let (sink, _body) = ConcatSink::channel(None);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(ten_byte_chunks(3))
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.transferred, 30);
    assert_eq!(last.remaining, 0);
    assert_eq!(last.eta, 0.0);
    for pair in updates.windows(2) {
        assert!(pair[0].transferred <= pair[1].transferred);
        assert!(pair[0].percentage <= pair[1].percentage);
    }
    // 結束後被銷毀
    assert_eq!(handle.state(), ProgressState::Destroyed);
}

#[tokio::test]
async fn test_object_mode_percentages() {
    let (stage, updates) = progress(ProgressOptions {
        length: 3,
        object_mode: true,
        ..Default::default()
    });
    let (sink, body) = ConcatSink::channel(None);
    let source = IterSource::new(vec![
        Chunk::from(json!({"data": "chunk1"})),
        Chunk::from(json!({"data": "chunk2"})),
        Chunk::from(json!({"data": "chunk3"})),
    ]);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(source)
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    let updates = updates.lock().unwrap();
    let percentages: Vec<f64> = updates.iter().map(|u| u.percentage).collect();
    assert_eq!(percentages.len(), 4);
    assert!((percentages[0] - 33.333).abs() < 0.01);
    assert!((percentages[1] - 66.667).abs() < 0.01);
    assert_eq!(percentages[2], 100.0);
    assert_eq!(percentages[3], 100.0);

    match body.await.unwrap() {
        Body::Chunks(chunks) => assert_eq!(chunks.len(), 3),
        other => panic!("unexpected body: {:?}", other),
    }
}

#[tokio::test]
async fn test_chunks_are_forwarded_unchanged() {
    let (stage, _updates) = progress(ProgressOptions::default());
    let (sink, body) = ConcatSink::channel(Some(Encoding::String));
    let source = IterSource::new(vec![
        Chunk::from("progress "),
        Chunk::from("is "),
        Chunk::from("transparent"),
    ]);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(source)
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );
    assert_eq!(
        body.await.unwrap(),
        Body::Text("progress is transparent".to_string())
    );
}

#[tokio::test]
async fn test_throttled_stage_still_flushes() {
    let (stage, updates) = progress(ProgressOptions {
        length: 50,
        time: 60_000,
        ..Default::default()
    });
    let (sink, _body) = ConcatSink::channel(None);

    tokio_test::assert_ok!(
        Pipeline::new()
            .stage(ten_byte_chunks(5))
            .stage(stage)
            .stage(sink)
            .run()
            .await
    );

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].percentage, 100.0);
    assert_eq!(updates[0].delta, 50);
}

#[tokio::test]
async fn test_length_detected_from_upstream_size() {
    let (stage, updates) = progress(ProgressOptions::default());
    let handle = stage.handle();
    let source = ten_byte_chunks(2).with_metadata(ProducerMetadata::from_size(20));

    // 最後一個階段：資料計數後丟棄
    tokio_test::assert_ok!(Pipeline::new().stage(source).stage(stage).run().await);

    assert_eq!(handle.length(), 20);
    let updates = updates.lock().unwrap();
    assert_eq!(updates[0].percentage, 50.0);
    assert_eq!(updates.last().unwrap().percentage, 100.0);
}

#[tokio::test]
async fn test_standalone_set_length_mid_stream() {
    let (stage, updates) = progress(ProgressOptions::default());
    let mut running = stage.spawn();

    running.input.send(Chunk::from(vec![0u8; 25])).await.unwrap();
    assert_eq!(running.output.as_mut().unwrap().recv().await.unwrap().len(), 25);

    running.handle.set_length(100);
    running.input.send(Chunk::from(vec![0u8; 25])).await.unwrap();
    assert_eq!(running.output.as_mut().unwrap().recv().await.unwrap().len(), 25);

    drop(running.input);
    tokio_test::assert_ok!(running.task.await.unwrap());

    let updates = updates.lock().unwrap();
    assert_eq!(updates[0].length, 0);
    assert_eq!(updates[0].percentage, 0.0);
    assert_eq!(updates[1].length, 100);
    assert_eq!(updates[1].percentage, 50.0);
    assert_eq!(updates[1].remaining, 50);
    assert_eq!(updates.last().unwrap().percentage, 100.0);
}

#[tokio::test]
async fn test_standalone_drain_discards_output() {
    let (stage, updates) = progress(ProgressOptions {
        drain: true,
        ..Default::default()
    });
    let running = stage.spawn();
    assert!(running.output.is_none());

    for _ in 0..40 {
        running.input.send(Chunk::from("abcd")).await.unwrap();
    }
    drop(running.input);
    tokio_test::assert_ok!(running.task.await.unwrap());

    assert_eq!(updates.lock().unwrap().last().unwrap().transferred, 160);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upstream_failure_is_never_reported_as_complete() {
    for _ in 0..100 {
        let (stage, updates) = progress(ProgressOptions {
            length: 100,
            ..Default::default()
        });
        let handle = stage.handle();

        let mut seen = 0;
        let failing = MapStage::new("explode", move |chunk| {
            seen += 1;
            if seen == 2 {
                Err(FlowError::stage("explode", "boom"))
            } else {
                Ok(chunk)
            }
        });

        let err = Pipeline::new()
            .stage(ten_byte_chunks(10))
            .stage(failing)
            .stage(stage)
            .stage(PassThrough::new())
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Stage 'explode' failed: boom");

        // 讓被中止的任務有機會結束
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        let updates = updates.lock().unwrap();
        assert!(updates.iter().all(|u| u.percentage < 100.0), "{:?}", updates);
        assert_ne!(handle.state(), ProgressState::Ended);
    }
}
