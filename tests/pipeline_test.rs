//! End-to-end submitter/worker flows over the in-memory broker.

mod helpers;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::*;
use predict_queue::models::job::{JobDescriptor, JobOutcome};
use predict_queue::models::prediction::Prediction;
use predict_queue::services::classifier::{BlockingClassifier, Classifier};
use predict_queue::services::submitter::{SubmitError, WaitStrategy};
use predict_queue::services::worker::Cycle;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_round_trip_returns_model_output() {
    let pipeline = Pipeline::new(None).await;
    let classifier: Arc<dyn Classifier> = Arc::new(BlockingClassifier::new(|_: &Path| {
        Ok::<_, String>(("tabby_cat".to_string(), 0.87))
    }));
    let (cancel, handles) = pipeline.spawn_workers(1, classifier);

    for strategy in [WaitStrategy::Blocking, WaitStrategy::Poll] {
        let submitter = pipeline.submitter(strategy, Duration::from_secs(5));
        let (reference, prediction) =
            assert_ok!(submitter.predict_upload(b"catimage", "cat.jpg", None).await);
        assert!(reference.ends_with(".jpg"));
        assert_eq!(prediction, Prediction::new("tabby_cat", 0.87).unwrap());
    }

    stop(cancel, handles).await;
    assert_eq!(pipeline.store.write_count(), 1);
    assert_eq!(pipeline.broker.key_count(), 0);
}

#[tokio::test]
async fn test_consumed_result_is_gone() {
    let pipeline = Pipeline::new(None).await;
    let reference = pipeline.store.put(b"catimage", "cat.jpg").await.unwrap();
    let job = JobDescriptor::new(reference);
    pipeline.queue.enqueue(&job).await.unwrap();

    let worker = pipeline.worker("single", echo_classifier(0.87));
    assert_eq!(worker.run_once().await.unwrap(), Cycle::Processed);

    let record = pipeline.results.try_consume(job.id).await.unwrap().unwrap();
    assert_eq!(
        record.outcome,
        JobOutcome::Completed {
            prediction: "catimage".to_string(),
            score: 0.87
        }
    );
    assert!(pipeline.results.try_consume(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_slow_worker_yields_timeout_not_hang() {
    let pipeline = Pipeline::new(Some(Duration::from_millis(150))).await;
    let (cancel, handles) = pipeline.spawn_workers(1, slow_classifier(Duration::from_millis(250)));
    let submitter = pipeline.submitter(WaitStrategy::Poll, Duration::from_secs(5));

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        submitter.predict_upload(b"img", "a.png", Some(Duration::from_millis(50))),
    )
    .await
    .expect("submit hung past its deadline");
    assert!(matches!(result, Err(SubmitError::Timeout { .. })));

    // The worker still answers; nobody reads it, and expiry reclaims it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop(cancel, handles).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pipeline.broker.key_count(), 0);
}

#[tokio::test]
async fn test_single_worker_serves_fifo() {
    let pipeline = Pipeline::new(None).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder: Arc<dyn Classifier> = {
        let seen = Arc::clone(&seen);
        Arc::new(BlockingClassifier::new(move |path: &Path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            seen.lock().unwrap().push(name);
            Ok::<_, String>(("x".to_string(), 0.1))
        }))
    };

    let mut expected = Vec::new();
    let payloads: [&[u8]; 3] = [b"first", b"second", b"third"];
    for payload in payloads {
        let reference = pipeline.store.put(payload, "p.png").await.unwrap();
        pipeline.queue.enqueue(&JobDescriptor::new(reference.clone())).await.unwrap();
        expected.push(reference);
    }

    let worker = pipeline.worker("fifo", recorder);
    for _ in 0..3 {
        assert_eq!(worker.run_once().await.unwrap(), Cycle::Processed);
    }
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_competing_workers_process_each_job_once() {
    const JOBS: usize = 60;
    let pipeline = Pipeline::new(None).await;
    let calls: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let counter: Arc<dyn Classifier> = {
        let calls = Arc::clone(&calls);
        Arc::new(BlockingClassifier::new(move |path: &Path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            *calls.lock().unwrap().entry(name).or_default() += 1;
            Ok::<_, String>(("x".to_string(), 0.1))
        }))
    };

    let mut jobs = Vec::new();
    for i in 0..JOBS {
        let reference = pipeline
            .store
            .put(format!("payload-{i}").as_bytes(), "p.png")
            .await
            .unwrap();
        let job = JobDescriptor::new(reference);
        pipeline.queue.enqueue(&job).await.unwrap();
        jobs.push(job);
    }

    let (cancel, handles) = pipeline.spawn_workers(4, counter);
    for job in &jobs {
        let record = pipeline
            .results
            .consume_blocking(job.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(record.is_some(), "job {} never answered", job.id);
    }
    stop(cancel, handles).await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), JOBS);
    assert!(calls.values().all(|&n| n == 1));
}

#[tokio::test]
async fn test_concurrent_submitters_get_their_own_results() {
    let pipeline = Pipeline::new(None).await;
    let (cancel, handles) = pipeline.spawn_workers(3, echo_classifier(0.42));
    let submitter = Arc::new(pipeline.submitter(WaitStrategy::Blocking, Duration::from_secs(5)));

    let requests = (0..20).map(|i| {
        let submitter = Arc::clone(&submitter);
        tokio::spawn(async move {
            let body = format!("image-{i}");
            let (_, prediction) = submitter
                .predict_upload(body.as_bytes(), "x.gif", None)
                .await
                .unwrap();
            (body, prediction)
        })
    });

    for outcome in futures::future::join_all(requests).await {
        let (body, prediction) = outcome.unwrap();
        assert_eq!(prediction.label, body);
        assert_eq!(prediction.score, 0.42);
    }
    stop(cancel, handles).await;
}

#[tokio::test]
async fn test_missing_payload_reports_failure_to_submitter() {
    let pipeline = Pipeline::new(None).await;
    let (cancel, handles) = pipeline.spawn_workers(1, echo_classifier(0.5));
    let submitter = pipeline.submitter(WaitStrategy::Poll, Duration::from_secs(5));

    let err = assert_err!(submitter.submit_and_wait("ffff.png", None).await);
    assert!(matches!(err, SubmitError::InferenceFailed { .. }), "{err}");
    assert!(!err.is_retryable());
    stop(cancel, handles).await;
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_job() {
    let pipeline = Pipeline::new(None).await;
    let (cancel, handles) = pipeline.spawn_workers(1, slow_classifier(Duration::from_millis(150)));
    let submitter = Arc::new(pipeline.submitter(WaitStrategy::Blocking, Duration::from_secs(5)));

    let pending = {
        let submitter = Arc::clone(&submitter);
        tokio::spawn(async move { submitter.predict_upload(b"img", "a.png", None).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    stop(cancel, handles).await;

    let (_, prediction) = pending.await.unwrap().unwrap();
    assert_eq!(prediction.label, "slow");
}
