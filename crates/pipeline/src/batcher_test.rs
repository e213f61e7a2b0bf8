use super::*;
use stevedore_protocol::{InputRecord, Record};
use stevedore_queue::{Queue, QueueConfig};
use tempfile::TempDir;
use tokio::time::timeout;

fn record(id: &str, x: u64) -> Record {
    let raw = format!(r#"{{"id":"{id}","date":"2021.01.01","log":{{"x":{x}}}}}"#);
    InputRecord::parse(&raw)
        .unwrap()
        .into_record(|| unreachable!())
        .unwrap()
}

fn open_queue(dir: &TempDir) -> Queue {
    let config = QueueConfig {
        flush_delay: Duration::from_millis(10),
        fsync: None,
    };
    Queue::open(dir.path(), config).expect("open queue")
}

struct Harness {
    queue: Queue,
    rx: mpsc::Receiver<IndexedBatch>,
    cancel: CancellationToken,
    reader_done: CancellationToken,
    metrics: BatcherMetricsHandle,
    task: tokio::task::JoinHandle<()>,
}

fn start_batcher(dir: &TempDir, config: BatcherConfig) -> Harness {
    let queue = open_queue(dir);
    let cancel = CancellationToken::new();
    let reader_done = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let batcher = Batcher::new(
        queue.peek(cancel.clone()),
        tx,
        config,
        cancel.clone(),
        reader_done.clone(),
    );
    let metrics = batcher.metrics_handle();
    let task = tokio::spawn(batcher.run());
    Harness {
        queue,
        rx,
        cancel,
        reader_done,
        metrics,
        task,
    }
}

#[tokio::test]
async fn test_count_trigger() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 2,
            flush_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );
    for i in 0..4 {
        h.queue.append(&record(&format!("r{i}"), i)).unwrap();
    }

    let first = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.count(), 2);
    assert_eq!(second.count(), 2);

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_time_trigger_flushes_partial_batch() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 10,
            flush_delay: Duration::from_millis(50),
            ..Default::default()
        },
    );
    h.queue.append(&record("solo", 1)).unwrap();

    let batch = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .expect("timer should flush the partial batch")
        .unwrap();
    assert_eq!(batch.count(), 1);

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_batch_body_framing() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 2,
            flush_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );
    h.queue.append(&record("a", 1)).unwrap();
    h.queue.append(&record("b", 2)).unwrap();

    let batch = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    let expected = "{\"index\":{\"_index\":\"logs-2021.01.01\",\"_type\":\"log\",\"_id\":\"a\"}}\n{\"x\":1}\n\
                    {\"index\":{\"_index\":\"logs-2021.01.01\",\"_type\":\"log\",\"_id\":\"b\"}}\n{\"x\":2}\n";
    assert_eq!(batch.slice(0, batch.count()), expected.as_bytes());

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_records_keep_queue_order() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 5,
            flush_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );
    for i in 0..5 {
        h.queue.append(&record(&format!("r{i}"), i)).unwrap();
    }

    let batch = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    let body = String::from_utf8(batch.slice(0, batch.count()).to_vec()).unwrap();
    let positions: Vec<_> = (0..5)
        .map(|i| body.find(&format!("\"_id\":\"r{i}\"")).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);

    h.cancel.cancel();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_terminates_when_input_drained() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 10,
            flush_delay: Duration::from_millis(30),
            ..Default::default()
        },
    );
    h.queue.append(&record("a", 1)).unwrap();
    h.reader_done.cancel();

    // The pending record flushes first, then a quiet window terminates.
    let batch = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.count(), 1);

    // Channel close is the downstream end-of-stream signal.
    assert!(timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .expect("batcher should stop after the quiet window")
        .is_none());
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_partial_batch() {
    let dir = TempDir::new().unwrap();
    let mut h = start_batcher(
        &dir,
        BatcherConfig {
            batch_size: 10,
            flush_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );
    h.queue.append(&record("a", 1)).unwrap();

    // Give the batcher time to peek the record, then interrupt.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.cancel.cancel();

    let batch = timeout(Duration::from_secs(2), h.rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.count(), 1);
    h.task.await.unwrap();

    let dump = h.metrics.dump();
    assert!(dump.contains(&("batches".to_string(), "1".to_string())));
    assert!(dump.contains(&("records".to_string(), "1".to_string())));
}
