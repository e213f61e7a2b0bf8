use super::*;
use stevedore_protocol::InputRecord;
use tempfile::TempDir;
use tokio::time::timeout;

fn record(id: &str, x: u64) -> Record {
    let raw = format!(r#"{{"id":"{id}","date":"2021.01.01","log":{{"x":{x}}}}}"#);
    InputRecord::parse(&raw)
        .unwrap()
        .into_record(|| unreachable!())
        .unwrap()
}

fn test_config() -> QueueConfig {
    QueueConfig {
        flush_delay: Duration::from_millis(10),
        fsync: None,
    }
}

fn open_queue(dir: &TempDir) -> Queue {
    Queue::open(dir.path(), test_config()).expect("open queue")
}

// =============================================================================
// Append / key allocation
// =============================================================================

#[test]
fn test_keys_start_at_one() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    assert_eq!(queue.append(&record("a", 1)).unwrap(), 1);
    assert_eq!(queue.append(&record("b", 2)).unwrap(), 2);
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_reopen_resumes_key_allocation() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open_queue(&dir);
        for i in 0..100 {
            queue.append(&record(&format!("r{i}"), i)).unwrap();
        }
        queue.persist().unwrap();
    }
    let queue = open_queue(&dir);
    assert_eq!(queue.append(&record("next", 0)).unwrap(), 101);
}

#[test]
fn test_no_key_reuse_after_drop() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open_queue(&dir);
        queue.append(&record("a", 1)).unwrap();
        queue.append(&record("b", 2)).unwrap();
        queue.drop_first(2).unwrap();
        // Counter keeps going even though the store is empty again.
        assert_eq!(queue.append(&record("c", 3)).unwrap(), 3);
        queue.persist().unwrap();
    }
    let queue = open_queue(&dir);
    assert_eq!(queue.append(&record("d", 4)).unwrap(), 4);
}

// =============================================================================
// Peek stream
// =============================================================================

#[tokio::test]
async fn test_peek_yields_in_key_order() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    for i in 0..5 {
        queue.append(&record(&format!("r{i}"), i)).unwrap();
    }

    let mut stream = queue.peek(CancellationToken::new());
    for expected in 1..=5u64 {
        let (key, rec) = stream.next().await.unwrap();
        assert_eq!(key, expected);
        assert_eq!(rec.id, format!("r{}", expected - 1));
    }
}

#[tokio::test]
async fn test_peek_does_not_delete() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    queue.append(&record("a", 1)).unwrap();

    let mut stream = queue.peek(CancellationToken::new());
    stream.next().await.unwrap();
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_peek_waits_at_tail_then_sees_append() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    let mut stream = queue.peek(CancellationToken::new());

    let writer = queue.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        writer.append(&record("late", 1)).unwrap();
    });

    let (key, rec) = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("peek should wake up after append")
        .unwrap();
    assert_eq!(key, 1);
    assert_eq!(rec.id, "late");
    handle.await.unwrap();
}

#[tokio::test]
async fn test_peek_cancellation_returns_none() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    let cancel = CancellationToken::new();
    let mut stream = queue.peek(cancel.clone());

    cancel.cancel();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_peek_skips_poison_record() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    queue.append(&record("good1", 1)).unwrap();

    // Corrupt row wedged between two valid ones, written behind the queue's
    // back at the key the counter would assign next.
    let poison_key = 2u64;
    queue
        .inner
        .records
        .insert(poison_key.to_be_bytes(), b"not json at all")
        .unwrap();
    queue.inner.next_key.store(3, Ordering::SeqCst);
    queue.append(&record("good2", 2)).unwrap();

    let mut stream = queue.peek(CancellationToken::new());
    let (k1, r1) = stream.next().await.unwrap();
    let (k2, r2) = stream.next().await.unwrap();
    assert_eq!((k1, r1.id.as_str()), (1, "good1"));
    assert_eq!((k2, r2.id.as_str()), (3, "good2"));
}

#[tokio::test]
async fn test_peek_resumes_past_dropped_prefix() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    for i in 0..4 {
        queue.append(&record(&format!("r{i}"), i)).unwrap();
    }
    queue.drop_first(2).unwrap();

    let mut stream = queue.peek(CancellationToken::new());
    let (key, rec) = stream.next().await.unwrap();
    assert_eq!(key, 3);
    assert_eq!(rec.id, "r2");
}

// =============================================================================
// Prefix drop
// =============================================================================

#[test]
fn test_drop_prefix() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    for i in 0..5 {
        queue.append(&record(&format!("r{i}"), i)).unwrap();
    }
    assert_eq!(queue.drop_first(2).unwrap(), 2);
    assert_eq!(queue.len(), 3);
}

#[test]
fn test_drop_more_than_length() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    queue.append(&record("a", 1)).unwrap();
    assert_eq!(queue.drop_first(10).unwrap(), 1);
    assert_eq!(queue.len(), 0);
    assert!(queue.is_empty());
}

#[test]
fn test_drop_on_empty_queue() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    assert_eq!(queue.drop_first(3).unwrap(), 0);
}

#[tokio::test]
async fn test_split_drop_equals_single_drop() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let split = open_queue(&dir_a);
    let single = open_queue(&dir_b);
    for q in [&split, &single] {
        for i in 0..6 {
            q.append(&record(&format!("r{i}"), i)).unwrap();
        }
    }

    split.drop_first(2).unwrap();
    split.drop_first(3).unwrap();
    single.drop_first(5).unwrap();

    assert_eq!(split.len(), single.len());
    let mut sa = split.peek(CancellationToken::new());
    let mut sb = single.peek(CancellationToken::new());
    let (ka, ra) = sa.next().await.unwrap();
    let (kb, rb) = sb.next().await.unwrap();
    assert_eq!(ka, kb);
    assert_eq!(ra.id, rb.id);
}

// =============================================================================
// Crash recovery
// =============================================================================

#[tokio::test]
async fn test_unacked_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open_queue(&dir);
        for i in 0..10 {
            queue.append(&record(&format!("r{i}"), i)).unwrap();
        }
        queue.drop_first(4).unwrap();
        queue.persist().unwrap();
    }

    let queue = open_queue(&dir);
    assert_eq!(queue.len(), 6);
    let mut stream = queue.peek(CancellationToken::new());
    for expected in 5..=10u64 {
        let (key, rec) = stream.next().await.unwrap();
        assert_eq!(key, expected);
        assert_eq!(rec.id, format!("r{}", expected - 1));
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[test]
fn test_metrics_dump() {
    let dir = TempDir::new().unwrap();
    let queue = open_queue(&dir);
    queue.append(&record("a", 1)).unwrap();
    queue.append(&record("b", 2)).unwrap();
    queue.drop_first(1).unwrap();

    let handle = queue.metrics_handle();
    assert_eq!(handle.component(), "queue");
    let dump = handle.dump();
    let get = |name: &str| {
        dump.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(get("write.records"), "2");
    assert_eq!(get("dropped.records"), "1");
    assert_eq!(get("last.written"), "2");
    assert_eq!(get("last.deleted"), "1");
}
