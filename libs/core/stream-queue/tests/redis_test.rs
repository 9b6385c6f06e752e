//! Redis-backed queue tests. Require Docker: `cargo test -- --ignored`.

use stream_queue::{
    BatchEntry, BatchQueue, ConsumerConfig, DeadLetter, DeadLetterSink, DlqManager, MessageKey,
    StreamConsumer, StreamError, StreamProducer,
};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRedis};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_producer_batch_reaches_consumer_in_order() {
    let redis = TestRedis::new().await;
    let data = TestDataBuilder::from_test_name("test_producer_batch_reaches_consumer_in_order");
    let stream = data.stream("welcome");

    let producer = StreamProducer::new(redis.connection(), stream.clone()).with_max_batch_size(3);
    let consumer = StreamConsumer::new(
        redis.connection(),
        ConsumerConfig::new(stream.clone(), "senders").with_blocking(None),
    );
    consumer.ensure_consumer_group().await.unwrap();
    // Second call hits BUSYGROUP and must still succeed
    consumer.ensure_consumer_group().await.unwrap();

    let entries = vec![
        BatchEntry::new("a", r#"{"n":1}"#),
        BatchEntry::new("b", r#"{"n":2}"#),
        BatchEntry::new("c", r#"{"n":3}"#),
    ];
    let outcomes = producer.submit_batch(&entries).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_accepted()));
    assert_eq!(producer.stream_length().await.unwrap(), 3);

    let events = consumer.read_new().await.unwrap();
    let ids: Vec<_> = events
        .iter()
        .map(|e| e.field(MessageKey::JobId).unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    // Unacknowledged entries come back as pending
    assert_eq!(consumer.read_pending().await.unwrap().len(), 3);

    let stream_ids: Vec<String> = events.iter().map(|e| e.stream_id.clone()).collect();
    assert_eq!(consumer.ack(&stream_ids).await.unwrap(), 3);
    assert!(consumer.read_pending().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_producer_rejects_oversized_and_duplicate_batches() {
    let redis = TestRedis::new().await;
    let producer = StreamProducer::new(redis.connection(), "test:limits").with_max_batch_size(2);

    let oversized = vec![
        BatchEntry::new("a", "{}"),
        BatchEntry::new("b", "{}"),
        BatchEntry::new("c", "{}"),
    ];
    assert!(matches!(
        producer.submit_batch(&oversized).await,
        Err(StreamError::BatchTooLarge { size: 3, max: 2 })
    ));

    let duplicated = vec![BatchEntry::new("a", "{}"), BatchEntry::new("a", "{}")];
    assert!(matches!(
        producer.submit_batch(&duplicated).await,
        Err(StreamError::DuplicateEntryId(_))
    ));

    assert_eq!(producer.stream_length().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dlq_record_list_and_purge() {
    let redis = TestRedis::new().await;
    let dlq = DlqManager::new(redis.connection(), "test:dlq");

    let first = dlq
        .record(DeadLetter::new("ingestion", "m-1", "{bad", "expected value").with_attempts(1))
        .await
        .unwrap();
    dlq.record(DeadLetter::new("fan_out", "u1-abc", "{}", "queue down").with_attempts(3))
        .await
        .unwrap();

    let stats = dlq.stats().await.unwrap();
    assert_eq!(stats.length, 2);
    assert_eq!(stats.oldest_entry_id.as_deref(), Some(first.as_str()));

    let letters = dlq.list(10, None).await.unwrap();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[0].1.payload, "{bad");
    assert_eq!(letters[1].1.attempts, 3);

    assert!(dlq.delete(&first).await.unwrap());
    assert_eq!(dlq.purge().await.unwrap(), 1);
    assert_eq!(dlq.stats().await.unwrap().length, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_entries_left_by_another_consumer_are_claimed() {
    let redis = TestRedis::new().await;
    let data = TestDataBuilder::from_test_name("test_entries_left_by_another_consumer_are_claimed");
    let stream = data.stream("changes");

    let producer = StreamProducer::new(redis.connection(), stream.clone()).with_max_batch_size(5);
    let config = ConsumerConfig::new(stream.clone(), "fan_out")
        .with_batch_size(2)
        .with_blocking(None);
    let crashed = StreamConsumer::new(redis.connection(), config.clone().with_consumer_id("worker-a"));
    let restarted = StreamConsumer::new(redis.connection(), config.with_consumer_id("worker-b"));
    crashed.ensure_consumer_group().await.unwrap();

    let entries: Vec<BatchEntry> = (0..5).map(|n| BatchEntry::new(format!("e{}", n), "{}")).collect();
    producer.submit_batch(&entries).await.unwrap();

    // worker-a reads everything and never acknowledges
    let mut read = 0;
    loop {
        let events = crashed.read_new().await.unwrap();
        if events.is_empty() {
            break;
        }
        read += events.len();
    }
    assert_eq!(read, 5);
    assert!(restarted.read_pending().await.unwrap().is_empty());
    assert!(restarted.read_new().await.unwrap().is_empty());

    let idle = Duration::from_millis(50);
    // Not idle long enough yet
    assert!(restarted.claim_abandoned(Duration::from_secs(60)).await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Claims come in batch-sized slices until the backlog is drained
    let mut claimed = Vec::new();
    loop {
        let events = restarted.claim_abandoned(idle).await.unwrap();
        if events.is_empty() {
            break;
        }
        assert!(events.len() <= 2);
        claimed.extend(events);
    }
    assert_eq!(claimed.len(), 5);

    assert!(crashed.read_pending().await.unwrap().is_empty());
    let ids: Vec<String> = claimed.iter().map(|e| e.stream_id.clone()).collect();
    assert_eq!(restarted.ack(&ids).await.unwrap(), 5);
    assert!(restarted.read_pending().await.unwrap().is_empty());
}
