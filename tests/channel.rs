// Channel semantics through the public Producer/Consumer API.
// Run with: cargo test --test channel -- --nocapture

use dataport_pipeline::Core::DataportAllocator;
use dataport_pipeline::Core::RegionBacking;
use dataport_pipeline::SPSC::{ChannelParams, OverflowPolicy, ReadPolicy};
use dataport_pipeline::{BridgeError, ChannelBuilder, Message, ProtocolTag};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_write_then_read_returns_identical_message() {
    let (producer, consumer) = ChannelBuilder::new().with_payload_capacity(4096).build().unwrap();

    let message = Message::new(ProtocolTag::EchoTest, b"hello".to_vec());
    assert_eq!(message.len(), 5);
    producer.write(&message).unwrap();

    let received = consumer.read().unwrap().expect("message pending");
    assert_eq!(received, message);
    assert_eq!(consumer.read().unwrap(), None);
}

#[test]
fn test_oversize_write_is_capacity_exceeded_and_leaves_channel_empty() {
    let (producer, consumer) = ChannelBuilder::new().with_payload_capacity(4096).build().unwrap();

    let message = Message::new(ProtocolTag::EchoTest, vec![0xAB; 5000]);
    match producer.write(&message) {
        Err(e @ BridgeError::CapacityExceeded { .. }) => {
            assert_eq!(e.code(), "CAPACITY_EXCEEDED");
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert_eq!(producer.pending(), 0);
    assert_eq!(producer.dropped(), 0);
    assert_eq!(consumer.read().unwrap(), None);

    // The channel is still usable
    producer.write(&Message::new(ProtocolTag::EchoTest, vec![1; 4096])).unwrap();
    assert_eq!(consumer.read().unwrap().unwrap().len(), 4096);
}

#[test]
fn test_blocking_read_wakes_on_notify() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_read_policy(ReadPolicy::Block)
        .build()
        .unwrap();

    let reader = thread::spawn(move || {
        let message = consumer.read().unwrap();
        (message, Instant::now())
    });

    // Let the reader suspend on the event word first
    thread::sleep(Duration::from_millis(20));
    let written_at = Instant::now();
    producer.write(&Message::new(ProtocolTag::EchoTest, b"wake".to_vec())).unwrap();

    let (message, read_at) = reader.join().unwrap();
    assert_eq!(message.unwrap().payload(), b"wake");
    let latency = read_at.saturating_duration_since(written_at);
    println!("blocking read latency: {latency:?}");
    assert!(latency < Duration::from_millis(100));
}

#[test]
fn test_blocking_read_returns_none_once_closed_and_drained() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_depth(4)
        .with_read_policy(ReadPolicy::Block)
        .build()
        .unwrap();

    producer.write(&Message::new(ProtocolTag::EchoTest, b"last".to_vec())).unwrap();
    drop(producer);

    assert_eq!(consumer.read().unwrap().unwrap().payload(), b"last");
    assert_eq!(consumer.read().unwrap(), None);
    assert!(consumer.is_closed());
}

#[test]
fn test_drop_and_count_policy() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_overflow_policy(OverflowPolicy::DropAndCount)
        .build()
        .unwrap();
    assert_eq!(producer.depth(), 1);

    producer.write(&Message::new(ProtocolTag::EchoTest, b"first".to_vec())).unwrap();
    for _ in 0..3 {
        match producer.write(&Message::new(ProtocolTag::EchoTest, b"second".to_vec())) {
            Err(e @ BridgeError::SlotOccupied { .. }) => assert!(e.is_per_message()),
            other => panic!("expected SlotOccupied, got {other:?}"),
        }
    }
    assert_eq!(producer.dropped(), 3);

    assert_eq!(consumer.read().unwrap().unwrap().payload(), b"first");
    assert_eq!(consumer.read().unwrap(), None);
}

#[test]
fn test_block_policy_waits_for_drain() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_overflow_policy(OverflowPolicy::Block)
        .build()
        .unwrap();

    producer.write(&Message::new(ProtocolTag::EchoTest, b"one".to_vec())).unwrap();
    let writer = thread::spawn(move || {
        producer.write(&Message::new(ProtocolTag::EchoTest, b"two".to_vec()))?;
        Ok::<_, BridgeError>(producer)
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_finished(), "writer should be suspended on a full slot");

    assert_eq!(consumer.read().unwrap().unwrap().payload(), b"one");
    let producer = writer.join().unwrap().unwrap();
    assert_eq!(producer.dropped(), 0);
    assert_eq!(
        consumer.try_read_with_timeout(Duration::from_millis(100)).unwrap().payload(),
        b"two"
    );
}

#[test]
fn test_blocked_writer_released_by_close() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_overflow_policy(OverflowPolicy::Block)
        .build()
        .unwrap();

    producer.write(&Message::new(ProtocolTag::EchoTest, b"one".to_vec())).unwrap();
    let writer = thread::spawn(move || producer.write(&Message::new(ProtocolTag::EchoTest, b"two".to_vec())));

    thread::sleep(Duration::from_millis(20));
    drop(consumer);

    match writer.join().unwrap() {
        Err(BridgeError::ChannelClosed { .. }) => {}
        other => panic!("expected ChannelClosed, got {other:?}"),
    }
}

#[test]
fn test_try_read_with_timeout() {
    let (producer, consumer) = ChannelBuilder::new().build().unwrap();

    let start = Instant::now();
    match consumer.try_read_with_timeout(Duration::from_millis(30)) {
        Err(BridgeError::Timeout(d)) => assert_eq!(d, Duration::from_millis(30)),
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(start.elapsed() >= Duration::from_millis(30));

    producer.write(&Message::new(ProtocolTag::Dnp3, vec![0x05, 0x64])).unwrap();
    drop(producer);

    // Pending data is still delivered after close, then the close is reported
    let message = consumer.try_read_with_timeout(Duration::from_millis(30)).unwrap();
    assert_eq!(message.protocol_tag(), ProtocolTag::Dnp3);
    assert!(matches!(
        consumer.try_read_with_timeout(Duration::from_millis(30)),
        Err(BridgeError::ChannelClosed { .. })
    ));
}

#[test]
fn test_write_after_close_fails() {
    let (producer, consumer) = ChannelBuilder::new().build().unwrap();
    consumer.close();
    assert!(matches!(
        producer.write(&Message::new(ProtocolTag::EchoTest, b"x".to_vec())),
        Err(BridgeError::ChannelClosed { .. })
    ));
}

#[test]
fn test_timestamp_and_tag_preserved() {
    let (producer, consumer) = ChannelBuilder::new().with_depth(4).build().unwrap();
    let messages = [
        Message::with_timestamp(ProtocolTag::EchoTest, 1, b"a".to_vec()),
        Message::with_timestamp(ProtocolTag::ModbusTcp, u64::MAX, b"bb".to_vec()),
        Message::with_timestamp(ProtocolTag::Dnp3, 12345, Vec::new()),
    ];
    for message in &messages {
        producer.write(message).unwrap();
    }
    for message in &messages {
        assert_eq!(&consumer.read().unwrap().unwrap(), message);
    }
}

#[test]
fn test_policies_are_per_channel_instance() {
    let params = [
        ChannelParams {
            overflow: OverflowPolicy::Block,
            read_policy: ReadPolicy::Block,
            ..ChannelParams::default()
        },
        ChannelParams::default(),
    ];
    let allocator = DataportAllocator::new(DataportAllocator::required_size(&params), &RegionBacking::Anonymous).unwrap();
    let blocking = allocator.create_channel(&params[0]).unwrap();
    let polling = allocator.create_channel(&params[1]).unwrap();

    assert_eq!(allocator.claim_producer(blocking).unwrap().overflow_policy(), OverflowPolicy::Block);
    assert_eq!(allocator.claim_consumer(blocking).unwrap().read_policy(), ReadPolicy::Block);
    assert_eq!(allocator.claim_producer(polling).unwrap().overflow_policy(), OverflowPolicy::DropAndCount);
    assert_eq!(allocator.claim_consumer(polling).unwrap().read_policy(), ReadPolicy::Poll);
}

#[test]
fn test_endpoints_claimed_once() {
    let params = [ChannelParams::default()];
    let allocator = DataportAllocator::new(DataportAllocator::required_size(&params), &RegionBacking::Anonymous).unwrap();
    let id = allocator.create_channel(&params[0]).unwrap();

    let _producer = allocator.claim_producer(id).unwrap();
    let _consumer = allocator.claim_consumer(id).unwrap();
    assert!(matches!(
        allocator.claim_producer(id),
        Err(BridgeError::EndpointClaimed { side: "producer", .. })
    ));
    assert!(matches!(
        allocator.claim_consumer(id),
        Err(BridgeError::EndpointClaimed { side: "consumer", .. })
    ));
}

#[test]
fn test_invalid_params_rejected() {
    assert!(ChannelBuilder::new().with_depth(3).build().is_err());
    assert!(ChannelBuilder::new().with_depth(128).build().is_err());
    assert!(ChannelBuilder::new().with_payload_capacity(0).build().is_err());
    assert!(ChannelBuilder::new().with_payload_capacity(70_000).build().is_err());
}

#[test]
fn test_builder_from_params() {
    let params = ChannelParams {
        depth: 2,
        payload_capacity: 16,
        overflow: OverflowPolicy::Block,
        read_policy: ReadPolicy::Block,
    };
    let builder = ChannelBuilder::new().with_params(params).with_backing(RegionBacking::Anonymous);
    assert_eq!(builder.params(), &params);

    let (producer, consumer) = builder.build().unwrap();
    assert_eq!(producer.depth(), 2);
    assert_eq!(producer.payload_capacity(), 16);
    assert_eq!(producer.overflow_policy(), OverflowPolicy::Block);
    assert_eq!(consumer.read_policy(), ReadPolicy::Block);
}

#[test]
fn test_unbounded_timeout_waits_without_deadline() {
    let (producer, consumer) = ChannelBuilder::new().with_depth(2).build().unwrap();

    // Ready message: returned at once
    let first = Message::new(ProtocolTag::EchoTest, b"ready".to_vec());
    producer.write(&first).unwrap();
    assert_eq!(consumer.try_read_with_timeout(Duration::MAX).unwrap(), first);

    // Empty channel: waits until the producer shows up
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        producer.write(&Message::new(ProtocolTag::EchoTest, b"late".to_vec())).unwrap();
        producer
    });
    assert_eq!(consumer.try_read_with_timeout(Duration::MAX).unwrap().payload(), b"late");

    drop(writer.join().unwrap());
    assert!(matches!(
        consumer.try_read_with_timeout(Duration::MAX),
        Err(BridgeError::ChannelClosed { .. })
    ));
}

#[test]
fn test_try_read_ignores_blocking_policy() {
    let (producer, consumer) = ChannelBuilder::new()
        .with_read_policy(ReadPolicy::Block)
        .build()
        .unwrap();
    assert_eq!(consumer.try_read().unwrap(), None);

    let message = Message::new(ProtocolTag::ModbusTcp, vec![1, 2, 3]);
    producer.write(&message).unwrap();
    assert_eq!(consumer.try_read().unwrap(), Some(message));
}
