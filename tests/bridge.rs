// Guest bridge: frame validation, both directions, dataport mailboxes and
// the C entry points.

use dataport_pipeline::bridge::{
    decode_frame, encode_frame, Dataport, DATAPORT_CAPACITY, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD,
};
use dataport_pipeline::error::{status, FrameError};
use dataport_pipeline::ffi::{bridge_into_raw, dpb_bridge_free, dpb_bridge_receive, dpb_bridge_submit, dpb_frame_encode};
use dataport_pipeline::Core::RegionBacking;
use dataport_pipeline::SPSC::{Consumer, Producer};
use dataport_pipeline::{
    BridgeError, ChannelBuilder, GuestBridge, Message, PipelineComposer, PipelineConfig, ProtocolTag, RuntimeSettings,
};
use proptest::prelude::*;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A bridge plus the stage-side ends of its two channels.
fn bridge(depth: usize, capacity: usize, max_payload: usize) -> (GuestBridge, Consumer, Producer) {
    let (ingress, from_guest) = ChannelBuilder::new()
        .with_depth(depth)
        .with_payload_capacity(capacity)
        .build()
        .unwrap();
    let (to_guest, egress) = ChannelBuilder::new()
        .with_depth(depth)
        .with_payload_capacity(capacity)
        .build()
        .unwrap();
    (GuestBridge::new("test", ingress, egress, max_payload), from_guest, to_guest)
}

fn frame(tag: u8, declared: u16, timestamp: u64, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![tag];
    raw.extend_from_slice(&declared.to_be_bytes());
    raw.extend_from_slice(&timestamp.to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}

#[test]
fn test_short_frame_is_malformed_and_never_written() {
    let (bridge, from_guest, _) = bridge(4, 4096, 4096);

    match bridge.guest_to_pipeline(&[0x01, 0x00, 0x05]) {
        Err(e @ BridgeError::MalformedInput(FrameError::Truncated { len: 3, needed: 11 })) => {
            assert_eq!(e.code(), "MALFORMED_INPUT");
            assert_eq!(e.status_code(), status::MALFORMED_INPUT);
        }
        other => panic!("expected MalformedInput, got {other:?}"),
    }
    assert_eq!(from_guest.pending(), 0);
    assert_eq!(from_guest.read().unwrap(), None);

    let stats = bridge.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.accepted, 0);
}

#[test]
fn test_frame_decode_errors() {
    assert_eq!(FRAME_HEADER_LEN, 11);
    assert_eq!(decode_frame(&frame(0x01, 2, 0, b"ok"), 16).unwrap().payload(), b"ok");

    assert_eq!(
        decode_frame(&frame(0x09, 2, 0, b"ok"), 16),
        Err(FrameError::UnknownProtocol(0x09))
    );
    assert_eq!(
        decode_frame(&frame(0x01, 17, 0, &[0; 17]), 16),
        Err(FrameError::Oversize { declared: 17, max: 16 })
    );
    // Oversize is judged on the declared length, before the body is looked at
    assert_eq!(
        decode_frame(&frame(0x01, 0xFFFF, 0, &[]), 16),
        Err(FrameError::Oversize { declared: 0xFFFF, max: 16 })
    );
    assert_eq!(
        decode_frame(&frame(0x02, 5, 0, b"abc"), 16),
        Err(FrameError::LengthMismatch { declared: 5, actual: 3 })
    );
    assert_eq!(
        decode_frame(&frame(0x02, 2, 0, b"abc"), 16),
        Err(FrameError::LengthMismatch { declared: 2, actual: 3 })
    );
}

#[test]
fn test_frame_layout_is_big_endian() {
    let message = Message::with_timestamp(ProtocolTag::ModbusTcp, 0x0102_0304_0506_0708, vec![0xAA, 0xBB]);
    let raw = encode_frame(&message).unwrap();
    assert_eq!(
        raw,
        [0x02, 0x00, 0x02, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xAA, 0xBB]
    );
    assert_eq!(decode_frame(&raw, MAX_FRAME_PAYLOAD).unwrap(), message);
}

#[test]
fn test_guest_to_pipeline_restamps() {
    let (bridge, from_guest, _) = bridge(4, 64, 64);
    bridge.guest_to_pipeline(&frame(0x01, 3, u64::MAX, b"abc")).unwrap();

    let message = from_guest.read().unwrap().unwrap();
    assert_eq!(message.protocol_tag(), ProtocolTag::EchoTest);
    assert_eq!(message.payload(), b"abc");
    assert_ne!(message.timestamp(), u64::MAX);
    assert_eq!(bridge.stats().accepted, 1);
}

#[test]
fn test_max_payload_clamped_to_channel() {
    let (bridge, from_guest, _) = bridge(1, 64, 4096);
    assert_eq!(bridge.ingress().max_payload(), 64);

    // A frame the channel could never hold is malformed, not a capacity error
    let result = bridge.guest_to_pipeline(&frame(0x01, 65, 0, &[0; 65]));
    assert!(matches!(
        result,
        Err(BridgeError::MalformedInput(FrameError::Oversize { declared: 65, max: 64 }))
    ));
    assert_eq!(from_guest.pending(), 0);
}

#[test]
fn test_full_ingress_reported_as_write_failure() {
    let (bridge, _from_guest, _) = bridge(1, 64, 64);
    bridge.guest_to_pipeline(&frame(0x01, 1, 0, b"a")).unwrap();
    assert!(matches!(
        bridge.guest_to_pipeline(&frame(0x01, 1, 0, b"b")),
        Err(BridgeError::SlotOccupied { .. })
    ));
    let stats = bridge.stats();
    assert_eq!((stats.accepted, stats.rejected, stats.write_failures), (1, 0, 1));
}

#[test]
fn test_pipeline_to_guest_frames_messages() {
    let (bridge, _, to_guest) = bridge(4, 64, 64);
    let message = Message::with_timestamp(ProtocolTag::Dnp3, 99, vec![0x05, 0x64]);
    to_guest.write(&message).unwrap();

    let raw = bridge.receive(Duration::from_millis(100)).unwrap();
    assert_eq!(decode_frame(&raw, 64).unwrap(), message);
    assert_eq!(bridge.stats().delivered, 1);

    assert!(matches!(
        bridge.receive(Duration::from_millis(10)),
        Err(BridgeError::Timeout(_))
    ));
    assert_eq!(bridge.egress().try_receive().unwrap(), None);

    drop(to_guest);
    assert!(matches!(
        bridge.receive(Duration::from_millis(10)),
        Err(BridgeError::ChannelClosed { .. })
    ));
}

#[test]
fn test_try_receive_never_blocks_on_blocking_egress() {
    let mut pipeline = PipelineComposer::new(RuntimeSettings::default())
        .build(&PipelineConfig::echo_loopback().topology)
        .unwrap();
    let bridge = pipeline.take_bridge("guest").unwrap();
    let handle = bridge_into_raw(bridge);

    // The egress channel reads with ReadPolicy::Block; polling must still return
    let (tx, rx) = mpsc::channel();
    let handle_addr = handle as usize;
    thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut len = buf.len();
        let code = unsafe { dpb_bridge_receive(handle_addr as *mut _, 0, buf.as_mut_ptr(), &mut len) };
        let _ = tx.send(code);
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(status::EMPTY));

    unsafe {
        let raw = frame(0x01, 4, 0, b"ping");
        assert_eq!(dpb_bridge_submit(handle, raw.as_ptr(), raw.len()), status::SUCCESS);

        let mut buf = [0u8; 64];
        let mut len = buf.len();
        assert_eq!(dpb_bridge_receive(handle, 1000, buf.as_mut_ptr(), &mut len), status::SUCCESS);
        assert_eq!(decode_frame(&buf[..len], 64).unwrap().payload(), b"ping");
        dpb_bridge_free(handle);
    }
    pipeline.shutdown();
}

#[test]
fn test_dataport_waits_without_deadline() {
    let port = Dataport::new(&RegionBacking::Anonymous).unwrap();
    let sender = port.sender().unwrap();
    let receiver = port.receiver().unwrap();

    let guest = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sender.post(b"late").unwrap();
        sender.wait_ack(Duration::MAX).unwrap()
    });
    assert_eq!(receiver.wait(Duration::MAX).unwrap(), b"late");
    receiver.ack(status::VALIDATION_DROP);
    assert_eq!(guest.join().unwrap(), status::VALIDATION_DROP);
}

#[test]
fn test_dataport_round_trip_and_busy() {
    let port = Dataport::new(&RegionBacking::Anonymous).unwrap();
    let sender = port.sender().unwrap();
    let receiver = port.receiver().unwrap();
    assert!(port.sender().is_err());
    assert!(port.receiver().is_err());

    sender.post(b"first").unwrap();
    assert!(port.is_pending());
    assert!(matches!(sender.post(b"second"), Err(BridgeError::DataportBusy)));
    assert!(matches!(
        sender.wait_ack(Duration::from_millis(10)),
        Err(BridgeError::Timeout(_))
    ));

    assert_eq!(receiver.wait(Duration::from_millis(100)).unwrap(), b"first");
    receiver.ack(status::VALIDATION_DROP);
    assert!(!port.is_pending());
    assert_eq!(sender.wait_ack(Duration::from_millis(100)).unwrap(), status::VALIDATION_DROP);

    sender.post(b"second").unwrap();
    assert_eq!(receiver.wait(Duration::from_millis(100)).unwrap(), b"second");
    receiver.ack_ok();
    assert_eq!(sender.wait_ack(Duration::from_millis(100)).unwrap(), status::SUCCESS);

    assert!(matches!(
        sender.post(&vec![0; DATAPORT_CAPACITY + 1]),
        Err(BridgeError::CapacityExceeded { .. })
    ));
    assert!(matches!(
        receiver.wait(Duration::from_millis(10)),
        Err(BridgeError::Timeout(_))
    ));
}

#[test]
fn test_service_dataport_acks_outcome() {
    let (bridge, from_guest, to_guest) = bridge(4, 256, 256);
    let (ingress, egress) = bridge.split();

    let inbound = Dataport::new(&RegionBacking::Anonymous).unwrap();
    let guest_tx = inbound.sender().unwrap();
    let bridge_rx = inbound.receiver().unwrap();

    let service = thread::spawn(move || {
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(ingress.service_dataport(&bridge_rx, Duration::from_secs(1)).map_err(|e| e.code()));
        }
        outcomes
    });

    guest_tx.post(&frame(0x01, 4, 0, b"ping")).unwrap();
    assert_eq!(guest_tx.wait_ack(Duration::from_secs(1)).unwrap(), status::SUCCESS);
    guest_tx.post(&[0xFF; 5]).unwrap();
    assert_eq!(guest_tx.wait_ack(Duration::from_secs(1)).unwrap(), status::MALFORMED_INPUT);

    assert_eq!(service.join().unwrap(), vec![Ok(()), Err("MALFORMED_INPUT")]);
    assert_eq!(from_guest.read().unwrap().unwrap().payload(), b"ping");
    assert_eq!(from_guest.read().unwrap(), None);

    // Outbound: the bridge posts, the guest acknowledges
    let outbound = Dataport::new(&RegionBacking::Anonymous).unwrap();
    let bridge_tx = outbound.sender().unwrap();
    let guest_rx = outbound.receiver().unwrap();
    to_guest.write(&Message::new(ProtocolTag::EchoTest, b"pong".to_vec())).unwrap();

    let guest = thread::spawn(move || {
        let raw = guest_rx.wait(Duration::from_secs(1)).unwrap();
        guest_rx.ack_ok();
        raw
    });
    assert_eq!(egress.deliver_to_dataport(&bridge_tx, Duration::from_secs(1)).unwrap(), status::SUCCESS);
    let raw = guest.join().unwrap();
    assert_eq!(decode_frame(&raw, 256).unwrap().payload(), b"pong");
}

#[test]
fn test_ffi_submit_and_receive() {
    let (bridge, from_guest, to_guest) = bridge(4, 64, 64);
    let handle = bridge_into_raw(bridge);

    unsafe {
        let raw = frame(0x01, 2, 0, b"hi");
        assert_eq!(dpb_bridge_submit(handle, raw.as_ptr(), raw.len()), status::SUCCESS);
        assert_eq!(dpb_bridge_submit(handle, raw.as_ptr(), 3), status::MALFORMED_INPUT);
        assert_eq!(dpb_bridge_submit(std::ptr::null_mut(), raw.as_ptr(), raw.len()), status::NULL_POINTER);
        assert_eq!(from_guest.read().unwrap().unwrap().payload(), b"hi");

        let mut buf = [0u8; 64];
        let mut len = buf.len();
        assert_eq!(dpb_bridge_receive(handle, 0, buf.as_mut_ptr(), &mut len), status::EMPTY);

        to_guest.write(&Message::with_timestamp(ProtocolTag::EchoTest, 5, b"back".to_vec())).unwrap();

        // Short buffer: the needed size is reported and the frame is kept
        let mut short = [0u8; 4];
        let mut len = short.len();
        assert_eq!(
            dpb_bridge_receive(handle, 10, short.as_mut_ptr(), &mut len),
            status::CAPACITY_EXCEEDED
        );
        assert_eq!(len, FRAME_HEADER_LEN + 4);

        let mut len = buf.len();
        assert_eq!(dpb_bridge_receive(handle, 0, buf.as_mut_ptr(), &mut len), status::SUCCESS);
        assert_eq!(
            decode_frame(&buf[..len], 64).unwrap(),
            Message::with_timestamp(ProtocolTag::EchoTest, 5, b"back".to_vec())
        );

        let mut len = buf.len();
        assert_eq!(dpb_bridge_receive(handle, 5, buf.as_mut_ptr(), &mut len), status::TIMEOUT);

        dpb_bridge_free(handle);
    }
}

#[test]
fn test_ffi_frame_encode() {
    let mut buf = [0u8; 32];
    unsafe {
        let mut len = buf.len();
        let code = dpb_frame_encode(0x03, 7, b"dnp".as_ptr(), 3, buf.as_mut_ptr(), &mut len);
        assert_eq!(code, status::SUCCESS);
        assert_eq!(len, FRAME_HEADER_LEN + 3);
        assert_eq!(
            decode_frame(&buf[..len], 64).unwrap(),
            Message::with_timestamp(ProtocolTag::Dnp3, 7, b"dnp".to_vec())
        );

        let mut len = buf.len();
        assert_eq!(
            dpb_frame_encode(0x7F, 0, b"x".as_ptr(), 1, buf.as_mut_ptr(), &mut len),
            status::INVALID_ARG
        );

        let mut len = 4;
        assert_eq!(
            dpb_frame_encode(0x01, 0, b"xyz".as_ptr(), 3, buf.as_mut_ptr(), &mut len),
            status::CAPACITY_EXCEEDED
        );
        assert_eq!(len, FRAME_HEADER_LEN + 3);
    }
}

proptest! {
    #[test]
    fn prop_arbitrary_bytes_never_reach_channel_unless_well_formed(
        raw in prop::collection::vec(any::<u8>(), 0..96),
    ) {
        let (bridge, from_guest, _) = bridge(4, 64, 64);
        let expected = decode_frame(&raw, 64);
        let result = bridge.guest_to_pipeline(&raw);

        match expected {
            Ok(message) => {
                prop_assert!(result.is_ok());
                let written = from_guest.read().unwrap().unwrap();
                prop_assert_eq!(written.protocol_tag(), message.protocol_tag());
                prop_assert_eq!(written.payload(), message.payload());
            }
            Err(_) => {
                prop_assert!(matches!(result, Err(BridgeError::MalformedInput(_))));
                prop_assert_eq!(from_guest.pending(), 0);
            }
        }
    }

    #[test]
    fn prop_encoded_frames_decode(
        tag in prop::sample::select(ProtocolTag::ALL.to_vec()),
        timestamp in any::<u64>(),
        payload in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let message = Message::with_timestamp(tag, timestamp, payload);
        let raw = encode_frame(&message).unwrap();
        prop_assert_eq!(raw.len(), FRAME_HEADER_LEN + message.len());
        prop_assert_eq!(decode_frame(&raw, 128).unwrap(), message);
    }
}
