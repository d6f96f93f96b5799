// Guest ⇄ echo stage round trip through two dataport mailboxes.
//
//   cargo run --example echo_guest -- <num_messages> [config.toml]
//
// The main thread plays the guest: it frames "message_<i>:<sha256>" payloads,
// posts them to the inbound mailbox and checks every echo that comes back on
// the outbound mailbox. One deliberately malformed frame shows the bridge
// rejecting input before it reaches any channel.

use dataport_pipeline::bridge::{decode_frame, encode_frame, Dataport};
use dataport_pipeline::error::status;
use dataport_pipeline::logging::init_tracing;
use dataport_pipeline::Core::RegionBacking;
use dataport_pipeline::{BridgeError, Message, PipelineComposer, PipelineConfig, ProtocolTag};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_millis(100);

fn main() -> Result<(), BridgeError> {
    init_tracing("info,dataport_pipeline=debug");

    let args: Vec<String> = env::args().collect();
    let num_messages: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let config = match args.get(2) {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::echo_loopback(),
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    // Handle Ctrl+C to stop the guest loop
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    let mut pipeline = PipelineComposer::new(config.runtime.clone()).build(&config.topology)?;
    let bridge_name = config
        .topology
        .bridges
        .first()
        .map(|b| b.name.clone())
        .expect("topology declares no bridge");
    let (ingress, egress) = pipeline.take_bridge(&bridge_name).expect("bridge already taken").split();

    let inbound = Dataport::new(&RegionBacking::Anonymous)?;
    let outbound = Dataport::new(&RegionBacking::Anonymous)?;
    let guest_tx = inbound.sender()?;
    let guest_rx = outbound.receiver()?;
    let bridge_rx = inbound.receiver()?;
    let bridge_tx = outbound.sender()?;

    let ingress_running = Arc::clone(&running);
    let ingress_thread = thread::spawn(move || {
        while ingress_running.load(Ordering::Acquire) {
            match ingress.service_dataport(&bridge_rx, WAIT) {
                Ok(()) | Err(BridgeError::Timeout(_)) | Err(BridgeError::MalformedInput(_)) => {}
                Err(e) => eprintln!("ingress: {e}"),
            }
        }
        ingress.stats()
    });

    let egress_running = Arc::clone(&running);
    let egress_thread = thread::spawn(move || {
        while egress_running.load(Ordering::Acquire) {
            match egress.deliver_to_dataport(&bridge_tx, Duration::from_secs(1)) {
                Ok(_) | Err(BridgeError::Timeout(_)) => {}
                Err(BridgeError::ChannelClosed { .. }) => break,
                Err(e) => eprintln!("egress: {e}"),
            }
        }
    });

    // A 3-byte frame cannot hold the 11-byte header
    guest_tx.post(&[0x01, 0x00, 0x05])?;
    let code = guest_tx.wait_ack(Duration::from_secs(1))?;
    println!("Guest: truncated frame acked with {code} (MALFORMED_INPUT = {})", status::MALFORMED_INPUT);

    println!("Guest: sending {num_messages} framed hashes...");
    let start = Instant::now();
    let mut verified = 0;
    for i in 0..num_messages {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let hash = format!("{:x}", Sha256::digest(format!("message_{i}").as_bytes()));
        let payload = format!("{i}:{hash}");
        let frame = encode_frame(&Message::new(ProtocolTag::EchoTest, payload.as_bytes()))?;

        guest_tx.post(&frame)?;
        let code = guest_tx.wait_ack(Duration::from_secs(1))?;
        if code != status::SUCCESS {
            eprintln!("Guest: message {i} refused with {code}");
            continue;
        }

        let echoed = guest_rx.wait(Duration::from_secs(1))?;
        guest_rx.ack_ok();
        let message = decode_frame(&echoed, usize::MAX)?;
        match std::str::from_utf8(message.payload()).ok().and_then(|s| s.split_once(':')) {
            Some((index, digest))
                if index == i.to_string()
                    && digest == format!("{:x}", Sha256::digest(format!("message_{index}").as_bytes())) =>
            {
                verified += 1;
            }
            _ => eprintln!("Guest: echo {i} failed verification"),
        }
    }

    let elapsed = start.elapsed();
    println!("Guest: verified {verified}/{num_messages} echoes in {elapsed:.2?}");

    running.store(false, Ordering::SeqCst);
    let stats = ingress_thread.join().expect("ingress thread panicked");
    let _ = egress_thread.join();
    for report in pipeline.shutdown() {
        println!("{report:?}");
    }
    println!("Bridge: {stats:?}");
    Ok(())
}
