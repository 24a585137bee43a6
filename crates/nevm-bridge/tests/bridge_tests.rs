//! End-to-end bridge tests: a simulated consensus node publishes
//! notifications, a bridge session answers them over real TCP sockets.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nevm_bridge::{
    Ack, AckListener, AnnounceHashes, BridgeError, BridgeSession, ConsensusNotifier, HashSource,
    LoopState, NonceHashSource, SessionConfig,
};
use nevm_bus::{BusError, Context};
use nevm_core::{encode_block_connect, hash_sha256d, BlockConnect, CoreError, Topic};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    consensus_ctx: Context,
    notifier: ConsensusNotifier,
    acks: AckListener,
    session: BridgeSession,
}

async fn setup(topics: &[Topic]) -> Harness {
    setup_with_hash_source(topics, Arc::new(NonceHashSource)).await
}

async fn setup_with_hash_source(topics: &[Topic], hash_source: Arc<dyn HashSource>) -> Harness {
    let consensus_ctx = Context::new("consensus");
    let notifier = ConsensusNotifier::bind(&consensus_ctx, "tcp://127.0.0.1:0")
        .await
        .unwrap();
    let consensus_address = format!("tcp://{}", notifier.local_addr());

    let config = SessionConfig::new(topics, &consensus_address, "tcp://127.0.0.1:0")
        .with_receive_timeout(Duration::from_millis(200));
    let session = BridgeSession::start_with_hash_source(config, hash_source)
        .await
        .unwrap();

    let execution_address = format!("tcp://{}", session.execution_addr(topics[0]).unwrap());
    let acks = AckListener::connect(&consensus_ctx, &execution_address, topics, TIMEOUT)
        .await
        .unwrap();

    notifier.wait_for_subscribers(topics, TIMEOUT).await.unwrap();
    for topic in topics {
        session.wait_for_ack_subscribers(*topic, TIMEOUT).await.unwrap();
    }

    Harness {
        consensus_ctx,
        notifier,
        acks,
        session,
    }
}

#[tokio::test]
async fn test_connect_notification_acknowledged_once() {
    let mut h = setup(&[Topic::BlockConnect]).await;

    let connect = BlockConnect::new(hash_sha256d(b"block 1"), Vec::new(), false);
    let body = encode_block_connect(&connect).unwrap();
    assert_eq!(body.len(), 37);
    h.notifier.notify_connect(&connect).unwrap();

    let envelope = h.acks.next_envelope(TIMEOUT).await.unwrap();
    assert_eq!(&envelope.topic[..], b"nevmblockconnect");
    assert_eq!(&envelope.body[..], b"connected");
    assert_eq!(envelope.sequence, None);

    let extra = h.acks.next_envelope(Duration::from_millis(300)).await;
    assert!(matches!(extra, Err(BridgeError::Bus(BusError::Timeout))));

    h.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_notification_acknowledged() {
    let mut h = setup(&[Topic::BlockDisconnect]).await;

    h.notifier.notify_disconnect().unwrap();

    let envelope = h.acks.next_envelope(TIMEOUT).await.unwrap();
    assert_eq!(&envelope.topic[..], b"nevmblockdisconnect");
    assert_eq!(&envelope.body[..], b"disconnected");

    h.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_block_notification_answered_with_announce() {
    let mut h = setup(&[Topic::Block]).await;

    h.notifier.notify_block(Bytes::new()).unwrap();

    match h.acks.next_ack(TIMEOUT).await.unwrap() {
        Ack::Block(announce) => {
            assert!(!announce.topic_hash.is_zero());
            assert!(!announce.block_hash.is_zero());
            assert!(!announce.state_hash.is_zero());
            assert_eq!(announce.topic, b"nevmblock".to_vec());
        }
        other => panic!("unexpected ack {:?}", other),
    }

    h.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_every_ack_matches_its_topic() {
    let mut h = setup(&Topic::ALL).await;

    for i in 0..5u8 {
        h.notifier.notify_block(Bytes::new()).unwrap();
        h.notifier
            .notify_connect(&BlockConnect::new(hash_sha256d(&[i]), vec![i; 8], true))
            .unwrap();
        h.notifier.notify_disconnect().unwrap();
    }

    let mut counts = std::collections::HashMap::new();
    for _ in 0..15 {
        let ack = h.acks.next_ack(TIMEOUT).await.unwrap();
        *counts.entry(ack.topic()).or_insert(0) += 1;
    }
    for topic in Topic::ALL {
        assert_eq!(counts.get(&topic), Some(&5), "acks for {}", topic);
    }

    h.session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_while_blocked_in_receive() {
    let mut h = setup(&Topic::ALL).await;
    let execution_addr = h.session.execution_addr(Topic::Block).unwrap();

    // Let every loop settle into receive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for (_, state) in h.session.states() {
        assert!(!state.is_terminal());
    }

    tokio::time::timeout(Duration::from_secs(5), h.session.stop())
        .await
        .expect("stop exceeded grace period")
        .unwrap();

    for (topic, state) in h.session.states() {
        assert_eq!(state, LoopState::Stopped, "{} not stopped", topic);
    }
    assert!(h.session.is_stopped());

    // The execution-side socket has been released.
    TcpListener::bind(execution_addr).await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = setup(&Topic::ALL).await;

    h.session.stop().await.unwrap();
    h.session.stop().await.unwrap();
    assert!(h.session.is_stopped());
    assert_eq!(h.session.running_loops(), 0);
}

#[tokio::test]
async fn test_malformed_connect_payload_is_fatal() {
    let mut h = setup(&[Topic::BlockConnect, Topic::BlockDisconnect]).await;

    // Declares 32 bytes of block data but carries none of it.
    let mut truncated = hash_sha256d(b"block").to_vec();
    truncated.extend_from_slice(&32u32.to_le_bytes());
    h.notifier
        .publish_raw(Topic::BlockConnect, truncated)
        .unwrap();

    let (topic, outcome) = tokio::time::timeout(TIMEOUT, h.session.next_exit())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, Topic::BlockConnect);
    assert!(matches!(
        outcome,
        Err(BridgeError::Core(CoreError::MalformedPayload(_)))
    ));
    assert!(h
        .session
        .states()
        .contains(&(Topic::BlockConnect, LoopState::Failed)));

    // The other loop keeps answering until the session is stopped.
    h.notifier.notify_disconnect().unwrap();
    assert_eq!(h.acks.next_ack(TIMEOUT).await.unwrap(), Ack::Disconnected);
    assert!(!h.consensus_ctx.is_terminated());

    h.session.stop().await.unwrap();
}

struct PanickingHashSource;

impl HashSource for PanickingHashSource {
    fn announce_hashes(&self, _topic: Topic, _notification: &[u8]) -> AnnounceHashes {
        panic!("hash source failed");
    }
}

#[tokio::test]
async fn test_panicked_loop_reported_under_its_topic() {
    let mut h =
        setup_with_hash_source(&[Topic::BlockDisconnect, Topic::Block], Arc::new(PanickingHashSource))
            .await;

    h.notifier.notify_block(Bytes::new()).unwrap();

    let (topic, outcome) = tokio::time::timeout(TIMEOUT, h.session.next_exit())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, Topic::Block);
    match outcome {
        Err(BridgeError::TaskFailed { topic, reason }) => {
            assert_eq!(topic, Topic::Block);
            assert!(reason.contains("panicked"), "{}", reason);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let states = h.session.states();
    assert!(states.contains(&(Topic::Block, LoopState::Failed)));
    assert!(!states.contains(&(Topic::BlockDisconnect, LoopState::Failed)));

    // The surviving loop still answers.
    h.notifier.notify_disconnect().unwrap();
    assert_eq!(h.acks.next_ack(TIMEOUT).await.unwrap(), Ack::Disconnected);

    h.session.stop().await.unwrap();
}
