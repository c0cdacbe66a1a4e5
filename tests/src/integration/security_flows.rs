//! # Security Flows
//!
//! Hub-side screening and per-bridge throttling with several peers sending at
//! once.
//!
//! ## Flows Tested:
//!
//! 1. **Volume ceiling**: one noisy peer is cut off without affecting the others
//! 2. **Control traffic**: registry requests count toward the ceiling
//! 3. **Rate limits**: counters are kept per sender and reset with the window
//! 4. **Screening**: malformed and mistyped data never reaches a bridge
//! 5. **Disconnect**: departed peers start over with fresh counters

#[cfg(test)]
mod tests {
    use bridgewire_bus::testing::LoopbackNetwork;
    use bridgewire_bus::{
        BridgeConfig, BridgeError, Endpoint, OverflowDecision, Payload, PeerId, SecurityHook,
        Sender, Target, TypeContract, ValueKind,
    };
    use bridgewire_telemetry::{drop_reason, MESSAGES_DROPPED};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Cluster {
        network: LoopbackNetwork,
        hub: Endpoint,
        peers: Vec<(PeerId, Endpoint)>,
    }

    fn cluster_with(hub_config: BridgeConfig, peers: usize) -> Cluster {
        let network = LoopbackNetwork::new();
        let hub = Endpoint::hub(hub_config, network.hub_transport()).unwrap();
        let peers = (0..peers)
            .map(|_| {
                let (id, transport) = network.add_peer();
                let peer = Endpoint::peer(BridgeConfig::default(), transport).unwrap();
                hub.peer_connected(id).unwrap();
                (id, peer)
            })
            .collect();
        Cluster {
            network,
            hub,
            peers,
        }
    }

    fn volume_config(ceiling: u32, window: Duration) -> BridgeConfig {
        BridgeConfig {
            volume_ceiling: ceiling,
            volume_window: window,
            ..BridgeConfig::default()
        }
    }

    fn counter() -> (Arc<AtomicU32>, impl Fn(&Sender, &Payload) + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let sink = count.clone();
        (count, move |_: &Sender, _: &Payload| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn dropped(reason: &str) -> f64 {
        MESSAGES_DROPPED.with_label_values(&[reason]).get()
    }

    // =============================================================================
    // VOLUME CEILING
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_volume_ceiling_isolates_noisy_peer() {
        let c = cluster_with(volume_config(5, Duration::from_secs(1)), 2);
        let (noisy_id, noisy) = &c.peers[0];
        let (_, quiet) = &c.peers[1];

        let overflows = Arc::new(Mutex::new(Vec::new()));
        let log = overflows.clone();
        c.hub
            .install_security_hook(SecurityHook::volume_overflow(move |peer, count| {
                log.lock().push((*peer, count));
            }))
            .unwrap();

        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let (delivered, cb) = counter();
        hub_chat.connect(cb).unwrap();

        let noisy_chat = noisy.bridge("Chat").await.unwrap();
        let quiet_chat = quiet.bridge("Chat").await.unwrap();
        for i in 0..8 {
            noisy_chat.publish(Target::Hub, json!([i])).unwrap();
        }
        quiet_chat.publish(Target::Hub, json!(["a"])).unwrap();
        quiet_chat.publish(Target::Hub, json!(["b"])).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 7);
        assert_eq!(
            *overflows.lock(),
            vec![(*noisy_id, 6), (*noisy_id, 7), (*noisy_id, 8)]
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        noisy_chat.publish(Target::Hub, json!(["calm"])).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_requests_count_toward_volume() {
        let c = cluster_with(volume_config(1, Duration::from_secs(10)), 1);
        let (peer_id, peer) = &c.peers[0];

        let overflows = Arc::new(Mutex::new(Vec::new()));
        let log = overflows.clone();
        c.hub
            .install_security_hook(SecurityHook::volume_overflow(move |peer, count| {
                log.lock().push((*peer, count));
            }))
            .unwrap();

        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let (delivered, cb) = counter();
        hub_chat.connect(cb).unwrap();
        let peer_chat = peer.bridge("Chat").await.unwrap();

        // Unknown name: one Request to the hub, then the bounded wait expires.
        let ghost = peer.identifier("Ghost").await.unwrap();
        assert_eq!(ghost.as_str(), "Ghost");

        peer_chat.publish(Target::Hub, json!(["late"])).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(*overflows.lock(), vec![(*peer_id, 2)]);
    }

    // =============================================================================
    // RATE LIMITS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_counts_each_sender_separately() {
        let c = cluster_with(BridgeConfig::default(), 2);
        let (first_id, first) = &c.peers[0];
        let (_, second) = &c.peers[1];

        let hub_move = c.hub.bridge("Move").await.unwrap();
        let (delivered, cb) = counter();
        hub_move.connect(cb).unwrap();

        let overflowed = Arc::new(Mutex::new(Vec::new()));
        let log = overflowed.clone();
        hub_move
            .set_rate_limit(2, move |sender, count| {
                log.lock().push((*sender, count));
                OverflowDecision::Reject
            })
            .unwrap();

        let first_move = first.bridge("Move").await.unwrap();
        let second_move = second.bridge("Move").await.unwrap();
        for _ in 0..3 {
            first_move.publish(Target::Hub, json!([1, 1])).unwrap();
        }
        for _ in 0..2 {
            second_move.publish(Target::Hub, json!([2, 2])).unwrap();
        }

        assert_eq!(delivered.load(Ordering::SeqCst), 4);
        assert_eq!(*overflowed.lock(), vec![(Sender::Peer(*first_id), 3)]);

        tokio::time::advance(Duration::from_secs(1)).await;
        first_move.publish(Target::Hub, json!([1, 1])).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_handler_can_admit_bursts() {
        let c = cluster_with(BridgeConfig::default(), 1);
        let (_, peer) = &c.peers[0];

        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let (delivered, cb) = counter();
        hub_chat.connect(cb).unwrap();
        hub_chat
            .set_rate_limit(1, |_, count| {
                if count <= 3 {
                    OverflowDecision::Allow
                } else {
                    OverflowDecision::Reject
                }
            })
            .unwrap();

        let peer_chat = peer.bridge("Chat").await.unwrap();
        for _ in 0..5 {
            peer_chat.publish(Target::Hub, ()).unwrap();
        }

        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }

    // =============================================================================
    // SCREENING
    // =============================================================================

    #[tokio::test]
    async fn test_bad_traffic_never_reaches_bridges() {
        let c = cluster_with(BridgeConfig::default(), 1);
        let (peer_id, peer) = &c.peers[0];

        c.hub
            .expect_types(
                "Move",
                TypeContract::new(vec![ValueKind::Number, ValueKind::Number]),
            )
            .unwrap();
        let mismatched = Arc::new(AtomicU32::new(0));
        let hook = mismatched.clone();
        c.hub
            .install_security_hook(SecurityHook::type_mismatch(move |_| {
                hook.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let hub_move = c.hub.bridge("Move").await.unwrap();
        let (delivered, cb) = counter();
        hub_move.connect(cb).unwrap();

        let malformed_before = dropped(drop_reason::MALFORMED_SHAPE);

        // No malformed-shape hook installed: dropped silently.
        c.network
            .inject(*peer_id, hub_move.token().unwrap(), json!("not an array"));
        c.network
            .inject(*peer_id, hub_move.token().unwrap(), json!({"x": 1, "y": 2}));

        let peer_move = peer.bridge("Move").await.unwrap();
        peer_move.publish(Target::Hub, json!([1, "two"])).unwrap();
        peer_move.publish(Target::Hub, json!([1])).unwrap();
        peer_move.publish(Target::Hub, json!([3, 4])).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(mismatched.load(Ordering::SeqCst), 2);
        assert!(dropped(drop_reason::MALFORMED_SHAPE) >= malformed_before + 2.0);
    }

    #[tokio::test]
    async fn test_peers_cannot_touch_security_policy() {
        let c = cluster_with(BridgeConfig::default(), 1);
        let (_, peer) = &c.peers[0];

        let err = peer
            .install_security_hook(SecurityHook::malformed_shape(|_| {}))
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::HubOnly {
                operation: "install_security_hook"
            }
        );
        assert!(err.is_usage_error());
    }

    // =============================================================================
    // DISCONNECT
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resets_sender_counters() {
        let c = cluster_with(volume_config(2, Duration::from_secs(60)), 1);
        let (peer_id, peer) = &c.peers[0];

        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let (delivered, cb) = counter();
        hub_chat.connect(cb).unwrap();
        hub_chat
            .set_rate_limit(1, |_, _| OverflowDecision::Reject)
            .unwrap();

        let peer_chat = peer.bridge("Chat").await.unwrap();
        peer_chat.publish(Target::Hub, json!(["one"])).unwrap();
        peer_chat.publish(Target::Hub, json!(["throttled"])).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        c.hub.peer_disconnected(*peer_id).unwrap();

        // Fresh volume and rate limit counters.
        peer_chat.publish(Target::Hub, json!(["two"])).unwrap();
        peer_chat.publish(Target::Hub, json!(["throttled"])).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }
}
