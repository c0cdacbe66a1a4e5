//! # Hub and Peer Flows
//!
//! One hub and several peers over the loopback transport, exercising the
//! registry propagation protocol and bridge delivery semantics end to end.
//!
//! ## Flows Tested:
//!
//! 1. **Registry sync**: allocations broadcast to connected peers, snapshots to late joiners
//! 2. **Addressing**: every `Target` variant reaches exactly the intended peers
//! 3. **Relay**: a hub subscriber re-publishing to the other peers from inside delivery
//! 4. **Degradation**: a peer that timed out keeps talking to the hub and upgrades later
//! 5. **Delivery semantics**: once, wait and stream across the wire

#[cfg(test)]
mod tests {
    use bridgewire_bus::testing::LoopbackNetwork;
    use bridgewire_bus::{
        BridgeConfig, Endpoint, InboundPipeline, Payload, PeerId, Sender, StageResult, Target,
        Token, Transform,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Cluster {
        network: LoopbackNetwork,
        hub: Endpoint,
        peers: Vec<(PeerId, Endpoint)>,
    }

    impl Cluster {
        /// Attach one more peer and hand it the hub's current snapshot.
        fn join(&mut self) -> (PeerId, Endpoint) {
            let (id, transport) = self.network.add_peer();
            let peer = Endpoint::peer(BridgeConfig::default(), transport).unwrap();
            self.hub.peer_connected(id).unwrap();
            self.peers.push((id, peer.clone()));
            (id, peer)
        }
    }

    fn cluster(peers: usize) -> Cluster {
        let network = LoopbackNetwork::new();
        let hub = Endpoint::hub(BridgeConfig::default(), network.hub_transport()).unwrap();
        let mut cluster = Cluster {
            network,
            hub,
            peers: Vec::new(),
        };
        for _ in 0..peers {
            cluster.join();
        }
        cluster
    }

    type Log = Arc<Mutex<Vec<(Sender, Value)>>>;

    fn recorder() -> (Log, impl Fn(&Sender, &Payload) + Send + Sync + 'static) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |sender: &Sender, payload: &Payload| {
            sink.lock().push((*sender, payload.clone().into_raw()))
        })
    }

    // =============================================================================
    // REGISTRY SYNC
    // =============================================================================

    #[tokio::test]
    async fn test_allocations_reach_every_connected_peer() {
        let c = cluster(3);

        let lobby = c.hub.identifier("Lobby").await.unwrap();
        let chat = c.hub.identifier("Chat").await.unwrap();
        assert_ne!(lobby, chat);

        for (_, peer) in &c.peers {
            assert_eq!(peer.from_name("Lobby"), Some(lobby.clone()));
            assert_eq!(peer.from_token(&chat), Some("Chat".to_string()));
        }
    }

    #[tokio::test]
    async fn test_late_joiner_receives_snapshot() {
        let mut c = cluster(0);
        let chat = c.hub.bridge("Chat").await.unwrap();
        let moves = c.hub.bridge("Move").await.unwrap();

        let (_, late) = c.join();

        assert_eq!(late.identifiers(), c.hub.identifiers());
        let late_moves = late.bridge("Move").await.unwrap();
        assert_eq!(late_moves.token().unwrap(), moves.token().unwrap());
        assert!(!late_moves.identifier().unwrap().is_degraded());
    }

    #[tokio::test]
    async fn test_custom_alphabet_grows_token_length_only_when_exhausted() {
        let network = LoopbackNetwork::new();
        let config = BridgeConfig {
            alphabet: "xy".into(),
            ..BridgeConfig::default()
        };
        let hub = Endpoint::hub(config, network.hub_transport()).unwrap();

        let mut tokens = Vec::new();
        for name in ["A", "B", "C", "D", "E", "F", "G"] {
            tokens.push(hub.identifier(name).await.unwrap());
        }

        let expected: Vec<Token> = ["x", "y", "xx", "xy", "yx", "yy", "xxx"]
            .into_iter()
            .map(Token::new)
            .collect();
        assert_eq!(tokens, expected);
    }

    // =============================================================================
    // ADDRESSING
    // =============================================================================

    #[tokio::test]
    async fn test_hub_targets_reach_intended_peers() {
        let c = cluster(3);
        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let ids: Vec<PeerId> = c.peers.iter().map(|(id, _)| *id).collect();

        let mut logs = Vec::new();
        let mut bridges = Vec::new();
        for (_, peer) in &c.peers {
            let bridge = peer.bridge("Chat").await.unwrap();
            let (log, cb) = recorder();
            bridge.connect(cb).unwrap();
            logs.push(log);
            bridges.push(bridge);
        }

        hub_chat.publish(Target::Peer(ids[0]), json!(["one"])).unwrap();
        hub_chat
            .publish(Target::Peers(vec![ids[1], ids[2]]), json!(["two"]))
            .unwrap();
        hub_chat
            .publish(Target::AllPeersExcept(vec![ids[0]]), json!(["three"]))
            .unwrap();
        hub_chat.publish(Target::AllPeers, json!(["four"])).unwrap();

        let seen = |i: usize| -> Vec<Value> {
            logs[i].lock().iter().map(|(_, raw)| raw.clone()).collect()
        };
        assert_eq!(seen(0), vec![json!(["one"]), json!(["four"])]);
        for i in 1..3 {
            assert_eq!(
                seen(i),
                vec![json!(["two"]), json!(["three"]), json!(["four"])]
            );
        }
        assert!(logs
            .iter()
            .all(|log| log.lock().iter().all(|(sender, _)| *sender == Sender::Hub)));
    }

    #[tokio::test]
    async fn test_hub_relays_peer_messages_to_other_peers() {
        let c = cluster(3);
        let hub_chat = c.hub.bridge("Chat").await.unwrap();

        let relay = hub_chat.clone();
        hub_chat
            .connect(move |sender, payload| {
                if let Some(origin) = sender.peer() {
                    relay
                        .publish(Target::AllPeersExcept(vec![origin]), payload.clone())
                        .unwrap();
                }
            })
            .unwrap();

        let mut logs = Vec::new();
        let mut bridges = Vec::new();
        for (_, peer) in &c.peers {
            let bridge = peer.bridge("Chat").await.unwrap();
            let (log, cb) = recorder();
            bridge.connect(cb).unwrap();
            logs.push(log);
            bridges.push(bridge);
        }

        bridges[0].publish(Target::Hub, json!(["hello"])).unwrap();

        assert!(logs[0].lock().is_empty());
        for log in &logs[1..] {
            assert_eq!(*log.lock(), vec![(Sender::Hub, json!(["hello"]))]);
        }

        hub_chat.destroy().unwrap();
    }

    // =============================================================================
    // DEGRADATION
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_degraded_peer_traffic_survives_late_allocation() {
        let c = cluster(1);
        let (peer_id, peer) = &c.peers[0];

        let peer_late = peer.bridge("Late").await.unwrap();
        assert!(peer_late.identifier().unwrap().is_degraded());

        // The assignment and the degraded publish cross on the wire.
        let (log, cb) = recorder();
        c.network.hold();
        let hub_late = c.hub.bridge("Late").await.unwrap();
        hub_late.connect(cb).unwrap();
        peer_late.publish(Target::Hub, json!(["early"])).unwrap();
        assert_eq!(c.network.pending(), 2);
        c.network.release();

        assert_eq!(*log.lock(), vec![(Sender::Peer(*peer_id), json!(["early"]))]);
        assert_eq!(peer_late.token().unwrap(), hub_late.token().unwrap());

        peer_late.publish(Target::Hub, json!(["later"])).unwrap();
        let last = c.network.wire_log().pop().unwrap();
        assert_eq!(last.token, hub_late.token().unwrap());
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peers_resolve_independently() {
        let c = cluster(2);
        let (_, first) = &c.peers[0];
        let (_, second) = &c.peers[1];

        let degraded = first.identifier("Score").await.unwrap();
        assert_eq!(degraded, Token::uncompressed("Score"));

        let token = c.hub.identifier("Score").await.unwrap();
        assert_eq!(second.identifier("Score").await.unwrap(), token);
        assert_eq!(first.identifier("Score").await.unwrap(), token);
    }

    // =============================================================================
    // DELIVERY SEMANTICS
    // =============================================================================

    #[tokio::test]
    async fn test_once_callback_cannot_retrigger_itself() {
        let c = cluster(1);
        let (peer_id, peer) = &c.peers[0];
        let hub_chat = c.hub.bridge("Chat").await.unwrap();
        let peer_chat = peer.bridge("Chat").await.unwrap();

        // Hub echoes everything back to the peer that sent it.
        let echo = hub_chat.clone();
        hub_chat
            .connect(move |sender, payload| {
                if let Some(origin) = sender.peer() {
                    echo.publish(Target::Peer(origin), payload.clone()).unwrap();
                }
            })
            .unwrap();

        let once_fired = Arc::new(AtomicU32::new(0));
        let (fired, reply) = (once_fired.clone(), peer_chat.clone());
        peer_chat
            .once(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
                reply.publish(Target::Hub, json!(["again"])).unwrap();
            })
            .unwrap();
        let (log, cb) = recorder();
        peer_chat.connect(cb).unwrap();

        hub_chat.publish(Target::Peer(*peer_id), json!(["start"])).unwrap();

        assert_eq!(once_fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            *log.lock(),
            vec![
                (Sender::Hub, json!(["start"])),
                (Sender::Hub, json!(["again"])),
            ]
        );

        hub_chat.destroy().unwrap();
        peer_chat.destroy().unwrap();
    }

    #[tokio::test]
    async fn test_peer_wait_resolves_from_hub_publish() {
        let c = cluster(1);
        let (peer_id, peer) = &c.peers[0];
        let hub_turns = c.hub.bridge("Turn").await.unwrap();
        let peer_turns = peer.bridge("Turn").await.unwrap();

        let waiting = peer_turns.clone();
        let waiter = tokio::spawn(async move { waiting.wait().await });
        tokio::task::yield_now().await;
        hub_turns
            .publish(Target::Peer(*peer_id), json!(["your move"]))
            .unwrap();

        let (sender, payload) = waiter.await.unwrap().unwrap();
        assert_eq!(sender, Sender::Hub);
        assert_eq!(payload.get(0), Some(&json!("your move")));
        assert_eq!(peer_turns.subscriber_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_preserves_delivery_order() {
        let c = cluster(1);
        let (_, peer) = &c.peers[0];
        let hub_ticks = c.hub.bridge("Tick").await.unwrap();
        let peer_ticks = peer.bridge("Tick").await.unwrap();

        let mut stream = peer_ticks.stream().unwrap();
        for tick in 0..5 {
            hub_ticks.publish(Target::AllPeers, json!([tick])).unwrap();
        }

        for tick in 0..5 {
            let (sender, payload) = stream.next().await.unwrap();
            assert_eq!(sender, Sender::Hub);
            assert_eq!(payload.into_raw(), json!([tick]));
        }

        peer_ticks.destroy().unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bridges_on_one_channel_are_independent() {
        let c = cluster(1);
        let (_, peer) = &c.peers[0];
        let first = c.hub.bridge("Chat").await.unwrap();
        let second = c.hub.bridge("Chat").await.unwrap();
        assert_eq!(first.token().unwrap(), second.token().unwrap());

        first
            .set_inbound_middleware(InboundPipeline::new().stage(
                |_: &Sender, p: &Payload| -> StageResult {
                    Ok(Transform::Replace(p.clone().with("first")))
                },
            ))
            .unwrap();
        let (first_log, cb) = recorder();
        first.connect(cb).unwrap();
        let (second_log, cb) = recorder();
        second.connect(cb).unwrap();

        let peer_chat = peer.bridge("Chat").await.unwrap();
        peer_chat.publish(Target::Hub, json!(["hi"])).unwrap();

        assert_eq!(first_log.lock()[0].1, json!(["hi", "first"]));
        assert_eq!(second_log.lock()[0].1, json!(["hi"]));

        first.destroy().unwrap();
        peer_chat.publish(Target::Hub, json!(["still here"])).unwrap();
        assert_eq!(first_log.lock().len(), 1);
        assert_eq!(second_log.lock().len(), 2);
    }
}
