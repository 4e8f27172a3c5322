//! Keyed apply lanes keep per-key order while keys run in parallel.

use std::collections::BTreeMap;
use std::time::Duration;

use stripe_sync::core::Limits;
use stripe_sync::repl::{EntityAction, KeyedExecutor};

use crate::fixtures::stream::{
    end_entity, end_key, end_sync, entity, invoke, key, payload, start_entity, start_key,
    start_sync, Rig,
};

#[test]
fn keyed_lanes_preserve_order_per_key_across_a_sync_pass() {
    let executor = KeyedExecutor::new(4).expect("spawn lanes");
    let rig = Rig::with(Limits::default(), Box::new(executor));
    let Rig {
        mut engine,
        entities,
        acks,
    } = rig;
    let foo = entity("foo");
    let key_of = |seq: u64| (seq % 4) as i32 + 1;

    for seq in 1..=40 {
        engine.handle(invoke(seq, &foo, key_of(seq), &seq.to_string())).unwrap();
    }
    engine.handle(start_sync()).unwrap();
    engine.handle(start_entity(&foo, "cfg")).unwrap();
    engine.handle(start_key(&foo, 3)).unwrap();
    engine.handle(payload(&foo, 3, "base")).unwrap();
    for seq in 41..=80 {
        engine.handle(invoke(seq, &foo, key_of(seq), &seq.to_string())).unwrap();
    }
    engine.handle(end_key(&foo, 3)).unwrap();
    engine.handle(end_entity(&foo)).unwrap();
    engine.handle(end_sync(b"")).unwrap();
    for seq in 81..=100 {
        engine.handle(invoke(seq, &foo, key_of(seq), &seq.to_string())).unwrap();
    }

    assert!(acks.wait_for(200, Duration::from_secs(10)), "all acks arrive");
    // Dropping the engine drains and joins the lanes.
    drop(engine);

    let mut per_key: BTreeMap<i32, Vec<u64>> = BTreeMap::new();
    for obs in entities.observed_for(&foo) {
        if obs.action == EntityAction::Invoke {
            let seq = obs.sequence.expect("live op carries a sequence").get();
            per_key.entry(obs.key.get()).or_default().push(seq);
        }
    }
    assert_eq!(per_key.len(), 4);
    for (k, seqs) in &per_key {
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "key {k} out of order");
        assert_eq!(seqs.len(), 25);
    }

    let key3: Vec<_> = entities
        .observed_for(&foo)
        .into_iter()
        .filter(|obs| obs.key == key(3))
        .collect();
    let payload_at = key3
        .iter()
        .position(|obs| obs.action == EntityAction::SyncPayload)
        .expect("payload applied");
    let first_after = key3
        .iter()
        .position(|obs| obs.sequence.map(|s| s.get()) == Some(42))
        .expect("deferred op applied");
    assert!(payload_at < first_after, "baseline lands before replay");

    // Per message, RECEIVED precedes COMPLETED.
    for seq in 1..=100 {
        let seen = acks.for_sequence(seq);
        assert_eq!(seen.len(), 2, "sequence {seq}");
        assert!(matches!(
            seen[0],
            stripe_sync::core::ReplicationAck::Received { .. }
        ));
    }
}
