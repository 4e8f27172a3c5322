//! Live traffic outside any sync bracket.

use std::time::Duration;

use stripe_sync::core::{Limits, OperationKind, SequenceNumber};
use stripe_sync::repl::{Admission, EngineStats, EntityAction, KeyedExecutor};

use crate::fixtures::entities::{completed, received};
use crate::fixtures::stream::{active, entity, invoke, key, op, Rig};

#[test]
fn unknown_entity_is_created_then_applied() {
    let mut rig = Rig::inline();
    let foo = entity("foo");

    assert_eq!(
        rig.engine.handle(invoke(1, &foo, 5, "X")).unwrap(),
        Admission::Applied
    );

    assert_eq!(rig.entities.created(), vec![(foo.clone(), Vec::new())]);
    let observed = rig.entities.observed_for(&foo);
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].action, EntityAction::Invoke);
    assert_eq!(observed[0].key, key(5));
    assert_eq!(observed[0].sequence, Some(SequenceNumber::new(1)));
    assert_eq!(observed[0].body.as_deref(), Some("X"));

    let sent = rig.acks.sent();
    assert_eq!(
        sent,
        vec![(active(), received(1)), (active(), completed(1, true))]
    );
}

#[test]
fn create_uses_payload_as_config() {
    let mut rig = Rig::inline();
    let foo = entity("foo");

    rig.engine
        .handle(op(1, &foo, 0, OperationKind::Create, b"conf"))
        .unwrap();
    rig.engine.handle(invoke(2, &foo, 1, "next")).unwrap();

    assert_eq!(rig.entities.created(), vec![(foo.clone(), b"conf".to_vec())]);
    let actions: Vec<_> = rig
        .entities
        .observed_for(&foo)
        .into_iter()
        .map(|obs| (obs.action, obs.body))
        .collect();
    assert_eq!(
        actions,
        vec![
            (EntityAction::Create, Some("conf".to_string())),
            (EntityAction::Invoke, Some("next".to_string())),
        ]
    );
}

#[test]
fn noop_is_acknowledged_without_touching_entities() {
    let mut rig = Rig::inline();
    let foo = entity("foo");

    assert_eq!(
        rig.engine
            .handle(op(9, &foo, 1, OperationKind::Noop, b""))
            .unwrap(),
        Admission::Applied
    );
    assert!(rig.entities.created().is_empty());
    assert!(rig.entities.observed().is_empty());
    assert_eq!(rig.acks.acks(), vec![received(9), completed(9, true)]);
}

#[test]
fn decode_failure_is_local_to_the_message() {
    let mut rig = Rig::inline();
    let foo = entity("foo");

    assert_eq!(
        rig.engine
            .handle(op(1, &foo, 1, OperationKind::Invoke, &[0xff, 0xfe]))
            .unwrap(),
        Admission::Skipped
    );
    assert_eq!(rig.acks.for_sequence(1), vec![received(1)]);
    assert!(rig.entities.observed_for(&foo).is_empty());

    // The session carries on.
    assert_eq!(
        rig.engine.handle(invoke(2, &foo, 1, "ok")).unwrap(),
        Admission::Applied
    );
    assert_eq!(
        rig.acks.for_sequence(2),
        vec![received(2), completed(2, true)]
    );
    assert_eq!(rig.engine.stats().decode_failures, 1);
}

#[test]
fn failed_on_demand_create_completes_unsuccessfully() {
    let mut rig = Rig::inline();
    let foo = entity("foo");
    rig.entities.refuse_create(&foo);

    assert_eq!(
        rig.engine.handle(invoke(1, &foo, 1, "x")).unwrap(),
        Admission::Skipped
    );
    assert_eq!(rig.acks.acks(), vec![received(1), completed(1, false)]);
}

#[test]
fn entity_reported_failure_flows_into_completed() {
    let mut rig = Rig::inline();
    let foo = entity("foo");
    rig.entities.fail_applies(&foo);

    rig.engine.handle(invoke(1, &foo, 1, "x")).unwrap();
    assert_eq!(rig.acks.acks(), vec![received(1), completed(1, false)]);
}

#[test]
fn every_live_message_gets_exactly_two_acks_in_order() {
    let mut rig = Rig::inline();
    let kinds = [
        OperationKind::Create,
        OperationKind::Invoke,
        OperationKind::Reconfigure,
        OperationKind::Noop,
        OperationKind::Destroy,
    ];
    for (idx, kind) in kinds.iter().enumerate() {
        let seq = idx as u64 + 1;
        rig.engine
            .handle(op(seq, &entity("multi"), 1, *kind, b"body"))
            .unwrap();
    }

    for seq in 1..=kinds.len() as u64 {
        assert_eq!(
            rig.acks.for_sequence(seq),
            vec![received(seq), completed(seq, true)],
            "sequence {seq}"
        );
    }
    assert_eq!(
        rig.engine.stats(),
        EngineStats {
            applied: 5,
            entities_created: 1,
            ..EngineStats::default()
        }
    );
}

#[test]
fn panicking_apply_still_completes_with_failure() {
    let mut rig = Rig::inline();
    let boom = entity("boom");
    rig.entities.panic_applies(&boom);

    assert_eq!(
        rig.engine.handle(invoke(1, &boom, 1, "x")).unwrap(),
        Admission::Applied
    );
    assert_eq!(rig.acks.acks(), vec![received(1), completed(1, false)]);

    // The session survives and keeps acknowledging later traffic.
    rig.engine.handle(invoke(2, &entity("calm"), 1, "y")).unwrap();
    assert_eq!(rig.acks.for_sequence(2), vec![received(2), completed(2, true)]);
}

#[test]
fn panicking_apply_on_a_lane_still_completes_with_failure() {
    let executor = KeyedExecutor::new(2).expect("spawn lanes");
    let mut rig = Rig::with(Limits::default(), Box::new(executor));
    let boom = entity("boom");
    rig.entities.panic_applies(&boom);

    for seq in 1..=3 {
        rig.engine.handle(invoke(seq, &boom, seq as i32, "x")).unwrap();
    }
    rig.engine.handle(invoke(4, &entity("calm"), 1, "y")).unwrap();
    assert!(rig.acks.wait_for(8, Duration::from_secs(5)), "all acks arrive");

    for seq in 1..=3 {
        assert_eq!(
            rig.acks.for_sequence(seq),
            vec![received(seq), completed(seq, false)],
            "sequence {seq}"
        );
    }
    assert_eq!(rig.acks.for_sequence(4), vec![received(4), completed(4, true)]);
}
