//! Admission thread driving an engine.

use std::time::Duration;

use stripe_sync::repl::{EngineRuntime, ReplError};
use stripe_sync::Error;

use crate::fixtures::stream::{entity, invoke, payload, start_entity, start_sync, Rig};

#[test]
fn stream_is_applied_off_thread_and_closes_cleanly() {
    let Rig {
        engine,
        entities,
        acks,
    } = Rig::inline();
    let handle = EngineRuntime::spawn("active-1", engine).expect("spawn");
    let feed = handle.sender();
    let foo = entity("foo");

    for seq in 1..=10 {
        feed.submit(invoke(seq, &foo, 1, "x")).expect("submit");
    }
    assert!(acks.wait_for(20, Duration::from_secs(5)));

    handle.close().expect("clean close");
    assert_eq!(entities.observed_for(&foo).len(), 10);
    assert!(matches!(
        feed.submit(invoke(11, &foo, 1, "x")),
        Err(ReplError::SessionClosed)
    ));
}

#[test]
fn protocol_fault_ends_the_loop_and_surfaces_on_join() {
    let Rig { engine, .. } = Rig::inline();
    let handle = EngineRuntime::spawn("active-1", engine).expect("spawn");
    let foo = entity("foo");

    handle.submit(start_sync()).expect("submit");
    handle.submit(start_entity(&foo, "cfg")).expect("submit");
    handle.submit(payload(&foo, 9, "orphan")).expect("submit");

    let err = handle.join().unwrap_err();
    assert!(matches!(err, Error::Repl(ReplError::Protocol { .. })));
}

#[test]
fn dropped_feed_mid_sync_reports_interruption() {
    let Rig { engine, .. } = Rig::inline();
    let handle = EngineRuntime::spawn("active-1", engine).expect("spawn");

    handle.submit(start_sync()).expect("submit");
    let err = handle.join().unwrap_err();
    assert!(matches!(err, Error::Repl(ReplError::SyncInterrupted)));
}
