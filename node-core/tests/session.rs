mod common;

use core::num::NonZeroU16;

use common::{
    JOIN_REJECTED, NETWORK_EPOCH, RadioOp, SimSession, World, parts, run_cycle, session_manager,
};
use node_core::DutyCycle;
use node_core::config::{bounded, defaults};
use node_core::cycle::{CLOCK_SEED_EPOCH, FatalError};
use node_core::session::{
    JoinCredentials, RadioStatus, SESSION_LEN, SendError, SessionFailure, SessionOutcome,
    SessionRetention, SessionState,
};
use node_core::telemetry::{EventLog, NodeEvent};
use node_core::{CycleOutcome, CyclePhase};

fn credentials() -> JoinCredentials {
    JoinCredentials::from_config(&defaults::lora_config()).expect("default credentials parse")
}

fn ready_session(world: &common::Shared) -> SimSession {
    let mut session = session_manager(world);
    session.begin_radio().expect("radio begins");
    session.set_credentials(Some(credentials()));
    session
}

#[test]
fn new_join_syncs_clock_on_first_answer() {
    let world = World::factory_new();
    let mut session = ready_session(&world);
    let mut events = EventLog::new();

    let outcome = session.activate(None, &mut events);

    assert_eq!(outcome, SessionOutcome::NewSession);
    assert_eq!(session.state(), SessionState::Synced);
    assert_eq!(session.join_attempts(), 1);
    assert_eq!(session.clock_sync_attempts(), 1);
    assert!(events.contains(|event| *event
        == NodeEvent::ClockSyncAttempt {
            attempt: 1,
            accepted: true
        }));
    assert_eq!(world.borrow().clock, Some(NETWORK_EPOCH));
    assert_eq!(world.borrow().elapsed_ms, 1_000, "post-join wait only");
}

#[test]
fn clock_sync_gives_up_after_three_attempts() {
    let world = World::factory_new();
    world.borrow_mut().answers_time = false;
    let mut session = ready_session(&world);
    let mut events = EventLog::new();

    let outcome = session.activate(None, &mut events);

    assert_eq!(outcome, SessionOutcome::ClockSyncFailed);
    assert!(!outcome.permits_uplink());
    assert_eq!(
        session.state(),
        SessionState::Failed(SessionFailure::ClockSync)
    );
    assert_eq!(session.clock_sync_attempts(), 3);
    assert_eq!(
        world.borrow().elapsed_ms,
        3_000,
        "one post-join wait and a gap between each attempt"
    );
    assert_eq!(
        session.send(b"x"),
        Err(SendError::NoSession),
        "no uplink without a synced clock"
    );
    assert!(matches!(session.retention(), SessionRetention::Replace(_)));
}

#[test]
fn clock_that_ignores_sets_is_rejected() {
    let world = World::factory_new();
    {
        let mut world = world.borrow_mut();
        world.clock = Some(CLOCK_SEED_EPOCH);
        world.clock_frozen = true;
    }
    let mut session = ready_session(&world);

    let outcome = session.activate(None, &mut EventLog::new());

    assert_eq!(outcome, SessionOutcome::ClockSyncFailed);
    assert_eq!(
        world.borrow().count(|op| matches!(op, RadioOp::TimeRequest)),
        3
    );
}

#[test]
fn restored_session_skips_join_and_clock_sync() {
    let world = World::factory_new();
    {
        let mut session = ready_session(&world);
        session.activate(None, &mut EventLog::new());
    }
    let id = world.borrow().network_session.expect("network knows the session");
    world.borrow_mut().reset_observations();
    let mut session = ready_session(&world);

    let retained = [id; SESSION_LEN];
    let outcome = session.activate(Some(&retained), &mut EventLog::new());

    assert_eq!(outcome, SessionOutcome::SessionRestored);
    assert_eq!(session.state(), SessionState::Synced);
    assert_eq!(session.join_attempts(), 0);
    let world = world.borrow();
    assert_eq!(world.join_attempts, 0);
    assert!(world.radio_ops.contains(&RadioOp::RestoreNonces));
    assert_eq!(world.count(|op| matches!(op, RadioOp::TimeRequest)), 0);
    assert!(world.radio_ops.contains(&RadioOp::Adr(false)));
    assert!(world.radio_ops.contains(&RadioOp::DataRate(3)));
}

#[test]
fn stale_session_falls_back_to_join() {
    let world = World::factory_new();
    {
        let mut session = ready_session(&world);
        session.activate(None, &mut EventLog::new());
    }
    world.borrow_mut().reset_observations();
    let mut session = ready_session(&world);
    let mut events = EventLog::new();

    let stale = [0xEE; SESSION_LEN];
    let outcome = session.activate(Some(&stale), &mut events);

    assert_eq!(outcome, SessionOutcome::NewSession);
    let world = world.borrow();
    assert!(world.radio_ops.contains(&RadioOp::RestoreSession(false)));
    assert_eq!(world.count(|op| matches!(op, RadioOp::Join(true))), 1);
    assert!(events.contains(|event| matches!(
        event,
        NodeEvent::Session(SessionOutcome::NewSession)
    )));
}

#[test]
fn join_retries_until_accepted() {
    let world = World::factory_new();
    world.borrow_mut().joins_to_reject = 4;
    let mut session = ready_session(&world);
    let mut events = EventLog::new();

    let outcome = session.activate(None, &mut events);

    assert_eq!(outcome, SessionOutcome::NewSession);
    assert_eq!(session.join_attempts(), 5);
    assert!(events.contains(|event| *event
        == NodeEvent::JoinAttemptFailed {
            attempt: 4,
            status: JOIN_REJECTED
        }));
}

#[test]
fn join_limit_reports_last_status() {
    let world = World::factory_new();
    world.borrow_mut().joins_to_reject = 10;
    let limit = NonZeroU16::new(3).expect("non-zero");
    let mut session = ready_session(&world).with_join_attempt_limit(limit);

    let outcome = session.activate(None, &mut EventLog::new());

    assert_eq!(outcome, SessionOutcome::JoinFailed(JOIN_REJECTED));
    assert_eq!(
        session.state(),
        SessionState::Failed(SessionFailure::Join(JOIN_REJECTED))
    );
    assert_eq!(world.borrow().join_attempts, 3);
    assert!(world.borrow().nvs_nonces.is_none());
    assert!(matches!(session.retention(), SessionRetention::Discard));
}

#[test]
fn join_limit_aborts_the_cycle() {
    let world = World::factory_new();
    world.borrow_mut().joins_to_reject = 10;
    let mut board = parts(&world);
    board.join_attempt_limit = NonZeroU16::new(2);

    let report = DutyCycle::new(board).run();

    assert_eq!(
        report.outcome,
        CycleOutcome::Aborted(FatalError::Session(SessionOutcome::JoinFailed(
            JOIN_REJECTED
        )))
    );
    assert_eq!(report.phase, CyclePhase::Sleeping);
    assert!(world.borrow().uplinks().is_empty());
}

#[test]
fn missing_credentials_fail_without_radio_traffic() {
    let world = World::factory_new();
    let mut session = session_manager(&world);
    session.begin_radio().expect("radio begins");

    let outcome = session.activate(None, &mut EventLog::new());

    assert_eq!(
        outcome,
        SessionOutcome::JoinFailed(RadioStatus::INVALID_CREDENTIALS)
    );
    assert_eq!(
        session.state(),
        SessionState::Failed(SessionFailure::Credentials)
    );
    assert_eq!(world.borrow().radio_ops, vec![RadioOp::Begin]);
}

#[test]
fn malformed_stored_key_fails_the_join_but_still_sleeps() {
    let world = World::factory_new();
    run_cycle(&world);
    {
        let mut world = world.borrow_mut();
        world.store_lora.app_key = bounded("not,a,key");
        world.power_cycle();
    }

    let report = run_cycle(&world);

    assert_eq!(
        report.outcome,
        CycleOutcome::Aborted(FatalError::Session(SessionOutcome::JoinFailed(
            RadioStatus::INVALID_CREDENTIALS
        )))
    );
    assert!(
        report
            .events
            .contains(|event| matches!(event, NodeEvent::ConfigWarning(_)))
    );
    assert_eq!(report.sleep_s, Some(30));
}

#[test]
fn send_pins_data_rate_before_each_uplink() {
    let world = World::factory_new();
    let mut session = ready_session(&world);
    session.activate(None, &mut EventLog::new());
    world.borrow_mut().reset_observations();

    session.send(b"ST001|DEV01").expect("uplink accepted");

    assert_eq!(
        world.borrow().radio_ops,
        vec![
            RadioOp::Adr(false),
            RadioOp::DataRate(3),
            RadioOp::Uplink(String::from("ST001|DEV01")),
        ]
    );
}

#[test]
fn idle_manager_keeps_the_retained_session() {
    let world = World::factory_new();
    let session = ready_session(&world);

    assert!(matches!(session.retention(), SessionRetention::Keep));
    assert_eq!(session.state(), SessionState::NoCredentials);
}
