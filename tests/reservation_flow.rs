//! End-to-end reservation lifecycle: race for a room, queue for it, get
//! notified when it frees, confirm, and book.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use ulid::Ulid;

use vacancy::engine::Engine;
use vacancy::model::*;
use vacancy::notify::{NotifyHub, Topic};
use vacancy::EngineConfig;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("vacancy_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn day(n: i64) -> Ms {
    vacancy::limits::MIN_VALID_TIMESTAMP_MS + n * 86_400_000
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event within a second")
        .expect("channel open")
}

#[tokio::test]
async fn contested_room_flows_through_the_waitlist() {
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        test_wal_path("contested.wal"),
        hub.clone(),
        EngineConfig::default(),
    )
    .unwrap();

    let rid = Ulid::new();
    let alice = Ulid::new();
    let bob = Ulid::new();
    engine.register_room(rid, "standard", 2).await.unwrap();

    let mut room_rx = hub.subscribe(Topic::Room(rid));
    let mut bob_rx = hub.subscribe(Topic::Requester(bob));

    let span = Span::new(day(10), day(12));

    // Alice gets the room.
    assert!(matches!(
        engine.reserve(rid, 1, alice, span, 2).await.unwrap(),
        ReserveOutcome::Accepted
    ));
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::ReservationPlaced { order_id: 1, .. }
    ));

    // Bob loses, is told why, and is offered nothing (only room in the house).
    let ReserveOutcome::Rejected(report) = engine.reserve(rid, 2, bob, span, 2).await.unwrap()
    else {
        panic!("expected rejection");
    };
    assert_eq!(report.kind, ConflictKind::TimeOverlap);
    assert_eq!(report.conflicting_order, Some(1));
    assert!(report.alternatives.is_empty());

    // Bob queues for the dates instead.
    let (entry, position) = engine
        .enroll_waitlist(rid, bob, span, 2, 0, None)
        .await
        .unwrap();
    assert_eq!(position, 1);
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::WaitlistEnrolled { .. }
    ));
    assert!(matches!(
        next_event(&mut bob_rx).await,
        Event::WaitlistEnrolled { .. }
    ));

    // Alice cancels; the cascade notifies Bob on his own topic.
    engine.cancel_reservation(1).await.unwrap();
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::ReservationCancelled { order_id: 1, .. }
    ));
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::WaitlistNotified { .. }
    ));
    let Event::WaitlistNotified {
        entry_id,
        expires_at,
        notified_at,
        ..
    } = next_event(&mut bob_rx).await
    else {
        panic!("expected notification on Bob's topic");
    };
    assert_eq!(entry_id, entry);
    assert_eq!(
        expires_at - notified_at,
        EngineConfig::default().confirmation_window_ms
    );

    // Bob confirms inside the window and books.
    engine.confirm_waitlist(entry, 2).await.unwrap();
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::WaitlistConfirmed { order_id: 2, .. }
    ));
    assert!(matches!(
        engine.reserve(rid, 2, bob, span, 2).await.unwrap(),
        ReserveOutcome::Accepted
    ));
    assert!(matches!(
        next_event(&mut room_rx).await,
        Event::ReservationPlaced { order_id: 2, .. }
    ));
}

#[tokio::test]
async fn simultaneous_reserves_admit_exactly_one() {
    let engine = Arc::new(
        Engine::new(
            test_wal_path("race.wal"),
            Arc::new(NotifyHub::new()),
            EngineConfig::default(),
        )
        .unwrap(),
    );
    let rid = Ulid::new();
    engine.register_room(rid, "standard", 2).await.unwrap();
    let span = Span::new(day(1), day(3));

    let e1 = engine.clone();
    let e2 = engine.clone();
    let (a, b) = tokio::join!(
        e1.reserve(rid, 1, Ulid::new(), span, 2),
        e2.reserve(rid, 2, Ulid::new(), span, 2),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let accepted = outcomes
        .iter()
        .filter(|o| matches!(o, ReserveOutcome::Accepted))
        .count();
    assert_eq!(accepted, 1);
    let rejected = outcomes
        .iter()
        .find_map(|o| match o {
            ReserveOutcome::Rejected(r) => Some(r),
            ReserveOutcome::Accepted => None,
        })
        .unwrap();
    assert_eq!(rejected.kind, ConflictKind::TimeOverlap);

    assert_eq!(engine.reservations(rid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn housekeeping_cycle_bumps_version_per_step() {
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        test_wal_path("housekeeping.wal"),
        hub.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    let rid = Ulid::new();
    let desk = Ulid::new();
    let cleaner = Ulid::new();
    engine.register_room(rid, "standard", 2).await.unwrap();
    let mut room_rx = hub.subscribe(Topic::Room(rid));

    let steps = [
        (0, RoomStatus::Occupied, "check-in", desk, Role::FrontDesk),
        (1, RoomStatus::Available, "check-out", desk, Role::FrontDesk),
        (2, RoomStatus::Cleaning, "turnover", cleaner, Role::Housekeeping),
        (3, RoomStatus::Available, "inspected", cleaner, Role::Housekeeping),
    ];
    for (expected, to, reason, operator, role) in steps {
        let v = engine
            .transition(rid, expected, to, reason, operator, role)
            .await
            .unwrap();
        assert_eq!(v, expected + 1);
        let Event::RoomStatusChanged { to: seen, version, .. } = next_event(&mut room_rx).await
        else {
            panic!("expected a status event");
        };
        assert_eq!(seen, to);
        assert_eq!(version, v);
    }

    let log = engine.transition_log(rid).await.unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log.last().unwrap().version, 4);
}
