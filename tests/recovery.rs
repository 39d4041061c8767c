mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use catalog_outbox::{
    EventState, InMemoryDatabase, IntegrationEventLogService, OutboxConfig, OutboxStore,
    ProductPriceChanged, RecoverySweeper, SweeperThread,
};
use support::{commit_price_change, service, FlakyPublisher};

#[test]
fn failed_publish_is_delivered_by_sweeper_after_grace_period() {
    let (service, db, publisher) = service(FlakyPublisher::new(1));
    let id = commit_price_change(&service, &db, 1);

    assert!(service.publish_event(id).unwrap().is_failed());
    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.state, EventState::PublishFailed);
    assert!(record.last_error.unwrap().contains("broker unreachable"));

    let sweeper = RecoverySweeper::new(service.clone()).with_grace_period(Duration::from_millis(200));
    let early = sweeper.sweep_once().unwrap();
    assert_eq!(early.claimed, 0);
    assert_eq!(publisher.calls(), 1);

    thread::sleep(Duration::from_millis(250));
    let result = sweeper.sweep_once().unwrap();

    assert_eq!(result.published, 1);
    assert_eq!(publisher.calls(), 2);
    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.state, EventState::Published);
    assert_eq!(record.times_sent, 2);
    assert_eq!(record.last_error, None);
}

#[test]
fn never_attempted_event_is_picked_up() {
    let (service, db, publisher) = service(FlakyPublisher::reliable());
    let id = commit_price_change(&service, &db, 3);

    let sweeper = RecoverySweeper::new(service).with_grace_period(Duration::ZERO);
    let result = sweeper.sweep_once().unwrap();

    assert_eq!(result.published, 1);
    assert_eq!(publisher.calls(), 1);
    assert_eq!(db.get(id).unwrap().unwrap().state, EventState::Published);
}

#[test]
fn stalled_attempt_is_released_and_retried() {
    let (service, db, publisher) = service(FlakyPublisher::reliable());
    let id = commit_price_change(&service, &db, 4);
    // A claim whose owner died before settling.
    db.mark_state(id, EventState::NotPublished, EventState::InProgress)
        .unwrap();

    let fresh = RecoverySweeper::new(service.clone()).with_grace_period(Duration::ZERO);
    assert_eq!(fresh.sweep_once().unwrap().released, 0);
    assert_eq!(publisher.calls(), 0);

    let sweeper = fresh.with_stall_timeout(Duration::ZERO);
    let result = sweeper.sweep_once().unwrap();

    assert_eq!(result.released, 1);
    assert_eq!(result.published, 1);
    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.state, EventState::Published);
    assert_eq!(record.times_sent, 2);
}

#[test]
fn exhausted_event_is_abandoned() {
    let (service, db, publisher) = service(FlakyPublisher::new(usize::MAX));
    let id = commit_price_change(&service, &db, 5);
    service.publish_event(id).unwrap();

    let sweeper = RecoverySweeper::new(service)
        .with_grace_period(Duration::ZERO)
        .with_max_attempts(Some(2));

    assert_eq!(sweeper.sweep_once().unwrap().failed, 1);
    let result = sweeper.sweep_once().unwrap();

    assert_eq!(result.abandoned, 1);
    assert_eq!(result.claimed, 0);
    assert_eq!(publisher.calls(), 2);
    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.state, EventState::PublishFailed);
    assert_eq!(record.times_sent, 2);
}

#[test]
fn restart_from_snapshot_recovers_pending_events() {
    let (service, db, first_publisher) = service(FlakyPublisher::reliable());
    let pending = commit_price_change(&service, &db, 10);
    let in_flight = commit_price_change(&service, &db, 11);
    db.mark_state(in_flight, EventState::NotPublished, EventState::InProgress)
        .unwrap();

    let bytes = db.snapshot().unwrap();
    drop(service);

    let restored = InMemoryDatabase::restore(&bytes).unwrap();
    let publisher = Arc::new(FlakyPublisher::reliable());
    let service = Arc::new(IntegrationEventLogService::new(restored.clone(), publisher.clone()));
    let sweeper = RecoverySweeper::new(service.clone())
        .with_grace_period(Duration::ZERO)
        .with_stall_timeout(Duration::ZERO);

    let result = sweeper.sweep_once().unwrap();

    assert_eq!(result.released, 1);
    assert_eq!(result.published, 2);
    assert_eq!(first_publisher.calls(), 0);
    for id in [pending, in_flight] {
        assert_eq!(restored.get(id).unwrap().unwrap().state, EventState::Published);
    }

    // Ids keep increasing after restore.
    let next = commit_price_change(&service, &restored, 12);
    assert!(next > in_flight);
}

#[test]
fn sweeper_thread_eventually_delivers_everything() {
    let (service, db, publisher) = service(FlakyPublisher::new(3));
    for product_id in 1..=5 {
        let id = commit_price_change(&service, &db, product_id);
        service.publish_event(id).unwrap();
    }
    assert_eq!(publisher.delivered_count(), 2);

    let config = OutboxConfig::default()
        .with_grace_period(Duration::ZERO)
        .with_sweep_interval(Duration::from_millis(10));
    let sweeper = RecoverySweeper::from_config(service, &config);
    let handle = SweeperThread::spawn(sweeper, config.sweep_interval);

    let deadline = Instant::now() + Duration::from_secs(5);
    while publisher.delivered_count() < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let stats = handle.stop();

    assert_eq!(stats.totals.published, 3);
    let products: BTreeSet<u64> = publisher
        .delivered()
        .iter()
        .map(|(_, payload)| serde_json::from_slice::<ProductPriceChanged>(payload).unwrap().product_id)
        .collect();
    assert_eq!(products, (1..=5).collect());
    assert!(db.list_pending(100, chrono::Utc::now()).unwrap().is_empty());
}
