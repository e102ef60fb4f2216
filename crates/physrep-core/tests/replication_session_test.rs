//! Replication session tests
//!
//! Exercises the manager end to end with the background loop running:
//! - Host failover on start
//! - Single active session
//! - Stop/cleanup joining the loop
//! - Records flowing from donor to local log

use physrep_core::testing::{LogOp, MemoryLogStore, ScriptedDonor};
use physrep_core::{
    DonorRow, Error, LogPosition, LogStore, Lsn, ReplicationAdmin, ReplicationConfig,
    ReplicationManager, SyncState, TruncationPoint,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn setup(hosts: &[&str]) -> (ReplicationManager, Arc<MemoryLogStore>, ScriptedDonor) {
    init_tracing();
    let store = Arc::new(MemoryLogStore::with_tail(LogPosition::new(3, 100, 20)));
    let donor = ScriptedDonor::new();
    let config = ReplicationConfig::replicant("local", hosts.iter().copied())
        .with_poll_interval(Duration::from_millis(100));
    let manager = ReplicationManager::new(
        config,
        Arc::new(donor.clone()),
        Arc::clone(&store) as Arc<dyn LogStore>,
    )
    .unwrap();
    (manager, store, donor)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_failover_to_second_host() {
    let (mut manager, _store, donor) = setup(&["h1", "h2"]);
    donor.set_unreachable("h1");

    let host = manager.start_replication().await.unwrap();

    assert_eq!(host.as_deref(), Some("h2"));
    assert_eq!(manager.active_host(), Some("h2"));
    assert_eq!(donor.attempts(), vec!["h1", "h2"]);
    assert_eq!(
        donor.connections(),
        vec![("h2".to_string(), "local".to_string())]
    );

    let hosts = manager.hosts();
    assert!(!hosts[0].reachable);
    assert!(hosts[1].reachable);
    assert!(hosts[1].last_contact.is_some());

    manager.stop_replication().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_reachable_host() {
    let (mut manager, _store, donor) = setup(&["h1", "h2"]);
    donor.set_unreachable("h1");
    donor.set_unreachable("h2");

    assert_eq!(manager.start_replication().await.unwrap(), None);
    assert!(!manager.is_replicating());

    let err = ReplicationAdmin::start_replication(&mut manager)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Couldn't start replicating");
}

#[tokio::test(start_paused = true)]
async fn test_only_one_session() {
    let (mut manager, _store, _donor) = setup(&["h1"]);
    manager.start_replication().await.unwrap();

    let err = manager.start_replication().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyReplicating));
    assert_eq!(err.to_string(), "DB is already replicating");

    manager.stop_replication().await.unwrap();
    assert!(!manager.is_replicating());
    assert!(matches!(
        manager.stop_replication().await,
        Err(Error::NotReplicating)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_records_flow_into_local_log() {
    let (mut manager, store, donor) = setup(&["h1"]);
    donor.set_generation(1);
    donor.push_rows(vec![
        DonorRow::new(Lsn::new(4, 0), 7, 1, &b"first"[..]),
        DonorRow::new(Lsn::new(4, 5), 7, 1, &b"second"[..]),
    ]);

    manager.start_replication().await.unwrap();
    wait_for(|| manager.stats().records_applied == 2).await;

    assert_eq!(
        store.ops(),
        vec![
            LogOp::NewFile {
                lsn: Lsn::new(3, 120)
            },
            LogOp::Apply {
                lsn: Lsn::new(4, 0),
                record_type: 7,
                payload: b"first".to_vec(),
            },
            LogOp::Apply {
                lsn: Lsn::new(4, 5),
                record_type: 7,
                payload: b"second".to_vec(),
            },
        ]
    );

    // Caught up: the next poll answers "done" and the handshake settles
    // the loop into steady state.
    wait_for(|| manager.stats().state == SyncState::Steady && manager.stats().polls >= 2).await;
    let stats = manager.stats();
    assert_eq!(stats.donor.as_deref(), Some("h1"));
    assert_eq!(stats.expected_generation, 1);
    assert_eq!(stats.last_applied, Some(LogPosition::new(4, 5, 6)));

    manager.stop_replication().await.unwrap();
    assert_eq!(manager.stats().state, SyncState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_for_recovery() {
    let (mut manager, store, donor) = setup(&["h1"]);
    store.set_ready(false);

    manager.start_replication().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(manager.stats().state, SyncState::Starting);

    manager.stop_replication().await.unwrap();
    assert_eq!(manager.stats().state, SyncState::Stopped);
    assert!(donor.negotiations().is_empty());
    assert!(donor.queries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let (mut manager, _store, donor) = setup(&["h1", "h2"]);
    manager.start_replication().await.unwrap();
    let first_session = manager.session().unwrap().id().to_string();
    manager.stop_replication().await.unwrap();

    manager.remove_replicant_host("h1").unwrap();
    assert_eq!(manager.start_replication().await.unwrap().as_deref(), Some("h2"));
    assert_ne!(manager.session().unwrap().id(), first_session);
    assert_eq!(donor.attempts(), vec!["h1", "h2"]);

    manager.stop_replication().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_halted_session_is_replaced_on_start() {
    let (mut manager, store, donor) = setup(&["h1"]);
    store.apply(Lsn::new(3, 120), 1, b"diverged").unwrap();
    store.set_master(false);
    donor.push_handshake(TruncationPoint {
        position: LogPosition::new(3, 100, 20),
        generation: 1,
    });

    manager.start_replication().await.unwrap();
    let first_session = manager.session().unwrap().id().to_string();
    wait_for(|| manager.session().is_some_and(|s| s.is_finished())).await;

    let stats = manager.stats();
    assert_eq!(stats.state, SyncState::Stopped);
    assert_eq!(
        stats.last_error.as_deref(),
        Some("Can only truncate from master node")
    );
    assert!(donor.queries().is_empty());

    // The operator resolves the divergence, then restarts.
    store.set_master(true);
    assert_eq!(manager.start_replication().await.unwrap().as_deref(), Some("h1"));
    assert_ne!(manager.session().unwrap().id(), first_session);
    wait_for(|| manager.stats().state == SyncState::Steady).await;
    assert_eq!(manager.stats().last_error, None);

    manager.stop_replication().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_stops_and_clears() {
    let (mut manager, _store, _donor) = setup(&["h1", "h2"]);
    manager.start_replication().await.unwrap();

    manager.cleanup().await.unwrap();

    assert!(!manager.is_replicating());
    assert!(manager.hosts().is_empty());
    assert_eq!(manager.stats().state, SyncState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_remove_unknown_host_keeps_registry() {
    let (mut manager, _store, _donor) = setup(&["h1", "h2"]);
    let before = manager.hosts();

    let err = manager.remove_replicant_host("h3").unwrap_err();
    assert!(matches!(err, Error::HostNotFound(_)));
    assert_eq!(manager.hosts(), before);
}
