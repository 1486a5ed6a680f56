//! Concurrent writers against a file-backed database

use super::on_disk;
use crate::config::Config;
use crate::core_workspace::types::UserId;
use crate::core_workspace::workspace::NewWorkspace;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_switches_keep_one_current() {
    let (ws, _dir) = on_disk(&Config::default());
    let alice = UserId::new("alice");

    let ids: Vec<_> = (0..4)
        .map(|i| {
            ws.manager()
                .create_workspace(NewWorkspace::named(format!("W{i}")), &alice)
                .unwrap()
                .id
        })
        .collect();

    let barrier = Arc::new(Barrier::new(ids.len()));
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|target| {
            let ws = ws.clone();
            let alice = alice.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    assert!(ws.memberships().switch_current(&alice, &target).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let current: Vec<_> = ws
        .memberships()
        .memberships_for(&alice)
        .unwrap()
        .into_iter()
        .filter(|m| m.is_current)
        .collect();
    assert_eq!(current.len(), 1);
    assert!(ids.contains(&current[0].workspace_id));
}

#[test]
fn test_concurrent_invites_share_one_pending_row() {
    let (ws, _dir) = on_disk(&Config::default());
    let w = ws
        .manager()
        .create_workspace(NewWorkspace::named("W"), &UserId::new("owner"))
        .unwrap();

    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let ws = ws.clone();
            let id = w.id.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ws.invitations().create(&id, "bob@example.com", None, None).unwrap().id
            })
        })
        .collect();

    let ids: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(ws.invitations().pending_for(&w.id).unwrap().len(), 1);
}

#[test]
fn test_concurrent_creates_get_distinct_slugs() {
    let (ws, _dir) = on_disk(&Config::default());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let ws = ws.clone();
            thread::spawn(move || {
                ws.manager()
                    .create_workspace(NewWorkspace::named("Acme"), &UserId::new(format!("user-{i}")))
                    .unwrap()
                    .slug
            })
        })
        .collect();

    let slugs: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(slugs.len(), 6);
    assert!(slugs.contains("acme"));
}

#[test]
fn test_concurrent_opens_of_fresh_database() {
    use crate::core_workspace::storage::WorkspaceSqlStore;

    for round in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.database_path = dir.path().join(format!("fresh_{round}.db"));

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store_config = config.store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    WorkspaceSqlStore::open(&store_config).map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.join().unwrap() {
                panic!("round {round}: open failed: {e}");
            }
        }
    }
}
