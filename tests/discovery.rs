mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use lanmodule::discovery::Discovery;

use common::{
    closed_port, local_peer, module_in, spawn_garbage_peer, spawn_module, spawn_slow_peer,
};

#[actix_web::test]
async fn scan_keeps_only_peers_that_answered() {
    let dir = tempfile::tempdir().unwrap();
    let a = spawn_module(module_in(&dir.path().join("a"), "a", Vec::new()));
    let c = spawn_module(module_in(&dir.path().join("c"), "c", Vec::new()));

    let module = module_in(
        &dir.path().join("self"),
        "hub",
        vec![
            local_peer("alpha", a),
            local_peer("bravo", closed_port()),
            local_peer("charlie", c),
        ],
    );
    assert!(module.peer_map().await.is_none());

    let map = module.check_modules_up().await;
    let expected: BTreeMap<String, String> = [
        ("a".to_string(), "127.0.0.1".to_string()),
        ("c".to_string(), "127.0.0.1".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(map.peers, expected);

    assert!(!module.modules_available(&["a", "b"]).await);
    assert_eq!(module.missing_modules(&["a", "b"]).await, ["b"]);
    assert!(module.modules_available(&["a", "c"]).await);
}

#[actix_web::test]
async fn malformed_id_response_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let good = spawn_module(module_in(&dir.path().join("good"), "good", Vec::new()));
    let garbage = spawn_garbage_peer();

    let module = module_in(
        &dir.path().join("self"),
        "hub",
        vec![local_peer("garbage", garbage), local_peer("good", good)],
    );
    let map = module.check_modules_up().await;
    assert_eq!(map.peers.keys().collect::<Vec<_>>(), ["good"]);
}

#[actix_web::test]
async fn repeated_scans_give_the_same_map() {
    let dir = tempfile::tempdir().unwrap();
    let a = spawn_module(module_in(&dir.path().join("a"), "a", Vec::new()));
    let b = spawn_module(module_in(&dir.path().join("b"), "b", Vec::new()));

    let module = module_in(
        &dir.path().join("self"),
        "hub",
        vec![local_peer("alpha", a), local_peer("bravo", b)],
    );
    let first = module.check_modules_up().await;
    let second = module.check_modules_up().await;
    assert_eq!(first.peers, second.peers);
    assert_eq!(first.peers.len(), 2);
    assert_eq!(module.peer_map().await.unwrap().peers, second.peers);
}

#[actix_web::test]
async fn scan_replaces_rather_than_merges() {
    let dir = tempfile::tempdir().unwrap();
    let a = spawn_module(module_in(&dir.path().join("a"), "a", Vec::new()));
    let discovery = Discovery::new().unwrap();

    let first = discovery.scan(&[local_peer("alpha", a)]).await;
    assert!(first.contains("a"));
    assert_eq!(first.peers.get("a").map(String::as_str), Some("127.0.0.1"));

    // the peer is gone on the next pass
    discovery.scan(&[local_peer("alpha", closed_port())]).await;
    assert!(discovery.last().await.unwrap().peers.is_empty());
    assert_eq!(discovery.missing(&["a"]).await, ["a"]);
}

#[actix_web::test]
async fn overlapping_scans_keep_the_newer_map() {
    let slow = spawn_slow_peer("slow", Duration::from_millis(600));
    let fast = spawn_slow_peer("fast", Duration::ZERO);
    let discovery = Discovery::new().unwrap();

    // the first scan is still waiting on its peer when the second starts
    let slow_peers = [local_peer("slow", slow)];
    let fast_peers = [local_peer("fast", fast)];
    let (older, newer) = tokio::join!(
        discovery.scan(&slow_peers),
        discovery.scan(&fast_peers),
    );
    assert!(older.contains("slow"));
    assert!(newer.contains("fast"));

    let last = discovery.last().await.unwrap();
    assert_eq!(last.peers.keys().collect::<Vec<_>>(), ["fast"]);
    assert!(newer.scanned_at >= older.scanned_at);
}
