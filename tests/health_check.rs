use std::time::{Duration, Instant};

use zerg_interchange::drone::HeartbeatManager;
use zerg_interchange::queen::DronePool;

mod test_utils;
use test_utils::after;

#[test]
fn test_heartbeat_interval_jitter_within_five_percent() {
    let manager = HeartbeatManager::new("w1".to_string(), 4, Duration::from_millis(1000), Instant::now());
    for _ in 0..200 {
        let interval = manager.next_interval();
        assert!(interval >= Duration::from_millis(950), "{:?} too short", interval);
        assert!(interval <= Duration::from_millis(1050), "{:?} too long", interval);
    }
}

#[test]
fn test_heartbeat_poll_fires_once_per_interval() {
    let now = Instant::now();
    let mut manager = HeartbeatManager::new("w1".to_string(), 4, Duration::from_millis(100), now);

    assert!(manager.poll(now, 0).is_none());
    assert!(manager.poll(after(now, 90), 0).is_none());

    let hb = manager.poll(after(now, 106), 3).expect("heartbeat due");
    assert_eq!(hb.worker_id, "w1");
    assert_eq!(hb.current_tasks, 3);
    assert_eq!(hb.capacity, 4);
    assert!(hb.timestamp > 0);

    assert!(manager.poll(after(now, 110), 3).is_none());
    assert!(manager.poll(after(now, 220), 0).is_some());
}

#[test]
fn test_pool_expiry_ordered_by_registration() {
    let now = Instant::now();
    let mut pool = DronePool::new();
    pool.register("b", 1, "test", now).unwrap();
    pool.register("a", 1, "test", now).unwrap();
    pool.register("c", 1, "test", now).unwrap();
    pool.heartbeat("c", after(now, 500));

    let timeout = Duration::from_millis(400);
    assert!(pool.expired(after(now, 400), timeout).is_empty());
    assert_eq!(pool.expired(after(now, 401), timeout), vec!["b", "a"]);
    assert_eq!(pool.expired(after(now, 1_000), timeout), vec!["b", "a", "c"]);
}
