//! 交换机分派与回包测试

use std::time::Instant;

use bytes::Bytes;
use zerg_interchange::proto::{Frame, FrameKind};
use zerg_interchange::queen::TaskState;
use zerg_interchange::{InterchangeState, RegistrationError};

mod test_utils;
use test_utils::{ok, submit_range, StateBuilder};

fn dispatched_to(state: &mut InterchangeState) -> Vec<(String, Vec<u64>)> {
    state
        .dispatch()
        .into_iter()
        .map(|batch| (batch.worker_id.clone(), batch.task_ids()))
        .collect()
}

#[test]
fn test_fifo_dispatch_single_worker() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 3).build(now);
    submit_range(&mut state, 1..=5);

    let batches = dispatched_to(&mut state);
    let ids: Vec<u64> = batches.iter().flat_map(|(_, ids)| ids.clone()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(state.pending_ids(), vec![4, 5]);
    assert_eq!(state.task_state(1), Some(TaskState::Dispatched));
    assert_eq!(state.task_state(4), Some(TaskState::Queued));
    assert_eq!(state.assigned_worker(2), Some("w1"));
}

#[test]
fn test_least_loaded_with_registration_tiebreak() {
    let now = Instant::now();
    let mut state = StateBuilder::new()
        .worker("w1", 2)
        .worker("w2", 4)
        .worker("w3", 4)
        .build(now);
    submit_range(&mut state, 1..=4);

    let batches = dispatched_to(&mut state);
    // w2(4) -> w3(4) -> w2(3) -> w3(3)
    assert_eq!(
        batches,
        vec![
            ("w2".to_string(), vec![1]),
            ("w3".to_string(), vec![2]),
            ("w2".to_string(), vec![3]),
            ("w3".to_string(), vec![4]),
        ]
    );
    assert!(state.in_flight("w1").is_empty());
}

#[test]
fn test_batch_bounded_by_size_and_spare_capacity() {
    let now = Instant::now();
    let mut state = StateBuilder::new()
        .batch_size(4)
        .worker("w1", 6)
        .worker("w2", 2)
        .build(now);
    submit_range(&mut state, 1..=20);

    let batches = dispatched_to(&mut state);
    assert_eq!(
        batches,
        vec![
            ("w1".to_string(), vec![1, 2, 3, 4]),
            ("w1".to_string(), vec![5, 6]),
            ("w2".to_string(), vec![7, 8]),
        ]
    );
    assert_eq!(state.pending_len(), 12);
    assert!(state.dispatch().is_empty());
}

#[test]
fn test_result_frees_capacity_and_is_forwarded() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 1).build(now);
    submit_range(&mut state, 1..=2);
    assert_eq!(dispatched_to(&mut state), vec![("w1".to_string(), vec![1])]);

    let forwarded = state.complete("w1", ok(1), now).expect("result forwarded");
    assert_eq!(forwarded.task_id, 1);
    assert_eq!(forwarded.payload, b"ok".to_vec());
    assert_eq!(state.task_state(1), Some(TaskState::Completed));
    assert_eq!(dispatched_to(&mut state), vec![("w1".to_string(), vec![2])]);
}

#[test]
fn test_exception_forwarded_unchanged() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 1).build(now);
    submit_range(&mut state, [7]);
    state.dispatch();

    let frame = Frame::exception(7, "ZeroDivisionError");
    let forwarded = state.complete("w1", frame.clone(), now).unwrap();
    assert_eq!(forwarded, frame);
    assert_eq!(forwarded.kind(), FrameKind::Exception);
    assert_eq!(state.task_state(7), Some(TaskState::Failed));
    assert!(state.in_flight("w1").is_empty());
}

#[test]
fn test_duplicate_and_orphan_results_dropped() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 2).build(now);
    submit_range(&mut state, 1..=2);
    state.dispatch();

    assert!(state.complete("w1", ok(1), now).is_some());
    assert!(state.complete("w1", ok(1), now).is_none());
    assert!(state.complete("w1", ok(99), now).is_none());
    assert_eq!(state.in_flight("w1"), vec![2]);
}

#[test]
fn test_duplicate_submission_rejected() {
    let now = Instant::now();
    let mut state = StateBuilder::new().build(now);
    assert!(state.submit(1, Bytes::from_static(b"a")));
    assert!(!state.submit(1, Bytes::from_static(b"b")));
    assert_eq!(state.pending_len(), 1);
}

#[test]
fn test_cancel_queued_task_never_dispatched() {
    let now = Instant::now();
    let mut state = StateBuilder::new().build(now);
    submit_range(&mut state, 1..=3);
    assert!(state.cancel(2, now));
    assert!(!state.cancel(2, now));

    state.register_worker("w1", 4, "test", now).unwrap();
    let batches = dispatched_to(&mut state);
    let ids: Vec<u64> = batches.iter().flat_map(|(_, ids)| ids.clone()).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(state.pending_len(), 0);
}

#[test]
fn test_cancel_dispatched_task_discards_result() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 1).build(now);
    submit_range(&mut state, 1..=2);
    state.dispatch();

    assert!(state.cancel(1, now));
    // 仍占用容量直到结果返回
    assert!(state.dispatch().is_empty());
    assert!(state.complete("w1", ok(1), now).is_none());
    assert_eq!(dispatched_to(&mut state), vec![("w1".to_string(), vec![2])]);
}

#[test]
fn test_new_worker_joins_next_cycle() {
    let now = Instant::now();
    let mut state = StateBuilder::new().build(now);
    submit_range(&mut state, 1..=3);
    assert!(state.dispatch().is_empty());

    state.register_worker("late", 0, "test", now).unwrap();
    // 容量0时使用配置的默认容量(4)
    let ids: Vec<u64> = state.dispatch().iter().flat_map(|b| b.task_ids()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(state.pool().get("late").unwrap().capacity, 4);
}

#[test]
fn test_invalid_registration() {
    let now = Instant::now();
    let mut state = StateBuilder::new().build(now);
    assert_eq!(
        state.register_worker("", 2, "test", now),
        Err(RegistrationError::InvalidWorkerId)
    );
    assert_eq!(state.worker_count(), 0);
}

#[test]
fn test_unexpected_frame_kind_on_result_channel() {
    let now = Instant::now();
    let mut state = StateBuilder::new().worker("w1", 1).build(now);
    submit_range(&mut state, [1]);
    state.dispatch();

    assert!(state.complete("w1", Frame::cancel(1), now).is_none());
    assert_eq!(state.task_state(1), Some(TaskState::Dispatched));
}

#[test]
fn test_returned_batches_keep_order_and_worker() {
    let now = Instant::now();
    let mut state = StateBuilder::new().batch_size(2).worker("w1", 4).build(now);
    submit_range(&mut state, 1..=5);

    let batches = state.dispatch();
    assert_eq!(batches.len(), 2);
    assert_eq!(state.pending_ids(), vec![5]);

    // 对端队列已满, 两个批次按逆序退回
    for batch in batches.into_iter().rev() {
        state.return_batch(batch);
    }
    assert_eq!(state.pending_ids(), vec![1, 2, 3, 4, 5]);
    assert_eq!(state.worker_count(), 1);
    assert!(state.in_flight("w1").is_empty());
    for id in 1..=4 {
        assert_eq!(state.attempts(id), Some(0));
        assert_eq!(state.task_state(id), Some(TaskState::Queued));
    }

    assert_eq!(
        dispatched_to(&mut state),
        vec![
            ("w1".to_string(), vec![1, 2]),
            ("w1".to_string(), vec![3, 4]),
        ]
    );
    assert_eq!(state.attempts(1), Some(1));
}
