//! 客户端会话测试: 通过通道模拟交换机

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use zerg_interchange::executor::{Inbound, Outbound};
use zerg_interchange::proto::Frame;
use zerg_interchange::{Executor, InterchangeConfig, TaskError, TaskId};

mod test_utils;
use test_utils::test_config;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn session(queue_depth: usize) -> (Executor, Receiver<Outbound>, Sender<Inbound>) {
    let config = InterchangeConfig {
        queue_depth,
        ..test_config()
    };
    Executor::with_channels(&config).unwrap()
}

fn next_submit(outbound: &Receiver<Outbound>) -> (TaskId, Vec<u8>) {
    match outbound.recv_timeout(Duration::from_secs(5)).unwrap() {
        Outbound::Submit { task_id, payload } => (task_id, payload.to_vec()),
        other => panic!("expected submit, got {:?}", other),
    }
}

fn deliver(inbound: &Sender<Inbound>, frame: Frame) {
    inbound.send(Inbound::Frame(frame)).unwrap();
}

#[test]
fn test_results_routed_to_matching_futures() {
    let (executor, outbound, inbound) = session(16);
    let futures: Vec<_> = (0..3u8)
        .map(|i| executor.submit(vec![i]).unwrap())
        .collect();
    let submitted: Vec<_> = (0..3).map(|_| next_submit(&outbound)).collect();
    assert_eq!(submitted[1].1, vec![1]);

    // 乱序回包
    for (task_id, payload) in submitted.iter().rev() {
        let mut output = payload.clone();
        output.push(0xff);
        deliver(&inbound, Frame::result(*task_id, output));
    }
    for (i, future) in futures.iter().enumerate() {
        let output = future.result(WAIT).unwrap();
        assert_eq!(output.as_ref(), &[i as u8, 0xff]);
    }
    assert_eq!(executor.outstanding(), 0);
}

#[test]
fn test_concurrent_submitters_resolved_exactly_once() {
    let (executor, outbound, inbound) = session(1024);
    let executor = Arc::new(executor);

    // 回显服务
    let echo = thread::spawn(move || {
        let mut seen = HashSet::new();
        while let Ok(Outbound::Submit { task_id, payload }) =
            outbound.recv_timeout(Duration::from_secs(2))
        {
            assert!(seen.insert(task_id), "task id {} reused", task_id);
            deliver(&inbound, Frame::result(task_id, payload.to_vec()));
        }
        seen.len()
    });

    let submitters: Vec<_> = (0..8u32)
        .map(|t| {
            let executor = Arc::clone(&executor);
            thread::spawn(move || {
                let futures: Vec<_> = (0..50u32)
                    .map(|i| {
                        let payload = (t * 1000 + i).to_be_bytes().to_vec();
                        (payload.clone(), executor.submit(payload).unwrap())
                    })
                    .collect();
                for (payload, future) in futures {
                    assert_eq!(future.result(WAIT).unwrap().to_vec(), payload);
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    assert_eq!(echo.join().unwrap(), 400);
    assert_eq!(executor.outstanding(), 0);
}

#[test]
fn test_queue_full_when_in_flight_limit_reached() {
    let (executor, outbound, inbound) = session(2);
    let _a = executor.submit("a").unwrap();
    let b = executor.submit("b").unwrap();
    assert_eq!(executor.submit("c").unwrap_err(), TaskError::QueueFull);

    let (first, _) = next_submit(&outbound);
    next_submit(&outbound);
    deliver(&inbound, Frame::result(first, b"done".to_vec()));
    // 结果送达后腾出一个位置
    let c = executor
        .submit_blocking("c", Some(Duration::from_secs(5)))
        .unwrap();
    assert!(!c.done());
    assert!(!b.done());
}

#[test]
fn test_submit_blocking_waits_for_slot() {
    let (executor, outbound, inbound) = session(1);
    let executor = Arc::new(executor);
    let first = executor.submit("first").unwrap();
    let (first_id, _) = next_submit(&outbound);

    let waiter = {
        let executor = Arc::clone(&executor);
        thread::spawn(move || executor.submit_blocking("second", None))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());

    deliver(&inbound, Frame::result(first_id, Vec::new()));
    let second = waiter.join().unwrap().unwrap();
    assert!(first.result(WAIT).is_ok());
    let (second_id, payload) = next_submit(&outbound);
    assert_eq!(second_id, second.task_id());
    assert_eq!(payload, b"second".to_vec());
}

#[test]
fn test_duplicate_delivery_is_idempotent() {
    let (executor, outbound, inbound) = session(4);
    let future = executor.submit("x").unwrap();
    let (task_id, _) = next_submit(&outbound);

    deliver(&inbound, Frame::result(task_id, b"first".to_vec()));
    deliver(&inbound, Frame::result(task_id, b"second".to_vec()));
    deliver(&inbound, Frame::exception(task_id, "late"));
    // 用一个后续任务确认前面的帧都已处理
    let marker = executor.submit("marker").unwrap();
    let (marker_id, _) = next_submit(&outbound);
    deliver(&inbound, Frame::result(marker_id, Vec::new()));
    marker.result(WAIT).unwrap();

    assert_eq!(future.result(WAIT).unwrap().as_ref(), b"first");
    assert!(!future.resolve(Err(TaskError::Cancelled)));
}

#[test]
fn test_failure_kinds_mapped_to_errors() {
    let (executor, outbound, inbound) = session(4);
    let raised = executor.submit("raise").unwrap();
    let lost = executor.submit("lost").unwrap();
    let (raised_id, _) = next_submit(&outbound);
    let (lost_id, _) = next_submit(&outbound);

    deliver(&inbound, Frame::exception(raised_id, "division by zero"));
    deliver(&inbound, Frame::worker_lost(lost_id, 3));

    assert_eq!(
        raised.result(WAIT),
        Err(TaskError::TaskException("division by zero".into()))
    );
    assert_eq!(lost.result(WAIT), Err(TaskError::WorkerLost { attempts: 3 }));
}

#[test]
fn test_disconnect_fails_pending_with_connection_lost() {
    let (executor, _outbound, inbound) = session(8);
    let futures: Vec<_> = (0..3).map(|_| executor.submit("p").unwrap()).collect();
    inbound
        .send(Inbound::Disconnected("heartbeat timeout".into()))
        .unwrap();

    for future in &futures {
        assert_eq!(
            future.result(WAIT),
            Err(TaskError::ConnectionLost("heartbeat timeout".into()))
        );
    }
    assert!(matches!(
        executor.submit("late"),
        Err(TaskError::ConnectionLost(_))
    ));
    assert!(executor.client().is_closed());
}

#[test]
fn test_shutdown_fails_pending_futures() {
    let (executor, _outbound, _inbound) = session(8);
    let future = executor.submit("p").unwrap();
    executor.shutdown();
    assert!(matches!(
        future.result(WAIT),
        Err(TaskError::ConnectionLost(_))
    ));
}

#[test]
fn test_cancel_notifies_interchange_and_frees_slot() {
    let (executor, outbound, inbound) = session(1);
    let future = executor.submit("slow").unwrap();
    let (task_id, _) = next_submit(&outbound);

    assert!(future.cancel());
    assert!(!future.cancel());
    assert!(future.cancelled());
    assert_eq!(future.result(WAIT), Err(TaskError::Cancelled));
    assert_eq!(
        outbound.recv_timeout(Duration::from_secs(5)).unwrap(),
        Outbound::Cancel(task_id)
    );
    assert_eq!(executor.outstanding(), 0);

    // 取消后到达的结果被忽略
    deliver(&inbound, Frame::result(task_id, b"late".to_vec()));
    let next = executor.submit("next").unwrap();
    assert_ne!(next.task_id(), task_id);
    assert_eq!(future.try_result(), Some(Err(TaskError::Cancelled)));
}

#[test]
fn test_cancel_forwarded_while_submit_undrained() {
    let (executor, outbound, _inbound) = session(1);
    let future = executor.submit("queued").unwrap();

    // 传输线程尚未取走提交帧时取消
    assert!(future.cancel());
    let (task_id, _) = next_submit(&outbound);
    assert_eq!(task_id, future.task_id());
    assert_eq!(
        outbound.recv_timeout(Duration::from_secs(5)).unwrap(),
        Outbound::Cancel(task_id)
    );
    assert_eq!(executor.outstanding(), 0);
}

#[test]
fn test_result_wait_times_out_without_resolving() {
    let (executor, _outbound, _inbound) = session(4);
    let future = executor.submit("never").unwrap();
    assert_eq!(
        future.result(Some(Duration::from_millis(50))),
        Err(TaskError::Timeout)
    );
    assert!(!future.done());
    assert_eq!(future.try_result(), None);
}

#[tokio::test]
async fn test_future_can_be_awaited() {
    let (executor, outbound, inbound) = session(4);
    let future = executor.submit("async").unwrap();

    tokio::task::spawn_blocking(move || {
        let (task_id, payload) = next_submit(&outbound);
        deliver(&inbound, Frame::result(task_id, payload));
    });

    let output = tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("future resolved")
        .unwrap();
    assert_eq!(output.as_ref(), b"async");
}
