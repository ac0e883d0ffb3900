use std::io;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};

use super::table::FutureTable;
use super::Inbound;
use crate::proto::{Frame, FrameKind};
use crate::TaskError;

/// 结果路由线程, 从入站通道取帧并完成对应的future
pub struct ResultRouter {
    thread: Option<thread::JoinHandle<()>>,
}

impl ResultRouter {
    pub(crate) fn spawn(table: Arc<FutureTable>, inbound: Receiver<Inbound>) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name("result-router".into())
            .spawn(move || Self::run(&table, &inbound))?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    fn run(table: &FutureTable, inbound: &Receiver<Inbound>) {
        loop {
            match inbound.recv() {
                Ok(Inbound::Frame(frame)) => Self::route(table, frame),
                Ok(Inbound::Disconnected(reason)) => {
                    Self::fail_all(table, &reason);
                    return;
                }
                Err(_) => {
                    Self::fail_all(table, "inbound channel closed");
                    return;
                }
            }
        }
    }

    fn route(table: &FutureTable, frame: Frame) {
        let task_id = frame.task_id;
        let outcome = match frame.kind() {
            FrameKind::Result => Ok(Bytes::from(frame.payload)),
            FrameKind::Exception => Err(TaskError::TaskException(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            )),
            FrameKind::WorkerLost => Err(TaskError::WorkerLost {
                attempts: frame.lost_attempts(),
            }),
            other => {
                warn!("Ignoring {} frame for task {}", other.as_str_name(), task_id);
                return;
            }
        };

        match table.take(task_id) {
            Some(future) => {
                if !future.resolve(outcome) {
                    debug!("Task {} was already resolved", task_id);
                }
            }
            None => debug!("Dropping result for unknown or finished task {}", task_id),
        }
    }

    fn fail_all(table: &FutureTable, reason: &str) {
        let pending = table.close(reason);
        info!("Result router stopping ({}), failing {} pending task(s)", reason, pending.len());
        for future in pending {
            future.resolve(Err(TaskError::ConnectionLost(reason.to_string())));
        }
    }

    /// 等待路由线程退出
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
