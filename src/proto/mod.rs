pub mod interchange;

use prost::Message;

pub use interchange::{
    worker_message, Batch, Deregistration, Frame, FrameKind, Heartbeat, Registration, ResultBatch,
    WorkerMessage,
};

use crate::TaskId;

impl Frame {
    pub fn new(task_id: TaskId, kind: FrameKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_id,
            kind: kind as i32,
            payload: payload.into(),
        }
    }

    pub fn task(task_id: TaskId, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(task_id, FrameKind::Task, payload)
    }

    pub fn result(task_id: TaskId, output: impl Into<Vec<u8>>) -> Self {
        Self::new(task_id, FrameKind::Result, output)
    }

    /// 应用层异常, 负载为UTF-8错误信息
    pub fn exception(task_id: TaskId, message: &str) -> Self {
        Self::new(task_id, FrameKind::Exception, message.as_bytes())
    }

    /// 超过重试上限后的节点丢失, 负载为分派次数
    pub fn worker_lost(task_id: TaskId, attempts: u32) -> Self {
        Self::new(task_id, FrameKind::WorkerLost, attempts.to_be_bytes().to_vec())
    }

    pub fn cancel(task_id: TaskId) -> Self {
        Self::new(task_id, FrameKind::Cancel, Vec::new())
    }

    pub fn heartbeat() -> Self {
        Self::new(0, FrameKind::Heartbeat, Vec::new())
    }

    /// 解析 `WorkerLost` 帧中的分派次数
    pub fn lost_attempts(&self) -> u32 {
        <[u8; 4]>::try_from(self.payload.as_slice())
            .map(u32::from_be_bytes)
            .unwrap_or(0)
    }
}

/// 编码任意protobuf消息
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>, prost::EncodeError> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)?;
    Ok(buf)
}
