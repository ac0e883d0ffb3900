/// 客户端与交换机之间的基本消息帧
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(uint64, tag = "1")]
    pub task_id: u64,
    #[prost(enumeration = "FrameKind", tag = "2")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}
/// 一次发往单个工作节点的任务批次
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Batch {
    #[prost(uint64, tag = "1")]
    pub batch_id: u64,
    #[prost(message, repeated, tag = "2")]
    pub tasks: ::prost::alloc::vec::Vec<Frame>,
}
/// 工作节点回传的结果批次
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultBatch {
    #[prost(string, tag = "1")]
    pub worker_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub results: ::prost::alloc::vec::Vec<Frame>,
}
/// 工作节点注册消息
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Registration {
    #[prost(string, tag = "1")]
    pub worker_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub capacity: u32,
    #[prost(string, tag = "3")]
    pub version: ::prost::alloc::string::String,
}
/// 心跳消息
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(string, tag = "1")]
    pub worker_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(uint32, tag = "3")]
    pub current_tasks: u32,
    #[prost(uint32, tag = "4")]
    pub capacity: u32,
}
/// 工作节点主动下线
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Deregistration {
    #[prost(string, tag = "1")]
    pub worker_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}
/// 工作节点经任务通道上行的消息
#[derive(serde::Serialize, serde::Deserialize)]
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerMessage {
    #[prost(oneof = "worker_message::Body", tags = "1, 2, 3")]
    pub body: ::core::option::Option<worker_message::Body>,
}
/// Nested message and enum types in `WorkerMessage`.
pub mod worker_message {
    #[derive(serde::Serialize, serde::Deserialize)]
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Registration(super::Registration),
        #[prost(message, tag = "2")]
        Heartbeat(super::Heartbeat),
        #[prost(message, tag = "3")]
        Deregistration(super::Deregistration),
    }
}
/// 帧类型
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    Task = 0,
    Result = 1,
    Exception = 2,
    WorkerLost = 3,
    Cancel = 4,
    Heartbeat = 5,
}
impl FrameKind {
    /// String value of the enum field names used in the ProtoBuf definition.
    ///
    /// The values are not transformed in any way and thus are considered stable
    /// (if the ProtoBuf definition does not change) and safe for programmatic use.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            FrameKind::Task => "TASK",
            FrameKind::Result => "RESULT",
            FrameKind::Exception => "EXCEPTION",
            FrameKind::WorkerLost => "WORKER_LOST",
            FrameKind::Cancel => "CANCEL",
            FrameKind::Heartbeat => "HEARTBEAT",
        }
    }
    /// Creates an enum from field names used in the ProtoBuf definition.
    pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
        match value {
            "TASK" => Some(Self::Task),
            "RESULT" => Some(Self::Result),
            "EXCEPTION" => Some(Self::Exception),
            "WORKER_LOST" => Some(Self::WorkerLost),
            "CANCEL" => Some(Self::Cancel),
            "HEARTBEAT" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}
