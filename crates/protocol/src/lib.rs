//! Wire contract between the caller and the isolated rendering context.
//!
//! Both directions are closed sum types with exhaustive dispatch at the
//! boundaries, so adding a message kind is a compile-time-checked change.
//! All request fields are plain, copy-safe data; the bitmap payload of a
//! response transfers ownership of its backing memory on send.

use model::{Bitmap, InputPoint, RenderOptions};

pub type LayerId = u64;
pub type RequestId = u64;

/// Caller → worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    Init {
        width: u32,
        height: u32,
        pixel_ratio: Option<f32>,
    },
    Resize {
        width: u32,
        height: u32,
        pixel_ratio: Option<f32>,
    },
    Ping,
    Snapshot {
        layer_id: Option<LayerId>,
    },
    RenderStroke {
        layer_id: Option<LayerId>,
        options: RenderOptions,
        path: Vec<InputPoint>,
        seed: Option<u64>,
    },
}

/// Which request an `Ack` terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Init,
    Resize,
}

/// Worker → caller. Every request maps to exactly one terminal response;
/// `Error` terminates whichever wait is outstanding, regardless of kind.
#[derive(Debug, PartialEq)]
pub enum WorkerResponse {
    Ack {
        for_kind: AckKind,
    },
    Pong,
    Bitmap {
        bitmap: Bitmap,
        layer_id: Option<LayerId>,
    },
    Error {
        message: String,
    },
    /// Reserved for future flows; nothing emits it today.
    Done {
        id: Option<RequestId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Init,
    Resize,
    Ping,
    Snapshot,
    RenderStroke,
}

impl WorkerRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            WorkerRequest::Init { .. } => RequestKind::Init,
            WorkerRequest::Resize { .. } => RequestKind::Resize,
            WorkerRequest::Ping => RequestKind::Ping,
            WorkerRequest::Snapshot { .. } => RequestKind::Snapshot,
            WorkerRequest::RenderStroke { .. } => RequestKind::RenderStroke,
        }
    }
}

impl WorkerResponse {
    /// Whether this response is the terminal message for a request of the
    /// given kind. `Error` terminates any pending wait; `Done` is reserved
    /// and terminates nothing.
    pub fn terminates(&self, kind: RequestKind) -> bool {
        match self {
            WorkerResponse::Ack { for_kind } => match (for_kind, kind) {
                (AckKind::Init, RequestKind::Init) => true,
                (AckKind::Resize, RequestKind::Resize) => true,
                _ => false,
            },
            WorkerResponse::Pong => kind == RequestKind::Ping,
            WorkerResponse::Bitmap { .. } => {
                kind == RequestKind::Snapshot || kind == RequestKind::RenderStroke
            }
            WorkerResponse::Error { .. } => true,
            WorkerResponse::Done { .. } => false,
        }
    }
}
