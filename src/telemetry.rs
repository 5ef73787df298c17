//! Lifecycle notices for HTTP flow state
//!
//! Notices are emitted as structured JSON log lines that Envoy's log
//! collection can pick up. They exist for instrumentation only; nothing
//! in flow handling depends on them being seen.

use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static INSTANCE_COUNT: AtomicU64 = AtomicU64::new(0);

/// Next flow state sequence number, starting at 1
pub fn next_instance_seq() -> u64 {
    INSTANCE_COUNT.fetch_add(1, Ordering::Relaxed) + 1
}

/// Notice types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Flow state created
    FlowDataConstruct,
    /// Flow state destroyed
    FlowDataDestruct,
    /// More requests pipelined than the flow can track
    PipelineOverflow,
    /// Response with no request to pair it with
    PipelineUnderflow,
}

impl NoticeKind {
    fn label(self) -> &'static str {
        match self {
            NoticeKind::FlowDataConstruct => "Flow Data construct",
            NoticeKind::FlowDataDestruct => "Flow Data destruct",
            NoticeKind::PipelineOverflow => "Pipeline overflow",
            NoticeKind::PipelineUnderflow => "Pipeline underflow",
        }
    }
}

/// One lifecycle notice
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleNotice {
    pub kind: NoticeKind,
    /// Flow state sequence number
    pub seq_num: u64,
    /// Human readable summary, e.g. `Flow Data construct 3`
    pub message: String,
    /// Transactions still queued, for pipeline notices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<usize>,
}

impl LifecycleNotice {
    pub fn new(kind: NoticeKind, seq_num: u64) -> Self {
        Self {
            kind,
            seq_num,
            message: format!("{} {}", kind.label(), seq_num),
            queued: None,
        }
    }

    pub fn with_queued(mut self, queued: usize) -> Self {
        self.queued = Some(queued);
        self
    }

    /// Log the notice
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.kind {
                NoticeKind::PipelineOverflow | NoticeKind::PipelineUnderflow => {
                    warn!("[HTTP-FLOW] {}", json);
                }
                _ => {
                    info!("[HTTP-FLOW] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize lifecycle notice: {}", e);
            }
        }
    }
}
