//! Per-request execution bookkeeping.

use shared_types::CorrelationId;
use std::fmt;
use std::time::Instant;

/// Progress of one execution request.
///
/// RECEIVED → DISPATCHED → COMPLETED → REPLIED. Requests without a handler
/// skip straight from RECEIVED to REPLIED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionPhase {
    Received,
    Dispatched,
    Completed,
    Replied,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::Dispatched => "DISPATCHED",
            Self::Completed => "COMPLETED",
            Self::Replied => "REPLIED",
        };
        f.write_str(name)
    }
}

/// State of a single handler invocation, owned by its execution task.
#[derive(Debug)]
pub struct ExecutionContext {
    pub context_id: String,
    pub correlation_id: CorrelationId,
    /// Family of the handler it was dispatched to, once known
    pub family: Option<String>,
    phase: ExecutionPhase,
    started_at: Instant,
}

impl ExecutionContext {
    pub fn new(correlation_id: CorrelationId, context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            correlation_id,
            family: None,
            phase: ExecutionPhase::Received,
            started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Phases only move forward.
    pub fn advance(&mut self, next: ExecutionPhase) {
        if next <= self.phase {
            return;
        }
        tracing::trace!(
            correlation_id = %self.correlation_id,
            context_id = %self.context_id,
            from = %self.phase,
            to = %next,
            "Execution phase"
        );
        self.phase = next;
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
