//! Per-session run queue

mod thread_queue;

pub use thread_queue::{
    ActiveRun, Admission, CancelOutcome, QueueError, RunContext, RunJob, SessionState, ThreadQueue,
};
