//! Core domain types for takopi

mod engine;
mod event;
mod session;

pub use engine::{EngineId, ResumeToken};
pub use event::{
    Action, ActionEvent, ActionKind, ActionLevel, ActionPhase, CANCELLED, CompletedEvent,
    StartedEvent, TERMINATED, TakopiEvent,
};
pub use session::{SessionKey, SessionRef, ThreadId};
