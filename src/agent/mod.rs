//! Engine execution.
//!
//! Every engine (a coding-agent CLI such as Codex, Claude Code or pi) is driven
//! through the [`Runner`] trait. A runner spawns the CLI, translates its
//! native JSON-lines output into [`TakopiEvent`](crate::TakopiEvent)s and
//! owns the engine's resume line syntax.
//!
//! # Architecture
//!
//! - **[`Runner`]** - the trait every engine implements.
//! - **Runners** - [`CodexRunner`], [`ClaudeRunner`] and [`PiRunner`].
//! - **[`EngineRegistry`]** - the closed set of runners, keyed by engine id.
//! - **[`ResumeFormat`]** - shared resume line formatting and recognition.
//! - **[`SessionLocks`]** - at most one live invocation per resume token.
//! - **`RunEmitter` / `process`** - shared subprocess plumbing that keeps each
//!   run's event stream well formed.

mod claude;
mod codex;
mod emitter;
mod pi;
mod process;
mod registry;
mod resume;
mod runner;
mod session_lock;

pub use claude::{ClaudeRunner, ClaudeTranslator, StreamEvent};
pub use codex::{CodexRunner, CodexTranslator};
pub use emitter::RunEmitter;
pub use pi::{PiRunner, PiTranslator};
pub use process::{ExitInfo, Invocation, STDERR_TAIL_LINES, Translator, execute, launch, terminate};
pub use registry::{EngineRegistry, ResolveError};
pub use resume::{ResumeError, ResumeFormat};
pub use runner::{
    DEFAULT_CANCEL_GRACE, DEFAULT_EVENT_BUFFER, EventStream, RunLimits, RunRequest, Runner,
    SetupIssue, binary_available,
};
pub use session_lock::{SessionGuard, SessionLocks};
