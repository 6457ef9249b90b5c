//! takopi - run coding-agent CLIs from chat threads
//!
//! takopi bridges a chat interface to external coding agents (engines) such
//! as Codex, Claude Code and pi. Each request runs the engine as a subprocess,
//! its native JSON output is translated into a uniform event stream, and the
//! session it opens can be resumed later from a single resume line that is
//! round-tripped through chat messages.
//!
//! ## Layers
//!
//! 1. **[`agent`]**: runners per engine, the engine registry and the
//!    subprocess plumbing.
//! 2. **[`queue`]**: at most one run per session key, FIFO per key,
//!    cooperative cancellation.
//! 3. **[`orchestrator`]**: resolves chat messages to runs and forwards
//!    their events to a [`ChatSink`](orchestrator::ChatSink).

pub mod agent;
pub mod config;
pub mod domain;
pub mod orchestrator;
pub mod queue;

pub use domain::*;
