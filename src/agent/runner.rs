//! Generic runner trait

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::resume::{ResumeError, ResumeFormat};
use crate::{EngineId, ResumeToken, TakopiEvent};

/// Default capacity of a run's event channel
pub const DEFAULT_EVENT_BUFFER: usize = 64;
/// Default time between SIGTERM and SIGKILL when a run is cancelled
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// One invocation request for a runner
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub prompt: String,
    pub resume: Option<ResumeToken>,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>, resume: Option<ResumeToken>) -> Self {
        Self {
            prompt: prompt.into(),
            resume,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Limits shared by every run of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Capacity of the bounded event channel
    pub event_buffer: usize,
    /// Grace period before a cancelled process is killed
    pub cancel_grace: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Live, forward-only stream of one run's events
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<TakopiEvent>,
}

impl EventStream {
    /// Create a bounded producer/consumer pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<TakopiEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Next event, or `None` once the producer is gone
    pub async fn next_event(&mut self) -> Option<TakopiEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to the end
    pub async fn collect(mut self) -> Vec<TakopiEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = TakopiEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Something an operator has to fix before an engine can run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetupIssue {
    pub title: String,
    pub lines: Vec<String>,
}

impl SetupIssue {
    pub fn new(title: impl Into<String>, lines: &[&str]) -> Self {
        Self {
            title: title.into(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Trait for engine runners
///
/// A runner owns everything engine specific: the command line, the native
/// output protocol and the resume line syntax. Callers only see
/// [`TakopiEvent`]s.
pub trait Runner: Send + Sync {
    /// The engine this runner drives
    fn engine(&self) -> &EngineId;

    /// Default title used for runs of this engine
    fn title(&self) -> &str;

    /// Resume line syntax of this engine
    fn resume_format(&self) -> &ResumeFormat;

    fn format_resume(&self, token: &ResumeToken) -> Result<String, ResumeError> {
        self.resume_format().format(token)
    }

    fn extract_resume(&self, text: &str) -> Option<ResumeToken> {
        self.resume_format().extract(text)
    }

    fn is_resume_line(&self, text: &str) -> bool {
        self.resume_format().is_resume_line(text)
    }

    /// Start (or resume) one invocation.
    ///
    /// Returns immediately; events arrive on the stream while the engine runs.
    /// The stream always ends with exactly one `Completed` unless the
    /// producer task itself dies.
    fn run(&self, request: RunRequest) -> EventStream;

    /// Check if the engine binary can be found
    fn is_available(&self) -> bool;

    fn check_setup(&self) -> Vec<SetupIssue> {
        Vec::new()
    }

    fn startup_message(&self, cwd: &str) -> String {
        format!("{} is ready\npwd: {}", self.engine(), cwd)
    }
}

/// Check whether `program` resolves to an executable
pub fn binary_available(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(program).is_file();
    }
    std::process::Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
