//! Subprocess plumbing shared by the JSON-lines runners.
//!
//! [`execute`] owns one engine process from spawn to exit: it feeds the
//! prompt, drains stderr, hands each stdout line to the engine's
//! [`Translator`] as soon as it arrives and guarantees a terminal event on
//! every exit path (normal, crash, cancellation).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::emitter::RunEmitter;
use crate::{CANCELLED, ResumeToken, TERMINATED, TakopiEvent};

/// Number of stderr lines kept for failure reports
pub const STDERR_TAIL_LINES: usize = 200;

/// How long to wait for stderr to close after the process exited
const STDERR_SETTLE: Duration = Duration::from_secs(1);

/// Fully resolved command line of one engine invocation
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to stdin and then closed; stdin is null when absent
    pub stdin: Option<String>,
    pub env: HashMap<String, String>,
    pub env_remove: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.env_remove {
            command.env_remove(key);
        }
        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

/// How the process ended
#[derive(Debug, Clone)]
pub struct ExitInfo {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub success: bool,
    pub stderr_tail: String,
}

/// Engine specific mapping of native output to [`TakopiEvent`]s
pub trait Translator: Send + 'static {
    /// Map one parsed stdout line
    fn translate(&mut self, line: &Value) -> Vec<TakopiEvent>;

    /// Events for a process that exited before reporting completion
    fn finish(&mut self, exit: &ExitInfo, session: Option<&ResumeToken>) -> Vec<TakopiEvent>;

    /// Best answer seen so far, used when the run is cut short
    fn answer(&self) -> String;
}

enum Stop {
    Eof,
    Cancelled,
}

/// Run `invocation` to completion, streaming translated events into `emitter`
pub async fn execute<T: Translator>(
    invocation: Invocation,
    mut translator: T,
    emitter: &mut RunEmitter,
    cancel: &CancellationToken,
    grace: Duration,
) {
    let engine = emitter.engine().to_string();

    let mut child = match invocation.command().spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(engine = %engine, program = %invocation.program, "spawn failed: {}", e);
            emitter
                .finish(&format!("failed to launch {}: {}", engine, e), "")
                .await;
            return;
        }
    };
    tracing::debug!(engine = %engine, pid = ?child.id(), args = ?invocation.args, "spawned");

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), invocation.stdin) {
        // Separate task so a chatty process cannot deadlock against a large prompt
        tokio::spawn(async move {
            let _ = stdin.write_all(input.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate(&mut child, grace).await;
        emitter
            .finish(&format!("{} failed to open subprocess pipes", engine), "")
            .await;
        return;
    };
    let stderr_task = drain_stderr(stderr, engine.clone());
    let mut stdout = BufReader::new(stdout);
    let mut buf = Vec::new();

    let mut stop = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Stop::Cancelled,
            next = read_line(&mut stdout, &mut buf) => next,
        };
        match next {
            Ok(Some(line)) => {
                // Keep reading after completion so the process never blocks on a full pipe
                if emitter.is_completed() {
                    continue;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => emitter.emit_all(translator.translate(&value)).await,
                    Err(_) => {
                        tracing::debug!(engine = %engine, "invalid JSON line: {}", trimmed);
                        let mut detail = Map::new();
                        detail.insert("line".into(), Value::String(line.clone()));
                        emitter
                            .note(format!("invalid JSON from {}; ignoring line", engine), detail)
                            .await;
                    }
                }
            }
            Ok(None) => break Stop::Eof,
            Err(e) => {
                tracing::warn!(engine = %engine, "failed to read stdout: {}", e);
                break Stop::Eof;
            }
        }
    };

    let mut status = None;
    if matches!(stop, Stop::Eof) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => stop = Stop::Cancelled,
            result = child.wait() => status = result.ok(),
        }
    }

    if matches!(stop, Stop::Cancelled) {
        tracing::info!(engine = %engine, pid = ?child.id(), "cancelling run");
        terminate(&mut child, grace).await;
        let _ = collect_tail(stderr_task).await;
        emitter.finish(CANCELLED, translator.answer()).await;
        return;
    }

    let stderr_tail = collect_tail(stderr_task).await;
    let exit = ExitInfo {
        code: status.and_then(|s| s.code()),
        success: status.map(|s| s.success()).unwrap_or(false),
        stderr_tail,
    };
    tracing::debug!(engine = %engine, code = ?exit.code, "process exited");

    if !emitter.is_completed() {
        let events = translator.finish(&exit, emitter.session());
        emitter.emit_all(events).await;
    }
    emitter.finish(TERMINATED, translator.answer()).await;
}

/// Take the resumed session's lock, then run the process on its own task
pub fn launch<T: Translator>(
    invocation: Invocation,
    translator: T,
    mut emitter: RunEmitter,
    cancel: CancellationToken,
    grace: Duration,
) {
    tokio::spawn(async move {
        if !emitter.lock_resumed_session().await {
            emitter.finish(CANCELLED, "").await;
            return;
        }
        execute(invocation, translator, &mut emitter, &cancel, grace).await;
    });
}

fn drain_stderr(stderr: ChildStderr, engine: String) -> JoinHandle<VecDeque<String>> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            let line = match read_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(engine = %engine, "failed to read stderr: {}", e);
                    break;
                }
            };
            tracing::debug!(engine = %engine, "stderr: {}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    })
}

/// Next line of `reader` without its terminator; invalid UTF-8 is replaced,
/// never treated as end of stream. `Ok(None)` at EOF.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn collect_tail(task: JoinHandle<VecDeque<String>>) -> String {
    // Grandchildren may keep stderr open after the engine itself exited
    match tokio::time::timeout(STDERR_SETTLE, task).await {
        Ok(Ok(tail)) => tail.into_iter().collect::<Vec<_>>().join("\n"),
        _ => String::new(),
    }
}

/// Ask the process to stop, then kill it once `grace` has passed
pub async fn terminate(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let signalled = child.id().map(interrupt).unwrap_or(false);
    if signalled {
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::debug!(pid = ?child.id(), "process ignored SIGTERM, killing");
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill process: {}", e);
    }
}

/// Send SIGTERM to `pid`
#[cfg(unix)]
fn interrupt(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agent::session_lock::SessionLocks;
    use crate::{ActionEvent, CompletedEvent, EngineId};
    use std::time::Instant;

    /// Treats `{"answer": ..}` lines as completion and everything else as a note
    struct EchoTranslator {
        last: String,
    }

    impl Translator for EchoTranslator {
        fn translate(&mut self, line: &Value) -> Vec<TakopiEvent> {
            if let Some(answer) = line.get("answer").and_then(|a| a.as_str()) {
                self.last = answer.to_string();
                return vec![CompletedEvent::success(EngineId::new("echo"), answer, None).into()];
            }
            if let Some(text) = line.get("text").and_then(|t| t.as_str()) {
                self.last = text.to_string();
                return vec![
                    ActionEvent::note(EngineId::new("echo"), "n", text, true, Map::new()).into(),
                ];
            }
            Vec::new()
        }

        fn finish(&mut self, exit: &ExitInfo, _session: Option<&ResumeToken>) -> Vec<TakopiEvent> {
            let mut detail = Map::new();
            detail.insert("stderr_tail".into(), exit.stderr_tail.clone().into());
            vec![ActionEvent::note(EngineId::new("echo"), "exit", "exited", false, detail).into()]
        }

        fn answer(&self) -> String {
            self.last.clone()
        }
    }

    fn sh(script: &str) -> Invocation {
        let mut invocation = Invocation::new("/bin/sh");
        invocation.args = vec!["-c".to_string(), script.to_string()];
        invocation
    }

    async fn run(invocation: Invocation, cancel: CancellationToken) -> Vec<TakopiEvent> {
        let (mut emitter, stream) = RunEmitter::channel(
            EngineId::new("echo"),
            16,
            SessionLocks::new(),
            cancel.clone(),
            None,
        );
        let translator = EchoTranslator { last: String::new() };
        execute(invocation, translator, &mut emitter, &cancel, Duration::from_millis(200)).await;
        drop(emitter);
        stream.collect().await
    }

    #[tokio::test]
    async fn test_completed_line_ends_run() {
        let events = run(
            sh(r#"echo '{"text":"hi"}'; echo 'not json'; echo '{"answer":"done"}'"#),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(events.len(), 3);
        let completed = events.last().unwrap().as_completed().unwrap();
        assert!(completed.ok);
        assert_eq!(completed.answer, "done");
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stdout_keeps_reading() {
        let events = run(
            sh(r#"printf '\377\376\n'; echo '{"answer":"final answer"}'"#),
            CancellationToken::new(),
        )
        .await;
        let completed = events.last().unwrap().as_completed().unwrap();
        assert!(completed.ok);
        assert_eq!(completed.answer, "final answer");
    }

    #[tokio::test]
    async fn test_invalid_utf8_before_large_output_does_not_stall() {
        let script = r#"printf '\377\376\n'
printf '{"text":"'; head -c 200000 /dev/zero | tr '\0' x; printf '"}\n'
echo '{"answer":"done"}'"#;
        let events = tokio::time::timeout(
            Duration::from_secs(5),
            run(sh(script), CancellationToken::new()),
        )
        .await
        .expect("run stalled");
        let completed = events.last().unwrap().as_completed().unwrap();
        assert_eq!(completed.answer, "done");
    }

    #[tokio::test]
    async fn test_invalid_utf8_on_stderr_keeps_draining() {
        let script = r#"printf '\377\376\n' >&2
i=0; while [ $i -lt 500 ]; do echo "noise $i" >&2; i=$((i+1)); done
echo '{"answer":"done"}'"#;
        let events = run(sh(script), CancellationToken::new()).await;
        let completed = events.last().unwrap().as_completed().unwrap();
        assert!(completed.ok);
        assert_eq!(completed.answer, "done");
    }

    #[tokio::test]
    async fn test_stderr_tail_survives_invalid_utf8() {
        let events = run(
            sh(r#"printf 'bad \377\n' >&2; echo oops >&2; exit 3"#),
            CancellationToken::new(),
        )
        .await;
        match &events[0] {
            TakopiEvent::Action(a) => {
                assert_eq!(a.action.detail["stderr_tail"], "bad \u{fffd}\noops")
            }
            other => panic!("expected exit note, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stdin_is_delivered() {
        let mut invocation = sh(r#"read line; printf '{"answer":"%s"}\n' "$line""#);
        invocation.stdin = Some("from stdin\n".to_string());
        let events = run(invocation, CancellationToken::new()).await;
        assert_eq!(events.last().unwrap().as_completed().unwrap().answer, "from stdin");
    }

    #[tokio::test]
    async fn test_exit_without_completion_is_terminated() {
        let events = run(sh("echo oops >&2; exit 3"), CancellationToken::new()).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            TakopiEvent::Action(a) => assert_eq!(a.action.detail["stderr_tail"], "oops"),
            other => panic!("expected exit note, got {:?}", other),
        }
        let completed = events[1].as_completed().unwrap();
        assert!(!completed.ok);
        assert_eq!(completed.error.as_deref(), Some(TERMINATED));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let events = run(
            Invocation::new("/nonexistent/takopi-engine"),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(events.len(), 1);
        let completed = events[0].as_completed().unwrap();
        assert!(!completed.ok);
        assert!(completed.error.as_deref().unwrap().starts_with("failed to launch echo"));
    }

    #[tokio::test]
    async fn test_cancel_kills_stubborn_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let began = Instant::now();
        let events = run(
            sh(r#"trap '' TERM; echo '{"text":"working"}'; while true; do sleep 0.05; done"#),
            cancel,
        )
        .await;
        assert!(began.elapsed() < Duration::from_secs(5));

        let completed = events.last().unwrap().as_completed().unwrap();
        assert!(completed.is_cancelled());
        assert_eq!(completed.answer, "working");
    }
}
