//! The debugger session wrapper: owns the cdb child process and serializes
//! one command at a time over its stdin/stdout.
//!
//! Serialization is the queue's job (single consumer); this type guarantees
//! that `execute` never holds a session-wide lock while blocked on I/O, that
//! `is_active` is lock-free, and that start/stop are mutually exclusive.

use crate::locate::locate_debugger;
use crate::output::cap_output;
use crate::prompt::{end_marker, is_prompt_line, start_marker};
use cdm_config::DebuggerSettings;
use cdm_core::{DebugError, new_session_id};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 4096;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const NO_DATA_WARN_AFTER: Duration = Duration::from_secs(5);
const RECENT_LINE_CAP: usize = 50;
const STDERR_TAIL_CAP: usize = 8 * 1024;
const FORCE_KILL_WAIT: Duration = Duration::from_secs(1);

/// Symbol-server request timeout exported to the debugger child (ms).
pub const SYMSRV_TIMEOUT_ENV: &str = "SYMSRV_TIMEOUT_MS";
/// Symbol-server retry cap exported to the debugger child.
pub const SYMSRV_RETRIES_ENV: &str = "SYMSRV_MAX_RETRIES";
/// Symbol search path, preserved from the parent when not configured.
pub const SYMBOL_PATH_ENV: &str = "_NT_SYMBOL_PATH";

/// Snapshot of the live session for diagnostics.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub target: String,
    pub pid: u32,
    pub active: bool,
}

/// What the debugger is attached to.
#[derive(Clone, Debug)]
pub enum LaunchTarget {
    DumpFile {
        path: PathBuf,
        symbols: Option<String>,
    },
    Remote {
        connection: String,
        symbols: Option<String>,
    },
}

impl LaunchTarget {
    pub fn symbols(&self) -> Option<&str> {
        match self {
            Self::DumpFile { symbols, .. } | Self::Remote { symbols, .. } => symbols.as_deref(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::DumpFile { path, .. } => format!("dump {}", path.display()),
            Self::Remote { connection, .. } => format!("remote {connection}"),
        }
    }

    fn append_args(&self, args: &mut Vec<String>) {
        match self {
            Self::DumpFile { path, .. } => {
                args.push("-z".into());
                args.push(path.to_string_lossy().into_owned());
            }
            Self::Remote { connection, .. } => {
                args.push("-remote".into());
                args.push(connection.clone());
            }
        }
    }
}

enum OutputChunk {
    /// A complete line, `\r\n` stripped.
    Line(String),
    /// A pending partial line that matches the ready prompt.
    Prompt(String),
}

/// Lock-free session state shared with the reader/waiter tasks.
struct Flags {
    active: AtomicBool,
    exited: AtomicBool,
    generation: AtomicU64,
}

/// Per-process handles, published once per start.
struct SessionHandle {
    pid: u32,
    stdin: tokio::sync::Mutex<ChildStdin>,
    chunks: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutputChunk>>,
    stderr_tail: Arc<Mutex<String>>,
    recent_lines: Arc<Mutex<VecDeque<String>>>,
}

pub struct CdbSession {
    settings: DebuggerSettings,
    flags: Arc<Flags>,
    session_id: Mutex<Option<String>>,
    /// Serializes start/stop/restart.
    lifecycle: tokio::sync::Mutex<()>,
    /// Last published handle; `execute` clones the Arc and releases the lock.
    handle: Mutex<Option<Arc<SessionHandle>>>,
    /// Cancel signal of the operation currently inside `execute`.
    op_cancel: Mutex<Option<CancellationToken>>,
    last_target: Mutex<Option<LaunchTarget>>,
    marker_seq: AtomicU64,
}

impl CdbSession {
    pub fn new(settings: DebuggerSettings) -> Self {
        Self {
            settings,
            flags: Arc::new(Flags {
                active: AtomicBool::new(false),
                exited: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            session_id: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
            op_cancel: Mutex::new(None),
            last_target: Mutex::new(None),
            marker_seq: AtomicU64::new(0),
        }
    }

    /// Lock-free: safe to call from any thread, including while a command is
    /// blocked inside `execute`.
    pub fn is_active(&self) -> bool {
        self.flags.active.load(Ordering::SeqCst) && !self.flags.exited.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_poisoned_ok(&self.session_id).clone()
    }

    pub fn current_target(&self) -> Option<LaunchTarget> {
        self.lock_poisoned_ok(&self.last_target).clone()
    }

    /// Diagnostics snapshot; `None` when no session has been published.
    pub fn info(&self) -> Option<SessionInfo> {
        let session_id = self.session_id()?;
        let handle = self.lock_poisoned_ok(&self.handle).clone()?;
        Some(SessionInfo {
            session_id,
            target: self
                .current_target()
                .map(|target| target.describe())
                .unwrap_or_default(),
            pid: handle.pid,
            active: self.is_active(),
        })
    }

    fn lock_poisoned_ok<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the debugger against `target` and wait for it to warm up.
    ///
    /// Returns the new session id. Fails with `AlreadyActive` when a live
    /// session exists; callers decide whether to stop first.
    pub async fn start(&self, target: LaunchTarget) -> Result<String, DebugError> {
        let _guard = self.lifecycle.lock().await;

        if self.is_active() {
            return Err(DebugError::AlreadyActive);
        }

        let exe = locate_debugger(self.settings.resolved_executable_override()).await?;
        let symbols = target
            .symbols()
            .map(str::to_owned)
            .or_else(|| self.settings.resolved_symbols_path());

        let mut args: Vec<String> = vec!["-lines".into(), "-n".into()];
        if let Some(sym) = &symbols {
            args.push("-y".into());
            args.push(sym.clone());
        }
        args.extend(self.settings.extra_args.iter().cloned());
        target.append_args(&mut args);

        info!(exe = %exe.display(), target = %target.describe(), "starting debugger session");

        let mut cmd = Command::new(&exe);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env(
                SYMSRV_TIMEOUT_ENV,
                self.settings.symbol_server_timeout_ms.to_string(),
            )
            .env(
                SYMSRV_RETRIES_ENV,
                self.settings.symbol_server_max_retries.to_string(),
            );
        if let Some(sym) = &symbols {
            cmd.env(SYMBOL_PATH_ENV, sym);
        }

        // Own process group so a stuck debugger (and any children it spawned)
        // can be killed as a tree.
        #[cfg(unix)]
        // SAFETY: setsid() is async-signal-safe and runs before exec.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DebugError::StartFailed(format!("{}: {e}", exe.display())))?;
        let pid = child.id().unwrap_or_default();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DebugError::StartFailed("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DebugError::StartFailed("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DebugError::StartFailed("child stderr not captured".into()))?;

        let generation = self.flags.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.flags.exited.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let recent_lines = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LINE_CAP)));

        tokio::spawn(read_stdout_loop(stdout, tx, recent_lines.clone()));
        tokio::spawn(read_stderr_loop(stderr, stderr_tail.clone()));

        let flags = self.flags.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            if flags.generation.load(Ordering::SeqCst) == generation {
                flags.exited.store(true, Ordering::SeqCst);
                flags.active.store(false, Ordering::SeqCst);
            }
            match status {
                Ok(status) => info!(pid, %status, "debugger process exited"),
                Err(e) => warn!(pid, error = %e, "failed to await debugger exit"),
            }
        });

        let handle = Arc::new(SessionHandle {
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            chunks: tokio::sync::Mutex::new(rx),
            stderr_tail,
            recent_lines,
        });

        let session_id = new_session_id();
        *self.lock_poisoned_ok(&self.handle) = Some(handle.clone());
        *self.lock_poisoned_ok(&self.session_id) = Some(session_id.clone());
        *self.lock_poisoned_ok(&self.last_target) = Some(target);
        self.flags.active.store(true, Ordering::SeqCst);

        tokio::time::sleep(self.settings.startup_delay()).await;
        self.drain_startup_banner(&handle).await;

        info!(pid, session_id = %session_id, "debugger session active");
        Ok(session_id)
    }

    /// Consume startup output through the first ready prompt so the first
    /// command returns its own output rather than the banner.
    async fn drain_startup_banner(&self, handle: &SessionHandle) {
        let mut rx = handle.chunks.lock().await;
        let deadline = tokio::time::Instant::now() + self.settings.read_timeout();
        let mut banner = String::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(OutputChunk::Line(line))) => {
                    banner.push_str(&line);
                    banner.push('\n');
                }
                Ok(Some(OutputChunk::Prompt(_))) | Ok(None) => break,
                Err(_) => {
                    warn!("no initial debugger prompt before the read timeout");
                    break;
                }
            }
        }
        if !banner.is_empty() {
            debug!(banner = %banner.trim_end(), "debugger startup banner");
        }
    }

    /// Stop the session: cancel the in-flight operation, ask the debugger to
    /// quit, and force-kill the process tree if it lingers. Idempotent.
    pub async fn stop(&self) -> Result<(), DebugError> {
        let _guard = self.lifecycle.lock().await;

        let handle = self.lock_poisoned_ok(&self.handle).take();
        let Some(handle) = handle else {
            self.flags.active.store(false, Ordering::SeqCst);
            return Ok(());
        };

        if let Some(token) = self.lock_poisoned_ok(&self.op_cancel).take() {
            token.cancel();
        }
        self.flags.active.store(false, Ordering::SeqCst);
        *self.lock_poisoned_ok(&self.session_id) = None;

        {
            let mut stdin = handle.stdin.lock().await;
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }

        let deadline = Instant::now() + self.settings.stop_grace();
        while !self.flags.exited.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        if !self.flags.exited.load(Ordering::SeqCst) {
            warn!(pid = handle.pid, "debugger did not quit in time; killing process tree");
            kill_process_tree(handle.pid);
            let deadline = Instant::now() + FORCE_KILL_WAIT;
            while !self.flags.exited.load(Ordering::SeqCst) && Instant::now() < deadline {
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
        }

        info!(pid = handle.pid, "debugger session stopped");
        Ok(())
    }

    /// Stop and relaunch against the last target. Used by recovery.
    pub async fn restart(&self) -> Result<String, DebugError> {
        let target = self
            .lock_poisoned_ok(&self.last_target)
            .clone()
            .ok_or(DebugError::NoSession)?;
        self.stop().await?;
        self.start(target).await
    }

    /// Run one debugger command and return its output up to the next prompt.
    ///
    /// The read is bounded by the session's internal read timeout; callers
    /// layer their own classified deadline through `external_cancel`.
    pub async fn execute(
        &self,
        text: &str,
        external_cancel: &CancellationToken,
    ) -> Result<String, DebugError> {
        if text.trim().is_empty() {
            return Err(DebugError::InvalidInput("empty debugger command".into()));
        }
        if !self.is_active() {
            return Err(DebugError::NoSession);
        }
        let handle = self
            .lock_poisoned_ok(&self.handle)
            .clone()
            .ok_or(DebugError::NoSession)?;

        let op = CancellationToken::new();
        *self.lock_poisoned_ok(&self.op_cancel) = Some(op.clone());
        // Clears the slot even when the execute future is dropped mid-await.
        let _slot_guard = OpSlotGuard { session: self };

        self.run_command(&handle, text, external_cancel, &op).await
    }

    /// True while a command is inside `execute`.
    pub fn has_operation_in_flight(&self) -> bool {
        self.lock_poisoned_ok(&self.op_cancel).is_some()
    }

    async fn run_command(
        &self,
        handle: &SessionHandle,
        text: &str,
        external_cancel: &CancellationToken,
        op: &CancellationToken,
    ) -> Result<String, DebugError> {
        let markers = if self.settings.use_command_markers {
            let nonce = self.marker_seq.fetch_add(1, Ordering::Relaxed);
            Some((start_marker(nonce), end_marker(nonce)))
        } else {
            None
        };

        let payload = match &markers {
            Some((start, end)) => format!(".echo {start}\n{text}\n.echo {end}\n"),
            None => format!("{text}\n"),
        };

        {
            let mut stdin = handle.stdin.lock().await;
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| DebugError::Io(format!("write to debugger failed: {e}")))?;
            stdin
                .flush()
                .await
                .map_err(|e| DebugError::Io(format!("flush to debugger failed: {e}")))?;
        }

        let mut rx = handle.chunks.lock().await;
        let deadline = tokio::time::Instant::now() + self.settings.read_timeout();
        let mut nap = tokio::time::interval(EXIT_POLL_INTERVAL);
        nap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut output = String::new();
        let mut last_data = Instant::now();
        let mut warned = false;
        let mut capped = false;
        // In marker mode, output before the start marker belongs to nobody.
        let mut collecting = markers.is_none();

        loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(OutputChunk::Prompt(prompt)) => {
                        last_data = Instant::now();
                        warned = false;
                        if markers.is_none() {
                            debug!(prompt = %prompt.trim(), "command complete at prompt");
                            return Ok(output);
                        }
                        // Marker mode: prompts appear between the wrapped
                        // lines; only the end marker completes the read.
                    }
                    Some(OutputChunk::Line(line)) => {
                        last_data = Instant::now();
                        warned = false;
                        if let Some((start, end)) = &markers {
                            if line.contains(end.as_str()) {
                                return Ok(output);
                            }
                            if line.contains(start.as_str()) {
                                collecting = true;
                                continue;
                            }
                        }
                        if collecting && !capped {
                            output.push_str(&line);
                            output.push('\n');
                            if cap_output(&mut output, self.settings.max_output_bytes) {
                                warn!(
                                    cap_bytes = self.settings.max_output_bytes,
                                    "command output hit the accumulation cap"
                                );
                                capped = true;
                            }
                        }
                    }
                    None => {
                        self.log_drained(handle, "output stream closed");
                        return Err(DebugError::Io("debugger output stream closed".into()));
                    }
                },
                _ = op.cancelled() => {
                    self.log_drained(handle, "operation cancelled");
                    return Err(DebugError::Cancelled("operation cancelled".into()));
                }
                _ = external_cancel.cancelled() => {
                    self.log_drained(handle, "caller cancelled");
                    return Err(DebugError::Cancelled("caller cancelled".into()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.log_drained(handle, "session read timeout");
                    return Err(DebugError::Timeout(self.settings.read_timeout()));
                }
                _ = nap.tick() => {
                    if self.flags.exited.load(Ordering::SeqCst) {
                        self.log_drained(handle, "process exited mid-command");
                        return Err(DebugError::Io("debugger process exited".into()));
                    }
                    if !warned && last_data.elapsed() >= NO_DATA_WARN_AFTER {
                        warn!(
                            silent_secs = last_data.elapsed().as_secs(),
                            "no debugger output while waiting for prompt"
                        );
                        warned = true;
                    }
                }
            }
        }
    }

    /// Cancel the current operation and nudge the debugger back to a prompt:
    /// ETX to interrupt, then a harmless register dump to force fresh output.
    pub async fn cancel_current(&self) {
        let token = self.lock_poisoned_ok(&self.op_cancel).clone();
        if let Some(token) = token {
            token.cancel();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let handle = self.lock_poisoned_ok(&self.handle).clone();
        let Some(handle) = handle else {
            return;
        };

        {
            let mut stdin = handle.stdin.lock().await;
            let _ = stdin.write_all(&[0x03]).await;
            let _ = stdin.flush().await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        {
            let mut stdin = handle.stdin.lock().await;
            let _ = stdin.write_all(b"r\n").await;
            let _ = stdin.flush().await;
        }
    }

    /// Recent stdout lines plus the stderr tail, for surfacing in logs when a
    /// command is cancelled or times out.
    pub fn drain_output(&self) -> (Vec<String>, String) {
        let handle = self.lock_poisoned_ok(&self.handle).clone();
        match handle {
            Some(handle) => {
                let recent = match handle.recent_lines.lock() {
                    Ok(lines) => lines.iter().cloned().collect(),
                    Err(_) => Vec::new(),
                };
                let stderr = match handle.stderr_tail.lock() {
                    Ok(tail) => tail.clone(),
                    Err(_) => String::new(),
                };
                (recent, stderr)
            }
            None => (Vec::new(), String::new()),
        }
    }

    fn log_drained(&self, handle: &SessionHandle, reason: &str) {
        let recent = match handle.recent_lines.lock() {
            Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join(" | "),
            Err(_) => String::new(),
        };
        let stderr = match handle.stderr_tail.lock() {
            Ok(tail) => tail.clone(),
            Err(_) => String::new(),
        };
        debug!(reason, recent = %recent, stderr = %stderr.trim_end(), "drained debugger output");
    }
}

struct OpSlotGuard<'a> {
    session: &'a CdbSession,
}

impl Drop for OpSlotGuard<'_> {
    fn drop(&mut self) {
        *self.session.lock_poisoned_ok(&self.session.op_cancel) = None;
    }
}

async fn read_stdout_loop(
    stdout: ChildStdout,
    tx: mpsc::UnboundedSender<OutputChunk>,
    recent: Arc<Mutex<VecDeque<String>>>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = [0u8; READ_BUF_SIZE];
    let mut pending = String::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                while let Some(pos) = pending.find('\n') {
                    let mut line: String = pending.drain(..=pos).collect();
                    while line.ends_with('\n') || line.ends_with('\r') {
                        line.pop();
                    }
                    push_recent(&recent, &line);
                    if tx.send(OutputChunk::Line(line)).is_err() {
                        return;
                    }
                }
                // The ready prompt has no trailing newline; it shows up as a
                // pending partial line.
                if !pending.is_empty() && is_prompt_line(&pending) {
                    let prompt = std::mem::take(&mut pending);
                    push_recent(&recent, &prompt);
                    if tx.send(OutputChunk::Prompt(prompt)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(OutputChunk::Line(pending));
    }
}

async fn read_stderr_loop(stderr: ChildStderr, tail: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut tail) = tail.lock() {
                    tail.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if tail.len() > STDERR_TAIL_CAP {
                        let cut = tail.len() - STDERR_TAIL_CAP;
                        tail.drain(..cut);
                    }
                }
            }
        }
    }
}

fn push_recent(recent: &Mutex<VecDeque<String>>, line: &str) {
    if let Ok(mut lines) = recent.lock() {
        if lines.len() == RECENT_LINE_CAP {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}

fn kill_process_tree(pid: u32) {
    if pid == 0 {
        return;
    }

    #[cfg(unix)]
    {
        // SAFETY: kill() is async-signal-safe; negative PID targets the
        // process group created by setsid in pre_exec.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
