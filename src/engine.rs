//! Client for an external KataGo-style engine speaking GTP.
//!
//! The engine runs as a child process (`<exe> gtp -model <m> -config <c>`).
//! Two wire dialects share its stdout: plain GTP command/response (`=` or
//! `?` prefix, blank-line terminator) and the `kata-analyze` stream of
//! `info move …` snapshot lines. A dedicated thread drains stdout into a
//! channel so every read is time-boxed with `recv_timeout`.
//!
//! The protocol is half-duplex, so all public operations funnel through one
//! mutex. If the process dies, the next operation respawns it once; a spawn
//! failure propagates as a typed error.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::board::{Color, Position};
use crate::cache::MoveCandidate;

/// kata-analyze report interval, in centiseconds.
const ANALYZE_INTERVAL_CS: u32 = 10;
/// Hard wall-clock bound on one streaming analysis.
const ANALYZE_WALL_CLOCK: Duration = Duration::from_secs(10);
/// Snapshots required before the visit threshold can end the stream.
const MIN_SNAPSHOTS: usize = 2;
/// The stream may stop early once the best move reaches
/// `min(requested_visits, SNAPSHOT_VISIT_FLOOR)` visits.
const SNAPSHOT_VISIT_FLOOR: u32 = 10;
/// Quiet period that ends the post-`stop` drain.
const DRAIN_QUIET: Duration = Duration::from_millis(300);
/// Bound on a plain command/response exchange.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period after `quit` before the process is killed.
const QUIT_WAIT: Duration = Duration::from_secs(5);
/// Bound on reaping after a kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine process: {0}")]
    Startup(#[source] std::io::Error),
    #[error("engine process failure: {0}")]
    Process(String),
    #[error("engine rejected {command:?}: {message}")]
    Command { command: String, message: String },
    #[error("timed out waiting for engine reply to {0:?}")]
    Timeout(String),
}

/// The outcome of one engine evaluation.
#[derive(Clone, Debug)]
pub struct EngineAnalysis {
    /// Candidates ordered by visits, best first. Empty when even the
    /// fallback produced nothing (engine passed or resigned).
    pub candidates: Vec<MoveCandidate>,
    pub model_name: String,
    /// Wall time of the streaming phase, seconds.
    pub duration_secs: f64,
    /// True when the wall clock (or the fallback path) ended the search
    /// rather than the visit threshold.
    pub stopped_by_limit: bool,
    /// `"visits <n>"`, or `"genmove fallback"`.
    pub budget_descriptor: String,
    /// Per-cell ownership, when the engine provides one.
    pub ownership: Option<Vec<f64>>,
}

/// Anything that can evaluate a position. The production implementation is
/// [`EngineClient`]; tests substitute scripted stand-ins.
pub trait Engine {
    fn analyze_position(
        &self,
        pos: &Position,
        visits: u32,
        top_n: usize,
    ) -> Result<EngineAnalysis, EngineError>;

    fn model_name(&self) -> String;
}

/// A live child process and its plumbing.
struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    model_name: String,
}

impl Session {
    /// One plain GTP exchange: write the command, collect reply lines until
    /// the blank terminator.
    fn send_command(&mut self, command: &str) -> Result<String, EngineError> {
        debug!("engine <- {command}");
        self.write_line(command)?;
        let deadline = Instant::now() + COMMAND_TIMEOUT;
        let mut lines: Vec<String> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::Timeout(command.to_string()));
            }
            let line = match self.lines.recv_timeout(remaining) {
                Ok(l) => l,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Timeout(command.to_string()))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Process("engine closed its output".into()))
                }
            };
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                if lines.is_empty() {
                    continue; // stray blank ahead of the reply
                }
                break; // blank line terminates the reply
            }
            lines.push(trimmed.to_string());
        }
        parse_reply(command, &lines)
    }

    fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        writeln!(self.stdin, "{line}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| EngineError::Process(format!("stdin write failed: {e}")))
    }

    /// Streaming analysis of the side to move. Accumulates snapshot lines
    /// until the engine has demonstrably searched (two snapshots and the
    /// best move at `min(visits, 10)` visits) or the wall clock runs out,
    /// then stops the search, drains, and parses the last snapshot.
    fn stream_analysis(
        &mut self,
        to_move: Color,
        visits: u32,
        top_n: usize,
    ) -> Result<EngineAnalysis, EngineError> {
        let command = format!("kata-analyze {} interval {ANALYZE_INTERVAL_CS}", to_move.letter());
        debug!("engine <- {command}");
        self.write_line(&command)?;

        let start = Instant::now();
        let needed = visits.min(SNAPSHOT_VISIT_FLOOR);
        let mut last_snapshot: Option<String> = None;
        let mut snapshot_count = 0usize;
        let mut stopped_by_limit = false;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= ANALYZE_WALL_CLOCK {
                stopped_by_limit = true;
                break;
            }
            match self.lines.recv_timeout(ANALYZE_WALL_CLOCK - elapsed) {
                Ok(line) => {
                    let line = line.trim();
                    // KataGo may glue the first snapshot onto the `=` ack.
                    let payload = line.strip_prefix("= ").unwrap_or(line);
                    if !payload.starts_with("info ") {
                        continue;
                    }
                    snapshot_count += 1;
                    let best = best_snapshot_visits(payload);
                    last_snapshot = Some(payload.to_string());
                    if snapshot_count >= MIN_SNAPSHOTS && best.is_some_and(|v| v >= needed) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    stopped_by_limit = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Process("engine died during analysis".into()));
                }
            }
        }
        let duration_secs = start.elapsed().as_secs_f64();

        self.write_line("stop")?;
        self.drain_stream();

        let candidates = match &last_snapshot {
            Some(snapshot) => parse_snapshot(snapshot, top_n),
            None => Vec::new(),
        };
        if !candidates.is_empty() {
            return Ok(EngineAnalysis {
                candidates,
                model_name: self.model_name.clone(),
                duration_secs,
                stopped_by_limit,
                budget_descriptor: format!("visits {visits}"),
                ownership: None,
            });
        }

        // The stream produced nothing usable; ask for a single move instead.
        warn!("analysis stream yielded no candidates, falling back to genmove");
        let reply = self.send_command(&format!("genmove {}", to_move.letter()))?;
        if let Err(e) = self.send_command("undo") {
            // The next analysis rebuilds the position from scratch anyway.
            warn!("undo after genmove fallback failed: {e}");
        }
        Ok(EngineAnalysis {
            candidates: fallback_candidates(&reply, visits),
            model_name: self.model_name.clone(),
            duration_secs,
            stopped_by_limit: true,
            budget_descriptor: "genmove fallback".to_string(),
            ownership: None,
        })
    }

    /// Swallow whatever the engine still emits after `stop`: ends on the
    /// blank terminator or a 300 ms quiet period.
    fn drain_stream(&mut self) {
        loop {
            match self.lines.recv_timeout(DRAIN_QUIET) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }

    /// Kill and reap, quietly. Used when a session is being replaced.
    fn dispose(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Classify a collected GTP reply. `=` means success (prefix and one space
/// stripped), `?` is a command error.
fn parse_reply(command: &str, lines: &[String]) -> Result<String, EngineError> {
    let reply = lines.join("\n");
    if let Some(rest) = reply.strip_prefix('=') {
        Ok(rest.strip_prefix(' ').unwrap_or(rest).to_string())
    } else if let Some(rest) = reply.strip_prefix('?') {
        Err(EngineError::Command {
            command: command.to_string(),
            message: rest.trim().to_string(),
        })
    } else {
        // Out-of-spec chatter; hand it through rather than guess.
        Ok(reply)
    }
}

/// Parse one snapshot line into candidates: split on `info move` blocks,
/// keep the well-formed ones, order by visits.
fn parse_snapshot(line: &str, top_n: usize) -> Vec<MoveCandidate> {
    let mut candidates: Vec<MoveCandidate> = line
        .split("info move")
        .skip(1)
        .filter_map(parse_candidate)
        .collect();
    candidates.sort_by(|a, b| b.visits.cmp(&a.visits));
    candidates.truncate(top_n);
    candidates
}

/// One `info move` block: the leading token is the move, then `key value`
/// fields in any order. Missing fields disqualify the block.
fn parse_candidate(block: &str) -> Option<MoveCandidate> {
    let tokens: Vec<&str> = block.split_whitespace().collect();
    let mv = (*tokens.first()?).to_string();
    let mut visits = None;
    let mut winrate = None;
    let mut score_lead = None;
    for pair in tokens.windows(2) {
        match pair[0] {
            "visits" => visits = pair[1].parse().ok(),
            "winrate" => winrate = pair[1].parse().ok(),
            "scoreLead" => score_lead = pair[1].parse().ok(),
            _ => {}
        }
    }
    Some(MoveCandidate {
        mv,
        winrate: winrate?,
        score_lead: score_lead?,
        visits: visits?,
    })
}

/// Highest visit count among a snapshot's candidates.
fn best_snapshot_visits(line: &str) -> Option<u32> {
    line.split("info move")
        .skip(1)
        .filter_map(parse_candidate)
        .map(|c| c.visits)
        .max()
}

/// Turn a `genmove` reply into the fallback candidate list: a real vertex
/// becomes one neutral-valued candidate; pass or resign yields none.
fn fallback_candidates(reply: &str, visits: u32) -> Vec<MoveCandidate> {
    let mv = reply.trim();
    if mv.is_empty() || mv.eq_ignore_ascii_case("pass") || mv.eq_ignore_ascii_case("resign") {
        return Vec::new();
    }
    vec![MoveCandidate {
        mv: mv.to_string(),
        winrate: 0.5,
        score_lead: 0.0,
        visits,
    }]
}

/// Handle to the external engine. Construction is cheap; the process starts
/// lazily on first use and restarts once per dispatch if it has died.
pub struct EngineClient {
    exe: PathBuf,
    model: PathBuf,
    config: PathBuf,
    session: Mutex<Option<Session>>,
}

impl EngineClient {
    pub fn new(exe: PathBuf, model: PathBuf, config: PathBuf) -> Self {
        EngineClient {
            exe,
            model,
            config,
            session: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        // A panic while holding the lock leaves no usable session; recover
        // the guard and let ensure_running rebuild the process.
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the child and wire its pipes. Model-name discovery failure is
    /// not fatal.
    fn spawn_session(&self) -> Result<Session, EngineError> {
        info!("starting engine: {} gtp", self.exe.display());
        let mut child = Command::new(&self.exe)
            .arg("gtp")
            .arg("-model")
            .arg(&self.model)
            .arg("-config")
            .arg(&self.config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(EngineError::Startup)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Process("engine stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Process("engine stdout unavailable".into()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            // Dropping the sender marks the process dead to every reader.
        });

        let mut session = Session {
            child,
            stdin,
            lines: rx,
            model_name: "unknown".to_string(),
        };
        match session.send_command("name") {
            Ok(name) if !name.trim().is_empty() => {
                session.model_name = name.trim().to_string();
                info!("engine model: {}", session.model_name);
            }
            Ok(_) => {}
            Err(e) => warn!("could not learn engine name: {e}"),
        }
        Ok(session)
    }

    /// Make sure a live session exists: respawn if the process was never
    /// started or has exited. One attempt; spawn errors propagate.
    fn ensure_running(&self, guard: &mut Option<Session>) -> Result<(), EngineError> {
        if let Some(session) = guard.as_mut() {
            match session.child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => warn!("engine exited ({status}), restarting"),
                Err(e) => warn!("engine liveness check failed ({e}), restarting"),
            }
            if let Some(dead) = guard.take() {
                dead.dispose();
            }
        }
        *guard = Some(self.spawn_session()?);
        Ok(())
    }

    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut Session) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.lock();
        self.ensure_running(&mut guard)?;
        let Some(session) = guard.as_mut() else {
            return Err(EngineError::Process("engine session unavailable".into()));
        };
        let result = op(session);
        // After a process failure or a timeout the protocol state is
        // unknown; drop the session so the next dispatch starts clean.
        if let Err(EngineError::Process(_) | EngineError::Timeout(_)) = &result {
            if let Some(dead) = guard.take() {
                dead.dispose();
            }
        }
        result
    }

    /// One plain GTP command against a live engine.
    pub fn send_command(&self, command: &str) -> Result<String, EngineError> {
        self.with_session(|session| session.send_command(command))
    }

    /// Replay a position into the engine: boardsize, clear_board, komi,
    /// then every stone. Runs under a single lock acquisition.
    pub fn setup_position(&self, pos: &Position) -> Result<(), EngineError> {
        self.with_session(|session| {
            for cmd in pos.setup_commands() {
                session.send_command(&cmd)?;
            }
            Ok(())
        })
    }

    /// Stop the engine: `quit`, wait up to 5 s, then kill with a 2 s reap
    /// bound. Safe to call with no live session, and safe to call twice.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        let Some(mut session) = guard.take() else {
            return;
        };
        info!("shutting down engine");
        let _ = writeln!(session.stdin, "quit").and_then(|_| session.stdin.flush());
        let deadline = Instant::now() + QUIT_WAIT;
        while Instant::now() < deadline {
            match session.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(_) => break,
            }
        }
        let _ = session.child.kill();
        let deadline = Instant::now() + KILL_WAIT;
        while Instant::now() < deadline {
            if matches!(session.child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        warn!("engine did not exit after kill");
    }
}

impl Engine for EngineClient {
    /// Set up the position and analyze it, all under one lock hold.
    fn analyze_position(
        &self,
        pos: &Position,
        visits: u32,
        top_n: usize,
    ) -> Result<EngineAnalysis, EngineError> {
        self.with_session(|session| {
            for cmd in pos.setup_commands() {
                session.send_command(&cmd)?;
            }
            session.stream_analysis(pos.next_player, visits, top_n)
        })
    }

    fn model_name(&self) -> String {
        self.lock()
            .as_ref()
            .map(|s| s.model_name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "info move D4 visits 42 utility 0.03 winrate 0.52 scoreMean 0.5 \
         scoreLead 0.5 order 0 pv D4 Q16 Q4 info move Q16 visits 100 utility 0.01 \
         winrate 0.55 scoreLead 1.25 order 1 pv Q16 D4 info move C3 visits 7 \
         winrate 0.31 scoreLead -2.0 order 2 pv C3";

    #[test]
    fn test_parse_snapshot_orders_by_visits_and_truncates() {
        let candidates = parse_snapshot(SNAPSHOT, 2);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].mv, "Q16");
        assert_eq!(candidates[0].visits, 100);
        assert_eq!(candidates[1].mv, "D4");
        assert!((candidates[0].winrate - 0.55).abs() < 1e-9);
        assert!((candidates[0].score_lead - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_snapshot_skips_malformed_blocks() {
        // Second block is missing its winrate; only the others survive.
        let line = "info move D4 visits 10 winrate 0.5 scoreLead 0.0 \
                    info move Q16 visits 20 scoreLead 1.0 \
                    info move C3 visits 5 winrate 0.4 scoreLead -1.0";
        let candidates = parse_snapshot(line, 10);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.mv != "Q16"));
    }

    #[test]
    fn test_parse_snapshot_pass_candidate() {
        let line = "info move pass visits 30 winrate 0.5 scoreLead 0.0 order 0";
        let candidates = parse_snapshot(line, 3);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].mv, "pass");
    }

    #[test]
    fn test_best_snapshot_visits() {
        assert_eq!(best_snapshot_visits(SNAPSHOT), Some(100));
        assert_eq!(best_snapshot_visits("noise without info"), None);
    }

    #[test]
    fn test_parse_reply_success_and_error() {
        let ok = parse_reply("name", &["= KataGo".to_string()]).unwrap();
        assert_eq!(ok, "KataGo");

        let multi = parse_reply(
            "list_commands",
            &["= play".to_string(), "genmove".to_string()],
        )
        .unwrap();
        assert_eq!(multi, "play\ngenmove");

        let bare = parse_reply("play B D4", &["=".to_string()]).unwrap();
        assert_eq!(bare, "");

        match parse_reply("bogus", &["? unknown command".to_string()]) {
            Err(EngineError::Command { command, message }) => {
                assert_eq!(command, "bogus");
                assert_eq!(message, "unknown command");
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[test]
    fn test_fallback_candidates() {
        let real = fallback_candidates("Q16", 150);
        assert_eq!(real.len(), 1);
        assert_eq!(real[0].mv, "Q16");
        assert!((real[0].winrate - 0.5).abs() < 1e-9);
        assert_eq!(real[0].score_lead, 0.0);
        assert_eq!(real[0].visits, 150);

        assert!(fallback_candidates("pass", 150).is_empty());
        assert!(fallback_candidates("PASS", 150).is_empty());
        assert!(fallback_candidates("resign", 150).is_empty());
        assert!(fallback_candidates("", 150).is_empty());
    }
}
