//! The driver actor and the hub-facing handle.
//!
//! One task owns the engine subprocess and every piece of mutable
//! state. Hub commands and engine output lines are multiplexed into it
//! and processed strictly sequentially, so search transitions never
//! race. The hub holds a cloneable [`DriverHandle`] and reads
//! [`DriverEvent`]s from the receiver returned at construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::config::DriverConfig;
use crate::node::{CastlingNotation, NodeRef};
use crate::options::parse_setoption;
use crate::protocol::{classify, sanitize, InboundKind, STARTPOS_FEN};
use crate::search::SearchParams;
use crate::state::{DriverState, DriverStatus, SearchPhase};
use crate::transport::{EngineLine, Transport};
use crate::DriverEvent;

/// How long the engine gets to exit on its own after `quit`.
const QUIT_GRACE: Duration = Duration::from_secs(2);

const COMMAND_CHANNEL: usize = 64;
const EVENT_CHANNEL: usize = 256;
const LINE_CHANNEL: usize = 256;

/// Option names acked with empty values when a fresh engine starts, so
/// the hub's menu state resets along with the engine.
const WELL_KNOWN_OPTIONS: &[&str] = &[
    "backend",
    "evalfile",
    "hash",
    "multipv",
    "syzygypath",
    "threads",
    "uci_chess960",
    "weightsfile",
];

/// Options that only Leela-like engines understand.
const LEELAISH_ONLY_OPTIONS: &[&str] = &[
    "backend",
    "backendoptions",
    "cpuct",
    "maxprefetch",
    "minibatchsize",
    "weightsfile",
];

/// Options that Leela-like engines ignore or mishandle.
const ALPHABETA_ONLY_OPTIONS: &[&str] = &["evalfile", "hash", "syzygyprobedepth"];

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver task has shut down")]
    Closed,
}

enum DriverCommand {
    SetSearchDesired {
        node: Option<NodeRef>,
        limit: Option<u64>,
        searchmoves: Vec<String>,
    },
    SetOption {
        name: String,
        value: String,
    },
    PressButton {
        name: String,
    },
    MaybeSetOption {
        name: String,
        value: String,
        reply: oneshot::Sender<Option<String>>,
    },
    NewGame,
    ForgetAnalysis,
    SendRaw {
        line: String,
    },
    Status {
        reply: oneshot::Sender<DriverStatus>,
    },
    Shutdown,
}

/// Cheap, cloneable handle to a driver actor.
#[derive(Clone)]
pub struct DriverHandle {
    cmd_tx: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    /// Ask for `node` to be searched with the given limit and move
    /// restriction. An empty node means "stop searching". Ignored until
    /// the engine has completed its handshake.
    pub async fn set_search_desired(
        &self,
        node: Option<NodeRef>,
        limit: Option<u64>,
        searchmoves: Vec<String>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::SetSearchDesired {
            node,
            limit,
            searchmoves,
        })
        .await
    }

    /// Stop any running search without starting a new one.
    pub async fn halt(&self) -> Result<(), DriverError> {
        self.set_search_desired(None, None, Vec::new()).await
    }

    pub async fn setoption(&self, name: &str, value: &str) -> Result<(), DriverError> {
        self.send(DriverCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Fire a button-style option (a `setoption` with no value).
    pub async fn pressbutton(&self, name: &str) -> Result<(), DriverError> {
        self.send(DriverCommand::PressButton {
            name: name.to_string(),
        })
        .await
    }

    /// Like [`DriverHandle::setoption`], but options the current engine
    /// variant does not understand are withheld. Returns the reason when
    /// the option was suppressed; the previously recorded value is
    /// re-acked so hub menus snap back.
    pub async fn maybe_setoption(
        &self,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.send(DriverCommand::MaybeSetOption {
            name: name.to_string(),
            value: value.to_string(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| DriverError::Closed)
    }

    /// Send `ucinewgame`. The caller halts any search first; the command
    /// is ignored until the handshake has completed.
    pub async fn new_game(&self) -> Result<(), DriverError> {
        self.send(DriverCommand::NewGame).await
    }

    /// Drop all info from the current search cycle on the floor.
    pub async fn forget_analysis(&self) -> Result<(), DriverError> {
        self.send(DriverCommand::ForgetAnalysis).await
    }

    /// Send an arbitrary command line through the normal send
    /// discipline (so `setoption` lines still queue during a search).
    pub async fn send_raw(&self, line: &str) -> Result<(), DriverError> {
        self.send(DriverCommand::SendRaw {
            line: line.to_string(),
        })
        .await
    }

    pub async fn status(&self) -> Result<DriverStatus, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.send(DriverCommand::Status { reply: tx }).await?;
        rx.await.map_err(|_| DriverError::Closed)
    }

    /// Send `quit`, wait briefly, kill the engine if it lingers, and
    /// stop the actor. The driver is single-use after this.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(DriverCommand::Shutdown).await;
    }

    async fn send(&self, cmd: DriverCommand) -> Result<(), DriverError> {
        self.cmd_tx.send(cmd).await.map_err(|_| DriverError::Closed)
    }
}

/// The actor. Constructed through [`Driver::launch`] (spawning a real
/// engine) or [`Driver::with_transport`] (embedding over an arbitrary
/// transport); either way the instance moves into its own task.
pub struct Driver {
    state: DriverState,
    transport: Transport,
    events: mpsc::Sender<DriverEvent>,
}

impl Driver {
    /// Spawn the engine at `path` and start the driver actor. A spawn
    /// failure raises a single [`DriverEvent::Alert`] and leaves the
    /// driver running offline, where writes are dropped but intended
    /// option state is still tracked.
    pub fn launch(
        path: impl Into<PathBuf>,
        args: Vec<String>,
        config: DriverConfig,
    ) -> (DriverHandle, mpsc::Receiver<DriverEvent>) {
        let path = path.into();
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL);
        let (transport, startup) = match Transport::spawn(&path, &args, line_tx) {
            Ok(transport) => {
                tracing::info!("engine spawned: {}", path.display());
                (transport, DriverEvent::EngineStarted(path))
            }
            Err(e) => {
                tracing::error!("failed to spawn engine {}: {e}", path.display());
                let alert = format!("Failed to launch {}: {e}", path.display());
                (Transport::offline(), DriverEvent::Alert(alert))
            }
        };
        Self::spawn_actor(transport, Some(startup), line_rx, config)
    }

    /// Start the driver actor over a caller-supplied transport and line
    /// stream.
    pub fn with_transport(
        transport: Transport,
        line_rx: mpsc::Receiver<EngineLine>,
        config: DriverConfig,
    ) -> (DriverHandle, mpsc::Receiver<DriverEvent>) {
        Self::spawn_actor(transport, None, line_rx, config)
    }

    fn spawn_actor(
        transport: Transport,
        startup: Option<DriverEvent>,
        line_rx: mpsc::Receiver<EngineLine>,
        config: DriverConfig,
    ) -> (DriverHandle, mpsc::Receiver<DriverEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL);
        let driver = Driver {
            state: DriverState::new(config),
            transport,
            events: event_tx,
        };
        tokio::spawn(driver.run(startup, cmd_rx, line_rx));
        (DriverHandle { cmd_tx }, event_rx)
    }

    async fn run(
        mut self,
        startup: Option<DriverEvent>,
        mut cmd_rx: mpsc::Receiver<DriverCommand>,
        mut line_rx: mpsc::Receiver<EngineLine>,
    ) {
        tracing::info!("driver actor started");
        if let Some(event) = startup {
            self.emit(event).await;
        }

        // A fresh engine has been told nothing; reset the hub's idea of
        // the common options along with our own.
        self.state.registry.clear();
        for name in WELL_KNOWN_OPTIONS {
            let (key, value) = self.state.registry.re_ack(name);
            self.emit(DriverEvent::OptionSent { key, value }).await;
        }

        self.send("uci", false).await;

        let mut lines_open = true;
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(DriverCommand::Shutdown) | None => {
                        self.shutdown().await;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                line = line_rx.recv(), if lines_open => match line {
                    Some(line) => self.handle_line(line).await,
                    None => lines_open = false,
                },
            }
        }
        tracing::info!("driver actor exited");
    }

    async fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::SetSearchDesired {
                node,
                limit,
                searchmoves,
            } => self.set_search_desired(node, limit, &searchmoves).await,
            DriverCommand::SetOption { name, value } => {
                self.send(&format!("setoption name {name} value {value}"), false)
                    .await;
            }
            DriverCommand::PressButton { name } => {
                self.send(&format!("setoption name {name}"), false).await;
            }
            DriverCommand::MaybeSetOption { name, value, reply } => {
                let suppressed = self.maybe_setoption(&name, &value).await;
                let _ = reply.send(suppressed);
            }
            DriverCommand::NewGame => self.send_ucinewgame().await,
            DriverCommand::ForgetAnalysis => {
                self.state.suppress_cycle_info = Some(self.state.cycle);
            }
            DriverCommand::SendRaw { line } => self.send(&line, false).await,
            DriverCommand::Status { reply } => {
                let _ = reply.send(self.state.status());
            }
            DriverCommand::Shutdown => unreachable!(),
        }
    }

    /// Record what the hub wants searched and reconcile the engine with
    /// it. While a search is in flight at most one `stop` is ever
    /// outstanding; replacing the desired search again costs no traffic.
    async fn set_search_desired(
        &mut self,
        node: Option<NodeRef>,
        limit: Option<u64>,
        searchmoves: &[String],
    ) {
        if !self.state.handshake_complete() {
            tracing::debug!("search requested before engine handshake, ignoring");
            return;
        }
        let params = SearchParams::new(node, limit, searchmoves);
        if self.state.desired.same_params(&params) {
            return;
        }

        let phase = self.state.phase();
        self.state.desired = params;
        match phase {
            SearchPhase::Inactive => self.send_desired().await,
            SearchPhase::Running => {
                self.send("stop", false).await;
                if self.state.unresolved_stop_time.is_none() {
                    self.state.unresolved_stop_time = Some(Instant::now());
                }
            }
            // A stop is already on the wire; its bestmove will pick up
            // the new desired value.
            SearchPhase::Changing | SearchPhase::Ending => {}
        }
    }

    /// Launch the desired search. Only legal while nothing is running.
    async fn send_desired(&mut self) {
        assert!(
            self.state.running.node().is_none(),
            "send_desired called while a search is running"
        );

        let desired = self.state.desired.clone();
        let node = match desired.node() {
            Some(node) if !node.is_destroyed() && !node.is_terminal() => node.clone(),
            _ => {
                // Nothing searchable; the owner may have invalidated the
                // node while the request was in flight.
                self.state.running = SearchParams::none();
                self.state.desired = SearchParams::none();
                return;
            }
        };

        let chess960 = self.state.registry.in_960_mode();
        let fen = node.root_fen();
        let setup = if !chess960 && fen == STARTPOS_FEN {
            "startpos".to_string()
        } else {
            format!("fen {fen}")
        };
        let notation = if chess960 {
            CastlingNotation::KingTakesRook
        } else {
            CastlingNotation::Classical
        };
        let history = node.history_uci(notation);
        let position = if history.is_empty() {
            format!("position {setup}")
        } else {
            format!("position {setup} moves {}", history.join(" "))
        };
        self.send(&position, false).await;

        let mut go = match desired.limit() {
            None => "go infinite".to_string(),
            Some(n) if self.state.config.use_movetime => format!("go movetime {n}"),
            Some(n) => format!("go nodes {n}"),
        };
        if self.state.config.searchmoves_buttons && !desired.searchmoves().is_empty() {
            go.push_str(" searchmoves");
            for mv in desired.searchmoves() {
                go.push(' ');
                go.push_str(mv);
            }
        }
        self.send(&go, false).await;

        self.state.note_go();
    }

    async fn handle_line(&mut self, line: EngineLine) {
        if self.state.quit_requested {
            return;
        }
        match line {
            EngineLine::Stdout(line) => self.handle_stdout(line).await,
            EngineLine::Stderr(line) => {
                let line = sanitize(&line);
                tracing::debug!("engine stderr: {line}");
                self.emit(DriverEvent::Stderr(line)).await;
            }
            EngineLine::Eof => {
                tracing::warn!("engine closed its stdout");
                self.emit(DriverEvent::Alert(
                    "The engine process closed unexpectedly.".to_string(),
                ))
                .await;
            }
        }
    }

    async fn handle_stdout(&mut self, line: String) {
        let kind = classify(&line);
        if kind != InboundKind::Info || self.state.config.log_info_lines {
            tracing::trace!("UCI << {line}");
        }
        match kind {
            InboundKind::BestMove => self.handle_bestmove(line).await,
            InboundKind::Info => self.handle_info(line).await,
            InboundKind::UciOk => {
                self.state.received_uciok = true;
                self.emit(DriverEvent::Misc(line)).await;
                self.send("isready", false).await;
            }
            InboundKind::ReadyOk => {
                self.state.received_readyok = true;
                self.emit(DriverEvent::Misc(line)).await;
            }
            InboundKind::EngineOption { chess960 } => {
                if chess960 {
                    // Engines that can speak 960 should always do so;
                    // the driver then emits castling in the native form.
                    self.send("setoption name UCI_Chess960 value true", false)
                        .await;
                }
                self.emit(DriverEvent::Misc(line)).await;
            }
            InboundKind::Other => self.emit(DriverEvent::Misc(line)).await,
        }
    }

    /// The engine yielded. Exactly one of three things follows: the
    /// result is forwarded (the hub still wants this exact search), a
    /// superseding search launches, or the driver goes idle.
    async fn handle_bestmove(&mut self, line: String) {
        if self.state.running.node().is_none() {
            tracing::warn!("bestmove with no search running: {line}");
            self.emit(DriverEvent::Misc(line)).await;
            return;
        }

        self.state.completed = std::mem::replace(&mut self.state.running, SearchParams::none());
        self.state.unresolved_stop_time = None;

        // Option writes held back during the search go out now, before
        // any new go.
        for queued in self.state.registry.drain() {
            self.send(&queued, true).await;
        }

        if Arc::ptr_eq(&self.state.desired, &self.state.completed) {
            if let Some(node) = self.state.completed.node().cloned() {
                self.emit(DriverEvent::BestMove { line, node }).await;
            }
        } else if self.state.desired.node().is_some() {
            tracing::debug!("ignoring bestmove from a superseded search: {line}");
            self.send_desired().await;
        } else {
            tracing::debug!("ignoring bestmove after halt: {line}");
            self.state.desired = SearchParams::none();
        }
    }

    async fn handle_info(&mut self, line: String) {
        if let Some(reason) = self.state.info_drop_reason() {
            tracing::trace!("dropping info line ({reason})");
            return;
        }
        if !self.state.leelaish && line.contains("VerboseMoveStats") {
            tracing::info!("engine identified as Leela-like");
            self.state.leelaish = true;
        }
        let Some(node) = self.state.running.node().cloned() else {
            return;
        };
        self.emit(DriverEvent::Info {
            line,
            node,
            cycle: self.state.cycle,
            subcycle: self.state.subcycle,
        })
        .await;
    }

    /// Outbound send discipline. `setoption` lines queue while a search
    /// runs unless `force` is set (used only when draining the queue at
    /// a search boundary); recorded options are acked to the hub even
    /// when no engine is loaded.
    async fn send(&mut self, line: &str, force: bool) {
        let line = line.trim_end();

        if line.starts_with("setoption") {
            if self.state.running.node().is_some() && !force {
                tracing::debug!("queueing until the search ends: {line}");
                self.state.registry.queue(line.to_string());
                return;
            }
            if let Some((name, value)) = parse_setoption(line) {
                let (key, value) = self.state.registry.record(&name, &value);
                self.emit(DriverEvent::OptionSent { key, value }).await;
            }
        }

        if !self.transport.is_connected() {
            tracing::debug!("no engine loaded, dropping: {line}");
            return;
        }

        if !line.starts_with("position") || self.state.config.log_positions {
            tracing::debug!("UCI >> {line}");
        }
        match self.transport.write_line(line).await {
            Ok(()) => self.state.last_send = Some(line.to_string()),
            Err(e) => {
                tracing::error!("failed to write to engine: {e}");
                if self.state.last_send.is_some() && !self.state.warned_send_failure {
                    self.state.warned_send_failure = true;
                    self.emit(DriverEvent::Alert(
                        "The engine appears to have crashed.".to_string(),
                    ))
                    .await;
                }
            }
        }
    }

    async fn maybe_setoption(&mut self, name: &str, value: &str) -> Option<String> {
        let key = name.to_lowercase();
        let reason = if self.state.leelaish {
            ALPHABETA_ONLY_OPTIONS
                .contains(&key.as_str())
                .then(|| format!("{name} not sent (Leela-like engine)"))
        } else {
            LEELAISH_ONLY_OPTIONS
                .contains(&key.as_str())
                .then(|| format!("{name} not sent (not a Leela-like engine)"))
        };

        if let Some(reason) = reason {
            tracing::debug!("{reason}");
            let (key, value) = self.state.registry.re_ack(&key);
            self.emit(DriverEvent::OptionSent { key, value }).await;
            return Some(reason);
        }

        self.send(&format!("setoption name {name} value {value}"), false)
            .await;
        None
    }

    async fn send_ucinewgame(&mut self) {
        if !self.state.handshake_complete() {
            tracing::debug!("ucinewgame requested before engine handshake, ignoring");
            return;
        }
        self.send("ucinewgame", false).await;
    }

    async fn shutdown(&mut self) {
        tracing::info!("shutting down engine");
        self.state.quit_requested = true;
        self.send("quit", false).await;
        self.transport.wait_or_kill(QUIT_GRACE).await;
    }

    async fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event).await;
    }
}
