//! Event-driven, multi-threaded UCI engine with pondering support.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use tracing::{debug, info, warn};

use corvid_core::{Board, Move};
use corvid_engine::{SearchControl, SearchResult, Searcher, ThreadPool, limits_from_go};

use crate::command::{Command, GoParams, parse_command};
use crate::error::UciError;

/// Internal engine state — tracks whether the engine is idle, searching, or pondering.
enum EngineState {
    Idle,
    Searching,
    Pondering,
}

/// Events processed by the main engine loop.
enum EngineEvent {
    UciCommand(Result<Command, UciError>),
    SearchDone(SearchDone),
    InputClosed,
}

/// Payload returned by the search thread when it finishes.
struct SearchDone {
    result: SearchResult,
    backend: Backend,
}

/// The search backend currently in use — a plain single-threaded searcher,
/// or a Lazy-SMP thread pool once `Threads` is raised above one.
///
/// Weak play (`Skill Level`) and `MultiPV` only apply to [`Backend::Single`];
/// switching to a thread pool trades those off for parallel search, which
/// mirrors how most UCI engines gate MultiPV/strength limiting to the
/// single-searcher path.
enum Backend {
    Single(Searcher),
    Pool(ThreadPool),
}

impl Backend {
    fn clear_tt(&self) {
        match self {
            Backend::Single(s) => s.clear_tt(),
            Backend::Pool(p) => p.clear_tt(),
        }
    }
}

/// The UCI engine, holding current board state and searcher.
///
/// Runs an event-driven loop on the main thread, dispatching searches
/// to a worker thread and processing UCI commands concurrently.
pub struct UciEngine {
    board: Board,
    /// Zobrist hashes of every position prior to `board`, for repetition
    /// detection across the whole game. Only consulted by the `Pool`
    /// backend; `Searcher::search` tracks just the current search tree.
    history: Vec<u64>,
    backend: Option<Backend>,
    state: EngineState,
    stop_flag: Arc<AtomicBool>,
    control: Option<Arc<SearchControl>>,
    pending_clear_tt: bool,
    pending_thread_rebuild: bool,
    hash_mb: usize,
    threads: usize,
    multipv: usize,
    /// `0..=1000`; `1000` is full strength (see [`Searcher::set_strength`]).
    strength: u32,
}

impl UciEngine {
    /// Create a new engine with the starting position.
    pub fn new() -> Self {
        Self {
            board: Board::starting_position(),
            history: Vec::new(),
            backend: Some(Backend::Single(Searcher::new())),
            state: EngineState::Idle,
            stop_flag: Arc::new(AtomicBool::new(false)),
            control: None,
            pending_clear_tt: false,
            pending_thread_rebuild: false,
            hash_mb: 16,
            threads: 1,
            multipv: 1,
            strength: 1000,
        }
    }

    /// Run the UCI event loop, reading from stdin until `quit` or input closes.
    pub fn run(mut self) -> Result<(), UciError> {
        let (tx, rx) = mpsc::channel::<EngineEvent>();

        // Spawn stdin reader thread
        let stdin_tx = tx.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            let reader = stdin.lock();
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        let trimmed = line.trim().to_string();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!(cmd = %trimmed, "received UCI command");
                        let cmd = parse_command(&trimmed);
                        if stdin_tx.send(EngineEvent::UciCommand(cmd)).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = stdin_tx.send(EngineEvent::InputClosed);
                        break;
                    }
                }
            }
            let _ = stdin_tx.send(EngineEvent::InputClosed);
        });

        for event in &rx {
            match event {
                EngineEvent::UciCommand(Ok(cmd)) => match cmd {
                    Command::Uci => self.handle_uci(),
                    Command::IsReady => self.handle_isready(),
                    Command::UciNewGame => self.handle_ucinewgame(),
                    Command::Position { board, history } => self.handle_position(board, history),
                    Command::Go(params) => self.handle_go(params, &tx),
                    Command::PonderHit => self.handle_ponderhit(),
                    Command::Stop => self.handle_stop(),
                    Command::SetOption { name, value } => self.handle_setoption(name, value),
                    Command::Quit => {
                        // Stop any active search and wait for it to finish
                        if !matches!(self.state, EngineState::Idle) {
                            self.handle_stop();
                            // Drain events until we get SearchDone
                            for ev in &rx {
                                if let EngineEvent::SearchDone(done) = ev {
                                    self.finish_search(done);
                                    break;
                                }
                            }
                        }
                        break;
                    }
                    Command::Unknown(_) => {}
                },
                EngineEvent::UciCommand(Err(e)) => {
                    warn!(error = %e, "UCI parse error");
                }
                EngineEvent::SearchDone(done) => {
                    self.finish_search(done);
                }
                EngineEvent::InputClosed => break,
            }
        }

        info!("corvid shutting down");
        Ok(())
    }

    fn handle_uci(&self) {
        println!("id name corvid");
        println!("id author Nicolas Lazaro");
        println!("option name Hash type spin default 16 min 1 max 4096");
        println!("option name Threads type spin default 1 min 1 max 64");
        println!("option name MultiPV type spin default 1 min 1 max 256");
        println!("option name Skill Level type spin default 20 min 0 max 20");
        println!("option name Ponder type check default false");
        println!("uciok");
    }

    fn handle_isready(&self) {
        println!("readyok");
    }

    fn handle_ucinewgame(&mut self) {
        self.board = Board::starting_position();
        self.history.clear();
        if let Some(ref backend) = self.backend {
            backend.clear_tt();
        } else {
            // Search thread owns the backend — defer clear until it comes back
            self.pending_clear_tt = true;
        }
    }

    fn handle_position(&mut self, board: Board, history: Vec<u64>) {
        self.board = board;
        self.history = history;
    }

    fn handle_setoption(&mut self, name: String, value: Option<String>) {
        if name.eq_ignore_ascii_case("Hash") {
            if let Some(mb) = value.as_deref().and_then(|v| v.parse::<usize>().ok()) {
                self.hash_mb = mb.max(1);
                self.rebuild_or_defer();
            }
        } else if name.eq_ignore_ascii_case("Threads") {
            if let Some(n) = value.as_deref().and_then(|v| v.parse::<usize>().ok()) {
                self.threads = n.max(1);
                self.rebuild_or_defer();
            }
        } else if name.eq_ignore_ascii_case("MultiPV") {
            if let Some(n) = value.as_deref().and_then(|v| v.parse::<usize>().ok()) {
                self.multipv = n.max(1);
            }
        } else if name.eq_ignore_ascii_case("Skill Level") {
            if let Some(skill) = value.as_deref().and_then(|v| v.parse::<u32>().ok()) {
                self.strength = (skill.min(20) * 1000) / 20;
                self.rebuild_or_defer();
            }
        } else {
            debug!(option = %name, "unrecognized UCI option, ignoring");
        }
    }

    /// Apply an option that changes the backend's shape (hash size, thread
    /// count, strength) immediately if idle, or flag it for application once
    /// the in-flight search thread hands the backend back.
    fn rebuild_or_defer(&mut self) {
        if matches!(self.state, EngineState::Idle) && self.backend.is_some() {
            self.rebuild_backend();
        } else {
            self.pending_thread_rebuild = true;
        }
    }

    fn rebuild_backend(&mut self) {
        self.backend = Some(if self.threads > 1 {
            let mut pool = ThreadPool::new(self.hash_mb);
            pool.set_num_threads(self.threads);
            Backend::Pool(pool)
        } else {
            let mut searcher = Searcher::new();
            searcher.resize_tt(self.hash_mb);
            searcher.set_strength(self.strength, 0xC0FFEE);
            Backend::Single(searcher)
        });
    }

    fn handle_go(&mut self, params: GoParams, tx: &mpsc::Sender<EngineEvent>) {
        if !matches!(self.state, EngineState::Idle) {
            warn!("go received while not idle, ignoring");
            return;
        }

        // Reset stop flag
        self.stop_flag = Arc::new(AtomicBool::new(false));

        let side = self.board.side_to_move();
        let control = Arc::new(limits_from_go(
            params.wtime,
            params.btime,
            params.winc,
            params.binc,
            params.movestogo,
            params.movetime,
            params.infinite,
            params.ponder,
            side,
            Arc::clone(&self.stop_flag),
        ));

        let max_depth = params.depth.unwrap_or(128);

        // Take the backend — the search thread will own it
        let backend = self.backend.take().unwrap_or_else(|| Backend::Single(Searcher::default()));

        let board = self.board;
        let history = self.history.clone();
        let search_control = Arc::clone(&control);
        let tx = tx.clone();
        let multipv = self.multipv;

        std::thread::spawn(move || {
            let (result, backend) = match backend {
                Backend::Single(searcher) if multipv > 1 => {
                    let results = searcher.search_multipv(
                        &board,
                        max_depth,
                        multipv,
                        &search_control,
                        |pv_index, d, score, nodes, pv| {
                            emit_info(Some(pv_index + 1), d, score, nodes, pv, &search_control);
                        },
                    );
                    let best = results.into_iter().next().unwrap_or(SearchResult {
                        best_move: Move::NULL,
                        ponder_move: None,
                        pv: Vec::new(),
                        score: 0,
                        nodes: 0,
                        depth: 0,
                    });
                    (best, Backend::Single(searcher))
                }
                Backend::Single(searcher) => {
                    let result = searcher.search(&board, max_depth, &search_control, |d, score, nodes, pv| {
                        emit_info(None, d, score, nodes, pv, &search_control);
                    });
                    (result, Backend::Single(searcher))
                }
                Backend::Pool(pool) => {
                    let result = pool.search(
                        &board,
                        max_depth,
                        &search_control,
                        &history,
                        |d, score, nodes, pv| {
                            emit_info(None, d, score, nodes, pv, &search_control);
                        },
                    );
                    (result, Backend::Pool(pool))
                }
            };
            let _ = tx.send(EngineEvent::SearchDone(SearchDone { result, backend }));
        });

        self.state = if params.ponder {
            EngineState::Pondering
        } else {
            EngineState::Searching
        };
        self.control = Some(control);
    }

    fn handle_ponderhit(&mut self) {
        if !matches!(self.state, EngineState::Pondering) {
            warn!("ponderhit received while not pondering, ignoring");
            return;
        }
        if let Some(ref control) = self.control {
            control.activate();
        }
        self.state = EngineState::Searching;
    }

    fn handle_stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    fn finish_search(&mut self, done: SearchDone) {
        self.backend = Some(done.backend);
        self.control = None;

        if self.pending_clear_tt {
            if let Some(ref backend) = self.backend {
                backend.clear_tt();
            }
            self.pending_clear_tt = false;
        }
        if self.pending_thread_rebuild {
            self.rebuild_backend();
            self.pending_thread_rebuild = false;
        }

        let result = &done.result;
        if result.best_move.is_null() {
            println!("bestmove 0000");
        } else {
            match result.ponder_move {
                Some(pm) if !pm.is_null() => {
                    println!(
                        "bestmove {} ponder {}",
                        result.best_move.to_uci(),
                        pm.to_uci()
                    );
                }
                _ => {
                    println!("bestmove {}", result.best_move.to_uci());
                }
            }
        }

        self.state = EngineState::Idle;
    }
}

/// Print a UCI `info` line. `pv_index` is `Some(1-based slot)` for a
/// MultiPV search, `None` for the single best line.
fn emit_info(pv_index: Option<usize>, depth: u8, score: i32, nodes: u64, pv: &[Move], control: &SearchControl) {
    let elapsed = control.elapsed();
    let elapsed_ms = elapsed.as_millis().max(1);
    let nps = (nodes as u128 * 1000) / elapsed_ms;

    let pv_str: String = pv
        .iter()
        .filter(|m| !m.is_null())
        .map(|m| m.to_uci())
        .collect::<Vec<_>>()
        .join(" ");

    match pv_index {
        Some(n) => println!(
            "info depth {} multipv {} score cp {} nodes {} nps {} time {} pv {}",
            depth, n, score, nodes, nps, elapsed_ms, pv_str
        ),
        None => println!(
            "info depth {} score cp {} nodes {} nps {} time {} pv {}",
            depth, score, nodes, nps, elapsed_ms, pv_str
        ),
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}
