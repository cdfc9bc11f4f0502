//! UCI command parsing.

use std::time::Duration;

use corvid_core::{Board, Move};

use crate::error::UciError;

/// Parameters accepted by the `go` command.
///
/// All clock-related fields are `None` when the corresponding UCI token was
/// not supplied. `depth` defaults to `None` (searched until time runs out or
/// `stop` is received) rather than any fixed ply count.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    /// White's remaining time.
    pub wtime: Option<Duration>,
    /// Black's remaining time.
    pub btime: Option<Duration>,
    /// White's increment per move.
    pub winc: Option<Duration>,
    /// Black's increment per move.
    pub binc: Option<Duration>,
    /// Moves remaining until the next time control.
    pub movestogo: Option<u32>,
    /// Fixed time to search for this move, overriding clock-based limits.
    pub movetime: Option<Duration>,
    /// Search until `stop`, ignoring time limits.
    pub infinite: bool,
    /// Start the search in pondering mode (clock inactive until `ponderhit`).
    pub ponder: bool,
    /// Fixed maximum search depth in plies.
    pub depth: Option<u8>,
}

/// A parsed UCI command.
#[derive(Debug)]
pub enum Command {
    /// `uci` -- identify the engine.
    Uci,
    /// `isready` -- synchronization ping.
    IsReady,
    /// `ucinewgame` -- reset engine state.
    UciNewGame,
    /// `position` -- set up a board position with optional moves applied.
    ///
    /// `history` holds the zobrist hash of every position visited strictly
    /// before `board` (startpos/fen plus each intermediate `moves` ply), for
    /// repetition detection across the whole game rather than just within
    /// the current search tree.
    Position {
        /// The resulting board after applying all given moves.
        board: Board,
        /// Zobrist hashes of every position prior to `board`.
        history: Vec<u64>,
    },
    /// `go [wtime ... | movetime ... | infinite | ponder | depth ...]`.
    Go(GoParams),
    /// `ponderhit` -- the opponent played the pondered move; start the clock.
    PonderHit,
    /// `stop` -- halt the current search.
    Stop,
    /// `setoption name <name> [value <value>]` -- configure an engine option.
    SetOption {
        /// Option name, e.g. `"Hash"` or `"Skill Level"`.
        name: String,
        /// Option value, if one was supplied.
        value: Option<String>,
    },
    /// `quit` -- exit the engine.
    Quit,
    /// Unrecognized command (silently ignored per UCI spec).
    Unknown(String),
}

/// Parse a single line of UCI input into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Command::Unknown(String::new()));
    }

    match tokens[0] {
        "uci" => Ok(Command::Uci),
        "isready" => Ok(Command::IsReady),
        "ucinewgame" => Ok(Command::UciNewGame),
        "ponderhit" => Ok(Command::PonderHit),
        "stop" => Ok(Command::Stop),
        "quit" => Ok(Command::Quit),
        "position" => parse_position(&tokens[1..]),
        "go" => parse_go(&tokens[1..]),
        "setoption" => parse_setoption(&tokens[1..]),
        _ => Ok(Command::Unknown(tokens[0].to_string())),
    }
}

/// Parse the `position` command arguments.
///
/// Supports:
/// - `position startpos [moves e2e4 d7d5 ...]`
/// - `position fen <fen-string> [moves e2e4 d7d5 ...]`
fn parse_position(tokens: &[&str]) -> Result<Command, UciError> {
    if tokens.is_empty() {
        return Err(UciError::MalformedPosition);
    }

    let (mut board, rest) = if tokens[0] == "startpos" {
        let rest = &tokens[1..];
        (Board::starting_position(), rest)
    } else if tokens[0] == "fen" {
        // FEN is 6 space-separated fields
        if tokens.len() < 7 {
            return Err(UciError::InvalidFen {
                fen: tokens[1..].join(" "),
            });
        }
        let fen = tokens[1..7].join(" ");
        let board: Board = fen.parse().map_err(|_| UciError::InvalidFen {
            fen: fen.clone(),
        })?;
        (board, &tokens[7..])
    } else {
        return Err(UciError::MalformedPosition);
    };

    // Apply moves if present: "moves e2e4 d7d5 ...", recording each
    // intermediate position's hash before the move that leaves it.
    let mut history = Vec::new();
    if !rest.is_empty() && rest[0] == "moves" {
        for uci_str in &rest[1..] {
            let mv = Move::from_uci(uci_str, &board).ok_or_else(|| UciError::InvalidMove {
                uci_move: uci_str.to_string(),
            })?;
            history.push(board.hash());
            board = board.make_move(mv);
        }
    }

    Ok(Command::Position { board, history })
}

/// Parse the `setoption` command arguments.
///
/// Supports `setoption name <name...> [value <value...>]`, where both the
/// name and value may themselves contain whitespace (e.g. `Skill Level`).
fn parse_setoption(tokens: &[&str]) -> Result<Command, UciError> {
    if tokens.first() != Some(&"name") {
        return Err(UciError::MalformedSetOption);
    }

    let mut i = 1;
    let mut name_parts: Vec<&str> = Vec::new();
    while i < tokens.len() && tokens[i] != "value" {
        name_parts.push(tokens[i]);
        i += 1;
    }
    if name_parts.is_empty() {
        return Err(UciError::MalformedSetOption);
    }

    let value = if i < tokens.len() && tokens[i] == "value" {
        Some(tokens[i + 1..].join(" "))
    } else {
        None
    };

    Ok(Command::SetOption {
        name: name_parts.join(" "),
        value,
    })
}

/// Parse a required numeric value following a `go` keyword token.
fn parse_value<T: std::str::FromStr>(tokens: &[&str], i: usize, param: &str) -> Result<T, UciError> {
    let raw = tokens.get(i).ok_or_else(|| UciError::MissingGoValue {
        param: param.to_string(),
    })?;
    raw.parse().map_err(|_| UciError::InvalidGoValue {
        param: param.to_string(),
        value: raw.to_string(),
    })
}

/// Parse the `go` command arguments into [`GoParams`].
///
/// Supports the standard UCI clock keywords (`wtime`/`btime`/`winc`/`binc`/
/// `movestogo`), `movetime`, `depth`, `infinite`, and `ponder`.
fn parse_go(tokens: &[&str]) -> Result<Command, UciError> {
    let mut params = GoParams::default();

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "wtime" => {
                params.wtime = Some(Duration::from_millis(parse_value(tokens, i + 1, "wtime")?));
                i += 2;
            }
            "btime" => {
                params.btime = Some(Duration::from_millis(parse_value(tokens, i + 1, "btime")?));
                i += 2;
            }
            "winc" => {
                params.winc = Some(Duration::from_millis(parse_value(tokens, i + 1, "winc")?));
                i += 2;
            }
            "binc" => {
                params.binc = Some(Duration::from_millis(parse_value(tokens, i + 1, "binc")?));
                i += 2;
            }
            "movestogo" => {
                params.movestogo = Some(parse_value(tokens, i + 1, "movestogo")?);
                i += 2;
            }
            "movetime" => {
                params.movetime =
                    Some(Duration::from_millis(parse_value(tokens, i + 1, "movetime")?));
                i += 2;
            }
            "depth" => {
                params.depth = Some(parse_value(tokens, i + 1, "depth")?);
                i += 2;
            }
            "infinite" => {
                params.infinite = true;
                i += 1;
            }
            "ponder" => {
                params.ponder = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(Command::Go(params))
}
