//! Negamax search with principal variation search (PVS/NegaScout),
//! quiescence search, and the full suite of standard pruning and
//! extension techniques: null-move pruning, razoring, reverse futility
//! pruning, late-move pruning/reductions, internal iterative deepening,
//! recapture and pawn-endgame extensions, and static-exchange-evaluation
//! based move filtering.

use corvid_core::{Board, Color, Move, MoveKind, PieceKind, Square};

use crate::eval::evaluate;

use super::control::SearchControl;
use super::heuristics::{HistoryTable, KillerTable};
use super::ordering::MovePicker;
use super::see::{neg_see, see, see_ge, sign_see, SEE_VALUE};
use super::tt::{Bound, TranspositionTable};
use super::weak::{is_passed_pawn_push, WeakPlay};

/// One ply in plain integer depth units (no fractional search extensions).
pub const PLY_SCALE: i32 = 1;
/// Score assigned to an immediate mate; decreases by one per ply of distance.
pub const MATE_SCORE: i32 = 29_000;
/// Sentinel "infinite" score, wider than any real evaluation or mate score.
pub const INF: i32 = 30_000;
/// Scores beyond this magnitude are forced mates rather than material evaluations.
pub const MATE_THRESHOLD: i32 = 28_000;
/// Maximum search tree depth in plies; bounds the per-search stack arrays.
pub const MAX_PLY: usize = 128;

const RAZOR_MARGIN_1: i32 = 300;
const RAZOR_MARGIN_2: i32 = 600;
/// Reverse futility margins indexed by depth (1..=4); index 0 unused.
const RFP_MARGIN: [i32; 5] = [0, 200, 350, 500, 650];
/// Forward futility margins indexed by depth (1..=4); index 0 unused.
const FUTILITY_MARGIN: [i32; 5] = [0, 150, 300, 450, 600];
/// Late-move-pruning move-count limits indexed by depth (1..=4).
const LMP_LIMIT: [usize; 5] = [0, 4, 7, 12, 19];
const LMR_LIMIT_1: usize = 6;
const LMR_LIMIT_2: usize = 12;
const DELTA_PRUNING_MARGIN: i32 = 200;
const NULL_MOVE_VERIFY_DEPTH: i32 = 10 * PLY_SCALE;
/// Half-width of the root search's initial aspiration window.
const ASPIRATION_WINDOW: i32 = 50;
/// Number of moves at the front of the quiescence move list that get the
/// incremental best-of selection pass; moves beyond this index are visited
/// in whatever order move scoring left them, unsorted.
const QUIESCE_MAX_SORT_MOVES: usize = 4;
/// Minimum root-move index (beyond the multi-PV window) before root-level
/// LMR may reduce a quiet, non-check, non-passed-pawn-push root move.
const ROOT_LMR_MOVE_COUNT: usize = 4;

fn pawn_value() -> i32 {
    SEE_VALUE[PieceKind::Pawn.index()]
}

/// `true` if `color` has any non-pawn, non-king material on the board.
fn has_non_pawn_material(board: &Board, color: Color) -> bool {
    let side = board.side(color);
    (board.pieces(PieceKind::Knight) & side).is_nonempty()
        || (board.pieces(PieceKind::Bishop) & side).is_nonempty()
        || (board.pieces(PieceKind::Rook) & side).is_nonempty()
        || (board.pieces(PieceKind::Queen) & side).is_nonempty()
}

/// Total SEE value of `color`'s non-pawn, non-king material.
fn non_pawn_material_value(board: &Board, color: Color) -> i32 {
    let side = board.side(color);
    let mut total = 0;
    for kind in [PieceKind::Knight, PieceKind::Bishop, PieceKind::Rook, PieceKind::Queen] {
        total += (board.pieces(kind) & side).count() as i32 * SEE_VALUE[kind.index()];
    }
    total
}

/// Reverse futility / null-move / LMP / futility all share this guard: a
/// side down to king-and-pawns-only risks being put in zugzwang by a null
/// move or an overly aggressive prune, so these techniques only apply when
/// the side to move still has non-pawn material *and* at least one pawn.
fn zugzwang_safe(board: &Board, color: Color) -> bool {
    has_non_pawn_material(board, color) && (board.pieces(PieceKind::Pawn) & board.side(color)).is_nonempty()
}

fn victim_value(board: &Board, mv: Move) -> i32 {
    if mv.kind() == MoveKind::EnPassant {
        pawn_value()
    } else {
        board.piece_on(mv.dest()).map(|k| SEE_VALUE[k.index()]).unwrap_or(0)
    }
}

fn promotion_gain(mv: Move) -> i32 {
    if mv.kind() == MoveKind::Promotion {
        SEE_VALUE[mv.promotion_piece().to_piece_kind().index()] - pawn_value()
    } else {
        0
    }
}

fn gives_check(child: &Board) -> bool {
    let mover_side = child.side_to_move().flip();
    child.is_square_attacked(child.king_square(child.side_to_move()), mover_side)
}

/// `true` if the side to move at `board` is currently in check.
pub(super) fn in_check_at_root(board: &Board) -> bool {
    let side = board.side_to_move();
    board.is_square_attacked(board.king_square(side), side.flip())
}

/// `true` when `hash` (the current position, already the last entry of
/// `history`) has occurred at least twice more earlier in the window — a
/// threefold repetition. A single prior occurrence (twofold) is not a draw.
fn is_repetition(history: &[u64], hash: u64, halfmove_clock: u32) -> bool {
    let len = history.len();
    if len < 5 {
        return false;
    }
    let lookback = (halfmove_clock as usize).min(len - 1);
    let mut occurrences = 0;
    let mut i = 2;
    while i <= lookback {
        if history[len - 1 - i] == hash {
            occurrences += 1;
            if occurrences >= 2 {
                return true;
            }
        }
        i += 2;
    }
    false
}

/// Per-ply search-tree state.
///
/// The board itself is not stored here: [`corvid_core::Board`] is an
/// immutable `Copy` value passed down the call stack, so there is nothing
/// to "unmake" and no need to duplicate it in the stack frame.
#[derive(Clone, Copy)]
pub(super) struct StackFrame {
    pub current_move: Move,
    pub allow_null_move: bool,
    pub best_move: Move,
    pub static_eval: i32,
}

impl StackFrame {
    const fn new() -> Self {
        Self {
            current_move: Move::NULL,
            allow_null_move: true,
            best_move: Move::NULL,
            static_eval: 0,
        }
    }
}

/// Per-call parameters to [`negascout`] beyond the alpha/beta window.
#[derive(Clone, Copy)]
pub(super) struct NodeParams {
    pub depth: i32,
    pub ply: u8,
    /// Square that a capturing move must land on to be treated as a
    /// recapture by the child node's extension logic, seeded by the parent.
    pub recapture_square: Option<Square>,
}

/// Search state threaded through every [`negascout`] / [`quiesce`] call.
pub(super) struct SearchContext<'a> {
    /// Total nodes visited this search (shared across Lazy-SMP helpers via
    /// an atomic counter at the pool level; this field is this thread's view).
    pub nodes: u64,
    /// Transposition table (shared, lockless).
    pub tt: &'a TranspositionTable,
    /// Principal variation table.
    pub pv: PvTable,
    /// Search control (stop flag + time limits).
    pub control: &'a SearchControl,
    /// Killer move table.
    pub killers: KillerTable,
    /// History heuristic table.
    pub history_table: HistoryTable,
    /// Per-ply search stack.
    pub stack: [StackFrame; MAX_PLY],
    /// Zobrist hashes of positions visited up to and including the root,
    /// used for repetition detection; grows by one push per ply descended.
    pub repetition: Vec<u64>,
    /// Weak-play move-skipping filter; `None` at full strength.
    pub weak: Option<WeakPlay>,
    /// When `Some`, only these moves are considered at the root (ply 0).
    /// Used both for weak-play root subsetting and for multi-PV exclusion
    /// of already-reported lines. Ignored at every other ply.
    pub root_restrict: Option<Vec<Move>>,
}

impl<'a> SearchContext<'a> {
    pub fn new(tt: &'a TranspositionTable, control: &'a SearchControl) -> Self {
        Self {
            nodes: 0,
            tt,
            pv: PvTable::new(),
            control,
            killers: KillerTable::new(),
            history_table: HistoryTable::new(),
            stack: [StackFrame::new(); MAX_PLY],
            repetition: Vec::with_capacity(MAX_PLY),
            weak: None,
            root_restrict: None,
        }
    }
}

/// Negamax/NegaScout search with PVS, LMR, and the standard pruning and
/// extension suite.
///
/// Returns the score for the side to move at `board`. The principal
/// variation is collected into `ctx.pv`.
pub(super) fn negascout(
    board: &Board,
    mut alpha: i32,
    beta: i32,
    params: NodeParams,
    ctx: &mut SearchContext<'_>,
    in_check: bool,
) -> i32 {
    let ply = params.ply as usize;
    ctx.pv.clear_ply(ply);

    // Step 1: mate-distance pruning.
    let mut beta = beta.min(MATE_SCORE - params.ply as i32 - 1);
    alpha = alpha.max(-MATE_SCORE + params.ply as i32);
    if alpha >= beta {
        return alpha;
    }

    // Step 2: cooperative cancellation.
    if ctx.control.should_stop(ctx.nodes) {
        return 0;
    }

    if ply >= MAX_PLY - 1 {
        return evaluate(board);
    }

    // Step 3: clear this node's recorded move before doing any work.
    ctx.stack[ply].current_move = Move::NULL;

    // Step 4: draw detection.
    let hash = board.hash();
    if board.halfmove_clock() >= 100 {
        let moves_here = corvid_core::generate_legal_moves(board);
        if in_check && moves_here.is_empty() {
            return -(MATE_SCORE - (params.ply as i32 + 1));
        }
        return 0;
    }
    if is_repetition(&ctx.repetition, hash, board.halfmove_clock()) {
        return 0;
    }

    let is_pv = beta - alpha > 1;

    // Step 5: transposition table probe.
    let mut tt_move = Move::NULL;
    let tt_result = ctx.tt.probe(hash, params.ply);
    if let Some(entry) = &tt_result {
        tt_move = entry.best_move;
        let depth_covers = entry.depth as i32 >= params.depth || entry.score.abs() > MATE_THRESHOLD;
        if (!is_pv || params.depth <= 0) && depth_covers {
            match entry.bound {
                Bound::Exact => return entry.score,
                Bound::LowerBound if entry.score >= beta => {
                    if tt_move.is_quiet() {
                        ctx.killers.store(ply, tt_move);
                    }
                    return entry.score;
                }
                Bound::UpperBound if entry.score <= alpha => return entry.score,
                _ => {}
            }
        }
    }

    let eval = match &tt_result {
        Some(entry) => entry.eval,
        None => evaluate(board),
    };
    ctx.stack[ply].static_eval = eval;

    // Step 6: check extension.
    let pos_extend = if in_check { PLY_SCALE } else { 0 };

    // Step 7: drop into quiescence.
    if params.depth + pos_extend <= 0 {
        let score = quiesce(board, alpha, beta, params.ply, 0, in_check, ctx);
        let bound = if score >= beta {
            Bound::LowerBound
        } else if score <= alpha {
            Bound::UpperBound
        } else {
            Bound::Exact
        };
        ctx.tt.store(hash, 0, score, score, Move::NULL, bound, params.ply, is_pv);
        return score;
    }

    let side = board.side_to_move();

    // Step 8: razoring.
    if !in_check && !is_pv && params.depth < 4 * PLY_SCALE {
        let margin = if params.depth <= PLY_SCALE { RAZOR_MARGIN_1 } else { RAZOR_MARGIN_2 };
        if eval + margin < beta {
            let razor_alpha = alpha - margin;
            let razor_beta = beta - margin;
            let score = quiesce(board, razor_alpha, razor_beta, params.ply, 0, in_check, ctx);
            if score <= razor_alpha {
                ctx.tt.store(hash, params.depth.max(0) as u8, score, eval, Move::NULL, Bound::UpperBound, params.ply, is_pv);
                return score;
            }
        }
    }

    // Step 9: reverse futility pruning.
    if !in_check
        && !is_pv
        && pos_extend == 0
        && params.depth < 5 * PLY_SCALE
        && zugzwang_safe(board, side)
    {
        let margin = RFP_MARGIN[params.depth.clamp(0, 4) as usize];
        if eval - margin >= beta {
            return eval - margin;
        }
    }

    // Step 10: null-move pruning.
    if !in_check
        && !is_pv
        && ctx.stack[ply].allow_null_move
        && params.depth >= 3 * PLY_SCALE
        && beta.abs() <= MATE_SCORE / 2
        && zugzwang_safe(board, side)
        && eval >= beta
    {
        let r = if params.depth > 6 * PLY_SCALE { 4 * PLY_SCALE } else { 3 * PLY_SCALE };
        let child = board.make_null_move();
        ctx.stack[ply + 1].allow_null_move = false;
        let child_params = NodeParams {
            depth: params.depth - r,
            ply: params.ply + 1,
            recapture_square: None,
        };
        let null_score = -negascout(&child, -beta, -beta + 1, child_params, ctx, false);
        ctx.stack[ply + 1].allow_null_move = true;

        if null_score >= beta {
            let accept = if params.depth >= NULL_MOVE_VERIFY_DEPTH {
                let verify_params = NodeParams {
                    depth: params.depth - r,
                    ply: params.ply,
                    recapture_square: None,
                };
                ctx.stack[ply].allow_null_move = false;
                let verify_score = negascout(board, beta - 1, beta, verify_params, ctx, in_check);
                ctx.stack[ply].allow_null_move = true;
                verify_score >= beta
            } else {
                true
            };
            if accept {
                ctx.tt.store(hash, params.depth.max(0) as u8, null_score, eval, Move::NULL, Bound::LowerBound, params.ply, is_pv);
                return null_score;
            }
        }
    }

    // Step 11: internal iterative deepening — populate a missing hash move.
    if tt_move.is_null() && params.depth > 4 * PLY_SCALE && (is_pv || params.depth > 8 * PLY_SCALE) {
        let reduced = if is_pv { params.depth - 2 * PLY_SCALE } else { params.depth * 3 / 8 };
        let iid_params = NodeParams { depth: reduced, ply: params.ply, recapture_square: None };
        let _ = negascout(board, alpha, beta, iid_params, ctx, in_check);
        if let Some(entry) = ctx.tt.probe(hash, params.ply) {
            tt_move = entry.best_move;
        }
    }

    // Step 12: move generation (already fully legal; check-evasions handled
    // automatically when `in_check`).
    let moves = corvid_core::generate_legal_moves(board);

    // At the root, weak play and multi-PV exclusion may restrict the set of
    // moves actually searched; the unrestricted list is still what step 17's
    // checkmate/stalemate detection reasons about.
    let restricted;
    let moves_to_search = if ply == 0 {
        if let Some(restrict) = &ctx.root_restrict {
            let mut filtered = corvid_core::MoveList::new();
            for i in 0..moves.len() {
                if restrict.contains(&moves[i]) {
                    filtered.push(moves[i]);
                }
            }
            restricted = filtered;
            &restricted
        } else {
            &moves
        }
    } else {
        &moves
    };

    // Step 13: ordering bootstrap.
    let mut picker = MovePicker::new(moves_to_search, board, tt_move, &ctx.killers, &ctx.history_table, ply);

    // Step 14/15: LMP and futility gates.
    let lmp_active = !in_check && !is_pv && zugzwang_safe(board, side);
    let lmp_limit = match params.depth {
        1..=4 => LMP_LIMIT[params.depth as usize],
        _ => usize::MAX,
    };
    let futility_active = !in_check && !is_pv && pos_extend == 0 && params.depth < 5 * PLY_SCALE;
    let futility_margin = FUTILITY_MARGIN[params.depth.clamp(0, 4) as usize];
    let futility_score = eval + futility_margin;
    let futility_enabled = futility_active && futility_score <= alpha;

    // Step 16: the move loop.
    let mut best_score = -INF;
    let mut best_move = Move::NULL;
    let mut move_index = 0usize;
    let mut legal_moves = 0usize;
    let mut lmr_count = 0usize;
    let mut quiets_tried: Vec<Move> = Vec::new();

    while let Some(mv) = picker.pick_next() {
        let is_promo = mv.kind() == MoveKind::Promotion;
        let is_capture = board.piece_on(mv.dest()).is_some() || mv.kind() == MoveKind::EnPassant;
        let is_quiet_move = !is_capture && !is_promo;
        let is_killer = ctx.killers.is_killer(ply, mv);

        let may_reduce = legal_moves > 0
            && mv != tt_move
            && !is_promo
            && !is_killer
            && (!is_capture || sign_see(board, mv) < 0);

        let passed_pawn_push = is_quiet_move && is_passed_pawn_push(board, side, mv);

        // Late-move pruning / forward futility: only ever skip moves after
        // at least one legal move has already been searched at this node.
        if may_reduce {
            let child_gives_check_cheap = if passed_pawn_push {
                false
            } else {
                let probe = board.make_move(mv);
                gives_check(&probe)
            };
            if !child_gives_check_cheap && !passed_pawn_push {
                if lmp_active && best_score > -(MATE_SCORE / 2) && move_index >= lmp_limit {
                    move_index += 1;
                    continue;
                }
                if futility_enabled {
                    best_score = best_score.max(futility_score);
                    move_index += 1;
                    continue;
                }
            }
        }

        // Weak-play in-search skip: never applied to the first legal move.
        if legal_moves > 0 {
            if let Some(weak) = &ctx.weak {
                if weak.should_skip(board, mv, params.ply, params.recapture_square) {
                    move_index += 1;
                    continue;
                }
            }
        }

        let child = board.make_move(mv);
        let child_gives_check = gives_check(&child);

        // Extensions.
        let mut move_extend = 0;
        let v_value = victim_value(board, mv);
        if move_extend == 0 && Some(mv.dest()) == params.recapture_square && see(board, mv) > v_value - pawn_value() / 2 {
            move_extend = PLY_SCALE;
        }
        if move_extend == 0 && is_capture {
            let total_pawns = board.pieces(PieceKind::Pawn).count() as i32 * pawn_value();
            let capturing_non_pawn = non_pawn_material_value(board, side);
            let opponent_non_pawn = non_pawn_material_value(board, side.flip());
            if total_pawns > pawn_value() && capturing_non_pawn == 0 && opponent_non_pawn == v_value {
                move_extend = PLY_SCALE;
            }
        }
        let extend = pos_extend.max(move_extend);

        // Late-move reductions.
        let mut lmr = 0;
        if params.depth >= 3 * PLY_SCALE
            && may_reduce
            && extend == 0
            && !child_gives_check
            && !passed_pawn_push
        {
            lmr_count += 1;
            lmr = if lmr_count > LMR_LIMIT_2 && params.depth > 5 * PLY_SCALE && !is_capture {
                3 * PLY_SCALE
            } else if lmr_count > LMR_LIMIT_1 && params.depth > 3 * PLY_SCALE && !is_capture {
                2 * PLY_SCALE
            } else {
                PLY_SCALE
            };
            lmr = lmr.min(params.depth - 1).max(0);
        }

        // Recapture-square seeding for the child node.
        let mut child_recapture_square = None;
        if is_capture && (child_gives_check || params.depth + extend > PLY_SCALE) {
            let attacker_kind = board.piece_on(mv.source()).unwrap_or(PieceKind::Pawn);
            let f_value = SEE_VALUE[attacker_kind.index()];
            if (v_value - f_value).abs() < pawn_value() / 2 {
                let s = see(board, mv);
                if s.abs() < pawn_value() / 2 {
                    child_recapture_square = Some(mv.dest());
                }
            }
        }

        let new_depth = params.depth - PLY_SCALE + extend;
        ctx.nodes += 1;
        ctx.stack[ply].current_move = mv;
        ctx.stack[ply + 1].allow_null_move = true;
        ctx.repetition.push(child.hash());

        let score = if move_index == 0 {
            let child_params = NodeParams {
                depth: new_depth,
                ply: params.ply + 1,
                recapture_square: child_recapture_square,
            };
            -negascout(&child, -beta, -alpha, child_params, ctx, child_gives_check)
        } else {
            let reduced_params = NodeParams {
                depth: new_depth - lmr,
                ply: params.ply + 1,
                recapture_square: child_recapture_square,
            };
            let mut s = -negascout(&child, -(alpha + 1), -alpha, reduced_params, ctx, child_gives_check);
            if lmr > 0 && s > alpha {
                let full_depth_params = NodeParams {
                    depth: new_depth,
                    ply: params.ply + 1,
                    recapture_square: child_recapture_square,
                };
                s = -negascout(&child, -(alpha + 1), -alpha, full_depth_params, ctx, child_gives_check);
            }
            if s > alpha && s < beta {
                let full_window_params = NodeParams {
                    depth: new_depth,
                    ply: params.ply + 1,
                    recapture_square: child_recapture_square,
                };
                s = -negascout(&child, -beta, -alpha, full_window_params, ctx, child_gives_check);
            }
            s
        };

        ctx.repetition.pop();
        legal_moves += 1;
        move_index += 1;

        if score > best_score {
            best_score = score;
            best_move = mv;
            ctx.stack[ply].best_move = mv;
            if score > alpha {
                alpha = score;
                ctx.pv.update(ply, mv);
                if alpha >= beta {
                    if is_quiet_move {
                        ctx.killers.store(ply, mv);
                        let piece = board.piece_on(mv.source()).unwrap_or(PieceKind::Pawn);
                        let bonus_depth = params.depth.clamp(1, i32::from(u8::MAX)) as u8;
                        ctx.history_table.update_good(piece, mv.dest().index() as usize, bonus_depth);
                        for qm in &quiets_tried {
                            let p = board.piece_on(qm.source()).unwrap_or(PieceKind::Pawn);
                            ctx.history_table.update_bad(p, qm.dest().index() as usize, bonus_depth);
                        }
                    }
                    ctx.tt.store(hash, params.depth.max(0) as u8, best_score, eval, best_move, Bound::LowerBound, params.ply, is_pv);
                    return best_score;
                }
            }
        }

        if is_quiet_move {
            quiets_tried.push(mv);
        }
    }

    // Step 17: terminal handling.
    if legal_moves == 0 {
        let score = if in_check { -(MATE_SCORE - (params.ply as i32 + 1)) } else { 0 };
        ctx.tt.store(hash, params.depth.max(0) as u8, score, eval, Move::NULL, Bound::Exact, params.ply, is_pv);
        return score;
    }

    let bound = if best_move.is_null() { Bound::UpperBound } else { Bound::Exact };
    ctx.tt.store(hash, params.depth.max(0) as u8, best_score, eval, best_move, bound, params.ply, is_pv);
    best_score
}

/// Root driver for a single iterative-deepening iteration: searches `depth`
/// plies with an aspiration window around `prev_score`, re-searching with a
/// widened window on fail-high/fail-low until the result stabilizes.
///
/// Depth 1 and any iteration whose previous score already looks like a
/// forced mate skip the narrow window entirely and search `(-INF, INF)`,
/// since there is nothing useful to narrow around.
pub(super) fn aspiration_search(
    board: &Board,
    depth: u8,
    prev_score: i32,
    ctx: &mut SearchContext<'_>,
) -> i32 {
    let depth_s = depth as i32 * PLY_SCALE;
    let in_check = in_check_at_root(board);

    if depth <= 1 || prev_score.abs() > MATE_SCORE / 2 {
        let params = NodeParams { depth: depth_s, ply: 0, recapture_square: None };
        return negascout(board, -INF, INF, params, ctx, in_check);
    }

    let mut delta = ASPIRATION_WINDOW;
    let mut alpha = (prev_score - delta).max(-MATE_SCORE);
    let mut beta = (prev_score + delta).min(MATE_SCORE);

    loop {
        let params = NodeParams { depth: depth_s, ply: 0, recapture_square: None };
        let score = negascout(board, alpha, beta, params, ctx, in_check);

        if ctx.control.should_stop(ctx.nodes) {
            return score;
        }

        if score <= alpha {
            delta = delta * 3 / 2;
            alpha = if score.abs() > MATE_SCORE / 2 {
                -MATE_SCORE
            } else {
                (prev_score - delta).max(-MATE_SCORE)
            };
        } else if score >= beta {
            delta = delta * 3 / 2;
            beta = if score.abs() > MATE_SCORE / 2 {
                MATE_SCORE
            } else {
                (prev_score + delta).min(MATE_SCORE)
            };
        } else {
            return score;
        }

        if alpha <= -MATE_SCORE && beta >= MATE_SCORE {
            let params = NodeParams { depth: depth_s, ply: 0, recapture_square: None };
            return negascout(board, -INF, INF, params, ctx, in_check);
        }
    }
}

/// One root move's running search state, persisted across iterative-
/// deepening iterations (SPEC_FULL §3's root-only `MoveInfo`).
pub(super) struct RootMoveInfo {
    pub mv: Move,
    pub depth: i32,
    pub alpha: i32,
    pub beta: i32,
    pub score: i32,
    pub nodes: u64,
    pub pv: Vec<Move>,
}

impl RootMoveInfo {
    pub fn new(mv: Move) -> Self {
        Self { mv, depth: 0, alpha: -INF, beta: INF, score: 0, nodes: 0, pv: vec![mv] }
    }
}

/// Outcome of one [`root_search_iteration`] call.
pub(super) struct RootIterationOutcome {
    /// `false` only when a move's sub-search was cut short by cooperative
    /// cancellation mid-recursion, meaning its score is unreliable and
    /// `sc_moves` should not be trusted for this depth. `true` covers both
    /// a full sweep of every root move and a clean early stop between
    /// moves (every entry touched so far is a fully resolved search).
    pub completed: bool,
    /// Mirrors the source's `needMoreTime`: set once a move other than the
    /// first fails high, or any multi-PV move fails low. The caller should
    /// judge the remaining budget against the hard limit rather than the
    /// soft one for the rest of this iteration.
    pub need_more_time: bool,
    /// The move most recently observed failing high, tracked independently
    /// of `sc_moves[0].mv` so a cancellation mid fail-high-retry still lets
    /// the caller protect the move that was in the middle of looking better
    /// than the incumbent, rather than falling back to an older iteration.
    pub interim_best: Move,
}

#[allow(clippy::too_many_arguments)]
fn store_root_result(
    sc_moves: &mut [RootMoveInfo],
    mi: usize,
    depth: i32,
    alpha: i32,
    beta: i32,
    score: i32,
    pv: &PvTable,
) {
    sc_moves[mi].depth = depth;
    sc_moves[mi].alpha = alpha;
    sc_moves[mi].beta = beta;
    sc_moves[mi].score = score;
    let mut line = Vec::with_capacity(1 + pv.line_at(1).len());
    line.push(sc_moves[mi].mv);
    line.extend_from_slice(pv.line_at(1));
    sc_moves[mi].pv = line;
}

/// Runs one iterative-deepening iteration of the root driver (SPEC_FULL
/// §4.E): searches every move in `sc_moves`, in its current order, with a
/// per-move aspiration window (a null window beyond the top `max_pv`
/// slots), root-specific LMR, and fail-high/fail-low window widening.
/// Reorders `sc_moves` in place as it goes, so slot 0 is always the
/// best-scoring line found so far.
///
/// `sc_moves` must persist across depths: its initial order is the
/// caller's choice, and `nodes` accumulates across iterations so the
/// end-of-iteration node-count sort ([`reorder_root_tail`]) can prioritize
/// moves that have historically been expensive to search.
pub(super) fn root_search_iteration(
    board: &Board,
    depth_s: i32,
    max_pv: usize,
    first_iteration: bool,
    sc_moves: &mut [RootMoveInfo],
    ctx: &mut SearchContext<'_>,
) -> RootIterationOutcome {
    let max_pv = max_pv.clamp(1, sc_moves.len());
    let mut need_more_time = false;
    let mut interim_best = Move::NULL;

    let mut mi = 0usize;
    while mi < sc_moves.len() {
        let aspiration_delta =
            if sc_moves[mi].score.abs() <= MATE_SCORE / 2 { ASPIRATION_WINDOW } else { 1000 };

        let mut alpha = if first_iteration {
            -MATE_SCORE
        } else if mi < max_pv {
            (sc_moves[mi].score - aspiration_delta).max(-MATE_SCORE)
        } else {
            sc_moves[max_pv - 1].score
        };
        let mut beta = if first_iteration {
            MATE_SCORE
        } else if mi < max_pv {
            (sc_moves[mi].score + aspiration_delta).min(MATE_SCORE)
        } else {
            alpha + 1
        };

        let mv = sc_moves[mi].mv;
        let child = board.make_move(mv);
        let child_gives_check = gives_check(&child);
        let is_capture = board.piece_on(mv.dest()).is_some() || mv.kind() == MoveKind::EnPassant;
        let is_promotion = mv.kind() == MoveKind::Promotion;

        let lmr = if depth_s >= 3 * PLY_SCALE
            && !is_capture
            && !is_promotion
            && !child_gives_check
            && !is_passed_pawn_push(board, board.side_to_move(), mv)
            && mi >= ROOT_LMR_MOVE_COUNT + max_pv
        {
            PLY_SCALE
        } else {
            0
        };

        let nodes_before = ctx.nodes;
        ctx.nodes += 1;
        ctx.repetition.push(child.hash());
        let reduced_params =
            NodeParams { depth: depth_s - lmr - PLY_SCALE, ply: 1, recapture_square: None };
        let mut score = -negascout(&child, -beta, -alpha, reduced_params, ctx, child_gives_check);
        if lmr > 0 && score > alpha {
            let full_params = NodeParams { depth: depth_s - PLY_SCALE, ply: 1, recapture_square: None };
            score = -negascout(&child, -beta, -alpha, full_params, ctx, child_gives_check);
        }
        ctx.repetition.pop();

        if ctx.control.should_stop(ctx.nodes) {
            return RootIterationOutcome { completed: false, need_more_time, interim_best };
        }
        store_root_result(sc_moves, mi, depth_s, alpha, beta, score, &ctx.pv);

        let mut beta_retry_delta = if mi == 0 { aspiration_delta * 2 } else { aspiration_delta };
        let mut alpha_retry_delta = aspiration_delta * 2;

        while score >= beta || (mi < max_pv && score <= alpha) {
            let fail_high = score >= beta;
            if fail_high {
                if score > MATE_SCORE / 2 {
                    beta_retry_delta = MATE_SCORE;
                }
                beta = (score + beta_retry_delta).min(MATE_SCORE);
                beta_retry_delta = beta_retry_delta * 3 / 2;
                if mi != 0 {
                    need_more_time = true;
                }
                interim_best = mv;
            } else {
                if score < -MATE_SCORE / 2 {
                    alpha_retry_delta = MATE_SCORE;
                }
                alpha = (score - alpha_retry_delta).max(-MATE_SCORE);
                alpha_retry_delta = alpha_retry_delta * 3 / 2;
                need_more_time = true;
            }

            ctx.nodes += 1;
            ctx.repetition.push(child.hash());
            let full_params = NodeParams { depth: depth_s - PLY_SCALE, ply: 1, recapture_square: None };
            score = -negascout(&child, -beta, -alpha, full_params, ctx, child_gives_check);
            ctx.repetition.pop();

            if ctx.control.should_stop(ctx.nodes) {
                return RootIterationOutcome { completed: false, need_more_time, interim_best };
            }
            store_root_result(sc_moves, mi, depth_s, alpha, beta, score, &ctx.pv);
        }

        sc_moves[mi].nodes += ctx.nodes - nodes_before;

        // Immediate insertion-sort: promote this move ahead of any earlier
        // slot with a lower score, either because it is itself a top-maxPV
        // slot or because it just beat the current multi-PV cutoff.
        if mi < max_pv || score > sc_moves[max_pv - 1].score {
            let mut i = mi;
            while i > 0 && sc_moves[i - 1].score < sc_moves[i].score {
                sc_moves.swap(i - 1, i);
                i -= 1;
            }
        }

        mi += 1;

        if !first_iteration && ctx.control.should_stop_between_root_moves(need_more_time) {
            break;
        }
    }

    RootIterationOutcome { completed: true, need_more_time, interim_best }
}

/// End-of-iteration reordering of the root-move tail beyond the top
/// `max_pv` slots (which the per-move insertion-sort above already keeps
/// precisely ordered): the first iteration sorts by score (best guess
/// ordering before any node counts exist), every iteration after that
/// sorts by node count, searching historically expensive moves first.
pub(super) fn reorder_root_tail(sc_moves: &mut [RootMoveInfo], max_pv: usize, first_iteration: bool) {
    let max_pv = max_pv.min(sc_moves.len());
    if first_iteration {
        sc_moves[max_pv..].sort_by(|a, b| b.score.cmp(&a.score));
    } else {
        sc_moves[max_pv..].sort_by(|a, b| b.nodes.cmp(&a.nodes));
    }
}

/// Quiescence search: resolves captures (and, near the main search frontier,
/// checks) to a quiet position before returning a score.
///
/// `depth` starts at `0` and decreases with each ply of quiescence; it is
/// *not* related to the main search's remaining depth. At `depth >= 0`,
/// quiet moves that give check are still considered; at `depth == -1` only
/// captures are examined; at `depth <= -2` give-check detection is skipped
/// entirely to bound the cost of deep quiescence chains.
pub(super) fn quiesce(
    board: &Board,
    mut alpha: i32,
    beta: i32,
    ply: u8,
    depth: i32,
    in_check: bool,
    ctx: &mut SearchContext<'_>,
) -> i32 {
    ctx.nodes += 1;
    if ctx.control.should_stop(ctx.nodes) {
        return 0;
    }
    if ply as usize >= MAX_PLY - 1 {
        return evaluate(board);
    }

    let stand_pat = if in_check {
        -(MATE_SCORE - (ply as i32 + 1))
    } else {
        let e = evaluate(board);
        if depth == 0 {
            ctx.stack[ply as usize].static_eval = e;
        }
        e
    };

    if stand_pat >= beta {
        return stand_pat;
    }
    if stand_pat > alpha {
        alpha = stand_pat;
    }
    let mut best_score = stand_pat;
    let mut best_move = Move::NULL;

    let moves = corvid_core::generate_legal_moves(board);
    let n = moves.len();
    let mut mv_arr = [Move::NULL; 256];
    let mut scores = [0i32; 256];
    for i in 0..n {
        mv_arr[i] = moves[i];
        scores[i] = super::ordering::score_move(board, moves[i]);
    }

    for idx in 0..n {
        // If the first few moves didn't fail high this is probably an
        // ALL-node, so spending more effort on move ordering beyond them is
        // probably wasted time — only the front of the list gets sorted.
        if idx < QUIESCE_MAX_SORT_MOVES {
            let mut best_i = idx;
            for j in (idx + 1)..n {
                if scores[j] > scores[best_i] {
                    best_i = j;
                }
            }
            mv_arr.swap(idx, best_i);
            scores.swap(idx, best_i);
        }
        let mv = mv_arr[idx];

        let is_promo = mv.kind() == MoveKind::Promotion;
        let is_capture = board.piece_on(mv.dest()).is_some() || mv.kind() == MoveKind::EnPassant;
        let is_quiet_move = !is_capture && !is_promo;

        let compute_check = depth > -2;
        let mut check_given = false;
        let mut child_cached = None;
        if compute_check || is_capture || is_promo {
            let child = board.make_move(mv);
            if compute_check {
                check_given = gives_check(&child);
            }
            child_cached = Some(child);
        }

        if !in_check {
            if is_quiet_move {
                if depth <= -1 || !check_given || !see_ge(board, mv, 0) {
                    continue;
                }
            } else if neg_see(board, mv) {
                continue;
            }
        }

        if !in_check {
            let optimistic = stand_pat + victim_value(board, mv) + promotion_gain(mv) + DELTA_PRUNING_MARGIN;
            if optimistic < alpha {
                let non_pawn_either =
                    has_non_pawn_material(board, Color::White) || has_non_pawn_material(board, Color::Black);
                if non_pawn_either && !check_given {
                    best_score = best_score.max(optimistic);
                    continue;
                }
            }
        }

        let child = child_cached.unwrap_or_else(|| board.make_move(mv));
        let next_in_check = if depth <= -2 { false } else { check_given };

        let score = -quiesce(&child, -beta, -alpha, ply + 1, depth - 1, next_in_check, ctx);

        if score > best_score {
            best_score = score;
            if depth == 0 {
                best_move = mv;
            }
            if score > alpha {
                alpha = score;
                if depth == 0 {
                    ctx.pv.update(ply as usize, mv);
                }
                if alpha >= beta {
                    return alpha;
                }
            }
        }
    }

    let _ = best_move;
    best_score
}

/// Triangular principal-variation table.
pub struct PvTable {
    moves: [[Move; MAX_PLY]; MAX_PLY],
    len: [usize; MAX_PLY],
}

impl PvTable {
    /// Create a zeroed PV table.
    pub fn new() -> Self {
        Self {
            moves: [[Move::NULL; MAX_PLY]; MAX_PLY],
            len: [0; MAX_PLY],
        }
    }

    /// Clear the PV line at `ply` (called at the top of each node).
    pub fn clear_ply(&mut self, ply: usize) {
        if ply < MAX_PLY {
            self.len[ply] = 0;
        }
    }

    /// Update the PV at `ply`: set `mv` as the best move and copy
    /// the continuation from `ply + 1`.
    ///
    /// After this call, `self.moves[ply]` = `[mv, pv[ply+1]...]`.
    pub fn update(&mut self, ply: usize, mv: Move) {
        if ply >= MAX_PLY {
            return;
        }

        self.moves[ply][0] = mv;

        let child_ply = ply + 1;
        if child_ply < MAX_PLY {
            let child_len = self.len[child_ply];
            let copy_len = child_len.min(MAX_PLY - 1);

            if ply < child_ply {
                let (top, bottom) = self.moves.split_at_mut(child_ply);
                top[ply][1..1 + copy_len].copy_from_slice(&bottom[0][..copy_len]);
            }

            self.len[ply] = 1 + copy_len;
        } else {
            self.len[ply] = 1;
        }
    }

    /// Set a single move as the PV at `ply` (no continuation).
    ///
    /// Used for TT cutoffs at the root.
    pub fn set_single(&mut self, ply: usize, mv: Move) {
        if ply < MAX_PLY {
            self.moves[ply][0] = mv;
            self.len[ply] = 1;
        }
    }

    /// The principal variation from the root.
    pub fn root_pv(&self) -> &[Move] {
        &self.moves[0][..self.len[0]]
    }

    /// Length of the root PV line.
    pub fn root_len(&self) -> usize {
        self.len[0]
    }

    /// The continuation stored at an arbitrary `ply` (used by the root
    /// driver to read back the line below a root move searched at ply 1).
    pub fn line_at(&self, ply: usize) -> &[Move] {
        if ply < MAX_PLY { &self.moves[ply][..self.len[ply]] } else { &[] }
    }
}

impl Default for PvTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::Board;

    fn fresh_ctx(tt: &TranspositionTable, control: &SearchControl) -> SearchContext<'_> {
        SearchContext::new(tt, control)
    }

    fn infinite_control() -> SearchControl {
        SearchControl::new_infinite(std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    #[test]
    fn depth_one_returns_sane_score() {
        let board = Board::starting_position();
        let tt = TranspositionTable::new(1);
        let control = infinite_control();
        let mut ctx = fresh_ctx(&tt, &control);
        ctx.repetition.push(board.hash());
        let params = NodeParams { depth: PLY_SCALE, ply: 0, recapture_square: None };
        let score = negascout(&board, -INF, INF, params, &mut ctx, false);
        assert!(score.abs() < MATE_SCORE);
    }

    #[test]
    fn mate_in_one_is_found() {
        let board: Board = "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4"
            .parse()
            .unwrap();
        let tt = TranspositionTable::new(1);
        let control = infinite_control();
        let mut ctx = fresh_ctx(&tt, &control);
        ctx.repetition.push(board.hash());
        let params = NodeParams { depth: 2 * PLY_SCALE, ply: 0, recapture_square: None };
        let score = negascout(&board, -INF, INF, params, &mut ctx, false);
        assert!(score > MATE_THRESHOLD, "expected mate score, got {score}");
    }

    #[test]
    fn stalemate_scores_zero() {
        let board: Board = "k7/2K5/1Q6/8/8/8/8/8 b - - 0 1".parse().unwrap();
        let tt = TranspositionTable::new(1);
        let control = infinite_control();
        let mut ctx = fresh_ctx(&tt, &control);
        ctx.repetition.push(board.hash());
        let params = NodeParams { depth: PLY_SCALE, ply: 0, recapture_square: None };
        let score = negascout(&board, -INF, INF, params, &mut ctx, false);
        assert_eq!(score, 0);
    }

    #[test]
    fn quiesce_quiet_position_returns_static_eval() {
        let board = Board::starting_position();
        let tt = TranspositionTable::new(1);
        let control = infinite_control();
        let mut ctx = fresh_ctx(&tt, &control);
        let score = quiesce(&board, -INF, INF, 0, 0, false, &mut ctx);
        assert_eq!(score, evaluate(&board));
    }

    #[test]
    fn has_non_pawn_material_detects_pieces() {
        let board = Board::starting_position();
        assert!(has_non_pawn_material(&board, Color::White));
        let bare: Board = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        assert!(!has_non_pawn_material(&bare, Color::White));
    }

    #[test]
    fn twofold_repetition_is_not_a_draw() {
        let h = 0xABCDu64;
        // h occurs once before the current entry — twofold only.
        let history = vec![1, 2, h, 3, h];
        assert!(!is_repetition(&history, h, 10));
    }

    #[test]
    fn threefold_repetition_is_a_draw() {
        let h = 0xABCDu64;
        // h occurs twice before the current entry — threefold.
        let history = vec![10, 11, h, 13, h, 15, h];
        assert!(is_repetition(&history, h, 10));
    }

    #[test]
    fn threefold_repetition_outside_clock_window_is_ignored() {
        let h = 0xABCDu64;
        let history = vec![10, 11, h, 13, h, 15, h];
        // halfmove_clock=3 only lets the lookback reach the first prior
        // occurrence (offset 2), not the second (offset 4).
        assert!(!is_repetition(&history, h, 3));
    }
}
