//! Pawn structure evaluation for HCE (Handcrafted Evaluation).
//!
//! Evaluates passed pawns, isolated pawns, doubled pawns, and backward pawns.
//! All scores are from White's perspective (positive = White advantage).

use corvid_core::{Bitboard, Board, Color, File, PieceKind, Square, pawn_attacks};

use crate::eval::score::{Score, S};

// ---------------------------------------------------------------------------
// Precomputed tables
// ---------------------------------------------------------------------------

/// For each file index 0–7, the bitboard of the adjacent files.
///
/// File A → FILE_B only; File H → FILE_G only; all others get both neighbours.
pub(crate) static ADJACENT_FILES: [Bitboard; 8] = compute_adjacent_files();

/// For each `[color][square]`, the mask of squares ahead of the pawn on the
/// same file and adjacent files.
///
/// A pawn is passed if `PASSED_PAWN_MASK[color][sq] & enemy_pawns` is empty.
pub(crate) static PASSED_PAWN_MASK: [[Bitboard; 64]; 2] = compute_passed_pawn_masks();

const fn compute_adjacent_files() -> [Bitboard; 8] {
    let mut table = [Bitboard::EMPTY; 8];
    let mut f = 0usize;
    while f < 8 {
        let mut bits = 0u64;
        // Left neighbour (file index - 1), if in range
        if f > 0 {
            bits |= Bitboard::FILES[f - 1].inner();
        }
        // Right neighbour (file index + 1), if in range
        if f < 7 {
            bits |= Bitboard::FILES[f + 1].inner();
        }
        table[f] = Bitboard::new(bits);
        f += 1;
    }
    table
}

const fn compute_passed_pawn_masks() -> [[Bitboard; 64]; 2] {
    let mut table = [[Bitboard::EMPTY; 64]; 2];

    let mut sq = 0usize;
    while sq < 64 {
        let rank = sq / 8; // 0 = rank 1, 7 = rank 8
        let file = sq % 8;

        // The file mask for this square plus both adjacent files
        let file_mask = Bitboard::FILES[file].inner();
        let adj_mask = ADJACENT_FILES[file].inner();
        let span_mask = file_mask | adj_mask;

        // White: ahead means higher rank indices (toward rank 8)
        let mut white_bits = 0u64;
        let mut r = rank + 1;
        while r < 8 {
            white_bits |= Bitboard::RANKS[r].inner();
            r += 1;
        }
        table[0][sq] = Bitboard::new(span_mask & white_bits);

        // Black: ahead means lower rank indices (toward rank 1)
        let mut black_bits = 0u64;
        // rank is usize, so we use a checked subtraction via a signed approach
        if rank > 0 {
            let mut r2 = 0usize;
            while r2 < rank {
                black_bits |= Bitboard::RANKS[r2].inner();
                r2 += 1;
            }
        }
        table[1][sq] = Bitboard::new(span_mask & black_bits);

        sq += 1;
    }

    table
}

// ---------------------------------------------------------------------------
// Evaluation constants
// ---------------------------------------------------------------------------

/// Passed pawn bonus by rank from that side's perspective.
///
/// Index by the pawn's rank (0-based from the pawn's own back rank).
/// Index 0 is impossible (pawns start on rank 2 at earliest), index 6 is
/// one step from promotion.
const PASSED_PAWN_BONUS: [Score; 7] = [
    S(0, 0),      // rank 1 — impossible for a pawn
    S(5, 10),     // rank 2 — starting rank
    S(10, 20),    // rank 3
    S(20, 40),    // rank 4
    S(40, 70),    // rank 5
    S(70, 120),   // rank 6
    S(100, 200),  // rank 7 — one step from promotion
];

/// Extra bonus when a passed pawn is directly supported by another friendly pawn.
const PASSED_PAWN_SUPPORTED_BONUS: Score = S(15, 25);

/// Penalty for an isolated pawn (no friendly pawns on adjacent files).
const ISOLATED_PAWN_PENALTY: Score = S(-10, -20);

/// Penalty per extra pawn on the same file (beyond the first).
const DOUBLED_PAWN_PENALTY: Score = S(-10, -15);

/// Penalty for a backward pawn.
const BACKWARD_PAWN_PENALTY: Score = S(-15, -10);

/// Bonus for a pawn that is directly supported by another friendly pawn
/// (connected pawns on adjacent files, same or +1 rank).
const CONNECTED_PAWN_BONUS: Score = S(5, 8);

// ---------------------------------------------------------------------------
// Public evaluation entry point
// ---------------------------------------------------------------------------

/// Evaluate pawn structure from White's perspective.
///
/// Returns a positive score when the pawn structure favours White.
pub fn evaluate_pawns(board: &Board) -> Score {
    let white_pawns = board.pieces(PieceKind::Pawn) & board.side(Color::White);
    let black_pawns = board.pieces(PieceKind::Pawn) & board.side(Color::Black);

    let white_score = evaluate_pawns_for_side(white_pawns, black_pawns, Color::White);
    let black_score = evaluate_pawns_for_side(black_pawns, white_pawns, Color::Black);

    white_score - black_score
}

// ---------------------------------------------------------------------------
// Per-side helper
// ---------------------------------------------------------------------------

/// Accumulate the pawn-structure score for one side.
///
/// All returned scores are from that side's own perspective (positive = good
/// for `color`). The caller is responsible for negating the Black score when
/// combining into a single White-relative total.
fn evaluate_pawns_for_side(
    friendly_pawns: Bitboard,
    enemy_pawns: Bitboard,
    color: Color,
) -> Score {
    let mut score = Score::ZERO;

    // ------------------------------------------------------------------
    // Doubled pawns: for each file, every pawn beyond the first is a penalty
    // ------------------------------------------------------------------
    for file in File::ALL {
        let count = (Bitboard::file_mask(file) & friendly_pawns).count();
        if count > 1 {
            score += DOUBLED_PAWN_PENALTY * (count - 1) as i16;
        }
    }

    // ------------------------------------------------------------------
    // Per-pawn evaluation: passed, isolated, backward
    // ------------------------------------------------------------------
    for sq in friendly_pawns {
        let file = sq.file();
        let file_idx = file.index();

        // Rank from this color's own perspective (0 = own back rank, 7 = promotion)
        let rank_idx = match color {
            Color::White => sq.rank().index(),
            Color::Black => 7 - sq.rank().index(),
        };

        // --- Passed pawn ---
        let passed = (PASSED_PAWN_MASK[color.index()][sq.index()] & enemy_pawns).is_empty();
        if passed {
            score += PASSED_PAWN_BONUS[rank_idx];

            // Supported: any friendly pawn that attacks `sq` from behind.
            // pawn_attacks(!color, sq) gives the squares a pawn of the
            // OPPOSITE color on `sq` would attack — which are exactly the
            // squares where a friendly pawn would need to be to attack `sq`.
            let supported = (pawn_attacks(!color, sq) & friendly_pawns).is_nonempty();
            if supported {
                score += PASSED_PAWN_SUPPORTED_BONUS;
            }
        }

        // --- Isolated pawn ---
        let adjacent_friendly = ADJACENT_FILES[file_idx] & friendly_pawns;
        let is_isolated = adjacent_friendly.is_empty();
        if is_isolated {
            score += ISOLATED_PAWN_PENALTY;
            // Skip backward check: isolated pawns are already penalized and
            // the backward logic requires a friendly pawn on an adjacent file.
            continue;
        }

        // --- Backward pawn ---
        // A pawn is backward when:
        //   (a) No friendly pawn on adjacent files is on the same rank or
        //       behind it (i.e., it cannot be supported on its advance).
        //   (b) The stop square (one step ahead) is attacked by an enemy pawn.
        //
        // For (a): compute the "rear span" — adjacent files restricted to
        // ranks at or behind the pawn. If that intersection is empty, the
        // pawn is backward in terms of pawn chain support.

        let rear_span = rear_span_mask(sq, color);
        let no_support_behind = (rear_span & friendly_pawns).is_empty();

        if no_support_behind {
            // (b) the stop square is attacked by an enemy pawn.
            //
            // To check if any enemy pawn attacks `stop_sq`, we use
            // `pawn_attacks(color, stop_sq)`. This gives the squares from
            // which a friendly pawn WOULD attack `stop_sq` — which are
            // exactly the squares where enemy pawns must stand to attack it.
            // For example: White pawn's stop_sq = e3, `pawn_attacks(White, e3)`
            // = {d4, f4}, the squares where Black pawns would cover e3.
            if let Some(stop_sq) = stop_square(sq, color) {
                let stop_attacked =
                    (pawn_attacks(color, stop_sq) & enemy_pawns).is_nonempty();
                if stop_attacked {
                    score += BACKWARD_PAWN_PENALTY;
                }
            }
        }

        // --- Connected pawn ---
        // A pawn is connected if a friendly pawn on an adjacent file attacks it
        // (i.e., is on the same rank or one rank behind and on an adjacent file).
        let supporters = pawn_attacks(!color, sq) & friendly_pawns;
        if supporters.is_nonempty() {
            score += CONNECTED_PAWN_BONUS;
        }
    }

    score
}

// ---------------------------------------------------------------------------
// Geometry helpers
// ---------------------------------------------------------------------------

/// Return the bitboard of squares on adjacent files that are on the same rank
/// or behind the pawn (the "rear span" on adjacent files).
///
/// Used to check whether any friendly pawn can support this pawn's advance.
fn rear_span_mask(sq: Square, color: Color) -> Bitboard {
    let rank_idx = sq.rank().index();
    let file_idx = sq.file().index();

    // Collect all ranks at or behind the pawn (inclusive of its own rank)
    let mut rank_bits = 0u64;
    match color {
        Color::White => {
            // "Behind" for White = smaller rank indices
            let mut r = 0usize;
            while r <= rank_idx {
                rank_bits |= Bitboard::RANKS[r].inner();
                r += 1;
            }
        }
        Color::Black => {
            // "Behind" for Black = larger rank indices
            let mut r = rank_idx;
            while r < 8 {
                rank_bits |= Bitboard::RANKS[r].inner();
                r += 1;
            }
        }
    }

    let rank_mask = Bitboard::new(rank_bits);
    ADJACENT_FILES[file_idx] & rank_mask
}

/// Return the stop square (one step forward) for a pawn of the given color,
/// or `None` if the pawn is already on the promotion rank (shouldn't happen
/// in a valid position).
fn stop_square(sq: Square, color: Color) -> Option<Square> {
    let idx = sq.index() as u8;
    match color {
        Color::White => Square::from_index(idx + 8),
        Color::Black => {
            if idx < 8 {
                None
            } else {
                Square::from_index(idx - 8)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
