//! Pseudo-legal move generation. The side to move may leave its king in
//! check; the punishment arrives one ply later, when the opponent's move
//! list collapses to king captures (see [`moves`]).
//!
//! All piece routines generate for White; Black positions are flipped
//! vertically, generated, and the moves flipped back.

use crate::attacks::{
    bishop_attacks, black_attacks, king_attacks, knight_shift, pawn_attacks_east,
    pawn_attacks_west, queen_attacks, rook_attacks, KNIGHT_SHIFTS,
};
use crate::bitboard::{
    bit, flip_square, flip_vertically, lsb_index, sq, Bitboard, RANKS, RANK_8,
};
use crate::pop_lsb;
use crate::state::{Piece, Side, State};
use rand::Rng;

/// Move kinds, at most sixteen. The promotion piece is in the low two bits
/// of promoting kinds; bit 3 marks a promotion and kind 4 plus the
/// capturing-promotion block mark captures.
pub struct Kind;
impl Kind {
    pub const NORMAL: u16 = 0;
    pub const DOUBLE_PUSH: u16 = 1;
    pub const CASTLE_KINGSIDE: u16 = 2;
    pub const CASTLE_QUEENSIDE: u16 = 3;
    pub const CAPTURE: u16 = 4;
    pub const PROMOTE_KNIGHT: u16 = 8;
    pub const PROMOTE_BISHOP: u16 = 9;
    pub const PROMOTE_ROOK: u16 = 10;
    pub const PROMOTE_QUEEN: u16 = 11;
    pub const CAPTURE_PROMOTE_KNIGHT: u16 = 12;
    pub const CAPTURE_PROMOTE_BISHOP: u16 = 13;
    pub const CAPTURE_PROMOTE_ROOK: u16 = 14;
    pub const CAPTURE_PROMOTE_QUEEN: u16 = 15;
}

const PROMOTIONS: [u16; 4] = [
    Kind::PROMOTE_KNIGHT,
    Kind::PROMOTE_BISHOP,
    Kind::PROMOTE_ROOK,
    Kind::PROMOTE_QUEEN,
];

const CAPTURE_PROMOTIONS: [u16; 4] = [
    Kind::CAPTURE_PROMOTE_KNIGHT,
    Kind::CAPTURE_PROMOTE_BISHOP,
    Kind::CAPTURE_PROMOTE_ROOK,
    Kind::CAPTURE_PROMOTE_QUEEN,
];

/// A move packed into sixteen bits: kind in the low nibble, then source and
/// target square indices.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Move(u16);

impl Move {
    /// Placeholder with no meaning on the board; used for the tree root.
    pub const NULL: Move = Move(0);

    #[must_use]
    pub fn new(source: usize, target: usize, kind: u16) -> Self {
        debug_assert!(source < 64 && target < 64);
        debug_assert!(kind <= Kind::CAPTURE || kind >= Kind::PROMOTE_KNIGHT);
        Move(kind | (source as u16) << 4 | (target as u16) << 10)
    }

    /// Decodes a raw word, rejecting the unused kind encodings.
    #[must_use]
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & 0xF {
            5..=7 => None,
            _ => Some(Move(bits)),
        }
    }

    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn kind(self) -> u16 {
        self.0 & 0xF
    }

    #[must_use]
    pub fn source(self) -> usize {
        (self.0 >> 4) as usize & 63
    }

    #[must_use]
    pub fn target(self) -> usize {
        (self.0 >> 10) as usize & 63
    }

    #[must_use]
    pub fn is_capture(self) -> bool {
        self.kind() == Kind::CAPTURE || self.kind() >= Kind::CAPTURE_PROMOTE_KNIGHT
    }

    /// The piece a promoting move turns the pawn into.
    #[must_use]
    pub fn promotion(self) -> Option<usize> {
        if self.kind() & 0b1000 > 0 {
            Some((self.kind() & 0b11) as usize + Piece::KNIGHT)
        } else {
            None
        }
    }

    /// The same move on the vertically mirrored board.
    #[must_use]
    pub fn flipped(self) -> Self {
        Move::new(flip_square(self.source()), flip_square(self.target()), self.kind())
    }

    /// Coordinate notation, e.g. "e2e4" or "d7d8q".
    #[must_use]
    pub fn to_coordinate(self) -> String {
        let promotion = match self.promotion() {
            Some(Piece::KNIGHT) => "n",
            Some(Piece::BISHOP) => "b",
            Some(Piece::ROOK) => "r",
            Some(Piece::QUEEN) => "q",
            _ => "",
        };
        format!(
            "{}{}{}",
            sq::name(self.source()),
            sq::name(self.target()),
            promotion
        )
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_coordinate())
    }
}

impl std::fmt::Debug for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Move({} kind {})", self.to_coordinate(), self.kind())
    }
}

/// The pseudo-legal move list for the side to move.
///
/// A side whose king has been captured has no moves. A side that could
/// capture the opponent king right now (the opponent moved into check) is
/// forced to: only king-capturing moves are returned.
pub fn moves(state: &State) -> Vec<Move> {
    let us = state.us();
    let mut list = Vec::with_capacity(48);

    if state.pieces(us, Piece::KING) == 0 {
        return list;
    }

    if us == Side::WHITE {
        let rights = (
            state.can_castle(Side::WHITE, true),
            state.can_castle(Side::WHITE, false),
        );
        white_moves(&mut list, state.board(), state.en_passant_square(), rights);
    } else {
        let mut board = [[0; 6]; 2];
        for piece in Piece::PAWN..=Piece::KING {
            board[Side::WHITE][piece] = flip_vertically(state.pieces(Side::BLACK, piece));
            board[Side::BLACK][piece] = flip_vertically(state.pieces(Side::WHITE, piece));
        }
        let rights = (
            state.can_castle(Side::BLACK, true),
            state.can_castle(Side::BLACK, false),
        );
        white_moves(
            &mut list,
            &board,
            flip_vertically(state.en_passant_square()),
            rights,
        );
        for mov in list.iter_mut() {
            *mov = mov.flipped();
        }
    }

    if state.their_king_attacked() {
        let king = lsb_index(state.pieces(state.them(), Piece::KING));
        list.retain(|mov| mov.target() == king);
    }

    list
}

/// Uniformly random pseudo-legal move, if any exist.
pub fn random_move<R: Rng>(state: &State, rng: &mut R) -> Option<Move> {
    let list = moves(state);
    if list.is_empty() {
        None
    } else {
        Some(list[rng.random_range(0..list.len())])
    }
}

fn white_moves(
    list: &mut Vec<Move>,
    board: &[[Bitboard; 6]; 2],
    en_passant_square: Bitboard,
    (can_kingside, can_queenside): (bool, bool),
) {
    let us: Bitboard = board[Side::WHITE].iter().fold(0, |acc, b| acc | b);
    let them: Bitboard = board[Side::BLACK].iter().fold(0, |acc, b| acc | b);
    let flat = us | them;

    pawn_moves(list, board[Side::WHITE][Piece::PAWN], them, en_passant_square, flat);
    knight_moves(list, board[Side::WHITE][Piece::KNIGHT], us, them);

    slider_moves(list, board[Side::WHITE][Piece::BISHOP], us, them, flat, bishop_attacks);
    slider_moves(list, board[Side::WHITE][Piece::ROOK], us, them, flat, rook_attacks);
    slider_moves(list, board[Side::WHITE][Piece::QUEEN], us, them, flat, queen_attacks);

    king_moves(list, board[Side::WHITE][Piece::KING], us, them);
    castle_moves(list, flat, board, can_kingside, can_queenside);
}

/// Emits one move per set target bit, with the source at a fixed offset
/// below the target.
fn targets_relative(list: &mut Vec<Move>, mut targets: Bitboard, offset: i32, kind: u16) {
    while targets > 0 {
        pop_lsb!(target, targets);
        list.push(Move::new((target as i32 - offset) as usize, target, kind));
    }
}

/// Splits an attack set from one source square into quiet moves and
/// captures.
fn split_attacks(list: &mut Vec<Move>, attacks: Bitboard, us: Bitboard, them: Bitboard, source: usize) {
    let attacks = attacks & !us;
    let mut captures = attacks & them;
    while captures > 0 {
        pop_lsb!(target, captures);
        list.push(Move::new(source, target, Kind::CAPTURE));
    }
    let mut quiets = attacks & !them;
    while quiets > 0 {
        pop_lsb!(target, quiets);
        list.push(Move::new(source, target, Kind::NORMAL));
    }
}

fn pawn_moves(
    list: &mut Vec<Move>,
    pawns: Bitboard,
    them: Bitboard,
    en_passant_square: Bitboard,
    flat: Bitboard,
) {
    let single = (pawns << 8) & !flat;
    targets_relative(list, single & !RANK_8, 8, Kind::NORMAL);
    let push_promotions = single & RANK_8;
    if push_promotions > 0 {
        for kind in PROMOTIONS {
            targets_relative(list, push_promotions, 8, kind);
        }
    }

    let double = ((single & RANKS[2]) << 8) & !flat;
    targets_relative(list, double, 16, Kind::DOUBLE_PUSH);

    for (attacks, offset) in [
        (pawn_attacks_west(pawns), 7),
        (pawn_attacks_east(pawns), 9),
    ] {
        let captures = attacks & (them | en_passant_square);
        targets_relative(list, captures & !RANK_8, offset, Kind::CAPTURE);
        let capture_promotions = captures & RANK_8;
        if capture_promotions > 0 {
            for kind in CAPTURE_PROMOTIONS {
                targets_relative(list, capture_promotions, offset, kind);
            }
        }
    }
}

fn knight_moves(list: &mut Vec<Move>, knights: Bitboard, us: Bitboard, them: Bitboard) {
    for &(leftshift, rightshift, bad) in &KNIGHT_SHIFTS {
        let targets = knight_shift(knights, leftshift, rightshift, bad) & !us;
        let offset = leftshift as i32 - rightshift as i32;
        targets_relative(list, targets & them, offset, Kind::CAPTURE);
        targets_relative(list, targets & !them, offset, Kind::NORMAL);
    }
}

fn slider_moves(
    list: &mut Vec<Move>,
    mut pieces: Bitboard,
    us: Bitboard,
    them: Bitboard,
    flat: Bitboard,
    attacks: fn(Bitboard, usize) -> Bitboard,
) {
    while pieces > 0 {
        pop_lsb!(source, pieces);
        split_attacks(list, attacks(flat, source), us, them, source);
    }
}

fn king_moves(list: &mut Vec<Move>, king: Bitboard, us: Bitboard, them: Bitboard) {
    split_attacks(list, king_attacks(king), us, them, lsb_index(king));
}

// Castling needs the transit squares empty and unattacked. Rights arriving
// here already imply the king and rook are at home.
fn castle_moves(
    list: &mut Vec<Move>,
    flat: Bitboard,
    board: &[[Bitboard; 6]; 2],
    can_kingside: bool,
    can_queenside: bool,
) {
    let need_attacks = can_kingside || can_queenside;
    let attacks = if need_attacks {
        black_attacks(flat, board)
    } else {
        0
    };
    if can_kingside
        && attacks & (bit(sq::E1) | bit(sq::F1) | bit(sq::G1)) == 0
        && flat & (bit(sq::F1) | bit(sq::G1)) == 0
    {
        list.push(Move::new(sq::E1, sq::G1, Kind::CASTLE_KINGSIDE));
    }
    if can_queenside
        && attacks & (bit(sq::E1) | bit(sq::D1) | bit(sq::C1) | bit(sq::B1)) == 0
        && flat & (bit(sq::D1) | bit(sq::C1) | bit(sq::B1)) == 0
    {
        list.push(Move::new(sq::E1, sq::C1, Kind::CASTLE_QUEENSIDE));
    }
}
