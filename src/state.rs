//! Position representation: twelve piece bitboards with derived occupancy,
//! a cached opponent-attack set, castling rights and the en-passant square.
//! Moves are applied in place and reversed exactly through [`Undo`] records.

use crate::attacks::{all_attacks, black_attacks};
use crate::bitboard::{bit, cardinality, lsb_index, sq, Bitboard, RANKS};
use crate::movegen::{Kind, Move};
use crate::zobrist::ZVALS;
use thiserror::Error;

pub struct Side;
impl Side {
    pub const WHITE: usize = 0;
    pub const BLACK: usize = 1;
}

pub struct Piece;
impl Piece {
    pub const PAWN: usize = 0;
    pub const KNIGHT: usize = 1;
    pub const BISHOP: usize = 2;
    pub const ROOK: usize = 3;
    pub const QUEEN: usize = 4;
    pub const KING: usize = 5;
}

// castling rights bits
pub struct Right;
impl Right {
    pub const WKS: u8 = 0b0001;
    pub const WQS: u8 = 0b0010;
    pub const BKS: u8 = 0b0100;
    pub const BQS: u8 = 0b1000;
    pub const ALL: u8 = 0b1111;
}

// Rights surviving a move touching each square: moving the king or a rook
// off its original square loses the right, and so does any capture landing
// on a rook's original corner.
const RIGHTS_MASK: [u8; 64] = {
    let mut masks = [Right::ALL; 64];
    masks[sq::A1] = Right::ALL ^ Right::WQS;
    masks[sq::H1] = Right::ALL ^ Right::WKS;
    masks[sq::E1] = Right::ALL ^ (Right::WKS | Right::WQS);
    masks[sq::A8] = Right::ALL ^ Right::BQS;
    masks[sq::H8] = Right::ALL ^ Right::BKS;
    masks[sq::E8] = Right::ALL ^ (Right::BKS | Right::BQS);
    masks
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FenError {
    #[error("expected at least 4 FEN fields, got {0}")]
    FieldCount(usize),
    #[error("bad piece placement character {0:?}")]
    Placement(char),
    #[error("piece placement does not describe 8x8 squares")]
    Shape,
    #[error("bad side-to-move field {0:?}")]
    SideToMove(String),
    #[error("bad castling field character {0:?}")]
    Castling(char),
    #[error("bad en-passant field {0:?}")]
    EnPassant(String),
}

/// Everything needed to reverse one move.
#[derive(Copy, Clone, Debug)]
pub struct Undo {
    mov: Move,
    captured: Option<(usize, usize)>,
    rights: u8,
    en_passant_square: Bitboard,
    their_attacks: Bitboard,
    hash: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct State {
    board: [[Bitboard; 6]; 2],
    occupancy: [Bitboard; 2],
    flat_occupancy: Bitboard,
    us: usize,
    en_passant_square: Bitboard,
    rights: u8,
    their_attacks: Bitboard,
    hash: u64,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// The standard starting position.
    pub fn new() -> Self {
        let mut state = Self::empty();
        let back = [
            Piece::ROOK,
            Piece::KNIGHT,
            Piece::BISHOP,
            Piece::QUEEN,
            Piece::KING,
            Piece::BISHOP,
            Piece::KNIGHT,
            Piece::ROOK,
        ];
        for (file, &piece) in back.iter().enumerate() {
            state.toggle(Side::WHITE, piece, file);
            state.toggle(Side::WHITE, Piece::PAWN, 8 + file);
            state.toggle(Side::BLACK, Piece::PAWN, 48 + file);
            state.toggle(Side::BLACK, piece, 56 + file);
        }
        state.rights = Right::ALL;
        state.their_attacks = state.attacks_of(Side::BLACK);
        state
    }

    fn empty() -> Self {
        Self {
            board: [[0; 6]; 2],
            occupancy: [0; 2],
            flat_occupancy: 0,
            us: Side::WHITE,
            en_passant_square: 0,
            rights: 0,
            their_attacks: 0,
            hash: 0,
        }
    }

    /// Builds a position from Forsyth-Edwards Notation. The halfmove clock
    /// and fullmove number are accepted but discarded; draws are bounded by
    /// the playout ply cap instead.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(FenError::FieldCount(fields.len()));
        }

        let mut state = Self::empty();

        let (mut rank, mut file) = (7i32, 0i32);
        for ch in fields[0].chars() {
            match ch {
                '/' => {
                    if file != 8 || rank == 0 {
                        return Err(FenError::Shape);
                    }
                    rank -= 1;
                    file = 0;
                }
                '1'..='8' => file += ch as i32 - '0' as i32,
                _ => {
                    let idx = "PNBRQKpnbrqk"
                        .find(ch)
                        .ok_or(FenError::Placement(ch))?;
                    if file > 7 {
                        return Err(FenError::Shape);
                    }
                    state.toggle(idx / 6, idx % 6, (8 * rank + file) as usize);
                    file += 1;
                }
            }
            if file > 8 {
                return Err(FenError::Shape);
            }
        }
        if rank != 0 || file != 8 {
            return Err(FenError::Shape);
        }

        state.us = match fields[1] {
            "w" => Side::WHITE,
            "b" => Side::BLACK,
            other => return Err(FenError::SideToMove(other.to_string())),
        };

        if fields[2] != "-" {
            for ch in fields[2].chars() {
                state.rights |= match ch {
                    'K' => Right::WKS,
                    'Q' => Right::WQS,
                    'k' => Right::BKS,
                    'q' => Right::BQS,
                    _ => return Err(FenError::Castling(ch)),
                };
            }
        }

        if fields[3] != "-" {
            let b = fields[3].as_bytes();
            if b.len() != 2 || !b[0].is_ascii_lowercase() || !(b'a'..=b'h').contains(&b[0]) {
                return Err(FenError::EnPassant(fields[3].to_string()));
            }
            let square = match b[1] {
                b'3' => 16 + (b[0] - b'a') as usize,
                b'6' => 40 + (b[0] - b'a') as usize,
                _ => return Err(FenError::EnPassant(fields[3].to_string())),
            };
            state.en_passant_square = bit(square);
        }

        state.their_attacks = state.attacks_of(state.us ^ 1);
        Ok(state)
    }

    /// Renders the position as FEN. Clock fields are emitted as "0 1".
    pub fn as_fen(&self) -> String {
        const PIECES: [char; 12] = ['P', 'N', 'B', 'R', 'Q', 'K', 'p', 'n', 'b', 'r', 'q', 'k'];
        let mut fen = String::new();

        for rank in (0..8).rev() {
            let mut clear = 0;
            for file in 0..8 {
                let square = 8 * rank + file;
                match self.occupant(square) {
                    Some((side, piece)) => {
                        if clear > 0 {
                            fen.push_str(&clear.to_string());
                        }
                        clear = 0;
                        fen.push(PIECES[6 * side + piece]);
                    }
                    None => clear += 1,
                }
            }
            if clear > 0 {
                fen.push_str(&clear.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(['w', 'b'][self.us]);
        fen.push(' ');

        if self.rights == 0 {
            fen.push('-');
        } else {
            for (right, ch) in [
                (Right::WKS, 'K'),
                (Right::WQS, 'Q'),
                (Right::BKS, 'k'),
                (Right::BQS, 'q'),
            ] {
                if self.rights & right > 0 {
                    fen.push(ch);
                }
            }
        }

        fen.push(' ');
        if self.en_passant_square > 0 {
            fen.push_str(&sq::name(lsb_index(self.en_passant_square)));
        } else {
            fen.push('-');
        }

        fen.push_str(" 0 1");
        fen
    }

    // POSITION INFO

    #[must_use]
    pub fn pieces(&self, side: usize, piece: usize) -> Bitboard {
        self.board[side][piece]
    }

    #[must_use]
    pub fn board(&self) -> &[[Bitboard; 6]; 2] {
        &self.board
    }

    #[must_use]
    pub fn occupancy(&self, side: usize) -> Bitboard {
        self.occupancy[side]
    }

    #[must_use]
    pub fn flat_occupancy(&self) -> Bitboard {
        self.flat_occupancy
    }

    #[must_use]
    pub fn us(&self) -> usize {
        self.us
    }

    #[must_use]
    pub fn them(&self) -> usize {
        self.us ^ 1
    }

    #[must_use]
    pub fn en_passant_square(&self) -> Bitboard {
        self.en_passant_square
    }

    /// Squares attacked by the opponent of the side to move, own pieces
    /// included, recomputed after every move.
    #[must_use]
    pub fn their_attacks(&self) -> Bitboard {
        self.their_attacks
    }

    #[must_use]
    pub fn can_castle(&self, side: usize, kingside: bool) -> bool {
        self.rights & (1u8 << (2 * side + usize::from(!kingside))) > 0
    }

    /// Zobrist hash of the position, castling rights, en-passant file and
    /// side to move included.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut hash = self.hash ^ ZVALS.castling[self.rights as usize] ^ ZVALS.side[self.us];
        if self.en_passant_square > 0 {
            hash ^= ZVALS.en_passant[lsb_index(self.en_passant_square) & 7];
        }
        hash
    }

    /// The piece on `square`, if any.
    #[must_use]
    pub fn occupant(&self, square: usize) -> Option<(usize, usize)> {
        let b = bit(square);
        if self.flat_occupancy & b == 0 {
            return None;
        }
        let side = usize::from(self.occupancy[Side::BLACK] & b > 0);
        for piece in Piece::PAWN..=Piece::KING {
            if self.board[side][piece] & b > 0 {
                return Some((side, piece));
            }
        }
        None
    }

    fn piece_on(&self, side: usize, square: usize) -> usize {
        let b = bit(square);
        for piece in Piece::PAWN..=Piece::KING {
            if self.board[side][piece] & b > 0 {
                return piece;
            }
        }
        panic!(
            "inconsistent position: no piece of side {} on {}",
            side,
            sq::name(square)
        );
    }

    /// Whether the side to move attacks the opponent king, i.e. the
    /// opponent just moved into check and the king capture is forced.
    #[must_use]
    pub fn their_king_attacked(&self) -> bool {
        self.attacks_of(self.us) & self.board[self.them()][Piece::KING] > 0
    }

    /// The side holding the only remaining king, once one has been taken.
    #[must_use]
    pub fn winner(&self) -> Option<usize> {
        if self.board[Side::WHITE][Piece::KING] == 0 {
            Some(Side::BLACK)
        } else if self.board[Side::BLACK][Piece::KING] == 0 {
            Some(Side::WHITE)
        } else {
            None
        }
    }

    fn attacks_of(&self, side: usize) -> Bitboard {
        if side == Side::WHITE {
            all_attacks(self.flat_occupancy, &self.board[Side::WHITE])
        } else {
            black_attacks(self.flat_occupancy, &self.board)
        }
    }

    // MODIFY POSITION

    fn toggle(&mut self, side: usize, piece: usize, square: usize) {
        let b = bit(square);
        self.board[side][piece] ^= b;
        self.occupancy[side] ^= b;
        self.flat_occupancy ^= b;
        self.hash ^= ZVALS.pieces[side][piece][square];
    }

    /// Applies `mov` in place and returns the record that reverses it.
    pub fn make_move(&mut self, mov: Move) -> Undo {
        let mut undo = Undo {
            mov,
            captured: None,
            rights: self.rights,
            en_passant_square: self.en_passant_square,
            their_attacks: self.their_attacks,
            hash: self.hash,
        };

        let us = self.us;
        let them = us ^ 1;
        let (source, target) = (mov.source(), mov.target());
        let moved = self.piece_on(us, source);

        // capture resolution reads the pre-move en-passant square; the
        // ordering matters, the square is overwritten below
        if mov.is_capture() {
            let (piece, square) = if moved == Piece::PAWN && bit(target) == self.en_passant_square
            {
                let behind = if us == Side::WHITE {
                    target - 8
                } else {
                    target + 8
                };
                (Piece::PAWN, behind)
            } else {
                (self.piece_on(them, target), target)
            };
            self.toggle(them, piece, square);
            undo.captured = Some((piece, square));
        }

        self.toggle(us, moved, source);
        match mov.promotion() {
            Some(promoted) => self.toggle(us, promoted, target),
            None => self.toggle(us, moved, target),
        }

        let base = 56 * us;
        match mov.kind() {
            Kind::CASTLE_KINGSIDE => {
                self.toggle(us, Piece::ROOK, base + 7);
                self.toggle(us, Piece::ROOK, base + 5);
            }
            Kind::CASTLE_QUEENSIDE => {
                self.toggle(us, Piece::ROOK, base);
                self.toggle(us, Piece::ROOK, base + 3);
            }
            _ => {}
        }

        self.en_passant_square = if mov.kind() == Kind::DOUBLE_PUSH {
            bit((source + target) / 2)
        } else {
            0
        };

        self.rights &= RIGHTS_MASK[source] & RIGHTS_MASK[target];

        self.us = them;
        self.their_attacks = self.attacks_of(us);

        undo
    }

    /// Reverses the move recorded in `undo`; the result compares equal to
    /// the pre-move state.
    pub fn unmake_move(&mut self, undo: Undo) {
        self.us ^= 1;
        let us = self.us;
        let mov = undo.mov;
        let (source, target) = (mov.source(), mov.target());

        match mov.promotion() {
            Some(promoted) => {
                self.toggle(us, promoted, target);
                self.toggle(us, Piece::PAWN, source);
            }
            None => {
                let moved = self.piece_on(us, target);
                self.toggle(us, moved, target);
                self.toggle(us, moved, source);
            }
        }

        let base = 56 * us;
        match mov.kind() {
            Kind::CASTLE_KINGSIDE => {
                self.toggle(us, Piece::ROOK, base + 5);
                self.toggle(us, Piece::ROOK, base + 7);
            }
            Kind::CASTLE_QUEENSIDE => {
                self.toggle(us, Piece::ROOK, base + 3);
                self.toggle(us, Piece::ROOK, base);
            }
            _ => {}
        }

        if let Some((piece, square)) = undo.captured {
            self.toggle(us ^ 1, piece, square);
        }

        self.rights = undo.rights;
        self.en_passant_square = undo.en_passant_square;
        self.their_attacks = undo.their_attacks;
        self.hash = undo.hash;
    }

    /// Rebuilds every derived field from the piece bitboards and asserts it
    /// matches the cached copy. Cheap enough for tests, too slow for search.
    pub fn require_consistent(&self) {
        let mut flat = 0;
        let mut occupancy = [0; 2];
        for side in 0..2 {
            for piece in Piece::PAWN..=Piece::KING {
                let b = self.board[side][piece];
                assert_eq!(flat & b, 0, "two pieces share a square");
                flat |= b;
                occupancy[side] |= b;
            }
        }
        assert_eq!(occupancy, self.occupancy, "stale occupancy");
        assert_eq!(flat, self.flat_occupancy, "stale flat occupancy");
        assert_eq!(self.occupancy[0] & self.occupancy[1], 0);
        assert_eq!(
            self.their_attacks,
            self.attacks_of(self.them()),
            "stale opponent attacks"
        );
        if self.en_passant_square > 0 {
            assert_eq!(cardinality(self.en_passant_square), 1);
            assert_eq!(
                self.en_passant_square & (RANKS[2] | RANKS[5]),
                self.en_passant_square,
                "en-passant square off ranks 3/6"
            );
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const PIECES: [[char; 6]; 2] = [
            ['P', 'N', 'B', 'R', 'Q', 'K'],
            ['p', 'n', 'b', 'r', 'q', 'k'],
        ];
        for rank in (0..8).rev() {
            for file in 0..8 {
                let ch = match self.occupant(8 * rank + file) {
                    Some((side, piece)) => PIECES[side][piece],
                    None => '.',
                };
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        write!(f, "{} to move", ["white", "black"][self.us])
    }
}
