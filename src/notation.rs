//! Coordinate and standard algebraic move parsing. Both parsers work by
//! disambiguation: the input is matched against the current move list, and
//! anything that matches no move (or more than one) is an error.

use crate::bitboard::bit;
use crate::movegen::{moves, Kind, Move};
use crate::state::{Piece, State};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognised move syntax {0:?}")]
    Syntax(String),
    #[error("{0:?} matches no move in this position")]
    Unmatched(String),
    #[error("{0:?} is ambiguous in this position")]
    Ambiguous(String),
}

fn square(s: &str) -> usize {
    let b = s.as_bytes();
    (b[0] - b'a') as usize + 8 * (b[1] - b'1') as usize
}

fn piece_from_letter(s: &str) -> usize {
    match s {
        "N" | "n" => Piece::KNIGHT,
        "B" | "b" => Piece::BISHOP,
        "R" | "r" => Piece::ROOK,
        "Q" | "q" => Piece::QUEEN,
        "K" => Piece::KING,
        _ => Piece::PAWN,
    }
}

fn disambiguate(input: &str, matches: Vec<Move>) -> Result<Move, ParseError> {
    match matches[..] {
        [mov] => Ok(mov),
        [] => Err(ParseError::Unmatched(input.to_string())),
        _ => Err(ParseError::Ambiguous(input.to_string())),
    }
}

/// Coordinate notation: `<from><to>[promotion]`, e.g. `e2e4`, `d7d8q`.
pub mod coordinate {
    use super::*;

    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([a-h][1-8])([a-h][1-8])([nbrq])?$").unwrap());

    pub fn parse(input: &str, state: &State) -> Result<Move, ParseError> {
        let caps = RE
            .captures(input)
            .ok_or_else(|| ParseError::Syntax(input.to_string()))?;
        let source = square(&caps[1]);
        let target = square(&caps[2]);
        let promotion = caps.get(3).map(|m| piece_from_letter(m.as_str()));

        let matches = moves(state)
            .into_iter()
            .filter(|mov| {
                mov.source() == source && mov.target() == target && mov.promotion() == promotion
            })
            .collect();
        disambiguate(input, matches)
    }
}

/// Standard algebraic notation, including castles, disambiguation by file
/// or rank, `x` for captures, `=Q` promotions and trailing `+`/`#`.
pub mod algebraic {
    use super::*;

    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([KQRBN])?([a-h])?([1-8])?(x)?([a-h][1-8])(?:=?([QRBN]))?$").unwrap()
    });

    pub fn parse(input: &str, state: &State) -> Result<Move, ParseError> {
        let trimmed = input.trim_end_matches(['+', '#']);

        if let "O-O" | "0-0" = trimmed {
            let matches = moves(state)
                .into_iter()
                .filter(|mov| mov.kind() == Kind::CASTLE_KINGSIDE)
                .collect();
            return disambiguate(input, matches);
        }
        if let "O-O-O" | "0-0-0" = trimmed {
            let matches = moves(state)
                .into_iter()
                .filter(|mov| mov.kind() == Kind::CASTLE_QUEENSIDE)
                .collect();
            return disambiguate(input, matches);
        }

        let caps = RE
            .captures(trimmed)
            .ok_or_else(|| ParseError::Syntax(input.to_string()))?;
        let piece = caps.get(1).map_or(Piece::PAWN, |m| piece_from_letter(m.as_str()));
        let source_file = caps.get(2).map(|m| (m.as_str().as_bytes()[0] - b'a') as usize);
        let source_rank = caps.get(3).map(|m| (m.as_str().as_bytes()[0] - b'1') as usize);
        let is_capture = caps.get(4).is_some();
        let target = square(&caps[5]);
        let promotion = caps.get(6).map(|m| piece_from_letter(m.as_str()));

        let us = state.us();
        let matches = moves(state)
            .into_iter()
            .filter(|mov| {
                mov.kind() != Kind::CASTLE_KINGSIDE
                    && mov.kind() != Kind::CASTLE_QUEENSIDE
                    && mov.target() == target
                    && mov.is_capture() == is_capture
                    && mov.promotion() == promotion
                    && state.pieces(us, piece) & bit(mov.source()) > 0
                    && source_file.is_none_or(|f| mov.source() & 7 == f)
                    && source_rank.is_none_or(|r| mov.source() / 8 == r)
            })
            .collect();
        disambiguate(input, matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitboard::sq::*;
    use crate::state::Side;

    #[test]
    fn coordinate_moves() {
        let state = State::default();
        let mov = coordinate::parse("e2e4", &state).unwrap();
        assert_eq!((mov.source(), mov.target()), (E2, E4));
        assert_eq!(mov.kind(), Kind::DOUBLE_PUSH);

        assert_eq!(
            coordinate::parse("e2e5", &state),
            Err(ParseError::Unmatched("e2e5".to_string()))
        );
        assert!(matches!(
            coordinate::parse("xyzzy", &state),
            Err(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn coordinate_promotions() {
        let state = State::from_fen("7k/3P4/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let mov = coordinate::parse("d7d8q", &state).unwrap();
        assert_eq!(mov.promotion(), Some(Piece::QUEEN));
        // a bare d7d8 is not a promotion move in this position
        assert_eq!(
            coordinate::parse("d7d8", &state),
            Err(ParseError::Unmatched("d7d8".to_string()))
        );
    }

    #[test]
    fn algebraic_basics() {
        let state = State::default();
        let mov = algebraic::parse("e4", &state).unwrap();
        assert_eq!((mov.source(), mov.target()), (E2, E4));
        let mov = algebraic::parse("Nf3", &state).unwrap();
        assert_eq!((mov.source(), mov.target()), (G1, F3));
        // two knights can never reach e4 from the initial position
        assert!(algebraic::parse("Ne4", &state).is_err());
    }

    #[test]
    fn algebraic_disambiguation() {
        let state = State::from_fen("4k3/8/8/8/8/8/4K3/R6R w - - 0 1").unwrap();
        assert_eq!(
            algebraic::parse("Rd1", &state),
            Err(ParseError::Ambiguous("Rd1".to_string()))
        );
        let mov = algebraic::parse("Rad1", &state).unwrap();
        assert_eq!(mov.source(), A1);
        let mov = algebraic::parse("Rhd1", &state).unwrap();
        assert_eq!(mov.source(), H1);
    }

    #[test]
    fn algebraic_castles_and_promotions() {
        let state =
            State::from_fen("r1b2rk1/pp1P1p1p/q1p2n2/2N2PpB/1NP2bP1/2R1B3/PP2Q2P/R3K3 w Q g6 0 1")
                .unwrap();
        let mov = algebraic::parse("O-O-O", &state).unwrap();
        assert_eq!(mov.kind(), Kind::CASTLE_QUEENSIDE);
        assert_eq!(algebraic::parse("0-0-0", &state).unwrap(), mov);
        assert!(algebraic::parse("O-O", &state).is_err());

        let mov = algebraic::parse("d8=Q", &state).unwrap();
        assert_eq!(mov.promotion(), Some(Piece::QUEEN));
        assert!(!mov.is_capture());
        let mov = algebraic::parse("dxc8=N+", &state).unwrap();
        assert_eq!(mov.promotion(), Some(Piece::KNIGHT));
        assert!(mov.is_capture());

        // en passant is an ordinary pawn capture in notation
        let mov = algebraic::parse("fxg6", &state).unwrap();
        assert_eq!((mov.source(), mov.target()), (F5, G6));
        assert!(mov.is_capture());
    }

    // A long Evans-gambit game: 46 SAN halfmoves through the parser, then
    // the full expected move set for the final position.
    #[test]
    fn algebraic_game_fixture() {
        let mut state = State::default();

        for word in "e4 e5 Nf3 Nc6 Bc4 Bc5 b4 Bxb4 c3 Ba5 d4 exd4 0-0 d3 Qb3 Qf6"
            .split_whitespace()
        {
            let mov = algebraic::parse(word, &state).unwrap();
            state.make_move(mov);
            state.require_consistent();
        }

        assert_eq!(state.occupancy(Side::WHITE), 0x0000_0000_1426_e167);
        assert_eq!(state.occupancy(Side::BLACK), 0xd5ef_2401_0008_0000);

        for word in "e5 Qg6 Re1 Nge7 Ba3 b5 Qxb5 Rb8 Qa4 Bb6 Nbd2 Bb7 Ne4 Qf5 \
                     Bxd3 Qh5 Nf6+ gxf6 exf6 Rg8 Rad1 Qxf3 Rxe7+ Nxe7 Qxd7+ \
                     Kxd7 Bf5+ Ke8 Bd7+ Kf8"
            .split_whitespace()
        {
            let mov = algebraic::parse(word, &state).unwrap();
            state.make_move(mov);
            state.require_consistent();
        }

        let w = Side::WHITE;
        let b = Side::BLACK;
        assert_eq!(state.pieces(w, Piece::PAWN), 0x0000_2000_0004_e100);
        assert_eq!(state.pieces(w, Piece::KNIGHT), 0x0000_0000_0000_0000);
        assert_eq!(state.pieces(w, Piece::BISHOP), 0x0008_0000_0001_0000);
        assert_eq!(state.pieces(w, Piece::ROOK), 0x0000_0000_0000_0008);
        assert_eq!(state.pieces(w, Piece::QUEEN), 0x0000_0000_0000_0000);
        assert_eq!(state.pieces(w, Piece::KING), 0x0000_0000_0000_0040);
        assert_eq!(state.pieces(b, Piece::PAWN), 0x00a5_0000_0000_0000);
        assert_eq!(state.pieces(b, Piece::KNIGHT), 0x0010_0000_0000_0000);
        assert_eq!(state.pieces(b, Piece::BISHOP), 0x0002_0200_0000_0000);
        assert_eq!(state.pieces(b, Piece::ROOK), 0x4200_0000_0000_0000);
        assert_eq!(state.pieces(b, Piece::QUEEN), 0x0000_0000_0020_0000);
        assert_eq!(state.pieces(b, Piece::KING), 0x2000_0000_0000_0000);
        assert_eq!(state.en_passant_square(), 0);
        assert_eq!(state.their_attacks(), 0xfd77_7fed_78fc_7008);
        assert_eq!(state.occupancy(w), 0x0008_2000_0005_e148);
        assert_eq!(state.occupancy(b), 0x62b7_0200_0020_0000);
        assert_eq!(state.us(), w);

        use std::collections::BTreeSet;
        let mut expected = BTreeSet::new();
        let mut mv = |from: usize, to: usize, kind: u16| {
            expected.insert(Move::new(from, to, kind));
        };
        mv(C3, C4, Kind::NORMAL);
        mv(G2, G3, Kind::NORMAL);
        mv(G2, F3, Kind::CAPTURE); // leaves the king in check on the g file
        mv(G2, G4, Kind::DOUBLE_PUSH);
        mv(H2, H3, Kind::NORMAL);
        mv(H2, H4, Kind::DOUBLE_PUSH);
        for to in [A4, B5, C6, E8, C8, E6, F5, G4, H3] {
            mv(D7, to, Kind::NORMAL);
        }
        for to in [C1, B2, B4, C5, D6] {
            mv(A3, to, Kind::NORMAL);
        }
        mv(A3, E7, Kind::CAPTURE);
        for to in [A1, B1, C1, E1, F1, D2, D3, D4, D5, D6] {
            mv(D1, to, Kind::NORMAL);
        }
        mv(F6, E7, Kind::CAPTURE);
        mv(G1, F1, Kind::NORMAL);
        mv(G1, H1, Kind::NORMAL);
        drop(mv);

        let actual: BTreeSet<Move> = moves(&state).into_iter().collect();
        let missing: Vec<&Move> = expected.difference(&actual).collect();
        let excess: Vec<&Move> = actual.difference(&expected).collect();
        assert!(missing.is_empty(), "legal moves not generated: {missing:?}");
        assert!(excess.is_empty(), "illegal moves generated: {excess:?}");
    }
}
