pub mod agent;
pub mod attacks;
pub mod bitboard;
pub mod movegen;
pub mod notation;
pub mod state;
pub mod tree;
mod zobrist;

pub use agent::{Decision, MctsAgent, PersistError};
pub use bitboard::Bitboard;
pub use movegen::{moves, random_move, Kind, Move};
pub use notation::ParseError;
pub use state::{FenError, Piece, Side, State, Undo};
pub use tree::Tree;
