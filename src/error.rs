//! The one fallible boundary in the core: parsing text (FEN / Kaufman-style
//! material codes) into a `Position`. Everything downstream of a successfully
//! parsed position is a total function over validated state.

use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum FenError {
    #[error("FEN missing piece placement field")]
    MissingPlacement,
    #[error("FEN missing side-to-move field")]
    MissingSide,
    #[error("FEN missing castling-rights field")]
    MissingCastling,
    #[error("FEN missing en-passant field")]
    MissingEnPassant,
    #[error("bad character {0:?} in piece placement")]
    BadPlacementChar(char),
    #[error("piece placement ran off the edge of the board")]
    PlacementOutOfBounds,
    #[error("bad side-to-move token {0:?}, expected \"w\" or \"b\"")]
    BadSide(String),
    #[error("bad castling-rights character {0:?}")]
    BadCastlingChar(char),
    #[error("bad en-passant square {0:?}")]
    BadEnPassantSquare(String),
    #[error("unknown material code {0:?}")]
    BadMaterialCode(String),
}
