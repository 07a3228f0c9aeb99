//! UCI-style move notation: parsing `"e2e4"`/`"e7e8q"` strings against the
//! legal moves of a position, and formatting packed `Move`s back to that
//! form. Pure string <-> `Move` plumbing; no search or evaluation here.

use crate::position::Position;
use crate::types::{sq_to_str, Move, PieceType};

/// Parses a UCI move string against `pos`'s legal moves (the move's kind —
/// normal, promotion, en passant, castling — is recovered by matching from
/// the legal move list rather than guessed from the string alone).
pub fn parse_uci_move(pos: &Position, s: &str) -> Option<Move> {
    let bytes = s.as_bytes();
    if bytes.len() < 4 {
        return None;
    }

    let f_file = (bytes[0] as char).to_ascii_lowercase() as u8;
    if !(b'a'..=b'h').contains(&f_file) {
        return None;
    }
    let f_file = f_file - b'a';
    let f_rank = bytes[1].checked_sub(b'1')?;
    let t_file = (bytes[2] as char).to_ascii_lowercase() as u8;
    if !(b'a'..=b'h').contains(&t_file) {
        return None;
    }
    let t_file = t_file - b'a';
    let t_rank = bytes[3].checked_sub(b'1')?;
    if f_file > 7 || f_rank > 7 || t_file > 7 || t_rank > 7 {
        return None;
    }

    let from = f_rank * 8 + f_file;
    let to = t_rank * 8 + t_file;

    let promo = if bytes.len() >= 5 {
        match (bytes[4] as char).to_ascii_lowercase() {
            'q' => Some(PieceType::Queen),
            'r' => Some(PieceType::Rook),
            'b' => Some(PieceType::Bishop),
            'n' => Some(PieceType::Knight),
            _ => None,
        }
    } else {
        None
    };

    pos.generate_legal().into_iter().find(|m| {
        m.from() == from && m.to() == to && m.promotion_type() == promo
    })
}

/// Formats a move in plain UCI notation (`e2e4`, `e7e8q`). Castling is
/// rendered as the king's destination square, not the "captures own rook"
/// encoding used internally.
pub fn format_uci(pos: &Position, m: Move) -> String {
    use crate::types::MoveKind;

    if m.kind() == MoveKind::Castling {
        let king_from = m.from();
        let rook_from = m.to();
        let rank = king_from / 8;
        let king_to = if rook_from > king_from { 6 } else { 2 } + rank * 8;
        return format!("{}{}", sq_to_str(king_from), sq_to_str(king_to));
    }
    let _ = pos;

    let mut s = format!("{}{}", sq_to_str(m.from()), sq_to_str(m.to()));
    if let Some(pt) = m.promotion_type() {
        s.push(pt.to_char_upper().to_ascii_lowercase());
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::START_FEN;

    #[test]
    fn parses_simple_pawn_push() {
        Position::init();
        let pos = Position::set(START_FEN, false).unwrap();
        let m = parse_uci_move(&pos, "e2e4").expect("e2e4 should be legal");
        assert_eq!(format_uci(&pos, m), "e2e4");
    }

    #[test]
    fn rejects_illegal_move_string() {
        Position::init();
        let pos = Position::set(START_FEN, false).unwrap();
        assert!(parse_uci_move(&pos, "e2e5").is_none());
    }

    #[test]
    fn parses_promotion_suffix() {
        Position::init();
        let pos = Position::set("8/P6k/8/8/8/8/7K/8 w - - 0 1", false).unwrap();
        let m = parse_uci_move(&pos, "a7a8q").expect("promotion should be legal");
        assert_eq!(format_uci(&pos, m), "a7a8q");
    }
}
