//! Board state, incremental Zobrist hashing, move make/undo, legality, and
//! repetition detection. This is the module the search (out of scope) drives
//! every node: `set` a FEN once, then `do_move`/`undo_move` down the tree.

use crate::bb_attacks;
use crate::cuckoo;
use crate::error::FenError;
use crate::tt::TranspositionTable;
use crate::types::*;
use crate::zobrist;

/// Immutable per-ply snapshot. `Position` keeps these in a `Vec` used as a
/// stack instead of the caller-owned linked chain the design notes describe;
/// `previous` is simply "one slot down" in that stack.
#[derive(Clone, Debug)]
pub struct StateInfo {
    pub key: Key,
    pub pawn_key: Key,
    pub material_key: Key,
    pub minor_piece_key: Key,
    pub non_pawn_key: [Key; 2],
    pub non_pawn_material: [i32; 2],
    pub castling_rights: u8,
    pub ep_square: Square,
    pub rule50: i32,
    pub plies_from_null: i32,
    pub checkers_bb: Bitboard,
    pub blockers_for_king: [Bitboard; 2],
    pub pinners: [Bitboard; 2],
    pub check_squares: [Bitboard; 6],
    pub captured_piece: Piece,
    pub repetition: i32,
}

impl StateInfo {
    fn blank() -> Self {
        StateInfo {
            key: 0,
            pawn_key: 0,
            material_key: 0,
            minor_piece_key: 0,
            non_pawn_key: [0; 2],
            non_pawn_material: [0; 2],
            castling_rights: 0,
            ep_square: NO_SQUARE,
            rule50: 0,
            plies_from_null: 0,
            checkers_bb: 0,
            blockers_for_king: [0; 2],
            pinners: [0; 2],
            check_squares: [0; 6],
            captured_piece: Piece::NoPiece,
            repetition: 0,
        }
    }
}

/// One of the four castling rights, indexed the same way as `WK_CASTLE` etc:
/// 0 = white kingside, 1 = white queenside, 2 = black kingside, 3 = black queenside.
const RIGHT_COUNT: usize = 4;

#[derive(Clone)]
pub struct Position {
    board: [Piece; 64],
    by_type_bb: [Bitboard; 6],
    by_color_bb: [Bitboard; 2],
    piece_count: [[u8; 6]; 2],
    side_to_move: Color,
    game_ply: u32,
    chess960: bool,
    castling_rights_mask: [u8; 64],
    castling_king_from: [Square; 2],
    castling_rook_from: [Square; RIGHT_COUNT],
    states: Vec<StateInfo>,
}

#[inline(always)]
fn between_bb(a: Square, b: Square) -> Bitboard {
    if a == b {
        return 0;
    }
    let (ar, af) = (rank_of(a) as i32, file_of(a) as i32);
    let (br, bf) = (rank_of(b) as i32, file_of(b) as i32);
    let dr = (br - ar).signum();
    let df = (bf - af).signum();
    if !(br == ar || bf == af || (br - ar).abs() == (bf - af).abs()) {
        return 0;
    }
    let mut bb = 0u64;
    let (mut r, mut f) = (ar + dr, af + df);
    while (r, f) != (br, bf) {
        bb |= 1u64 << make_square(f as u8, r as u8);
        r += dr;
        f += df;
    }
    bb
}

#[inline(always)]
fn aligned(a: Square, b: Square, c: Square) -> bool {
    let (ar, af) = (rank_of(a) as i32, file_of(a) as i32);
    let (br, bf) = (rank_of(b) as i32, file_of(b) as i32);
    let (cr, cf) = (rank_of(c) as i32, file_of(c) as i32);
    (br - ar) * (cf - af) == (bf - af) * (cr - ar)
}

impl Position {
    /// Installs Zobrist constants, cuckoo tables, and bitboard attack tables.
    /// Idempotent; safe to call from every thread at startup.
    pub fn init() {
        zobrist::init();
    }

    fn blank() -> Self {
        Position {
            board: [Piece::NoPiece; 64],
            by_type_bb: [0; 6],
            by_color_bb: [0; 2],
            piece_count: [[0; 6]; 2],
            side_to_move: Color::White,
            game_ply: 0,
            chess960: false,
            castling_rights_mask: [0; 64],
            castling_king_from: [NO_SQUARE; 2],
            castling_rook_from: [NO_SQUARE; RIGHT_COUNT],
            states: Vec::with_capacity(64),
        }
    }

    #[inline(always)]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }
    #[inline(always)]
    pub fn game_ply(&self) -> u32 {
        self.game_ply
    }
    #[inline(always)]
    pub fn chess960(&self) -> bool {
        self.chess960
    }
    #[inline(always)]
    pub fn piece_on(&self, sq: Square) -> Piece {
        self.board[sq as usize]
    }
    #[inline(always)]
    pub fn occupied(&self) -> Bitboard {
        self.by_color_bb[0] | self.by_color_bb[1]
    }
    #[inline(always)]
    pub fn pieces_of(&self, color: Color, pt: PieceType) -> Bitboard {
        self.by_type_bb[pt.index()] & self.by_color_bb[color.index()]
    }
    #[inline(always)]
    pub fn pieces_by_type(&self, pt: PieceType) -> Bitboard {
        self.by_type_bb[pt.index()]
    }
    #[inline(always)]
    pub fn pieces_by_color(&self, color: Color) -> Bitboard {
        self.by_color_bb[color.index()]
    }
    #[inline(always)]
    pub fn king_square(&self, color: Color) -> Square {
        (self.pieces_of(color, PieceType::King)).trailing_zeros() as Square
    }
    #[inline(always)]
    pub fn checkers(&self) -> Bitboard {
        self.states.last().unwrap().checkers_bb
    }
    #[inline(always)]
    pub fn blockers_for_king(&self, color: Color) -> Bitboard {
        self.state().blockers_for_king[color.index()]
    }
    #[inline(always)]
    pub fn pinners(&self, color: Color) -> Bitboard {
        self.state().pinners[color.index()]
    }
    #[inline(always)]
    pub fn state(&self) -> &StateInfo {
        self.states.last().unwrap()
    }
    #[inline(always)]
    pub fn key(&self) -> Key {
        self.state().key
    }
    #[inline(always)]
    pub fn pawn_key(&self) -> Key {
        self.state().pawn_key
    }
    #[inline(always)]
    pub fn material_key(&self) -> Key {
        self.state().material_key
    }
    #[inline(always)]
    pub fn minor_piece_key(&self) -> Key {
        self.state().minor_piece_key
    }
    #[inline(always)]
    pub fn non_pawn_key(&self, color: Color) -> Key {
        self.state().non_pawn_key[color.index()]
    }
    #[inline(always)]
    pub fn non_pawn_material(&self, color: Color) -> i32 {
        self.state().non_pawn_material[color.index()]
    }

    fn place_piece(&mut self, piece: Piece, sq: Square) {
        let color = piece.color().expect("place_piece: NoPiece");
        let pt = piece.piece_type().expect("place_piece: NoPiece");
        let bit = 1u64 << sq;
        self.board[sq as usize] = piece;
        self.by_type_bb[pt.index()] |= bit;
        self.by_color_bb[color.index()] |= bit;
        self.piece_count[color.index()][pt.index()] += 1;
    }

    fn remove_piece(&mut self, piece: Piece, sq: Square) {
        let color = piece.color().expect("remove_piece: NoPiece");
        let pt = piece.piece_type().expect("remove_piece: NoPiece");
        let bit = !(1u64 << sq);
        self.board[sq as usize] = Piece::NoPiece;
        self.by_type_bb[pt.index()] &= bit;
        self.by_color_bb[color.index()] &= bit;
        self.piece_count[color.index()][pt.index()] -= 1;
    }

    #[inline(always)]
    fn material_toggle(&self, piece: Piece, count_at_boundary: u8) -> Key {
        zobrist::tables().piece_key(piece, (count_at_boundary - 1) as usize)
    }

    pub fn attackers_to(&self, sq: usize, occ: Bitboard) -> Bitboard {
        (bb_attacks::pawn_attacks(Color::White, sq) & self.pieces_of(Color::Black, PieceType::Pawn))
            | (bb_attacks::pawn_attacks(Color::Black, sq)
                & self.pieces_of(Color::White, PieceType::Pawn))
            | (bb_attacks::knight_attacks(sq) & self.by_type_bb[PieceType::Knight.index()])
            | (bb_attacks::king_attacks(sq) & self.by_type_bb[PieceType::King.index()])
            | (bb_attacks::bishop_attacks(sq, occ)
                & (self.by_type_bb[PieceType::Bishop.index()]
                    | self.by_type_bb[PieceType::Queen.index()]))
            | (bb_attacks::rook_attacks(sq, occ)
                & (self.by_type_bb[PieceType::Rook.index()]
                    | self.by_type_bb[PieceType::Queen.index()]))
    }

    fn slider_blockers(&self, sliders: Bitboard, king_sq: usize) -> (Bitboard, Bitboard) {
        let mut blockers = 0u64;
        let mut pinners = 0u64;
        let occ = self.occupied();
        let mut snipers = ((bb_attacks::rook_attacks(king_sq, 0)
            & (self.by_type_bb[PieceType::Rook.index()] | self.by_type_bb[PieceType::Queen.index()]))
            | (bb_attacks::bishop_attacks(king_sq, 0)
                & (self.by_type_bb[PieceType::Bishop.index()]
                    | self.by_type_bb[PieceType::Queen.index()])))
            & sliders;
        let base_occ = occ & !snipers;
        let king_color = self.board[king_sq].color().expect("king_sq must hold a king");

        while snipers != 0 {
            let sniper_sq = snipers.trailing_zeros() as Square;
            snipers &= snipers - 1;
            let between = between_bb(king_sq as Square, sniper_sq) & base_occ;
            if between != 0 && (between & (between - 1)) == 0 {
                blockers |= between;
                if self.board[between.trailing_zeros() as usize].color() == Some(king_color) {
                    pinners |= 1u64 << sniper_sq;
                }
            }
        }
        (blockers, pinners)
    }

    fn compute_blockers_and_pinners(&self) -> ([Bitboard; 2], [Bitboard; 2]) {
        let mut blockers = [0u64; 2];
        let mut pinners = [0u64; 2];
        let (b_w, p_b) = self.slider_blockers(
            self.by_color_bb[Color::Black.index()],
            self.king_square(Color::White) as usize,
        );
        blockers[Color::White.index()] = b_w;
        pinners[Color::Black.index()] = p_b;
        let (b_b, p_w) = self.slider_blockers(
            self.by_color_bb[Color::White.index()],
            self.king_square(Color::Black) as usize,
        );
        blockers[Color::Black.index()] = b_b;
        pinners[Color::White.index()] = p_w;
        (blockers, pinners)
    }

    /// Squares from which an `us`-colored piece of each type would give check
    /// to `us.other()`'s king, on the current occupancy.
    fn compute_check_squares(&self, us: Color) -> [Bitboard; 6] {
        let them = us.other();
        let king_sq = self.king_square(them) as usize;
        let occ = self.occupied();
        let mut cs = [0u64; 6];
        cs[PieceType::Pawn.index()] = bb_attacks::pawn_attacks(them, king_sq);
        cs[PieceType::Knight.index()] = bb_attacks::knight_attacks(king_sq);
        cs[PieceType::Bishop.index()] = bb_attacks::bishop_attacks(king_sq, occ);
        cs[PieceType::Rook.index()] = bb_attacks::rook_attacks(king_sq, occ);
        cs[PieceType::Queen.index()] = cs[PieceType::Bishop.index()] | cs[PieceType::Rook.index()];
        cs[PieceType::King.index()] = 0;
        cs
    }

    fn right_index(right: u8) -> usize {
        right.trailing_zeros() as usize
    }

    fn castling_destination_squares(&self, king_from: Square, rook_from: Square) -> (Square, Square) {
        let rank = rank_of(king_from);
        if rook_from > king_from {
            (make_square(6, rank), make_square(5, rank))
        } else {
            (make_square(2, rank), make_square(3, rank))
        }
    }

    // ---------------------------------------------------------------
    // FEN parsing / emission
    // ---------------------------------------------------------------

    pub fn set(fen: &str, chess960: bool) -> Result<Position, FenError> {
        let mut pos = Position::blank();
        pos.chess960 = chess960;

        let mut parts = fen.split_whitespace();
        let placement = parts.next().ok_or(FenError::MissingPlacement)?;
        let side = parts.next().ok_or(FenError::MissingSide)?;
        let castle = parts.next().ok_or(FenError::MissingCastling)?;
        let ep = parts.next().ok_or(FenError::MissingEnPassant)?;
        let halfmove = parts.next().unwrap_or("0");
        let fullmove = parts.next().unwrap_or("1");

        let mut rank: i32 = 7;
        let mut file: i32 = 0;
        for ch in placement.chars() {
            match ch {
                '/' => {
                    rank -= 1;
                    file = 0;
                }
                '1'..='8' => file += (ch as u8 - b'0') as i32,
                c if c.is_ascii_alphabetic() => {
                    if !(0..8).contains(&file) || !(0..8).contains(&rank) {
                        return Err(FenError::PlacementOutOfBounds);
                    }
                    let piece = Piece::from(c);
                    if piece.is_none() {
                        return Err(FenError::BadPlacementChar(c));
                    }
                    pos.place_piece(piece, make_square(file as u8, rank as u8));
                    file += 1;
                }
                other => return Err(FenError::BadPlacementChar(other)),
            }
        }

        pos.side_to_move = match side {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::BadSide(other.to_string())),
        };

        pos.castling_king_from[Color::White.index()] = pos.king_square(Color::White);
        pos.castling_king_from[Color::Black.index()] = pos.king_square(Color::Black);

        let mut castling_rights = 0u8;
        if castle != "-" {
            for c in castle.chars() {
                let (color, right_bit) = match c {
                    'K' => (Color::White, WK_CASTLE),
                    'Q' => (Color::White, WQ_CASTLE),
                    'k' => (Color::Black, BK_CASTLE),
                    'q' => (Color::Black, BQ_CASTLE),
                    f if f.is_ascii_alphabetic() => {
                        let color = if f.is_ascii_uppercase() {
                            Color::White
                        } else {
                            Color::Black
                        };
                        let king_from = pos.castling_king_from[color.index()];
                        let rook_file = f.to_ascii_uppercase() as u8 - b'A';
                        let right_bit = if rook_file > file_of(king_from) {
                            if color == Color::White { WK_CASTLE } else { BK_CASTLE }
                        } else if color == Color::White {
                            WQ_CASTLE
                        } else {
                            BQ_CASTLE
                        };
                        let rank = rank_of(king_from);
                        let rook_from = make_square(rook_file, rank);
                        let idx = Self::right_index(right_bit);
                        pos.castling_rook_from[idx] = rook_from;
                        (color, right_bit)
                    }
                    other => return Err(FenError::BadCastlingChar(other)),
                };
                castling_rights |= right_bit;
                if pos.castling_rook_from[Self::right_index(right_bit)] == NO_SQUARE {
                    let king_from = pos.castling_king_from[color.index()];
                    let back_rank = rank_of(king_from);
                    let rook_file = if right_bit == WK_CASTLE || right_bit == BK_CASTLE {
                        7
                    } else {
                        0
                    };
                    pos.castling_rook_from[Self::right_index(right_bit)] =
                        make_square(rook_file, back_rank);
                }
            }
        }

        for &right in &[WK_CASTLE, WQ_CASTLE, BK_CASTLE, BQ_CASTLE] {
            if castling_rights & right != 0 {
                let idx = Self::right_index(right);
                let color = if right == WK_CASTLE || right == WQ_CASTLE {
                    Color::White
                } else {
                    Color::Black
                };
                let king_from = pos.castling_king_from[color.index()];
                let rook_from = pos.castling_rook_from[idx];
                pos.castling_rights_mask[king_from as usize] |= right
                    | if color == Color::White {
                        WK_CASTLE | WQ_CASTLE
                    } else {
                        BK_CASTLE | BQ_CASTLE
                    };
                pos.castling_rights_mask[rook_from as usize] |= right;
            }
        }

        let mut ep_square = NO_SQUARE;
        if ep != "-" {
            let bytes = ep.as_bytes();
            if bytes.len() != 2 {
                return Err(FenError::BadEnPassantSquare(ep.to_string()));
            }
            let f = (bytes[0] as char).to_ascii_lowercase();
            let r = bytes[1] as char;
            if !('a'..='h').contains(&f) || !('1'..='8').contains(&r) {
                return Err(FenError::BadEnPassantSquare(ep.to_string()));
            }
            let candidate = make_square(f as u8 - b'a', r as u8 - b'1');
            let them = pos.side_to_move.other();
            let pushed_pawn_sq = if pos.side_to_move == Color::White {
                candidate - 8
            } else {
                candidate + 8
            };
            let behind_sq = if pos.side_to_move == Color::White {
                candidate + 8
            } else {
                candidate - 8
            };
            if pos.board[pushed_pawn_sq as usize] == Piece::make(them, PieceType::Pawn)
                && pos.board[candidate as usize].is_none()
                && pos.board[behind_sq as usize].is_none()
                && (bb_attacks::pawn_attacks(pos.side_to_move, candidate as usize)
                    & pos.pieces_of(pos.side_to_move, PieceType::Pawn))
                    != 0
            {
                ep_square = candidate;
            }
        }

        let rule50: i32 = halfmove.parse().unwrap_or_else(|_| {
            log::warn!("FEN halfmove-clock field {halfmove:?} is not a number, defaulting to 0");
            0
        });
        let fullmove: i32 = fullmove.parse().unwrap_or_else(|_| {
            log::warn!("FEN fullmove-number field {fullmove:?} is not a number, defaulting to 1");
            1
        });
        pos.game_ply = ((fullmove.max(1) - 1) * 2
            + if pos.side_to_move == Color::Black { 1 } else { 0 })
        .max(0) as u32;

        let initial_state = pos.compute_state_from_scratch(ep_square, castling_rights, rule50);
        pos.states.push(initial_state);
        Ok(pos)
    }

    pub fn set_from_material_code(code: &str, stm: Color) -> Result<Position, FenError> {
        let sides: Vec<&str> = code.splitn(2, 'K').skip(1).collect();
        if sides.len() != 1 {
            return Err(FenError::BadMaterialCode(code.to_string()));
        }
        let rest = sides[0];
        let (white_part, black_part) = match rest.find('K') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => return Err(FenError::BadMaterialCode(code.to_string())),
        };

        let mut white_rank = String::from("K");
        white_rank.push_str(white_part);
        let mut black_rank = String::from("K");
        black_rank.push_str(black_part);

        let white_fen_rank: String = white_rank.chars().rev().collect();
        let fen = format!(
            "{}/8/8/8/8/8/8/{} {} - - 0 1",
            black_rank.to_lowercase(),
            white_fen_rank,
            if stm == Color::White { "w" } else { "b" }
        );
        Position::set(&fen, false)
    }

    pub fn fen(&self) -> String {
        let mut s = String::new();
        for r in (0..8).rev() {
            let mut empty = 0u8;
            for f in 0..8 {
                let sq = make_square(f, r);
                let p = self.board[sq as usize];
                if p.is_none() {
                    empty += 1;
                } else {
                    if empty > 0 {
                        s.push(char::from(b'0' + empty));
                        empty = 0;
                    }
                    s.push_str(&format!("{p}"));
                }
            }
            if empty > 0 {
                s.push(char::from(b'0' + empty));
            }
            if r != 0 {
                s.push('/');
            }
        }
        s.push(' ');
        s.push(if self.side_to_move == Color::White { 'w' } else { 'b' });
        s.push(' ');

        let rights = self.state().castling_rights;
        if rights == 0 {
            s.push('-');
        } else {
            if !self.chess960 {
                if rights & WK_CASTLE != 0 {
                    s.push('K');
                }
                if rights & WQ_CASTLE != 0 {
                    s.push('Q');
                }
                if rights & BK_CASTLE != 0 {
                    s.push('k');
                }
                if rights & BQ_CASTLE != 0 {
                    s.push('q');
                }
            } else {
                for &right in &[WK_CASTLE, WQ_CASTLE, BK_CASTLE, BQ_CASTLE] {
                    if rights & right != 0 {
                        let rook_from = self.castling_rook_from[Self::right_index(right)];
                        let c = (b'A' + file_of(rook_from)) as char;
                        s.push(if right == WK_CASTLE || right == WQ_CASTLE {
                            c
                        } else {
                            c.to_ascii_lowercase()
                        });
                    }
                }
            }
        }

        s.push(' ');
        let ep = self.state().ep_square;
        if ep == NO_SQUARE {
            s.push('-');
        } else {
            s.push_str(&sq_to_str(ep));
        }

        s.push(' ');
        s.push_str(&self.state().rule50.to_string());
        s.push(' ');
        s.push_str(&(self.game_ply / 2 + 1).to_string());
        s
    }

    fn compute_state_from_scratch(
        &mut self,
        ep_square: Square,
        castling_rights: u8,
        rule50: i32,
    ) -> StateInfo {
        let z = zobrist::tables();
        let mut key = 0u64;
        let mut pawn_key = 0u64;
        let mut material_key = 0u64;
        let mut minor_piece_key = 0u64;
        let mut non_pawn_key = [0u64; 2];
        let mut non_pawn_material = [0i32; 2];

        for sq in 0u8..64 {
            let p = self.board[sq as usize];
            if p.is_none() {
                continue;
            }
            let color = p.color().unwrap();
            let pt = p.piece_type().unwrap();
            key ^= z.piece_key(p, sq as usize);
            match pt {
                PieceType::Pawn => pawn_key ^= z.piece_key(p, sq as usize),
                PieceType::King => non_pawn_key[color.index()] ^= z.piece_key(p, sq as usize),
                _ => {
                    non_pawn_key[color.index()] ^= z.piece_key(p, sq as usize);
                    non_pawn_material[color.index()] += PIECE_VALUE[pt.index()];
                    if pt == PieceType::Bishop || pt == PieceType::Knight {
                        minor_piece_key ^= z.piece_key(p, sq as usize);
                    }
                }
            }
        }

        if self.piece_count[0][PieceType::Pawn.index()] == 0
            && self.piece_count[1][PieceType::Pawn.index()] == 0
        {
            pawn_key ^= z.no_pawns;
        }

        for &color in &[Color::White, Color::Black] {
            for &pt in &PIECE_TYPES {
                let count = self.piece_count[color.index()][pt.index()];
                for i in 0..count {
                    material_key ^= self.material_toggle(Piece::make(color, pt), i + 1);
                }
            }
        }

        key ^= z.castling[castling_rights as usize];
        if ep_square != NO_SQUARE {
            key ^= z.enpassant[file_of(ep_square) as usize];
        }
        if self.side_to_move == Color::Black {
            key ^= z.side;
        }

        let (blockers, pinners) = self.compute_blockers_and_pinners();
        let check_squares = self.compute_check_squares(self.side_to_move);
        let checkers_bb = self.attackers_to(
            self.king_square(self.side_to_move) as usize,
            self.occupied(),
        ) & self.by_color_bb[self.side_to_move.other().index()];

        StateInfo {
            key,
            pawn_key,
            material_key,
            minor_piece_key,
            non_pawn_key,
            non_pawn_material,
            castling_rights,
            ep_square,
            rule50,
            plies_from_null: rule50,
            checkers_bb,
            blockers_for_king: blockers,
            pinners,
            check_squares,
            captured_piece: Piece::NoPiece,
            repetition: 0,
        }
    }

    // ---------------------------------------------------------------
    // Move generation
    // ---------------------------------------------------------------

    pub fn generate_pseudo_legal(&self) -> Vec<Move> {
        let mut out = Vec::with_capacity(48);
        let us = self.side_to_move;
        let them = us.other();
        let occ = self.occupied();
        let friendly = self.by_color_bb[us.index()];
        let enemy = self.by_color_bb[them.index()];

        // Pawns.
        let mut bb = self.pieces_of(us, PieceType::Pawn);
        let (push_dir, start_rank, promo_rank): (i32, u8, u8) = if us == Color::White {
            (8, 1, 6)
        } else {
            (-8, 6, 1)
        };
        while bb != 0 {
            let from = bb.trailing_zeros() as Square;
            bb &= bb - 1;
            let r = rank_of(from);
            let push1 = (from as i32 + push_dir) as Square;
            if occ & (1u64 << push1) == 0 {
                if r == promo_rank {
                    for &pk in &[
                        PieceType::Queen,
                        PieceType::Rook,
                        PieceType::Bishop,
                        PieceType::Knight,
                    ] {
                        out.push(Move::promotion(from, push1, pk));
                    }
                } else {
                    out.push(Move::normal(from, push1));
                    if r == start_rank {
                        let push2 = (from as i32 + 2 * push_dir) as Square;
                        if occ & (1u64 << push2) == 0 {
                            out.push(Move::normal(from, push2));
                        }
                    }
                }
            }
            let mut cap_targets = bb_attacks::pawn_attacks(us, from as usize) & enemy;
            while cap_targets != 0 {
                let to = cap_targets.trailing_zeros() as Square;
                cap_targets &= cap_targets - 1;
                if r == promo_rank {
                    for &pk in &[
                        PieceType::Queen,
                        PieceType::Rook,
                        PieceType::Bishop,
                        PieceType::Knight,
                    ] {
                        out.push(Move::promotion(from, to, pk));
                    }
                } else {
                    out.push(Move::normal(from, to));
                }
            }
            let ep = self.state().ep_square;
            if ep != NO_SQUARE && (bb_attacks::pawn_attacks(us, from as usize) & (1u64 << ep)) != 0 {
                out.push(Move::en_passant(from, ep));
            }
        }

        // Knights.
        let mut bb = self.pieces_of(us, PieceType::Knight);
        while bb != 0 {
            let from = bb.trailing_zeros() as Square;
            bb &= bb - 1;
            let mut att = bb_attacks::knight_attacks(from as usize) & !friendly;
            while att != 0 {
                let to = att.trailing_zeros() as Square;
                att &= att - 1;
                out.push(Move::normal(from, to));
            }
        }

        // Bishops / Rooks / Queens.
        for &(pt, attack_fn): &(PieceType, fn(usize, Bitboard) -> Bitboard) in &[
            (PieceType::Bishop, bb_attacks::bishop_attacks as fn(usize, Bitboard) -> Bitboard),
            (PieceType::Rook, bb_attacks::rook_attacks as fn(usize, Bitboard) -> Bitboard),
            (PieceType::Queen, bb_attacks::queen_attacks as fn(usize, Bitboard) -> Bitboard),
        ] {
            let mut bb = self.pieces_of(us, pt);
            while bb != 0 {
                let from = bb.trailing_zeros() as Square;
                bb &= bb - 1;
                let mut att = attack_fn(from as usize, occ) & !friendly;
                while att != 0 {
                    let to = att.trailing_zeros() as Square;
                    att &= att - 1;
                    out.push(Move::normal(from, to));
                }
            }
        }

        // King.
        let king_sq = self.king_square(us);
        let mut att = bb_attacks::king_attacks(king_sq as usize) & !friendly;
        while att != 0 {
            let to = att.trailing_zeros() as Square;
            att &= att - 1;
            out.push(Move::normal(king_sq, to));
        }

        let rights = self.state().castling_rights;
        for &right in &[WK_CASTLE, WQ_CASTLE, BK_CASTLE, BQ_CASTLE] {
            let owner = if right == WK_CASTLE || right == WQ_CASTLE {
                Color::White
            } else {
                Color::Black
            };
            if owner != us || rights & right == 0 {
                continue;
            }
            let idx = Self::right_index(right);
            let rook_from = self.castling_rook_from[idx];
            if rook_from == NO_SQUARE || self.board[rook_from as usize].piece_type() != Some(PieceType::Rook)
            {
                continue;
            }
            let (king_to, rook_to) = self.castling_destination_squares(king_sq, rook_from);
            let path = (between_bb(king_sq, king_to) | (1u64 << king_to))
                | (between_bb(rook_from, rook_to) | (1u64 << rook_to));
            let must_be_clear = path & !((1u64 << king_sq) | (1u64 << rook_from));
            if must_be_clear & occ == 0 {
                out.push(Move::castling(king_sq, rook_from));
            }
        }

        out
    }

    pub fn generate_legal(&self) -> Vec<Move> {
        self.generate_pseudo_legal()
            .into_iter()
            .filter(|&m| self.pseudo_legal(m) && self.legal(m))
            .collect()
    }

    pub fn pseudo_legal(&self, m: Move) -> bool {
        if m.is_none() {
            return false;
        }
        let us = self.side_to_move;
        let from = m.from();
        let to = m.to();

        if m.kind() == MoveKind::EnPassant {
            if !self.generate_pseudo_legal().contains(&m) {
                return false;
            }
            let checkers = self.checkers();
            if checkers != 0 {
                if (checkers & (checkers - 1)) != 0 {
                    return false;
                }
                let checker_sq = checkers.trailing_zeros() as Square;
                let cap_sq = make_square(file_of(to), rank_of(from));
                let block_mask = between_bb(self.king_square(us), checker_sq) | (1u64 << checker_sq);
                if block_mask & ((1u64 << to) | (1u64 << cap_sq)) == 0 {
                    return false;
                }
            }
            return true;
        }

        if m.kind() != MoveKind::Normal && m.kind() != MoveKind::Promotion {
            return self.generate_pseudo_legal().contains(&m);
        }

        let moving = self.board[from as usize];
        if moving.is_none() || moving.color() != Some(us) {
            return false;
        }
        if self.board[to as usize].color() == Some(us) {
            return false;
        }
        let pt = moving.piece_type().unwrap();
        let occ = self.occupied();

        let targets_ok = match pt {
            PieceType::Pawn => {
                let (push_dir, start_rank): (i32, u8) = if us == Color::White { (8, 1) } else { (-8, 6) };
                let push1 = (from as i32 + push_dir) as Square;
                if to == push1 {
                    occ & (1u64 << to) == 0
                } else if rank_of(from) == start_rank && to as i32 == from as i32 + 2 * push_dir {
                    occ & (1u64 << push1) == 0 && occ & (1u64 << to) == 0
                } else {
                    (bb_attacks::pawn_attacks(us, from as usize) & (1u64 << to)) != 0
                        && (self.board[to as usize].color() == Some(us.other())
                            || self.state().ep_square == to)
                }
            }
            PieceType::Knight => (bb_attacks::knight_attacks(from as usize) & (1u64 << to)) != 0,
            PieceType::Bishop => (bb_attacks::bishop_attacks(from as usize, occ) & (1u64 << to)) != 0,
            PieceType::Rook => (bb_attacks::rook_attacks(from as usize, occ) & (1u64 << to)) != 0,
            PieceType::Queen => (bb_attacks::queen_attacks(from as usize, occ) & (1u64 << to)) != 0,
            PieceType::King => (bb_attacks::king_attacks(from as usize) & (1u64 << to)) != 0,
        };
        if !targets_ok {
            return false;
        }

        let checkers = self.checkers();
        if checkers != 0 && pt != PieceType::King {
            if (checkers & (checkers - 1)) != 0 {
                return false;
            }
            let checker_sq = checkers.trailing_zeros() as Square;
            let block_mask = between_bb(self.king_square(us), checker_sq) | (1u64 << checker_sq);
            if block_mask & (1u64 << to) == 0 {
                return false;
            }
        }
        true
    }

    pub fn legal(&self, m: Move) -> bool {
        let us = self.side_to_move;
        let them = us.other();
        let from = m.from();
        let to = m.to();
        let king_sq = self.king_square(us);

        match m.kind() {
            MoveKind::EnPassant => {
                let cap_sq = make_square(file_of(to), rank_of(from));
                let occ_after = (self.occupied() & !((1u64 << from) | (1u64 << cap_sq))) | (1u64 << to);
                let rook_queens = self.pieces_of(them, PieceType::Rook) | self.pieces_of(them, PieceType::Queen);
                let bishop_queens =
                    self.pieces_of(them, PieceType::Bishop) | self.pieces_of(them, PieceType::Queen);
                (bb_attacks::rook_attacks(king_sq as usize, occ_after) & rook_queens) == 0
                    && (bb_attacks::bishop_attacks(king_sq as usize, occ_after) & bishop_queens) == 0
            }
            MoveKind::Castling => {
                let rook_from = to;
                let (king_to, _) = self.castling_destination_squares(from, rook_from);
                let step: i32 = if king_to as i32 > from as i32 { 1 } else { -1 };
                let mut sq = from as i32;
                loop {
                    if self.attackers_to(sq as usize, self.occupied()) & self.by_color_bb[them.index()] != 0 {
                        return false;
                    }
                    if sq == king_to as i32 {
                        break;
                    }
                    sq += step;
                }
                if self.chess960 {
                    let occ_without_rook = self.occupied() & !(1u64 << rook_from);
                    let rook_queens =
                        self.pieces_of(them, PieceType::Rook) | self.pieces_of(them, PieceType::Queen);
                    if bb_attacks::rook_attacks(from as usize, occ_without_rook) & rook_queens != 0 {
                        return false;
                    }
                }
                true
            }
            _ => {
                if from == king_sq {
                    let occ_without_king = self.occupied() & !(1u64 << king_sq);
                    self.attackers_to(to as usize, occ_without_king) & self.by_color_bb[them.index()] == 0
                } else {
                    let blockers = self.state().blockers_for_king[us.index()];
                    blockers & (1u64 << from) == 0 || aligned(king_sq, from, to)
                }
            }
        }
    }

    pub fn gives_check(&self, m: Move) -> bool {
        let us = self.side_to_move;
        let them = us.other();
        let from = m.from();
        let to = m.to();
        let st = self.state();
        let moving = self.board[from as usize];
        let pt = match moving.piece_type() {
            Some(pt) => pt,
            None => return false,
        };

        match m.kind() {
            MoveKind::Castling => {
                let rook_from = to;
                let (_, rook_to) = self.castling_destination_squares(from, rook_from);
                st.check_squares[PieceType::Rook.index()] & (1u64 << rook_to) != 0
            }
            MoveKind::EnPassant => {
                let cap_sq = make_square(file_of(to), rank_of(from));
                let occ_after =
                    (self.occupied() & !((1u64 << from) | (1u64 << cap_sq))) | (1u64 << to);
                let king_sq = self.king_square(them) as usize;
                let rook_queens = self.pieces_of(us, PieceType::Rook) | self.pieces_of(us, PieceType::Queen);
                let bishop_queens =
                    self.pieces_of(us, PieceType::Bishop) | self.pieces_of(us, PieceType::Queen);
                (bb_attacks::rook_attacks(king_sq, occ_after) & rook_queens) != 0
                    || (bb_attacks::bishop_attacks(king_sq, occ_after) & bishop_queens) != 0
                    || st.check_squares[PieceType::Pawn.index()] & (1u64 << to) != 0
            }
            MoveKind::Promotion => {
                let promo = m.promotion_type().unwrap();
                let occ_after = (self.occupied() & !(1u64 << from)) | (1u64 << to);
                let king_sq = self.king_square(them) as usize;
                match promo {
                    PieceType::Knight => bb_attacks::knight_attacks(to as usize) & (1u64 << king_sq) != 0,
                    PieceType::Bishop => {
                        bb_attacks::bishop_attacks(to as usize, occ_after) & (1u64 << king_sq) != 0
                    }
                    PieceType::Rook => bb_attacks::rook_attacks(to as usize, occ_after) & (1u64 << king_sq) != 0,
                    PieceType::Queen => bb_attacks::queen_attacks(to as usize, occ_after) & (1u64 << king_sq) != 0,
                    _ => false,
                }
            }
            MoveKind::Normal => {
                if st.check_squares[pt.index()] & (1u64 << to) != 0 {
                    return true;
                }
                let blockers = st.blockers_for_king[them.index()];
                blockers & (1u64 << from) != 0 && !aligned(self.king_square(them), from, to)
            }
        }
    }

    // ---------------------------------------------------------------
    // Make / undo
    // ---------------------------------------------------------------

    pub fn do_move(
        &mut self,
        m: Move,
        gives_check: bool,
        tt: Option<&TranspositionTable>,
    ) -> DirtyPiece {
        debug_assert!(self.pseudo_legal(m));
        debug_assert!(self.legal(m));

        let prev = self.states.last().unwrap().clone();
        let us = self.side_to_move;
        let them = us.other();
        let z = zobrist::tables();

        let from = m.from();
        let to = m.to();
        let kind = m.kind();
        let moving_piece = self.board[from as usize];
        let moving_type = moving_piece.piece_type().expect("from square empty in do_move");

        let mut key = prev.key ^ z.side;
        if prev.ep_square != NO_SQUARE {
            key ^= z.enpassant[file_of(prev.ep_square) as usize];
        }
        let mut pawn_key = prev.pawn_key;
        let mut material_key = prev.material_key;
        let mut minor_piece_key = prev.minor_piece_key;
        let mut non_pawn_key = prev.non_pawn_key;
        let mut non_pawn_material = prev.non_pawn_material;
        let mut castling_rights = prev.castling_rights;
        let mut rule50 = prev.rule50 + 1;
        let plies_from_null = prev.plies_from_null + 1;
        let mut captured_piece = Piece::NoPiece;
        let mut ep_square = NO_SQUARE;

        let mut dirty = DirtyPiece {
            piece: moving_piece,
            from,
            to,
            removed_piece: Piece::NoPiece,
            removed_square: NO_SQUARE,
            added_piece: Piece::NoPiece,
            added_square: NO_SQUARE,
        };

        if kind == MoveKind::Castling {
            let rook_from = to;
            let rook_piece = self.board[rook_from as usize];
            let (king_to, rook_to) = self.castling_destination_squares(from, rook_from);

            self.remove_piece(moving_piece, from);
            self.remove_piece(rook_piece, rook_from);
            self.place_piece(moving_piece, king_to);
            self.place_piece(rook_piece, rook_to);

            key ^= z.piece_key(moving_piece, from) ^ z.piece_key(moving_piece, king_to);
            key ^= z.piece_key(rook_piece, rook_from) ^ z.piece_key(rook_piece, rook_to);
            non_pawn_key[us.index()] ^= z.piece_key(moving_piece, from) ^ z.piece_key(moving_piece, king_to);
            non_pawn_key[us.index()] ^= z.piece_key(rook_piece, rook_from) ^ z.piece_key(rook_piece, rook_to);

            dirty.to = king_to;
            dirty.removed_piece = rook_piece;
            dirty.removed_square = rook_from;
            dirty.added_piece = rook_piece;
            dirty.added_square = rook_to;

            castling_rights &= !self.castling_rights_mask[from as usize];
            castling_rights &= !self.castling_rights_mask[rook_from as usize];
        } else {
            if kind == MoveKind::EnPassant {
                let cap_sq = make_square(file_of(to), rank_of(from));
                let captured = self.board[cap_sq as usize];
                captured_piece = captured;
                let count_before = self.piece_count[them.index()][PieceType::Pawn.index()];
                self.remove_piece(captured, cap_sq);
                key ^= z.piece_key(captured, cap_sq);
                pawn_key ^= z.piece_key(captured, cap_sq);
                material_key ^= self.material_toggle(captured, count_before);
                dirty.removed_piece = captured;
                dirty.removed_square = cap_sq;
                rule50 = 0;
            } else {
                let occupant = self.board[to as usize];
                if !occupant.is_none() {
                    captured_piece = occupant;
                    let captured_type = occupant.piece_type().unwrap();
                    let count_before = self.piece_count[them.index()][captured_type.index()];
                    self.remove_piece(occupant, to);
                    key ^= z.piece_key(occupant, to);
                    material_key ^= self.material_toggle(occupant, count_before);
                    if captured_type == PieceType::Pawn {
                        pawn_key ^= z.piece_key(occupant, to);
                    } else {
                        non_pawn_key[them.index()] ^= z.piece_key(occupant, to);
                        non_pawn_material[them.index()] -= PIECE_VALUE[captured_type.index()];
                        if captured_type == PieceType::Bishop || captured_type == PieceType::Knight {
                            minor_piece_key ^= z.piece_key(occupant, to);
                        }
                    }
                    dirty.removed_piece = occupant;
                    dirty.removed_square = to;
                    rule50 = 0;
                    castling_rights &= !self.castling_rights_mask[to as usize];
                }
            }

            self.remove_piece(moving_piece, from);
            key ^= z.piece_key(moving_piece, from);

            if kind == MoveKind::Promotion {
                let promo_type = m.promotion_type().unwrap();
                let promoted = Piece::make(us, promo_type);
                let pawn_count_before = self.piece_count[us.index()][PieceType::Pawn.index()] + 1;
                pawn_key ^= z.piece_key(moving_piece, from);
                material_key ^= self.material_toggle(moving_piece, pawn_count_before);

                self.place_piece(promoted, to);
                let promo_count_after = self.piece_count[us.index()][promo_type.index()];
                material_key ^= self.material_toggle(promoted, promo_count_after);

                key ^= z.piece_key(promoted, to);
                non_pawn_key[us.index()] ^= z.piece_key(promoted, to);
                non_pawn_material[us.index()] += PIECE_VALUE[promo_type.index()];
                if promo_type == PieceType::Bishop || promo_type == PieceType::Knight {
                    minor_piece_key ^= z.piece_key(promoted, to);
                }

                dirty.to = NO_SQUARE;
                dirty.added_piece = promoted;
                dirty.added_square = to;
                rule50 = 0;
            } else {
                self.place_piece(moving_piece, to);
                key ^= z.piece_key(moving_piece, to);
                if moving_type == PieceType::Pawn {
                    pawn_key ^= z.piece_key(moving_piece, from) ^ z.piece_key(moving_piece, to);
                    rule50 = 0;
                    if (to as i32 - from as i32).abs() == 16 {
                        let push_to = ((from as i32 + to as i32) / 2) as Square;
                        if self.ep_is_legal_after_double_push(us, them, to, push_to) {
                            ep_square = push_to;
                            key ^= z.enpassant[file_of(push_to) as usize];
                        }
                    }
                } else {
                    non_pawn_key[us.index()] ^= z.piece_key(moving_piece, from) ^ z.piece_key(moving_piece, to);
                    if moving_type == PieceType::Bishop || moving_type == PieceType::Knight {
                        minor_piece_key ^= z.piece_key(moving_piece, from) ^ z.piece_key(moving_piece, to);
                    }
                }
            }

            castling_rights &= !self.castling_rights_mask[from as usize];
        }

        if castling_rights != prev.castling_rights {
            key ^= z.castling[prev.castling_rights as usize] ^ z.castling[castling_rights as usize];
        }

        self.side_to_move = them;
        self.game_ply += 1;

        let checkers_bb = if gives_check {
            self.attackers_to(self.king_square(them) as usize, self.occupied()) & self.by_color_bb[us.index()]
        } else {
            0
        };
        let check_squares = self.compute_check_squares(them);
        let (blockers_for_king, pinners) = self.compute_blockers_and_pinners();

        let mut new_state = StateInfo {
            key,
            pawn_key,
            material_key,
            minor_piece_key,
            non_pawn_key,
            non_pawn_material,
            castling_rights,
            ep_square,
            rule50,
            plies_from_null,
            checkers_bb,
            blockers_for_king,
            pinners,
            check_squares,
            captured_piece,
            repetition: 0,
        };

        self.states.push(new_state.clone());
        new_state.repetition = self.compute_repetition();
        *self.states.last_mut().unwrap() = new_state;

        if let Some(tt) = tt {
            tt.prefetch(key);
        }

        dirty
    }

    pub fn undo_move(&mut self, m: Move) {
        let popped = self.states.pop().expect("undo_move without matching do_move");
        self.side_to_move = self.side_to_move.other();
        self.game_ply -= 1;
        let us = self.side_to_move;

        let from = m.from();
        let to = m.to();

        match m.kind() {
            MoveKind::Castling => {
                let rook_from = to;
                let (king_to, rook_to) = self.castling_destination_squares(from, rook_from);
                let king_piece = self.board[king_to as usize];
                let rook_piece = self.board[rook_to as usize];
                self.remove_piece(king_piece, king_to);
                self.remove_piece(rook_piece, rook_to);
                self.place_piece(king_piece, from);
                self.place_piece(rook_piece, rook_from);
            }
            MoveKind::Promotion => {
                let promoted = self.board[to as usize];
                self.remove_piece(promoted, to);
                self.place_piece(Piece::make(us, PieceType::Pawn), from);
                if !popped.captured_piece.is_none() {
                    self.place_piece(popped.captured_piece, to);
                }
            }
            MoveKind::EnPassant => {
                let moving = self.board[to as usize];
                self.remove_piece(moving, to);
                self.place_piece(moving, from);
                let cap_sq = make_square(file_of(to), rank_of(from));
                self.place_piece(popped.captured_piece, cap_sq);
            }
            MoveKind::Normal => {
                let moving = self.board[to as usize];
                self.remove_piece(moving, to);
                self.place_piece(moving, from);
                if !popped.captured_piece.is_none() {
                    self.place_piece(popped.captured_piece, to);
                }
            }
        }
    }

    pub fn do_null_move(&mut self, tt: Option<&TranspositionTable>) {
        debug_assert!(self.checkers() == 0);
        let prev = self.states.last().unwrap().clone();
        let z = zobrist::tables();
        let mut key = prev.key ^ z.side;
        if prev.ep_square != NO_SQUARE {
            key ^= z.enpassant[file_of(prev.ep_square) as usize];
        }

        self.side_to_move = self.side_to_move.other();
        self.game_ply += 1;
        let them = self.side_to_move;
        let check_squares = self.compute_check_squares(them);
        let (blockers_for_king, pinners) = self.compute_blockers_and_pinners();

        let new_state = StateInfo {
            key,
            pawn_key: prev.pawn_key,
            material_key: prev.material_key,
            minor_piece_key: prev.minor_piece_key,
            non_pawn_key: prev.non_pawn_key,
            non_pawn_material: prev.non_pawn_material,
            castling_rights: prev.castling_rights,
            ep_square: NO_SQUARE,
            rule50: prev.rule50 + 1,
            plies_from_null: 0,
            checkers_bb: 0,
            blockers_for_king,
            pinners,
            check_squares,
            captured_piece: Piece::NoPiece,
            repetition: 0,
        };
        self.states.push(new_state);
        if let Some(tt) = tt {
            tt.prefetch(key);
        }
    }

    pub fn undo_null_move(&mut self) {
        self.states.pop();
        self.side_to_move = self.side_to_move.other();
        self.game_ply -= 1;
    }

    fn ep_is_legal_after_double_push(
        &self,
        us: Color,
        them: Color,
        pawn_to: Square,
        push_to: Square,
    ) -> bool {
        let mut attackers =
            self.pieces_of(them, PieceType::Pawn) & bb_attacks::pawn_attacks(us, push_to as usize);
        let count = attackers.count_ones();
        debug_assert!(count <= 2);
        if count == 0 {
            return false;
        }
        let king_sq = self.king_square(them);
        if count == 1 {
            let attacker_sq = attackers.trailing_zeros() as Square;
            return !self.ep_exposes_check(us, them, pawn_to, attacker_sq, push_to, king_sq);
        }
        let x1 = {
            let b = attackers.trailing_zeros() as Square;
            attackers &= attackers - 1;
            b
        };
        let x2 = attackers.trailing_zeros() as Square;
        let candidates: Vec<Square> = [x1, x2]
            .into_iter()
            .filter(|&x| file_of(x) != file_of(king_sq))
            .collect();
        if candidates.len() == 1 {
            !self.ep_exposes_check(us, them, pawn_to, candidates[0], push_to, king_sq)
        } else {
            !self.ep_exposes_check(us, them, pawn_to, x1, push_to, king_sq)
                || !self.ep_exposes_check(us, them, pawn_to, x2, push_to, king_sq)
        }
    }

    fn ep_exposes_check(
        &self,
        us: Color,
        _them: Color,
        pawn_to: Square,
        attacker_sq: Square,
        push_to: Square,
        king_sq: Square,
    ) -> bool {
        let occ_after =
            (self.occupied() & !((1u64 << pawn_to) | (1u64 << attacker_sq))) | (1u64 << push_to);
        let rook_queens = self.pieces_of(us, PieceType::Rook) | self.pieces_of(us, PieceType::Queen);
        let bishop_queens = self.pieces_of(us, PieceType::Bishop) | self.pieces_of(us, PieceType::Queen);
        (bb_attacks::rook_attacks(king_sq as usize, occ_after) & rook_queens) != 0
            || (bb_attacks::bishop_attacks(king_sq as usize, occ_after) & bishop_queens) != 0
    }

    fn compute_repetition(&self) -> i32 {
        let st = self.states.last().unwrap();
        let end = st.rule50.min(st.plies_from_null);
        if end < 4 {
            return 0;
        }
        let len = self.states.len() as i32;
        let mut i = 4;
        while i <= end {
            let idx = len - 1 - i;
            if idx < 0 {
                break;
            }
            let candidate = &self.states[idx as usize];
            if candidate.key == st.key {
                return if candidate.repetition != 0 { -i } else { i };
            }
            i += 2;
        }
        0
    }

    // ---------------------------------------------------------------
    // Draw detection
    // ---------------------------------------------------------------

    pub fn is_repetition(&self, ply: i32) -> bool {
        let rep = self.state().repetition;
        rep != 0 && rep < ply
    }

    pub fn is_draw(&self, ply: i32) -> bool {
        let st = self.state();
        if st.rule50 > 99 && (self.checkers() == 0 || !self.generate_legal().is_empty()) {
            return true;
        }
        self.is_repetition(ply)
    }

    fn path_clear_for_cuckoo_move(&self, mv: Move) -> bool {
        between_bb(mv.from(), mv.to()) & self.occupied() == 0
    }

    pub fn upcoming_repetition(&self, ply: i32) -> bool {
        let st = self.state();
        let end = st.rule50.min(st.plies_from_null);
        if end < 3 {
            return false;
        }
        let original_key = st.key;
        let len = self.states.len() as i32;
        let mut i = 3;
        while i <= end {
            let idx = len - 1 - i;
            if idx < 0 {
                break;
            }
            let stp = &self.states[idx as usize];
            let move_key = original_key ^ stp.key;
            if let Some(mv) = cuckoo::lookup(move_key) {
                if self.path_clear_for_cuckoo_move(mv) {
                    // A cycle found strictly within the search tree (beyond the
                    // search root) is always a repetition. One found at or
                    // before the root only counts if it was already a real
                    // two-fold repetition there.
                    if ply > i || stp.repetition != 0 {
                        return true;
                    }
                }
            }
            i += 2;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startpos() -> Position {
        Position::init();
        Position::set(START_FEN, false).unwrap()
    }

    #[test]
    fn startpos_fen_roundtrips() {
        let pos = startpos();
        assert_eq!(pos.fen(), START_FEN);
    }

    #[test]
    fn startpos_has_twenty_legal_moves() {
        let pos = startpos();
        assert_eq!(pos.generate_legal().len(), 20);
    }

    #[test]
    fn do_undo_restores_fen() {
        let mut pos = startpos();
        let m = Move::normal(12, 28); // e2e4
        let before = pos.fen();
        let gives_check = pos.gives_check(m);
        pos.do_move(m, gives_check, None);
        assert_ne!(pos.fen(), before);
        pos.undo_move(m);
        assert_eq!(pos.fen(), before);
    }

    #[test]
    fn incremental_key_matches_scratch_after_moves() {
        let mut pos = startpos();
        let moves = [Move::normal(12, 28), Move::normal(50, 34), Move::normal(6, 21)];
        for m in moves {
            let gc = pos.gives_check(m);
            pos.do_move(m, gc, None);
        }
        let from_scratch = Position::set(&pos.fen(), false).unwrap();
        assert_eq!(pos.key(), from_scratch.key());
    }

    #[test]
    fn double_push_sets_ep_only_when_a_capture_is_pending() {
        let mut pos = startpos();
        // No black pawn adjacent to d4, so the ep square must not be recorded.
        let push = Move::normal(11, 27); // d2d4
        let gc = pos.gives_check(push);
        pos.do_move(push, gc, None);
        assert_eq!(pos.state().ep_square, NO_SQUARE);
    }

    #[test]
    fn double_push_records_ep_square_when_capturable() {
        let mut pos =
            Position::set("rnbqkbnr/ppp1pppp/8/8/3p4/8/PPPPPPPP/RNBQKBNR w KQkq - 0 3", false)
                .unwrap();
        let m = Move::normal(12, 28); // e2e4, adjacent to the black pawn on d4
        let gc = pos.gives_check(m);
        pos.do_move(m, gc, None);
        assert_eq!(pos.state().ep_square, make_square(4, 2)); // e3
    }

    #[test]
    fn en_passant_capture_updates_board() {
        Position::init();
        let mut pos = Position::set(
            "rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3",
            false,
        )
        .unwrap();
        let ep_capture = Move::en_passant(36, 43); // e5xd6
        assert!(pos.pseudo_legal(ep_capture));
        assert!(pos.legal(ep_capture));
        let gc = pos.gives_check(ep_capture);
        pos.do_move(ep_capture, gc, None);
        assert_eq!(pos.piece_on(35), Piece::NoPiece); // d5 pawn removed
        assert_eq!(pos.piece_on(43), Piece::WP);
    }

    #[test]
    fn generate_legal_excludes_moves_that_ignore_check() {
        Position::init();
        // White king on e1 in check from a rook on e8; a knight on b1 has
        // no move that blocks the file or captures the rook.
        let pos = Position::set("k3r3/8/8/8/8/8/8/1N2K3 w - - 0 1", false).unwrap();
        assert_ne!(pos.checkers(), 0);
        let moves = pos.generate_legal();
        assert_eq!(moves.len(), 4); // Kd1, Kd2, Kf1, Kf2
        assert!(moves.iter().all(|m| m.from() != 1)); // no move starting from b1
    }

    #[test]
    fn fen_rejects_ep_square_when_square_behind_it_is_occupied() {
        Position::init();
        // Same shape as `en_passant_capture_updates_board`, but d7 is (illegally)
        // still occupied, so the claimed double push to d5 could not have
        // happened and the ep square must be dropped.
        let pos = Position::set(
            "rnbqkbnr/pppppppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3",
            false,
        )
        .unwrap();
        assert_eq!(pos.state().ep_square, NO_SQUARE);
    }
}
