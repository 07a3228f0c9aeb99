//! Shared chess-position core: incremental Zobrist hashing, move make/undo,
//! legality, static exchange evaluation, and the lock-free transposition
//! table that caches search results across it. Search, evaluation, and the
//! UCI front-end are deliberately out of scope — this crate is the
//! substrate they would be built on top of.

pub mod bb_attacks;
pub mod cuckoo;
pub mod error;
pub mod notation;
pub mod perft;
pub mod position;
pub mod see;
pub mod tt;
pub mod types;
pub mod zobrist;
