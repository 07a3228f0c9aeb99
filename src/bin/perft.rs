//! Demo CLI exercising move generation, do/undo, and Zobrist keys via
//! `perft`/`divide`. Search, evaluation, and UCI are out of scope for this
//! crate, so that's all this binary does.

use clap::{Parser, Subcommand};
use tablebore::notation::format_uci;
use tablebore::position::Position;
use tablebore::tt::TranspositionTable;
use tablebore::types::START_FEN;

#[derive(Parser)]
#[command(name = "perft", version, about = "Move-generation correctness CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Count leaf positions reachable in `depth` plies.
    Perft {
        depth: u32,
        #[arg(long)]
        fen: Option<String>,
        #[arg(long)]
        chess960: bool,
        /// Transposition table size in MB; omit to run without a table.
        #[arg(long)]
        mb: Option<usize>,
        /// Threads used for TT resize/clear, defaults to the number of cores.
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Like `perft`, but print the node count contributed by each root move.
    Divide {
        depth: u32,
        #[arg(long)]
        fen: Option<String>,
        #[arg(long)]
        chess960: bool,
        #[arg(long)]
        mb: Option<usize>,
        #[arg(long)]
        threads: Option<usize>,
    },
}

fn main() {
    env_logger::init();
    Position::init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Perft {
            depth,
            fen,
            chess960,
            mb,
            threads,
        } => {
            let mut pos = load_position(fen, chess960);
            let table = mb.map(|mb| build_tt(mb, threads));
            let n = tablebore::perft::perft(&mut pos, depth, table.as_ref());
            println!("perft({depth}) = {n}");
        }
        Cmd::Divide {
            depth,
            fen,
            chess960,
            mb,
            threads,
        } => {
            let mut pos = load_position(fen, chess960);
            let table = mb.map(|mb| build_tt(mb, threads));
            let (per_move, total) = tablebore::perft::divide(&mut pos, depth, table.as_ref());
            for (m, n) in per_move {
                println!("{}: {}", format_uci(&pos, m), n);
            }
            println!("Total: {total}");
        }
    }
}

fn build_tt(mb: usize, threads: Option<usize>) -> TranspositionTable {
    let threads = threads.unwrap_or_else(|| num_cpus::get().max(1));
    let mut table = TranspositionTable::new();
    table.resize(mb, threads);
    table
}

fn load_position(fen: Option<String>, chess960: bool) -> Position {
    let fen_str = fen.unwrap_or_else(|| START_FEN.to_string());
    Position::set(&fen_str, chess960).unwrap_or_else(|e| {
        log::warn!("FEN parse error: {e}");
        eprintln!("FEN parse error: {e}");
        std::process::exit(1);
    })
}
