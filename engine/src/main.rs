//! forksrv engine
//!
//! Starts the fork server on the driver's descriptors, then runs a small
//! target workload in every forked child. Without a driver the workload
//! runs once in this process.
//!
//! Usage:
//!   forksrv-engine --pc 0x1000 --pc 0x2000 --report-misses
//!
//! The driver installs its control pipe on `FORKSRV_FD` (198 by default) and
//! the status pipe one above it before starting the engine.

mod target;
mod translator;

use std::os::fd::RawFd;
use std::sync::Arc;

use clap::Parser;
use forksrv::cache::{DEFAULT_HINT_SLOTS, DEFAULT_MAPPED_LIMIT, MAX_HINT_SLOTS};
use forksrv::server::FORKSRV_FD;
use forksrv::{CacheConfig, ForkServer, ForkServerConfig, TranslationCacheStore};

use crate::target::Workload;
use crate::translator::FlatTranslator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fork server engine with a shared translation cache")]
struct Args {
    /// Control descriptor; status is the next one up, requests the one below
    #[arg(long, env = "FORKSRV_FD", default_value_t = FORKSRV_FD)]
    forksrv_fd: RawFd,

    /// Code address the target executes (repeatable)
    #[arg(long = "pc", value_parser = parse_addr)]
    pcs: Vec<u64>,

    /// Global node the target records (repeatable)
    #[arg(long = "node", value_parser = parse_addr)]
    nodes: Vec<u64>,

    /// Code segment base for every translated address
    #[arg(long, value_parser = parse_addr, default_value = "0")]
    cs_base: u64,

    /// Translation flags for every translated address
    #[arg(long, value_parser = parse_addr, default_value = "0")]
    flags: u64,

    /// Requests at or above this address are ignored by the engine
    #[arg(long, value_parser = parse_addr, default_value_t = DEFAULT_MAPPED_LIMIT)]
    mapped_limit: u64,

    /// Number of direct-mapped hint slots (rounded up to a power of two)
    #[arg(long, value_parser = parse_hint_slots, default_value_t = DEFAULT_HINT_SLOTS)]
    hint_slots: usize,

    /// Exit with the number of locally translated addresses
    #[arg(long)]
    report_misses: bool,

    /// Print cache counters as JSON on stderr when the target finishes
    #[arg(long)]
    stats: bool,
}

/// Accepts `0x`-prefixed hex or plain decimal.
fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn parse_hint_slots(s: &str) -> Result<usize, String> {
    let slots: usize = s
        .parse()
        .map_err(|e| format!("invalid slot count '{}': {}", s, e))?;
    if !(1..=MAX_HINT_SLOTS).contains(&slots) {
        return Err(format!("slot count must be between 1 and {}", MAX_HINT_SLOTS));
    }
    Ok(slots)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let store = Arc::new(TranslationCacheStore::new(CacheConfig {
        hint_slots: args.hint_slots,
        mapped_limit: args.mapped_limit,
    }));
    let translator = Arc::new(FlatTranslator::new(args.mapped_limit));

    let server = ForkServer::attach(
        ForkServerConfig::with_control_fd(args.forksrv_fd),
        store,
        translator.clone(),
    );
    let session = server.run_or_exit();

    let workload = Workload {
        pcs: args.pcs,
        nodes: args.nodes,
        cs_base: args.cs_base,
        flags: args.flags,
        report_misses: args.report_misses,
        print_stats: args.stats,
    };
    let summary = workload.run(&session);
    log::debug!("[Target] {} units translated in this process", translator.calls());

    std::process::exit(summary.exit_code(workload.report_misses));
}
