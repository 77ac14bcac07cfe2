//! The program a round runs once the fork server hands control back.
//!
//! It walks a fixed list of code addresses through the session, exactly
//! like a guest would hit blocks while executing, and reports how many of
//! them had to be translated locally.

use forksrv::{LookupOrigin, TargetSession, TranslationKey};

/// Exit codes above this are clamped so they survive `WEXITSTATUS`.
const MAX_EXIT_CODE: u64 = 255;

#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub pcs: Vec<u64>,
    pub nodes: Vec<u64>,
    pub cs_base: u64,
    pub flags: u64,
    /// Exit with the number of local translations instead of 0
    pub report_misses: bool,
    /// Dump cache counters as JSON on stderr before exiting
    pub print_stats: bool,
}

/// Result of one pass over the workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

impl RunSummary {
    pub fn exit_code(&self, report_misses: bool) -> i32 {
        if !report_misses {
            return 0;
        }
        (self.misses + self.failures).min(MAX_EXIT_CODE) as i32
    }
}

impl Workload {
    pub fn run(&self, session: &TargetSession) -> RunSummary {
        let mut summary = RunSummary::default();

        for &pc in &self.pcs {
            let key = TranslationKey::new(pc, self.cs_base, self.flags);
            match session.translate(key) {
                Ok(lookup) if lookup.origin == LookupOrigin::Generated => summary.misses += 1,
                Ok(_) => summary.hits += 1,
                Err(e) => {
                    log::warn!("[Target] {}", e);
                    summary.failures += 1;
                }
            }
        }

        for &pc in &self.nodes {
            session.record_node(pc);
        }

        log::info!(
            "[Target] {} ({}): {} hits, {} misses, {} failures",
            session.role(),
            std::process::id(),
            summary.hits,
            summary.misses,
            summary.failures
        );

        if self.print_stats {
            match serde_json::to_string(&session.store().stats()) {
                Ok(json) => eprintln!("{}", json),
                Err(e) => log::error!("[Target] failed to encode stats: {}", e),
            }
        }

        summary
    }
}
