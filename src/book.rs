//! Breadth-first opening-book construction.
//!
//! The builder walks the opening tree from the empty (or handicap) start,
//! analyzing every node through the orchestrator so each result lands in
//! the cache immediately. Branching follows the engine's top candidates,
//! pruned by winrate; transpositions collapse on the canonical fingerprint,
//! which also folds symmetric siblings into one node.
//!
//! A completion row is recorded only when the frontier drains completely.
//! Cancellation is cooperative: the flag is checked between nodes, so the
//! in-flight node's cache write always finishes.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use crate::analysis::{AnalysisError, AnalysisRequest, Analyzer};
use crate::board::Color;
use crate::cache::BookRunRecord;

/// Parameters of one book run. The defaults mirror the standard small-board
/// run: 9x9, komi 7.5, depth 10, three branches, 10-point pruning.
#[derive(Clone, Debug)]
pub struct BookParams {
    pub board_size: u8,
    pub komi: f64,
    pub handicap: u8,
    pub visits: u32,
    pub max_depth: u32,
    /// Children per node, before pruning.
    pub branch_limit: usize,
    /// A candidate trailing the best winrate by more than this is dropped.
    pub prune_margin: f64,
}

impl Default for BookParams {
    fn default() -> Self {
        BookParams {
            board_size: 9,
            komi: 7.5,
            handicap: 0,
            visits: 500,
            max_depth: 10,
            branch_limit: 3,
            prune_margin: 0.10,
        }
    }
}

/// Counters from one build. `analyzed` includes nodes that turned out to be
/// transpositions; `analyzed - transpositions` is the number of distinct
/// positions in the book.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BookStats {
    pub analyzed: u64,
    pub transpositions: u64,
    pub enqueued: u64,
    pub completed: bool,
}

pub struct BookBuilder<'a> {
    analyzer: &'a Analyzer<'a>,
    params: BookParams,
}

impl<'a> BookBuilder<'a> {
    pub fn new(analyzer: &'a Analyzer<'a>, params: BookParams) -> Self {
        BookBuilder { analyzer, params }
    }

    /// Run the build. Returns early (cleanly, without a completion record)
    /// when `cancel` is raised.
    pub fn build(&self, cancel: &AtomicBool) -> Result<BookStats, AnalysisError> {
        let p = &self.params;
        info!(
            "building opening book: {0}x{0}, komi {1}, handicap {2}, {3} visits, depth {4}",
            p.board_size, p.komi, p.handicap, p.visits, p.max_depth
        );

        let first_color = if p.handicap >= 2 { Color::White } else { Color::Black };
        let mut stats = BookStats::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Vec<String>, u32)> = VecDeque::new();
        queue.push_back((Vec::new(), 0));
        stats.enqueued += 1;

        while let Some((moves, depth)) = queue.pop_front() {
            if cancel.load(Ordering::Relaxed) {
                info!(
                    "book build cancelled: {} analyzed, {} still queued",
                    stats.analyzed,
                    queue.len() + 1
                );
                return Ok(stats);
            }

            let report = self.analyzer.analyze(&AnalysisRequest {
                board_size: p.board_size,
                moves: moves.clone(),
                handicap: p.handicap,
                komi: Some(p.komi),
                visits: Some(p.visits),
                force_refresh: false,
            })?;
            stats.analyzed += 1;
            if stats.analyzed % 50 == 0 {
                info!(
                    "book progress: {} analyzed, {} queued, depth {depth}",
                    stats.analyzed,
                    queue.len()
                );
            }

            // Different move orders (and symmetric lines) reach the same
            // canonical fingerprint; expand each position once per run.
            if !visited.insert(report.board_hash.clone()) {
                stats.transpositions += 1;
                debug!("transposition at depth {depth}: {}", report.board_hash);
                continue;
            }

            if depth >= p.max_depth {
                continue;
            }
            let Some(best) = report.top_moves.first() else {
                continue;
            };
            let best_winrate = best.winrate;
            let mover = if depth % 2 == 0 { first_color } else { first_color.opponent() };
            for candidate in report.top_moves.iter().take(p.branch_limit) {
                let mv = candidate.mv.as_str();
                if mv.eq_ignore_ascii_case("pass") || mv.eq_ignore_ascii_case("resign") {
                    continue;
                }
                if best_winrate - candidate.winrate > p.prune_margin {
                    let gap = best_winrate - candidate.winrate;
                    debug!("pruned {mv} at depth {depth} ({gap:.3} behind)");
                    continue;
                }
                let mut child = moves.clone();
                child.push(format!("{} {mv}", mover.letter()));
                queue.push_back((child, depth + 1));
                stats.enqueued += 1;
            }
        }

        // The frontier drained: this run is complete and says so durably.
        self.analyzer.cache().record_book_run(&BookRunRecord {
            board_size: p.board_size,
            komi: p.komi,
            handicap: p.handicap,
            engine_visits: p.visits,
            max_depth: p.max_depth,
            node_count: visited.len() as u64,
            notes: None,
        })?;
        stats.completed = true;
        info!(
            "book complete: {} distinct positions ({} transpositions pruned)",
            visited.len(),
            stats.transpositions
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let p = BookParams::default();
        assert_eq!(p.board_size, 9);
        assert_eq!(p.branch_limit, 3);
        assert!((p.prune_margin - 0.10).abs() < 1e-9);
        assert_eq!(p.max_depth, 10);
    }
}
