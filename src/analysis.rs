//! Analysis orchestration: the cache in front of the engine.
//!
//! A request is validated into a [`Position`], canonicalized, and served
//! from the cache when possible. Cache rows live in the canonical
//! orientation, so hits are remapped back through the inverse transform
//! before they are returned; fresh engine results are remapped forward
//! before they are stored. Two presentation-only touches are applied to the
//! returned copy (never to the stored one): symmetric positions have their
//! candidates expanded over the full orbit, and an empty board is padded
//! with well-known opening points when the engine's output is too flat to
//! be instructive.

use std::collections::HashSet;
use std::fmt;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::board::{parse_coord, str_coord, str_point, BoardError, Move, Point, Position};
use crate::cache::{AnalysisRecord, CacheError, MoveCandidate, PositionCache};
use crate::engine::{Engine, EngineError};
use crate::symmetry::{hash_hex, self_symmetries, Transform, ZobristTable};

/// Winrate handicap applied to synthesized opening points, keeping them
/// below every real candidate.
const FLOOR_WINRATE_OFFSET: f64 = 0.02;
const FLOOR_LEAD_OFFSET: f64 = 0.5;
/// Synthesized floor candidates need at least this many distinct score
/// tiers (score lead rounded to 0.5) to be suppressed.
const FLOOR_TIER_THRESHOLD: usize = 3;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What to analyze. `komi` and `visits` fall back to configured defaults.
#[derive(Clone, Debug, Default)]
pub struct AnalysisRequest {
    pub board_size: u8,
    /// Moves as `"COLOR VERTEX"` strings, in order.
    pub moves: Vec<String>,
    pub handicap: u8,
    pub komi: Option<f64>,
    pub visits: Option<u32>,
    /// Skip the cache lookup (the result is still stored).
    pub force_refresh: bool,
}

/// The answer handed to callers. Candidates are in the orientation of the
/// request, not the canonical one.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    /// Canonical fingerprint, 16 hex digits.
    pub board_hash: String,
    pub board_size: u8,
    pub komi: f64,
    pub moves_sequence: String,
    pub top_moves: Vec<MoveCandidate>,
    pub ownership: Option<Vec<f64>>,
    pub engine_visits: u32,
    pub model_name: String,
    pub from_cache: bool,
    pub timestamp: String,
}

/// Analysis defaults, normally taken from the YAML config.
#[derive(Clone, Debug)]
pub struct AnalyzerOptions {
    pub default_komi: f64,
    pub visits_19x19: u32,
    pub visits_small: u32,
    pub top_moves: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            default_komi: 7.5,
            visits_19x19: 150,
            visits_small: 500,
            top_moves: 3,
        }
    }
}

/// Cache-fronted position analyzer. Holds borrowed handles; the caller owns
/// the cache and the engine lifecycles.
pub struct Analyzer<'a> {
    cache: &'a PositionCache,
    engine: &'a dyn Engine,
    opts: AnalyzerOptions,
    zobrist: ZobristTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(cache: &'a PositionCache, engine: &'a dyn Engine, opts: AnalyzerOptions) -> Self {
        Analyzer {
            cache,
            engine,
            opts,
            zobrist: ZobristTable::new(),
        }
    }

    /// The cache this analyzer reads and writes through.
    pub fn cache(&self) -> &'a PositionCache {
        self.cache
    }

    /// Default compute budget for a board size.
    pub fn visits_for(&self, size: u8) -> u32 {
        if size == 19 {
            self.opts.visits_19x19
        } else {
            self.opts.visits_small
        }
    }

    /// Analyze one position. Validation errors surface before the cache or
    /// the engine is touched.
    pub fn analyze(&self, req: &AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        let mut pos = Position::with_handicap(req.board_size, req.handicap)?;
        match req.komi {
            Some(k) => pos.set_komi(k),
            None if req.handicap < 2 => pos.set_komi(self.opts.default_komi),
            None => {} // handicap games default to the 0.5 already in place
        }
        pos.play_moves(&req.moves)?;

        let visits = req.visits.unwrap_or_else(|| self.visits_for(pos.size));
        let top_n = self.opts.top_moves;
        let (hash, transform) = self.zobrist.canonicalize(&pos);
        let board_hash = hash_hex(hash);

        if !req.force_refresh {
            if let Some(hit) = self.cache.get(&board_hash, pos.komi, Some(visits))? {
                debug!("cache hit for {board_hash} ({transform:?})");
                let inverse = transform.inverse();
                let report = AnalysisReport {
                    board_hash,
                    board_size: pos.size,
                    komi: pos.komi,
                    moves_sequence: pos.moves_string(),
                    top_moves: remap_candidates(&hit.record.candidates, inverse, pos.size),
                    ownership: hit
                        .record
                        .ownership
                        .as_deref()
                        .map(|o| remap_ownership(o, inverse, pos.size)),
                    engine_visits: hit.record.engine_visits,
                    model_name: hit.record.model_name,
                    from_cache: true,
                    timestamp: hit.created_at,
                };
                return Ok(augment(&pos, report));
            }
        }

        // Miss (or refresh): the engine analyzes the actual orientation; the
        // stored copy is remapped into the canonical one. The two copies are
        // independent allocations.
        let analysis = self.engine.analyze_position(&pos, visits, top_n)?;
        let record = AnalysisRecord {
            board_hash: board_hash.clone(),
            moves_sequence: pos.moves_string(),
            board_size: pos.size,
            komi: pos.komi,
            candidates: remap_candidates(&analysis.candidates, transform, pos.size),
            engine_visits: visits,
            model_name: analysis.model_name.clone(),
            duration_secs: analysis.duration_secs,
            stopped_by_limit: analysis.stopped_by_limit,
            budget_descriptor: analysis.budget_descriptor.clone(),
            ownership: analysis
                .ownership
                .as_deref()
                .map(|o| remap_ownership(o, transform, pos.size)),
        };
        self.cache.put(&record)?;

        let report = AnalysisReport {
            board_hash,
            board_size: pos.size,
            komi: pos.komi,
            moves_sequence: pos.moves_string(),
            top_moves: analysis.candidates,
            ownership: analysis.ownership,
            engine_visits: visits,
            model_name: analysis.model_name,
            from_cache: false,
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        Ok(augment(&pos, report))
    }
}

/// Apply the presentation-only augmentations to a report's candidate list.
fn augment(pos: &Position, mut report: AnalysisReport) -> AnalysisReport {
    let moves = std::mem::take(&mut report.top_moves);
    report.top_moves = pad_empty_board(pos, expand_self_symmetries(pos, moves));
    report
}

/// Map every candidate coordinate through `t`. Passes are untouched; a
/// stored move that no longer parses is dropped with a warning rather than
/// failing the whole lookup.
fn remap_candidates(candidates: &[MoveCandidate], t: Transform, size: u8) -> Vec<MoveCandidate> {
    if t == Transform::Identity {
        return candidates.to_vec();
    }
    candidates
        .iter()
        .filter_map(|c| match parse_coord(&c.mv, size) {
            Ok(mv) => {
                let mut mapped = c.clone();
                mapped.mv = str_coord(t.apply_move(mv, size));
                Some(mapped)
            }
            Err(e) => {
                warn!("dropping unmappable candidate {:?}: {e}", c.mv);
                None
            }
        })
        .collect()
}

/// Move each cell of an ownership grid through `t` (push semantics, same
/// direction as [`remap_candidates`]). A grid of unexpected length is
/// returned unchanged.
fn remap_ownership(grid: &[f64], t: Transform, size: u8) -> Vec<f64> {
    let n = size as usize;
    if grid.len() != n * n || t == Transform::Identity {
        return grid.to_vec();
    }
    let mut out = vec![0.0; grid.len()];
    for y in 0..size {
        for x in 0..size {
            let (tx, ty) = t.apply((x, y), size);
            out[ty as usize * n + tx as usize] = grid[y as usize * n + x as usize];
        }
    }
    out
}

/// For self-symmetric positions, every image of a candidate is as good as
/// the candidate itself, so materialize the whole orbit. Orbit members all
/// receive the minimum winrate and score lead seen among real candidates in
/// the orbit, and the maximum visits. Passes are never expanded.
fn expand_self_symmetries(pos: &Position, candidates: Vec<MoveCandidate>) -> Vec<MoveCandidate> {
    let syms = self_symmetries(pos);
    if syms.is_empty() {
        return candidates;
    }
    let mut out: Vec<MoveCandidate> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for cand in &candidates {
        if cand.mv.eq_ignore_ascii_case("pass") {
            if seen.insert("pass".to_string()) {
                out.push(cand.clone());
            }
            continue;
        }
        let point = match parse_coord(&cand.mv, pos.size) {
            Ok(Move::Play(p)) => p,
            _ => {
                // Unparseable text passes through untouched.
                out.push(cand.clone());
                continue;
            }
        };
        let mut orbit: Vec<Point> = vec![point];
        for t in &syms {
            let image = t.apply(point, pos.size);
            if !orbit.contains(&image) {
                orbit.push(image);
            }
        }
        // Real candidates falling in this orbit set the orbit's numbers.
        let mut winrate = cand.winrate;
        let mut score_lead = cand.score_lead;
        let mut visits = cand.visits;
        for other in &candidates {
            if let Ok(Move::Play(p)) = parse_coord(&other.mv, pos.size) {
                if orbit.contains(&p) {
                    winrate = winrate.min(other.winrate);
                    score_lead = score_lead.min(other.score_lead);
                    visits = visits.max(other.visits);
                }
            }
        }
        for image in orbit {
            let name = str_point(image);
            if seen.insert(name.clone()) {
                out.push(MoveCandidate {
                    mv: name,
                    winrate,
                    score_lead,
                    visits,
                });
            }
        }
    }
    // Keep the best-first contract; stable sort preserves orbit grouping.
    out.sort_by(|a, b| b.visits.cmp(&a.visits));
    out
}

/// Well-known opening points synthesized onto an under-analyzed empty
/// board.
fn known_opening_points(size: u8) -> &'static [&'static str] {
    match size {
        19 => &["D4", "Q16", "D16", "Q4", "Q3", "D17"],
        13 => &["D4", "K10", "D10", "K4", "G7"],
        9 => &["E5", "C3", "G3", "C7", "G7"],
        _ => &[],
    }
}

/// Pad an empty-board report whose candidates are too flat to be
/// instructive: fewer than three distinct score tiers (lead rounded to 0.5)
/// among the real candidates. Synthesized points score just below the best
/// real candidate and carry a single visit to mark them heuristic; they are
/// appended after the real entries.
fn pad_empty_board(pos: &Position, mut candidates: Vec<MoveCandidate>) -> Vec<MoveCandidate> {
    if !pos.is_empty() || candidates.is_empty() {
        return candidates;
    }
    let tiers: HashSet<i64> = candidates
        .iter()
        .map(|c| (c.score_lead * 2.0).round() as i64)
        .collect();
    if tiers.len() >= FLOOR_TIER_THRESHOLD {
        return candidates;
    }
    let best_winrate = candidates.iter().fold(f64::NEG_INFINITY, |m, c| m.max(c.winrate));
    let best_lead = candidates
        .iter()
        .fold(f64::NEG_INFINITY, |m, c| m.max(c.score_lead));
    for name in known_opening_points(pos.size) {
        if candidates.iter().any(|c| c.mv.eq_ignore_ascii_case(name)) {
            continue;
        }
        candidates.push(MoveCandidate {
            mv: (*name).to_string(),
            winrate: best_winrate - FLOOR_WINRATE_OFFSET,
            score_lead: best_lead - FLOOR_LEAD_OFFSET,
            visits: 1,
        });
    }
    candidates
}

impl fmt::Display for AnalysisReport {
    /// Human-readable block for the CLI.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Board {0}x{0}, komi {1} ({2})",
            self.board_size,
            self.komi,
            if self.from_cache { "cached" } else { "engine" }
        )?;
        if self.moves_sequence.is_empty() {
            writeln!(f, "Position: empty board")?;
        } else {
            writeln!(f, "Position: {}", self.moves_sequence)?;
        }
        writeln!(
            f,
            "Model {} | visits {} | hash {} | {}",
            self.model_name, self.engine_visits, self.board_hash, self.timestamp
        )?;
        if self.top_moves.is_empty() {
            writeln!(f, "No candidate moves (engine passed or resigned).")?;
        }
        for (i, c) in self.top_moves.iter().enumerate() {
            writeln!(
                f,
                "{:>2}. {:<5} winrate {:5.1}%  lead {:+6.1}  visits {}",
                i + 1,
                c.mv,
                c.winrate * 100.0,
                c.score_lead,
                c.visits
            )?;
        }
        Ok(())
    }
}
