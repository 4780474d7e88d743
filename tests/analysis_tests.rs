//! End-to-end tests of the analysis orchestrator: a scripted engine behind
//! a real in-memory cache, exercised through the public `Analyzer` API.
//!
//! The scripted engine records every position it is asked about, so the
//! tests can tell a cache hit from a fresh evaluation.

use std::sync::Mutex;

use fuseki::analysis::{AnalysisError, AnalysisRequest, Analyzer, AnalyzerOptions};
use fuseki::board::Position;
use fuseki::cache::{MoveCandidate, PositionCache};
use fuseki::engine::{Engine, EngineAnalysis, EngineError};

// =============================================================================
// Scripted engine
// =============================================================================

/// Always answers with one fixed candidate list; remembers what it was
/// asked.
struct StubEngine {
    response: Vec<MoveCandidate>,
    ownership: Option<Vec<f64>>,
    calls: Mutex<Vec<String>>,
}

impl StubEngine {
    fn returning(response: Vec<MoveCandidate>) -> Self {
        StubEngine {
            response,
            ownership: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_ownership(mut self, grid: Vec<f64>) -> Self {
        self.ownership = Some(grid);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Engine for StubEngine {
    fn analyze_position(
        &self,
        pos: &Position,
        visits: u32,
        _top_n: usize,
    ) -> Result<EngineAnalysis, EngineError> {
        self.calls.lock().unwrap().push(pos.moves_string());
        Ok(EngineAnalysis {
            candidates: self.response.clone(),
            model_name: "stub-model".to_string(),
            duration_secs: 0.01,
            stopped_by_limit: false,
            budget_descriptor: format!("visits {visits}"),
            ownership: self.ownership.clone(),
        })
    }

    fn model_name(&self) -> String {
        "stub-model".to_string()
    }
}

fn cand(mv: &str, winrate: f64, score_lead: f64, visits: u32) -> MoveCandidate {
    MoveCandidate {
        mv: mv.to_string(),
        winrate,
        score_lead,
        visits,
    }
}

fn request(size: u8, moves: &[&str]) -> AnalysisRequest {
    AnalysisRequest {
        board_size: size,
        moves: moves.iter().map(|m| m.to_string()).collect(),
        ..AnalysisRequest::default()
    }
}

// =============================================================================
// Cache hit and miss flow
// =============================================================================

#[test]
fn test_miss_then_hit_uses_cache() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![
        cand("C3", 0.61, 2.0, 140),
        cand("pass", 0.35, -3.0, 20),
    ]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());
    let req = request(19, &["B Q16", "W R4"]);

    let first = analyzer.analyze(&req).unwrap();
    assert!(!first.from_cache);
    assert_eq!(engine.call_count(), 1);
    assert_eq!(first.top_moves.len(), 2);
    assert_eq!(first.top_moves[0].mv, "C3");
    assert_eq!(first.model_name, "stub-model");

    let second = analyzer.analyze(&req).unwrap();
    assert!(second.from_cache, "second identical query must hit the cache");
    assert_eq!(engine.call_count(), 1, "the engine must not be asked twice");
    assert_eq!(second.board_hash, first.board_hash);
    assert_eq!(second.top_moves, first.top_moves);
}

#[test]
fn test_symmetric_transposition_shares_one_entry() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![
        cand("C3", 0.61, 2.0, 140),
        cand("pass", 0.35, -3.0, 20),
    ]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let first = analyzer.analyze(&request(19, &["B Q16", "W R4"])).unwrap();
    // The half-turn image of the same game.
    let rotated = analyzer.analyze(&request(19, &["B D4", "W C16"])).unwrap();

    assert_eq!(engine.call_count(), 1, "the rotated query is a transposition");
    assert!(rotated.from_cache);
    assert_eq!(rotated.board_hash, first.board_hash);

    // Candidates come back in the orientation of the query: C3 rotates to
    // R17, pass stays put.
    assert_eq!(rotated.top_moves.len(), 2);
    assert_eq!(rotated.top_moves[0].mv, "R17");
    assert!((rotated.top_moves[0].winrate - 0.61).abs() < 1e-12);
    assert_eq!(rotated.top_moves[1].mv, "pass");
}

#[test]
fn test_force_refresh_reaches_engine() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.61, 2.0, 140)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let req = request(19, &["B Q16", "W R4"]);
    analyzer.analyze(&req).unwrap();

    let refreshed = analyzer
        .analyze(&AnalysisRequest {
            force_refresh: true,
            ..req.clone()
        })
        .unwrap();
    assert!(!refreshed.from_cache);
    assert_eq!(engine.call_count(), 2);

    // The refreshed row replaced the old one; a third query hits it.
    analyzer.analyze(&req).unwrap();
    assert_eq!(engine.call_count(), 2);
}

#[test]
fn test_komi_separates_entries() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.61, 2.0, 140)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let a = analyzer
        .analyze(&AnalysisRequest {
            komi: Some(7.5),
            ..request(19, &["B Q16", "W R4"])
        })
        .unwrap();
    let b = analyzer
        .analyze(&AnalysisRequest {
            komi: Some(5.5),
            ..request(19, &["B Q16", "W R4"])
        })
        .unwrap();

    assert_eq!(engine.call_count(), 2, "different komi is a different key");
    assert_ne!(a.board_hash, b.board_hash, "komi feeds the fingerprint");
}

#[test]
fn test_visit_budget_separates_entries() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.61, 2.0, 140)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let a = analyzer
        .analyze(&AnalysisRequest {
            visits: Some(150),
            ..request(19, &["B Q16", "W R4"])
        })
        .unwrap();
    let b = analyzer
        .analyze(&AnalysisRequest {
            visits: Some(300),
            ..request(19, &["B Q16", "W R4"])
        })
        .unwrap();

    assert_eq!(engine.call_count(), 2, "a deeper budget must re-analyze");
    assert_eq!(a.board_hash, b.board_hash);
    assert_eq!(a.engine_visits, 150);
    assert_eq!(b.engine_visits, 300);
}

// =============================================================================
// Handicap and komi defaults
// =============================================================================

#[test]
fn test_handicap_game_defaults() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("E5", 0.48, -1.0, 120)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let report = analyzer
        .analyze(&AnalysisRequest {
            board_size: 9,
            handicap: 2,
            ..AnalysisRequest::default()
        })
        .unwrap();

    assert!((report.komi - 0.5).abs() < 1e-9, "handicap games default to komi 0.5");
    let seen = engine.calls();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("B[C3]") && seen[0].contains("B[G7]"));
}

#[test]
fn test_even_game_uses_configured_komi() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.5, 0.0, 50)]);
    let analyzer = Analyzer::new(
        &cache,
        &engine,
        AnalyzerOptions {
            default_komi: 6.5,
            ..AnalyzerOptions::default()
        },
    );

    let report = analyzer.analyze(&request(9, &["B C4"])).unwrap();
    assert!((report.komi - 6.5).abs() < 1e-9);
}

// =============================================================================
// Presentation augmentations
// =============================================================================

#[test]
fn test_empty_board_orbit_and_floor() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.52, 0.5, 200)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let report = analyzer.analyze(&request(9, &[])).unwrap();

    // C3 expands over the empty board's full symmetry orbit, then the flat
    // result is padded with the one well-known point not already present.
    assert_eq!(report.top_moves.len(), 5);
    let orbit: Vec<&str> = report.top_moves[..4].iter().map(|c| c.mv.as_str()).collect();
    for corner in ["C3", "C7", "G7", "G3"] {
        assert!(orbit.contains(&corner), "missing orbit member {corner}");
    }
    for member in &report.top_moves[..4] {
        assert!((member.winrate - 0.52).abs() < 1e-12);
        assert_eq!(member.visits, 200);
    }
    let synth = &report.top_moves[4];
    assert_eq!(synth.mv, "E5");
    assert_eq!(synth.visits, 1, "synthesized points carry minimal effort");
    assert!((synth.winrate - 0.50).abs() < 1e-9);
    assert!(synth.score_lead.abs() < 1e-9);
}

#[test]
fn test_augmentations_never_pollute_the_store() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.52, 0.5, 200)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let first = analyzer.analyze(&request(9, &[])).unwrap();
    let second = analyzer.analyze(&request(9, &[])).unwrap();

    assert_eq!(engine.call_count(), 1);
    assert!(second.from_cache);
    // If orbit expansion or floor padding had leaked into the stored row,
    // the second pass would double up on candidates.
    assert_eq!(second.top_moves, first.top_moves);

    let stored = cache
        .get(&first.board_hash, 7.5, Some(500))
        .unwrap()
        .expect("the empty board analysis must be stored");
    assert_eq!(stored.record.candidates.len(), 1, "only the real candidate persists");
    assert_eq!(stored.record.candidates[0].visits, 200);
}

#[test]
fn test_no_candidates_pass_through() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(Vec::new());
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let report = analyzer.analyze(&request(9, &[])).unwrap();
    assert!(report.top_moves.is_empty(), "nothing to expand or pad");

    let again = analyzer.analyze(&request(9, &[])).unwrap();
    assert!(again.from_cache);
    assert_eq!(engine.call_count(), 1, "an empty result is still cacheable");
}

// =============================================================================
// Ownership remapping
// =============================================================================

#[test]
fn test_ownership_follows_the_board_orientation() {
    let mut grid = vec![0.0; 81];
    grid[3 * 9 + 2] = 0.9; // the cell under the C4 stone

    let cache = PositionCache::open_in_memory().unwrap();
    let engine =
        StubEngine::returning(vec![cand("E5", 0.5, 0.0, 100)]).with_ownership(grid.clone());
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let first = analyzer.analyze(&request(9, &["B C4"])).unwrap();
    assert_eq!(first.ownership.as_deref(), Some(grid.as_slice()));

    // D7 is the quarter-turn image of C4; the marked cell must follow the
    // stone to its new coordinates.
    let rotated = analyzer.analyze(&request(9, &["B D7"])).unwrap();
    assert!(rotated.from_cache);
    assert_eq!(engine.call_count(), 1);
    let own = rotated.ownership.expect("ownership survives the cache");
    assert!((own[6 * 9 + 3] - 0.9).abs() < 1e-12, "value must land on D7");
    assert!((own.iter().sum::<f64>() - 0.9).abs() < 1e-9, "no other cell is touched");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_invalid_requests_never_reach_the_engine() {
    let cache = PositionCache::open_in_memory().unwrap();
    let engine = StubEngine::returning(vec![cand("C3", 0.5, 0.0, 10)]);
    let analyzer = Analyzer::new(&cache, &engine, AnalyzerOptions::default());

    let bad_size = analyzer.analyze(&request(10, &[])).unwrap_err();
    assert!(matches!(bad_size, AnalysisError::Board(_)));

    let bad_vertex = analyzer.analyze(&request(9, &["B Z99"])).unwrap_err();
    assert!(matches!(bad_vertex, AnalysisError::Board(_)));

    let occupied = analyzer.analyze(&request(9, &["B E5", "W E5"])).unwrap_err();
    assert!(matches!(occupied, AnalysisError::Board(_)));

    assert_eq!(engine.call_count(), 0);
}
