//! Persistent analysis cache backed by SQLite.
//!
//! Entries are keyed by `(board_hash, engine_visits, komi)`: the canonical
//! position fingerprint, the compute budget, and the komi the engine was
//! configured with. The payload is the candidate-move list as JSON, plus an
//! optional per-cell ownership grid.
//!
//! Writes go through a dominance policy (completeness, then effort, then
//! recency) so a rerun can only improve what is stored. Databases created by
//! older builds are upgraded in place through a linear chain of versioned
//! migrations before any query is served.

use std::path::Path;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current on-disk schema version. Fresh databases are created directly at
/// this version; older ones are migrated forward.
pub const SCHEMA_VERSION: i64 = 4;

/// Tier-2 dominance: a rerun must spend more than this fraction longer to
/// displace an equally complete entry.
const EFFORT_MARGIN: f64 = 0.10;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cache schema version {0} is newer than this build supports ({SCHEMA_VERSION})")]
    SchemaTooNew(i64),
}

/// One engine-suggested move with its evaluation. Winrate and score lead
/// are from the side-to-move's perspective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveCandidate {
    #[serde(rename = "move")]
    pub mv: String,
    pub winrate: f64,
    pub score_lead: f64,
    pub visits: u32,
}

/// A completed analysis, as handed to [`PositionCache::put`]. `created_at`
/// is assigned by the store.
#[derive(Clone, Debug)]
pub struct AnalysisRecord {
    /// Canonical fingerprint, 16 hex digits.
    pub board_hash: String,
    /// Debug rendering of how the position was reached.
    pub moves_sequence: String,
    pub board_size: u8,
    pub komi: f64,
    /// Candidates ordered by visits, best first.
    pub candidates: Vec<MoveCandidate>,
    pub engine_visits: u32,
    pub model_name: String,
    /// Wall time of the engine call, seconds.
    pub duration_secs: f64,
    /// True when a resource limit, not convergence, ended the search.
    pub stopped_by_limit: bool,
    /// Human-readable budget, e.g. `"visits 150"`.
    pub budget_descriptor: String,
    /// Per-cell ownership in [-1, 1], length `board_size²`, row-major.
    pub ownership: Option<Vec<f64>>,
}

/// A row read back from the store. Always a fresh copy; mutating it cannot
/// affect what is persisted.
#[derive(Clone, Debug)]
pub struct CachedResult {
    pub record: AnalysisRecord,
    pub created_at: String,
}

/// What [`PositionCache::put`] did with the incoming record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    KeptExisting,
}

/// Counters returned by [`PositionCache::merge_from`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: u64,
    pub merged: u64,
    pub errors: u64,
}

/// A finished book-construction run, recorded only when the frontier fully
/// drained.
#[derive(Clone, Debug)]
pub struct BookRunRecord {
    pub board_size: u8,
    pub komi: f64,
    pub handicap: u8,
    pub engine_visits: u32,
    pub max_depth: u32,
    pub node_count: u64,
    pub notes: Option<String>,
}

/// Aggregate counts for the `stats` surface.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub total_entries: u64,
    pub by_size: Vec<(u8, u64)>,
    pub by_model: Vec<(String, u64)>,
}

const ROW_COLUMNS: &str = "board_hash, moves_sequence, board_size, komi, analysis_result, \
     engine_visits, model_name, created_at, duration_secs, stopped_by_limit, \
     budget_descriptor, ownership";

/// A raw row before the JSON payload has been decoded.
struct StoredRow {
    board_hash: String,
    moves_sequence: Option<String>,
    board_size: u8,
    komi: f64,
    analysis_result: String,
    engine_visits: u32,
    model_name: String,
    created_at: String,
    duration_secs: f64,
    stopped_by_limit: bool,
    budget_descriptor: String,
    ownership: Option<String>,
}

fn map_stored_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        board_hash: row.get(0)?,
        moves_sequence: row.get(1)?,
        board_size: row.get(2)?,
        komi: row.get(3)?,
        analysis_result: row.get(4)?,
        engine_visits: row.get(5)?,
        model_name: row.get(6)?,
        created_at: row.get(7)?,
        duration_secs: row.get(8)?,
        stopped_by_limit: row.get(9)?,
        budget_descriptor: row.get(10)?,
        ownership: row.get(11)?,
    })
}

impl StoredRow {
    /// Decode the JSON payload(s). `None` means the row is unreadable and
    /// must be treated as a miss, never as an error.
    fn decode(self) -> Option<CachedResult> {
        let candidates: Vec<MoveCandidate> = match serde_json::from_str(&self.analysis_result) {
            Ok(c) => c,
            Err(e) => {
                warn!("unreadable candidate payload for {}: {e}", self.board_hash);
                return None;
            }
        };
        let ownership = match &self.ownership {
            None => None,
            Some(text) => match serde_json::from_str::<Vec<f64>>(text) {
                Ok(o) => Some(o),
                Err(e) => {
                    warn!("unreadable ownership payload for {}: {e}", self.board_hash);
                    return None;
                }
            },
        };
        Some(CachedResult {
            record: AnalysisRecord {
                board_hash: self.board_hash,
                moves_sequence: self.moves_sequence.unwrap_or_default(),
                board_size: self.board_size,
                komi: self.komi,
                candidates,
                engine_visits: self.engine_visits,
                model_name: self.model_name,
                duration_secs: self.duration_secs,
                stopped_by_limit: self.stopped_by_limit,
                budget_descriptor: self.budget_descriptor,
                ownership,
            },
            created_at: self.created_at,
        })
    }
}

/// SQLite-backed store for position analyses. One connection per instance;
/// all methods take `&self` and each write runs inside its own transaction.
pub struct PositionCache {
    conn: Connection,
}

impl PositionCache {
    /// Open (creating if needed) a cache at `path` and bring its schema up
    /// to [`SCHEMA_VERSION`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory cache, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        let cache = PositionCache { conn };
        cache.migrate()?;
        Ok(cache)
    }

    // ====== Schema management ======

    fn table_exists(&self, name: &str) -> Result<bool, CacheError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Detected schema version: 0 for a fresh database, 1 for one that
    /// predates the version marker, otherwise the marker row.
    fn detect_version(&self) -> Result<i64, CacheError> {
        if !self.table_exists("analysis_cache")? {
            return Ok(0);
        }
        if !self.table_exists("schema_version")? {
            return Ok(1);
        }
        let v: Option<i64> = self
            .conn
            .query_row("SELECT version FROM schema_version", [], |r| r.get(0))
            .optional()?;
        Ok(v.unwrap_or(1))
    }

    fn migrate(&self) -> Result<(), CacheError> {
        let mut version = self.detect_version()?;
        if version > SCHEMA_VERSION {
            return Err(CacheError::SchemaTooNew(version));
        }
        if version == 0 {
            let tx = self.conn.unchecked_transaction()?;
            create_current_schema(&tx)?;
            tx.commit()?;
            debug!("created cache schema at v{SCHEMA_VERSION}");
            return Ok(());
        }
        while version < SCHEMA_VERSION {
            let tx = self.conn.unchecked_transaction()?;
            match version {
                1 => migrate_v1_to_v2(&tx)?,
                2 => migrate_v2_to_v3(&tx)?,
                3 => migrate_v3_to_v4(&tx)?,
                _ => unreachable!("version checked above"),
            }
            version += 1;
            set_version(&tx, version)?;
            tx.commit()?;
            info!("cache schema migrated to v{version}");
        }
        Ok(())
    }

    // ====== Read path ======

    /// Look up an entry. With `required_visits`, only the exact budget
    /// matches; without, the highest-budget row for `(hash, komi)` is
    /// returned. A row whose payload fails to decode is a miss; other rows
    /// are unaffected.
    pub fn get(
        &self,
        board_hash: &str,
        komi: f64,
        required_visits: Option<u32>,
    ) -> Result<Option<CachedResult>, CacheError> {
        let raw = match required_visits {
            Some(visits) => self
                .conn
                .query_row(
                    &format!(
                        "SELECT {ROW_COLUMNS} FROM analysis_cache \
                         WHERE board_hash = ?1 AND komi = ?2 AND engine_visits = ?3"
                    ),
                    params![board_hash, komi, visits],
                    map_stored_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    &format!(
                        "SELECT {ROW_COLUMNS} FROM analysis_cache \
                         WHERE board_hash = ?1 AND komi = ?2 \
                         ORDER BY engine_visits DESC LIMIT 1"
                    ),
                    params![board_hash, komi],
                    map_stored_row,
                )
                .optional()?,
        };
        match raw {
            None => {
                debug!("cache miss for {board_hash} komi {komi} visits {required_visits:?}");
                Ok(None)
            }
            Some(row) => Ok(row.decode()),
        }
    }

    // ====== Write path ======

    /// Store a record. Runs as one transaction: if a row already holds the
    /// key, the dominance policy decides which survives, in order:
    ///
    /// 1. completeness: a naturally converged entry beats a limit-stopped one;
    /// 2. effort: with equal completeness, more than 10% extra duration wins;
    /// 3. recency: otherwise the incoming entry wins.
    pub fn put(&self, record: &AnalysisRecord) -> Result<PutOutcome, CacheError> {
        let payload = serde_json::to_string(&record.candidates)?;
        let ownership = record
            .ownership
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self.conn.unchecked_transaction()?;
        let existing: Option<(i64, f64, bool)> = tx
            .query_row(
                "SELECT id, duration_secs, stopped_by_limit FROM analysis_cache \
                 WHERE board_hash = ?1 AND engine_visits = ?2 AND komi = ?3",
                params![record.board_hash, record.engine_visits, record.komi],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO analysis_cache \
                     (board_hash, moves_sequence, board_size, komi, analysis_result, \
                      engine_visits, model_name, duration_secs, stopped_by_limit, \
                      budget_descriptor, ownership) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        record.board_hash,
                        record.moves_sequence,
                        record.board_size,
                        record.komi,
                        payload,
                        record.engine_visits,
                        record.model_name,
                        record.duration_secs,
                        record.stopped_by_limit,
                        record.budget_descriptor,
                        ownership,
                    ],
                )?;
                PutOutcome::Inserted
            }
            Some((id, existing_duration, existing_stopped)) => {
                if incoming_beats(record, existing_duration, existing_stopped) {
                    tx.execute(
                        "UPDATE analysis_cache SET moves_sequence = ?1, board_size = ?2, \
                         analysis_result = ?3, model_name = ?4, created_at = CURRENT_TIMESTAMP, \
                         duration_secs = ?5, stopped_by_limit = ?6, budget_descriptor = ?7, \
                         ownership = ?8 WHERE id = ?9",
                        params![
                            record.moves_sequence,
                            record.board_size,
                            payload,
                            record.model_name,
                            record.duration_secs,
                            record.stopped_by_limit,
                            record.budget_descriptor,
                            ownership,
                            id,
                        ],
                    )?;
                    PutOutcome::Replaced
                } else {
                    PutOutcome::KeptExisting
                }
            }
        };
        tx.commit()?;
        debug!("cache put {}: {outcome:?}", record.board_hash);
        Ok(outcome)
    }

    /// Copy every row of `other` into this store. Keys absent here are
    /// inserted as-is (timestamps preserved); keys present on both sides get
    /// an averaging union of their candidate lists, stored under the
    /// incoming row's `model_name` tagged `+merged` (an already-tagged name
    /// is kept as-is). Merging pools evidence from both sides rather than
    /// applying the dominance policy. Unreadable payloads on either side
    /// count as errors and are skipped.
    pub fn merge_from(&self, other: &PositionCache) -> Result<MergeStats, CacheError> {
        let mut stats = MergeStats::default();
        let mut stmt = other
            .conn
            .prepare(&format!("SELECT {ROW_COLUMNS} FROM analysis_cache"))?;
        let rows = stmt.query_map([], map_stored_row)?;
        for row in rows {
            let incoming = row?;
            let incoming_candidates: Vec<MoveCandidate> =
                match serde_json::from_str(&incoming.analysis_result) {
                    Ok(c) => c,
                    Err(_) => {
                        stats.errors += 1;
                        continue;
                    }
                };

            let local: Option<(i64, String)> = self
                .conn
                .query_row(
                    "SELECT id, analysis_result FROM analysis_cache \
                     WHERE board_hash = ?1 AND engine_visits = ?2 AND komi = ?3",
                    params![incoming.board_hash, incoming.engine_visits, incoming.komi],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            match local {
                None => {
                    self.conn.execute(
                        "INSERT INTO analysis_cache \
                         (board_hash, moves_sequence, board_size, komi, analysis_result, \
                          engine_visits, model_name, created_at, duration_secs, \
                          stopped_by_limit, budget_descriptor, ownership) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        params![
                            incoming.board_hash,
                            incoming.moves_sequence,
                            incoming.board_size,
                            incoming.komi,
                            incoming.analysis_result,
                            incoming.engine_visits,
                            incoming.model_name,
                            incoming.created_at,
                            incoming.duration_secs,
                            incoming.stopped_by_limit,
                            incoming.budget_descriptor,
                            incoming.ownership,
                        ],
                    )?;
                    stats.inserted += 1;
                }
                Some((id, local_payload)) => {
                    let local_candidates: Vec<MoveCandidate> =
                        match serde_json::from_str(&local_payload) {
                            Ok(c) => c,
                            Err(_) => {
                                stats.errors += 1;
                                continue;
                            }
                        };
                    let merged = average_union(&local_candidates, &incoming_candidates);
                    let model = if incoming.model_name.ends_with("+merged") {
                        incoming.model_name
                    } else {
                        format!("{}+merged", incoming.model_name)
                    };
                    self.conn.execute(
                        "UPDATE analysis_cache SET analysis_result = ?1, model_name = ?2 \
                         WHERE id = ?3",
                        params![serde_json::to_string(&merged)?, model, id],
                    )?;
                    stats.merged += 1;
                }
            }
        }
        info!(
            "cache merge: {} inserted, {} merged, {} errors",
            stats.inserted, stats.merged, stats.errors
        );
        Ok(stats)
    }

    // ====== Book-run completion ======

    /// Record a fully drained book run (UPSERT on its parameter key).
    pub fn record_book_run(&self, run: &BookRunRecord) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT INTO book_runs \
             (board_size, komi, handicap, engine_visits, max_depth, node_count, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(board_size, komi, handicap, engine_visits) DO UPDATE SET \
             max_depth = excluded.max_depth, node_count = excluded.node_count, \
             completed_at = CURRENT_TIMESTAMP, notes = excluded.notes",
            params![
                run.board_size,
                run.komi,
                run.handicap,
                run.engine_visits,
                run.max_depth,
                run.node_count,
                run.notes,
            ],
        )?;
        Ok(())
    }

    pub fn book_run_exists(
        &self,
        board_size: u8,
        komi: f64,
        handicap: u8,
        engine_visits: u32,
    ) -> Result<bool, CacheError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM book_runs WHERE board_size = ?1 AND komi = ?2 \
                 AND handicap = ?3 AND engine_visits = ?4",
                params![board_size, komi, handicap, engine_visits],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ====== Maintenance ======

    pub fn len(&self) -> Result<u64, CacheError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_cache", [], |r| r.get(0))?)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let total_entries = self.len()?;
        let mut stmt = self.conn.prepare(
            "SELECT board_size, COUNT(*) FROM analysis_cache \
             GROUP BY board_size ORDER BY board_size",
        )?;
        let by_size = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(u8, u64)>>>()?;
        let mut stmt = self.conn.prepare(
            "SELECT model_name, COUNT(*) FROM analysis_cache \
             GROUP BY model_name ORDER BY COUNT(*) DESC",
        )?;
        let by_model = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, u64)>>>()?;
        Ok(CacheStats {
            total_entries,
            by_size,
            by_model,
        })
    }

    /// Entry counts per compute budget for one `(size, komi)` pair.
    pub fn visit_counts(&self, board_size: u8, komi: f64) -> Result<Vec<(u32, u64)>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT engine_visits, COUNT(*) FROM analysis_cache \
             WHERE board_size = ?1 AND komi = ?2 \
             GROUP BY engine_visits ORDER BY engine_visits",
        )?;
        let counts = stmt
            .query_map(params![board_size, komi], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(u32, u64)>>>()?;
        Ok(counts)
    }

    /// Remove every entry for a fingerprint, all budgets and komi values.
    /// Returns the number of rows removed.
    pub fn delete(&self, board_hash: &str) -> Result<u64, CacheError> {
        let n = self
            .conn
            .execute("DELETE FROM analysis_cache WHERE board_hash = ?1", [board_hash])?;
        Ok(n as u64)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.conn.execute("DELETE FROM analysis_cache", [])?;
        Ok(())
    }
}

/// Dominance comparison for `put`. True when the incoming record should
/// replace the stored one.
fn incoming_beats(incoming: &AnalysisRecord, existing_duration: f64, existing_stopped: bool) -> bool {
    if incoming.stopped_by_limit != existing_stopped {
        return !incoming.stopped_by_limit;
    }
    if incoming.duration_secs > existing_duration * (1.0 + EFFORT_MARGIN) {
        return true;
    }
    if existing_duration > incoming.duration_secs * (1.0 + EFFORT_MARGIN) {
        return false;
    }
    true
}

/// Union of two candidate lists keyed by move. Moves on both sides average
/// their winrate and score lead and keep the incoming visit count; one-sided
/// moves pass through. The result is re-sorted by visits, best first.
fn average_union(local: &[MoveCandidate], incoming: &[MoveCandidate]) -> Vec<MoveCandidate> {
    let mut merged: Vec<MoveCandidate> = Vec::with_capacity(local.len() + incoming.len());
    for cand in local {
        match incoming.iter().find(|c| c.mv == cand.mv) {
            Some(theirs) => merged.push(MoveCandidate {
                mv: cand.mv.clone(),
                winrate: (cand.winrate + theirs.winrate) / 2.0,
                score_lead: (cand.score_lead + theirs.score_lead) / 2.0,
                visits: theirs.visits,
            }),
            None => merged.push(cand.clone()),
        }
    }
    for cand in incoming {
        if !local.iter().any(|c| c.mv == cand.mv) {
            merged.push(cand.clone());
        }
    }
    merged.sort_by(|a, b| b.visits.cmp(&a.visits));
    merged
}

// ====== Schema DDL ======

fn create_current_schema(tx: &Transaction<'_>) -> Result<(), CacheError> {
    tx.execute_batch(
        "CREATE TABLE analysis_cache (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             board_hash TEXT NOT NULL,
             moves_sequence TEXT,
             board_size INTEGER NOT NULL,
             komi REAL NOT NULL,
             analysis_result TEXT NOT NULL,
             engine_visits INTEGER NOT NULL,
             model_name TEXT NOT NULL,
             created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
             duration_secs REAL NOT NULL DEFAULT 0,
             stopped_by_limit INTEGER NOT NULL DEFAULT 1,
             budget_descriptor TEXT NOT NULL DEFAULT '',
             ownership TEXT
         );
         CREATE UNIQUE INDEX idx_board_hash_visits_komi
             ON analysis_cache(board_hash, engine_visits, komi);",
    )?;
    create_book_runs(tx)?;
    tx.execute_batch("CREATE TABLE schema_version (version INTEGER NOT NULL);")?;
    set_version(tx, SCHEMA_VERSION)?;
    Ok(())
}

fn create_book_runs(tx: &Transaction<'_>) -> Result<(), CacheError> {
    tx.execute_batch(
        "CREATE TABLE book_runs (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             board_size INTEGER NOT NULL,
             komi REAL NOT NULL,
             handicap INTEGER NOT NULL,
             engine_visits INTEGER NOT NULL,
             max_depth INTEGER NOT NULL,
             node_count INTEGER NOT NULL,
             completed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
             notes TEXT,
             UNIQUE(board_size, komi, handicap, engine_visits)
         );",
    )?;
    Ok(())
}

fn set_version(tx: &Transaction<'_>, version: i64) -> Result<(), CacheError> {
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// v1 was unique on `board_hash` alone; widening uniqueness to
/// `(board_hash, engine_visits)` needs a table rebuild because the original
/// uniqueness may have been declared inline.
fn migrate_v1_to_v2(tx: &Transaction<'_>) -> Result<(), CacheError> {
    tx.execute_batch(
        "ALTER TABLE analysis_cache RENAME TO analysis_cache_old;
         CREATE TABLE analysis_cache (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             board_hash TEXT NOT NULL,
             moves_sequence TEXT,
             board_size INTEGER NOT NULL,
             komi REAL NOT NULL,
             analysis_result TEXT NOT NULL,
             engine_visits INTEGER NOT NULL,
             model_name TEXT NOT NULL,
             created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
         );
         INSERT INTO analysis_cache (id, board_hash, moves_sequence, board_size, komi,
                                     analysis_result, engine_visits, model_name, created_at)
             SELECT id, board_hash, moves_sequence, board_size, komi,
                    analysis_result, engine_visits, model_name, created_at
             FROM analysis_cache_old;
         DROP TABLE analysis_cache_old;
         CREATE UNIQUE INDEX idx_board_hash_visits
             ON analysis_cache(board_hash, engine_visits);",
    )?;
    Ok(())
}

/// v2 → v3: widen uniqueness to include komi. Index swap only.
fn migrate_v2_to_v3(tx: &Transaction<'_>) -> Result<(), CacheError> {
    tx.execute_batch(
        "DROP INDEX IF EXISTS idx_board_hash_visits;
         CREATE UNIQUE INDEX idx_board_hash_visits_komi
             ON analysis_cache(board_hash, engine_visits, komi);",
    )?;
    Ok(())
}

/// v3 → v4: add the effort/completeness columns and the book_runs table.
/// Legacy rows get `stopped_by_limit = 1` so any converged rerun dominates
/// them.
fn migrate_v3_to_v4(tx: &Transaction<'_>) -> Result<(), CacheError> {
    tx.execute_batch(
        "ALTER TABLE analysis_cache ADD COLUMN duration_secs REAL NOT NULL DEFAULT 0;
         ALTER TABLE analysis_cache ADD COLUMN stopped_by_limit INTEGER NOT NULL DEFAULT 1;
         ALTER TABLE analysis_cache ADD COLUMN budget_descriptor TEXT NOT NULL DEFAULT '';
         ALTER TABLE analysis_cache ADD COLUMN ownership TEXT;",
    )?;
    create_book_runs(tx)?;
    Ok(())
}
