//! Fuseki: a cached Go position analyzer.
//!
//! This crate replays Go positions, fingerprints them up to rotation and
//! reflection, and serves engine evaluations out of a persistent SQLite
//! cache, asking an external KataGo process only for positions it has never
//! seen at the requested effort.
//!
//! ## Modules
//!
//! - [`board`] - Core game logic (board state, moves, captures)
//! - [`symmetry`] - Dihedral transforms and Zobrist fingerprints
//! - [`cache`] - Persistent analysis store with schema migrations
//! - [`engine`] - GTP client for an external KataGo process
//! - [`analysis`] - Cache-first orchestration and result remapping
//! - [`book`] - Breadth-first opening book construction
//! - [`config`] - YAML startup configuration
//!
//! ## Example
//!
//! ```
//! use fuseki::board::Position;
//! use fuseki::symmetry::{hash_hex, ZobristTable};
//!
//! // Replay an opening and fingerprint it.
//! let mut pos = Position::new(19)?;
//! pos.play_moves(&["B Q16", "W D4", "B Q4"])?;
//!
//! let table = ZobristTable::new();
//! let (hash, transform) = table.canonicalize(&pos);
//! println!("canonical form {} via {:?}", hash_hex(hash), transform);
//! # Ok::<(), fuseki::board::BoardError>(())
//! ```

pub mod analysis;
pub mod board;
pub mod book;
pub mod cache;
pub mod config;
pub mod engine;
pub mod symmetry;
