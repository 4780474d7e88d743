//! Go board state: stones, move application, captures, and prisoners.
//!
//! The board is a runtime-sized square grid (9, 13, or 19). Stones live in a
//! coordinate map alongside the full move history, so a position can be
//! replayed into an external engine or rendered as a debug string. Capture
//! resolution removes opponent groups left without liberties; a play that
//! leaves the mover's own new group without liberties removes that group
//! instead (suicide, credited to nobody).
//!
//! Ko (repetition) is not detected. An immediate recapture is accepted as a
//! legal play; callers that need strict rule enforcement must layer it on.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

/// GTP column letters; the alphabet skips 'I'.
pub const GTP_COLUMNS: &str = "ABCDEFGHJKLMNOPQRST";

/// Board sizes accepted by the analysis pipeline.
pub const SUPPORTED_SIZES: [u8; 3] = [9, 13, 19];

/// Stone color.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// GTP color letter: `B` or `W`.
    pub fn letter(self) -> char {
        match self {
            Color::Black => 'B',
            Color::White => 'W',
        }
    }

    pub fn index(self) -> usize {
        match self {
            Color::Black => 0,
            Color::White => 1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A point on the board: `(x, y)`, both 0-based, `x` counted from the left
/// edge and `y` from the bottom edge (GTP row 1 is `y = 0`).
pub type Point = (u8, u8);

/// A single ply: a stone placement or a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Move {
    Play(Point),
    Pass,
}

/// Errors raised while building or mutating a position. All are detected
/// synchronously, before the cache or the engine is involved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoardError {
    #[error("point {0} is already occupied")]
    Occupied(String),
    #[error("invalid vertex: {0:?}")]
    BadVertex(String),
    #[error("vertex {0} is out of bounds for board size {1}")]
    OutOfBounds(String, u8),
    #[error("invalid color: {0:?} (expected B or W)")]
    BadColor(String),
    #[error("invalid move: {0:?} (expected \"COLOR VERTEX\")")]
    BadMove(String),
    #[error("board size must be one of 9, 13, 19, got {0}")]
    BadSize(u8),
    #[error("handicap must be 0-9, got {0}")]
    BadHandicap(u8),
}

/// Quantize a komi value to the nearest 0.5.
pub fn quantize_komi(komi: f64) -> f64 {
    (komi * 2.0).round() / 2.0
}

/// Parse a GTP color token (`b`, `black`, `w`, `white`; case-insensitive).
pub fn parse_color(s: &str) -> Result<Color, BoardError> {
    match s.to_ascii_lowercase().as_str() {
        "b" | "black" => Ok(Color::Black),
        "w" | "white" => Ok(Color::White),
        _ => Err(BoardError::BadColor(s.to_string())),
    }
}

/// Parse a GTP vertex (e.g. "Q16", case-insensitive) or the literal "pass".
pub fn parse_coord(s: &str, size: u8) -> Result<Move, BoardError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("pass") {
        return Ok(Move::Pass);
    }
    if s.len() < 2 {
        return Err(BoardError::BadVertex(s.to_string()));
    }

    let col_char = s.as_bytes()[0].to_ascii_uppercase() as char;
    let x = GTP_COLUMNS
        .find(col_char)
        .ok_or_else(|| BoardError::BadVertex(s.to_string()))? as u8;
    let row: u8 = s[1..]
        .parse()
        .map_err(|_| BoardError::BadVertex(s.to_string()))?;
    if row == 0 {
        return Err(BoardError::BadVertex(s.to_string()));
    }
    let y = row - 1;

    if x >= size || y >= size {
        return Err(BoardError::OutOfBounds(s.to_ascii_uppercase(), size));
    }
    Ok(Move::Play((x, y)))
}

/// Convert a point to its GTP vertex string (e.g. "Q16").
pub fn str_point((x, y): Point) -> String {
    let col = GTP_COLUMNS.as_bytes()[x as usize] as char;
    format!("{col}{}", y + 1)
}

/// Convert a move to its GTP string; "pass" for [`Move::Pass`].
pub fn str_coord(mv: Move) -> String {
    match mv {
        Move::Play(p) => str_point(p),
        Move::Pass => "pass".into(),
    }
}

// ====== Handicap placement ======
//
// Standard star-point placements, indexed by handicap - 2.

const HANDICAP_19: [&[&str]; 8] = [
    &["D4", "Q16"],
    &["D4", "Q16", "D16"],
    &["D4", "Q16", "D16", "Q4"],
    &["D4", "Q16", "D16", "Q4", "K10"],
    &["D4", "Q16", "D16", "Q4", "D10", "Q10"],
    &["D4", "Q16", "D16", "Q4", "D10", "Q10", "K10"],
    &["D4", "Q16", "D16", "Q4", "D10", "Q10", "K4", "K16"],
    &["D4", "Q16", "D16", "Q4", "D10", "Q10", "K4", "K16", "K10"],
];

const HANDICAP_13: [&[&str]; 8] = [
    &["D4", "K10"],
    &["D4", "K10", "D10"],
    &["D4", "K10", "D10", "K4"],
    &["D4", "K10", "D10", "K4", "G7"],
    &["D4", "K10", "D10", "K4", "D7", "K7"],
    &["D4", "K10", "D10", "K4", "D7", "K7", "G7"],
    &["D4", "K10", "D10", "K4", "D7", "K7", "G4", "G10"],
    &["D4", "K10", "D10", "K4", "D7", "K7", "G4", "G10", "G7"],
];

const HANDICAP_9: [&[&str]; 8] = [
    &["C3", "G7"],
    &["C3", "G7", "C7"],
    &["C3", "G7", "C7", "G3"],
    &["C3", "G7", "C7", "G3", "E5"],
    &["C3", "G7", "C7", "G3", "C5", "G5"],
    &["C3", "G7", "C7", "G3", "C5", "G5", "E5"],
    &["C3", "G7", "C7", "G3", "C5", "G5", "E3", "E7"],
    &["C3", "G7", "C7", "G3", "C5", "G5", "E3", "E7", "E5"],
];

/// Standard handicap stone points for a board size. Handicap 0 and 1 place
/// nothing; 2-9 use the star-point tables.
pub fn handicap_points(size: u8, handicap: u8) -> Result<Vec<Point>, BoardError> {
    if handicap < 2 {
        return Ok(Vec::new());
    }
    if handicap > 9 {
        return Err(BoardError::BadHandicap(handicap));
    }
    let table = match size {
        19 => &HANDICAP_19,
        13 => &HANDICAP_13,
        9 => &HANDICAP_9,
        _ => return Err(BoardError::BadSize(size)),
    };
    table[(handicap - 2) as usize]
        .iter()
        .map(|s| match parse_coord(s, size)? {
            Move::Play(p) => Ok(p),
            Move::Pass => Err(BoardError::BadVertex(s.to_string())),
        })
        .collect()
}

/// A Go position: stones, move history, handicap setup, komi, and prisoner
/// counts. Cloning is cheap enough for the callers here (a few hundred
/// stones at most).
#[derive(Clone, Debug)]
pub struct Position {
    /// Board size (9, 13, or 19).
    pub size: u8,
    /// Occupied points.
    pub stones: HashMap<Point, Color>,
    /// Every ply in order, passes included. Captured stones keep their ply.
    pub moves: Vec<(Color, Move)>,
    /// Handicap stones, placed before any move.
    pub handicap_stones: Vec<Point>,
    /// Komi, quantized to 0.5.
    pub komi: f64,
    /// Side to move next.
    pub next_player: Color,
    /// Captured-stone counts, indexed by the capturing color.
    pub prisoners: [u32; 2],
}

impl Position {
    /// Create an empty position. Komi defaults to 7.5; Black moves first.
    pub fn new(size: u8) -> Result<Self, BoardError> {
        if !SUPPORTED_SIZES.contains(&size) {
            return Err(BoardError::BadSize(size));
        }
        Ok(Position {
            size,
            stones: HashMap::new(),
            moves: Vec::new(),
            handicap_stones: Vec::new(),
            komi: 7.5,
            next_player: Color::Black,
            prisoners: [0, 0],
        })
    }

    /// Create a position with standard handicap stones placed for Black.
    /// With two or more stones, komi defaults to 0.5 and White moves first.
    pub fn with_handicap(size: u8, handicap: u8) -> Result<Self, BoardError> {
        let mut pos = Position::new(size)?;
        let points = handicap_points(size, handicap)?;
        if !points.is_empty() {
            pos.komi = 0.5;
            for p in points {
                pos.stones.insert(p, Color::Black);
                pos.handicap_stones.push(p);
            }
            pos.next_player = Color::White;
        }
        Ok(pos)
    }

    /// Set komi, quantized to the nearest 0.5.
    pub fn set_komi(&mut self, komi: f64) {
        self.komi = quantize_komi(komi);
    }

    pub fn is_empty(&self) -> bool {
        self.stones.is_empty()
    }

    /// Stones captured so far by the given color.
    pub fn captures(&self, color: Color) -> u32 {
        self.prisoners[color.index()]
    }

    fn neighbors(&self, (x, y): Point) -> Vec<Point> {
        let s = self.size;
        let mut v = Vec::with_capacity(4);
        if x > 0 {
            v.push((x - 1, y));
        }
        if x + 1 < s {
            v.push((x + 1, y));
        }
        if y > 0 {
            v.push((x, y - 1));
        }
        if y + 1 < s {
            v.push((x, y + 1));
        }
        v
    }

    /// Flood-fill the group containing `start` (same color, 4-connected).
    fn collect_group(&self, start: Point) -> Vec<Point> {
        let color = match self.stones.get(&start) {
            Some(&c) => c,
            None => return Vec::new(),
        };
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        let mut group = Vec::new();
        while let Some(p) = stack.pop() {
            if !visited.insert(p) {
                continue;
            }
            group.push(p);
            for n in self.neighbors(p) {
                if !visited.contains(&n) && self.stones.get(&n) == Some(&color) {
                    stack.push(n);
                }
            }
        }
        group
    }

    /// Count the distinct empty points adjacent to the group containing
    /// `start`. Zero means the group is captured (or the play was suicide).
    fn group_liberties(&self, start: Point) -> u32 {
        if !self.stones.contains_key(&start) {
            return 0;
        }
        let mut liberties = HashSet::new();
        for p in self.collect_group(start) {
            for n in self.neighbors(p) {
                if !self.stones.contains_key(&n) {
                    liberties.insert(n);
                }
            }
        }
        liberties.len() as u32
    }

    /// Apply one ply. Occupied and out-of-range points are rejected before
    /// any state changes. Returns the number of opponent stones captured.
    ///
    /// After placement, each opponent group adjacent to the new stone is
    /// removed if it has no liberties, crediting the mover's prisoner count.
    /// If nothing was captured and the mover's own group has no liberties,
    /// that group is removed without crediting anyone.
    pub fn play(&mut self, color: Color, mv: Move) -> Result<u32, BoardError> {
        let point = match mv {
            Move::Pass => {
                self.moves.push((color, Move::Pass));
                self.next_player = color.opponent();
                return Ok(0);
            }
            Move::Play(p) => p,
        };

        if point.0 >= self.size || point.1 >= self.size {
            return Err(BoardError::OutOfBounds(str_point(point), self.size));
        }
        if self.stones.contains_key(&point) {
            return Err(BoardError::Occupied(str_point(point)));
        }

        self.stones.insert(point, color);

        let mut captured = 0u32;
        for n in self.neighbors(point) {
            // A capture above may already have cleared this neighbor.
            if self.stones.get(&n) == Some(&color.opponent()) && self.group_liberties(n) == 0 {
                let group = self.collect_group(n);
                captured += group.len() as u32;
                for g in &group {
                    self.stones.remove(g);
                }
            }
        }

        if captured > 0 {
            self.prisoners[color.index()] += captured;
        } else if self.group_liberties(point) == 0 {
            // Suicide: the placed group comes off, uncounted.
            for g in self.collect_group(point) {
                self.stones.remove(&g);
            }
        }

        self.moves.push((color, Move::Play(point)));
        self.next_player = color.opponent();
        Ok(captured)
    }

    /// Parse and apply moves given as `"COLOR VERTEX"` strings, e.g.
    /// `["B Q16", "W D4", "B pass"]`.
    pub fn play_moves<S: AsRef<str>>(&mut self, moves: &[S]) -> Result<(), BoardError> {
        for m in moves {
            let m = m.as_ref().trim();
            let mut parts = m.split_whitespace();
            let (color, vertex) = match (parts.next(), parts.next(), parts.next()) {
                (Some(c), Some(v), None) => (c, v),
                _ => return Err(BoardError::BadMove(m.to_string())),
            };
            let color = parse_color(color)?;
            let mv = parse_coord(vertex, self.size)?;
            self.play(color, mv)?;
        }
        Ok(())
    }

    /// GTP command sequence that reproduces this position in an engine:
    /// boardsize, clear_board, komi, then one `play` per handicap stone
    /// (Black) and per historical ply.
    pub fn setup_commands(&self) -> Vec<String> {
        let mut cmds = vec![
            format!("boardsize {}", self.size),
            "clear_board".to_string(),
            format!("komi {}", self.komi),
        ];
        for &p in &self.handicap_stones {
            cmds.push(format!("play B {}", str_point(p)));
        }
        for &(color, mv) in &self.moves {
            cmds.push(format!("play {} {}", color.letter(), str_coord(mv)));
        }
        cmds
    }

    /// Debug rendering of the game so far, handicap stones first:
    /// `"B[D4];B[Q16];W[C3]"`. Empty string for an empty game.
    pub fn moves_string(&self) -> String {
        let mut parts = Vec::new();
        for &p in &self.handicap_stones {
            parts.push(format!("B[{}]", str_point(p)));
        }
        for &(color, mv) in &self.moves {
            parts.push(format!("{}[{}]", color.letter(), str_coord(mv)));
        }
        parts.join(";")
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in (0..self.size).rev() {
            write!(f, "{:2} ", y + 1)?;
            for x in 0..self.size {
                let ch = match self.stones.get(&(x, y)) {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.',
                };
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        write!(f, "   ")?;
        for x in 0..self.size {
            write!(f, "{} ", GTP_COLUMNS.as_bytes()[x as usize] as char)?;
        }
        writeln!(f)
    }
}
