//! Board symmetries and Zobrist position fingerprints.
//!
//! A square Go board has eight symmetries (four rotations, four
//! reflections). Positions that differ only by one of these transforms are
//! the same position for analysis purposes, so cache lookups go through a
//! canonical form: the transform whose Zobrist hash is numerically smallest.
//!
//! Hashes mix per-stone keys with a side-to-move key, a board-size salt, and
//! a komi bucket key, all drawn from a fixed-seed PRNG so every process
//! computes identical fingerprints.

use crate::board::{parse_coord, quantize_komi, str_coord, BoardError, Color, Move, Point, Position};

/// Seed for the Zobrist key tables. Changing it invalidates every stored
/// cache entry, so it is part of the on-disk format in all but name.
const ZOBRIST_SEED: u64 = 42;

/// Komi keys cover -100.0..=+100.0 in 0.5 steps (401 buckets); komi outside
/// the range contributes nothing to the hash.
const KOMI_BUCKETS: usize = 401;

const MAX_SIZE: usize = 19;

/// One of the eight symmetries of a square board. Declaration order is the
/// tie-break order used by [`ZobristTable::canonicalize`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    FlipDiagonal,
    FlipAntidiagonal,
}

impl Transform {
    pub const ALL: [Transform; 8] = [
        Transform::Identity,
        Transform::Rotate90,
        Transform::Rotate180,
        Transform::Rotate270,
        Transform::FlipHorizontal,
        Transform::FlipVertical,
        Transform::FlipDiagonal,
        Transform::FlipAntidiagonal,
    ];

    /// Map a point to its image under this transform, on a board of the
    /// given size.
    pub fn apply(self, (x, y): Point, size: u8) -> Point {
        let n = size - 1;
        match self {
            Transform::Identity => (x, y),
            Transform::Rotate90 => (y, n - x),
            Transform::Rotate180 => (n - x, n - y),
            Transform::Rotate270 => (n - y, x),
            Transform::FlipHorizontal => (n - x, y),
            Transform::FlipVertical => (x, n - y),
            Transform::FlipDiagonal => (y, x),
            Transform::FlipAntidiagonal => (n - y, n - x),
        }
    }

    /// Map a move; passes are unchanged.
    pub fn apply_move(self, mv: Move, size: u8) -> Move {
        match mv {
            Move::Play(p) => Move::Play(self.apply(p, size)),
            Move::Pass => Move::Pass,
        }
    }

    /// The transform that undoes this one. Only the quarter rotations are
    /// not their own inverse.
    pub fn inverse(self) -> Transform {
        match self {
            Transform::Rotate90 => Transform::Rotate270,
            Transform::Rotate270 => Transform::Rotate90,
            other => other,
        }
    }
}

/// Transform a GTP vertex string; `pass` maps to itself.
pub fn transform_gtp(vertex: &str, t: Transform, size: u8) -> Result<String, BoardError> {
    let mv = parse_coord(vertex, size)?;
    Ok(str_coord(t.apply_move(mv, size)))
}

/// The non-identity transforms that map `pos` onto itself (same stones,
/// same colors). Empty boards return all seven.
pub fn self_symmetries(pos: &Position) -> Vec<Transform> {
    Transform::ALL[1..]
        .iter()
        .copied()
        .filter(|t| {
            pos.stones
                .iter()
                .all(|(&p, &c)| pos.stones.get(&t.apply(p, pos.size)) == Some(&c))
        })
        .collect()
}

/// Zobrist key tables, generated once from [`ZOBRIST_SEED`].
pub struct ZobristTable {
    stone_keys: [Box<[u64; MAX_SIZE * MAX_SIZE]>; 2],
    white_to_move: u64,
    size_salts: [u64; 3],
    komi_keys: Box<[u64; KOMI_BUCKETS]>,
}

impl ZobristTable {
    pub fn new() -> Self {
        let mut rng = fastrand::Rng::with_seed(ZOBRIST_SEED);
        // Generation order is fixed: stone keys (Black then White, row-major
        // over the full 19x19 grid), side-to-move, size salts, komi buckets.
        let mut stone_keys = [
            Box::new([0u64; MAX_SIZE * MAX_SIZE]),
            Box::new([0u64; MAX_SIZE * MAX_SIZE]),
        ];
        for keys in stone_keys.iter_mut() {
            for key in keys.iter_mut() {
                *key = rng.u64(..);
            }
        }
        let white_to_move = rng.u64(..);
        let mut size_salts = [0u64; 3];
        for salt in size_salts.iter_mut() {
            *salt = rng.u64(..);
        }
        let mut komi_keys = Box::new([0u64; KOMI_BUCKETS]);
        for key in komi_keys.iter_mut() {
            *key = rng.u64(..);
        }
        ZobristTable {
            stone_keys,
            white_to_move,
            size_salts,
            komi_keys,
        }
    }

    fn size_salt(&self, size: u8) -> u64 {
        match size {
            9 => self.size_salts[0],
            13 => self.size_salts[1],
            19 => self.size_salts[2],
            // Position construction validates the size.
            _ => 0,
        }
    }

    fn komi_key(&self, komi: f64) -> u64 {
        let half_points = (quantize_komi(komi) * 2.0) as i32;
        if !(-200..=200).contains(&half_points) {
            // 0 is the XOR identity: no bucket, no komi term.
            return 0;
        }
        self.komi_keys[(half_points + 200) as usize]
    }

    fn stone_key(&self, color: Color, (x, y): Point) -> u64 {
        self.stone_keys[color.index()][y as usize * MAX_SIZE + x as usize]
    }

    /// Hash the position as it stands.
    pub fn hash(&self, pos: &Position) -> u64 {
        self.hash_with_transform(pos, Transform::Identity)
    }

    /// Hash the position as it would look after applying `t` to every stone.
    /// Komi, size, and side to move are transform-invariant.
    pub fn hash_with_transform(&self, pos: &Position, t: Transform) -> u64 {
        let mut h = self.size_salt(pos.size) ^ self.komi_key(pos.komi);
        for (&p, &color) in &pos.stones {
            h ^= self.stone_key(color, t.apply(p, pos.size));
        }
        if pos.next_player == Color::White {
            h ^= self.white_to_move;
        }
        h
    }

    /// The canonical fingerprint: the smallest hash over all eight
    /// transforms, together with the transform that produced it. Ties keep
    /// the earliest transform in [`Transform::ALL`] order, so the result is
    /// deterministic even for self-symmetric positions.
    pub fn canonicalize(&self, pos: &Position) -> (u64, Transform) {
        let mut best_hash = self.hash_with_transform(pos, Transform::Identity);
        let mut best_t = Transform::Identity;
        for &t in &Transform::ALL[1..] {
            let h = self.hash_with_transform(pos, t);
            if h < best_hash {
                best_hash = h;
                best_t = t;
            }
        }
        (best_hash, best_t)
    }
}

impl Default for ZobristTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a hash the way the cache stores it: 16 lowercase hex digits.
pub fn hash_hex(hash: u64) -> String {
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformed(pos: &Position, t: Transform) -> Position {
        let mut out = Position::new(pos.size).unwrap();
        out.komi = pos.komi;
        out.next_player = pos.next_player;
        for (&p, &c) in &pos.stones {
            out.stones.insert(t.apply(p, pos.size), c);
        }
        out
    }

    fn position_with(moves: &[&str]) -> Position {
        let mut pos = Position::new(19).unwrap();
        pos.play_moves(moves).unwrap();
        pos
    }

    #[test]
    fn test_transform_formulas() {
        // Corner (0, 0) on 19x19 under each transform.
        let cases = [
            (Transform::Identity, (0, 0)),
            (Transform::Rotate90, (0, 18)),
            (Transform::Rotate180, (18, 18)),
            (Transform::Rotate270, (18, 0)),
            (Transform::FlipHorizontal, (18, 0)),
            (Transform::FlipVertical, (0, 18)),
            (Transform::FlipDiagonal, (0, 0)),
            (Transform::FlipAntidiagonal, (18, 18)),
        ];
        for (t, want) in cases {
            assert_eq!(t.apply((0, 0), 19), want, "{t:?}");
        }
    }

    #[test]
    fn test_inverse_round_trips_every_point() {
        for t in Transform::ALL {
            assert_eq!(t.inverse().inverse(), t);
            for x in 0..9 {
                for y in 0..9 {
                    let p = (x, y);
                    assert_eq!(
                        t.inverse().apply(t.apply(p, 9), 9),
                        p,
                        "{t:?} inverse failed at {p:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_two_quarter_turns_make_a_half_turn() {
        for x in 0..13 {
            for y in 0..13 {
                let once = Transform::Rotate90.apply((x, y), 13);
                let twice = Transform::Rotate90.apply(once, 13);
                assert_eq!(twice, Transform::Rotate180.apply((x, y), 13));
            }
        }
    }

    #[test]
    fn test_transform_gtp() {
        assert_eq!(transform_gtp("Q16", Transform::Rotate180, 19).unwrap(), "D4");
        assert_eq!(transform_gtp("pass", Transform::Rotate90, 19).unwrap(), "pass");
        assert_eq!(
            transform_gtp("E5", Transform::FlipDiagonal, 9).unwrap(),
            "E5",
            "center point is fixed under every transform"
        );
        assert!(transform_gtp("Z9", Transform::Identity, 19).is_err());
    }

    #[test]
    fn test_hash_is_deterministic_across_tables() {
        let pos = position_with(&["B Q16", "W D4"]);
        let a = ZobristTable::new().hash(&pos);
        let b = ZobristTable::new().hash(&pos);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_sensitive_to_each_component() {
        let table = ZobristTable::new();
        let pos = position_with(&["B Q16"]);

        let mut other_komi = pos.clone();
        other_komi.set_komi(0.5);
        assert_ne!(table.hash(&pos), table.hash(&other_komi));

        let mut other_turn = pos.clone();
        other_turn.next_player = Color::Black;
        assert_ne!(table.hash(&pos), table.hash(&other_turn));

        let empty9 = Position::new(9).unwrap();
        let empty19 = Position::new(19).unwrap();
        assert_ne!(table.hash(&empty9), table.hash(&empty19));

        let mut recolored = pos.clone();
        for c in recolored.stones.values_mut() {
            *c = c.opponent();
        }
        assert_ne!(table.hash(&pos), table.hash(&recolored));
    }

    #[test]
    fn test_canonical_hash_invariant_under_transforms() {
        let table = ZobristTable::new();
        let pos = position_with(&["B Q16", "W D4", "B C16"]);
        let (canonical, _) = table.canonicalize(&pos);
        for t in Transform::ALL {
            let (h, _) = table.canonicalize(&transformed(&pos, t));
            assert_eq!(h, canonical, "canonical hash changed under {t:?}");
        }
    }

    #[test]
    fn test_canonicalize_transform_maps_onto_canonical_orientation() {
        let table = ZobristTable::new();
        let pos = position_with(&["B Q16", "W D4", "B C16"]);
        let (canonical, t) = table.canonicalize(&pos);
        assert_eq!(table.hash(&transformed(&pos, t)), canonical);
    }

    #[test]
    fn test_canonicalize_empty_board_is_identity() {
        // All eight hashes coincide on an empty board; the tie-break picks
        // the first transform in declaration order.
        let table = ZobristTable::new();
        let pos = Position::new(19).unwrap();
        let (h, t) = table.canonicalize(&pos);
        assert_eq!(t, Transform::Identity);
        assert_eq!(h, table.hash(&pos));
    }

    #[test]
    fn test_self_symmetries() {
        let empty = Position::new(9).unwrap();
        assert_eq!(self_symmetries(&empty).len(), 7);

        let mut center = Position::new(9).unwrap();
        center.play_moves(&["B E5"]).unwrap();
        assert_eq!(self_symmetries(&center).len(), 7);

        let mut diagonal = Position::new(19).unwrap();
        diagonal.play_moves(&["B D4"]).unwrap();
        assert_eq!(self_symmetries(&diagonal), vec![Transform::FlipDiagonal]);

        let mut askew = Position::new(19).unwrap();
        askew.play_moves(&["B Q16", "W D4", "B C16"]).unwrap();
        assert!(self_symmetries(&askew).is_empty());
    }

    #[test]
    fn test_self_symmetry_requires_matching_colors() {
        // C17 and R3 mirror each other across the long diagonal. The flip
        // is a self-symmetry only when both stones share a color.
        let mut same = Position::new(19).unwrap();
        same.play_moves(&["B C17", "B R3"]).unwrap();
        assert!(self_symmetries(&same).contains(&Transform::FlipDiagonal));

        let mut mixed = Position::new(19).unwrap();
        mixed.play_moves(&["B C17", "W R3"]).unwrap();
        assert!(!self_symmetries(&mixed).contains(&Transform::FlipDiagonal));
    }

    #[test]
    fn test_komi_buckets_quantize_and_skip_out_of_range() {
        let table = ZobristTable::new();
        let mut a = Position::new(19).unwrap();
        let mut b = Position::new(19).unwrap();

        a.set_komi(6.5);
        b.komi = 6.5;
        assert_eq!(table.hash(&a), table.hash(&b));

        // Past the last bucket the komi term disappears, so an oversized
        // komi hashes unlike the edge bucket and like every other
        // out-of-range value.
        a.komi = 150.0;
        b.komi = 100.0;
        assert_ne!(table.hash(&a), table.hash(&b), "150 must not collapse onto 100");
        b.komi = -3000.0;
        assert_eq!(table.hash(&a), table.hash(&b));
    }

    #[test]
    fn test_hash_hex_is_sixteen_digits() {
        assert_eq!(hash_hex(0), "0000000000000000");
        assert_eq!(hash_hex(u64::MAX), "ffffffffffffffff");
        assert_eq!(hash_hex(0xdead_beef), "00000000deadbeef");
    }
}
