use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer coordinate of a lattice cell. One entry per grid axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coord(pub Vec<i64>);

impl Coord {
    /// Creates a coordinate from its per-axis components.
    pub fn new(components: Vec<i64>) -> Self {
        Coord(components)
    }

    /// Convenience constructor for the common 2-D case.
    pub fn xy(x: i64, y: i64) -> Self {
        Coord(vec![x, y])
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Component along `axis`. Panics if `axis >= rank()`.
    pub fn axis(&self, axis: usize) -> i64 {
        self.0[axis]
    }

    /// True if the coordinate has the grid's rank and lies inside `dims`.
    pub fn in_bounds(&self, dims: &[u32]) -> bool {
        self.0.len() == dims.len()
            && self
                .0
                .iter()
                .zip(dims)
                .all(|(&c, &d)| c >= 0 && c < d as i64)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// One random-walk step: ±1 along a single axis, or staying in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Step { axis: usize, forward: bool },
    Rest,
}

impl Direction {
    /// All directions available on a lattice of the given rank, in a fixed order:
    /// for each axis, backward then forward, followed by `Rest` when allowed.
    /// In 2-D this is left, right, down, up.
    pub fn all(rank: usize, allow_rest: bool) -> Vec<Direction> {
        let mut dirs = Vec::with_capacity(2 * rank + 1);
        for axis in 0..rank {
            dirs.push(Direction::Step { axis, forward: false });
            dirs.push(Direction::Step { axis, forward: true });
        }
        if allow_rest {
            dirs.push(Direction::Rest);
        }
        dirs
    }
}
