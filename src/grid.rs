use simulation_common::{BoundaryPolicy, Coord, Direction, SimError, SimParams, SimResult};

/// Where a random-walk step ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Cell(usize),
    /// Left the lattice through an absorbing boundary.
    Absorbed,
}

/// Fixed-size N-dimensional lattice. Cells are addressed by a dense row-major
/// index with the first axis varying fastest.
#[derive(Debug, Clone)]
pub struct Grid {
    dims: Vec<u32>,
    strides: Vec<usize>,
    num_cells: usize,
    boundary: BoundaryPolicy,
}

impl Grid {
    pub fn new(dims: &[u32], boundary: BoundaryPolicy) -> SimResult<Self> {
        if dims.is_empty() || dims.iter().any(|&d| d == 0) {
            return Err(SimError::config(format!("invalid grid dimensions {:?}", dims)));
        }
        let mut strides = Vec::with_capacity(dims.len());
        let mut stride = 1usize;
        for &d in dims {
            strides.push(stride);
            stride = stride
                .checked_mul(d as usize)
                .ok_or_else(|| SimError::config("grid is too large"))?;
        }
        Ok(Self {
            dims: dims.to_vec(),
            strides,
            num_cells: stride,
            boundary,
        })
    }

    pub fn from_params(params: &SimParams) -> SimResult<Self> {
        Self::new(&params.dims, params.boundary)
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }

    /// Dense index of the cell at `coord`, or `None` if it lies outside the grid.
    pub fn cell_at(&self, coord: &Coord) -> Option<usize> {
        if !coord.in_bounds(&self.dims) {
            return None;
        }
        Some(
            self.strides
                .iter()
                .enumerate()
                .map(|(axis, &s)| coord.axis(axis) as usize * s)
                .sum(),
        )
    }

    pub fn coord_of(&self, cell: usize) -> Coord {
        Coord::new((0..self.rank()).map(|axis| self.component(cell, axis)).collect())
    }

    #[inline(always)]
    fn component(&self, cell: usize, axis: usize) -> i64 {
        ((cell / self.strides[axis]) % self.dims[axis] as usize) as i64
    }

    /// Applies one random-walk step from `cell`, resolving the boundary policy.
    pub fn step(&self, cell: usize, direction: Direction) -> Destination {
        self.step_with(cell, direction, self.boundary)
    }

    /// Like [`step`](Self::step), but an absorbing edge reflects instead. Used for
    /// DOM transport, which must never lose mass.
    pub fn step_conserving(&self, cell: usize, direction: Direction) -> usize {
        let policy = match self.boundary {
            BoundaryPolicy::Absorbing => BoundaryPolicy::Reflective,
            other => other,
        };
        match self.step_with(cell, direction, policy) {
            Destination::Cell(c) => c,
            Destination::Absorbed => cell,
        }
    }

    fn step_with(&self, cell: usize, direction: Direction, policy: BoundaryPolicy) -> Destination {
        let (axis, forward) = match direction {
            Direction::Rest => return Destination::Cell(cell),
            Direction::Step { axis, forward } => (axis, forward),
        };
        let size = self.dims[axis] as i64;
        let current = self.component(cell, axis);
        let target = if forward { current + 1 } else { current - 1 };

        let resolved = if (0..size).contains(&target) {
            target
        } else {
            match policy {
                BoundaryPolicy::Periodic => target.rem_euclid(size),
                BoundaryPolicy::Reflective => reflect(target, size),
                BoundaryPolicy::Absorbing => return Destination::Absorbed,
            }
        };

        let stride = self.strides[axis] as i64;
        Destination::Cell((cell as i64 + (resolved - current) * stride) as usize)
    }
}

/// Mirrors an out-of-range component back into `0..size` (-1 -> 1, size -> size - 2).
#[inline(always)]
fn reflect(target: i64, size: i64) -> i64 {
    if size <= 1 {
        return 0;
    }
    let mirrored = if target < 0 { -target } else { 2 * (size - 1) - target };
    mirrored.clamp(0, size - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT: Direction = Direction::Step { axis: 0, forward: false };
    const RIGHT: Direction = Direction::Step { axis: 0, forward: true };
    const DOWN: Direction = Direction::Step { axis: 1, forward: false };
    const UP: Direction = Direction::Step { axis: 1, forward: true };

    #[test]
    fn coordinates_round_trip_through_cell_index() {
        let grid = Grid::new(&[4, 3, 2], BoundaryPolicy::Periodic).unwrap();
        assert_eq!(grid.num_cells(), 24);
        for cell in 0..grid.num_cells() {
            assert_eq!(grid.cell_at(&grid.coord_of(cell)), Some(cell));
        }
        assert_eq!(grid.cell_at(&Coord::new(vec![4, 0, 0])), None);
        assert_eq!(grid.cell_at(&Coord::xy(1, 1)), None);
    }

    #[test]
    fn periodic_boundary_wraps() {
        let grid = Grid::new(&[10, 10], BoundaryPolicy::Periodic).unwrap();
        let origin = grid.cell_at(&Coord::xy(0, 0)).unwrap();
        let wrapped = grid.step(origin, LEFT);
        assert_eq!(wrapped, Destination::Cell(grid.cell_at(&Coord::xy(9, 0)).unwrap()));
        let top = grid.cell_at(&Coord::xy(3, 9)).unwrap();
        assert_eq!(grid.step(top, UP), Destination::Cell(grid.cell_at(&Coord::xy(3, 0)).unwrap()));
    }

    #[test]
    fn reflective_boundary_mirrors() {
        let grid = Grid::new(&[10, 10], BoundaryPolicy::Reflective).unwrap();
        let origin = grid.cell_at(&Coord::xy(0, 4)).unwrap();
        assert_eq!(grid.step(origin, LEFT), Destination::Cell(grid.cell_at(&Coord::xy(1, 4)).unwrap()));
        let edge = grid.cell_at(&Coord::xy(9, 0)).unwrap();
        assert_eq!(grid.step(edge, RIGHT), Destination::Cell(grid.cell_at(&Coord::xy(8, 0)).unwrap()));
        assert_eq!(grid.step(edge, DOWN), Destination::Cell(grid.cell_at(&Coord::xy(9, 1)).unwrap()));
    }

    #[test]
    fn reflective_single_cell_axis_stays_put() {
        let grid = Grid::new(&[5, 1], BoundaryPolicy::Reflective).unwrap();
        let cell = grid.cell_at(&Coord::xy(2, 0)).unwrap();
        assert_eq!(grid.step(cell, UP), Destination::Cell(cell));
    }

    #[test]
    fn absorbing_boundary_removes_but_transport_reflects() {
        let grid = Grid::new(&[3, 3], BoundaryPolicy::Absorbing).unwrap();
        let corner = grid.cell_at(&Coord::xy(0, 0)).unwrap();
        assert_eq!(grid.step(corner, LEFT), Destination::Absorbed);
        assert_eq!(grid.step_conserving(corner, LEFT), grid.cell_at(&Coord::xy(1, 0)).unwrap());
        assert_eq!(grid.step(corner, RIGHT), Destination::Cell(grid.cell_at(&Coord::xy(1, 0)).unwrap()));
    }

    #[test]
    fn rest_does_not_move() {
        let grid = Grid::new(&[3, 3], BoundaryPolicy::Absorbing).unwrap();
        assert_eq!(grid.step(4, Direction::Rest), Destination::Cell(4));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(Grid::new(&[3, 0], BoundaryPolicy::Periodic).is_err());
        assert!(Grid::new(&[], BoundaryPolicy::Periodic).is_err());
    }
}
