use crate::device::Backend;
use crate::utils::{try_alloc, DynError, FACTOR};

/// One discretised model axis: `count` points starting at `start`, spaced by
/// `(end - start) / count`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Axis {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

impl Axis {
    pub fn new(start: f64, end: f64, count: usize) -> Self {
        Self { start, end, count }
    }

    pub fn step(&self) -> f64 {
        (self.end - self.start) * (1.0 / self.count as f64)
    }

    pub fn value(&self, idx: usize) -> f64 {
        self.start + self.step() * idx as f64
    }

    fn scaled(&self, factor: f64) -> Self {
        Self::new(self.start * factor, self.end * factor, self.count)
    }
}

/// Moveout coefficients of one grid point, `c` already in `FACTOR`-scaled units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ModelParams {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

/// The flattened `na × nb × nc` search space.
#[derive(Clone, Debug)]
pub struct ParameterGrid {
    a: Axis,
    b: Axis,
    c: Axis,
    params: Vec<ModelParams>,
}

impl ParameterGrid {
    /// Build the grid from axes given in physical units; `c` is rescaled by `FACTOR`.
    pub fn new(a: Axis, b: Axis, c: Axis, backend: Backend) -> Result<Self, DynError> {
        if a.count == 0 || b.count == 0 || c.count == 0 {
            return Err("Parameter grid axes need at least one point each".into());
        }
        let c = c.scaled(FACTOR as f64);
        let npar = a
            .count
            .checked_mul(b.count)
            .and_then(|ab| ab.checked_mul(c.count))
            .ok_or("Parameter grid size overflows usize")?;
        let mut params = try_alloc(npar, ModelParams::default(), "parameter grid")?;

        let grid = Self { a, b, c, params: Vec::new() };
        backend.for_each_indexed(&mut params, |idx, p| {
            let (ia, ib, ic) = grid.decode(idx);
            debug_assert_eq!(grid.encode(ia, ib, ic), idx);
            *p = ModelParams {
                a: grid.a.value(ia) as f32,
                b: grid.b.value(ib) as f32,
                c: grid.c.value(ic) as f32,
            };
        });
        Ok(Self { params, ..grid })
    }

    pub fn len(&self) -> usize {
        self.a.count * self.b.count * self.c.count
    }

    pub fn params(&self) -> &[ModelParams] {
        &self.params
    }

    #[cfg(test)]
    pub fn get(&self, par_id: usize) -> ModelParams {
        self.params[par_id]
    }

    pub fn encode(&self, ia: usize, ib: usize, ic: usize) -> usize {
        ia * (self.b.count * self.c.count) + ib * self.c.count + ic
    }

    pub fn decode(&self, par_id: usize) -> (usize, usize, usize) {
        let (nb, nc) = (self.b.count, self.c.count);
        (par_id / (nc * nb), (par_id / nc) % nb, par_id % nc)
    }

    /// `(a, b, c)` for emission, with `c` back in physical units.
    pub fn physical(&self, par_id: usize) -> (f64, f64, f64) {
        let (ia, ib, ic) = self.decode(par_id);
        (
            self.a.value(ia),
            self.b.value(ib),
            self.c.value(ic) / FACTOR as f64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Axis, ParameterGrid};
    use crate::device::Backend;
    use crate::utils::FACTOR;
    use proptest::prelude::*;

    fn grid(na: usize, nb: usize, nc: usize) -> ParameterGrid {
        ParameterGrid::new(
            Axis::new(-1.0, 1.0, na),
            Axis::new(0.0, 4.0, nb),
            Axis::new(1e-7, 5e-7, nc),
            Backend::Host,
        )
        .unwrap()
    }

    #[test]
    fn step_excludes_upper_bound() {
        let axis = Axis::new(0.0, 4.0, 4);
        assert_eq!(axis.step(), 1.0);
        assert_eq!(axis.value(3), 3.0);
    }

    #[test]
    fn grid_values_follow_flattened_order() {
        let g = grid(2, 3, 4);
        assert_eq!(g.len(), 24);
        let p = g.get(g.encode(1, 2, 3));
        assert_eq!(p.a, 0.0);
        assert!((p.b - 2.0 * 4.0 / 3.0).abs() < 1e-6);
        let expected_c = (1e-7 + 3.0 * 1e-7) * FACTOR as f64;
        assert!((p.c as f64 - expected_c).abs() < 1e-6);
    }

    #[test]
    fn physical_values_undo_factor_scaling() {
        let g = grid(1, 1, 4);
        let (_, _, c) = g.physical(2);
        assert!((c - 3e-7).abs() < 1e-15);
    }

    #[test]
    fn zero_count_is_rejected() {
        let err = ParameterGrid::new(
            Axis::new(0.0, 1.0, 0),
            Axis::new(0.0, 1.0, 1),
            Axis::new(0.0, 1.0, 1),
            Backend::Host,
        );
        assert!(err.is_err());
    }

    proptest! {
        #[test]
        fn decode_then_encode_is_identity(na in 1usize..9, nb in 1usize..9, nc in 1usize..9) {
            let g = grid(na, nb, nc);
            for idx in 0..g.len() {
                let (ia, ib, ic) = g.decode(idx);
                prop_assert!(ia < na && ib < nb && ic < nc);
                prop_assert_eq!(g.encode(ia, ib, ic), idx);
            }
        }

        #[test]
        fn backends_build_identical_grids(na in 1usize..6, nb in 1usize..6, nc in 1usize..6) {
            let host = grid(na, nb, nc);
            let multi = ParameterGrid::new(
                Axis::new(-1.0, 1.0, na),
                Axis::new(0.0, 4.0, nb),
                Axis::new(1e-7, 5e-7, nc),
                Backend::Multicore,
            )
            .unwrap();
            prop_assert_eq!(host.params(), multi.params());
        }
    }
}
