use crate::device::Backend;
use crate::semblance::SemblanceCell;
use crate::utils::{try_alloc, DynError};

/// Winning parameter of one `(cdp, t0)` sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BestFit {
    pub par_id: usize,
    pub semblance: f32,
    pub stack: f32,
}

/// Strict-greater scan: ties keep the earliest parameter, an all-zero row
/// yields parameter 0 with zero semblance.
pub fn pick_best(row: &[SemblanceCell]) -> BestFit {
    let mut best = BestFit::default();
    for (par_id, cell) in row.iter().enumerate() {
        if cell.semblance > best.semblance {
            best.par_id = par_id;
            best.semblance = cell.semblance;
        }
    }
    best.stack = row.get(best.par_id).map_or(0.0, |c| c.stack);
    best
}

/// Collapse `cells[t0 * npar .. (t0 + 1) * npar]` into `out[t0]` for every sample.
pub fn reduce_semblances(
    cells: &[SemblanceCell],
    npar: usize,
    backend: Backend,
    out: &mut [BestFit],
) {
    debug_assert!(cells.len() >= out.len() * npar);
    backend.for_each_indexed(out, |t0, best| {
        *best = pick_best(&cells[t0 * npar..(t0 + 1) * npar]);
    });
}

/// Run-long result volumes, indexed `cdp_id * ns + t0`.
#[derive(Clone, Debug)]
pub struct OutputVolumes {
    ns: usize,
    fits: Vec<BestFit>,
}

impl OutputVolumes {
    pub fn new(ncdps: usize, ns: usize) -> Result<Self, DynError> {
        let len = ncdps
            .checked_mul(ns)
            .ok_or("Output volume size overflows usize")?;
        Ok(Self {
            ns,
            fits: try_alloc(len, BestFit::default(), "output volumes")?,
        })
    }

    pub fn ncdps(&self) -> usize {
        if self.ns == 0 {
            0
        } else {
            self.fits.len() / self.ns
        }
    }

    pub fn cdp(&self, cdp_id: usize) -> &[BestFit] {
        &self.fits[cdp_id * self.ns..(cdp_id + 1) * self.ns]
    }

    pub fn cdp_mut(&mut self, cdp_id: usize) -> &mut [BestFit] {
        &mut self.fits[cdp_id * self.ns..(cdp_id + 1) * self.ns]
    }
}
