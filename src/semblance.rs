use crate::args::ConfigError;
use crate::device::Backend;
use crate::grid::ModelParams;
use crate::stage::StagedGather;
use crate::utils::{EPSILON, MAX_WINDOW};

/// Coherence and stacked amplitude of one `(t0, par_id)` work item.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SemblanceCell {
    pub semblance: f32,
    pub stack: f32,
}

/// Interpolation window of `2*tau+1` samples centred on the moveout time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    tau: usize,
}

impl Window {
    pub fn new(tau: usize) -> Result<Self, ConfigError> {
        let width = tau.saturating_mul(2).saturating_add(1);
        if width > MAX_WINDOW {
            return Err(ConfigError::WindowTooWide { tau, width, max: MAX_WINDOW });
        }
        Ok(Self { tau })
    }

    /// Half-window in samples for a half-window of `tau_seconds`. Evaluated in
    /// `f32` against the same `1/dt` the kernel uses, so a `tau` that is a whole
    /// multiple of `dt` keeps its full sample count.
    pub fn from_seconds(tau_seconds: f64, dt: f32) -> Result<Self, ConfigError> {
        let idt = 1.0f32 / dt;
        let samples = (tau_seconds as f32 * idt) as i64;
        Self::new(samples.max(0) as usize)
    }

    pub fn tau(&self) -> usize {
        self.tau
    }

    pub fn width(&self) -> usize {
        2 * self.tau + 1
    }
}

#[derive(Clone, Copy, Debug)]
pub struct KernelParams {
    /// Sample interval in seconds.
    pub dt: f32,
    pub window: Window,
    /// Cells with more out-of-window traces than this are zeroed.
    pub max_invalid: usize,
}

/// Evaluate one `(t0, params)` cell over every staged trace.
pub fn evaluate_cell(
    gather: &StagedGather<'_>,
    t0: usize,
    p: ModelParams,
    kernel: &KernelParams,
) -> SemblanceCell {
    let ns = gather.ns;
    let tau = kernel.window.tau();
    let w = kernel.window.width();
    let idt = 1.0 / kernel.dt;
    let t0_s = kernel.dt * t0 as f32;

    let mut num = [0.0f32; MAX_WINDOW];
    let mut den = 0.0f32;
    let mut linear = 0.0f32;
    let mut valid = 0usize;
    let mut invalid = 0usize;

    for (k, attrs) in gather.attrs.iter().enumerate() {
        let t = t0_s + p.a * attrs.m;
        let t = t * t + p.b * attrs.m2 + p.c * attrs.h;
        // NaN fails this comparison as well.
        if !(t >= 0.0) {
            invalid += 1;
            continue;
        }
        let t = t.sqrt() * idt;
        if !(t < ns as f32) {
            invalid += 1;
            continue;
        }
        let it = t as usize;
        if it < tau || it + tau + 1 >= ns {
            invalid += 1;
            continue;
        }
        let x = t - it as f32;

        let window = &gather.trace(k)[it - tau..=it + tau + 1];
        for (j, pair) in window.windows(2).enumerate() {
            let v = (pair[1] - pair[0]) * x + pair[0];
            num[j] += v;
            den += v * v;
            linear += v;
        }
        valid += 1;
    }

    let squared: f32 = num[..w].iter().map(|v| v * v).sum();
    let mm = valid as f32;
    if den > EPSILON && mm > EPSILON && w as f32 > EPSILON && invalid <= kernel.max_invalid {
        SemblanceCell {
            semblance: squared / (den * mm),
            stack: linear / (w as f32 * mm),
        }
    } else {
        SemblanceCell::default()
    }
}

/// Fill `cells[t0 * npar + par_id]` for the whole `(t0, par_id)` grid of one gather.
pub fn compute_semblances(
    gather: &StagedGather<'_>,
    params: &[ModelParams],
    kernel: &KernelParams,
    backend: Backend,
    cells: &mut [SemblanceCell],
) {
    let npar = params.len();
    debug_assert!(cells.len() >= gather.ns * npar);
    let cells = &mut cells[..gather.ns * npar];
    backend.for_each_indexed(cells, |id, cell| {
        *cell = evaluate_cell(gather, id / npar, params[id % npar], kernel);
    });
}
