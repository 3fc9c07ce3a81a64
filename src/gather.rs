use std::ops::Range;

use crate::geom::{trace_point, Coordinates};
use crate::su::SuTrace;
use crate::utils::{try_alloc, DynError};

/// Limits on which neighbouring CDPs join a gather's aperture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApertureSpec {
    /// Maximum distance between reference midpoints (scaled coordinate units).
    pub radius: f64,
    /// Maximum traces staged for one CDP. The CDP itself is always included.
    pub max_traces: Option<usize>,
}

/// Inclusive range of CDP ids staged together with one CDP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aperture {
    pub first: usize,
    pub last: usize,
}

impl Aperture {
    pub fn cdps(&self) -> usize {
        self.last - self.first + 1
    }
}

/// Input traces grouped by CDP, with per-CDP aperture windows.
#[derive(Debug)]
pub struct GatherSet {
    traces: Vec<SuTrace>,
    ntraces_by_cdp_id: Vec<usize>,
    apertures: Vec<Aperture>,
}

impl GatherSet {
    pub fn build(mut traces: Vec<SuTrace>, spec: ApertureSpec) -> Result<Self, DynError> {
        let Some(first) = traces.first() else {
            return Err("Input contains no traces".into());
        };
        if first.ns() == 0 {
            return Err("Input traces have zero samples".into());
        }
        if first.dt() == 0 {
            return Err("Input traces have a zero sample interval".into());
        }
        if !(spec.radius >= 0.0) {
            return Err("Aperture radius must be non-negative".into());
        }

        traces.sort_by_key(|t| t.cdp());
        let mut ntraces_by_cdp_id = Vec::new();
        for idx in 1..traces.len() {
            if traces[idx].cdp() != traces[idx - 1].cdp() {
                ntraces_by_cdp_id.push(idx);
            }
        }
        ntraces_by_cdp_id.push(traces.len());

        let references: Vec<(f64, f64)> = (0..ntraces_by_cdp_id.len())
            .map(|cdp_id| {
                let t = &traces[trace_start(&ntraces_by_cdp_id, cdp_id)];
                let p = trace_point(
                    t.gx() as f32,
                    t.gy() as f32,
                    t.sx() as f32,
                    t.sy() as f32,
                    t.scalco() as f32,
                );
                (p.mx as f64, p.my as f64)
            })
            .collect();

        let apertures = (0..ntraces_by_cdp_id.len())
            .map(|cdp_id| grow_aperture(cdp_id, &references, &ntraces_by_cdp_id, spec))
            .collect();

        Ok(Self {
            traces,
            ntraces_by_cdp_id,
            apertures,
        })
    }

    pub fn ncdps(&self) -> usize {
        self.ntraces_by_cdp_id.len()
    }

    /// Flatten into run-long arrays. Also returns each CDP's first trace, which
    /// serves as the header template for derived output traces.
    pub fn linearize(self) -> Result<(Dataset, Vec<SuTrace>), DynError> {
        let ns = self.traces[0].ns() as usize;
        let dt = self.traces[0].dt() as f32 / 1_000_000.0;
        let ttraces = self.traces.len();
        let total_samples = ttraces
            .checked_mul(ns)
            .ok_or("Sample volume size overflows usize")?;

        let mut samples = try_alloc(total_samples, 0.0f32, "input samples")?;
        let mut gx = try_alloc(ttraces, 0.0f32, "gx")?;
        let mut gy = try_alloc(ttraces, 0.0f32, "gy")?;
        let mut sx = try_alloc(ttraces, 0.0f32, "sx")?;
        let mut sy = try_alloc(ttraces, 0.0f32, "sy")?;
        let mut scalco = try_alloc(ttraces, 0.0f32, "scalco")?;
        for (i, trace) in self.traces.iter().enumerate() {
            samples[i * ns..(i + 1) * ns].copy_from_slice(&trace.data);
            gx[i] = trace.gx() as f32;
            gy[i] = trace.gy() as f32;
            sx[i] = trace.sx() as f32;
            sy[i] = trace.sy() as f32;
            scalco[i] = trace.scalco() as f32;
        }

        let templates = (0..self.ncdps())
            .map(|cdp_id| self.traces[trace_start(&self.ntraces_by_cdp_id, cdp_id)].clone())
            .collect();

        Ok((
            Dataset {
                samples,
                gx,
                gy,
                sx,
                sy,
                scalco,
                ntraces_by_cdp_id: self.ntraces_by_cdp_id,
                apertures: self.apertures,
                ns,
                dt,
            },
            templates,
        ))
    }
}

fn trace_start(ntraces_by_cdp_id: &[usize], cdp_id: usize) -> usize {
    if cdp_id > 0 {
        ntraces_by_cdp_id[cdp_id - 1]
    } else {
        0
    }
}

fn grow_aperture(
    center: usize,
    references: &[(f64, f64)],
    ntraces_by_cdp_id: &[usize],
    spec: ApertureSpec,
) -> Aperture {
    let fold = |cdp: usize| ntraces_by_cdp_id[cdp] - trace_start(ntraces_by_cdp_id, cdp);
    let distance = |cdp: usize| {
        let dx = references[cdp].0 - references[center].0;
        let dy = references[cdp].1 - references[center].1;
        (dx * dx + dy * dy).sqrt()
    };

    let mut aperture = Aperture { first: center, last: center };
    let mut staged = fold(center);
    let (mut left_open, mut right_open) = (true, true);
    loop {
        let left = (left_open && aperture.first > 0).then(|| aperture.first - 1);
        let right = (right_open && aperture.last + 1 < references.len()).then(|| aperture.last + 1);
        let candidate = match (left, right) {
            (None, None) => break,
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (Some(l), Some(r)) => {
                if distance(l) <= distance(r) {
                    l
                } else {
                    r
                }
            }
        };
        let fits = spec
            .max_traces
            .map_or(true, |cap| staged + fold(candidate) <= cap);
        let is_left = candidate < aperture.first;
        if distance(candidate) <= spec.radius && fits {
            staged += fold(candidate);
            if is_left {
                aperture.first = candidate;
            } else {
                aperture.last = candidate;
            }
        } else if is_left {
            left_open = false;
        } else {
            right_open = false;
        }
    }
    aperture
}

/// Linearised input: every array is resident for the whole run.
#[derive(Clone, Debug)]
pub struct Dataset {
    /// `ttraces * ns` samples, trace-major, traces ordered by CDP.
    pub samples: Vec<f32>,
    pub gx: Vec<f32>,
    pub gy: Vec<f32>,
    pub sx: Vec<f32>,
    pub sy: Vec<f32>,
    pub scalco: Vec<f32>,
    /// Exclusive end trace id of each CDP.
    pub ntraces_by_cdp_id: Vec<usize>,
    pub apertures: Vec<Aperture>,
    pub ns: usize,
    /// Sample interval in seconds.
    pub dt: f32,
}

impl Dataset {
    pub fn ncdps(&self) -> usize {
        self.ntraces_by_cdp_id.len()
    }

    pub fn ttraces(&self) -> usize {
        self.gx.len()
    }

    pub fn coordinates(&self) -> Coordinates<'_> {
        Coordinates {
            gx: &self.gx,
            gy: &self.gy,
            sx: &self.sx,
            sy: &self.sy,
            scalco: &self.scalco,
        }
    }

    pub fn trace_range(&self, cdp_id: usize) -> Range<usize> {
        trace_start(&self.ntraces_by_cdp_id, cdp_id)..self.ntraces_by_cdp_id[cdp_id]
    }

    /// Trace ids staged for `cdp_id`: contiguous because apertures are contiguous
    /// CDP ranges and traces are stored in CDP order.
    pub fn window_range(&self, cdp_id: usize) -> Range<usize> {
        let aperture = self.apertures[cdp_id];
        self.trace_range(aperture.first).start..self.trace_range(aperture.last).end
    }

    /// Maximum fold over all CDPs.
    pub fn ntrs(&self) -> usize {
        (0..self.ncdps()).map(|c| self.trace_range(c).len()).max().unwrap_or(0)
    }

    /// Maximum number of CDPs in one aperture.
    pub fn max_gather(&self) -> usize {
        self.apertures.iter().map(Aperture::cdps).max().unwrap_or(0)
    }

    /// Per-slot staging capacity in traces.
    pub fn max_window_traces(&self) -> usize {
        (0..self.ncdps()).map(|c| self.window_range(c).len()).max().unwrap_or(0)
    }
}
