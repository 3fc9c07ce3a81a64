use log::trace;

use crate::device::Backend;
use crate::gather::Dataset;
use crate::geom::TraceGeometry;
use crate::semblance::SemblanceCell;
use crate::utils::{try_alloc, DynError, KernelClock};

/// Geometry of one staged trace relative to the CDP being processed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TraceAttrs {
    /// Squared midpoint distance to the reference.
    pub m2: f32,
    /// Midpoint distance to the reference.
    pub m: f32,
    /// Absolute halfoffset term, copied from the run-wide geometry.
    pub h: f32,
}

/// Read-only view of a staged gather.
#[derive(Clone, Copy, Debug)]
pub struct StagedGather<'a> {
    pub samples: &'a [f32],
    pub attrs: &'a [TraceAttrs],
    pub ns: usize,
}

impl<'a> StagedGather<'a> {
    pub fn trace(&self, k: usize) -> &'a [f32] {
        &self.samples[k * self.ns..(k + 1) * self.ns]
    }
}

/// One pipeline slot: exclusive staging buffers plus the semblance scratch for
/// the CDP currently assigned to it. Slots never share storage, so a slot can be
/// staged on one thread while another slot is being computed on a different one.
#[derive(Debug)]
pub struct Slot {
    id: usize,
    cdp_id: usize,
    ntraces: usize,
    ns: usize,
    capacity: usize,
    samples: Vec<f32>,
    attrs: Vec<TraceAttrs>,
    cells: Vec<SemblanceCell>,
}

impl Slot {
    pub fn new(id: usize, capacity: usize, ns: usize, npar: usize) -> Result<Self, DynError> {
        let sample_len = capacity
            .checked_mul(ns)
            .ok_or("Staging buffer size overflows usize")?;
        let cell_len = ns
            .checked_mul(npar)
            .ok_or("Semblance buffer size overflows usize")?;
        Ok(Self {
            id,
            cdp_id: 0,
            ntraces: 0,
            ns,
            capacity,
            samples: try_alloc(sample_len, 0.0, &format!("slot {id} samples"))?,
            attrs: try_alloc(capacity, TraceAttrs::default(), &format!("slot {id} geometry"))?,
            cells: try_alloc(cell_len, SemblanceCell::default(), &format!("slot {id} semblances"))?,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cdp_id(&self) -> usize {
        self.cdp_id
    }

    pub fn ntraces(&self) -> usize {
        self.ntraces
    }

    #[cfg(test)]
    pub fn gather(&self) -> StagedGather<'_> {
        StagedGather {
            samples: &self.samples[..self.ntraces * self.ns],
            attrs: &self.attrs[..self.ntraces],
            ns: self.ns,
        }
    }

    pub fn cells(&self) -> &[SemblanceCell] {
        &self.cells
    }

    /// Staged input alongside the writable semblance scratch.
    pub fn split_for_compute(&mut self) -> (StagedGather<'_>, &mut [SemblanceCell]) {
        let gather = StagedGather {
            samples: &self.samples[..self.ntraces * self.ns],
            attrs: &self.attrs[..self.ntraces],
            ns: self.ns,
        };
        (gather, &mut self.cells)
    }
}

/// Copies one CDP's aperture window into a slot and derives its relative geometry.
pub struct GatherStager<'a> {
    dataset: &'a Dataset,
    geometry: &'a TraceGeometry,
    backend: Backend,
}

impl<'a> GatherStager<'a> {
    pub fn new(dataset: &'a Dataset, geometry: &'a TraceGeometry, backend: Backend) -> Self {
        Self { dataset, geometry, backend }
    }

    /// Stage `cdp_id` into `slot` and return the number of staged traces.
    /// `m` and `m2` are recomputed against this CDP's reference midpoint every
    /// time, since a trace can sit in the aperture of several CDPs.
    pub fn stage(
        &self,
        cdp_id: usize,
        slot: &mut Slot,
        clock: &mut KernelClock,
    ) -> Result<usize, DynError> {
        let ns = self.dataset.ns;
        let window = self.dataset.window_range(cdp_id);
        let ntraces = window.len();
        if ntraces > slot.capacity {
            return Err(format!(
                "CDP {cdp_id} stages {ntraces} traces but slot {} holds {}",
                slot.id, slot.capacity
            )
            .into());
        }

        slot.samples[..ntraces * ns]
            .copy_from_slice(&self.dataset.samples[window.start * ns..window.end * ns]);

        let reference = self.geometry.point(self.dataset.trace_range(cdp_id).start);
        let points = &self.geometry.points()[window.clone()];
        let backend = self.backend;
        clock.time(|| {
            backend.for_each_indexed(&mut slot.attrs[..ntraces], |k, attrs| {
                let p = points[k];
                let dx = p.mx - reference.mx;
                let dy = p.my - reference.my;
                let m2 = dx * dx + dy * dy;
                *attrs = TraceAttrs { m2, m: m2.sqrt(), h: p.h0 };
            });
        });

        slot.cdp_id = cdp_id;
        slot.ntraces = ntraces;
        trace!(
            "Staged CDP {cdp_id} into slot {}: traces {}..{}",
            slot.id,
            window.start,
            window.end
        );
        Ok(ntraces)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{GatherStager, Slot, TraceAttrs};
    use crate::device::Backend;
    use crate::gather::{Aperture, Dataset};
    use crate::geom::TraceGeometry;
    use crate::utils::KernelClock;

    /// Three single-trace CDPs on the x axis at midpoints 0, 30 and 100 with
    /// half-offsets 10, 20, 30; CDP 1's aperture spans all three.
    pub(crate) fn three_cdp_line() -> Dataset {
        let ns = 4;
        Dataset {
            samples: (0..3 * ns).map(|v| v as f32).collect(),
            gx: vec![10.0, 50.0, 130.0],
            gy: vec![0.0; 3],
            sx: vec![-10.0, 10.0, 70.0],
            sy: vec![0.0; 3],
            scalco: vec![1.0; 3],
            ntraces_by_cdp_id: vec![1, 2, 3],
            apertures: vec![
                Aperture { first: 0, last: 1 },
                Aperture { first: 0, last: 2 },
                Aperture { first: 1, last: 2 },
            ],
            ns,
            dt: 0.004,
        }
    }

    #[test]
    fn stage_copies_window_and_relative_geometry() {
        let dataset = three_cdp_line();
        let geometry = TraceGeometry::precompute(dataset.coordinates(), Backend::Host).unwrap();
        let stager = GatherStager::new(&dataset, &geometry, Backend::Host);
        let mut slot = Slot::new(0, dataset.max_window_traces(), dataset.ns, 1).unwrap();
        let mut clock = KernelClock::default();

        let staged = stager.stage(1, &mut slot, &mut clock).unwrap();
        assert_eq!(staged, 3);
        assert_eq!(slot.cdp_id(), 1);
        let gather = slot.gather();
        assert_eq!(gather.samples, dataset.samples.as_slice());
        assert_eq!(gather.trace(2), &[8.0, 9.0, 10.0, 11.0]);

        let m: Vec<f32> = gather.attrs.iter().map(|a| a.m).collect();
        assert_eq!(m, vec![30.0, 0.0, 70.0]);
        assert_eq!(gather.attrs[0].m2, 900.0);
        assert_eq!(gather.attrs[2].h, geometry.point(2).h0);
    }

    #[test]
    fn shared_trace_is_rereferenced_per_cdp() {
        let dataset = three_cdp_line();
        let geometry = TraceGeometry::precompute(dataset.coordinates(), Backend::Multicore).unwrap();
        let stager = GatherStager::new(&dataset, &geometry, Backend::Multicore);
        let mut slot = Slot::new(0, dataset.max_window_traces(), dataset.ns, 1).unwrap();
        let mut clock = KernelClock::default();

        stager.stage(0, &mut slot, &mut clock).unwrap();
        let from_cdp0 = slot.gather().attrs[1];
        stager.stage(2, &mut slot, &mut clock).unwrap();
        let from_cdp2 = slot.gather().attrs[0];

        // Trace 1 (midpoint 30) appears in both windows.
        assert_eq!(from_cdp0.m, 30.0);
        assert_eq!(from_cdp2.m, 70.0);
        assert_eq!(from_cdp0.h, from_cdp2.h);
        assert_eq!(slot.ntraces(), 2);
    }

    #[test]
    fn undersized_slot_is_an_error() {
        let dataset = three_cdp_line();
        let geometry = TraceGeometry::precompute(dataset.coordinates(), Backend::Host).unwrap();
        let stager = GatherStager::new(&dataset, &geometry, Backend::Host);
        let mut slot = Slot::new(0, 2, dataset.ns, 1).unwrap();
        assert!(stager.stage(1, &mut slot, &mut KernelClock::default()).is_err());
        assert_eq!(slot.gather().attrs, &[] as &[TraceAttrs]);
    }
}
