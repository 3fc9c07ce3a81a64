use std::fmt;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::args::CrsConfig;
use crate::device::Backend;
use crate::gather::Dataset;
use crate::geom::TraceGeometry;
use crate::grid::ParameterGrid;
use crate::redux::{reduce_semblances, OutputVolumes};
use crate::semblance::{compute_semblances, KernelParams, Window};
use crate::stage::{GatherStager, Slot};
use crate::utils::{DynError, KernelClock};

/// Throughput figures of one run.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    pub total: Duration,
    pub kernel: Duration,
    pub staged_traces: usize,
    pub ns: usize,
    pub npar: usize,
}

impl RunStats {
    fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.staged_traces as f64 / 1e9) * ((self.ns * self.npar) as f64 / secs)
    }

    /// Giga semblance-traces per second over the whole run.
    pub fn gstps(&self) -> f64 {
        self.rate(self.total)
    }

    pub fn kernel_gstps(&self) -> f64 {
        self.rate(self.kernel)
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total Execution Time: {:.6}: Giga-Semblances-Trace/s: {:.6}: Kernel Execution Time: {:.6}: Kernel Giga-Semblances-Trace/s: {:.6}",
            self.total.as_secs_f64(),
            self.gstps(),
            self.kernel.as_secs_f64(),
            self.kernel_gstps()
        )
    }
}

/// Everything one run reads: resident for the whole run and shared read-only
/// by staging and compute.
pub struct CrsContext<'a> {
    dataset: &'a Dataset,
    geometry: TraceGeometry,
    grid: ParameterGrid,
    kernel: KernelParams,
    backend: Backend,
    slots: usize,
}

pub struct CrsOutcome {
    pub grid: ParameterGrid,
    pub volumes: OutputVolumes,
    pub stats: RunStats,
}

impl<'a> CrsContext<'a> {
    pub fn new(
        dataset: &'a Dataset,
        config: &CrsConfig,
        backend: Backend,
        clock: &mut KernelClock,
    ) -> Result<Self, DynError> {
        let window = Window::from_seconds(config.tau, dataset.dt)?;
        let grid = clock.time(|| ParameterGrid::new(config.a, config.b, config.c, backend))?;
        let geometry = clock.time(|| TraceGeometry::precompute(dataset.coordinates(), backend))?;
        Ok(Self {
            dataset,
            geometry,
            grid,
            kernel: KernelParams {
                dt: dataset.dt,
                window,
                max_invalid: config.max_invalid,
            },
            backend,
            slots: config.slots.clamp(1, dataset.ncdps().max(1)),
        })
    }

    fn allocate_slots(&self) -> Result<Vec<Slot>, DynError> {
        let capacity = self.dataset.max_window_traces();
        (0..self.slots)
            .map(|id| Slot::new(id, capacity, self.dataset.ns, self.grid.len()))
            .collect()
    }

    /// Semblance pass and arg-max reduction for the CDP held by `slot`.
    fn compute(&self, slot: &mut Slot, volumes: &mut OutputVolumes, clock: &mut KernelClock) {
        let (gather, cells) = slot.split_for_compute();
        clock.time(|| {
            compute_semblances(&gather, self.grid.params(), &self.kernel, self.backend, cells)
        });
        let out = volumes.cdp_mut(slot.cdp_id());
        clock.time(|| reduce_semblances(slot.cells(), self.grid.len(), self.backend, out));
    }

    fn run_inline(
        &self,
        volumes: &mut OutputVolumes,
        clock: &mut KernelClock,
    ) -> Result<usize, DynError> {
        let ncdps = self.dataset.ncdps();
        let stager = GatherStager::new(self.dataset, &self.geometry, self.backend);
        let mut slots = self.allocate_slots()?;
        let ng = slots.len();
        let mut staged_traces = 0usize;
        for cdp_id in 0..ncdps {
            let slot = &mut slots[cdp_id % ng];
            staged_traces += stager.stage(cdp_id, slot, clock)?;
            self.compute(slot, volumes, clock);
            debug!("Progress: {}/{}", cdp_id + 1, ncdps);
        }
        Ok(staged_traces)
    }

    /// Stage on a helper thread while the calling thread computes. Slots travel
    /// between the two over bounded channels, so at most `ng` CDPs are in flight
    /// and each slot has exactly one owner at any time.
    fn run_pipelined(
        &self,
        volumes: &mut OutputVolumes,
        clock: &mut KernelClock,
    ) -> Result<usize, DynError> {
        let ncdps = self.dataset.ncdps();
        let slots = self.allocate_slots()?;
        let ng = slots.len();
        let (free_tx, free_rx) = mpsc::sync_channel::<Slot>(ng);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Slot, DynError>>(ng);
        for slot in slots {
            free_tx.send(slot).map_err(|_| "Slot pool closed before start")?;
        }
        let stager = GatherStager::new(self.dataset, &self.geometry, self.backend);

        thread::scope(|scope| -> Result<usize, DynError> {
            let producer = scope.spawn(move || {
                let mut stage_clock = KernelClock::default();
                for cdp_id in 0..ncdps {
                    let Ok(mut slot) = free_rx.recv() else {
                        break;
                    };
                    debug_assert_eq!(slot.id(), cdp_id % ng);
                    let staged = stager
                        .stage(cdp_id, &mut slot, &mut stage_clock)
                        .map(|_| slot);
                    let failed = staged.is_err();
                    if ready_tx.send(staged).is_err() || failed {
                        break;
                    }
                }
                stage_clock
            });

            let mut staged_traces = 0usize;
            let mut outcome: Result<(), DynError> = Ok(());
            for cdp_id in 0..ncdps {
                let mut slot = match ready_rx.recv() {
                    Ok(Ok(slot)) => slot,
                    Ok(Err(err)) => {
                        outcome = Err(err);
                        break;
                    }
                    Err(_) => {
                        outcome = Err("Staging thread stopped before all CDPs were staged".into());
                        break;
                    }
                };
                self.compute(&mut slot, volumes, clock);
                staged_traces += slot.ntraces();
                debug!("Progress: {}/{}", cdp_id + 1, ncdps);
                // The producer exits after the last CDP, so a closed pool is expected here.
                let _ = free_tx.send(slot);
            }
            drop(free_tx);
            drop(ready_rx);

            let stage_clock = producer
                .join()
                .map_err(|_| "Staging thread panicked")?;
            // Staging overlaps compute here, so it stays out of the kernel clock.
            debug!(
                "Staging thread busy for {:.6} s alongside compute",
                stage_clock.elapsed().as_secs_f64()
            );
            outcome.map(|_| staged_traces)
        })
    }
}

/// Run the full semblance search over every CDP of `dataset`.
pub fn run(dataset: &Dataset, config: &CrsConfig, backend: Backend) -> Result<CrsOutcome, DynError> {
    let started = Instant::now();
    let mut clock = KernelClock::default();
    let ctx = CrsContext::new(dataset, config, backend, &mut clock)?;
    let mut volumes = OutputVolumes::new(dataset.ncdps(), dataset.ns)?;

    info!(
        "Searching {} parameters over {} CDPs ({} samples, window {} samples) with {} slot(s) on {}",
        ctx.grid.len(),
        dataset.ncdps(),
        dataset.ns,
        ctx.kernel.window.width(),
        ctx.slots,
        backend
    );

    let staged_traces = if ctx.slots > 1 {
        ctx.run_pipelined(&mut volumes, &mut clock)?
    } else {
        ctx.run_inline(&mut volumes, &mut clock)?
    };

    let stats = RunStats {
        total: started.elapsed(),
        kernel: clock.elapsed(),
        staged_traces,
        ns: dataset.ns,
        npar: ctx.grid.len(),
    };
    Ok(CrsOutcome {
        grid: ctx.grid,
        volumes,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::{run, RunStats};
    use crate::args::CrsConfig;
    use crate::device::Backend;
    use crate::gather::{Aperture, ApertureSpec, Dataset};
    use crate::grid::Axis;
    use crate::semblance::{evaluate_cell, KernelParams, Window};
    use crate::stage::tests::three_cdp_line;
    use crate::stage::{GatherStager, Slot};
    use crate::geom::TraceGeometry;
    use crate::utils::KernelClock;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(a: Axis, b: Axis, c: Axis, tau: f64, slots: usize) -> CrsConfig {
        CrsConfig {
            a,
            b,
            c,
            aperture: ApertureSpec { radius: 0.0, max_traces: None },
            tau,
            input: PathBuf::from("unused.su"),
            verbosity: 0,
            output_dir: PathBuf::from("."),
            prefix: "crs".into(),
            slots,
            threads: 1,
            max_invalid: 1,
        }
    }

    fn search_config(slots: usize) -> CrsConfig {
        config(
            Axis::new(-2e-3, 2e-3, 4),
            Axis::new(-1e-5, 1e-5, 3),
            Axis::new(0.0, 4e-6, 2),
            0.004,
            slots,
        )
    }

    #[test]
    fn single_cdp_two_traces_matches_stack_over_energy() {
        let s1 = [1.0f32, 2.0, -1.0, 4.0];
        let s2 = [3.0f32, 2.0, 1.0, 0.5];
        let dataset = Dataset {
            samples: s1.iter().chain(s2.iter()).copied().collect(),
            gx: vec![10.0, 20.0],
            gy: vec![0.0, 0.0],
            sx: vec![0.0, 0.0],
            sy: vec![0.0, 0.0],
            scalco: vec![1.0, 1.0],
            ntraces_by_cdp_id: vec![2],
            apertures: vec![Aperture { first: 0, last: 0 }],
            ns: 4,
            dt: 0.5,
        };
        let single = Axis::new(0.0, 1.0, 1);
        let cfg = config(single, single, Axis::new(0.0, 1e-6, 1), 0.0, 1);
        let outcome = run(&dataset, &cfg, Backend::Host).unwrap();

        let fits = outcome.volumes.cdp(0);
        for t0 in 0..3 {
            let (a, b) = (s1[t0], s2[t0]);
            let expected = (a + b) * (a + b) / (2.0 * (a * a + b * b));
            assert_eq!(fits[t0].par_id, 0);
            assert!((fits[t0].semblance - expected).abs() < 1e-6);
            assert!((fits[t0].stack - (a + b) / 2.0).abs() < 1e-6);
        }
        assert_eq!(fits[3].semblance, 0.0);
        assert_eq!(fits[3].stack, 0.0);
        assert_eq!(outcome.stats.staged_traces, 2);
        assert_eq!(outcome.stats.npar, 1);
    }

    #[test]
    fn pipelined_slots_match_inline_loop() {
        let dataset = three_cdp_line();
        let inline = run(&dataset, &search_config(1), Backend::Host).unwrap();
        for slots in [2, 3, 8] {
            let piped = run(&dataset, &search_config(slots), Backend::Multicore).unwrap();
            for cdp in 0..dataset.ncdps() {
                assert_eq!(inline.volumes.cdp(cdp), piped.volumes.cdp(cdp), "slots={slots}");
            }
            assert_eq!(inline.stats.staged_traces, piped.stats.staged_traces);
        }
        // Windows hold 2, 3 and 2 traces.
        assert_eq!(inline.stats.staged_traces, 7);
    }

    #[test]
    fn kernel_time_never_exceeds_wall_time() {
        let dataset = three_cdp_line();
        for slots in [1, 3] {
            let stats = run(&dataset, &search_config(slots), Backend::Multicore)
                .unwrap()
                .stats;
            assert!(stats.kernel <= stats.total, "slots={slots}: {stats}");
        }
    }

    #[test]
    fn recorded_parameter_reproduces_recorded_semblance() {
        let dataset = three_cdp_line();
        let cfg = search_config(2);
        let outcome = run(&dataset, &cfg, Backend::Multicore).unwrap();

        let geometry = TraceGeometry::precompute(dataset.coordinates(), Backend::Host).unwrap();
        let stager = GatherStager::new(&dataset, &geometry, Backend::Host);
        let mut slot = Slot::new(0, dataset.max_window_traces(), dataset.ns, 1).unwrap();
        let kernel = KernelParams {
            dt: dataset.dt,
            window: Window::from_seconds(cfg.tau, dataset.dt).unwrap(),
            max_invalid: cfg.max_invalid,
        };
        for cdp in 0..dataset.ncdps() {
            stager.stage(cdp, &mut slot, &mut KernelClock::default()).unwrap();
            for (t0, fit) in outcome.volumes.cdp(cdp).iter().enumerate() {
                let (ia, ib, ic) = outcome.grid.decode(fit.par_id);
                assert_eq!(outcome.grid.encode(ia, ib, ic), fit.par_id);
                let cell = evaluate_cell(&slot.gather(), t0, outcome.grid.get(fit.par_id), &kernel);
                assert_eq!(cell.semblance, fit.semblance);
                assert_eq!(cell.stack, fit.stack);
            }
        }
    }

    #[test]
    fn oversized_window_aborts_before_compute() {
        let dataset = three_cdp_line();
        let mut cfg = search_config(1);
        cfg.tau = 1.0;
        let err = run(&dataset, &cfg, Backend::Host).err().unwrap();
        assert!(err.to_string().contains("at most 5"));
    }

    #[test]
    fn throughput_uses_semblance_trace_count() {
        let stats = RunStats {
            total: Duration::from_secs(2),
            kernel: Duration::from_secs(1),
            staged_traces: 1_000_000,
            ns: 1000,
            npar: 10,
        };
        assert!((stats.gstps() - 5.0).abs() < 1e-12);
        assert!((stats.kernel_gstps() - 10.0).abs() < 1e-12);
        assert!(stats.to_string().starts_with("Total Execution Time: 2.000000"));
        assert_eq!(RunStats::default().gstps(), 0.0);
    }
}
