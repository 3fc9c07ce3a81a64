use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::grid::ParameterGrid;
use crate::redux::{BestFit, OutputVolumes};
use crate::su::{SuTrace, SuWriter};
use crate::utils::DynError;

type Extract = fn(&ParameterGrid, &BestFit) -> f32;

fn coef_a(grid: &ParameterGrid, fit: &BestFit) -> f32 {
    grid.physical(fit.par_id).0 as f32
}

fn coef_b(grid: &ParameterGrid, fit: &BestFit) -> f32 {
    grid.physical(fit.par_id).1 as f32
}

fn coef_c(grid: &ParameterGrid, fit: &BestFit) -> f32 {
    grid.physical(fit.par_id).2 as f32
}

fn coherence(_: &ParameterGrid, fit: &BestFit) -> f32 {
    fit.semblance
}

fn stack(_: &ParameterGrid, fit: &BestFit) -> f32 {
    fit.stack
}

/// The five result volumes, in emission order.
const VOLUMES: [(&str, Extract); 5] = [
    ("a", coef_a),
    ("b", coef_b),
    ("c", coef_c),
    ("coher", coherence),
    ("stack", stack),
];

fn midpoint(s: i32, g: i32) -> i32 {
    ((s as i64 + g as i64) >> 1) as i32
}

/// Header of the zero-offset trace emitted for a CDP: its first input trace
/// with source and receiver collapsed onto the midpoint.
fn zero_offset_header(template: &SuTrace) -> SuTrace {
    let mut trace = template.clone();
    let mx = midpoint(template.sx(), template.gx());
    let my = midpoint(template.sy(), template.gy());
    trace.set_offset(0);
    trace.set_source(mx, my);
    trace.set_receiver(mx, my);
    trace
}

/// Write `<prefix>.{a,b,c,coher,stack}.su` into `out_dir`, one trace per CDP.
/// Files appear under their final names only once every CDP has been written.
pub fn write_volumes(
    templates: &[SuTrace],
    grid: &ParameterGrid,
    volumes: &OutputVolumes,
    out_dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, DynError> {
    if templates.len() != volumes.ncdps() {
        return Err(format!(
            "{} header templates for {} CDP volumes",
            templates.len(),
            volumes.ncdps()
        )
        .into());
    }
    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("Failed to create {}: {e}", out_dir.display()))?;

    let mut writers = VOLUMES
        .iter()
        .map(|(name, _)| SuWriter::create(&out_dir.join(format!("{prefix}.{name}.su"))))
        .collect::<Result<Vec<_>, _>>()?;

    for (cdp_id, template) in templates.iter().enumerate() {
        let fits = volumes.cdp(cdp_id);
        let mut trace = zero_offset_header(template);
        for ((_, extract), writer) in VOLUMES.iter().zip(writers.iter_mut()) {
            trace.set_data(fits.iter().map(|fit| extract(grid, fit)).collect())?;
            writer.write_trace(&trace)?;
        }
    }

    // Every volume is on disk before any of them takes its final name.
    for writer in writers.iter_mut() {
        writer.sync()?;
    }
    let mut paths = Vec::with_capacity(writers.len());
    for writer in writers {
        let traces = writer.traces_written();
        match writer.finalize() {
            Ok(path) => {
                info!("Wrote {} traces to {}", traces, path.display());
                paths.push(path);
            }
            Err(err) => {
                for path in &paths {
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!("Failed to withdraw {}: {e}", path.display());
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(paths)
}
