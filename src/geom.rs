use crate::device::Backend;
use crate::utils::{try_alloc, DynError, EPSILON, FACTOR};

// --- Trace geometry conventions ---
// Coordinates arrive as integers with a SEG-Y style scale code (scalco):
//   |scalco| < EPSILON  -> no scaling (factor 1)
//   scalco < 0          -> factor is 1/scalco
//   scalco > 0          -> factor is scalco
// Midpoint m0 = (g + s) / 2 and halfoffset term h0 = |g - s|^2 / 4 / FACTOR,
// both in scaled units. FACTOR matches the scaling applied to the `c` axis.
// ----------------------------------

/// Absolute midpoint and halfoffset term of one trace.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TracePoint {
    pub mx: f32,
    pub my: f32,
    pub h0: f32,
}

pub fn normalize_scale(scalco: f32) -> f32 {
    if -EPSILON < scalco && scalco < EPSILON {
        1.0
    } else if scalco < 0.0 {
        1.0 / scalco
    } else {
        scalco
    }
}

pub fn trace_point(gx: f32, gy: f32, sx: f32, sy: f32, scalco: f32) -> TracePoint {
    let s = normalize_scale(scalco);
    let hx = (gx - sx) * s;
    let hy = (gy - sy) * s;
    TracePoint {
        mx: (gx + sx) * s * 0.5,
        my: (gy + sy) * s * 0.5,
        h0: 0.25 * (hx * hx + hy * hy) / FACTOR,
    }
}

/// Flat per-trace coordinate arrays as produced by gather linearisation.
#[derive(Clone, Copy, Debug)]
pub struct Coordinates<'a> {
    pub gx: &'a [f32],
    pub gy: &'a [f32],
    pub sx: &'a [f32],
    pub sy: &'a [f32],
    pub scalco: &'a [f32],
}

impl Coordinates<'_> {
    pub fn len(&self) -> usize {
        self.gx.len()
    }
}

/// Midpoints and halfoffset terms for every trace of the run.
#[derive(Clone, Debug, Default)]
pub struct TraceGeometry {
    points: Vec<TracePoint>,
}

impl TraceGeometry {
    pub fn precompute(coords: Coordinates<'_>, backend: Backend) -> Result<Self, DynError> {
        let ttraces = coords.len();
        if [coords.gy, coords.sx, coords.sy, coords.scalco]
            .iter()
            .any(|column| column.len() != ttraces)
        {
            return Err("Coordinate columns have mismatched lengths".into());
        }
        let mut points = try_alloc(ttraces, TracePoint::default(), "trace geometry")?;
        backend.for_each_indexed(&mut points, |i, point| {
            *point = trace_point(
                coords.gx[i],
                coords.gy[i],
                coords.sx[i],
                coords.sy[i],
                coords.scalco[i],
            );
        });
        Ok(Self { points })
    }

    pub fn point(&self, trace_id: usize) -> TracePoint {
        self.points[trace_id]
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_scale, trace_point, Coordinates, TraceGeometry};
    use crate::device::Backend;
    use crate::utils::{EPSILON, FACTOR};

    #[test]
    fn scale_code_normalisation() {
        assert_eq!(normalize_scale(0.0), 1.0);
        assert_eq!(normalize_scale(EPSILON * 0.5), 1.0);
        assert_eq!(normalize_scale(-EPSILON * 0.5), 1.0);
        assert!((normalize_scale(-100.0) - (-0.01)).abs() < 1e-9);
        assert_eq!(normalize_scale(100.0), 100.0);
    }

    #[test]
    fn midpoint_and_halfoffset_without_scaling() {
        let p = trace_point(300.0, 40.0, 100.0, 0.0, 0.0);
        assert_eq!(p.mx, 200.0);
        assert_eq!(p.my, 20.0);
        let expected = 0.25 * (200.0f32 * 200.0 + 40.0 * 40.0) / FACTOR;
        assert!((p.h0 - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_scale_divides_coordinates() {
        let p = trace_point(3000.0, 0.0, 1000.0, 0.0, -10.0);
        assert!((p.mx - (-200.0)).abs() < 1e-3);
        let expected = 0.25 * (200.0f32 * 200.0) / FACTOR;
        assert!((p.h0 - expected).abs() < 1e-7);
    }

    #[test]
    fn precompute_matches_per_trace_map() {
        let gx = [10.0, 20.0, 30.0];
        let gy = [0.0, 5.0, 0.0];
        let sx = [0.0, 0.0, 10.0];
        let sy = [0.0, 5.0, 0.0];
        let scalco = [1.0, -2.0, 0.0];
        let coords = Coordinates { gx: &gx, gy: &gy, sx: &sx, sy: &sy, scalco: &scalco };
        let geometry = TraceGeometry::precompute(coords, Backend::Multicore).unwrap();
        for i in 0..3 {
            assert_eq!(
                geometry.point(i),
                trace_point(gx[i], gy[i], sx[i], sy[i], scalco[i])
            );
        }
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let coords = Coordinates {
            gx: &[1.0, 2.0],
            gy: &[1.0],
            sx: &[1.0, 2.0],
            sy: &[1.0, 2.0],
            scalco: &[1.0, 2.0],
        };
        assert!(TraceGeometry::precompute(coords, Backend::Host).is_err());
    }
}
