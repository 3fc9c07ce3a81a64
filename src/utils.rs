use std::error::Error;
use std::time::{Duration, Instant};

pub type DynError = Box<dyn Error + Send + Sync>;

/// Threshold below which accumulators, counts and scale codes are treated as zero.
pub const EPSILON: f32 = 1e-13;

/// Rescales squared-distance units so the `c` term of the moveout uses sane magnitudes.
pub const FACTOR: f32 = 1e6;

/// Widest interpolation window (`2*tau+1` samples) the semblance kernel supports.
pub const MAX_WINDOW: usize = 5;

/// Allocate `len` copies of `fill`, reporting the buffer label and size on failure
/// instead of aborting the process.
pub fn try_alloc<T: Clone>(len: usize, fill: T, label: &str) -> Result<Vec<T>, DynError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| {
        format!(
            "Failed to allocate {label}: {len} elements ({} bytes)",
            len.saturating_mul(std::mem::size_of::<T>())
        )
    })?;
    buffer.resize(len, fill);
    Ok(buffer)
}

pub fn available_cores() -> usize {
    #[cfg(target_family = "unix")]
    {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online > 0 {
            return online as usize;
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Accumulates wall time spent inside compute passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelClock {
    elapsed: Duration,
}

impl KernelClock {
    pub fn time<R>(&mut self, pass: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = pass();
        self.elapsed += start.elapsed();
        result
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
