use std::env::VarError;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use rayon::prelude::*;

pub const DEVICE_ENV_VAR: &str = "ACC_DEVICE_TYPE";

/// Device names accepted in `ACC_DEVICE_TYPE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Radeon,
    Nvidia,
    Host,
    Multicore,
    XeonPhi,
    PgiOpencl,
    NvidiaOpencl,
    Opencl,
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "radeon" => Ok(Self::Radeon),
            "nvidia" => Ok(Self::Nvidia),
            "host" => Ok(Self::Host),
            "multicore" => Ok(Self::Multicore),
            "xeonphi" => Ok(Self::XeonPhi),
            "pgi_opencl" => Ok(Self::PgiOpencl),
            "nvidia_opencl" => Ok(Self::NvidiaOpencl),
            "opencl" => Ok(Self::Opencl),
            other => Err(format!("Unknown device: {other}")),
        }
    }
}

/// Where the data-parallel passes execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Backend {
    /// Plain sequential loops on the calling thread.
    Host,
    /// Work items spread over the global rayon pool.
    #[default]
    Multicore,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Host => write!(f, "host"),
            Backend::Multicore => write!(f, "multicore"),
        }
    }
}

impl Backend {
    /// Parallel-for over `items`: `work(i, &mut items[i])` runs once per index.
    /// Work items must not share mutable state; each owns its accumulators.
    pub fn for_each_indexed<T, F>(self, items: &mut [T], work: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        match self {
            Backend::Host => items
                .iter_mut()
                .enumerate()
                .for_each(|(idx, item)| work(idx, item)),
            Backend::Multicore => items
                .par_iter_mut()
                .enumerate()
                .for_each(|(idx, item)| work(idx, item)),
        }
    }
}

pub fn select_backend(raw: Result<String, VarError>) -> Backend {
    let value = match raw {
        Ok(value) => value,
        Err(VarError::NotPresent) => {
            info!("{DEVICE_ENV_VAR} not set. Using default fallback: {}", Backend::default());
            return Backend::default();
        }
        Err(err) => {
            warn!("Failed to read {DEVICE_ENV_VAR} environment variable: {err}");
            return Backend::default();
        }
    };

    debug!("Device Type: {value}");
    match value.trim().parse::<DeviceType>() {
        Ok(DeviceType::Host) => Backend::Host,
        Ok(DeviceType::Multicore) => Backend::Multicore,
        Ok(accelerator) => {
            warn!(
                "No offload path for {accelerator:?} in this build; running on {}",
                Backend::Multicore
            );
            Backend::Multicore
        }
        Err(msg) => {
            info!("{msg}. Using default fallback: {}", Backend::default());
            Backend::default()
        }
    }
}

pub fn backend_from_env() -> Backend {
    select_backend(std::env::var(DEVICE_ENV_VAR))
}
