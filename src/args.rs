use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

use crate::gather::ApertureSpec;
use crate::grid::Axis;
use crate::parfile::ParFile;
use crate::utils::available_cores;

pub const DEFAULT_VERBOSITY: u8 = 1;
pub const DEFAULT_SLOTS: usize = 2;
pub const DEFAULT_MAX_INVALID: usize = 1;
pub const DEFAULT_PREFIX: &str = "crs";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing mandatory option `{key}` (pass --{key} or set {key}= in the --par file)")]
    Missing { key: &'static str },
    #[error("invalid value `{value}` for `{key}`")]
    Invalid { key: String, value: String },
    #[error("`{key}` out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
    #[error("tau spans {width} samples (half-window {tau}) but at most {max} are supported")]
    WindowTooWide { tau: usize, width: usize, max: usize },
    #[error("failed to read parameter file {path}: {reason}")]
    ParFile { path: String, reason: String },
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    author,
    version,
    about = "Common Reflection Surface semblance search over CDP gathers",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  crs --a0 -0.0007 --a1 0.0007 --na 5 --b0 -1e-7 --b1 1e-7 --nb 5 --c0 1.98e-7 --c1 1.77e-6 --nc 5 --aph 600 --apm 50 --tau 0.002 -i data/line.su -v 2\n  crs --par crs.par -i data/line.su --output results\n\nEnvironment:\n  ACC_DEVICE_TYPE=host|multicore selects sequential or multi-threaded execution.\n"
)]
pub struct Args {
    /// Lower bound of the a (slope) axis
    #[arg(long, allow_hyphen_values = true)]
    pub a0: Option<f64>,

    /// Upper bound of the a axis (exclusive)
    #[arg(long, allow_hyphen_values = true)]
    pub a1: Option<f64>,

    /// Number of a values
    #[arg(long)]
    pub na: Option<usize>,

    /// Lower bound of the b (midpoint curvature) axis
    #[arg(long, allow_hyphen_values = true)]
    pub b0: Option<f64>,

    /// Upper bound of the b axis (exclusive)
    #[arg(long, allow_hyphen_values = true)]
    pub b1: Option<f64>,

    /// Number of b values
    #[arg(long)]
    pub nb: Option<usize>,

    /// Lower bound of the c (halfoffset curvature) axis
    #[arg(long, allow_hyphen_values = true)]
    pub c0: Option<f64>,

    /// Upper bound of the c axis (exclusive)
    #[arg(long, allow_hyphen_values = true)]
    pub c1: Option<f64>,

    /// Number of c values
    #[arg(long)]
    pub nc: Option<usize>,

    /// Aperture: maximum midpoint distance of neighbouring CDPs (default 0)
    #[arg(long)]
    pub aph: Option<f64>,

    /// Maximum traces staged for one CDP aperture (default unlimited)
    #[arg(long)]
    pub apm: Option<usize>,

    /// Half-window of the coherence window in seconds
    #[arg(long, allow_hyphen_values = true)]
    pub tau: Option<f64>,

    /// Input Seismic Unix file
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Parameter file with key=value lines; command-line values take precedence
    #[arg(long)]
    pub par: Option<PathBuf>,

    /// Verbosity level 0-3
    #[arg(short = 'v', long = "verbose")]
    pub verbose: Option<u8>,

    /// Directory for the output volumes (default: current directory)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// File name prefix of the output volumes
    #[arg(long)]
    pub prefix: Option<String>,

    /// Number of pipeline slots (CDPs in flight)
    #[arg(long)]
    pub slots: Option<usize>,

    /// Number of worker threads (default: all online cores)
    #[arg(long)]
    pub cpu: Option<usize>,

    /// Out-of-window traces tolerated per semblance cell
    #[arg(long = "max-invalid")]
    pub max_invalid: Option<usize>,
}

/// Fully resolved run configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CrsConfig {
    pub a: Axis,
    pub b: Axis,
    /// In physical units; the grid applies `FACTOR`.
    pub c: Axis,
    pub aperture: ApertureSpec,
    /// Half-window in seconds.
    pub tau: f64,
    pub input: PathBuf,
    pub verbosity: u8,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub slots: usize,
    pub threads: usize,
    pub max_invalid: usize,
}

fn required<T: FromStr>(
    cli: &Option<T>,
    par: &ParFile,
    key: &'static str,
) -> Result<T, ConfigError>
where
    T: Clone,
{
    optional(cli, par, key)?.ok_or(ConfigError::Missing { key })
}

fn optional<T: FromStr + Clone>(
    cli: &Option<T>,
    par: &ParFile,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match cli {
        Some(value) => Ok(Some(value.clone())),
        None => par.get(key),
    }
}

fn at_least_one(value: usize, key: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            key,
            reason: "must be at least 1".into(),
        });
    }
    Ok(value)
}

fn non_negative(value: f64, key: &'static str) -> Result<f64, ConfigError> {
    if !(value >= 0.0) || !value.is_finite() {
        return Err(ConfigError::OutOfRange {
            key,
            reason: format!("must be a finite non-negative number, got {value}"),
        });
    }
    Ok(value)
}

impl Args {
    pub fn resolve(&self) -> Result<CrsConfig, ConfigError> {
        let par = match &self.par {
            Some(path) => ParFile::load(path)?,
            None => ParFile::default(),
        };
        self.resolve_with(&par)
    }

    pub fn resolve_with(&self, par: &ParFile) -> Result<CrsConfig, ConfigError> {
        let a = Axis::new(
            required(&self.a0, par, "a0")?,
            required(&self.a1, par, "a1")?,
            at_least_one(required(&self.na, par, "na")?, "na")?,
        );
        let b = Axis::new(
            required(&self.b0, par, "b0")?,
            required(&self.b1, par, "b1")?,
            at_least_one(required(&self.nb, par, "nb")?, "nb")?,
        );
        let c = Axis::new(
            required(&self.c0, par, "c0")?,
            required(&self.c1, par, "c1")?,
            at_least_one(required(&self.nc, par, "nc")?, "nc")?,
        );
        let tau = non_negative(required(&self.tau, par, "tau")?, "tau")?;
        let input = required(&self.input, par, "input")?;

        let radius = non_negative(optional(&self.aph, par, "aph")?.unwrap_or(0.0), "aph")?;
        let max_traces = optional(&self.apm, par, "apm")?
            .map(|v| at_least_one(v, "apm"))
            .transpose()?;

        let slots = at_least_one(
            optional(&self.slots, par, "slots")?.unwrap_or(DEFAULT_SLOTS),
            "slots",
        )?;
        let cores = available_cores();
        let threads = at_least_one(optional(&self.cpu, par, "cpu")?.unwrap_or(cores), "cpu")?;
        if threads > cores {
            return Err(ConfigError::OutOfRange {
                key: "cpu",
                reason: format!(
                    "{threads} exceeds the number of available cores ({cores})"
                ),
            });
        }

        Ok(CrsConfig {
            a,
            b,
            c,
            aperture: ApertureSpec { radius, max_traces },
            tau,
            input,
            verbosity: optional(&self.verbose, par, "verbose")?.unwrap_or(DEFAULT_VERBOSITY),
            output_dir: optional(&self.output, par, "output")?.unwrap_or_else(|| PathBuf::from(".")),
            prefix: optional(&self.prefix, par, "prefix")?
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            slots,
            threads,
            max_invalid: optional(&self.max_invalid, par, "max-invalid")?
                .unwrap_or(DEFAULT_MAX_INVALID),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, ConfigError, DEFAULT_MAX_INVALID, DEFAULT_SLOTS};
    use crate::parfile::ParFile;
    use clap::Parser;
    use std::path::PathBuf;

    const FULL: [&str; 23] = [
        "crs", "--a0", "-0.0007", "--a1", "0.0007", "--na", "5", "--b0", "-1e-7", "--b1",
        "1e-7", "--nb", "4", "--c0", "1.98e-7", "--c1", "1.77e-6", "--nc", "3", "--tau",
        "0.002", "-i", "line.su",
    ];

    #[test]
    fn full_command_line_resolves_with_defaults() {
        let args = Args::try_parse_from(FULL).unwrap();
        let cfg = args.resolve_with(&ParFile::default()).unwrap();
        assert_eq!(cfg.a.start, -0.0007);
        assert_eq!(cfg.b.count, 4);
        assert_eq!(cfg.c.end, 1.77e-6);
        assert_eq!(cfg.input, PathBuf::from("line.su"));
        assert_eq!(cfg.aperture.radius, 0.0);
        assert_eq!(cfg.aperture.max_traces, None);
        assert_eq!(cfg.slots, DEFAULT_SLOTS);
        assert_eq!(cfg.max_invalid, DEFAULT_MAX_INVALID);
        assert_eq!(cfg.verbosity, 1);
        assert_eq!(cfg.prefix, "crs");
    }

    #[test]
    fn missing_mandatory_key_is_named() {
        let args = Args::try_parse_from(&FULL[..21]).unwrap();
        let err = args.resolve_with(&ParFile::default()).unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "input" });
        assert!(err.to_string().contains("input"));
    }

    #[test]
    fn parfile_fills_gaps_and_cli_wins() {
        let par = ParFile::parse("a0=-1\na1=1\nna=2\nb0=0\nb1=1\nnb=1\nc0=0\nc1=1\nnc=1\ntau=0\ninput=from_par.su\naph=250\napm=40\n");
        let args = Args::try_parse_from(["crs", "--na", "7", "--slots", "3"]).unwrap();
        let cfg = args.resolve_with(&par).unwrap();
        assert_eq!(cfg.a.count, 7);
        assert_eq!(cfg.a.start, -1.0);
        assert_eq!(cfg.input, PathBuf::from("from_par.su"));
        assert_eq!(cfg.aperture.radius, 250.0);
        assert_eq!(cfg.aperture.max_traces, Some(40));
        assert_eq!(cfg.slots, 3);
    }

    #[test]
    fn zero_grid_count_is_rejected() {
        let mut args = Args::try_parse_from(FULL).unwrap();
        args.nb = Some(0);
        assert!(matches!(
            args.resolve_with(&ParFile::default()),
            Err(ConfigError::OutOfRange { key: "nb", .. })
        ));
    }

    #[test]
    fn negative_tau_is_rejected() {
        let mut args = Args::try_parse_from(FULL).unwrap();
        args.tau = Some(-0.5);
        assert!(matches!(
            args.resolve_with(&ParFile::default()),
            Err(ConfigError::OutOfRange { key: "tau", .. })
        ));
    }

    #[test]
    fn unparsable_cli_number_is_rejected_by_clap() {
        let mut argv: Vec<&str> = FULL.to_vec();
        argv[6] = "five";
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn too_many_threads_is_rejected() {
        let mut args = Args::try_parse_from(FULL).unwrap();
        args.cpu = Some(usize::MAX);
        assert!(matches!(
            args.resolve_with(&ParFile::default()),
            Err(ConfigError::OutOfRange { key: "cpu", .. })
        ));
    }
}
