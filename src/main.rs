mod args;
mod device;
mod gather;
mod geom;
mod grid;
mod output;
mod parfile;
mod pipeline;
mod redux;
mod semblance;
mod stage;
mod su;
mod utils;

use clap::{CommandFactory, Parser};
use log::info;

use args::CrsConfig;
use gather::GatherSet;
use utils::DynError;

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn run(config: CrsConfig) -> Result<(), DynError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
        .map_err(|_| "Failed to initialise rayon thread pool")?;
    let backend = device::backend_from_env();

    let traces = su::read_su_file(&config.input)?;
    info!("Read {} traces from {}", traces.len(), config.input.display());

    let gathers = GatherSet::build(traces, config.aperture)?;
    let (dataset, templates) = gathers.linearize()?;
    info!(
        "{} CDPs, {} traces, ns={}, dt={} s, max fold {}, up to {} CDPs / {} traces per aperture",
        dataset.ncdps(),
        dataset.ttraces(),
        dataset.ns,
        dataset.dt,
        dataset.ntrs(),
        dataset.max_gather(),
        dataset.max_window_traces()
    );

    let outcome = pipeline::run(&dataset, &config, backend)?;
    info!("{}", outcome.stats);

    write_results(&templates, &outcome, &config)?;
    Ok(())
}

fn write_results(
    templates: &[su::SuTrace],
    outcome: &pipeline::CrsOutcome,
    config: &CrsConfig,
) -> Result<(), DynError> {
    let paths = output::write_volumes(
        templates,
        &outcome.grid,
        &outcome.volumes,
        &config.output_dir,
        &config.prefix,
    )?;
    info!("Wrote {} output volumes to {}", paths.len(), config.output_dir.display());
    Ok(())
}

fn main() {
    if std::env::args_os().len() == 1 {
        let _ = args::Args::command().print_help();
        println!();
        return;
    }

    let config = match args::Args::parse().resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[error] {e}");
            std::process::exit(1);
        }
    };
    init_logging(config.verbosity);

    if let Err(e) = run(config) {
        eprintln!("[error] {e}");
        std::process::exit(1);
    }
}
