use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand, builder::PossibleValuesParser};
use common::{config::Config, watch::watch_file};
use eyre::Result;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{layer, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::session::{Session, WatchOverrides, report, show};

mod session;

const MODULES: &[&str] = &["common", "default_plots"];

#[derive(Parser)]
#[command(version, about = "Plot thread-scaling benchmark results and keep the charts current")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Extra tracing directives, e.g. `common=debug`
    #[arg(short, long)]
    log: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the plots, then re-render whenever the CSV changes
    Watch {
        #[command(flatten)]
        plot: PlotArgs,
        /// Poll the modification time instead of subscribing to file events
        #[arg(long, default_value_t = false)]
        poll: bool,
        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Minimum time between two renders in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
    /// Render the plots once
    Render {
        #[command(flatten)]
        plot: PlotArgs,
    },
    /// Print the parsed benchmark table
    Show {
        /// Benchmark CSV file
        #[arg(short, long)]
        file: PathBuf,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PlotArgs {
    /// Benchmark CSV file
    #[arg(short, long)]
    pub file: PathBuf,
    /// YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory for the rendered charts
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Plots to render instead of the configured ones
    #[arg(
        short,
        long,
        value_parser = PossibleValuesParser::new(default_plots::PLOT_NAMES.iter().copied())
    )]
    pub plot: Vec<String>,
    /// Place the overview charts side by side instead of stacked
    #[arg(long, default_value_t = false)]
    pub side_by_side: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let file_appender = tracing_appender::rolling::never(".", "bench-plot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = build_env_filter(std::env::var("RUST_LOG").ok().as_deref(), &args.log)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            layer()
                .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(layer().with_ansi(false).with_writer(non_blocking))
        .init();

    default_plots::init_plots();

    match args.command {
        Commands::Watch {
            plot,
            poll,
            interval_ms,
            debounce_ms,
        } => {
            let overrides = WatchOverrides {
                poll,
                interval_ms,
                debounce_ms,
            };
            if let Err(err) = watch(plot, overrides).await {
                error!("{err:#}");
                return Err(err);
            }
        }
        Commands::Render { plot } => {
            let session = Session::resolve(&plot, load_config(&plot).await?, None)?;
            for path in session.render().await? {
                println!("{}", path.display());
            }
        }
        Commands::Show { file, json } => show(&file, json).await?,
    };

    Ok(())
}

/// `RUST_LOG` may be a bare level, applied to every crate of the workspace,
/// or a list of directives, which are added like `--log` entries.
fn build_env_filter(rust_log: Option<&str>, extra: &[String]) -> Result<EnvFilter> {
    let rust_log = rust_log.map(str::trim).filter(|v| !v.is_empty());
    let (log_level, mut directives) = match rust_log {
        Some(level) if level.parse::<LevelFilter>().is_ok() => (level, Vec::new()),
        Some(list) => (
            "info",
            list.split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
        None => ("info", Vec::new()),
    };
    directives.extend(extra.iter().cloned());

    let mut env_filter = EnvFilter::new(format!("bench_plot={log_level}"));
    for directive in &directives {
        env_filter = env_filter.add_directive(directive.parse()?);
    }

    for module in MODULES {
        if !directives.iter().any(|x| x.starts_with(module)) {
            env_filter = env_filter.add_directive(format!("{module}={log_level}").parse()?);
        }
    }
    Ok(env_filter)
}

async fn load_config(args: &PlotArgs) -> Result<Config> {
    match &args.config {
        Some(path) => Config::load(path).await,
        None => Ok(Config::default()),
    }
}

async fn watch(args: PlotArgs, overrides: WatchOverrides) -> Result<()> {
    let config = load_config(&args).await?;
    let session = Arc::new(Session::resolve(&args, config, Some(overrides))?);

    match session.render().await {
        Ok(paths) => report(&paths),
        Err(err) => error!("Initial render failed: {err:#}"),
    }

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };
    let watched = session.clone();
    watch_file(&session.csv, &session.watch, shutdown, move || {
        let session = watched.clone();
        async move {
            let paths = session.render().await?;
            report(&paths);
            eyre::Ok(())
        }
    })
    .await?;

    info!("Exiting...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_flags() {
        let cli = Cli::parse_from([
            "bench-plot",
            "--log",
            "common=debug",
            "watch",
            "-f",
            "bench.csv",
            "--poll",
            "--interval-ms",
            "250",
            "-p",
            "averages",
            "-p",
            "speedup",
        ]);
        assert_eq!(cli.log, vec!["common=debug"]);
        let Commands::Watch {
            plot,
            poll,
            interval_ms,
            debounce_ms,
        } = cli.command
        else {
            panic!("expected watch");
        };
        assert_eq!(plot.file, PathBuf::from("bench.csv"));
        assert_eq!(plot.plot, vec!["averages", "speedup"]);
        assert!(poll);
        assert_eq!(interval_ms, Some(250));
        assert_eq!(debounce_ms, None);
    }

    #[test]
    fn rejects_unknown_plot_names() {
        let result = Cli::try_parse_from(["bench-plot", "render", "-f", "a.csv", "-p", "pie"]);
        assert!(result.is_err());
    }

    #[test]
    fn rust_log_accepts_levels_and_directives() {
        let filter = build_env_filter(Some("debug"), &[]).unwrap().to_string();
        assert!(filter.contains("bench_plot=debug"));
        assert!(filter.contains("common=debug"));

        let filter = build_env_filter(Some("common=debug"), &[]).unwrap().to_string();
        assert!(filter.contains("bench_plot=info"));
        assert!(filter.contains("common=debug"));
        assert!(!filter.contains("common=info"));
        assert!(filter.contains("default_plots=info"));

        let filter = build_env_filter(None, &["default_plots=trace".to_owned()])
            .unwrap()
            .to_string();
        assert!(filter.contains("default_plots=trace"));
        assert!(filter.contains("common=info"));

        assert!(build_env_filter(Some("common=loud"), &[]).is_err());
    }

    #[test]
    fn show_takes_json_flag() {
        let cli = Cli::parse_from(["bench-plot", "show", "--file", "a.csv", "--json"]);
        assert!(matches!(cli.command, Commands::Show { json: true, .. }));
    }
}
