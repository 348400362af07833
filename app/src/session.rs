use std::{
    fmt::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Local};
use common::{
    chart::Layout,
    config::Config,
    plot::{Plot, RenderContext, check_unique_names, ensure_plot_dir, render_all},
    table::{BenchTable, Row},
    watch::{WatchMode, WatchSettings},
};
use console::style;
use default_plots::{AverageAndSpread, default_plots, plot_by_name};
use eyre::{Context, Result, eyre};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::PlotArgs;

/// Watch flags given on the command line
#[derive(Debug, Default, Clone, Copy)]
pub struct WatchOverrides {
    pub poll: bool,
    pub interval_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
}

/// Everything needed to turn the CSV into charts, with command-line flags
/// applied over the config file
#[derive(Debug)]
pub struct Session {
    pub csv: PathBuf,
    pub plots: Vec<Box<dyn Plot>>,
    pub ctx: RenderContext,
    pub watch: WatchSettings,
}

impl Session {
    pub fn resolve(
        args: &PlotArgs,
        config: Config,
        overrides: Option<WatchOverrides>,
    ) -> Result<Self> {
        let layout = if args.side_by_side {
            Layout::SideBySide
        } else {
            Layout::Stacked
        };

        let mut plots = if !args.plot.is_empty() {
            args.plot
                .iter()
                .map(|name| plot_by_name(name, layout).ok_or_else(|| eyre!("Unknown plot {name}")))
                .collect::<Result<Vec<_>>>()?
        } else if !config.plots.is_empty() {
            config.plots
        } else {
            default_plots()
        };
        if args.side_by_side {
            for plot in &mut plots {
                if let Some(overview) = plot.downcast_mut::<AverageAndSpread>() {
                    overview.layout = Layout::SideBySide;
                }
            }
        }
        check_unique_names(&plots)?;

        let out_dir = args
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone());
        let ctx = RenderContext::for_file(&args.file, out_dir, config.canvas);

        let mut watch = WatchSettings::from(&config.watch);
        if let Some(overrides) = overrides {
            if overrides.poll {
                watch.mode = WatchMode::Poll;
            }
            if let Some(ms) = overrides.interval_ms {
                watch.poll_interval = Duration::from_millis(ms.max(1));
            }
            if let Some(ms) = overrides.debounce_ms {
                watch.debounce = Duration::from_millis(ms);
            }
        }

        debug!(
            "Plots {:?} into {}",
            plots.iter().map(|p| p.name()).collect::<Vec<_>>(),
            ctx.out_dir.display()
        );
        Ok(Self {
            csv: args.file.clone(),
            plots,
            ctx,
            watch,
        })
    }

    /// Reads the CSV and renders every plot
    pub async fn render(&self) -> Result<Vec<PathBuf>> {
        ensure_plot_dir(&self.ctx.out_dir).await?;
        let csv = self.csv.clone();
        let plots = self.plots.clone();
        let ctx = self.ctx.clone();
        spawn_blocking(move || {
            let table = BenchTable::from_path(&csv)
                .wrap_err_with(|| format!("Load {}", csv.display()))?;
            render_all(&plots, &table, &ctx)
        })
        .await?
    }
}

pub fn report(paths: &[PathBuf]) {
    for path in paths {
        info!("Updated {}", path.display());
    }
}

pub async fn show(file: &Path, json: bool) -> Result<()> {
    let path = file.to_path_buf();
    let table = spawn_blocking(move || BenchTable::from_path(&path))
        .await?
        .wrap_err_with(|| format!("Load {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    println!("{}", style(file.display()).bold());
    if let Ok(modified) = tokio::fs::metadata(file).await.and_then(|m| m.modified()) {
        let modified = DateTime::<Local>::from(modified);
        println!("modified {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    print!("{}", format_table(&table));
    Ok(())
}

/// Right-aligned text rendering of the table, one line per row
pub fn format_table(table: &BenchTable) -> String {
    let mut rows = vec![(
        Row::ThreadCount.label(),
        table
            .thread_counts
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>(),
    )];
    rows.extend(Row::ALL.iter().filter_map(|row| {
        let series = table.series(*row)?;
        Some((
            series.label(),
            series.values.iter().map(|v| format!("{v:.3}")).collect(),
        ))
    }));

    let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let cell_width = rows
        .iter()
        .flat_map(|(_, cells)| cells.iter().map(String::len))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (label, cells) in rows {
        _ = write!(out, "{label:<label_width$}");
        for cell in cells {
            _ = write!(out, "  {cell:>cell_width$}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use common::chart::Canvas;

    use super::*;

    const SAMPLE: &str = "ThreadCount,1,2\n\
                          ContainerAvg,10.5,6\n\
                          ContainerStd,0.4,0.3\n\
                          LocalCounterAvg,9.8,4.9\n\
                          LocalCounterStd,0.3,0.25\n";

    fn args(file: &Path) -> PlotArgs {
        PlotArgs {
            file: file.to_path_buf(),
            config: None,
            output_dir: None,
            plot: Vec::new(),
            side_by_side: false,
        }
    }

    fn names(session: &Session) -> Vec<&'static str> {
        session.plots.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn defaults_to_stacked_overview() {
        let session = Session::resolve(&args(Path::new("run.csv")), Config::default(), None).unwrap();
        assert_eq!(names(&session), vec!["overview"]);
        assert_eq!(session.plots[0].layout(), Layout::Stacked);
        assert_eq!(session.ctx.out_dir, PathBuf::from("plots"));
        assert_eq!(session.ctx.stem, "run");
        assert_eq!(session.watch, WatchSettings::default());
    }

    #[test]
    fn cli_flags_override_config() {
        let config = Config::parse(
            "output_dir: charts\n\
             canvas: { width: 300, height: 200 }\n\
             watch: { debounce_ms: 10 }\n\
             plots:\n  - type: Spread\n  - type: AverageAndSpread\n",
        )
        .unwrap();

        let mut plot_args = args(Path::new("run.csv"));
        plot_args.output_dir = Some(PathBuf::from("elsewhere"));
        plot_args.side_by_side = true;
        let overrides = WatchOverrides {
            poll: true,
            interval_ms: Some(0),
            debounce_ms: None,
        };
        let session = Session::resolve(&plot_args, config, Some(overrides)).unwrap();

        assert_eq!(names(&session), vec!["spread", "overview-side"]);
        assert_eq!(session.plots[1].layout(), Layout::SideBySide);
        assert_eq!(session.ctx.out_dir, PathBuf::from("elsewhere"));
        assert_eq!(session.ctx.canvas, Some(Canvas::new(300, 200)));
        assert_eq!(session.watch.mode, WatchMode::Poll);
        assert_eq!(session.watch.poll_interval, Duration::from_millis(1));
        assert_eq!(session.watch.debounce, Duration::from_millis(10));
    }

    #[test]
    fn named_plots_replace_configured_ones() {
        let config = Config::parse("plots:\n  - type: Spread\n").unwrap();
        let mut plot_args = args(Path::new("run.csv"));
        plot_args.plot = vec!["speedup".to_owned(), "averages".to_owned()];
        let session = Session::resolve(&plot_args, config, None).unwrap();
        assert_eq!(names(&session), vec!["speedup", "averages"]);
    }

    #[test]
    fn repeated_plots_are_rejected() {
        let mut plot_args = args(Path::new("run.csv"));
        plot_args.plot = vec!["overview".to_owned(), "overview".to_owned()];
        let err = Session::resolve(&plot_args, Config::default(), None).unwrap_err();
        assert!(err.to_string().contains("overview"));

        // Forcing one layout onto both overviews makes them collide
        let config = Config::parse(
            "plots:\n  - type: AverageAndSpread\n  - type: AverageAndSpread\n    layout: SideBySide\n",
        )
        .unwrap();
        let mut plot_args = args(Path::new("run.csv"));
        assert!(Session::resolve(&plot_args, config.clone(), None).is_ok());
        plot_args.side_by_side = true;
        assert!(Session::resolve(&plot_args, config, None).is_err());
    }

    #[tokio::test]
    async fn render_writes_charts_and_reports_bad_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("counters.csv");
        std::fs::write(&csv, SAMPLE).unwrap();

        let mut plot_args = args(&csv);
        plot_args.output_dir = Some(dir.path().join("out"));
        plot_args.plot = vec!["averages".to_owned(), "overview".to_owned()];
        let session = Session::resolve(&plot_args, Config::default(), None).unwrap();

        let paths = session.render().await.unwrap();
        assert_eq!(
            paths,
            vec![
                dir.path().join("out/counters-averages.svg"),
                dir.path().join("out/counters-overview.svg"),
            ]
        );
        assert!(paths.iter().all(|p| p.exists()));

        std::fs::write(&csv, "ThreadCount,1,2\nContainerAvg,x,y\n").unwrap();
        let err = session.render().await.unwrap_err();
        assert!(format!("{err:#}").contains("counters.csv"));
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn table_is_aligned() {
        let table = BenchTable::parse_str(SAMPLE).unwrap();
        let text = format_table(&table);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "ThreadCount           1       2");
        assert_eq!(lines[1], "ContainerAvg     10.500   6.000");
        assert_eq!(lines[4], "LocalCounterStd   0.300   0.250");
    }
}
