use common::{
    chart::{Canvas, ChartSpec, Layout, LineSpec, Marker},
    plot::Plot,
    table::{BenchTable, Series},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const X_LABEL: &str = "Number of Threads";

/// Names accepted by [`plot_by_name`]
pub const PLOT_NAMES: &[&str] = &["averages", "spread", "overview", "speedup"];

/// Mean time of both counters per thread count
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Averages;

/// Standard deviation of both counters per thread count
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Spread;

/// Averages and spread on one canvas
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AverageAndSpread {
    #[serde(default)]
    pub layout: Layout,
}

/// Speedup over the smallest thread count, with the ideal linear speedup
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Speedup;

#[typetag::serde]
impl Plot for Averages {
    fn name(&self) -> &'static str {
        "averages"
    }

    fn charts(&self, table: &BenchTable) -> Vec<ChartSpec> {
        vec![averages_chart(table, true)]
    }
}

#[typetag::serde]
impl Plot for Spread {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn charts(&self, table: &BenchTable) -> Vec<ChartSpec> {
        vec![spread_chart(table)]
    }
}

#[typetag::serde]
impl Plot for AverageAndSpread {
    fn name(&self) -> &'static str {
        match self.layout {
            Layout::Stacked => "overview",
            Layout::SideBySide => "overview-side",
        }
    }

    fn layout(&self) -> Layout {
        self.layout
    }

    fn canvas(&self) -> Canvas {
        match self.layout {
            Layout::Stacked => Canvas::new(1000, 1200),
            Layout::SideBySide => Canvas::new(1200, 500),
        }
    }

    fn charts(&self, table: &BenchTable) -> Vec<ChartSpec> {
        // Stacked charts share the x axis, so only the bottom one names it
        let top_has_x_label = self.layout == Layout::SideBySide;
        vec![averages_chart(table, top_has_x_label), spread_chart(table)]
    }
}

#[typetag::serde]
impl Plot for Speedup {
    fn name(&self) -> &'static str {
        "speedup"
    }

    fn charts(&self, table: &BenchTable) -> Vec<ChartSpec> {
        let base = table.thread_counts.first().copied().unwrap_or(1).max(1);
        let mut lines = table
            .speedups()
            .into_iter()
            .zip([Marker::Circle, Marker::Square])
            .map(|((row, values), marker)| {
                let label = row.label().trim_end_matches("Avg");
                LineSpec::new(label, table.x_values(), values, marker)
            })
            .collect::<Vec<_>>();
        if lines
            .iter()
            .any(|line| line.points.iter().any(|(_, y)| !y.is_finite()))
        {
            warn!("Skipping speedup points with a non-positive average");
        }
        lines.push(LineSpec::new(
            "Ideal",
            table.x_values(),
            table.x_values().map(|t| t / f64::from(base)),
            Marker::Plain,
        ));
        vec![ChartSpec {
            title: "Speedup".to_owned(),
            x_label: Some(X_LABEL.to_owned()),
            y_label: format!("Speedup over {base} thread(s)"),
            lines,
        }]
    }
}

fn series_lines(table: &BenchTable, series: [Series<'_>; 2]) -> Vec<LineSpec> {
    series
        .into_iter()
        .zip([Marker::Circle, Marker::Square])
        .map(|(series, marker)| {
            LineSpec::new(
                series.label(),
                table.x_values(),
                series.values.iter().copied(),
                marker,
            )
        })
        .collect()
}

fn averages_chart(table: &BenchTable, with_x_label: bool) -> ChartSpec {
    ChartSpec {
        title: "Benchmark Averages".to_owned(),
        x_label: with_x_label.then(|| X_LABEL.to_owned()),
        y_label: "Average Time (μs)".to_owned(),
        lines: series_lines(table, table.averages()),
    }
}

fn spread_chart(table: &BenchTable) -> ChartSpec {
    ChartSpec {
        title: "Benchmark Spread (Standard Deviation)".to_owned(),
        x_label: Some(X_LABEL.to_owned()),
        y_label: "Std Dev (μs)".to_owned(),
        lines: series_lines(table, table.spreads()),
    }
}

/// Plot for one of [`PLOT_NAMES`]
pub fn plot_by_name(name: &str, layout: Layout) -> Option<Box<dyn Plot>> {
    let plot: Box<dyn Plot> = match name {
        "averages" => Box::new(Averages),
        "spread" => Box::new(Spread),
        "overview" => Box::new(AverageAndSpread { layout }),
        "speedup" => Box::new(Speedup),
        _ => return None,
    };
    Some(plot)
}

/// Touches every plot kind so their `typetag` registrations are linked in
pub fn init_plots() {
    for name in PLOT_NAMES {
        if let Some(plot) = plot_by_name(name, Layout::default()) {
            debug!("Registered plot {plot:?}");
        }
    }
}

/// Plots rendered when nothing else is configured
pub fn default_plots() -> Vec<Box<dyn Plot>> {
    vec![Box::new(AverageAndSpread::default())]
}
