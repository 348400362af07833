use std::{fs, ops::Range, path::Path};

use eyre::{Context, Result, bail};
use itertools::{Itertools, MinMaxResult};
use plotters::{coord::Shift, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    Circle,
    Square,
    /// Line only
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineSpec {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    pub marker: Marker,
}

impl LineSpec {
    pub fn new(
        label: impl Into<String>,
        x: impl IntoIterator<Item = f64>,
        y: impl IntoIterator<Item = f64>,
        marker: Marker,
    ) -> Self {
        Self {
            label: label.into(),
            points: x.into_iter().zip(y).collect(),
            marker,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: String,
    /// `None` leaves the x axis undescribed, used when a chart below shares it.
    pub x_label: Option<String>,
    pub y_label: String,
    pub lines: Vec<LineSpec>,
}

/// How several charts share one canvas
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    Stacked,
    SideBySide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(1000, 600)
    }
}

/// Padded range covering every finite value. With `from_zero` the range of
/// non-negative data starts at 0.
pub fn axis_range(values: impl IntoIterator<Item = f64>, from_zero: bool) -> Range<f64> {
    let (mut lo, mut hi) = match values.into_iter().filter(|v| v.is_finite()).minmax() {
        MinMaxResult::NoElements => return 0.0..1.0,
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };
    let anchored = from_zero && lo >= 0.0;
    if anchored {
        lo = 0.0;
    }
    if hi <= lo {
        hi = lo + 1.0;
        if !anchored {
            lo -= 1.0;
        }
    }
    let pad = (hi - lo) * 0.05;
    if !anchored {
        lo -= pad;
    }
    lo..hi + pad
}

/// Draws one line chart into `area`. Non-finite points are skipped.
pub fn draw_chart<DB>(area: &DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let lines = spec
        .lines
        .iter()
        .map(|line| {
            let points = line
                .points
                .iter()
                .copied()
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .collect::<Vec<_>>();
            (line, points)
        })
        .collect::<Vec<_>>();

    let x_range = axis_range(
        lines.iter().flat_map(|(_, points)| points.iter().map(|p| p.0)),
        false,
    );
    let y_range = axis_range(
        lines.iter().flat_map(|(_, points)| points.iter().map(|p| p.1)),
        true,
    );
    let x_ticks = lines
        .iter()
        .map(|(_, points)| points.len())
        .max()
        .unwrap_or_default()
        .clamp(2, 12);

    let mut chart = ChartBuilder::on(area)
        .caption(&spec.title, ("sans-serif", 24).into_font())
        .margin(12)
        .x_label_area_size(45)
        .y_label_area_size(65)
        .build_cartesian_2d(x_range, y_range)?;

    let thread_label = |x: &f64| format!("{x:.0}");
    {
        let mut mesh = chart.configure_mesh();
        mesh.x_labels(x_ticks)
            .x_label_formatter(&thread_label)
            .y_desc(spec.y_label.as_str());
        if let Some(x_label) = &spec.x_label {
            mesh.x_desc(x_label.as_str());
        }
        mesh.draw()?;
    }

    for (idx, (line, points)) in lines.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(line.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        match line.marker {
            Marker::Circle => {
                chart.draw_series(points.iter().map(|p| Circle::new(*p, 4, color.filled())))?
            }
            Marker::Square => chart.draw_series(points.iter().map(|p| {
                EmptyElement::at(*p) + Rectangle::new([(-4, -4), (4, 4)], color.filled())
            }))?,
            Marker::Plain => continue,
        };
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    Ok(())
}

/// Renders `charts` into an SVG document held in memory.
pub fn render_svg_string(canvas: Canvas, layout: Layout, charts: &[ChartSpec]) -> Result<String> {
    if charts.is_empty() {
        bail!("Nothing to render");
    }

    let mut svg = String::new();
    {
        let root =
            SVGBackend::with_string(&mut svg, (canvas.width, canvas.height)).into_drawing_area();
        root.fill(&WHITE)?;
        let areas = match layout {
            Layout::Stacked => root.split_evenly((charts.len(), 1)),
            Layout::SideBySide => root.split_evenly((1, charts.len())),
        };
        for (area, chart) in areas.iter().zip(charts) {
            draw_chart(area, chart).wrap_err_with(|| format!("Draw chart {:?}", chart.title))?;
        }
        root.present()?;
    }
    Ok(svg)
}

/// Renders `charts` to `path`. The file is replaced atomically so a viewer
/// watching it never loads a partial document.
pub fn render_svg(path: &Path, canvas: Canvas, layout: Layout, charts: &[ChartSpec]) -> Result<()> {
    let svg = render_svg_string(canvas, layout, charts)?;
    let tmp = path.with_extension("svg.tmp");
    fs::write(&tmp, svg).wrap_err_with(|| format!("Write {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, path) {
        _ = fs::remove_file(&tmp);
        return Err(err).wrap_err_with(|| format!("Replace {}", path.display()));
    }
    debug!("Rendered {} chart(s) to {}", charts.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chart(title: &str) -> ChartSpec {
        ChartSpec {
            title: title.to_owned(),
            x_label: Some("Number of Threads".to_owned()),
            y_label: "Average Time (μs)".to_owned(),
            lines: vec![
                LineSpec::new("ContainerAvg", [1.0, 2.0, 4.0], [10.0, 6.0, 4.0], Marker::Circle),
                LineSpec::new(
                    "LocalCounterAvg",
                    [1.0, 2.0, 4.0],
                    [9.0, f64::NAN, 2.0],
                    Marker::Square,
                ),
            ],
        }
    }

    #[test]
    fn axis_range_pads_and_anchors() {
        let range = axis_range([1.0, 8.0], false);
        assert!((range.start - 0.65).abs() < 1e-9);
        assert!((range.end - 8.35).abs() < 1e-9);

        let range = axis_range([2.0, 10.0], true);
        assert_eq!(range.start, 0.0);
        assert!((range.end - 10.5).abs() < 1e-9);

        let range = axis_range([-2.0, 2.0], true);
        assert!(range.start < -2.0);
    }

    #[test]
    fn axis_range_handles_degenerate_input() {
        assert_eq!(axis_range([], false), 0.0..1.0);
        assert_eq!(axis_range([f64::NAN], true), 0.0..1.0);

        let range = axis_range([4.0], false);
        assert!(range.start < 4.0 && range.end > 4.0);

        let range = axis_range([0.0, 0.0], true);
        assert_eq!(range.start, 0.0);
        assert!(range.end > 0.0);
    }

    #[test]
    fn line_spec_zips_coordinates() {
        let line = LineSpec::new("a", [1.0, 2.0, 3.0], [4.0, 5.0], Marker::Circle);
        assert_eq!(line.points, vec![(1.0, 4.0), (2.0, 5.0)]);
    }

    #[test]
    fn renders_svg_with_titles_and_legend() {
        let svg = render_svg_string(
            Canvas::new(800, 900),
            Layout::Stacked,
            &[sample_chart("Benchmark Averages"), sample_chart("Spread")],
        )
        .unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Benchmark Averages"));
        assert!(svg.contains("Spread"));
        assert!(svg.contains("LocalCounterAvg"));
    }

    #[test]
    fn rendering_nothing_is_an_error() {
        assert!(render_svg_string(Canvas::default(), Layout::SideBySide, &[]).is_err());
    }

    #[test]
    fn render_svg_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        fs::write(&path, "stale").unwrap();
        render_svg(
            &path,
            Canvas::default(),
            Layout::SideBySide,
            &[sample_chart("Benchmark Averages")],
        )
        .unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("Benchmark Averages"));
        assert!(!dir.path().join("chart.svg.tmp").exists());
    }

    #[test]
    fn failed_replace_removes_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        fs::create_dir(&path).unwrap();
        let err = render_svg(
            &path,
            Canvas::default(),
            Layout::Stacked,
            &[sample_chart("Benchmark Averages")],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Replace"));
        assert!(!dir.path().join("chart.svg.tmp").exists());
        assert!(path.is_dir());
    }
}
