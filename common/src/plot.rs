use core::fmt::Debug;
use std::path::{Path, PathBuf};

use downcast_rs::{Downcast, impl_downcast};
use dyn_clone::{DynClone, clone_trait_object};
use eyre::{Context, Result, bail};
use itertools::Itertools;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tokio::fs::create_dir_all;
use tracing::debug;

use crate::{
    chart::{Canvas, ChartSpec, Layout, render_svg},
    table::BenchTable,
};

/// Where and how large the rendered files are
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub out_dir: PathBuf,
    /// File stem shared by every plot, usually the stem of the CSV
    pub stem: String,
    /// Overrides [`Plot::canvas`] for every plot when set
    pub canvas: Option<Canvas>,
}

impl RenderContext {
    pub fn for_file(csv: &Path, out_dir: impl Into<PathBuf>, canvas: Option<Canvas>) -> Self {
        let stem = csv
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("bench")
            .to_owned();
        Self {
            out_dir: out_dir.into(),
            stem,
            canvas,
        }
    }

    pub fn output_path(&self, plot_name: &str) -> PathBuf {
        self.out_dir.join(format!("{}-{plot_name}.svg", self.stem))
    }
}

#[typetag::serde(tag = "type")]
pub trait Plot: Debug + DynClone + Downcast + Send + Sync {
    /// Identifier used as the output file suffix
    fn name(&self) -> &'static str;
    /// How the charts returned by [`Plot::charts`] share the canvas
    fn layout(&self) -> Layout {
        Layout::Stacked
    }
    /// Default canvas size, used unless the context overrides it
    fn canvas(&self) -> Canvas {
        Canvas::default()
    }
    /// The charts to draw for `table`
    fn charts(&self, table: &BenchTable) -> Vec<ChartSpec>;
    /// Renders to `<out_dir>/<stem>-<name>.svg` and returns the path
    fn render(&self, table: &BenchTable, ctx: &RenderContext) -> Result<PathBuf> {
        let path = ctx.output_path(self.name());
        let canvas = ctx.canvas.unwrap_or_else(|| self.canvas());
        render_svg(&path, canvas, self.layout(), &self.charts(table))
            .wrap_err_with(|| format!("Render {} plot", self.name()))?;
        Ok(path)
    }
}
clone_trait_object!(Plot);
impl_downcast!(Plot);

pub async fn ensure_plot_dir(dir: &Path) -> Result<()> {
    create_dir_all(dir)
        .await
        .wrap_err_with(|| format!("Create plot dir {}", dir.display()))
}

/// Fails when two plots would write the same file
pub fn check_unique_names(plots: &[Box<dyn Plot>]) -> Result<()> {
    let duplicates = plots.iter().map(|p| p.name()).duplicates().collect::<Vec<_>>();
    if !duplicates.is_empty() {
        bail!(
            "Plots {} are listed more than once and would overwrite each other",
            duplicates.join(", ")
        );
    }
    Ok(())
}

/// Renders every plot in parallel. Returns the written files in plot order.
pub fn render_all(
    plots: &[Box<dyn Plot>],
    table: &BenchTable,
    ctx: &RenderContext,
) -> Result<Vec<PathBuf>> {
    check_unique_names(plots)?;
    debug!("Rendering {} plot(s) for {}", plots.len(), ctx.stem);
    plots
        .par_iter()
        .map(|plot| plot.render(table, ctx))
        .collect()
}
