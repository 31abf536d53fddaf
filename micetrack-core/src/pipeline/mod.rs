//! pipeline — three sequential passes over a replayable frame source
//!
//! Pass 0 averages the background, pass 1 measures one ellipse per frame, and
//! the reconstruction passes then repair the whole record sequence.  An
//! optional overlay pass replays the source once more to draw the result.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::background::{Background, BackgroundAccumulator};
use crate::config::AnalysisConfig;
use crate::detection::BlobLocator;
use crate::frame::Frame;
use crate::record::EllipseRecord;
use crate::rendering::OverlayRenderer;
use crate::report::ReportHeader;
use crate::tracking::{Reconstructor, Trajectory};

/// Frames between timing log lines.
const PROF_INTERVAL: u64 = 300;

// ── Frame supply ─────────────────────────────────────────────────────────────

/// A frame sequence that can be walked from the start any number of times,
/// producing the same frames in the same order each time.
pub trait FrameSource {
    fn replay(&mut self, visit: &mut dyn FnMut(u64, &Frame) -> Result<()>) -> Result<()>;

    /// Frame count if known up front (progress reporting only).
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// Frames held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: Vec<Frame>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl FrameSource for MemorySource {
    fn replay(&mut self, visit: &mut dyn FnMut(u64, &Frame) -> Result<()>) -> Result<()> {
        for (index, frame) in self.frames.iter().enumerate() {
            visit(index as u64, frame)?;
        }
        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.frames.len() as u64)
    }
}

// ── Passes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Background,
    Measure,
    Overlay,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Background => "background",
            Stage::Measure => "measure",
            Stage::Overlay => "overlay",
        })
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub background: Background,
    pub trajectory: Trajectory,
}

fn log_timings(stage: Stage, frames: u64, elapsed: Duration) {
    let per_frame = if frames > 0 {
        elapsed.as_secs_f64() * 1000.0 / frames as f64
    } else {
        0.0
    };
    tracing::info!(
        %stage,
        frames,
        ms_per_frame = format!("{per_frame:.2}"),
        "pipeline pass timings"
    );
}

pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate().context("invalid analysis configuration")?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn estimate_background(
        &self,
        source: &mut dyn FrameSource,
        progress: &mut dyn FnMut(Stage, u64),
    ) -> Result<Background> {
        tracing::info!(selector = %self.config.background, "estimating background");
        let start = Instant::now();
        let mut accumulator = BackgroundAccumulator::new(self.config.background);
        let mut frames = 0u64;

        source.replay(&mut |index, frame| {
            accumulator
                .ingest(index, frame)
                .with_context(|| format!("background accumulation failed at frame {index}"))?;
            frames += 1;
            progress(Stage::Background, frames);
            Ok(())
        })?;

        let background = accumulator.finalize()?;
        tracing::info!(records = background.records(), "background estimated");
        log_timings(Stage::Background, frames, start.elapsed());
        Ok(background)
    }

    /// One record per frame, in frame order.
    pub fn measure(
        &self,
        source: &mut dyn FrameSource,
        background: &Background,
        progress: &mut dyn FnMut(Stage, u64),
    ) -> Result<Vec<EllipseRecord>> {
        let shape = background.shape();
        self.config.crop.validate(shape.width, shape.height)?;

        let locator = BlobLocator::new(background, self.config.crop, self.config.threshold);
        let mut records = Vec::new();
        let mut prof_locate = Duration::ZERO;

        source.replay(&mut |index, frame| {
            let locate_start = Instant::now();
            let record = locator
                .locate(frame)
                .with_context(|| format!("blob location failed at frame {index}"))?;
            prof_locate += locate_start.elapsed();

            if !record.is_defined() {
                tracing::debug!(index, "no foreground pixel");
            }
            records.push(record);

            let frames = records.len() as u64;
            progress(Stage::Measure, frames);
            if frames % PROF_INTERVAL == 0 {
                log_timings(Stage::Measure, frames, prof_locate);
            }
            Ok(())
        })?;

        log_timings(Stage::Measure, records.len() as u64, prof_locate);
        Ok(records)
    }

    pub fn reconstruct(&self, records: Vec<EllipseRecord>) -> Result<Trajectory> {
        let start = Instant::now();
        let frames = records.len() as u64;
        let trajectory = Reconstructor::new(self.config.reconstruction())
            .run(records)
            .context("trajectory reconstruction failed")?;
        tracing::info!(
            frames,
            elapsed_ms = format!("{:.2}", start.elapsed().as_secs_f64() * 1000.0),
            "reconstruction timings"
        );
        Ok(trajectory)
    }

    pub fn run(&self, source: &mut dyn FrameSource) -> Result<Analysis> {
        self.run_with_progress(source, &mut |_, _| {})
    }

    pub fn run_with_progress(
        &self,
        source: &mut dyn FrameSource,
        progress: &mut dyn FnMut(Stage, u64),
    ) -> Result<Analysis> {
        let background = self.estimate_background(source, progress)?;
        let records = self.measure(source, &background, progress)?;
        let trajectory = self.reconstruct(records)?;
        Ok(Analysis {
            background,
            trajectory,
        })
    }

    /// Report header for a finished run; `command` is echoed on the first line.
    pub fn report_header(&self, analysis: &Analysis, command: Option<String>) -> ReportHeader {
        let shape = analysis.background.shape();
        ReportHeader {
            command,
            crop: self.config.crop,
            width: shape.width,
            height: shape.height,
            min_elongation: self.config.min_elongation,
            threshold: self.config.threshold,
        }
    }

    /// Replay `source` and hand every frame, overlay drawn, to `sink`.
    pub fn render_overlays(
        &self,
        source: &mut dyn FrameSource,
        analysis: &Analysis,
        progress: &mut dyn FnMut(Stage, u64),
        sink: &mut dyn FnMut(u64, &Frame) -> Result<()>,
    ) -> Result<()> {
        let renderer = OverlayRenderer::new(
            &analysis.background,
            self.config.crop,
            self.config.threshold,
            self.config.hilite,
        );
        let records = &analysis.trajectory.records;
        let start = Instant::now();
        let mut frames = 0u64;

        source.replay(&mut |index, frame| {
            let Some(record) = records.get(index as usize) else {
                bail!("frame {index} has no trajectory record ({} recorded)", records.len());
            };
            let mut canvas = frame.clone();
            renderer
                .render(&mut canvas, record)
                .with_context(|| format!("overlay failed at frame {index}"))?;
            sink(index, &canvas)?;
            frames += 1;
            progress(Stage::Overlay, frames);
            Ok(())
        })?;

        log_timings(Stage::Overlay, frames, start.elapsed());
        Ok(())
    }
}
