//! background — per-pixel mean over the selected frames
//!
//! The accumulator is fed every frame of the first pass.  Frames rejected by
//! the selector are still shape checked so a stream that changes geometry
//! half-way fails here rather than during localization.

use rayon::prelude::*;
use tracing::debug;

use crate::error::{Result, TrackError};
use crate::frame::{Frame, FrameShape};
use crate::selection::FrameSelector;

/// Averaged reference image subtracted from every analysed frame.
#[derive(Debug, Clone)]
pub struct Background {
    frame: Frame,
    records: u64,
}

impl Background {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    pub fn shape(&self) -> FrameShape {
        self.frame.shape()
    }

    /// Number of frames averaged into the reference.
    pub fn records(&self) -> u64 {
        self.records
    }
}

pub struct BackgroundAccumulator {
    selector: FrameSelector,
    /// Running sums indexed `(y * width + x) * channels + c`.
    sums: Vec<f64>,
    template: Option<Frame>,
    records: u64,
}

impl BackgroundAccumulator {
    pub fn new(selector: FrameSelector) -> Self {
        Self {
            selector,
            sums: Vec::new(),
            template: None,
            records: 0,
        }
    }

    pub fn selector(&self) -> FrameSelector {
        self.selector
    }

    /// Frames summed so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn ingest(&mut self, index: u64, frame: &Frame) -> Result<()> {
        frame.ensure_u8()?;

        let components = frame.component_count();
        if self.template.is_none() {
            self.sums = vec![0.0; components];
            self.template = Some(frame.clone());
            debug!(
                width = frame.width,
                height = frame.height,
                channels = frame.channels,
                "background accumulator initialised"
            );
        }
        if self.sums.len() != components {
            return Err(TrackError::ComponentCount {
                expected: self.sums.len(),
                found: components,
            });
        }
        if let Some(template) = &self.template {
            template.ensure_compatible(frame)?;
        }

        if !self.selector.accept(index) {
            return Ok(());
        }

        let row_len = frame.width as usize * frame.channels as usize;
        if row_len > 0 {
            self.sums
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(y, sums)| {
                    for (sum, &value) in sums.iter_mut().zip(frame.row(y as u32)) {
                        *sum += f64::from(value);
                    }
                });
        }

        self.records += 1;
        Ok(())
    }

    /// Round every mean half-up into the template's buffer.
    pub fn finalize(self) -> Result<Background> {
        let records = self.records;
        let mut frame = match self.template {
            Some(frame) if records > 0 => frame,
            _ => return Err(TrackError::EmptyBackground),
        };

        let row_len = frame.width as usize * frame.channels as usize;
        let count = records as f64;
        for y in 0..frame.height {
            let sums = &self.sums[y as usize * row_len..(y as usize + 1) * row_len];
            for (value, &sum) in frame.row_mut(y).iter_mut().zip(sums) {
                *value = (sum / count + 0.5) as u8;
            }
        }

        debug!(records, "background finalised");
        Ok(Background { frame, records })
    }
}
