//! rendering — per-frame overlay of the tracked body
//!
//! The overlay is described first (`Overlay`) and then painted into the BGR
//! frame.  Pixels outside the crop window are inverted, foreground pixels can
//! be highlighted, and the body ellipse is filled red when the record is
//! trusted, blue otherwise.  The head half of the ellipse also gets full green.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::background::Background;
use crate::detection::{BlobLocator, CropMargins, PixelClass};
use crate::error::Result;
use crate::frame::Frame;
use crate::record::{EllipseRecord, Vec2};

/// Minor radius used for display, so thin bodies stay visible.
pub const MIN_DISPLAY_MINOR: f64 = 4.0;

/// Extra pixels around the major radius scanned when filling the ellipse.
const BOX_MARGIN: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPointClass {
    Valid,
    Invalid,
}

/// Ellipse to paint for one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayEllipse {
    pub center: Vec2,
    pub direction: Vec2,
    pub major: f64,
    pub minor: f64,
    pub class: TrackPointClass,
}

impl OverlayEllipse {
    pub fn from_record(record: &EllipseRecord) -> Self {
        Self {
            center: record.position,
            direction: record.direction,
            major: record.major,
            minor: record.minor.max(MIN_DISPLAY_MINOR),
            class: if record.valid {
                TrackPointClass::Valid
            } else {
                TrackPointClass::Invalid
            },
        }
    }

    /// `Some(is_head_side)` when pixel `(x, y)` lies strictly inside.
    pub fn hit(&self, x: f64, y: f64) -> Option<bool> {
        let p = Vec2::new(x, y) - self.center;
        let perpendicular = Vec2::new(-self.direction.y, self.direction.x);
        let along = p.dot(&self.direction) / self.major;
        let across = p.dot(&perpendicular) / self.minor;
        (along * along + across * across < 1.0).then_some(along > 0.0)
    }

    /// Pixel box `(x_begin, x_end, y_begin, y_end)` scanned for the fill.
    pub fn scan_box(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let radius = (self.major + BOX_MARGIN).trunc();
        let span = |c: f64, limit: u32| {
            let begin = (c - radius).max(0.0) as u32;
            let end = (c + radius).min(f64::from(limit)).max(0.0) as u32;
            (begin, end.max(begin))
        };
        let (x_begin, x_end) = span(self.center.x, width);
        let (y_begin, y_end) = span(self.center.y, height);
        (x_begin, x_end, y_begin, y_end)
    }

    /// Blue, green, red for one filled pixel.
    pub fn color(&self, head_side: bool) -> [u8; 3] {
        let green = if head_side { 0xff } else { 0 };
        match self.class {
            TrackPointClass::Valid => [0, green, 0xff],
            TrackPointClass::Invalid => [0xff, green, 0],
        }
    }
}

/// Drawing instructions for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    /// Everything outside these margins is drawn inverted.
    pub crop: CropMargins,
    /// `None` for a record with nothing to draw.
    pub ellipse: Option<OverlayEllipse>,
}

pub struct OverlayRenderer<'a> {
    locator: BlobLocator<'a>,
    hilite: bool,
}

impl<'a> OverlayRenderer<'a> {
    pub fn new(background: &'a Background, crop: CropMargins, threshold: u8, hilite: bool) -> Self {
        Self {
            locator: BlobLocator::new(background, crop, threshold),
            hilite,
        }
    }

    pub fn overlay(&self, record: &EllipseRecord) -> Overlay {
        Overlay {
            crop: self.locator.crop(),
            ellipse: record
                .is_defined()
                .then(|| OverlayEllipse::from_record(record)),
        }
    }

    /// Paint the overlay of `record` into `frame`.
    pub fn render(&self, frame: &mut Frame, record: &EllipseRecord) -> Result<()> {
        self.locator.check(frame)?;
        let overlay = self.overlay(record);

        for y in 0..frame.height {
            for x in 0..frame.width {
                let mask: [u8; 3] = match self.locator.classify(frame, x, y) {
                    PixelClass::Cropped => [0xff, 0xff, 0xff],
                    PixelClass::Foreground if self.hilite => [0xff, 0x00, 0xff],
                    _ => continue,
                };
                for (value, m) in frame.pixel_mut(x, y).iter_mut().zip(mask) {
                    *value ^= m;
                }
            }
        }

        if let Some(ellipse) = overlay.ellipse {
            let (x_begin, x_end, y_begin, y_end) = ellipse.scan_box(frame.width, frame.height);
            for y in y_begin..y_end {
                for x in x_begin..x_end {
                    if let Some(head_side) = ellipse.hit(f64::from(x), f64::from(y)) {
                        let color = ellipse.color(head_side);
                        for (value, c) in frame.pixel_mut(x, y).iter_mut().zip(color) {
                            *value = c;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Image export ─────────────────────────────────────────────────────────────

/// Convert a BGR (or single channel) frame into an RGB image.
pub fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    frame.ensure_u8()?;
    Ok(RgbImage::from_fn(frame.width, frame.height, |x, y| {
        match *frame.pixel(x, y) {
            [b, g, r, ..] => Rgb([r, g, b]),
            [l] => Rgb([l, l, l]),
            [l, _] => Rgb([l, l, l]),
            [] => Rgb([0, 0, 0]),
        }
    }))
}

/// Mark the tail-to-head axis of `record` on an exported image.
pub fn draw_axis(image: &mut RgbImage, record: &EllipseRecord, color: Rgb<u8>) {
    if !record.is_defined() {
        return;
    }
    let (tail, head) = (record.tail(), record.head());
    draw_line_segment_mut(
        image,
        (tail.x as f32, tail.y as f32),
        (head.x as f32, head.y as f32),
        color,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundAccumulator;
    use crate::selection::FrameSelector;

    const SIZE: u32 = 20;

    fn black_background() -> Background {
        let mut acc = BackgroundAccumulator::new(FrameSelector::all());
        acc.ingest(0, &Frame::new(SIZE, SIZE, 3)).unwrap();
        acc.finalize().unwrap()
    }

    fn body(valid: bool) -> EllipseRecord {
        let mut record = EllipseRecord::new(Vec2::new(10.0, 10.0), Vec2::new(1.0, 0.0), 6.0, 2.0);
        record.valid = valid;
        record
    }

    #[test]
    fn overlay_widens_thin_bodies() {
        let bg = black_background();
        let renderer = OverlayRenderer::new(&bg, CropMargins::new(1, 1, 1, 1), 64, false);
        let overlay = renderer.overlay(&body(true));
        let ellipse = overlay.ellipse.unwrap();
        assert_eq!(ellipse.minor, MIN_DISPLAY_MINOR);
        assert_eq!(ellipse.major, 6.0);
        assert_eq!(ellipse.class, TrackPointClass::Valid);
        assert_eq!(overlay.crop, CropMargins::new(1, 1, 1, 1));

        assert!(renderer.overlay(&EllipseRecord::undefined()).ellipse.is_none());
    }

    #[test]
    fn valid_body_is_red_with_green_head() {
        let bg = black_background();
        let renderer = OverlayRenderer::new(&bg, CropMargins::new(1, 1, 1, 1), 64, false);
        let mut frame = Frame::new(SIZE, SIZE, 3);
        renderer.render(&mut frame, &body(true)).unwrap();

        assert_eq!(frame.pixel(0, 0), &[0xff, 0xff, 0xff]);
        assert_eq!(frame.pixel(13, 10), &[0, 0xff, 0xff]);
        assert_eq!(frame.pixel(7, 10), &[0, 0, 0xff]);
        assert_eq!(frame.pixel(10, 13), &[0, 0, 0xff]);
        assert_eq!(frame.pixel(10, 15), &[0, 0, 0]);
    }

    #[test]
    fn invalid_body_is_blue() {
        let bg = black_background();
        let renderer = OverlayRenderer::new(&bg, CropMargins::default(), 64, false);
        let mut frame = Frame::new(SIZE, SIZE, 3);
        renderer.render(&mut frame, &body(false)).unwrap();

        assert_eq!(frame.pixel(13, 10), &[0xff, 0xff, 0]);
        assert_eq!(frame.pixel(7, 10), &[0xff, 0, 0]);
        assert_eq!(frame.pixel(0, 0), &[0, 0, 0]);
    }

    #[test]
    fn hilite_flips_blue_and_red_of_foreground() {
        let bg = black_background();
        let mut frame = Frame::new(SIZE, SIZE, 3);
        frame.pixel_mut(3, 3).copy_from_slice(&[200, 200, 200]);
        let mut plain = frame.clone();

        OverlayRenderer::new(&bg, CropMargins::default(), 64, true)
            .render(&mut frame, &EllipseRecord::undefined())
            .unwrap();
        assert_eq!(frame.pixel(3, 3), &[55, 200, 55]);
        assert_eq!(frame.pixel(4, 3), &[0, 0, 0]);

        OverlayRenderer::new(&bg, CropMargins::default(), 64, false)
            .render(&mut plain, &EllipseRecord::undefined())
            .unwrap();
        assert_eq!(plain.pixel(3, 3), &[200, 200, 200]);
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let bg = black_background();
        let renderer = OverlayRenderer::new(&bg, CropMargins::default(), 64, false);
        let mut frame = Frame::new(SIZE + 1, SIZE, 3);
        assert!(renderer.render(&mut frame, &body(true)).unwrap_err().is_shape_error());
    }

    #[test]
    fn rgb_export_swaps_channel_order() {
        let frame = Frame::from_raw(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let image = to_rgb_image(&frame).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgb([3, 2, 1]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([6, 5, 4]));
    }

    #[test]
    fn axis_is_drawn_between_tail_and_head() {
        let mut image = RgbImage::new(SIZE, SIZE);
        let white = Rgb([255, 255, 255]);
        draw_axis(&mut image, &body(true), white);
        assert_eq!(image.get_pixel(4, 10), &white);
        assert_eq!(image.get_pixel(10, 10), &white);
        assert_eq!(image.get_pixel(10, 5), &Rgb([0, 0, 0]));
    }
}
