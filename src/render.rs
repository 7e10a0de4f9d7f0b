//! Box overlays for annotated output frames.
//!
//! - Each person box is outlined in red, two pixels thick.
//! - Each of up to `max_labels` predictions gets a filled label strip below
//!   the box's top edge, coloured from the plate.
//! - Glyphs are not rendered; label text goes to the log instead (see
//!   [`label_text`]).

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::frame::Frame;
use crate::task::{BBox, Prediction};

pub const DEFAULT_PLATE: &str = "03045e-023e8a-0077b6-0096c7-00b4d8-48cae4";
pub const DEFAULT_MAX_LABELS: usize = 5;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_ROW_HEIGHT: i32 = 18;
const LABEL_STRIP_HEIGHT: u32 = 16;
const LABEL_CHAR_WIDTH: u32 = 9;

/// Draws boxes and predictions onto a frame in place.
pub trait Annotator: Send {
    fn annotate(&self, frame: &mut Frame, boxes: &[BBox], predictions: &[Vec<Prediction>]);
}

/// `take (an object) from (a person)` -> `take ... from ...`
pub fn abbrev(label: &str) -> String {
    let mut out = label.to_string();
    while let Some(start) = out.find('(') {
        let Some(end) = out[start..].find(')').map(|offset| start + offset) else {
            break;
        };
        out.replace_range(start..=end, "...");
    }
    out
}

pub fn label_text(prediction: &Prediction) -> String {
    format!("{}: {:.4}", abbrev(&prediction.label), prediction.score)
}

pub struct BoxAnnotator {
    plate: Vec<Rgb<u8>>,
    max_labels: usize,
}

impl BoxAnnotator {
    pub fn new(plate: &str, max_labels: usize) -> Result<Self> {
        let plate = parse_plate(plate)?;
        if plate.len() < 2 {
            return Err(anyhow!("colour plate needs at least two colours"));
        }
        Ok(Self { plate, max_labels })
    }

    fn label_color(&self, k: usize) -> Rgb<u8> {
        // Slot 0 is reserved; labels start at the second colour.
        self.plate[1 + k % (self.plate.len() - 1)]
    }
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self {
            plate: parse_plate(DEFAULT_PLATE).unwrap_or_else(|_| vec![BOX_COLOR; 2]),
            max_labels: DEFAULT_MAX_LABELS,
        }
    }
}

impl Annotator for BoxAnnotator {
    fn annotate(&self, frame: &mut Frame, boxes: &[BBox], predictions: &[Vec<Prediction>]) {
        let image = frame.image_mut();
        for (bbox, preds) in boxes.iter().zip(predictions) {
            let (x, y) = (bbox.x1 as i32, bbox.y1 as i32);
            draw_box(image, x, y, bbox.width() as u32, bbox.height() as u32);

            for (k, pred) in preds.iter().take(self.max_labels).enumerate() {
                let width = label_text(pred).chars().count() as u32 * LABEL_CHAR_WIDTH;
                let top = y + LABEL_ROW_HEIGHT * (k as i32 + 1) - 14;
                let strip = Rect::at(x, top).of_size(width.max(1), LABEL_STRIP_HEIGHT);
                draw_filled_rect_mut(image, strip, self.label_color(k));
            }
        }
    }
}

fn draw_box(image: &mut RgbImage, x: i32, y: i32, width: u32, height: u32) {
    if width == 0 || height == 0 {
        return;
    }
    for offset in 0..BOX_THICKNESS {
        let rect = Rect::at(x - offset, y - offset)
            .of_size(width + (offset * 2) as u32, height + (offset * 2) as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}

fn parse_plate(plate: &str) -> Result<Vec<Rgb<u8>>> {
    plate
        .split('-')
        .map(|hex| {
            let hex = hex.trim();
            if hex.len() != 6 {
                return Err(anyhow!("plate colour '{}' must be 6 hex digits", hex));
            }
            let channel = |range: std::ops::Range<usize>| {
                u8::from_str_radix(&hex[range], 16)
                    .map_err(|_| anyhow!("plate colour '{}' is not hex", hex))
            };
            Ok(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviates_parenthesised_objects() {
        assert_eq!(abbrev("take (an object) from (a person)"), "take ... from ...");
        assert_eq!(abbrev("drowning"), "drowning");
        assert_eq!(abbrev("broken (label"), "broken (label");
    }

    #[test]
    fn label_text_has_four_decimals() {
        assert_eq!(label_text(&Prediction::new("drowning", 0.95)), "drowning: 0.9500");
    }

    #[test]
    fn default_plate_parses() {
        let annotator = BoxAnnotator::new(DEFAULT_PLATE, 5).unwrap();
        assert_eq!(annotator.plate[0], Rgb([0x03, 0x04, 0x5e]));
        assert_eq!(annotator.plate.len(), 6);
        assert!(BoxAnnotator::new("zzzzzz-000000", 5).is_err());
        assert!(BoxAnnotator::new("000000", 5).is_err());
    }

    #[test]
    fn draws_box_outline_and_label_strip() {
        let annotator = BoxAnnotator::default();
        let mut frame = Frame::new(0, RgbImage::new(100, 100));
        let boxes = [BBox::new(20.0, 20.0, 80.0, 80.0)];
        let preds = vec![vec![Prediction::new("drowning", 0.95)]];
        annotator.annotate(&mut frame, &boxes, &preds);

        assert_eq!(*frame.image().get_pixel(20, 50), BOX_COLOR);
        // First label strip spans rows y+4 .. y+20 starting at the box's left edge.
        assert_eq!(*frame.image().get_pixel(30, 30), annotator.label_color(0));
        assert_eq!(*frame.image().get_pixel(50, 60), Rgb([0, 0, 0]));
    }

    #[test]
    fn unpredicted_boxes_still_get_outlines() {
        let annotator = BoxAnnotator::default();
        let mut frame = Frame::new(0, RgbImage::new(50, 50));
        annotator.annotate(&mut frame, &[BBox::new(10.0, 10.0, 40.0, 40.0)], &[Vec::new()]);
        assert_eq!(*frame.image().get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*frame.image().get_pixel(15, 15), Rgb([0, 0, 0]));
    }
}
