use image::{Rgb, RgbImage};
use std::time::Duration;
use tokio::time::Instant;

use crate::detection::{BoundingBox, Detection, Detections};
use crate::dispatch::DispatchSnapshot;

pub const TIE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BELT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const OTHER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const LINE_WIDTH: i32 = 2;

pub fn label_color(label: &str) -> Rgb<u8> {
    match label {
        "tie" => TIE_COLOR,
        "belt" => BELT_COLOR,
        _ => OTHER_COLOR,
    }
}

/// Outline `bbox` on `img`, clipped to the image.
pub fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some(b) = bbox.clamp_to(img.width(), img.height()) else {
        return;
    };
    let (w, h) = (img.width() as i32, img.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && x < w && y < h {
            img.put_pixel(x as u32, y as u32, color);
        }
    };
    for t in 0..LINE_WIDTH {
        for x in b.x1..b.x2 {
            put(x, b.y1 + t);
            put(x, b.y2 - 1 - t);
        }
        for y in b.y1..b.y2 {
            put(b.x1 + t, y);
            put(b.x2 - 1 - t, y);
        }
    }
}

pub fn draw_detections(img: &mut RgbImage, detections: &Detections) {
    for (label, detection) in detections {
        draw_box(img, &detection.bbox, label_color(label));
    }
}

/// `"Tie 87.0%"`
pub fn caption(label: &str, detection: &Detection) -> String {
    let mut chars = label.chars();
    let name = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    format!("{name} {:.1}%", detection.confidence * 100.0)
}

pub fn captions(detections: &Detections) -> Vec<(String, Rgb<u8>)> {
    detections
        .iter()
        .map(|(label, d)| (caption(label, d), label_color(label)))
        .collect()
}

/// Status bar text for the render loop.
pub fn status_line<T>(fps: f64, snapshot: &DispatchSnapshot<T>, now: Instant) -> String {
    let mut text = format!("FPS: {fps:4.1}");
    if snapshot.busy {
        text.push_str(" | Detector: processing...");
    } else {
        match snapshot.result_age(now) {
            Some(age) => text.push_str(&format!(" | last result: {:4.1}s ago", age.as_secs_f64())),
            None => text.push_str(" | last result: (none yet)"),
        }
    }
    if snapshot.failing {
        text.push_str(&format!(
            " | WARN: {} detector failures in a row",
            snapshot.consecutive_failures
        ));
    }
    text
}

/// Exponentially smoothed frames-per-second.
#[derive(Debug, Default)]
pub struct FpsCounter {
    fps: f64,
    last: Option<Instant>,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(prev) = self.last {
            let dt = now.saturating_duration_since(prev);
            if dt > Duration::ZERO {
                self.fps = 0.9 * self.fps + 0.1 / dt.as_secs_f64();
            }
        }
        self.last = Some(now);
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(busy: bool, result: Option<Detections>, at: Option<Instant>) -> DispatchSnapshot<Detections> {
        DispatchSnapshot {
            busy,
            last_result: result,
            last_result_time: at,
            consecutive_failures: 0,
            failing: false,
        }
    }

    fn tie() -> Detections {
        let mut map = Detections::new();
        map.insert(
            "tie".into(),
            Detection { bbox: BoundingBox::new(10, 10, 50, 50), confidence: 0.87 },
        );
        map
    }

    #[test]
    fn draws_tie_outline_in_green() {
        let mut img = RgbImage::new(64, 64);
        draw_detections(&mut img, &tie());
        assert_eq!(img.get_pixel(10, 10), &TIE_COLOR);
        assert_eq!(img.get_pixel(49, 49), &TIE_COLOR);
        assert_eq!(img.get_pixel(30, 11), &TIE_COLOR);
        // Interior untouched
        assert_eq!(img.get_pixel(30, 30), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn box_outside_image_is_ignored() {
        let mut img = RgbImage::new(16, 16);
        draw_box(&mut img, &BoundingBox::new(100, 100, 200, 200), OTHER_COLOR);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn caption_formats_percentage() {
        let d = Detection { bbox: BoundingBox::new(0, 0, 1, 1), confidence: 0.87 };
        assert_eq!(caption("tie", &d), "Tie 87.0%");
        assert_eq!(caption("belt", &d), "Belt 87.0%");
    }

    #[test]
    fn status_before_any_result() {
        let now = Instant::now();
        let text = status_line(0.0, &snapshot(false, None, None), now);
        assert_eq!(text, "FPS:  0.0 | last result: (none yet)");
    }

    #[test]
    fn status_while_busy() {
        let now = Instant::now();
        let text = status_line(29.84, &snapshot(true, None, None), now);
        assert_eq!(text, "FPS: 29.8 | Detector: processing...");
    }

    #[test]
    fn status_with_result_age() {
        let at = Instant::now();
        let now = at + Duration::from_millis(1200);
        let text = status_line(30.0, &snapshot(false, Some(tie()), Some(at)), now);
        assert_eq!(text, "FPS: 30.0 | last result:  1.2s ago");
    }

    #[test]
    fn status_shows_failure_warning() {
        let now = Instant::now();
        let mut snap = snapshot(false, Some(tie()), Some(now));
        snap.consecutive_failures = 4;
        snap.failing = true;
        let text = status_line(30.0, &snap, now);
        assert!(text.ends_with(" | WARN: 4 detector failures in a row"));
    }

    #[test]
    fn fps_smoothing() {
        let start = Instant::now();
        let mut fps = FpsCounter::new();
        assert_eq!(fps.tick(start), 0.0);
        let v = fps.tick(start + Duration::from_millis(100));
        assert!((v - 1.0).abs() < 1e-9);
        let v = fps.tick(start + Duration::from_millis(200));
        assert!((v - 1.9).abs() < 1e-9);
    }
}
