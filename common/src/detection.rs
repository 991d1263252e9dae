use std::collections::BTreeMap;

/// Axis-aligned box in frame pixel coordinates, corners inclusive of `x1,y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Convert a centre/size box (the shape hosted detectors return) to corners.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x1: (cx - width / 2.0).round() as i32,
            y1: (cy - height / 2.0).round() as i32,
            x2: (cx + width / 2.0).round() as i32,
            y2: (cy + height / 2.0).round() as i32,
        }
    }

    /// Computed in i64: corners may sit at the i32 limits for absurd boxes.
    pub fn width(&self) -> u64 {
        (self.x2 as i64 - self.x1 as i64).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.y2 as i64 - self.y1 as i64).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    /// Clip to a `width x height` frame. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as i32, height as i32);
        let clamped = Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        (clamped.area() > 0).then_some(clamped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in `0..=1`.
    pub confidence: f32,
}

/// Best detection per label, the result of one detector call.
pub type Detections = BTreeMap<String, Detection>;

/// Fold a detection into `map`, keeping only the highest confidence per label.
pub fn keep_best(map: &mut Detections, label: &str, detection: Detection) {
    match map.get(label) {
        Some(existing) if existing.confidence >= detection.confidence => {}
        _ => {
            map.insert(label.to_string(), detection);
        }
    }
}

/// The largest box by area, ties resolved towards the first one.
pub fn largest<'a, I>(boxes: I) -> Option<BoundingBox>
where
    I: IntoIterator<Item = &'a BoundingBox>,
{
    boxes
        .into_iter()
        .fold(None, |best: Option<BoundingBox>, b| match best {
            Some(current) if current.area() >= b.area() => Some(current),
            _ => Some(*b),
        })
}
