//! Face localisation through the hosted detector and the enrollment
//! capture loop built on top of it.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use eduvision_common::capture::FrameSource;
use eduvision_common::config::{DetectorConfig, FaceConfig};
use eduvision_common::detection::{largest, BoundingBox};
use eduvision_common::dispatch::{DetectError, Detector, DispatchSnapshot, Dispatcher};
use eduvision_common::frame::Frame;
use eduvision_common::overlay::{self, FpsCounter, TIE_COLOR};
use eduvision_common::roboflow::RoboflowClient;
use eduvision_common::terminal::{self, Input, Screen, TerminalSession};

use crate::dataset::{self, DatasetError};
use crate::EnrollError;

const FACE_COLOR: Rgb<u8> = TIE_COLOR;
const HINT_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const COUNT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// The largest face in a frame, already cropped for the dataset.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub bbox: BoundingBox,
    pub image: Arc<GrayImage>,
    /// Sequence number of the frame the crop was cut from.
    pub frame_seq: u64,
}

/// Grayscale `size x size` crop of `bbox`, or `None` if the box misses the frame.
pub fn crop_face(frame: &Frame, bbox: &BoundingBox, size: u32) -> Option<GrayImage> {
    let b = bbox.clamp_to(frame.width(), frame.height())?;
    // Clamped to the frame, so every coordinate fits in u32.
    let (x, y) = (b.x1 as u32, b.y1 as u32);
    let region = imageops::crop_imm(frame.image(), x, y, b.width() as u32, b.height() as u32);
    let gray = imageops::grayscale(&region.to_image());
    Some(imageops::resize(&gray, size, size, FilterType::Triangle))
}

/// Finds the largest face with the hosted detector and crops it.
pub struct FaceLocator {
    client: RoboflowClient,
    crop_size: u32,
}

impl FaceLocator {
    pub fn new(detector: &DetectorConfig, face: &FaceConfig) -> Result<Self, DetectError> {
        let client = RoboflowClient::for_model(detector, &face.model, face.version, vec![face.label.clone()])?;
        Ok(Self {
            client,
            crop_size: face.crop_size,
        })
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }
}

impl Detector for FaceLocator {
    type Output = Option<FaceCrop>;

    async fn detect(&self, frame: Frame) -> Result<Option<FaceCrop>, DetectError> {
        let predictions = self.client.predictions(&frame).await?;
        let Some(bbox) = largest(predictions.iter().map(|(_, d)| &d.bbox)) else {
            debug!(seq = frame.seq, captured_at_ms = frame.captured_at_ms, "no face in frame");
            return Ok(None);
        };
        Ok(crop_face(&frame, &bbox, self.crop_size).map(|image| FaceCrop {
            bbox,
            image: Arc::new(image),
            frame_seq: frame.seq,
        }))
    }

    fn name(&self) -> &str {
        "face-locator"
    }
}

/// The face from the latest result, if one was found recently enough.
pub fn fresh_face(
    snapshot: &DispatchSnapshot<Option<FaceCrop>>,
    now: Instant,
    max_age: Duration,
) -> Option<&FaceCrop> {
    let age = snapshot.result_age(now)?;
    if age > max_age {
        return None;
    }
    snapshot.last_result.as_ref()?.as_ref()
}

#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(PathBuf),
    NoFace,
    /// The latest crop was already saved; wait for the detector to see a new frame.
    SameFace,
}

/// Numbered crops written into one student directory.
pub struct CaptureProgress {
    dir: PathBuf,
    target: u32,
    captured: u32,
    last_saved_seq: Option<u64>,
}

impl CaptureProgress {
    pub fn new(dir: &Path, target: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            target,
            captured: 0,
            last_saved_seq: None,
        }
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    pub fn is_complete(&self) -> bool {
        self.captured >= self.target
    }

    /// Save `face` as the next `<n>.jpg`. Each source frame is saved at most once.
    pub fn capture(&mut self, face: Option<&FaceCrop>) -> Result<CaptureOutcome, DatasetError> {
        let Some(face) = face else {
            return Ok(CaptureOutcome::NoFace);
        };
        if self.last_saved_seq == Some(face.frame_seq) {
            return Ok(CaptureOutcome::SameFace);
        }
        let path = dataset::save_crop(&self.dir, self.captured + 1, &face.image)?;
        self.captured += 1;
        self.last_saved_seq = Some(face.frame_seq);
        info!(
            n = self.captured,
            target = self.target,
            frame_seq = face.frame_seq,
            path = %path.display(),
            "saved face image"
        );
        Ok(CaptureOutcome::Saved(path))
    }

    fn title(&self) -> String {
        format!("Add Face Data - Captured: {}/{}", self.captured, self.target)
    }
}

/// Run the interactive capture until the target count is reached or the
/// user quits. Returns the number of images saved.
pub fn run_capture<S: FrameSource>(
    camera: &mut S,
    dispatcher: &mut Dispatcher<FaceLocator>,
    session: &mut TerminalSession,
    progress: &mut CaptureProgress,
    max_crop_age: Duration,
) -> Result<u32, EnrollError> {
    let mut fps = FpsCounter::new();
    let mut notice = String::from("Left Click / Space = Capture Face | Q = Quit");

    while !progress.is_complete() {
        let frame = camera.read()?;
        let now = Instant::now();
        let current_fps = fps.tick(now);
        dispatcher.tick(now, &frame);

        let snapshot = dispatcher.snapshot();
        let face = fresh_face(&snapshot, now, max_crop_age);
        let mut display = frame.to_rgb();
        if let Some(face) = face {
            overlay::draw_box(&mut display, &face.bbox, FACE_COLOR);
        }

        let title = progress.title();
        let captions = vec![
            (format!("Captured: {}/{}", progress.captured(), progress.target), COUNT_COLOR),
            (notice.clone(), HINT_COLOR),
        ];
        let status = overlay::status_line(current_fps, &snapshot, now);
        session.draw(&Screen {
            title: &title,
            image: &display,
            captions: &captions,
            status: &status,
        })?;

        match terminal::poll_input(Duration::from_millis(1))? {
            Some(Input::Quit) => {
                info!(captured = progress.captured(), "capture stopped by user");
                break;
            }
            Some(Input::Capture) => match progress.capture(face)? {
                CaptureOutcome::Saved(path) => notice = format!("Saved {}", path.display()),
                CaptureOutcome::NoFace => {
                    notice = String::from("No face detected, try again");
                    debug!("capture requested without a fresh face");
                }
                CaptureOutcome::SameFace => {
                    notice = String::from("Waiting for a new face...");
                    debug!("capture requested before a new face arrived");
                }
            },
            None => {}
        }
    }

    if progress.is_complete() {
        info!(captured = progress.captured(), "capture target reached");
    }
    Ok(progress.captured())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::scratch_dir;
    use eduvision_common::config::Config;
    use image::RgbImage;

    fn frame() -> Frame {
        let mut img = RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]));
        for y in 20..40 {
            for x in 30..50 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        Frame::new(img, 0, 1)
    }

    fn face_crop(frame_seq: u64) -> FaceCrop {
        FaceCrop {
            bbox: BoundingBox::new(30, 20, 50, 40),
            image: Arc::new(GrayImage::from_pixel(200, 200, image::Luma([128]))),
            frame_seq,
        }
    }

    fn snapshot(result: Option<Option<FaceCrop>>, at: Option<Instant>) -> DispatchSnapshot<Option<FaceCrop>> {
        DispatchSnapshot {
            busy: false,
            last_result: result,
            last_result_time: at,
            consecutive_failures: 0,
            failing: false,
        }
    }

    #[test]
    fn crop_is_grayscale_and_resized() {
        let crop = crop_face(&frame(), &BoundingBox::new(30, 20, 50, 40), 200).unwrap();
        assert_eq!(crop.dimensions(), (200, 200));
        assert!(crop.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn crop_outside_frame_is_none() {
        assert!(crop_face(&frame(), &BoundingBox::new(200, 200, 260, 260), 200).is_none());
    }

    #[test]
    fn crop_is_clipped_to_frame() {
        let crop = crop_face(&frame(), &BoundingBox::new(-10, -10, 20, 20), 50).unwrap();
        assert_eq!(crop.dimensions(), (50, 50));
    }

    #[test]
    fn fresh_face_respects_age_limit() {
        let at = Instant::now();
        let max = Duration::from_secs(1);
        let snap = snapshot(Some(Some(face_crop(1))), Some(at));

        assert!(fresh_face(&snap, at + Duration::from_millis(500), max).is_some());
        assert!(fresh_face(&snap, at + Duration::from_millis(1500), max).is_none());
        assert!(fresh_face(&snapshot(Some(None), Some(at)), at, max).is_none());
        assert!(fresh_face(&snapshot(None, None), at, max).is_none());
    }

    #[test]
    fn progress_numbers_files_and_completes() {
        let dir = scratch_dir();
        let mut progress = CaptureProgress::new(&dir, 2);
        assert_eq!(progress.title(), "Add Face Data - Captured: 0/2");

        let first = progress.capture(Some(&face_crop(10))).unwrap();
        assert_eq!(first, CaptureOutcome::Saved(dir.join("1.jpg")));
        assert!(!progress.is_complete());
        let second = progress.capture(Some(&face_crop(11))).unwrap();
        assert_eq!(second, CaptureOutcome::Saved(dir.join("2.jpg")));
        assert!(progress.is_complete());

        let saved = image::open(dir.join("2.jpg")).unwrap();
        assert_eq!((saved.width(), saved.height()), (200, 200));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn repeated_capture_of_same_frame_is_refused() {
        let dir = scratch_dir();
        let mut progress = CaptureProgress::new(&dir, 50);
        let face = face_crop(7);

        // Key autorepeat delivers several captures per detector result.
        assert_eq!(progress.capture(Some(&face)).unwrap(), CaptureOutcome::Saved(dir.join("1.jpg")));
        assert_eq!(progress.capture(Some(&face)).unwrap(), CaptureOutcome::SameFace);
        assert_eq!(progress.capture(Some(&face.clone())).unwrap(), CaptureOutcome::SameFace);
        assert_eq!(progress.captured(), 1);
        assert!(!dir.join("2.jpg").exists());

        let next = face_crop(8);
        assert_eq!(progress.capture(Some(&next)).unwrap(), CaptureOutcome::Saved(dir.join("2.jpg")));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn capture_without_face_saves_nothing() {
        let dir = scratch_dir();
        let mut progress = CaptureProgress::new(&dir, 50);
        assert_eq!(progress.capture(None).unwrap(), CaptureOutcome::NoFace);
        assert_eq!(progress.captured(), 0);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn locator_picks_the_largest_face() {
        use axum::routing::post;
        use axum::{Json, Router};

        let app = Router::new().route(
            "/:model/:version",
            post(|| async {
                Json(serde_json::json!({"predictions": [
                    {"x": 10.0, "y": 10.0, "width": 10.0, "height": 10.0, "confidence": 0.95, "class": "face"},
                    {"x": 40.0, "y": 30.0, "width": 20.0, "height": 20.0, "confidence": 0.60, "class": "face"},
                    {"x": 50.0, "y": 50.0, "width": 90.0, "height": 90.0, "confidence": 0.99, "class": "hand"}
                ]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = Config::default();
        config.detector.endpoint = format!("http://{addr}");
        let locator = FaceLocator::new(&config.detector, &config.face).unwrap();
        assert!(locator.url().ends_with("/face-detection/1"));

        let face = locator.detect(frame()).await.unwrap().unwrap();
        assert_eq!(face.bbox, BoundingBox::new(30, 20, 50, 40));
        assert_eq!(face.frame_seq, 1);
        assert_eq!(face.image.dimensions(), (200, 200));
        assert!(face.image.pixels().all(|p| p.0[0] == 255));
    }
}
