mod dataset;
mod db;
mod face;
mod lbph;
mod profile;
mod sheety;
mod train;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use eduvision_common::capture::{self, CaptureError};
use eduvision_common::config::Config;
use eduvision_common::dispatch::{DetectError, Dispatcher};
use eduvision_common::logging;
use eduvision_common::terminal::TerminalSession;
use tracing::{error, info, warn};

use crate::dataset::DatasetError;
use crate::db::{DbError, StudentDb};
use crate::face::{CaptureProgress, FaceLocator};
use crate::lbph::TrainError;
use crate::profile::{ProfileError, StudentProfile};
use crate::sheety::{SheetyClient, SyncOutcome};

/// Capture face images for a student, sync them to the sheet and retrain
/// the recogniser.
#[derive(Debug, Parser)]
#[command(name = "eduvision-enroll", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Student name; prompted for when missing.
    #[arg(long)]
    name: Option<String>,
    /// Class, e.g. "7A" or "X IPA 2"; prompted for when missing.
    #[arg(long)]
    class: Option<String>,
    /// Gender (L/P); prompted for when missing.
    #[arg(long)]
    gender: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("failed to start async runtime: {0}")]
    Runtime(io::Error),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("camera error: {0}")]
    Capture(#[from] CaptureError),
    #[error("face detector setup failed: {0}")]
    Detector(#[from] DetectError),
    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("training failed: {0}")]
    Train(#[from] TrainError),
    #[error("label database error: {0}")]
    Db(#[from] DbError),
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    let profile = match StudentProfile::resolve(
        args.name,
        args.class,
        args.gender,
        &mut io::stdin().lock(),
        &mut io::stdout(),
    ) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid student profile");
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    info!(
        name = profile.name,
        class = profile.class,
        gender = profile.gender,
        dataset = %config.dataset.dir.display(),
        "starting enrollment"
    );

    if let Err(e) = run(&config, &profile) {
        error!(error = %e, "enrollment failed");
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(config: &Config, profile: &StudentProfile) -> Result<(), EnrollError> {
    let runtime = tokio::runtime::Runtime::new().map_err(EnrollError::Runtime)?;

    let person_dir = dataset::prepare_person_dir(&config.dataset.dir, &profile.name)?;
    let captured = capture_faces(config, &runtime, &person_dir)?;
    println!("Captured {captured} image(s) into {}", person_dir.display());

    sync_sheet(config, &runtime, profile);

    println!("Training LBPH model...");
    let db = StudentDb::open(&config.dataset.db_path)?;
    if let Some(previous) = db.find_label(&profile.name)? {
        let history: Vec<_> = db
            .enrollments()?
            .into_iter()
            .filter(|e| e.name == profile.name)
            .collect();
        info!(
            name = profile.name,
            previous_class = previous.class,
            earlier = history.len(),
            last_images = history.first().map(|e| e.images),
            "re-enrolling known student"
        );
    }
    let summary = train::retrain(
        &config.dataset.dir,
        &config.dataset.model_path,
        config.face.crop_size,
        &db,
        profile,
    )?;
    db.record_enrollment(profile, captured)?;
    info!(
        students = summary.labels.len(),
        images = summary.images,
        model = %config.dataset.model_path.display(),
        "training complete"
    );

    println!("Training complete!");
    println!("Student: {}", profile.name);
    println!("Class: {}", profile.class);
    println!("Gender: {}", profile.gender);
    println!("Students in model: {} ({} images)", summary.labels.len(), summary.images);
    println!("Saved LBPH model to: {}", config.dataset.model_path.display());
    println!("Saved label map to: {}", config.dataset.db_path.display());
    Ok(())
}

fn capture_faces(
    config: &Config,
    runtime: &tokio::runtime::Runtime,
    person_dir: &std::path::Path,
) -> Result<u32, EnrollError> {
    let mut camera = capture::open_first_available(&config.camera, runtime.handle())?;
    let locator = FaceLocator::new(&config.detector, &config.face)?;
    info!(url = locator.url(), "face locator ready");

    let mut dispatcher = Dispatcher::new(locator, config.face.interval(), runtime.handle().clone())
        .with_failure_warning(config.detector.warn_after_failures);
    let mut progress = CaptureProgress::new(person_dir, config.face.target_images);

    let mut session = TerminalSession::start(true)?;
    let result = face::run_capture(
        &mut camera,
        &mut dispatcher,
        &mut session,
        &mut progress,
        config.face.max_crop_age(),
    );
    drop(session);
    result
}

/// Sheet failures are reported but never stop training.
fn sync_sheet(config: &Config, runtime: &tokio::runtime::Runtime, profile: &StudentProfile) {
    let client = match SheetyClient::new(&config.sheety) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "cannot create Sheety client, skipping sync");
            return;
        }
    };
    println!("Checking student data on Sheety...");
    match runtime.block_on(client.sync_student(profile)) {
        Ok(SyncOutcome::Created) => println!("Added to Sheety!"),
        Ok(SyncOutcome::Updated { row_id }) => println!("Student updated in Sheety (row id {row_id})!"),
        Ok(SyncOutcome::SkippedNoId) => println!("Sheety row has no ID, cannot update."),
        Err(e) => {
            warn!(url = client.url(), error = %e, "Sheety sync failed");
            println!("Sheety error: {e}");
        }
    }
}
