//! On-disk face dataset: `<root>/<student name>/<n>.jpg`, grayscale crops.

use image::imageops::FilterType;
use image::GrayImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset I/O error at {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error("failed to write image {0}: {1}")]
    Write(PathBuf, image::ImageError),
}

/// All training images found for one student directory.
#[derive(Debug)]
pub struct PersonImages {
    pub name: String,
    pub images: Vec<GrayImage>,
}

/// Make `<root>/<name>` an empty directory ready for a fresh enrollment.
///
/// Files from an earlier enrollment are removed; sub-directories are left
/// alone. Files that cannot be removed are logged and skipped.
pub fn prepare_person_dir(root: &Path, name: &str) -> Result<PathBuf, DatasetError> {
    let dir = root.join(name);
    if !dir.is_dir() {
        fs::create_dir_all(&dir).map_err(|e| DatasetError::Io(dir.clone(), e))?;
        info!(dir = %dir.display(), "created student directory");
        return Ok(dir);
    }

    let mut removed = 0;
    for entry in fs::read_dir(&dir).map_err(|e| DatasetError::Io(dir.clone(), e))? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove old image"),
        }
    }
    info!(dir = %dir.display(), removed, "cleared previous enrollment");
    Ok(dir)
}

/// Write crop number `index` as `<dir>/<index>.jpg`.
pub fn save_crop(dir: &Path, index: u32, crop: &GrayImage) -> Result<PathBuf, DatasetError> {
    let path = dir.join(format!("{index}.jpg"));
    crop.save(&path).map_err(|e| DatasetError::Write(path.clone(), e))?;
    Ok(path)
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Load every student directory under `root`, sorted by name.
///
/// Each image is converted to grayscale and resized to `size x size`.
/// Directories with no usable image are still returned so that they keep a
/// label id.
pub fn load_people(root: &Path, size: u32) -> Result<Vec<PersonImages>, DatasetError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .map_err(|e| DatasetError::Io(root.to_path_buf(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let mut people = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => {
                warn!(dir = %dir.display(), "skipping directory with non UTF-8 name");
                continue;
            }
        };
        let images = load_images(&dir, size)?;
        debug!(name, images = images.len(), "loaded student images");
        people.push(PersonImages { name, images });
    }
    Ok(people)
}

fn load_images(dir: &Path, size: u32) -> Result<Vec<GrayImage>, DatasetError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| DatasetError::Io(dir.to_path_buf(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| !path.is_dir() && is_image_file(path))
        .collect();
    files.sort();

    let mut images = Vec::with_capacity(files.len());
    for path in files {
        match image::open(&path) {
            Ok(img) => {
                let gray = img.to_luma8();
                let gray = if gray.dimensions() == (size, size) {
                    gray
                } else {
                    image::imageops::resize(&gray, size, size, FilterType::Triangle)
                };
                images.push(gray);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable image"),
        }
    }
    Ok(images)
}
