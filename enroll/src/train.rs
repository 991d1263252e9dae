use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::dataset::{self, PersonImages};
use crate::db::{LabelEntry, StudentDb};
use crate::lbph::{LbphModel, TrainError};
use crate::profile::StudentProfile;
use crate::EnrollError;

const UNKNOWN_CLASS: &str = "Unknown";

#[derive(Debug)]
pub struct TrainingSummary {
    pub labels: Vec<LabelEntry>,
    pub images: usize,
}

/// One label per student directory, in directory order.
///
/// Class and gender come from the previous map when the name is known there;
/// the student just enrolled always uses the fresh profile.
pub fn build_label_map(
    people: &[PersonImages],
    previous: &[LabelEntry],
    current: &StudentProfile,
) -> Vec<LabelEntry> {
    let known: HashMap<&str, &LabelEntry> =
        previous.iter().map(|e| (e.name.as_str(), e)).collect();

    people
        .iter()
        .enumerate()
        .map(|(label_id, person)| {
            let (class, gender) = if person.name == current.name {
                (current.class.clone(), current.gender.clone())
            } else if let Some(old) = known.get(person.name.as_str()) {
                (old.class.clone(), old.gender.clone())
            } else {
                (UNKNOWN_CLASS.to_string(), String::new())
            };
            LabelEntry {
                label_id: label_id as i64,
                name: person.name.clone(),
                class,
                gender,
            }
        })
        .collect()
}

/// Retrain the model from every image under `dataset_dir`.
///
/// With no usable image at all nothing is written: the model file and the
/// stored label map keep their previous contents.
pub fn retrain(
    dataset_dir: &Path,
    model_path: &Path,
    crop_size: u32,
    db: &StudentDb,
    current: &StudentProfile,
) -> Result<TrainingSummary, EnrollError> {
    let people = dataset::load_people(dataset_dir, crop_size)?;
    let labels = build_label_map(&people, &db.label_map()?, current);

    let samples: Vec<(i64, image::GrayImage)> = people
        .into_iter()
        .zip(&labels)
        .flat_map(|(person, entry)| {
            let label_id = entry.label_id;
            person.images.into_iter().map(move |img| (label_id, img))
        })
        .collect();
    if samples.is_empty() {
        return Err(TrainError::NoSamples.into());
    }

    info!(students = labels.len(), images = samples.len(), "training LBPH model");
    let model = LbphModel::train(&samples)?;
    if let Some(entry) = labels.iter().find(|e| e.name == current.name) {
        if let Some((_, img)) = samples.iter().find(|(label, _)| *label == entry.label_id) {
            if let Some((predicted, distance)) = model.predict(img)? {
                info!(expected = entry.label_id, predicted, distance, "model self-check");
            }
        }
    }
    // Label map first: if it fails the previous model and map stay paired.
    db.replace_label_map(&labels)?;
    model.save(model_path)?;

    Ok(TrainingSummary {
        labels,
        images: samples.len(),
    })
}
