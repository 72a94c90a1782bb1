//! Simulated single-image inspection.

use crate::classes::EffectiveClasses;
use crate::ingest::data_url;
use geomaker_core::RunConfig;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub const UNDEFINED_CLASS: &str = "Undefined Class";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionResult {
    pub image_name: String,
    pub image_data: String,
    pub predicted_class: String,
    /// In `[0.5, 1.0)`.
    pub confidence: f64,
    /// In `[0.0, 0.5)`; present only when uncertainty display is enabled.
    pub uncertainty_score: Option<f64>,
    pub explainability_method: String,
}

/// Predict a class for an uploaded image, uniformly over the effective classes.
pub fn inspect_image<R: Rng + ?Sized>(
    image_name: &str,
    bytes: &[u8],
    classes: &EffectiveClasses,
    config: &RunConfig,
    rng: &mut R,
) -> InspectionResult {
    let predicted_class = classes
        .names
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| UNDEFINED_CLASS.to_string());
    let confidence = rng.gen_range(0.5..1.0);
    let uncertainty_score = config
        .simulated_uncertainty
        .then(|| rng.gen_range(0.0..0.5));

    InspectionResult {
        image_name: image_name.to_string(),
        image_data: data_url(image_name, bytes),
        predicted_class,
        confidence,
        uncertainty_score,
        explainability_method: config.explainability_method.clone(),
    }
}
