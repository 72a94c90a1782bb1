//! Effective class resolution.
//!
//! Every component that needs class identity (scheduler, synthesizer,
//! serializer, exporters, inspector) goes through [`resolve_effective_classes`]
//! so a confusion-matrix row, a report row and a cluster label can be joined
//! by class name alone.

use crate::ingest::ArchiveManifest;
use geomaker_core::RunConfig;
use serde::{Deserialize, Serialize};

/// Prefix for placeholder class names used when no archive drives the class list.
pub const PLACEHOLDER_PREFIX: &str = "Class";

/// Prefix shown in the detected-class view after a failed upload.
pub const FALLBACK_PREFIX: &str = "Default Class";

/// The class count and ordered name list a run actually uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveClasses {
    pub count: usize,
    pub names: Vec<String>,
    /// True when the names come from an uploaded archive.
    pub from_archive: bool,
}

/// Resolve the effective class configuration.
///
/// Archive-derived classes win when fine-tuning is active and a manifest is
/// loaded. Otherwise the configured count applies and names are placeholders;
/// a configured count of zero still yields `default_num_classes` placeholder
/// names so labeled views never render empty, while `count` stays zero.
pub fn resolve_effective_classes(
    config: &RunConfig,
    manifest: Option<&ArchiveManifest>,
    default_num_classes: usize,
) -> EffectiveClasses {
    if config.fine_tune {
        if let Some(manifest) = manifest {
            let names = manifest.class_names();
            return EffectiveClasses {
                count: names.len(),
                names,
                from_archive: true,
            };
        }
    }

    let count = config.num_classes;
    let name_count = if count > 0 { count } else { default_num_classes };
    EffectiveClasses {
        count,
        names: placeholder_names(PLACEHOLDER_PREFIX, name_count),
        from_archive: false,
    }
}

/// `"<prefix> A"`, `"<prefix> B"`, ... for `count` classes.
pub fn placeholder_names(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{} {}", prefix, column_label(i)))
        .collect()
}

/// Spreadsheet-style column label: 0 -> A, 25 -> Z, 26 -> AA.
pub fn column_label(index: usize) -> String {
    let mut n = index + 1;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}
