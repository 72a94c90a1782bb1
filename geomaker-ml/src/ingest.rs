//! Archive ingestion: ZIP blob -> class manifest + bounded image samples.
//!
//! Convention: one top-level directory per class. Only entries whose final
//! path segment carries a recognized image extension count; entries under the
//! `__MACOSX` metadata prefix, directory entries and root-level files are
//! ignored.

use crate::error::MlError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use geomaker_core::IngestConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Recognized image extensions (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// OS-metadata prefix excluded from ingestion.
pub const METADATA_PREFIX: &str = "__MACOSX";

/// Upper bound on the buffer reserved up front for one entry.
const MAX_PREALLOC_BYTES: usize = 1 << 20;

/// One class folder and its qualifying image entries, in archive order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    /// Full entry paths inside the archive.
    pub images: Vec<String>,
}

/// Ordered class -> images structure derived from an uploaded archive.
///
/// Every class holds at least one image; classes keep first-discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub file_name: String,
    pub classes: Vec<ClassEntry>,
}

impl ArchiveManifest {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    pub fn total_images(&self) -> usize {
        self.classes.iter().map(|c| c.images.len()).sum()
    }
}

/// A decoded sample image kept for display and error cross-referencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleImage {
    pub class_name: String,
    /// `data:<mime>;base64,<payload>`
    pub image_data: String,
    pub original_file_name: String,
}

/// An image that could not be decoded during sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedImage {
    pub path: String,
    pub reason: String,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedArchive {
    pub manifest: ArchiveManifest,
    pub samples: Vec<SampleImage>,
    pub skipped: Vec<SkippedImage>,
}

/// Parse `bytes` as a ZIP archive and build its manifest and samples.
///
/// Fails with [`MlError::Archive`] when the blob is not a readable archive and
/// [`MlError::EmptyDataset`] when no class folder holds a qualifying image.
pub fn ingest_archive(
    file_name: &str,
    bytes: &[u8],
    limits: &IngestConfig,
) -> Result<IngestedArchive, MlError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| MlError::archive(format!("'{}' is not a readable ZIP archive: {}", file_name, e)))?;

    let mut entry_names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| MlError::archive(format!("Corrupt entry #{} in '{}': {}", index, file_name, e)))?;
        if !entry.is_dir() {
            entry_names.push(entry.name().to_string());
        }
    }

    let classes = group_class_entries(entry_names.iter().map(String::as_str));
    if classes.is_empty() {
        return Err(MlError::empty_dataset(format!(
            "No class folder with valid images found in '{}'. Expected one top-level folder per class containing {} files.",
            file_name,
            IMAGE_EXTENSIONS.join("/")
        )));
    }

    let manifest = ArchiveManifest {
        file_name: file_name.to_string(),
        classes,
    };
    let (samples, skipped) = select_samples(&manifest, limits, |path| read_entry(&mut archive, path));

    info!(
        archive = file_name,
        classes = manifest.num_classes(),
        images = manifest.total_images(),
        samples = samples.len(),
        skipped = skipped.len(),
        "Archive ingested"
    );
    Ok(IngestedArchive {
        manifest,
        samples,
        skipped,
    })
}

/// Group archive entry paths by top-level folder, keeping only qualifying images.
///
/// Classes appear in the order their first qualifying image was seen.
pub fn group_class_entries<'a>(entry_names: impl IntoIterator<Item = &'a str>) -> Vec<ClassEntry> {
    let mut classes: Vec<ClassEntry> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();

    for name in entry_names {
        if name.starts_with(METADATA_PREFIX) {
            continue;
        }
        let Some((top, rest)) = name.split_once('/') else {
            continue;
        };
        let file = rest.rsplit('/').next().unwrap_or("");
        if top.is_empty() || file.is_empty() || !is_image_name(file) {
            continue;
        }

        let slot = *index.entry(top).or_insert_with(|| {
            classes.push(ClassEntry {
                name: top.to_string(),
                images: Vec::new(),
            });
            classes.len() - 1
        });
        classes[slot].images.push(name.to_string());
    }
    classes
}

/// Pick at most `max_samples_per_class` images per class and
/// `max_total_samples` overall, in discovery order.
///
/// A failed read is logged and skipped; it still consumes its per-class slot.
pub fn select_samples<F>(
    manifest: &ArchiveManifest,
    limits: &IngestConfig,
    mut read: F,
) -> (Vec<SampleImage>, Vec<SkippedImage>)
where
    F: FnMut(&str) -> Result<Vec<u8>, MlError>,
{
    let mut samples = Vec::new();
    let mut skipped = Vec::new();

    'classes: for class in &manifest.classes {
        for path in class.images.iter().take(limits.max_samples_per_class) {
            if samples.len() >= limits.max_total_samples {
                break 'classes;
            }
            match read(path) {
                Ok(bytes) => samples.push(SampleImage {
                    class_name: class.name.clone(),
                    image_data: data_url(path, &bytes),
                    original_file_name: base_name(path).to_string(),
                }),
                Err(e) => {
                    warn!(image = path.as_str(), class = class.name.as_str(), error = %e, "Skipping undecodable image");
                    skipped.push(SkippedImage {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    debug!(samples = samples.len(), "Sample selection finished");
    (samples, skipped)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>, MlError> {
    let mut entry = archive
        .by_name(path)
        .map_err(|e| MlError::archive(format!("Cannot open '{}': {}", path, e)))?;
    let mut bytes = Vec::with_capacity(prealloc_len(entry.size()));
    entry.read_to_end(&mut bytes)?;
    if bytes.is_empty() {
        return Err(MlError::archive(format!("Image '{}' is empty", path)));
    }
    Ok(bytes)
}

/// Initial buffer size for an entry. The declared size comes from the
/// archive header and is not trusted beyond a small bound.
fn prealloc_len(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_PREALLOC_BYTES, |n| n.min(MAX_PREALLOC_BYTES))
}

/// Whether `file_name` ends with a recognized image extension.
pub fn is_image_name(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Final path segment of an archive entry.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// MIME type guessed from the file extension.
pub fn mime_type(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Encode raw bytes as a `data:` URL.
pub fn data_url(file_name: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(file_name), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_group_entries_filters_and_orders() {
        let names = [
            "dogs/c.jpg",
            "readme.txt",
            "cats/a.JPG",
            "__MACOSX/cats/._a.jpg",
            "cats/notes.txt",
            "cats/nested/b.png",
            "empty/",
            "docs/manual.pdf",
        ];
        let classes = group_class_entries(names.iter().copied());
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].name, "dogs");
        assert_eq!(classes[1].name, "cats");
        assert_eq!(classes[1].images, vec!["cats/a.JPG", "cats/nested/b.png"]);
    }

    #[test]
    fn test_prealloc_len_is_bounded() {
        assert_eq!(prealloc_len(0), 0);
        assert_eq!(prealloc_len(512), 512);
        assert_eq!(prealloc_len(u64::MAX), MAX_PREALLOC_BYTES);
        assert_eq!(prealloc_len(0x7FFF_FFF0), MAX_PREALLOC_BYTES);
    }

    #[test]
    fn test_inflated_declared_size_does_not_reserve_it() {
        let mut bytes = build_zip(&[("cats/a.jpg", b"pixels")]);
        let central = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0x7FFF_FFF0u32.to_le_bytes());

        if let Ok(ingested) = ingest_archive("big.zip", &bytes, &IngestConfig::default()) {
            assert_eq!(ingested.samples.len() + ingested.skipped.len(), 1);
        }
    }

    #[test]
    fn test_is_image_name() {
        assert!(is_image_name("a.jpeg"));
        assert!(is_image_name("B.BMP"));
        assert!(!is_image_name("a.tiff"));
        assert!(!is_image_name("jpg"));
    }

    #[test]
    fn test_ingest_cats_and_dogs() {
        let bytes = build_zip(&[
            ("cats/", b""),
            ("cats/a.jpg", b"\xff\xd8a"),
            ("cats/b.png", b"\x89PNGb"),
            ("dogs/c.jpg", b"\xff\xd8c"),
        ]);
        let ingested = ingest_archive("pets.zip", &bytes, &IngestConfig::default()).unwrap();

        assert_eq!(ingested.manifest.class_names(), vec!["cats", "dogs"]);
        assert_eq!(ingested.manifest.num_classes(), 2);
        assert_eq!(ingested.samples.len(), 3);
        assert_eq!(ingested.samples[0].original_file_name, "a.jpg");
        assert!(ingested.samples[1].image_data.starts_with("data:image/png;base64,"));
        assert_eq!(ingested.samples[2].class_name, "dogs");
    }

    #[test]
    fn test_ingest_rejects_non_zip() {
        let err = ingest_archive("notes.zip", b"plain text", &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, MlError::Archive(_)));
    }

    #[test]
    fn test_ingest_without_class_folders_is_empty_dataset() {
        let bytes = build_zip(&[("root.jpg", b"x"), ("docs/readme.md", b"y")]);
        let err = ingest_archive("flat.zip", &bytes, &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, MlError::EmptyDataset(_)));
    }

    #[test]
    fn test_undecodable_image_is_skipped() {
        let bytes = build_zip(&[
            ("cats/a.jpg", b""),
            ("cats/b.jpg", b"ok"),
            ("dogs/c.jpg", b"ok"),
        ]);
        let ingested = ingest_archive("pets.zip", &bytes, &IngestConfig::default()).unwrap();
        assert_eq!(ingested.manifest.num_classes(), 2);
        assert_eq!(ingested.samples.len(), 2);
        assert_eq!(ingested.skipped.len(), 1);
        assert_eq!(ingested.skipped[0].path, "cats/a.jpg");
    }

    #[test]
    fn test_sampling_respects_limits() {
        let manifest = ArchiveManifest {
            file_name: "big.zip".into(),
            classes: (0..5)
                .map(|c| ClassEntry {
                    name: format!("class{}", c),
                    images: (0..6).map(|i| format!("class{}/{}.png", c, i)).collect(),
                })
                .collect(),
        };
        let limits = IngestConfig::default();
        let (samples, skipped) = select_samples(&manifest, &limits, |_| Ok(vec![1, 2, 3]));
        assert!(skipped.is_empty());
        assert_eq!(samples.len(), 10);
        assert_eq!(samples.iter().filter(|s| s.class_name == "class0").count(), 3);
        assert_eq!(samples.iter().filter(|s| s.class_name == "class3").count(), 1);
        assert_eq!(samples[0].original_file_name, "0.png");
    }

    #[test]
    fn test_data_url() {
        assert_eq!(data_url("x.gif", b"hi"), "data:image/gif;base64,aGk=");
        assert_eq!(mime_type("x.bin"), "application/octet-stream");
    }
}
