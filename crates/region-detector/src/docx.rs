//! Embedded pictures from Word documents
//!
//! A `.docx` file is a zip archive; pictures live under `word/media/`.
//! Each decodable picture is returned as-is, in sorted entry-name order,
//! tagged with its position among all picture entries.

use image::DynamicImage;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::renderer::RenderError;

const MEDIA_PREFIX: &str = "word/media/";
const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".bmp"];

/// A picture extracted from the media store
#[derive(Debug, Clone)]
pub struct MediaImage {
    /// Archive entry name, e.g. `word/media/image1.png`
    pub name: String,
    /// Position among all sorted picture entries, undecodable ones included
    pub ordinal: usize,
    pub image: DynamicImage,
}

fn is_media_image(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(MEDIA_PREFIX) && IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Read every decodable picture from a Word document's media store.
///
/// Entries that fail to read or decode are skipped with a warning.
///
/// # Errors
/// Returns an error when the file cannot be opened as a zip archive
pub fn read_media_images(path: &Path) -> Result<Vec<MediaImage>, RenderError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| RenderError::Document {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| is_media_image(name))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut images = Vec::with_capacity(names.len());
    for (ordinal, name) in names.into_iter().enumerate() {
        let mut bytes = Vec::new();
        let read = archive
            .by_name(&name)
            .map_err(|e| e.to_string())
            .and_then(|mut entry| entry.read_to_end(&mut bytes).map_err(|e| e.to_string()));
        if let Err(e) = read {
            tracing::warn!("Failed to read media entry {}: {}", name, e);
            continue;
        }

        match image::load_from_memory(&bytes) {
            Ok(image) => images.push(MediaImage {
                name,
                ordinal,
                image,
            }),
            Err(e) => tracing::warn!("Failed to decode media entry {}: {}", name, e),
        }
    }

    Ok(images)
}
