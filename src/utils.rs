use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str)?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(sanitize_filename(filename));
            }
        }
    }

    // No usable path component
    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Where to save `url` when the user gave no explicit target.
pub fn default_target(dir: &Path, url: &str) -> Result<PathBuf> {
    Ok(dir.join(get_filename_from_url(url)?))
}
