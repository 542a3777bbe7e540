//! Solid-colour fallback images.

use image::{ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};

use crate::error::{ProviderError, ProviderResult};

/// Colour derived from a hex cache key, kept away from pure black and white.
pub fn placeholder_color(key: &str) -> [u8; 3] {
    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        let byte = key
            .get(i * 2..i * 2 + 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .unwrap_or(0x80);
        *channel = 40 + (byte as u16 * 175 / 255) as u8;
    }
    rgb
}

/// Write a PNG of the key's colour to `path` unless it already exists.
pub async fn render_placeholder(path: &Path, key: &str, width: u32, height: u32) -> ProviderResult<PathBuf> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let color = placeholder_color(key);
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> ProviderResult<PathBuf> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".placeholder-")
            .suffix(".png")
            .tempfile_in(dir)?
            .into_temp_path();
        RgbImage::from_pixel(width, height, Rgb(color))
            .save_with_format(&temp, ImageFormat::Png)
            .map_err(|e| ProviderError::Io(std::io::Error::other(e)))?;
        temp.persist(&target).map_err(|e| ProviderError::Io(e.error))?;
        Ok(target)
    })
    .await
    .map_err(|e| ProviderError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_deterministic_and_bounded() {
        let key = "ff00a0deadbeef";
        assert_eq!(placeholder_color(key), placeholder_color(key));
        for channel in placeholder_color(key) {
            assert!((40..=215).contains(&channel));
        }
        assert_ne!(placeholder_color("000000"), placeholder_color("ffffff"));
    }

    #[tokio::test]
    async fn test_render_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("abc.png");
        let out = render_placeholder(&path, "a1b2c3", 16, 32).await.unwrap();

        assert_eq!(out, path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".placeholder-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
