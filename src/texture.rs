// CPU-side texture decoding

use anyhow::{Context, Result};
use std::path::Path;

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

/// Decoded RGBA8 pixels, row-major, top row first
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load {:?} image", path))?
            .to_rgba8();

        log::info!("Loaded texture {:?}: {}x{}", path, image.width(), image.height());

        Ok(Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }

    /// Magenta/black checkerboard
    pub fn checkerboard() -> Self {
        let image = image::RgbaImage::from_fn(CHECKER_SIZE, CHECKER_SIZE, |x, y| {
            if ((x / CHECKER_CELL) + (y / CHECKER_CELL)) % 2 == 0 {
                image::Rgba([255, 0, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });

        Self {
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
            pixels: image.into_raw(),
        }
    }

    /// Primary texture if it exists, then the fallback, then a checkerboard
    pub fn resolve(primary: &Path, fallback: &Path) -> Result<Self> {
        if primary.exists() {
            return Self::load(primary);
        }

        if fallback.exists() {
            log::warn!("Texture {:?} not found, using {:?}", primary, fallback);
            return Self::load(fallback);
        }

        log::warn!(
            "Neither {:?} nor {:?} exist, using a generated checkerboard",
            primary,
            fallback
        );
        Ok(Self::checkerboard())
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.pixels.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_is_rgba8() {
        let texture = TextureData::checkerboard();
        assert_eq!(texture.size_in_bytes(), (texture.width * texture.height * 4) as u64);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let texture = TextureData::checkerboard();
        let pixel = |x: u32, y: u32| {
            let offset = ((y * texture.width + x) * 4) as usize;
            &texture.pixels[offset..offset + 4]
        };

        assert_eq!(pixel(0, 0), &[255, 0, 255, 255]);
        assert_eq!(pixel(CHECKER_CELL, 0), &[0, 0, 0, 255]);
        assert_eq!(pixel(CHECKER_CELL, CHECKER_CELL), &[255, 0, 255, 255]);
    }

    #[test]
    fn resolve_without_any_file_generates_checkerboard() {
        let texture =
            TextureData::resolve(Path::new("missing/a.png"), Path::new("missing/b.jpg")).unwrap();
        assert_eq!(texture.width, CHECKER_SIZE);
    }

    #[test]
    fn loading_a_missing_file_fails() {
        assert!(TextureData::load("missing/a.png").is_err());
    }
}
