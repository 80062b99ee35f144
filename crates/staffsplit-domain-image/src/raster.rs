use image::{DynamicImage, GrayImage, ImageFormat};
use staffsplit_ports::types::{PixelRow, StripIndex};
use std::io::Cursor;

/// Ink threshold for binarized buffers: anything darker counts as ink.
pub const INK_LEVEL: u8 = 128;

#[derive(thiserror::Error, Debug)]
pub enum InvalidImageError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// A decoded page as received from the caller.
#[derive(Clone, Debug)]
pub struct RawImage {
    image: DynamicImage,
}

impl RawImage {
    pub fn decode(data: &[u8]) -> Result<Self, InvalidImageError> {
        if data.is_empty() {
            return Err(InvalidImageError::Decode("empty buffer".to_string()));
        }
        let image = image::load_from_memory(data)
            .map_err(|e| InvalidImageError::Decode(e.to_string()))?;
        Ok(Self { image })
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.image.color().bits_per_pixel()
    }

    pub(crate) fn into_luma8(self) -> GrayImage {
        self.image.into_luma8()
    }
}

/// Binarized page: 0 is ink, 255 is paper. Same coordinates as the source page.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedImage {
    image: GrayImage,
}

impl PreprocessedImage {
    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] < INK_LEVEL
    }
}

/// One horizontal slice of the page holding a single staff system, or the
/// whole page when no staff could be found.
#[derive(Clone, Debug, PartialEq)]
pub struct Strip {
    pub index: StripIndex,
    pub top: PixelRow,
    pub image: GrayImage,
}

impl Strip {
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Exclusive bottom row in page coordinates.
    pub fn bottom(&self) -> PixelRow {
        self.top + self.image.height()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(self.image.clone()).write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}
