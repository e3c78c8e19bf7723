//! Raster payloads carried by image data items
//!
//! Rasters are stored as interleaved 8-bit pixels with an explicit colour
//! space so that BGR frames coming from camera drivers keep their channel
//! order until they are encoded for transport or written to disk.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageBuffer, ImageEncoder, ImageFormat, Luma, Rgb, Rgba};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("PNG decoding failed: {0}")]
    Decode(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Region is empty after clamping to {width}x{height}")]
    EmptyRegion { width: u32, height: u32 },

    #[error("Invalid target size {0}x{1}")]
    InvalidSize(u32, u32),

    #[error("Conversion {conversion} expects {expected} channels, image has {actual}")]
    ChannelMismatch {
        conversion: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown colour conversion '{0}'")]
    UnknownConversion(String),

    #[error("Unknown interpolation '{0}'")]
    UnknownInterpolation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColourSpace {
    Gray,
    Bgr,
    Rgb,
    Bgra,
    Rgba,
}

impl ColourSpace {
    pub fn channels(&self) -> usize {
        match self {
            ColourSpace::Gray => 1,
            ColourSpace::Bgr | ColourSpace::Rgb => 3,
            ColourSpace::Bgra | ColourSpace::Rgba => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColourSpace::Gray => "GRAY",
            ColourSpace::Bgr => "BGR",
            ColourSpace::Rgb => "RGB",
            ColourSpace::Bgra => "BGRA",
            ColourSpace::Rgba => "RGBA",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GRAY" => Some(ColourSpace::Gray),
            "BGR" => Some(ColourSpace::Bgr),
            "RGB" => Some(ColourSpace::Rgb),
            "BGRA" => Some(ColourSpace::Bgra),
            "RGBA" => Some(ColourSpace::Rgba),
            _ => None,
        }
    }
}

/// Resampling filter selected by the resize processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
    Cubic,
    Area,
    Lanczos4,
}

impl Interpolation {
    pub fn parse(name: &str) -> Result<Self, ImageError> {
        match name.trim_start_matches("cv2.") {
            "INTER_NEAREST" => Ok(Interpolation::Nearest),
            "INTER_LINEAR" => Ok(Interpolation::Linear),
            "INTER_CUBIC" => Ok(Interpolation::Cubic),
            "INTER_AREA" => Ok(Interpolation::Area),
            "INTER_LANCZOS4" => Ok(Interpolation::Lanczos4),
            other => Err(ImageError::UnknownInterpolation(other.to_string())),
        }
    }

    fn filter(&self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Linear | Interpolation::Area => FilterType::Triangle,
            Interpolation::Cubic => FilterType::CatmullRom,
            Interpolation::Lanczos4 => FilterType::Lanczos3,
        }
    }
}

/// Colour conversion applied by the colour conversion processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub from: ColourSpace,
    pub to: ColourSpace,
}

impl Conversion {
    /// Parse names such as `BGR2RGB` or `COLOR_BGR2GRAY`
    pub fn parse(name: &str) -> Result<Self, ImageError> {
        let trimmed = name.trim_start_matches("cv2.").trim_start_matches("COLOR_");
        let (from, to) = trimmed
            .split_once('2')
            .ok_or_else(|| ImageError::UnknownConversion(name.to_string()))?;
        match (ColourSpace::parse(from), ColourSpace::parse(to)) {
            (Some(from), Some(to)) => Ok(Self { from, to }),
            _ => Err(ImageError::UnknownConversion(name.to_string())),
        }
    }

    fn label(&self) -> String {
        format!("{}2{}", self.from.as_str(), self.to.as_str())
    }
}

/// An 8-bit interleaved raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    colour_space: ColourSpace,
    pixels: Vec<u8>,
}

impl Raster {
    pub fn new(
        width: u32,
        height: u32,
        colour_space: ColourSpace,
        pixels: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize * colour_space.channels();
        if pixels.len() != expected {
            return Err(ImageError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            colour_space,
            pixels,
        })
    }

    /// A raster filled with a single byte value
    pub fn filled(width: u32, height: u32, colour_space: ColourSpace, value: u8) -> Self {
        let len = width as usize * height as usize * colour_space.channels();
        Self {
            width,
            height,
            colour_space,
            pixels: vec![value; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.colour_space.channels()
    }

    pub fn colour_space(&self) -> ColourSpace {
        self.colour_space
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Shape as (rows, columns, channels)
    pub fn shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, self.channels()]
    }

    /// Cut a region. `x` runs along rows and `y` along columns; bounds are
    /// clamped to the raster like array slicing.
    pub fn crop(&self, x_init: u32, x_diff: u32, y_init: u32, y_diff: u32) -> Result<Self, ImageError> {
        let row_start = x_init.min(self.height);
        let row_end = x_init.saturating_add(x_diff).min(self.height);
        let col_start = y_init.min(self.width);
        let col_end = y_init.saturating_add(y_diff).min(self.width);

        if row_end <= row_start || col_end <= col_start {
            return Err(ImageError::EmptyRegion {
                width: self.width,
                height: self.height,
            });
        }

        let channels = self.channels();
        let row_stride = self.width as usize * channels;
        let mut pixels =
            Vec::with_capacity((row_end - row_start) as usize * (col_end - col_start) as usize * channels);
        for row in row_start..row_end {
            let begin = row as usize * row_stride + col_start as usize * channels;
            let end = row as usize * row_stride + col_end as usize * channels;
            pixels.extend_from_slice(&self.pixels[begin..end]);
        }

        Self::new(col_end - col_start, row_end - row_start, self.colour_space, pixels)
    }

    pub fn resize(&self, width: u32, height: u32, interpolation: Interpolation) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidSize(width, height));
        }
        let filter = interpolation.filter();
        let pixels = match self.channels() {
            1 => {
                let buffer = self.buffer::<Luma<u8>>()?;
                image::imageops::resize(&buffer, width, height, filter).into_raw()
            }
            3 => {
                let buffer = self.buffer::<Rgb<u8>>()?;
                image::imageops::resize(&buffer, width, height, filter).into_raw()
            }
            _ => {
                let buffer = self.buffer::<Rgba<u8>>()?;
                image::imageops::resize(&buffer, width, height, filter).into_raw()
            }
        };
        Self::new(width, height, self.colour_space, pixels)
    }

    /// Convert to `conversion.to`. The source channel order is taken from the
    /// raster's own colour space, so `conversion.from` only has to agree on
    /// the channel count: a decoded PNG (labelled RGB) stays correct under
    /// `BGR2RGB` or `BGR2GRAY`.
    pub fn convert(&self, conversion: Conversion) -> Result<Self, ImageError> {
        if self.channels() != conversion.from.channels() {
            return Err(ImageError::ChannelMismatch {
                conversion: conversion.label(),
                expected: conversion.from.channels(),
                actual: self.channels(),
            });
        }

        if self.colour_space != conversion.from {
            debug!(
                "Raster is {}, reading it as such for {}",
                self.colour_space.as_str(),
                conversion.label()
            );
        }

        let in_channels = self.channels();
        let out_channels = conversion.to.channels();
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * out_channels);

        for px in self.pixels.chunks_exact(in_channels) {
            let (r, g, b, a) = match self.colour_space {
                ColourSpace::Gray => (px[0], px[0], px[0], 255),
                ColourSpace::Bgr => (px[2], px[1], px[0], 255),
                ColourSpace::Rgb => (px[0], px[1], px[2], 255),
                ColourSpace::Bgra => (px[2], px[1], px[0], px[3]),
                ColourSpace::Rgba => (px[0], px[1], px[2], px[3]),
            };
            match conversion.to {
                ColourSpace::Gray => pixels.push(luminance(r, g, b)),
                ColourSpace::Bgr => pixels.extend_from_slice(&[b, g, r]),
                ColourSpace::Rgb => pixels.extend_from_slice(&[r, g, b]),
                ColourSpace::Bgra => pixels.extend_from_slice(&[b, g, r, a]),
                ColourSpace::Rgba => pixels.extend_from_slice(&[r, g, b, a]),
            }
        }

        Self::new(self.width, self.height, conversion.to, pixels)
    }

    /// Encode as PNG. BGR(A) rasters are written in RGB(A) channel order.
    pub fn to_png(&self) -> Result<Vec<u8>, ImageError> {
        let (pixels, colour_type) = match self.colour_space {
            ColourSpace::Gray => (self.pixels.clone(), ExtendedColorType::L8),
            ColourSpace::Rgb => (self.pixels.clone(), ExtendedColorType::Rgb8),
            ColourSpace::Rgba => (self.pixels.clone(), ExtendedColorType::Rgba8),
            ColourSpace::Bgr => (
                self.convert(Conversion {
                    from: ColourSpace::Bgr,
                    to: ColourSpace::Rgb,
                })?
                .pixels,
                ExtendedColorType::Rgb8,
            ),
            ColourSpace::Bgra => (
                self.convert(Conversion {
                    from: ColourSpace::Bgra,
                    to: ColourSpace::Rgba,
                })?
                .pixels,
                ExtendedColorType::Rgba8,
            ),
        };

        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded)
            .write_image(&pixels, self.width, self.height, colour_type)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(encoded)
    }

    /// Decode a PNG into a GRAY, RGB or RGBA raster
    pub fn from_png(bytes: &[u8]) -> Result<Self, ImageError> {
        let decoded = image::load(Cursor::new(bytes), ImageFormat::Png)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        let (colour_space, pixels) = match decoded {
            DynamicImage::ImageLuma8(buffer) => (ColourSpace::Gray, buffer.into_raw()),
            DynamicImage::ImageRgb8(buffer) => (ColourSpace::Rgb, buffer.into_raw()),
            DynamicImage::ImageRgba8(buffer) => (ColourSpace::Rgba, buffer.into_raw()),
            other if other.color().has_alpha() => (ColourSpace::Rgba, other.to_rgba8().into_raw()),
            other => (ColourSpace::Rgb, other.to_rgb8().into_raw()),
        };
        Self::new(width, height, colour_space, pixels)
    }

    pub fn to_base64_png(&self) -> Result<String, ImageError> {
        Ok(STANDARD.encode(self.to_png()?))
    }

    pub fn from_base64_png(encoded: &str) -> Result<Self, ImageError> {
        let bytes = STANDARD.decode(encoded)?;
        Self::from_png(&bytes)
    }

    fn buffer<P>(&self) -> Result<ImageBuffer<P, Vec<u8>>, ImageError>
    where
        P: image::Pixel<Subpixel = u8>,
    {
        let expected = self.pixels.len();
        ImageBuffer::from_raw(self.width, self.height, self.pixels.clone()).ok_or(
            ImageError::BufferSize {
                expected,
                actual: self.pixels.len(),
            },
        )
    }
}

/// ITU-R BT.601 luma, rounded
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// An image item's payload: a live raster, or its transport encoding
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Raster(Raster),
    Base64Png(String),
}

impl ImagePayload {
    pub fn raster(&self) -> Option<&Raster> {
        match self {
            ImagePayload::Raster(raster) => Some(raster),
            ImagePayload::Base64Png(_) => None,
        }
    }

    /// Replace a raster with its base64 PNG encoding
    pub fn encode_base64(&mut self) -> Result<(), ImageError> {
        if let ImagePayload::Raster(raster) = self {
            *self = ImagePayload::Base64Png(raster.to_base64_png()?);
        }
        Ok(())
    }

    /// PNG bytes for this payload
    pub fn png_bytes(&self) -> Result<Vec<u8>, ImageError> {
        match self {
            ImagePayload::Raster(raster) => raster.to_png(),
            ImagePayload::Base64Png(encoded) => Ok(STANDARD.decode(encoded)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, colour_space: ColourSpace) -> Raster {
        let channels = colour_space.channels();
        let pixels = (0..width as usize * height as usize * channels)
            .map(|i| (i % 251) as u8)
            .collect();
        Raster::new(width, height, colour_space, pixels).unwrap()
    }

    #[test]
    fn test_buffer_size_checked() {
        let result = Raster::new(2, 2, ColourSpace::Rgb, vec![0; 5]);
        assert!(matches!(
            result,
            Err(ImageError::BufferSize {
                expected: 12,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_crop_shape() {
        let raster = Raster::filled(100, 100, ColourSpace::Bgr, 7);
        let cropped = raster.crop(0, 50, 0, 50).unwrap();
        assert_eq!(cropped.shape(), [50, 50, 3]);
    }

    #[test]
    fn test_crop_axes_and_clamp() {
        // 4 columns, 2 rows
        let raster = Raster::new(4, 2, ColourSpace::Gray, vec![0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let cropped = raster.crop(1, 10, 2, 10).unwrap();
        assert_eq!(cropped.shape(), [1, 2, 1]);
        assert_eq!(cropped.pixels(), &[6, 7]);
    }

    #[test]
    fn test_crop_outside_is_error() {
        let raster = Raster::filled(10, 10, ColourSpace::Gray, 0);
        assert!(matches!(
            raster.crop(20, 5, 0, 5),
            Err(ImageError::EmptyRegion { .. })
        ));
    }

    #[test]
    fn test_resize_keeps_colour_space() {
        let raster = gradient(40, 30, ColourSpace::Bgr);
        let resized = raster.resize(10, 10, Interpolation::Nearest).unwrap();
        assert_eq!(resized.shape(), [10, 10, 3]);
        assert_eq!(resized.colour_space(), ColourSpace::Bgr);
    }

    #[test]
    fn test_resize_rejects_zero() {
        let raster = gradient(4, 4, ColourSpace::Gray);
        assert!(raster.resize(0, 4, Interpolation::Linear).is_err());
    }

    #[test]
    fn test_conversion_parse() {
        let conversion = Conversion::parse("COLOR_BGR2GRAY").unwrap();
        assert_eq!(conversion.from, ColourSpace::Bgr);
        assert_eq!(conversion.to, ColourSpace::Gray);
        assert!(Conversion::parse("BGR2HSV").is_err());
        assert!(Conversion::parse("garbage").is_err());
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let raster = Raster::new(1, 1, ColourSpace::Bgr, vec![1, 2, 3]).unwrap();
        let rgb = raster.convert(Conversion::parse("BGR2RGB").unwrap()).unwrap();
        assert_eq!(rgb.pixels(), &[3, 2, 1]);
        assert_eq!(rgb.colour_space(), ColourSpace::Rgb);
    }

    #[test]
    fn test_gray_conversion() {
        let raster = Raster::new(1, 1, ColourSpace::Rgb, vec![255, 255, 255]).unwrap();
        let gray = raster.convert(Conversion::parse("RGB2GRAY").unwrap()).unwrap();
        assert_eq!(gray.pixels(), &[255]);
        assert_eq!(gray.shape(), [1, 1, 1]);
    }

    #[test]
    fn test_conversion_reads_actual_colour_space() {
        let decoded = Raster::new(1, 1, ColourSpace::Rgb, vec![10, 20, 30]).unwrap();

        let rgb = decoded.convert(Conversion::parse("BGR2RGB").unwrap()).unwrap();
        assert_eq!(rgb.pixels(), &[10, 20, 30]);
        assert_eq!(rgb.colour_space(), ColourSpace::Rgb);

        let bgr = decoded.convert(Conversion::parse("BGR2BGR").unwrap()).unwrap();
        assert_eq!(bgr.pixels(), &[30, 20, 10]);

        let gray = decoded.convert(Conversion::parse("BGR2GRAY").unwrap()).unwrap();
        assert_eq!(gray.pixels(), &[luminance(10, 20, 30)]);
    }

    #[test]
    fn test_conversion_channel_mismatch() {
        let raster = Raster::filled(2, 2, ColourSpace::Gray, 0);
        let result = raster.convert(Conversion::parse("BGR2RGB").unwrap());
        assert!(matches!(result, Err(ImageError::ChannelMismatch { .. })));
    }

    #[test]
    fn test_base64_png_round_trip_is_lossless() {
        let raster = gradient(17, 9, ColourSpace::Rgb);
        let encoded = raster.to_base64_png().unwrap();
        let decoded = Raster::from_base64_png(&encoded).unwrap();
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_bgr_round_trip_restores_pixels() {
        let raster = gradient(5, 3, ColourSpace::Bgr);
        let decoded = Raster::from_png(&raster.to_png().unwrap()).unwrap();
        assert_eq!(decoded.colour_space(), ColourSpace::Rgb);
        let back = decoded.convert(Conversion::parse("RGB2BGR").unwrap()).unwrap();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_payload_encode_in_place() {
        let raster = gradient(3, 3, ColourSpace::Gray);
        let mut payload = ImagePayload::Raster(raster.clone());
        payload.encode_base64().unwrap();
        match &payload {
            ImagePayload::Base64Png(encoded) => {
                assert_eq!(Raster::from_base64_png(encoded).unwrap(), raster);
            }
            _ => panic!("Expected encoded payload"),
        }
        // Encoding twice is a no-op
        payload.encode_base64().unwrap();
        assert!(payload.raster().is_none());
    }
}
