use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;
use std::str::FromStr;

use crate::handler::RenderError;

/// Font size used for "device not found" style placeholders
pub const PLACEHOLDER_FONT_SIZE: f32 = 24.0;

/// Gap between the text and the top/bottom edge
const TEXT_PADDING: u32 = 4;

/// Fonts probed when none is configured
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Vertical position of overlaid text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Top,
    Middle,
    Bottom,
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TOP" => Ok(Self::Top),
            "MIDDLE" => Ok(Self::Middle),
            "BOTTOM" => Ok(Self::Bottom),
            _ => Err(format!("Invalid anchor: {} (expected TOP, MIDDLE or BOTTOM)", s)),
        }
    }
}

/// Resizes images to a control's footprint and draws labels on them.
///
/// Stateless apart from the loaded font; cheap to clone and share between
/// handler instances.
#[derive(Clone)]
pub struct Compositor {
    font: Option<FontArc>,
}

impl Compositor {
    /// Create a compositor using `font_path`, or the first system font found.
    ///
    /// Without any usable font, overlays return the base image unchanged.
    pub fn new(font_path: Option<&Path>) -> Self {
        let configured = font_path.and_then(|path| match Self::load_font(path) {
            Ok(font) => {
                log::info!("Loaded font: {}", path.display());
                Some(font)
            }
            Err(e) => {
                log::warn!("Failed to load configured font {}: {}", path.display(), e);
                None
            }
        });

        let font = configured.or_else(Self::discover_font);
        if font.is_none() {
            log::warn!("No usable font found, text overlays will be skipped");
        }

        Self { font }
    }

    pub fn without_font() -> Self {
        Self { font: None }
    }

    fn load_font(path: &Path) -> Result<FontArc, RenderError> {
        let data = std::fs::read(path).map_err(|e| RenderError::Font(e.to_string()))?;
        FontArc::try_from_vec(data).map_err(|e| RenderError::Font(e.to_string()))
    }

    fn discover_font() -> Option<FontArc> {
        FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .filter(|path| path.is_file())
            .find_map(|path| {
                let font = Self::load_font(path).ok()?;
                log::info!("Using system font: {}", path.display());
                Some(font)
            })
    }

    /// Solid black image of the given size
    pub fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, 255]),
        ))
    }

    /// Decode an encoded image (PNG, JPEG, GIF, WebP, BMP)
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage, RenderError> {
        image::load_from_memory(bytes).map_err(|e| RenderError::Decode(e.to_string()))
    }

    pub fn open(path: &Path) -> Result<DynamicImage, RenderError> {
        image::open(path).map_err(|e| RenderError::Decode(format!("{}: {}", path.display(), e)))
    }

    /// Scale `image` to fit within the target size, centered on black.
    pub fn resize(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> Result<DynamicImage, RenderError> {
        let (img_width, img_height) = (image.width(), image.height());
        if img_width == 0 || img_height == 0 {
            return Err(RenderError::InvalidImage(format!(
                "source image is {}x{}",
                img_width, img_height
            )));
        }
        if target_width == 0 || target_height == 0 {
            return Err(RenderError::InvalidImage(format!(
                "target size is {}x{}",
                target_width, target_height
            )));
        }

        let target_ratio = target_width as f32 / target_height as f32;
        let img_ratio = img_width as f32 / img_height as f32;

        let (scale_width, scale_height) = if target_ratio > img_ratio {
            // Target is wider than image, scale to height
            let scale = target_height as f32 / img_height as f32;
            (
                ((img_width as f32 * scale) as u32).max(1),
                target_height,
            )
        } else {
            // Target is taller than image (or same), scale to width
            let scale = target_width as f32 / img_width as f32;
            (
                target_width,
                ((img_height as f32 * scale) as u32).max(1),
            )
        };

        let resized = if (scale_width, scale_height) == (img_width, img_height) {
            image.to_rgba8()
        } else {
            Self::resize_exact(image, scale_width, scale_height)?
        };

        if (scale_width, scale_height) == (target_width, target_height) {
            return Ok(DynamicImage::ImageRgba8(resized));
        }

        let mut output = ImageBuffer::from_pixel(target_width, target_height, Rgba([0, 0, 0, 255]));
        let x_offset = (target_width.saturating_sub(scale_width)) / 2;
        let y_offset = (target_height.saturating_sub(scale_height)) / 2;
        image::imageops::overlay(&mut output, &resized, x_offset as i64, y_offset as i64);

        Ok(DynamicImage::ImageRgba8(output))
    }

    /// Resize with fast_image_resize, ignoring aspect ratio
    fn resize_exact(
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> Result<RgbaImage, RenderError> {
        use fast_image_resize as fr;

        let src_image = image.to_rgba8();
        let (src_width, src_height) = src_image.dimensions();

        let src = fr::images::Image::from_vec_u8(
            src_width,
            src_height,
            src_image.into_raw(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| RenderError::Resize(e.to_string()))?;

        let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
            )
            .map_err(|e| RenderError::Resize(e.to_string()))?;

        ImageBuffer::from_raw(target_width, target_height, dst.into_vec())
            .ok_or_else(|| RenderError::Resize("output buffer size mismatch".to_string()))
    }

    /// Draw `text` horizontally centered at `anchor`.
    ///
    /// A `font_size` of zero or less picks a size from the image height.
    /// Text wider than the image is scaled down to fit.
    pub fn overlay(
        &self,
        image: &DynamicImage,
        text: &str,
        font_size: f32,
        anchor: Anchor,
    ) -> Result<DynamicImage, RenderError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidImage(format!(
                "cannot draw on a {}x{} image",
                width, height
            )));
        }

        let Some(font) = self.font.as_ref() else {
            log::debug!("No font loaded, skipping overlay '{}'", text);
            return Ok(image.clone());
        };
        if text.is_empty() {
            return Ok(image.clone());
        }

        let requested = if font_size > 0.0 {
            font_size
        } else {
            height as f32 / 3.0
        };
        let mut scale = PxScale::from(requested);
        let (text_width, _) = text_size(scale, font, text);
        let max_width = width.saturating_sub(TEXT_PADDING * 2).max(1);
        if text_width > max_width {
            let shrink = max_width as f32 / text_width as f32;
            scale = PxScale::from((requested * shrink).max(1.0));
        }
        let (text_width, text_height) = text_size(scale, font, text);

        let x = (width.saturating_sub(text_width) / 2) as i32;
        let y = match anchor {
            Anchor::Top => TEXT_PADDING,
            Anchor::Middle => height.saturating_sub(text_height) / 2,
            Anchor::Bottom => height.saturating_sub(text_height + TEXT_PADDING),
        };
        let y = y as i32;

        let mut canvas = image.to_rgba8();
        draw_text_mut(&mut canvas, Rgba([0, 0, 0, 255]), x + 1, y + 1, scale, font, text);
        draw_text_mut(&mut canvas, Rgba([255, 255, 255, 255]), x, y, scale, font, text);

        Ok(DynamicImage::ImageRgba8(canvas))
    }

    /// Blank image with an explanatory message in the middle
    pub fn placeholder(
        &self,
        width: u32,
        height: u32,
        text: &str,
    ) -> Result<DynamicImage, RenderError> {
        self.overlay(
            &Self::blank(width, height),
            text,
            PLACEHOLDER_FONT_SIZE,
            Anchor::Middle,
        )
    }
}
