//! Conversions from `image` decoder output into model buffers.

use std::io::Cursor;
use std::time::Duration;

use glimpse_model::{AnimationFrame, ImageDimensions, PixelBuffer};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Frames, ImageError, ImageFormat, RgbaImage};

use crate::error::DecodeError;

pub(crate) fn classify(err: ImageError) -> DecodeError {
    match &err {
        ImageError::IoError(io)
            if io.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            DecodeError::Truncated
        }
        _ => DecodeError::Malformed(err),
    }
}

/// Native dimensions if `bytes` already contain a complete header.
pub(crate) fn header_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn into_pixel_buffer(
    image: RgbaImage,
    target: Option<ImageDimensions>,
    filter: FilterType,
) -> Result<PixelBuffer, DecodeError> {
    let image = match target {
        Some(target) if target.as_u32_tuple() != image.dimensions() => {
            let (w, h) = target.as_u32_tuple();
            imageops::resize(&image, w, h, filter)
        }
        _ => image,
    };

    let (width, height) = image.dimensions();
    let dimensions = ImageDimensions::try_from((width, height))
        .map_err(|_| DecodeError::InvalidDimensions { width, height })?;
    PixelBuffer::from_rgba(dimensions, image.into_raw())
        .map_err(|_| DecodeError::InvalidDimensions { width, height })
}

/// Decode a complete still image, scaling it to `target` when given.
pub(crate) fn decode_static(
    bytes: &[u8],
    target: Option<ImageDimensions>,
) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let image = image::load_from_memory(bytes).map_err(classify)?;
    into_pixel_buffer(image.to_rgba8(), target, FilterType::Lanczos3)
}

fn animation_frames(bytes: &[u8]) -> Result<Option<Frames<'_>>, ImageError> {
    let frames = match image::guess_format(bytes)? {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(bytes))?.into_frames(),
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.into_frames()
        }
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(bytes))?;
            if !decoder.is_apng()? {
                return Ok(None);
            }
            decoder.apng()?.into_frames()
        }
        _ => return Ok(None),
    };
    Ok(Some(frames))
}

/// Decode the frames of an animation, appending to `frames`.
///
/// Frames already in `frames` are parsed again but not converted, so a
/// caller can extend the same vector as more bytes arrive. Formats without
/// animation support decode to a single frame. With `partial` set, decoding
/// stops quietly at the first frame that cannot be read yet.
pub(crate) fn extend_frames(
    bytes: &[u8],
    target: Option<ImageDimensions>,
    frames: &mut Vec<AnimationFrame>,
    partial: bool,
) -> Result<(), DecodeError> {
    let decoded = match animation_frames(bytes) {
        Ok(Some(decoded)) => decoded,
        Ok(None) if partial => return Ok(()),
        Ok(None) => {
            if frames.is_empty() {
                frames.push(AnimationFrame {
                    buffer: decode_static(bytes, target)?,
                    delay: Duration::ZERO,
                });
            }
            return Ok(());
        }
        Err(_) if partial => return Ok(()),
        Err(err) => return Err(classify(err)),
    };

    let known = frames.len();
    for (index, frame) in decoded.enumerate() {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) if partial => break,
            Err(err) => return Err(classify(err)),
        };
        if index < known {
            continue;
        }
        let delay = Duration::from(frame.delay());
        let buffer = into_pixel_buffer(
            frame.into_buffer(),
            target,
            FilterType::Triangle,
        )?;
        frames.push(AnimationFrame { buffer, delay });
    }

    if frames.is_empty() && !partial {
        return Err(DecodeError::EmptyAnimation);
    }
    Ok(())
}

/// The rows of a PNG readable from `bytes` so far, with the undecoded rest
/// left transparent.
///
/// Returns the row count alongside the RGBA image. Interlaced images are
/// not surfaced since their passes do not fill the image top to bottom.
pub(crate) fn png_rows(bytes: &[u8]) -> Option<(u32, RgbaImage)> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(
        png::Transformations::EXPAND | png::Transformations::STRIP_16,
    );
    let mut reader = decoder.read_info().ok()?;
    let (width, height, interlaced) = {
        let info = reader.info();
        (info.width, info.height, info.interlaced)
    };
    let (color, depth) = reader.output_color_type();
    if interlaced || depth != png::BitDepth::Eight {
        return None;
    }

    let stride = width as usize * 4;
    let mut pixels = vec![0u8; stride * height as usize];
    let mut rows = 0u32;
    while rows < height {
        let Ok(Some(row)) = reader.next_row() else {
            break;
        };
        let start = rows as usize * stride;
        let out = &mut pixels[start..start + stride];
        if !expand_row(color, row.data(), out) {
            return None;
        }
        rows += 1;
    }

    let image = RgbaImage::from_raw(width, height, pixels)?;
    Some((rows, image))
}

fn expand_row(color: png::ColorType, row: &[u8], out: &mut [u8]) -> bool {
    let channels = match color {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => return false,
    };
    if row.len() * 4 != out.len() * channels {
        return false;
    }

    for (px, dst) in row.chunks_exact(channels).zip(out.chunks_exact_mut(4)) {
        let rgba = match *px {
            [g] => [g, g, g, 255],
            [g, a] => [g, g, g, a],
            [r, g, b] => [r, g, b, 255],
            [r, g, b, a] => [r, g, b, a],
            _ => return false,
        };
        dst.copy_from_slice(&rgba);
    }
    true
}

/// Scale a partially decoded still to `target`.
pub(crate) fn partial_static(
    image: RgbaImage,
    target: Option<ImageDimensions>,
) -> Result<PixelBuffer, DecodeError> {
    into_pixel_buffer(image, target, FilterType::Triangle)
}
