//! Incremental image decoding.

mod frames;
pub mod progressive;

use std::io::Read;

use glimpse_model::{BoundingBox, DecodedAsset};

use crate::error::DecodeError;

pub use progressive::{
    DecodeEvent, DecoderState, PROGRESSIVE_STEP, ProgressiveDecoder,
};

/// Chunk size used when decoding from a reader.
pub const READ_CHUNK: usize = 32 * 1024;

fn take_complete(events: Vec<DecodeEvent>) -> Option<DecodedAsset> {
    events.into_iter().find_map(|event| match event {
        DecodeEvent::Complete(asset) => Some(asset),
        _ => None,
    })
}

/// Decode a complete in-memory image in one go.
pub fn decode_bytes(
    bytes: &[u8],
    bound: Option<BoundingBox>,
    animated: bool,
) -> Result<DecodedAsset, DecodeError> {
    let mut decoder = ProgressiveDecoder::new(bound, animated);
    decoder.feed(bytes)?;
    take_complete(decoder.finish()?).ok_or(DecodeError::Truncated)
}

/// Decode everything `reader` yields, reporting each event to `sink` as it
/// happens, including the final [`DecodeEvent::Complete`].
///
/// Blocking; run it on a blocking worker.
pub fn decode_reader<R, F>(
    mut reader: R,
    mut decoder: ProgressiveDecoder,
    mut sink: F,
) -> Result<DecodedAsset, DecodeError>
where
    R: Read,
    F: FnMut(&DecodeEvent),
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                continue;
            }
            Err(err) => return Err(DecodeError::Read(err)),
        };
        for event in decoder.feed(&chunk[..read])? {
            sink(&event);
        }
    }

    finish_into(decoder, sink)
}

/// Like [`decode_reader`], for input that already arrives in chunks.
pub fn decode_chunks<I, F>(
    chunks: I,
    mut decoder: ProgressiveDecoder,
    mut sink: F,
) -> Result<DecodedAsset, DecodeError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
    F: FnMut(&DecodeEvent),
{
    for chunk in chunks {
        for event in decoder.feed(chunk.as_ref())? {
            sink(&event);
        }
    }
    finish_into(decoder, sink)
}

fn finish_into<F>(
    mut decoder: ProgressiveDecoder,
    mut sink: F,
) -> Result<DecodedAsset, DecodeError>
where
    F: FnMut(&DecodeEvent),
{
    let events = decoder.finish()?;
    for event in &events {
        sink(event);
    }
    take_complete(events).ok_or(DecodeError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                width,
                height,
                Rgba([90, 90, 90, 255]),
            ))
            .to_rgb8(),
        )
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
        out.into_inner()
    }

    #[test]
    fn reader_reports_size_before_completion() {
        let bytes = jpeg(400, 100);
        let mut seen = Vec::new();
        let asset = decode_reader(
            Cursor::new(bytes),
            ProgressiveDecoder::new(BoundingBox::from_u32(100, 100), false),
            |event| {
                seen.push(match event {
                    DecodeEvent::SizePrepared { .. } => "size",
                    DecodeEvent::FrameAvailable(_) => "frame",
                    DecodeEvent::Complete(_) => "complete",
                })
            },
        )
        .unwrap();

        assert_eq!(seen, vec!["size", "complete"]);
        assert_eq!(
            asset.dimensions().map(|d| d.as_u32_tuple()),
            Some((100, 25))
        );
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let bytes = jpeg(64, 48);
        let whole = decode_bytes(&bytes, None, false).unwrap();
        let pieces = decode_chunks(
            bytes.chunks(5),
            ProgressiveDecoder::new(None, false),
            |_| {},
        )
        .unwrap();
        assert_eq!(whole, pieces);
    }

    #[test]
    fn bytes_decode_without_bound() {
        let asset = decode_bytes(&jpeg(7, 3), None, false).unwrap();
        assert!(!asset.is_animated());
        assert_eq!(asset.dimensions().map(|d| d.as_u32_tuple()), Some((7, 3)));
    }
}
