//! In-memory test images.

use std::io::Cursor;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgba, RgbaImage};

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn gif(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).expect("repeat");
        encoder
            .encode_frames((0..frames).map(|i| {
                let shade = (i * 50 % 256) as u8;
                let pixel = Rgba([shade, 0, 255, 255]);
                Frame::from_parts(
                    RgbaImage::from_pixel(width, height, pixel),
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                )
            }))
            .expect("encode gif");
    }
    out
}
