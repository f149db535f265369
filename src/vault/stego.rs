//! PNG steganographic codec: LSB embedding/extraction across the
//! R, G, B channels of a PNG, in row-major (y outer, x inner) pixel order.
//! The alpha channel is never touched — modifying it is visually detectable.

use crate::vault::error::StegoError;
use crate::vault::primitives;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

const MAGIC: &[u8; 4] = b"SLSH";
const HEADER_SIZE: usize = 16;

/// Result of a successful [`embed`].
pub struct EmbedResult {
    pub png_bytes: Vec<u8>,
    pub bytes_embedded: usize,
    pub checksum: [u8; 8],
    pub capacity: usize,
}

/// `floor(W·H·3 / 8) − HEADER_SIZE`. Saturates to 0 for carriers too small to
/// hold even the header.
pub fn capacity_bytes(width: u32, height: u32) -> usize {
    let channel_bits = width as usize * height as usize * 3;
    (channel_bits / 8).saturating_sub(HEADER_SIZE)
}

/// Embeds `data` into the PNG `carrier_png` and returns the re-encoded PNG.
pub fn embed(carrier_png: &[u8], data: &[u8]) -> Result<EmbedResult, StegoError> {
    let img = image::load_from_memory(carrier_png)
        .map_err(|e| StegoError::InvalidImage(e.to_string()))?;
    let mut rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let capacity = capacity_bytes(width, height);
    if data.len() > capacity {
        return Err(StegoError::CarrierTooSmall);
    }

    let checksum = primitives::checksum8_bytes(data);
    let payload = build_payload(data, &checksum);

    write_bits(&mut rgba, &payload);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(rgba)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| StegoError::InvalidImage(e.to_string()))?;

    Ok(EmbedResult {
        png_bytes: out.into_inner(),
        bytes_embedded: data.len(),
        checksum,
        capacity,
    })
}

/// Extracts and verifies a payload previously written by [`embed`].
pub fn extract(stego_png: &[u8]) -> Result<Vec<u8>, StegoError> {
    let img = image::load_from_memory(stego_png)
        .map_err(|e| StegoError::InvalidImage(e.to_string()))?;
    let rgba = img.to_rgba8();

    let header = read_bits(&rgba, HEADER_SIZE).ok_or(StegoError::NoPayload)?;
    if &header[0..4] != MAGIC {
        return Err(StegoError::NoPayload);
    }
    let data_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&header[8..16]);

    let full = read_bits(&rgba, HEADER_SIZE + data_len).ok_or(StegoError::Truncated)?;
    let data = full[HEADER_SIZE..].to_vec();

    if primitives::checksum8_bytes(&data) != checksum {
        return Err(StegoError::Corrupt);
    }
    Ok(data)
}

/// Reads only the first 32 bits and checks the magic, without validating the
/// rest of the header or payload. Any load error (including "too small to
/// even hold the magic") is reported as `false`, never propagated.
pub fn has_embedded_data(png_bytes: &[u8]) -> bool {
    let Ok(img) = image::load_from_memory(png_bytes) else {
        return false;
    };
    let rgba = img.to_rgba8();
    match read_bits(&rgba, 4) {
        Some(bytes) => bytes.as_slice() == MAGIC.as_slice(),
        None => false,
    }
}

/// Generates a smooth-gradient RGBA PNG carrier of the given dimensions —
/// used both as a fresh carrier for real payloads and, unmodified, as a decoy
/// carrier: visually innocuous, holds no payload.
pub fn generate_carrier(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = primitives::random_int(0, 255) as u8;
            img.put_pixel(x, y, image::Rgba([r, g, b, 255]));
        }
    }
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encoding a freshly generated RGBA buffer as PNG cannot fail");
    out.into_inner()
}

fn build_payload(data: &[u8], checksum: &[u8; 8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(HEADER_SIZE + data.len());
    payload.extend_from_slice(MAGIC);
    payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
    payload.extend_from_slice(checksum);
    payload.extend_from_slice(data);
    payload
}

fn write_bits(rgba: &mut RgbaImage, payload: &[u8]) {
    let (width, height) = rgba.dimensions();
    let total_bits = payload.len() * 8;
    let mut bit_idx = 0usize;

    'outer: for y in 0..height {
        for x in 0..width {
            let pixel = rgba.get_pixel_mut(x, y);
            for channel in 0..3 {
                if bit_idx >= total_bits {
                    break 'outer;
                }
                let byte = payload[bit_idx / 8];
                let bit = (byte >> (7 - (bit_idx % 8))) & 1;
                pixel[channel] = (pixel[channel] & 0xFE) | bit;
                bit_idx += 1;
            }
        }
    }
}

/// Reads `num_bytes` worth of payload bits from the start of the carrier,
/// MSB-first, in the same row-major R→G→B order `write_bits` used. Returns
/// `None` if the carrier doesn't have that many channel bits at all.
fn read_bits(rgba: &RgbaImage, num_bytes: usize) -> Option<Vec<u8>> {
    let (width, height) = rgba.dimensions();
    let needed_bits = num_bytes * 8;
    let total_bits = width as usize * height as usize * 3;
    if needed_bits > total_bits {
        return None;
    }

    let mut out = vec![0u8; num_bytes];
    let mut bit_idx = 0usize;

    'outer: for y in 0..height {
        for x in 0..width {
            let pixel = rgba.get_pixel(x, y);
            for channel in 0..3 {
                if bit_idx >= needed_bits {
                    break 'outer;
                }
                let bit = pixel[channel] & 1;
                let byte_idx = bit_idx / 8;
                let shift = 7 - (bit_idx % 8);
                out[byte_idx] |= bit << shift;
                bit_idx += 1;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_matches_formula_for_100x100() {
        assert_eq!(capacity_bytes(100, 100), 3734);
    }

    #[test]
    fn round_trips_bit_exactly() {
        let carrier = generate_carrier(800, 600);
        let mut data = vec![0u8; 1024];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 37 % 251) as u8;
        }

        let embedded = embed(&carrier, &data).unwrap();
        assert_eq!(embedded.bytes_embedded, 1024);

        let extracted = extract(&embedded.png_bytes).unwrap();
        assert_eq!(extracted, data);

        assert!(has_embedded_data(&embedded.png_bytes));
        assert!(!has_embedded_data(&carrier));
    }

    #[test]
    fn capacity_boundary_100x100() {
        let carrier = generate_carrier(100, 100);
        let ok = vec![7u8; 3734];
        assert!(embed(&carrier, &ok).is_ok());

        let carrier2 = generate_carrier(100, 100);
        let too_big = vec![7u8; 3735];
        assert!(matches!(
            embed(&carrier2, &too_big),
            Err(StegoError::CarrierTooSmall)
        ));
    }

    #[test]
    fn flipped_length_byte_is_rejected() {
        let carrier = generate_carrier(200, 200);
        let data = vec![3u8; 50];
        let embedded = embed(&carrier, &data).unwrap();

        let img = image::load_from_memory(&embedded.png_bytes).unwrap();
        let mut rgba = img.to_rgba8();
        // Flip the LSB of the first byte of the length field (bit index 39).
        let pixel = rgba.get_pixel_mut(13, 0);
        pixel[0] ^= 1;
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();

        let result = extract(&out.into_inner());
        assert!(matches!(
            result,
            Err(StegoError::Truncated) | Err(StegoError::Corrupt) | Err(StegoError::NoPayload)
        ));
    }

    #[test]
    fn no_payload_on_untouched_carrier() {
        let carrier = generate_carrier(64, 64);
        assert!(!has_embedded_data(&carrier));
        assert!(matches!(extract(&carrier), Err(StegoError::NoPayload)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig { cases: 20, .. ProptestConfig::default() })]

        // Property 3 (§8): for any carrier with capacity >= |d|,
        // extract(embed(C, d)) == d and the reported checksum matches checksum8(d).
        #[test]
        fn round_trips_for_carriers_with_sufficient_capacity(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let carrier = generate_carrier(64, 64);
            prop_assume!(data.len() <= capacity_bytes(64, 64));

            let embedded = embed(&carrier, &data).unwrap();
            prop_assert_eq!(embedded.checksum, primitives::checksum8_bytes(&data));

            let extracted = extract(&embedded.png_bytes).unwrap();
            prop_assert_eq!(extracted, data);
        }

        // Property 4 (§8): flipping any bit of the embedded header (length or
        // checksum field, byte offsets 4..16) causes extraction to fail with
        // `NoPayload`, `Truncated` or `Corrupt` — never a silent success.
        #[test]
        fn flipping_a_header_bit_is_always_rejected(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            header_byte in 4usize..16,
            bit in 0u8..8,
        ) {
            let carrier = generate_carrier(64, 64);
            prop_assume!(data.len() <= capacity_bytes(64, 64));
            let embedded = embed(&carrier, &data).unwrap();

            let img = image::load_from_memory(&embedded.png_bytes).unwrap();
            let mut rgba = img.to_rgba8();
            let bit_idx = header_byte * 8 + bit as usize;
            let pixel_idx = bit_idx / 3;
            let channel = bit_idx % 3;
            let (width, _) = rgba.dimensions();
            let x = (pixel_idx as u32) % width;
            let y = (pixel_idx as u32) / width;
            let pixel = rgba.get_pixel_mut(x, y);
            pixel[channel] ^= 1;

            let mut out = Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(rgba)
                .write_to(&mut out, ImageFormat::Png)
                .unwrap();

            let result = extract(&out.into_inner());
            prop_assert!(matches!(
                result,
                Err(StegoError::NoPayload) | Err(StegoError::Truncated) | Err(StegoError::Corrupt)
            ));
        }
    }
}
