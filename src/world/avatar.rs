use std::collections::TryReserveError;
use std::fmt;

pub const MAX_AVATAR_WIDTH: u32 = 8;
pub const MAX_AVATAR_HEIGHT: u32 = 8;
pub const RGBA_CHANNELS: usize = 4;
pub const RGB_CHANNELS: usize = 3;

/// Canonical avatar pixels. Always RGBA32, dimensions already clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug)]
pub enum AvatarError {
    SourceTruncated { required: usize, provided: usize },
    Alloc(TryReserveError),
}

impl fmt::Display for AvatarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceTruncated { required, provided } => write!(
                f,
                "avatar source holds {} bytes, {} required",
                provided, required
            ),
            Self::Alloc(err) => write!(f, "avatar buffer allocation failed: {}", err),
        }
    }
}

fn source_bytes_per_pixel(channels: u8) -> usize {
    match channels as usize {
        RGBA_CHANNELS => RGBA_CHANNELS,
        RGB_CHANNELS => RGB_CHANNELS,
        // Unrecognized channel counts read one byte per pixel as grayscale.
        _ => 1,
    }
}

/// Converts an arbitrary source pixel buffer into canonical RGBA32.
///
/// Dimensions above 8x8 are clamped; the retained pixels are the linear
/// prefix of the source buffer, no scaling. 3-channel sources get alpha 255,
/// anything that is not 3 or 4 channels is treated as grayscale. The source
/// is never modified.
pub fn normalize_avatar(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u8,
) -> Result<AvatarImage, AvatarError> {
    let width = width.min(MAX_AVATAR_WIDTH);
    let height = height.min(MAX_AVATAR_HEIGHT);
    let pixel_count = width as usize * height as usize;

    let required = pixel_count * source_bytes_per_pixel(channels);
    if pixels.len() < required {
        return Err(AvatarError::SourceTruncated {
            required,
            provided: pixels.len(),
        });
    }

    let mut out = Vec::new();
    out.try_reserve_exact(pixel_count * RGBA_CHANNELS)
        .map_err(AvatarError::Alloc)?;

    for i in 0..pixel_count {
        let (r, g, b, a) = match channels as usize {
            RGBA_CHANNELS => (
                pixels[i * RGBA_CHANNELS],
                pixels[i * RGBA_CHANNELS + 1],
                pixels[i * RGBA_CHANNELS + 2],
                pixels[i * RGBA_CHANNELS + 3],
            ),
            RGB_CHANNELS => (
                pixels[i * RGB_CHANNELS],
                pixels[i * RGB_CHANNELS + 1],
                pixels[i * RGB_CHANNELS + 2],
                0xff,
            ),
            _ => {
                let value = pixels[i];
                (value, value, value, 0xff)
            }
        };
        out.extend_from_slice(&[r, g, b, a]);
    }

    Ok(AvatarImage {
        width,
        height,
        pixels: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_passes_through_unchanged() {
        let source: Vec<u8> = (0..16).collect();
        let image = normalize_avatar(&source, 2, 2, 4).expect("normalize rgba");
        assert_eq!(image.width, 2);
        assert_eq!(image.height, 2);
        assert_eq!(image.pixels, source);
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let source = [10u8, 20, 30, 10, 20, 30, 10, 20, 30, 10, 20, 30];
        let image = normalize_avatar(&source, 2, 2, 3).expect("normalize rgb");
        assert_eq!(image.pixels.len(), 16);
        for pixel in image.pixels.chunks(4) {
            assert_eq!(pixel, [10, 20, 30, 255]);
        }
    }

    #[test]
    fn grayscale_replicates_value() {
        let source = [0u8; 4];
        let image = normalize_avatar(&source, 2, 2, 1).expect("normalize gray");
        assert_eq!(image.pixels.len(), 16);
        for pixel in image.pixels.chunks(4) {
            assert_eq!(pixel, [0, 0, 0, 255]);
        }
    }

    #[test]
    fn unrecognized_channel_count_degrades_to_grayscale() {
        let source = [7u8; 4];
        let image = normalize_avatar(&source, 2, 2, 9).expect("normalize odd channels");
        for pixel in image.pixels.chunks(4) {
            assert_eq!(pixel, [7, 7, 7, 255]);
        }
    }

    #[test]
    fn oversized_dimensions_clamp_without_overread() {
        // A 16x16 grayscale source; only the first 64 bytes may be touched.
        let source: Vec<u8> = (0..=255).collect();
        let image = normalize_avatar(&source, 16, 16, 1).expect("normalize clamped");
        assert_eq!(image.width, MAX_AVATAR_WIDTH);
        assert_eq!(image.height, MAX_AVATAR_HEIGHT);
        assert_eq!(image.pixels.len(), 8 * 8 * RGBA_CHANNELS);
        for (i, pixel) in image.pixels.chunks(4).enumerate() {
            let value = i as u8;
            assert_eq!(pixel, [value, value, value, 255]);
        }

        // A clamped source sized for exactly the retained prefix still works.
        let exact = vec![1u8; 64];
        assert!(normalize_avatar(&exact, 16, 16, 1).is_ok());
    }

    #[test]
    fn truncated_source_is_rejected() {
        let source = [0u8; 11];
        match normalize_avatar(&source, 2, 2, 3) {
            Err(AvatarError::SourceTruncated { required, provided }) => {
                assert_eq!(required, 12);
                assert_eq!(provided, 11);
            }
            other => panic!("expected truncation error, got {:?}", other),
        }
    }

    #[test]
    fn normalization_is_deterministic() {
        let source: Vec<u8> = (0..48).map(|v| (v * 5) as u8).collect();
        let first = normalize_avatar(&source, 4, 4, 3).expect("first pass");
        let second = normalize_avatar(&source, 4, 4, 3).expect("second pass");
        assert_eq!(first, second);
    }
}
