//! Image encoding for multimodal prompts

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

/// Bounding box and JPEG quality for each successive shrink
pub const REFINEMENT_STEPS: &[(u32, u8)] = &[(1536, 85), (1024, 75), (768, 65), (512, 50)];

/// Encoded image ready for a `data:` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    /// Keep the original bytes, sniffing the format from magic numbers
    pub fn original(bytes: &[u8]) -> Self {
        let mime = image::guess_format(bytes)
            .map(|f| f.to_mime_type())
            .unwrap_or("image/png");
        Self {
            mime,
            bytes: bytes.to_vec(),
        }
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64())
    }

    /// Size of the base64 payload as sent on the wire
    pub fn payload_len(&self) -> usize {
        self.bytes.len().div_ceil(3) * 4
    }
}

/// Re-encode `bytes` as JPEG fitted into `max_side`
fn shrink(bytes: &[u8], max_side: u32, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = if decoded.width() > max_side || decoded.height() > max_side {
        decoded.thumbnail(max_side, max_side)
    } else {
        decoded
    };

    let rgb = resized.to_rgb8();
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
    }

    Ok(EncodedImage {
        mime: ImageFormat::Jpeg.to_mime_type(),
        bytes: out,
    })
}

/// Image to send on attempt `attempt` (1-based)
///
/// The first attempt sends the original unless it already exceeds `limit`.
/// Each later attempt walks one step further down [`REFINEMENT_STEPS`] and
/// keeps going while the payload is still over `limit`. An undecodable image
/// is sent unchanged.
pub fn encode_for_attempt(bytes: &[u8], attempt: u32, limit: Option<usize>) -> EncodedImage {
    let original = EncodedImage::original(bytes);
    let fits = |img: &EncodedImage| limit.is_none_or(|max| img.payload_len() <= max);

    if attempt <= 1 && fits(&original) {
        return original;
    }

    let first_step = attempt.saturating_sub(2) as usize;
    let mut last = None;
    for &(side, quality) in REFINEMENT_STEPS.iter().skip(first_step.min(REFINEMENT_STEPS.len() - 1)) {
        match shrink(bytes, side, quality) {
            Ok(encoded) => {
                let ok = fits(&encoded);
                tracing::debug!(side, quality, bytes = encoded.bytes.len(), fits = ok, "image re-encoded");
                if ok {
                    return encoded;
                }
                last = Some(encoded);
            }
            Err(e) => {
                tracing::warn!(error = %e, "image could not be decoded; sending original");
                return original;
            }
        }
    }

    last.unwrap_or(original)
}
