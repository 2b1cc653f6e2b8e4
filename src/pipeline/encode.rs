//! Image encoding: `data:` URIs in, base64 PNG out.
//!
//! The colorize API accepts a base64 image body no larger than 4096 px on
//! its longest edge. PNG is chosen for the re-encode because it is lossless
//! and every browser displays it. The colorized result goes back into the
//! document as a `data:` URI labelled with the format its bytes actually
//! have, since the API does not promise to answer in the format it was sent.

use crate::error::BeautifyError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Longest edge accepted by the colorize API.
pub const MAX_COLORIZE_EDGE: u32 = 4096;

/// Encode an image as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Build a `data:` URI for raw image bytes.
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Wrap a base64 image as a `data:` URI, sniffing the mime type from its
/// leading bytes. Unrecognised payloads are labelled `image/png`.
pub fn base64_data_uri(b64: &str) -> String {
    let head: String = b64
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .take(64)
        .collect();
    let head = &head[..head.len() - head.len() % 4];
    let mime = STANDARD
        .decode(head)
        .ok()
        .and_then(|bytes| image::guess_format(&bytes).ok())
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, b64.trim())
}

/// Split a `data:<mime>;base64,<payload>` URI into its mime type and bytes.
///
/// A bare base64 string (no `data:` prefix) is accepted too and reported
/// with an empty mime type.
pub fn decode_data_uri(input: &str) -> Result<(String, Vec<u8>), BeautifyError> {
    let input = input.trim();
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| BeautifyError::Image("data URI has no ',' separator".into()))?;
            let mime = meta
                .strip_suffix(";base64")
                .ok_or_else(|| BeautifyError::Image("only base64 data URIs are supported".into()))?;
            (mime.to_string(), payload)
        }
        None => (String::new(), input),
    };

    // Some clients wrap base64 in whitespace.
    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| BeautifyError::Image(format!("invalid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(BeautifyError::Image("image is empty".into()));
    }
    Ok((mime, bytes))
}

/// Decode an image, downscale it to fit the colorize API, and return a
/// base64 PNG payload (no `data:` prefix).
pub fn prepare_for_colorize(input: &str) -> Result<String, BeautifyError> {
    let (_, bytes) = decode_data_uri(input)?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| BeautifyError::Image(format!("cannot decode image: {e}")))?;

    let img = if img.width().max(img.height()) > MAX_COLORIZE_EDGE {
        debug!(
            "Downscaling {}x{} image to fit {} px",
            img.width(),
            img.height(),
            MAX_COLORIZE_EDGE
        );
        img.resize(
            MAX_COLORIZE_EDGE,
            MAX_COLORIZE_EDGE,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    let png = png_bytes(&img).map_err(|e| BeautifyError::Image(e.to_string()))?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}
