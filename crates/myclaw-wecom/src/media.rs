//! Media-fetch policy for `image` messages: 10s timeout, body capped at
//! 10 MiB + 1 byte, media type from `Content-Type` or a content-sniff
//! fallback (§4.3 step 7).

use std::time::Duration;

use myclaw_core::ContentBlock;

use crate::error::{Result, WecomError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024 + 1;

pub async fn fetch_image_block(client: &reqwest::Client, url: &str) -> Result<ContentBlock> {
    let resp = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| WecomError::MediaFetch(e.to_string()))?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(strip_content_type_params);

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| WecomError::MediaFetch(e.to_string()))?;
    if bytes.len() > MAX_BODY_BYTES {
        return Err(WecomError::MediaFetch(format!(
            "image body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }

    let media_type = content_type.unwrap_or_else(|| sniff_media_type(&bytes).to_string());
    let data = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);

    Ok(ContentBlock::Image {
        media_type: Some(media_type),
        data: Some(data),
        url: None,
    })
}

fn strip_content_type_params(value: &str) -> String {
    value.split(';').next().unwrap_or(value).trim().to_string()
}

fn sniff_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_charset_parameter() {
        assert_eq!(strip_content_type_params("image/png; charset=binary"), "image/png");
    }

    #[test]
    fn sniffs_png_magic_bytes() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A];
        assert_eq!(sniff_media_type(&png), "image/png");
    }

    #[test]
    fn sniffs_jpeg_magic_bytes() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(sniff_media_type(&jpeg), "image/jpeg");
    }

    #[test]
    fn unknown_bytes_fall_back_to_octet_stream() {
        assert_eq!(sniff_media_type(b"not an image"), "application/octet-stream");
    }
}
