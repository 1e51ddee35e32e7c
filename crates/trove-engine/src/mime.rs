//! MIME type detection and the allowed-type policy.
//!
//! Detection sniffs well-known magic bytes and falls back to
//! `text/plain; charset=utf-8` for valid UTF-8, else
//! `application/octet-stream`. A file's declared MIME must match the
//! detected one and be in the allowed set.

/// MIME type of PNG images.
pub const MIME_PNG: &str = "image/png";

/// MIME type of UTF-8 text.
pub const MIME_TEXT: &str = "text/plain; charset=utf-8";

/// MIME types accepted for record files.
const MIMES_ALLOWED: [&str; 2] = [MIME_PNG, MIME_TEXT];

/// Detect the MIME type of a payload from its bytes.
pub fn detect_mime(payload: &[u8]) -> String {
    const PNG: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    const JPEG: &[u8] = &[0xff, 0xd8, 0xff];

    if payload.starts_with(PNG) {
        return MIME_PNG.to_string();
    }
    if payload.starts_with(JPEG) {
        return "image/jpeg".to_string();
    }
    if payload.starts_with(b"GIF87a") || payload.starts_with(b"GIF89a") {
        return "image/gif".to_string();
    }
    if payload.starts_with(b"%PDF-") {
        return "application/pdf".to_string();
    }
    if std::str::from_utf8(payload).is_ok() {
        return MIME_TEXT.to_string();
    }
    "application/octet-stream".to_string()
}

/// Whether a MIME type is in the allowed set for record files.
pub fn mime_valid(mime: &str) -> bool {
    MIMES_ALLOWED.contains(&mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_png() {
        let payload = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x01];
        assert_eq!(detect_mime(&payload), MIME_PNG);
    }

    #[test]
    fn test_detect_jpeg() {
        assert_eq!(detect_mime(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");
    }

    #[test]
    fn test_detect_text() {
        assert_eq!(detect_mime(b"hello, record"), MIME_TEXT);
        assert_eq!(detect_mime("{\"json\": true}".as_bytes()), MIME_TEXT);
    }

    #[test]
    fn test_detect_binary_fallback() {
        assert_eq!(
            detect_mime(&[0x00, 0xff, 0xfe, 0x80]),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_allowed_set() {
        assert!(mime_valid(MIME_PNG));
        assert!(mime_valid(MIME_TEXT));
        assert!(!mime_valid("image/jpeg"));
        assert!(!mime_valid("application/pdf"));
        assert!(!mime_valid("application/octet-stream"));
    }
}
