//! Image encoding helpers.
//!
//! Pure utility for turning rendered plot bytes into the base64 data URIs
//! the answer format expects. The size budget matches the limit quoted in
//! the code-generation prompt.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Maximum accepted length of an embedded plot data URI, in bytes.
pub const MAX_DATA_URI_BYTES: usize = 100_000;

/// Encodes raw image bytes as a `data:<mime>;base64,...` URI.
pub fn encode_image_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Whether a data URI fits the embedded-plot size budget.
pub fn fits_data_uri_budget(data_uri: &str) -> bool {
    data_uri.len() <= MAX_DATA_URI_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png_data_uri() {
        let uri = encode_image_data_uri(&[0x89, b'P', b'N', b'G'], "image/png");
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(uri.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn test_budget_check() {
        assert!(fits_data_uri_budget("data:image/png;base64,AAAA"));
        let oversized = "x".repeat(MAX_DATA_URI_BYTES + 1);
        assert!(!fits_data_uri_budget(&oversized));
    }
}
