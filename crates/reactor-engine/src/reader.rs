//! Bounded, chunk-by-chunk response body reader (spec.md §4.3).

use futures_util::StreamExt;

use crate::error::HttpError;

/// Streams a response body, enforcing `max_response_size` both from the
/// `content-length` header (fail fast) and from the accumulated stream size
/// (fail mid-stream), per spec.md §4.3.
pub struct ResponseReader {
    max_size: u64,
}

impl ResponseReader {
    /// Build a reader bounded at `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    /// Read the full body of `response`, or `None` if there is no body
    /// (e.g. a 204, or zero `content-length`).
    pub async fn read(&self, response: reqwest::Response) -> Result<Option<Vec<u8>>, HttpError> {
        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(HttpError::response_too_large(self.max_size));
            }
            if len == 0 {
                return Ok(None);
            }
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(HttpError::from_reqwest)?;
            buffer.extend_from_slice(&chunk);
            if buffer.len() as u64 > self.max_size {
                return Err(HttpError::response_too_large(self.max_size));
            }
        }

        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

/// Extract the `charset=` parameter from a `content-type` header value,
/// case-insensitively and tolerant of quoted values. Returns `None` when
/// absent or unrecognized; callers then leave the body as raw bytes.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}
