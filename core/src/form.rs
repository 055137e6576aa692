use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("couldn't parse '{0}'")]
    MalformedSegment(String),

    #[error("invalid percent-encoding in '{0}'")]
    InvalidEncoding(String),
}

/// Decode an `application/x-www-form-urlencoded` body.
///
/// Every `&`-separated segment must contain exactly one `=`. Later duplicates
/// overwrite earlier ones. A literal `\r\n` left in a value by the browser is
/// turned into a real newline.
pub fn decode(body: &str) -> Result<BTreeMap<String, String>, FormError> {
    let mut data = BTreeMap::new();
    if body.trim().is_empty() {
        return Ok(data);
    }

    let body = body.replace('+', " ");
    for segment in body.split('&') {
        let mut parts = segment.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FormError::MalformedSegment(segment.to_string()));
        };
        data.insert(unescape(key, segment)?, unescape(value, segment)?);
    }
    Ok(data)
}

fn unescape(raw: &str, segment: &str) -> Result<String, FormError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| FormError::InvalidEncoding(segment.to_string()))?;
    Ok(decoded.replace("\\r\\n", "\n"))
}
