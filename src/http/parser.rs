use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Upper bound for the request line plus headers
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeadersTooLarge,
    Incomplete,
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or
/// [`ParseError::Incomplete`] when more input is needed.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > MAX_HEADER_BYTES {
        return Err(ParseError::HeadersTooLarge);
    }

    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::parse(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    // Body
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));

    let (body, body_len) = if chunked {
        decode_chunked(body_bytes)?
    } else {
        let content_length = headers
            .get("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength)
            })
            .transpose()?
            .unwrap_or(0);

        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }

        (body_bytes[..content_length].to_vec(), content_length)
    };

    if chunked {
        // The body is forwarded de-chunked with an explicit length
        headers.remove("Transfer-Encoding");
        headers.insert("Content-Length", body.len().to_string());
    }

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
        remote_addr: None,
    };

    let total_consumed = headers_end + 4 + body_len;
    Ok((request, total_consumed))
}

/// Decodes a chunked body, returning the payload and the encoded length.
pub(crate) fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)? + pos;
        let size_line =
            std::str::from_utf8(&buf[pos..line_end]).map_err(|_| ParseError::InvalidChunk)?;
        let size_str = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos = line_end + 2;

        if size == 0 {
            // Optional trailer section, terminated by an empty line
            if buf.len() < pos + 2 {
                return Err(ParseError::Incomplete);
            }
            if &buf[pos..pos + 2] == b"\r\n" {
                return Ok((body, pos + 2));
            }
            let trailers_end = find_headers_end(&buf[pos..]).ok_or(ParseError::Incomplete)?;
            return Ok((body, pos + trailers_end + 4));
        }

        let data_end = pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
        let frame_end = data_end.checked_add(2).ok_or(ParseError::InvalidChunk)?;
        if buf.len() < frame_end {
            return Err(ParseError::Incomplete);
        }
        if &buf[data_end..frame_end] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        body.extend_from_slice(&buf[pos..data_end]);
        pos = frame_end;
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
