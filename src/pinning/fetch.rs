//! Upstream fetch - one HTTP/1.1 exchange over the validated TLS stream
//!
//! The exchange rides the same stream the handshake produced, so a trusted
//! request costs exactly one upstream connection. The request always sends
//! `Connection: close`, which lets the body be read to EOF; chunked and
//! `Content-Length` framings are still honored when present. Body reads are
//! size-capped so a hostile upstream cannot exhaust memory.

use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Upper bound on a fetched response (headers + body)
pub const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error during upstream exchange: {0}")]
    Io(#[from] io::Error),

    #[error("malformed HTTP response: {0}")]
    Malformed(String),

    #[error("incomplete HTTP response")]
    Incomplete,

    #[error("response exceeded {MAX_RESPONSE_BYTES} bytes")]
    TooLarge,
}

/// A fetched upstream response, ready to hand to the rendering surface
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Send one GET request and read the full response
pub async fn exchange<S>(
    stream: &mut S,
    host: &str,
    target: &str,
) -> Result<UpstreamResponse, FetchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {target} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\nAccept: */*\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Connection: close means EOF delimits the response.
    let raw = read_capped(stream).await?;
    parse_response(&raw)
}

/// Read until EOF, refusing to buffer past the size cap
async fn read_capped<S>(stream: &mut S) -> Result<Vec<u8>, FetchError>
where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(raw);
        }
        if raw.len() + n > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge);
        }
        raw.extend_from_slice(&chunk[..n]);
    }
}

/// Parse status line, headers, and body framing
fn parse_response(raw: &[u8]) -> Result<UpstreamResponse, FetchError> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut headers);

    let header_len = match response.parse(raw) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err(FetchError::Incomplete),
        Err(e) => return Err(FetchError::Malformed(e.to_string())),
    };

    let status = response
        .code
        .ok_or_else(|| FetchError::Malformed("missing status code".to_string()))?;

    let mut content_type = None;
    let mut content_length = None;
    let mut chunked = false;

    for header in response.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-type") {
            content_type = std::str::from_utf8(header.value)
                .ok()
                .map(|v| v.trim().to_string());
        } else if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok());
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = std::str::from_utf8(header.value)
                .map(|v| v.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false);
        }
    }

    let raw_body = &raw[header_len..];

    let body = if chunked {
        decode_chunked(raw_body)?
    } else if let Some(len) = content_length {
        if raw_body.len() < len {
            return Err(FetchError::Incomplete);
        }
        raw_body[..len].to_vec()
    } else {
        raw_body.to_vec()
    };

    debug!(
        status = status,
        body_len = body.len(),
        chunked = chunked,
        "upstream response parsed"
    );

    Ok(UpstreamResponse {
        status,
        content_type,
        body: Bytes::from(body),
    })
}

/// Decode a chunked transfer-encoded body
fn decode_chunked(mut raw: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();

    loop {
        let line_end = find_crlf(raw).ok_or(FetchError::Incomplete)?;
        let size_line = std::str::from_utf8(&raw[..line_end])
            .map_err(|_| FetchError::Malformed("non-UTF8 chunk size line".to_string()))?;

        // Chunk extensions after ';' are ignored.
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| FetchError::Malformed(format!("invalid chunk size: {size_str}")))?;

        raw = &raw[line_end + 2..];

        if size == 0 {
            // Trailers (if any) are discarded.
            return Ok(body);
        }

        // A declared size past the response cap can never be satisfied; this
        // also keeps `size + 2` below from overflowing on hostile size lines.
        if size > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge);
        }

        if raw.len() < size + 2 {
            return Err(FetchError::Incomplete);
        }

        body.extend_from_slice(&raw[..size]);

        if &raw[size..size + 2] != b"\r\n" {
            return Err(FetchError::Malformed("missing chunk terminator".to_string()));
        }
        raw = &raw[size + 2..];
    }
}

fn find_crlf(raw: &[u8]) -> Option<usize> {
    raw.windows(2).position(|w| w == b"\r\n")
}
