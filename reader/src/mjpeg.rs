use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use mjpeg_ocr_common::config::StreamConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use tracing::{debug, info};

use crate::media_type;
use crate::ReaderError;

/// Part headers larger than this are treated as a broken stream.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// HTTP body of the camera response, boxed so the reader can poll it.
pub type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>>>>;

/// Issue the single GET against the camera.
///
/// The timeout bounds connecting and waiting for the response headers only;
/// the body is read for as long as the camera keeps sending.
pub async fn open_stream(config: &StreamConfig) -> Result<Response, ReaderError> {
    let url = reqwest::Url::parse(&config.url)
        .map_err(|e| ReaderError::InvalidUrl(config.url.clone(), e.to_string()))?;
    let timeout = config.connect_timeout();

    let client = reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .map_err(ReaderError::HttpConnect)?;

    let mut request = client.get(url);
    let credentials = config.credentials();
    if let Some((username, password)) = credentials {
        request = request.basic_auth(username, Some(password));
    }

    info!(
        url = config.url,
        authenticated = credentials.is_some(),
        timeout_secs = timeout.as_secs(),
        "connecting to MJPEG stream"
    );

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| ReaderError::HttpTimeout(timeout))?
        .map_err(ReaderError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(ReaderError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");
    Ok(response)
}

/// Resolve the boundary from the response headers and wrap the body.
pub fn multipart_reader(
    response: Response,
    config: &StreamConfig,
) -> Result<MultipartReader<BodyStream>, ReaderError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let media_type = media_type::resolve(&content_type)?;
    debug!(
        media_type = media_type.essence,
        boundary = media_type.boundary(),
        "resolved multipart boundary"
    );

    let body: BodyStream = Box::pin(response.bytes_stream());
    Ok(MultipartReader::new(body, media_type.boundary())
        .with_max_part_bytes(config.max_part_bytes)
        .with_chunk_timeout(config.frame_timeout()))
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Part {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP stream error: {0}")]
    Stream(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("stream ended inside part headers")]
    UnexpectedEof,
    #[error("part exceeds {limit} bytes without a boundary")]
    PartTooLarge { limit: usize },
    #[error("malformed part header: {0}")]
    MalformedHeader(String),
    #[error("no data received for {0:?}")]
    Stalled(Duration),
}

/// Parse state for the multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Skipping preamble until the first `--boundary` line.
    SeekingBoundary,
    /// Just past a delimiter; `--` means close, otherwise skip to end of line.
    DelimiterLine,
    /// Looking for the blank line that ends the part headers.
    ReadingHeaders,
    /// Collecting body bytes until `\n--boundary`.
    CollectingBody,
    /// Close delimiter seen, stream ended or an error was returned.
    Closed,
}

/// Splits a multipart byte stream into parts, one at a time.
pub struct MultipartReader<S> {
    stream: S,
    buffer: BytesMut,
    /// `--boundary`
    delimiter: Vec<u8>,
    /// `\n--boundary`, the end of a part body.
    body_delimiter: Vec<u8>,
    state: ParseState,
    headers: Vec<(String, String)>,
    scan_from: usize,
    preamble_trimmed: bool,
    max_part_bytes: usize,
    chunk_timeout: Option<Duration>,
    parts_read: u64,
}

impl<S, E> MultipartReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(stream: S, boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        let mut body_delimiter = Vec::with_capacity(delimiter.len() + 1);
        body_delimiter.push(b'\n');
        body_delimiter.extend_from_slice(&delimiter);

        Self {
            stream,
            buffer: BytesMut::with_capacity(256 * 1024),
            delimiter,
            body_delimiter,
            state: ParseState::SeekingBoundary,
            headers: Vec::new(),
            scan_from: 0,
            preamble_trimmed: false,
            max_part_bytes: 16 * 1024 * 1024,
            chunk_timeout: None,
            parts_read: 0,
        }
    }

    pub fn with_max_part_bytes(mut self, limit: usize) -> Self {
        self.max_part_bytes = limit;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Number of parts returned so far.
    pub fn parts_read(&self) -> u64 {
        self.parts_read
    }

    /// Read the next part.
    ///
    /// `Ok(None)` means the stream is over: a close delimiter arrived or the
    /// server closed the connection between parts. After `Ok(None)` or an
    /// error every later call returns `Ok(None)`.
    pub async fn next_part(&mut self) -> Result<Option<Part>, StreamError> {
        let result = self.advance().await;
        if !matches!(result, Ok(Some(_))) {
            self.state = ParseState::Closed;
            self.buffer.clear();
        }
        result
    }

    async fn advance(&mut self) -> Result<Option<Part>, StreamError> {
        loop {
            match self.state {
                ParseState::Closed => return Ok(None),
                ParseState::SeekingBoundary => {
                    if let Some(pos) = self.find_first_delimiter() {
                        let _ = self.buffer.split_to(pos + self.delimiter.len());
                        self.state = ParseState::DelimiterLine;
                        continue;
                    }
                    // Keep enough bytes for a delimiter split across chunks.
                    let keep = self.delimiter.len() + 1;
                    if self.buffer.len() > keep {
                        let _ = self.buffer.split_to(self.buffer.len() - keep);
                        self.preamble_trimmed = true;
                    }
                    if !self.fill().await? {
                        debug!("stream ended before the first boundary");
                        return Ok(None);
                    }
                }
                ParseState::DelimiterLine => {
                    if self.buffer.starts_with(b"--") {
                        debug!(parts = self.parts_read, "close delimiter received");
                        return Ok(None);
                    }
                    // A lone `-` may still become the close marker.
                    if &self.buffer[..] != b"-" {
                        if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                            let _ = self.buffer.split_to(pos + 1);
                            self.state = ParseState::ReadingHeaders;
                            continue;
                        }
                    }
                    if self.buffer.len() > MAX_HEADER_BYTES {
                        return Err(StreamError::MalformedHeader(
                            "delimiter line never ends".into(),
                        ));
                    }
                    if !self.fill().await? {
                        return Ok(None);
                    }
                }
                ParseState::ReadingHeaders => {
                    if let Some((block_len, consumed)) = find_header_end(&self.buffer) {
                        let block = self.buffer.split_to(consumed);
                        self.headers = parse_headers(&block[..block_len])?;
                        self.scan_from = 0;
                        self.state = ParseState::CollectingBody;
                        continue;
                    }
                    if self.buffer.len() > MAX_HEADER_BYTES {
                        return Err(StreamError::MalformedHeader(format!(
                            "header block exceeds {MAX_HEADER_BYTES} bytes"
                        )));
                    }
                    if !self.fill().await? {
                        if self.buffer.iter().all(u8::is_ascii_whitespace) {
                            return Ok(None);
                        }
                        return Err(StreamError::UnexpectedEof);
                    }
                }
                ParseState::CollectingBody => {
                    if let Some(pos) = find_from(&self.buffer, &self.body_delimiter, self.scan_from)
                    {
                        // Strip the CR of the CRLF that precedes the delimiter
                        let end = if pos > 0 && self.buffer[pos - 1] == b'\r' {
                            pos - 1
                        } else {
                            pos
                        };
                        let chunk = self.buffer.split_to(pos + self.body_delimiter.len());
                        let body = chunk.freeze().slice(..end);
                        self.state = ParseState::DelimiterLine;
                        return Ok(Some(self.finish_part(body)));
                    }
                    if self.buffer.len() > self.max_part_bytes + self.body_delimiter.len() {
                        return Err(StreamError::PartTooLarge {
                            limit: self.max_part_bytes,
                        });
                    }
                    // Avoid re-scanning old data
                    self.scan_from = self
                        .buffer
                        .len()
                        .saturating_sub(self.body_delimiter.len() - 1);
                    if !self.fill().await? {
                        let body = trim_line_ending(self.buffer.split().freeze());
                        self.state = ParseState::Closed;
                        if body.is_empty() {
                            return Ok(None);
                        }
                        debug!(
                            bytes = body.len(),
                            "stream ended inside a part, returning buffered body"
                        );
                        return Ok(Some(self.finish_part(body)));
                    }
                }
            }
        }
    }

    /// Pull one chunk into the buffer. Returns `false` at end of stream.
    async fn fill(&mut self) -> Result<bool, StreamError> {
        let next = match self.chunk_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.next())
                .await
                .map_err(|_| StreamError::Stalled(limit))?,
            None => self.stream.next().await,
        };
        match next {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => Err(StreamError::Stream(Box::new(e))),
            None => Ok(false),
        }
    }

    /// A delimiter only counts at the start of a line.
    fn find_first_delimiter(&self) -> Option<usize> {
        let mut from = 0;
        while let Some(pos) = find_from(&self.buffer, &self.delimiter, from) {
            let at_line_start = if pos == 0 {
                !self.preamble_trimmed
            } else {
                self.buffer[pos - 1] == b'\n'
            };
            if at_line_start {
                return Some(pos);
            }
            from = pos + 1;
        }
        None
    }

    fn finish_part(&mut self, body: Bytes) -> Part {
        self.parts_read += 1;
        Part {
            headers: std::mem::take(&mut self.headers),
            body,
        }
    }
}

/// Returns `(header_block_len, bytes_to_consume)` once the blank line is buffered.
fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if buffer.starts_with(b"\r\n") {
        return Some((0, 2));
    }
    if buffer.starts_with(b"\n") {
        return Some((0, 1));
    }
    let crlf = find_from(buffer, b"\r\n\r\n", 0).map(|pos| (pos, pos + 4));
    let lf = find_from(buffer, b"\n\n", 0).map(|pos| (pos, pos + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_headers(block: &[u8]) -> Result<Vec<(String, String)>, StreamError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| StreamError::MalformedHeader("headers are not UTF-8".into()))?;
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| StreamError::MalformedHeader(line.to_string()))
        })
        .collect()
}

fn trim_line_ending(mut body: Bytes) -> Bytes {
    if body.ends_with(b"\r\n") {
        body.truncate(body.len() - 2);
    } else if body.ends_with(b"\n") {
        body.truncate(body.len() - 1);
    }
    body
}

/// Find the position of `needle` in `haystack`, starting at `from`.
fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
