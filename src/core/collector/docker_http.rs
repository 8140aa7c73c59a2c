// src/core/collector/docker_http.rs

//! A minimal HTTP/1.1 client over a Unix domain socket, just enough to speak
//! to the Docker Engine API's JSON and streaming (chunked) endpoints without
//! pulling in a full HTTP client stack for a single local socket.

use crate::core::errors::{AgentError, AgentResult};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub struct DockerSocket {
    path: PathBuf,
}

impl DockerSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DockerSocket { path: path.into() }
    }

    async fn connect(&self) -> AgentResult<UnixStream> {
        UnixStream::connect(&self.path)
            .await
            .map_err(|e| AgentError::Runtime(format!("connect {}: {e}", self.path.display())))
    }

    /// Performs a GET and parses the (possibly chunked) body as JSON. Used
    /// for the short-lived, non-streaming calls (list/inspect).
    pub async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> AgentResult<T> {
        let mut stream = self.connect().await?;
        let request =
            format!("GET {path_and_query} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nAccept: application/json\r\n\r\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| AgentError::Runtime(format!("write request: {e}")))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| AgentError::Runtime(format!("read response: {e}")))?;
        let body = extract_body(&raw)?;
        serde_json::from_slice(&body).map_err(|e| AgentError::Runtime(format!("decode response from {path_and_query}: {e}")))
    }

    /// Performs a POST with an empty body and returns the response status
    /// code, discarding any body. Used for the handful of action endpoints
    /// (container restart) that don't need a JSON request or response.
    pub async fn post_empty(&self, path_and_query: &str) -> AgentResult<u16> {
        let mut stream = self.connect().await?;
        let request = format!(
            "POST {path_and_query} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| AgentError::Runtime(format!("write request: {e}")))?;

        let mut raw = Vec::new();
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(|e| AgentError::Runtime(format!("read response: {e}")))?;
        parse_status_code(&raw)
    }

    /// Opens a streaming GET (events, log follow) and returns a reader
    /// positioned at the start of the response body.
    pub async fn get_stream(&self, path_and_query: &str) -> AgentResult<ChunkedBodyReader> {
        let mut stream = self.connect().await?;
        let request = format!("GET {path_and_query} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| AgentError::Runtime(format!("write request: {e}")))?;
        let (chunked, leftover) = read_headers(&mut stream).await?;
        Ok(ChunkedBodyReader { stream, leftover, chunked, finished: false })
    }
}

fn parse_status_code(raw: &[u8]) -> AgentResult<u16> {
    let line_end = find_subslice(raw, b"\r\n").ok_or_else(|| AgentError::Runtime("malformed HTTP response (no status line)".to_string()))?;
    let line = std::str::from_utf8(&raw[..line_end]).map_err(|e| AgentError::Runtime(e.to_string()))?;
    let code = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AgentError::Runtime(format!("malformed status line {line:?}")))?;
    code.parse().map_err(|e| AgentError::Runtime(format!("bad status code {code:?}: {e}")))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_body(raw: &[u8]) -> AgentResult<Vec<u8>> {
    let pos = find_subslice(raw, b"\r\n\r\n").ok_or_else(|| AgentError::Runtime("malformed HTTP response (no header terminator)".to_string()))?;
    let header_str = String::from_utf8_lossy(&raw[..pos]).to_ascii_lowercase();
    let body = &raw[pos + 4..];
    if header_str.contains("transfer-encoding: chunked") {
        dechunk_all(body)
    } else {
        Ok(body.to_vec())
    }
}

fn dechunk_all(mut data: &[u8]) -> AgentResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = find_subslice(data, b"\r\n").ok_or_else(|| AgentError::Runtime("truncated chunk size line".to_string()))?;
        let size_str = std::str::from_utf8(&data[..line_end]).map_err(|e| AgentError::Runtime(e.to_string()))?;
        let size = usize::from_str_radix(size_str.trim(), 16).map_err(|e| AgentError::Runtime(format!("bad chunk size {size_str:?}: {e}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            break;
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
    Ok(out)
}

async fn read_headers(stream: &mut UnixStream) -> AgentResult<(bool, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 512];
    loop {
        let n = stream.read(&mut tmp).await.map_err(|e| AgentError::Runtime(format!("read headers: {e}")))?;
        if n == 0 {
            return Err(AgentError::Runtime("connection closed before headers completed".to_string()));
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            let header_str = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let chunked = header_str.contains("transfer-encoding: chunked");
            return Ok((chunked, buf[pos + 4..].to_vec()));
        }
        if buf.len() > 64 * 1024 {
            return Err(AgentError::Runtime("response headers exceeded 64 KiB".to_string()));
        }
    }
}

/// Pull-based reader over a (possibly chunked-encoded) streaming HTTP body.
/// Each call to [`read_chunk`](Self::read_chunk) yields one decoded payload
/// fragment; callers that need framed records (JSON objects, log frames)
/// accumulate fragments themselves.
pub struct ChunkedBodyReader {
    stream: UnixStream,
    leftover: Vec<u8>,
    chunked: bool,
    finished: bool,
}

impl ChunkedBodyReader {
    pub async fn read_chunk(&mut self) -> AgentResult<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if !self.chunked {
            if !self.leftover.is_empty() {
                return Ok(Some(std::mem::take(&mut self.leftover)));
            }
            let mut buf = vec![0u8; 8192];
            let n = self.stream.read(&mut buf).await.map_err(|e| AgentError::Runtime(format!("read body: {e}")))?;
            if n == 0 {
                self.finished = true;
                return Ok(None);
            }
            buf.truncate(n);
            return Ok(Some(buf));
        }

        loop {
            if let Some(pos) = find_subslice(&self.leftover, b"\r\n") {
                let size_str = String::from_utf8_lossy(&self.leftover[..pos]).trim().to_string();
                let size = usize::from_str_radix(&size_str, 16)
                    .map_err(|e| AgentError::Runtime(format!("bad chunk size {size_str:?}: {e}")))?;
                let needed = pos + 2 + size + 2;
                if self.leftover.len() >= needed {
                    let data = self.leftover[pos + 2..pos + 2 + size].to_vec();
                    self.leftover.drain(..needed);
                    if size == 0 {
                        self.finished = true;
                        return Ok(None);
                    }
                    return Ok(Some(data));
                }
            }
            let mut buf = [0u8; 8192];
            let n = self.stream.read(&mut buf).await.map_err(|e| AgentError::Runtime(format!("read body: {e}")))?;
            if n == 0 {
                self.finished = true;
                return Ok(None);
            }
            self.leftover.extend_from_slice(&buf[..n]);
        }
    }
}

pub fn socket_path_display(p: &Path) -> String {
    p.display().to_string()
}

/// Demuxes Docker's multiplexed log stream: each frame is an 8-byte header
/// (stream id in byte 0, big-endian u32 payload length in bytes 4..8)
/// followed by that many payload bytes. Frames may straddle HTTP chunk
/// boundaries, so payload is accumulated until a full frame is available.
pub struct FrameDemuxer {
    reader: ChunkedBodyReader,
    buf: Vec<u8>,
}

impl FrameDemuxer {
    pub fn new(reader: ChunkedBodyReader) -> Self {
        FrameDemuxer { reader, buf: Vec::new() }
    }

    /// Returns the next `(stream_id, payload)` frame, or `None` at end of
    /// stream. `stream_id` is 1 for stdout, 2 for stderr.
    pub async fn next_frame(&mut self) -> AgentResult<Option<(u8, Vec<u8>)>> {
        loop {
            if self.buf.len() >= 8 {
                let size = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
                if self.buf.len() >= 8 + size {
                    let stream_id = self.buf[0];
                    let payload = self.buf[8..8 + size].to_vec();
                    self.buf.drain(..8 + size);
                    return Ok(Some((stream_id, payload)));
                }
            }
            match self.reader.read_chunk().await? {
                Some(data) => self.buf.extend_from_slice(&data),
                None if self.buf.is_empty() => return Ok(None),
                None => return Err(AgentError::Runtime("docker log stream ended mid-frame".to_string())),
            }
        }
    }
}

/// Decodes a stream of concatenated JSON values (Docker's `/events`
/// response body: one JSON object per event, no separators).
pub struct JsonStreamDemuxer<T> {
    reader: ChunkedBodyReader,
    buf: Vec<u8>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> JsonStreamDemuxer<T> {
    pub fn new(reader: ChunkedBodyReader) -> Self {
        JsonStreamDemuxer { reader, buf: Vec::new(), _marker: std::marker::PhantomData }
    }

    pub async fn next_value(&mut self) -> AgentResult<Option<T>> {
        loop {
            if !self.buf.is_empty() {
                let mut de = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
                if let Some(result) = de.next() {
                    match result {
                        Ok(value) => {
                            let consumed = de.byte_offset();
                            self.buf.drain(..consumed);
                            return Ok(Some(value));
                        }
                        Err(e) if e.is_eof() => {}
                        Err(e) => return Err(AgentError::Runtime(format!("decode event stream: {e}"))),
                    }
                }
            }
            match self.reader.read_chunk().await? {
                Some(data) => self.buf.extend_from_slice(&data),
                None => return Ok(None),
            }
        }
    }
}
