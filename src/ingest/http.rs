//! HTTP MJPEG/JPEG frame source.
//!
//! Handles network cameras that serve `multipart/x-mixed-replace` MJPEG streams
//! (phone "IP Webcam" apps, ESP32-CAM firmware) or a single JPEG per request.
//!
//! The transport has no buffer-depth knob, so the handle keeps at most one
//! partially received frame in memory and `drain` drops complete JPEGs that
//! have already arrived behind the one just returned.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use image::GenericImageView;
use url::Url;

use crate::config::SourceConfig;
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

use super::{ConnectionHandle, Connector};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8192;

pub struct HttpConnector {
    url: Url,
}

impl HttpConnector {
    pub fn new(uri: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(uri)
            .map_err(|e| ConnectionError::Configuration(format!("parse {}: {}", uri, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(Self { url }),
            other => Err(ConnectionError::Configuration(format!(
                "unsupported http scheme '{}'",
                other
            ))),
        }
    }
}

impl Connector for HttpConnector {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn open(
        &mut self,
        config: &SourceConfig,
    ) -> Result<Box<dyn ConnectionHandle>, ConnectionError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.read_timeout)
            .timeout_read(config.read_timeout)
            .build();
        let response = agent
            .get(self.url.as_str())
            .call()
            .map_err(|e| ConnectionError::Unavailable(format!("connect to {}: {}", self.url, e)))?;

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::Snapshot
        };
        log::info!(
            "HttpSource: connected to {} ({})",
            self.url,
            match stream {
                HttpStream::Mjpeg(_) => "mjpeg",
                HttpStream::Snapshot => "snapshot",
            }
        );

        Ok(Box::new(HttpHandle {
            url: self.url.clone(),
            agent,
            stream: Some(stream),
            read_timeout: config.read_timeout,
        }))
    }
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

struct HttpHandle {
    url: Url,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    read_timeout: Duration,
}

impl ConnectionHandle for HttpHandle {
    fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ReadError::ConnectionLost("http source closed".into()))?;
        let jpeg = match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(self.read_timeout)?,
            HttpStream::Snapshot => fetch_snapshot(&self.agent, &self.url)?,
        };
        decode_jpeg(&jpeg)
    }

    fn drain(&mut self, max: usize) -> usize {
        match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => stream.drop_buffered(max),
            _ => 0,
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("HttpSource: closed {}", self.url);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Read until one complete JPEG is buffered or `timeout` has elapsed.
    ///
    /// The socket read timeout resets on every chunk, so a trickling stream is
    /// bounded by the deadline here instead.
    fn read_next_jpeg(&mut self, timeout: Duration) -> Result<Vec<u8>, ReadError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = match self.reader.read(&mut chunk) {
                Ok(read) => read,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(ReadError::Timeout(timeout));
                }
                Err(e) => return Err(ReadError::ConnectionLost(format!("read mjpeg chunk: {}", e))),
            };
            if read == 0 {
                return Err(ReadError::ConnectionLost("mjpeg stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
                return Err(ReadError::Decode("mjpeg frame exceeded max jpeg size".into()));
            }
            if Instant::now() >= deadline {
                return Err(ReadError::Timeout(timeout));
            }
        }
    }

    /// Drop up to `max` complete JPEGs already sitting in the buffer.
    fn drop_buffered(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while dropped < max {
            let Some((_, end)) = find_jpeg_bounds(&self.buffer) else {
                break;
            };
            self.buffer.drain(..end);
            dropped += 1;
        }
        dropped
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &Url) -> Result<Vec<u8>, ReadError> {
    let response = agent.get(url.as_str()).call().map_err(|e| {
        ReadError::ConnectionLost(format!("fetch jpeg snapshot from {}: {}", url, e))
    })?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| ReadError::ConnectionLost(format!("read jpeg snapshot: {}", e)))?;
    if bytes.is_empty() {
        return Err(ReadError::Decode("empty jpeg snapshot".into()));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RawFrame, ReadError> {
    let image =
        image::load_from_memory(bytes).map_err(|e| ReadError::Decode(format!("decode jpeg: {}", e)))?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok(RawFrame::rgb(rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
