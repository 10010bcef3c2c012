use std::io;
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;

use super::{OpenFlags, Storage};
use crate::{Error, Result};

/// Read-only byte range over HTTP Range requests.
///
/// Only the requested parts of the remote file are fetched, so listing a
/// remote archive costs roughly the size of its central directory.
pub struct HttpStorage {
    client: Client,
    url: String,
    size: u64,
    position: u64,
    transferred_bytes: u64,
    max_retry: u32,
}

impl HttpStorage {
    /// Create a new HTTP Range reader.
    ///
    /// This will send a HEAD request to verify Range support and get file size.
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let resp = client.head(&url).send()?;
        if !resp.status().is_success() {
            return Err(http_failure(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            return Err(http_failure(
                "Remote server does not support Range requests".to_string(),
            ));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                http_failure("Remote server did not return Content-Length".to_string())
            })?;

        Ok(Self {
            client,
            url,
            size,
            position: 0,
            transferred_bytes: 0,
            max_retry: 10,
        })
    }

    /// Total bytes transferred from network.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    /// Total size of the remote file.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn fetch(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset + len as u64 - 1;
        let mut out = Vec::with_capacity(len);
        let mut retry_count = 0;

        while out.len() < len {
            let current_start = offset + out.len() as u64;
            let range = format!("bytes={}-{}", current_start, end);

            match self.client.get(&self.url).header("Range", &range).send() {
                Ok(resp) => {
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(http_failure(format!(
                            "HTTP request failed with status: {}",
                            resp.status()
                        )));
                    }
                    let bytes = resp.bytes()?;
                    if bytes.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "server returned an empty range",
                        )
                        .into());
                    }
                    let chunk_len = bytes.len().min(len - out.len());
                    out.extend_from_slice(&bytes[..chunk_len]);
                    self.transferred_bytes += chunk_len as u64;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(http_failure("Max retries exceeded".to_string()));
                    }
                    log::warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count,
                        self.max_retry,
                        e
                    );
                    thread::sleep(Duration::from_millis(500 * retry_count as u64));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(out)
    }
}

fn http_failure(message: String) -> Error {
    Error::Io(io::Error::other(message))
}

impl Storage for HttpStorage {
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.position = offset;
        Ok(())
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.position)
    }

    fn seek_to_end(&mut self) -> Result<u64> {
        self.position = self.size;
        Ok(self.size)
    }

    fn read(&mut self, up_to: usize) -> Result<Vec<u8>> {
        if up_to == 0 || self.position >= self.size {
            return Ok(Vec::new());
        }
        let len = (self.size - self.position).min(up_to as u64) as usize;
        let data = self.fetch(self.position, len)?;
        self.position += data.len() as u64;
        Ok(data)
    }

    fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.size.saturating_sub(self.position);
        self.read(super::to_usize(remaining)?)
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::NotWritable)
    }

    fn truncate(&mut self, _offset: u64) -> Result<()> {
        Err(Error::NotWritable)
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn flags(&self) -> OpenFlags {
        OpenFlags::READ
    }

    fn create_replacement(&self) -> Result<Self> {
        Err(Error::NotWritable)
    }

    fn commit_replacement(&mut self, _replacement: Self) -> Result<()> {
        Err(Error::NotWritable)
    }
}
