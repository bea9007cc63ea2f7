//! Blocking HTTP fetch with progress and cooperative cancellation.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelToken;

const CHUNK_SIZE: usize = 64 * 1024;

/// What a fetch wrote, and what the server said it would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchReport {
    pub bytes_written: u64,
    /// `Content-Length`, when the server sent one
    pub advertised: Option<u64>,
}

impl FetchReport {
    /// True when the server advertised a length and fewer/more bytes arrived.
    pub fn is_truncated(&self) -> bool {
        self.advertised
            .is_some_and(|expected| expected != self.bytes_written)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Network(String),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Source of remote bytes. The installer is generic over this so stage tests
/// run without network access.
pub trait Downloader: Send + Sync {
    /// Stream `url` into `dest` (created or truncated). `on_progress` receives
    /// `(bytes_so_far, advertised_total)`.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<FetchReport, FetchError>;
}

pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .timeout_read(Duration::from_secs(60))
                .user_agent(concat!("splatkit/", env!("CARGO_PKG_VERSION")))
                .build(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<FetchReport, FetchError> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => FetchError::Network(format!("HTTP {}", code)),
            ureq::Error::Transport(t) => FetchError::Network(t.to_string()),
        })?;
        let advertised = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        let mut reader = response.into_reader();
        let mut file = File::create(dest)?;
        let report = copy_with_progress(&mut reader, &mut file, advertised, cancel, on_progress)?;
        file.sync_all()?;
        Ok(report)
    }
}

/// Copy in fixed chunks, checking `cancel` before each one.
pub(crate) fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    advertised: Option<u64>,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<FetchReport, FetchError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    on_progress(0, advertised);
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // A dropped connection mid-body surfaces as a read error.
            Err(e) => return Err(FetchError::Network(e.to_string())),
        };
        writer.write_all(&buf[..n])?;
        written += n as u64;
        on_progress(written, advertised);
    }
    writer.flush()?;
    Ok(FetchReport {
        bytes_written: written,
        advertised,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_reports_progress() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let report = copy_with_progress(
            &mut Cursor::new(&data),
            &mut out,
            Some(data.len() as u64),
            &CancelToken::new(),
            &mut |done, _| seen.push(done),
        )
        .unwrap();
        assert_eq!(out.len(), data.len());
        assert_eq!(report.bytes_written, data.len() as u64);
        assert!(!report.is_truncated());
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&(data.len() as u64)));
    }

    #[test]
    fn test_truncation_detected() {
        let report = FetchReport {
            bytes_written: 4,
            advertised: Some(10),
        };
        assert!(report.is_truncated());
        let unknown = FetchReport {
            bytes_written: 4,
            advertised: None,
        };
        assert!(!unknown.is_truncated());
    }

    #[test]
    fn test_cancel_stops_copy() {
        let token = CancelToken::new();
        token.cancel();
        let mut out = Vec::new();
        let err = copy_with_progress(
            &mut Cursor::new(vec![1u8; 16]),
            &mut out,
            None,
            &token,
            &mut |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(out.is_empty());
    }
}
