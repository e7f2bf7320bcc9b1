//! Fixed-window rate-limited copy between async streams
//!
//! Throughput is capped per one-second window: once a window's quota has been
//! written the relay sleeps out the rest of the window and starts a fresh one
//! with a full quota. Unused quota is dropped at the window boundary, so a
//! transfer can burst by up to one chunk across two adjacent windows. This is
//! not a token bucket and must not be turned into one; timing-based callers
//! depend on the window behaviour.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Instant};

/// Read/write chunk size.
pub const RELAY_CHUNK_SIZE: usize = 32 * 1024;

/// Length of one quota window.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(1);

/// A relay that stopped on a read or write failure.
#[derive(Debug, Error)]
#[error("relay aborted after {copied} bytes: {source}")]
pub struct RelayError {
    /// Bytes written to the destination before the failure
    pub copied: u64,
    #[source]
    pub source: io::Error,
}

/// Copy `src` into `dst` at no more than `bytes_per_sec` (0 = unlimited).
///
/// Returns the byte count on clean end-of-stream. Any read or write error
/// aborts immediately and is returned along with the partial count; nothing
/// is retried.
pub async fn relay<W, R>(dst: &mut W, src: &mut R, bytes_per_sec: u64) -> Result<u64, RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    RateLimitedRelay::new(bytes_per_sec).copy(dst, src).await
}

/// Stateful form of [`relay`]. The running byte count stays readable through
/// [`RateLimitedRelay::copied`] even if the copy future is dropped midway.
#[derive(Debug)]
pub struct RateLimitedRelay {
    bytes_per_sec: u64,
    copied: u64,
}

impl RateLimitedRelay {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            copied: 0,
        }
    }

    pub fn copied(&self) -> u64 {
        self.copied
    }

    pub async fn copy<W, R>(&mut self, dst: &mut W, src: &mut R) -> Result<u64, RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; RELAY_CHUNK_SIZE];

        if self.bytes_per_sec == 0 {
            loop {
                if !self.transfer_chunk(dst, src, &mut buf).await? {
                    return self.finish(dst).await;
                }
            }
        }

        loop {
            let window_start = Instant::now();
            let mut remaining = self.bytes_per_sec;

            while remaining > 0 {
                let to_read = remaining.min(RELAY_CHUNK_SIZE as u64) as usize;
                let before = self.copied;
                if !self.transfer_chunk(dst, src, &mut buf[..to_read]).await? {
                    return self.finish(dst).await;
                }
                remaining -= self.copied - before;
            }

            self.flush(dst).await?;

            let elapsed = window_start.elapsed();
            if elapsed < QUOTA_WINDOW {
                sleep(QUOTA_WINDOW - elapsed).await;
            }
        }
    }

    /// Move one chunk. `Ok(false)` means the source is exhausted.
    async fn transfer_chunk<W, R>(
        &mut self,
        dst: &mut W,
        src: &mut R,
        buf: &mut [u8],
    ) -> Result<bool, RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        R: AsyncRead + Unpin + ?Sized,
    {
        let n = src.read(buf).await.map_err(|e| self.fail(e))?;
        if n == 0 {
            return Ok(false);
        }

        // Count each accepted write so a failure mid-chunk reports what the
        // destination really received.
        let mut written = 0;
        while written < n {
            let wn = dst.write(&buf[written..n]).await.map_err(|e| self.fail(e))?;
            if wn == 0 {
                return Err(self.fail(io::ErrorKind::WriteZero.into()));
            }
            written += wn;
            self.copied += wn as u64;
        }
        Ok(true)
    }

    async fn flush<W>(&self, dst: &mut W) -> Result<(), RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        dst.flush().await.map_err(|e| self.fail(e))
    }

    async fn finish<W>(&self, dst: &mut W) -> Result<u64, RelayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.flush(dst).await?;
        Ok(self.copied)
    }

    fn fail(&self, source: io::Error) -> RelayError {
        RelayError {
            copied: self.copied,
            source,
        }
    }
}
