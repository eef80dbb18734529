//! Data-transfer engine for exercising established gensios.
//!
//! Every transfer writes a payload and verifies, byte for byte, that the
//! same bytes come back out, tolerating reads of any size. An I/O error
//! aborts the transfer and leaves the gensio that hit it closed.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GensioError, Result};
use crate::gensio::Gensio;

const READ_CHUNK: usize = 8192;

/// What a completed transfer moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes verified, summed over both directions for a roundtrip.
    pub bytes: u64,
    /// Read calls that returned data.
    pub reads: u64,
    /// Wall time from the first write to the last verified byte.
    pub elapsed: Duration,
}

/// Runs transfers bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    timeout: Duration,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TransferEngine {
    /// An engine that gives up on any transfer after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The per-transfer time limit.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GensioError::Timeout {
                what: what.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
    }

    /// Writes `payload` to `io` and reads it back from the same gensio.
    ///
    /// Reading runs concurrently with writing so payloads larger than the
    /// stack's buffering cannot stall.
    pub async fn loopback(&self, io: &mut Gensio, payload: &[u8]) -> Result<TransferReport> {
        let start = Instant::now();
        let result = {
            let (mut rd, mut wr) = tokio::io::split(&mut *io);
            self.bounded("loopback transfer", async {
                let (written, reads) =
                    tokio::join!(send_all(&mut wr, payload), expect(&mut rd, payload));
                written?;
                reads
            })
            .await
        };
        let reads = io.closed_on_io_error(result)?;
        Ok(report(payload.len(), reads, start))
    }

    /// Writes `payload` into `writer` and verifies it arrives at `reader`.
    pub async fn oneway(
        &self,
        writer: &mut Gensio,
        reader: &mut Gensio,
        payload: &[u8],
    ) -> Result<TransferReport> {
        let start = Instant::now();
        let (written, reads) = self
            .bounded("oneway transfer", async {
                Ok(tokio::join!(
                    send_all(&mut *writer, payload),
                    expect(&mut *reader, payload)
                ))
            })
            .await?;
        let written = writer.closed_on_io_error(written);
        let reads = reader.closed_on_io_error(reads);
        written?;
        let reads = reads?;
        Ok(report(payload.len(), reads, start))
    }

    /// Sends `payload` in both directions between `a` and `b` at once.
    pub async fn roundtrip(
        &self,
        a: &mut Gensio,
        b: &mut Gensio,
        payload: &[u8],
    ) -> Result<TransferReport> {
        let start = Instant::now();
        let (a_side, b_side) = {
            let (mut a_rd, mut a_wr) = tokio::io::split(&mut *a);
            let (mut b_rd, mut b_wr) = tokio::io::split(&mut *b);
            self.bounded("roundtrip transfer", async {
                let (a_sent, b_sent, at_b, at_a) = tokio::join!(
                    send_all(&mut a_wr, payload),
                    send_all(&mut b_wr, payload),
                    expect(&mut b_rd, payload),
                    expect(&mut a_rd, payload),
                );
                Ok((a_sent.and(at_a), b_sent.and(at_b)))
            })
            .await?
        };
        let at_a = a.closed_on_io_error(a_side);
        let at_b = b.closed_on_io_error(b_side);
        Ok(report(payload.len() * 2, at_a? + at_b?, start))
    }

    /// Reflects everything read from `io` back to it until end of stream,
    /// then closes the write side. Returns the number of bytes echoed.
    pub async fn echo(&self, io: &mut Gensio) -> Result<u64> {
        let result = self
            .bounded("echo", async {
                let mut total = 0u64;
                while let Some(data) = io.read(READ_CHUNK).await?.into_data() {
                    io.write(&data).await?;
                    total += data.len() as u64;
                }
                io.close_write().await?;
                Ok(total)
            })
            .await;
        io.closed_on_io_error(result)
    }
}

fn report(bytes: usize, reads: u64, start: Instant) -> TransferReport {
    TransferReport {
        bytes: bytes as u64,
        reads,
        elapsed: start.elapsed(),
    }
}

async fn send_all<W: AsyncWrite + Unpin>(wr: &mut W, payload: &[u8]) -> Result<()> {
    wr.write_all(payload).await?;
    wr.flush().await?;
    Ok(())
}

/// Reads exactly `expected.len()` bytes, failing at the first difference.
async fn expect<R: AsyncRead + Unpin>(rd: &mut R, expected: &[u8]) -> Result<u64> {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut offset = 0;
    let mut reads = 0;
    while offset < expected.len() {
        let want = (expected.len() - offset).min(buf.len());
        let n = rd.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(GensioError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of {} bytes", offset, expected.len()),
            )));
        }
        reads += 1;
        if let Some(i) = (0..n).find(|&i| buf[i] != expected[offset + i]) {
            return Err(GensioError::TransferMismatch {
                offset: offset + i,
                expected: expected[offset + i],
                got: buf[i],
            });
        }
        offset += n;
    }
    Ok(reads)
}
