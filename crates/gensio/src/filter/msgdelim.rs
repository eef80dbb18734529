//! Message delimiting over a byte stream (`msgdelim`).
//!
//! Each write becomes one message framed as
//!
//! ```text
//! FE 01 <stuffed payload> [<stuffed crc32 BE>] FE 02
//! ```
//!
//! where a literal `FE` inside the payload or CRC is sent as `FE FE`. The
//! reader skips noise outside a frame and drops frames whose CRC does not
//! match. A single read never returns bytes from two different messages.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::channel::RawLink;
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{ParseError, Result};
use crate::filter::{FilterDriver, Wrapped};

const ESC: u8 = 0xfe;
const START: u8 = 0x01;
const END: u8 = 0x02;
const CRC_LEN: usize = 4;
const READ_CHUNK: usize = 4096;

/// Default upper bound on a message payload.
pub const DEFAULT_MAX_MESSAGE: usize = 65536;

/// The `msgdelim` filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgDelimFilter;

/// Parameters of one `msgdelim` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgDelimParams {
    /// Append and verify a CRC-32 per message.
    pub crc: bool,
    /// Largest decoded message accepted, from `readbuf`.
    pub max_message: usize,
}

impl Default for MsgDelimParams {
    fn default() -> Self {
        Self {
            crc: true,
            max_message: DEFAULT_MAX_MESSAGE,
        }
    }
}

impl MsgDelimParams {
    /// Reads `crc` and `readbuf`.
    pub fn from_spec(spec: &StageSpec) -> std::result::Result<Self, ParseError> {
        spec.check_keys(&["crc", "readbuf"])?;
        let crc = if spec.has_param("crc") {
            spec.flag("crc")?
        } else {
            true
        };
        let max_message = spec
            .parse_param::<usize>("readbuf")?
            .unwrap_or(DEFAULT_MAX_MESSAGE);
        if max_message == 0 {
            return Err(spec.invalid("readbuf", "must be at least 1"));
        }
        Ok(Self { crc, max_message })
    }
}

#[async_trait]
impl FilterDriver for MsgDelimFilter {
    fn name(&self) -> &'static str {
        "msgdelim"
    }

    fn validate(&self, spec: &StageSpec) -> std::result::Result<(), ParseError> {
        MsgDelimParams::from_spec(spec).map(|_| ())
    }

    async fn wrap(
        &self,
        spec: &StageSpec,
        link: RawLink,
        _role: Role,
        _config: &StackConfig,
    ) -> Result<Wrapped> {
        let params = MsgDelimParams::from_spec(spec)?;
        let (channel, mut meta) = link.take_channel();
        meta.is_packet = true;
        Ok(Wrapped::Single(
            meta.attach("msgdelim", Box::new(MsgDelimChannel::new(channel, params))),
        ))
    }
}

/// Appends the framed form of `payload` to `dst`.
pub fn encode_message(payload: &[u8], crc: bool, dst: &mut BytesMut) {
    fn put_stuffed(dst: &mut BytesMut, bytes: &[u8]) {
        for &b in bytes {
            if b == ESC {
                dst.put_u8(ESC);
            }
            dst.put_u8(b);
        }
    }

    dst.reserve(payload.len() + CRC_LEN + 4);
    dst.put_slice(&[ESC, START]);
    put_stuffed(dst, payload);
    if crc {
        put_stuffed(dst, &crc32fast::hash(payload).to_be_bytes());
    }
    dst.put_slice(&[ESC, END]);
}

/// Incremental frame decoder.
#[derive(Debug)]
struct Decoder {
    crc: bool,
    max_message: usize,
    in_message: bool,
    escape: bool,
    message: BytesMut,
    dropped: u64,
}

impl Decoder {
    fn new(params: MsgDelimParams) -> Self {
        Self {
            crc: params.crc,
            max_message: params.max_message,
            in_message: false,
            escape: false,
            message: BytesMut::new(),
            dropped: 0,
        }
    }

    fn limit(&self) -> usize {
        self.max_message + if self.crc { CRC_LEN } else { 0 }
    }

    /// Consumes bytes from `src` until one message is complete.
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        let mut consumed = 0;
        let mut result = Ok(None);
        for &b in src.iter() {
            consumed += 1;
            match self.step(b) {
                Ok(None) => {}
                done => {
                    result = done;
                    break;
                }
            }
        }
        let _ = src.split_to(consumed);
        result
    }

    fn step(&mut self, b: u8) -> io::Result<Option<Bytes>> {
        if !self.escape {
            if b == ESC {
                self.escape = true;
            } else if self.in_message {
                self.push(b)?;
            }
            return Ok(None);
        }

        self.escape = false;
        match b {
            START => {
                if self.in_message {
                    tracing::debug!("msgdelim restart inside message");
                    self.dropped += 1;
                }
                self.in_message = true;
                self.message.clear();
                Ok(None)
            }
            END if self.in_message => {
                self.in_message = false;
                Ok(self.finish())
            }
            ESC if self.in_message => self.push(ESC).map(|_| None),
            END | ESC => Ok(None),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("msgdelim: bad escape 0x{:02x}", other),
            )),
        }
    }

    fn push(&mut self, b: u8) -> io::Result<()> {
        if self.message.len() >= self.limit() {
            self.in_message = false;
            self.message.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("msgdelim: message exceeds {} bytes", self.max_message),
            ));
        }
        self.message.put_u8(b);
        Ok(())
    }

    fn finish(&mut self) -> Option<Bytes> {
        let mut message = self.message.split();
        if !self.crc {
            return Some(message.freeze());
        }
        if message.len() < CRC_LEN {
            tracing::warn!(len = message.len(), "msgdelim frame too short for CRC, dropped");
            self.dropped += 1;
            return None;
        }
        let trailer = message.split_off(message.len() - CRC_LEN);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(&message) != expected {
            tracing::warn!(len = message.len(), "msgdelim CRC mismatch, message dropped");
            self.dropped += 1;
            return None;
        }
        Some(message.freeze())
    }
}

/// Packet channel over a byte channel `T`.
pub struct MsgDelimChannel<T> {
    inner: T,
    crc: bool,
    max_message: usize,
    decoder: Decoder,
    inbuf: BytesMut,
    current: Bytes,
    outbuf: BytesMut,
    eof: bool,
}

impl<T> MsgDelimChannel<T> {
    /// Frames messages over `inner`.
    pub fn new(inner: T, params: MsgDelimParams) -> Self {
        Self {
            inner,
            crc: params.crc,
            max_message: params.max_message,
            decoder: Decoder::new(params),
            inbuf: BytesMut::new(),
            current: Bytes::new(),
            outbuf: BytesMut::new(),
            eof: false,
        }
    }

    /// Frames discarded for a bad CRC or a truncated start.
    pub fn dropped(&self) -> u64 {
        self.decoder.dropped
    }
}

impl<T: AsyncWrite + Unpin> MsgDelimChannel<T> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.outbuf.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.outbuf))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            let _ = self.outbuf.split_to(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for MsgDelimChannel<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = buf.remaining().min(this.current.len());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if let Some(message) = this.decoder.decode(&mut this.inbuf)? {
                this.current = message;
                continue;
            }
            if this.eof {
                if this.decoder.in_message {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "msgdelim: stream ended inside a message",
                    )));
                }
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut rb = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
            if rb.filled().is_empty() {
                this.eof = true;
            } else {
                this.inbuf.extend_from_slice(rb.filled());
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for MsgDelimChannel<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if data.len() > this.max_message {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "msgdelim: {} byte message exceeds {}",
                    data.len(),
                    this.max_message
                ),
            )));
        }
        encode_message(data, this.crc, &mut this.outbuf);
        // Partial progress is fine; flush finishes the frame.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
