//! Channel multiplexing over a single lower channel (`mux`).
//!
//! Wire format, one frame per message:
//!
//! ```text
//! +-----------+--------+-----------+----------------+
//! | channel   | flags  | length    | payload        |
//! | u16 BE    | u8     | u16 BE    | length bytes   |
//! +-----------+--------+-----------+----------------+
//! ```
//!
//! `SYN` opens a channel, `SYN|ACK` confirms it, `FIN` ends one direction
//! and `RST` refuses or aborts a channel. A frame with no flags carries
//! data. `WND` carries a u32 BE credit: the number of further data bytes
//! the sender may put on that channel. Every channel starts with `window`
//! bytes of credit in each direction. The initiating side allocates odd
//! channel ids, the accepting side even ones. The session closes once its
//! last channel has closed in both directions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::channel::{BoxedChannel, LinkMeta, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{GensioError, ParseError, Result};
use crate::filter::{FilterDriver, Wrapped};

/// Frame header size in bytes.
pub const HEADER_LEN: usize = 5;

/// Open a channel.
pub const FLAG_SYN: u8 = 0x01;
/// Acknowledge an open.
pub const FLAG_ACK: u8 = 0x02;
/// No more data in this direction.
pub const FLAG_FIN: u8 = 0x04;
/// Channel refused or aborted.
pub const FLAG_RST: u8 = 0x08;
/// Grant send credit.
pub const FLAG_WND: u8 = 0x10;

const FLAG_MASK: u8 = FLAG_SYN | FLAG_ACK | FLAG_FIN | FLAG_RST | FLAG_WND;
const MIN_PIPE: usize = 16 * 1024;
const READ_CHUNK: usize = 16 * 1024;
/// Data frames waiting for the lower channel.
const OUT_QUEUE: usize = 64;

/// One mux frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    /// Channel id, never 0.
    pub channel: u16,
    /// Zero for data, otherwise a combination of the `FLAG_*` bits.
    pub flags: u8,
    /// Data bytes, or the credit of a `WND` frame.
    pub payload: Bytes,
}

impl MuxFrame {
    /// A data frame.
    pub fn data(channel: u16, payload: Bytes) -> Self {
        Self {
            channel,
            flags: 0,
            payload,
        }
    }

    /// A control frame without payload.
    pub fn control(channel: u16, flags: u8) -> Self {
        Self {
            channel,
            flags,
            payload: Bytes::new(),
        }
    }

    /// Grants the peer `credit` more bytes on `channel`.
    pub fn window(channel: u16, credit: u32) -> Self {
        Self {
            channel,
            flags: FLAG_WND,
            payload: Bytes::copy_from_slice(&credit.to_be_bytes()),
        }
    }

    /// Appends the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u16(self.channel);
        dst.put_u8(self.flags);
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
    }

    /// Takes one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the frame is
    /// still incomplete.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let channel = u16::from_be_bytes([src[0], src[1]]);
        let flags = src[2];
        let len = u16::from_be_bytes([src[3], src[4]]) as usize;

        if flags & !FLAG_MASK != 0 {
            return Err(GensioError::InvalidFrame {
                reason: format!("unknown mux flags 0x{:02x}", flags),
            });
        }
        if channel == 0 {
            return Err(GensioError::InvalidFrame {
                reason: "mux channel 0 is reserved".to_string(),
            });
        }
        let expected = match flags {
            0 => None,
            FLAG_WND => Some(4),
            _ => Some(0),
        };
        if expected.is_some_and(|want| want != len) {
            return Err(GensioError::InvalidFrame {
                reason: format!("control frame 0x{:02x} carries {} bytes", flags, len),
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Self {
            channel,
            flags,
            payload,
        }))
    }
}

/// Parameters of one `mux` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxParams {
    /// Largest payload per data frame.
    pub chunksize: usize,
    /// Maximum simultaneously open channels.
    pub max_channels: u16,
    /// Per-channel credit, in bytes, granted to the peer up front.
    pub window: usize,
}

impl MuxParams {
    /// Reads `chunksize`, `max_channels` and `window`, falling back to
    /// `config.mux`.
    pub fn from_spec(
        spec: &StageSpec,
        config: &StackConfig,
    ) -> std::result::Result<Self, ParseError> {
        spec.check_keys(&["chunksize", "max_channels", "window"])?;
        let chunksize = spec
            .parse_param::<usize>("chunksize")?
            .unwrap_or(config.mux.chunksize);
        if chunksize == 0 || chunksize > u16::MAX as usize {
            return Err(spec.invalid("chunksize", "must be between 1 and 65535"));
        }
        let max_channels = spec
            .parse_param::<u16>("max_channels")?
            .unwrap_or(config.mux.max_channels);
        if max_channels == 0 {
            return Err(spec.invalid("max_channels", "must be at least 1"));
        }
        let window = spec
            .parse_param::<u32>("window")?
            .unwrap_or(config.mux.window) as usize;
        if window < 2 * chunksize {
            return Err(spec.invalid("window", "must be at least twice the chunksize"));
        }
        Ok(Self {
            chunksize,
            max_channels,
            window,
        })
    }
}

/// The `mux` filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct MuxFilter;

#[async_trait]
impl FilterDriver for MuxFilter {
    fn name(&self) -> &'static str {
        "mux"
    }

    fn validate(&self, spec: &StageSpec) -> std::result::Result<(), ParseError> {
        MuxParams::from_spec(spec, &StackConfig::default()).map(|_| ())
    }

    async fn wrap(
        &self,
        spec: &StageSpec,
        link: RawLink,
        role: Role,
        config: &StackConfig,
    ) -> Result<Wrapped> {
        let params = MuxParams::from_spec(spec, config)?;
        let (channel, meta) = link.take_channel();
        match role {
            Role::Connect => {
                let session = MuxSession::start(channel, meta, params, role, None, config);
                let first = session.open_channel().await?;
                Ok(Wrapped::Single(first))
            }
            Role::Accept => {
                let (tx, rx) = mpsc::channel(config.accept_queue_depth.max(1));
                MuxSession::start(channel, meta, params, role, Some(tx), config);
                Ok(Wrapped::Fanout(rx))
            }
        }
    }

    fn is_fanout(&self) -> bool {
        true
    }
}

struct ChannelEntry {
    /// Dropped once the peer has finished sending on this channel.
    deliver: Option<mpsc::UnboundedSender<Bytes>>,
    /// Bytes the peer may still send before it needs fresh credit.
    recv_window: usize,
    /// Credit for our own sends. Closed when the peer resets the channel.
    send_window: Arc<Semaphore>,
    /// Stops this channel's pump and delivery tasks.
    cancel: CancellationToken,
}

impl ChannelEntry {
    fn reset(&mut self) {
        self.deliver = None;
        self.send_window.close();
    }
}

struct SessionState {
    /// Open channels, including those still waiting for the peer's ack.
    channels: HashMap<u16, ChannelEntry>,
    pending: HashMap<u16, oneshot::Sender<Result<()>>>,
    next_id: u16,
    opened_any: bool,
}

impl SessionState {
    fn alloc_id(&mut self) -> Option<u16> {
        for _ in 0..=u16::MAX / 2 {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(2);
            if id != 0 && !self.channels.contains_key(&id) && !self.pending.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}

/// One multiplexed connection and its channels.
///
/// Owned jointly by its background tasks and by every channel link it has
/// produced. Background tasks stop when the session is
/// cancelled: the lower channel hit end-of-stream, a protocol error was
/// seen, or the last channel closed.
///
/// Outbound data waits on a bounded queue and on the peer's per-channel
/// credit, so a channel nobody reads stalls its writer instead of growing
/// buffers. Control frames use their own queue and never block the reader.
pub struct MuxSession {
    role: Role,
    params: MuxParams,
    handshake_timeout: std::time::Duration,
    handshake_timeout_ms: u64,
    meta: LinkMeta,
    state: Mutex<SessionState>,
    control_tx: mpsc::UnboundedSender<MuxFrame>,
    data_tx: mpsc::Sender<MuxFrame>,
    /// Channels the peer opened, on the initiating side only. The accepting
    /// side hands them to the accepter instead.
    incoming: Option<tokio::sync::Mutex<mpsc::Receiver<RawLink>>>,
    cancel: CancellationToken,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl std::fmt::Debug for MuxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxSession")
            .field("role", &self.role)
            .field("raddr", &self.meta.raddr)
            .field("params", &self.params)
            .field("channels", &self.channel_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MuxSession {
    fn start(
        channel: BoxedChannel,
        mut meta: LinkMeta,
        params: MuxParams,
        role: Role,
        incoming: Option<mpsc::Sender<RawLink>>,
        config: &StackConfig,
    ) -> Arc<Self> {
        meta.mux = None;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(OUT_QUEUE);
        let (incoming_tx, incoming_rx) = match incoming {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(config.accept_queue_depth.max(1));
                (tx, Some(tokio::sync::Mutex::new(rx)))
            }
        };
        let session = Arc::new(Self {
            role,
            params,
            handshake_timeout: config.handshake_timeout(),
            handshake_timeout_ms: config.handshake_timeout_ms,
            meta,
            state: Mutex::new(SessionState {
                channels: HashMap::new(),
                pending: HashMap::new(),
                next_id: if role == Role::Connect { 1 } else { 2 },
                opened_any: false,
            }),
            control_tx,
            data_tx,
            incoming: incoming_rx,
            cancel: CancellationToken::new(),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        });

        let (rd, wr) = tokio::io::split(channel);
        tokio::spawn(Arc::clone(&session).read_loop(rd, incoming_tx));
        tokio::spawn(Arc::clone(&session).write_loop(wr, control_rx, data_rx));
        tracing::debug!(
            raddr = %session.meta.raddr,
            ?role,
            chunksize = params.chunksize,
            window = params.window,
            "mux session started"
        );
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_control(&self, frame: MuxFrame) -> Result<()> {
        self.control_tx.send(frame).map_err(|_| GensioError::Closed)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn send_data(&self, frame: MuxFrame, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(GensioError::Closed),
            sent = self.data_tx.send(frame) => sent.map_err(|_| GensioError::Closed)?,
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of channels currently open.
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// True once the session has ended.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The side of the lower link this session runs on.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The stage parameters in force.
    pub fn params(&self) -> MuxParams {
        self.params
    }

    /// Frames queued for the lower channel so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames decoded from the lower channel so far.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Tears the session down, ending every channel.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Opens a new channel to the peer and waits for it to be accepted.
    ///
    /// A refused or timed out open leaves no trace in the session.
    pub async fn open_channel(self: &Arc<Self>) -> Result<RawLink> {
        let (id, ack_rx, app) = {
            let mut state = self.lock();
            if self.cancel.is_cancelled() {
                return Err(GensioError::Closed);
            }
            if state.channels.len() >= self.params.max_channels as usize {
                return Err(GensioError::Connection {
                    addr: self.meta.raddr.clone(),
                    reason: format!("mux channel limit ({}) reached", self.params.max_channels),
                });
            }
            let id = state.alloc_id().ok_or_else(|| GensioError::Connection {
                addr: self.meta.raddr.clone(),
                reason: "no free mux channel ids".to_string(),
            })?;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            let app = self.attach_channel(&mut state, id);
            (id, rx, app)
        };

        if let Err(e) = self.send_control(MuxFrame::control(id, FLAG_SYN)) {
            self.abandon_channel(id);
            return Err(e);
        }

        let err = match tokio::time::timeout(self.handshake_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(channel = id, "mux channel opened");
                return Ok(self.link(app));
            }
            Ok(Ok(Err(e))) => e,
            Ok(Err(_)) => GensioError::Closed,
            Err(_) => {
                let _ = self.send_control(MuxFrame::control(id, FLAG_RST));
                GensioError::Timeout {
                    what: format!("mux channel {} open", id),
                    timeout_ms: self.handshake_timeout_ms,
                }
            }
        };
        self.abandon_channel(id);
        Err(err)
    }

    /// Waits for the next channel opened by the peer.
    pub async fn accept_channel(&self) -> Result<RawLink> {
        let Some(incoming) = &self.incoming else {
            return Err(GensioError::NotSupported(
                "accepting mux channels outside the accepter".to_string(),
            ));
        };
        let mut incoming = incoming.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(GensioError::Closed),
            link = incoming.recv() => link.ok_or(GensioError::Closed),
        }
    }

    fn link(self: &Arc<Self>, app: DuplexStream) -> RawLink {
        let mut link = self.meta.clone().attach("mux", Box::new(app));
        link.mux = Some(Arc::clone(self));
        link
    }

    /// Registers channel `id` and starts its pump and delivery halves.
    fn attach_channel(self: &Arc<Self>, state: &mut SessionState, id: u16) -> DuplexStream {
        let (app, inner) = tokio::io::duplex(self.params.chunksize.max(MIN_PIPE));
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        let window = Arc::new(Semaphore::new(self.params.window));
        let cancel = self.cancel.child_token();
        state.channels.insert(
            id,
            ChannelEntry {
                deliver: Some(deliver_tx),
                recv_window: self.params.window,
                send_window: Arc::clone(&window),
                cancel: cancel.clone(),
            },
        );
        state.opened_any = true;

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let (rd, wr) = tokio::io::split(inner);
            tokio::join!(
                session.pump(id, rd, &window, &cancel),
                session.deliver(id, wr, deliver_rx, &cancel),
            );
            session.channel_finished(id, &window);
        });
        app
    }

    /// Drops channel `id` and stops its tasks.
    fn abandon_channel(&self, id: u16) {
        let entry = {
            let mut state = self.lock();
            state.pending.remove(&id);
            state.channels.remove(&id)
        };
        if let Some(mut entry) = entry {
            entry.reset();
            entry.cancel.cancel();
            self.channel_finished(id, &entry.send_window);
        }
    }

    /// Moves bytes the application wrote into data frames.
    async fn pump(
        &self,
        id: u16,
        mut rd: ReadHalf<DuplexStream>,
        window: &Semaphore,
        cancel: &CancellationToken,
    ) {
        let mut buf = vec![0u8; self.params.chunksize];
        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => return,
                r = rd.read(&mut buf) => r.unwrap_or(0),
            };
            if n == 0 {
                let _ = self.send_data(MuxFrame::control(id, FLAG_FIN), cancel).await;
                return;
            }
            let credit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = window.acquire_many(n as u32) => permit,
            };
            match credit {
                Ok(permit) => permit.forget(),
                Err(_) => return,
            }
            let frame = MuxFrame::data(id, Bytes::copy_from_slice(&buf[..n]));
            if self.send_data(frame, cancel).await.is_err() {
                return;
            }
        }
    }

    /// Hands payloads received for one channel to the application and
    /// returns credit to the peer as they are consumed.
    async fn deliver(
        &self,
        id: u16,
        mut wr: WriteHalf<DuplexStream>,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        cancel: &CancellationToken,
    ) {
        let batch = (self.params.window / 4).max(1);
        let mut consumed = 0usize;
        loop {
            // Payloads already queued are delivered before a cancel is seen.
            let data = tokio::select! {
                biased;
                d = rx.recv() => d,
                _ = cancel.cancelled() => None,
            };
            let Some(data) = data else {
                let _ = wr.shutdown().await;
                return;
            };
            let written = tokio::select! {
                biased;
                r = wr.write_all(&data) => r,
                _ = cancel.cancelled() => return,
            };
            if written.is_err() {
                return;
            }
            consumed += data.len();
            if consumed >= batch || rx.is_empty() {
                self.grant(id, consumed);
                consumed = 0;
            }
        }
    }

    fn grant(&self, id: u16, credit: usize) {
        if let Some(entry) = self.lock().channels.get_mut(&id) {
            entry.recv_window += credit;
        } else {
            return;
        }
        let _ = self.send_control(MuxFrame::window(id, credit as u32));
    }

    fn channel_finished(&self, id: u16, window: &Arc<Semaphore>) {
        let close = {
            let mut state = self.lock();
            let current = state
                .channels
                .get(&id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.send_window, window));
            if current {
                state.channels.remove(&id);
            }
            state.opened_any && state.channels.is_empty() && state.pending.is_empty()
        };
        tracing::debug!(channel = id, "mux channel closed");
        if close && !self.cancel.is_cancelled() {
            tracing::debug!(raddr = %self.meta.raddr, "last mux channel closed, ending session");
            self.cancel.cancel();
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut rd: ReadHalf<BoxedChannel>,
        incoming: mpsc::Sender<RawLink>,
    ) {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        'session: loop {
            loop {
                match MuxFrame::decode(&mut buf) {
                    Ok(Some(frame)) => {
                        self.frames_received.fetch_add(1, Ordering::Relaxed);
                        self.dispatch(frame, &incoming);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(raddr = %self.meta.raddr, error = %e, "mux protocol error");
                        break 'session;
                    }
                }
            }
            buf.reserve(READ_CHUNK);
            let read = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = rd.read_buf(&mut buf) => r,
            };
            match read {
                Ok(0) => {
                    tracing::debug!(raddr = %self.meta.raddr, "mux lower channel closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(raddr = %self.meta.raddr, error = %e, "mux read failed");
                    break;
                }
            }
        }

        {
            let mut state = self.lock();
            for entry in state.channels.values_mut() {
                entry.reset();
            }
            state.pending.clear();
        }
        self.cancel.cancel();
        // Queued links hold the session; release them.
        if let Some(queue) = &self.incoming {
            if let Ok(mut queue) = queue.try_lock() {
                queue.close();
                while queue.try_recv().is_ok() {}
            }
        }
    }

    /// Applies one inbound frame. Never waits, so a stalled channel or a
    /// full accept queue cannot hold up the others.
    fn dispatch(self: &Arc<Self>, frame: MuxFrame, incoming: &mpsc::Sender<RawLink>) {
        let id = frame.channel;
        match frame.flags {
            0 => self.on_data(id, frame.payload),
            FLAG_SYN => self.on_syn(id, incoming),
            f if f == FLAG_SYN | FLAG_ACK => {
                if let Some(tx) = self.lock().pending.remove(&id) {
                    let _ = tx.send(Ok(()));
                }
            }
            FLAG_FIN => {
                if let Some(entry) = self.lock().channels.get_mut(&id) {
                    entry.deliver = None;
                }
            }
            FLAG_RST => {
                let mut state = self.lock();
                if let Some(tx) = state.pending.remove(&id) {
                    let _ = tx.send(Err(GensioError::Connection {
                        addr: self.meta.raddr.clone(),
                        reason: format!("peer refused mux channel {}", id),
                    }));
                }
                if let Some(entry) = state.channels.get_mut(&id) {
                    entry.reset();
                }
            }
            FLAG_WND => {
                let Ok(credit) = <[u8; 4]>::try_from(frame.payload.as_ref()) else {
                    return;
                };
                let credit = u32::from_be_bytes(credit) as usize;
                if let Some(entry) = self.lock().channels.get(&id) {
                    let room = Semaphore::MAX_PERMITS - entry.send_window.available_permits();
                    entry.send_window.add_permits(credit.min(room));
                }
            }
            other => {
                tracing::debug!(channel = id, flags = other, "unexpected mux control frame");
            }
        }
    }

    fn on_data(&self, id: u16, payload: Bytes) {
        let mut state = self.lock();
        let Some(entry) = state.channels.get_mut(&id) else {
            tracing::debug!(channel = id, "data for unknown mux channel dropped");
            return;
        };
        if payload.len() > entry.recv_window {
            tracing::warn!(channel = id, "peer overran the mux channel window, resetting");
            entry.reset();
            drop(state);
            let _ = self.send_control(MuxFrame::control(id, FLAG_RST));
            return;
        }
        entry.recv_window -= payload.len();
        if let Some(deliver) = &entry.deliver {
            let _ = deliver.send(payload);
        }
    }

    fn on_syn(self: &Arc<Self>, id: u16, incoming: &mpsc::Sender<RawLink>) {
        let accepted = {
            let mut state = self.lock();
            if state.channels.contains_key(&id)
                || state.channels.len() >= self.params.max_channels as usize
            {
                None
            } else {
                match incoming.try_reserve() {
                    Ok(permit) => Some((permit, self.attach_channel(&mut state, id))),
                    Err(_) => None,
                }
            }
        };
        let Some((permit, app)) = accepted else {
            tracing::debug!(channel = id, "refusing mux channel");
            let _ = self.send_control(MuxFrame::control(id, FLAG_RST));
            return;
        };
        if self
            .send_control(MuxFrame::control(id, FLAG_SYN | FLAG_ACK))
            .is_err()
        {
            return;
        }
        tracing::debug!(channel = id, "mux channel accepted");
        permit.send(self.link(app));
    }

    async fn write_loop(
        self: Arc<Self>,
        mut wr: WriteHalf<BoxedChannel>,
        mut control: mpsc::UnboundedReceiver<MuxFrame>,
        mut data: mpsc::Receiver<MuxFrame>,
    ) {
        let mut buf = BytesMut::new();
        loop {
            let frame = tokio::select! {
                biased;
                f = control.recv() => f,
                f = data.recv() => f,
                _ = self.cancel.cancelled() => control.try_recv().or_else(|_| data.try_recv()).ok(),
            };
            let Some(frame) = frame else { break };
            buf.clear();
            frame.encode(&mut buf);
            let written = match wr.write_all(&buf).await {
                Ok(()) => wr.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(raddr = %self.meta.raddr, error = %e, "mux write failed");
                break;
            }
        }
        let _ = wr.shutdown().await;
        self.cancel.cancel();
    }
}
