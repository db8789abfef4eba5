// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The connection engine. An upgraded stream is split into a read half and a write half, each
//! owned by its own task. Received frames are delivered through a bounded inbox and frames to
//! send are queued on a bounded outbox.


use crate::codec::FrameCodec;
use crate::config::WebSocketConfig;
use crate::errors::{ConnectionClosed, ProtocolError, SendError, WriteError};
use crate::pool::FramePool;
use crate::protocol::frame::CONTROL_MAX_SIZE;
use crate::protocol::{CloseCode, Frame, HeaderFlags, OpCode, Role};
use bytes::BytesMut;
use futures::future::join;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{event, Level};

const RECEIVED_FRAME: &str = "Received frame.";
const SENT_FRAME: &str = "Sent frame.";
const STATE_CHANGED: &str = "Connection state changed.";
const PEER_DISCONNECTED: &str = "The peer closed the connection.";
const READ_FAILED: &str = "Reading from the connection failed.";
const PROTOCOL_VIOLATION: &str = "The peer violated the WebSocket protocol.";
const WRITE_FAILED: &str = "Writing to the connection failed.";
const CLOSE_TIMED_OUT: &str = "The peer did not close the connection in time.";
const READER_STOPPED: &str = "Connection read task stopped.";
const WRITER_STOPPED: &str = "Connection write task stopped.";
const JOIN_FAILED: &str = "A connection task failed to complete.";
const SHUTDOWN_FAILED: &str = "Shutting down the transport failed.";

/// The lifecycle of a connection. Transitions only ever move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LifecycleState {
    fn from_u8(n: u8) -> LifecycleState {
        match n {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Open => f.write_str("Open"),
            LifecycleState::Closing => f.write_str("Closing"),
            LifecycleState::Closed => f.write_str("Closed"),
        }
    }
}

/// State shared between the tasks of a connection and its handles.
#[derive(Debug)]
struct Shared {
    role: Role,
    state: AtomicU8,
    close_queued: AtomicBool,
    close_sent: AtomicBool,
    reader_done: AtomicBool,
    cancel: CancellationToken,
    pool: FramePool,
}

impl Shared {
    fn new(role: Role, pool: FramePool) -> Shared {
        Shared {
            role,
            state: AtomicU8::new(LifecycleState::Open as u8),
            close_queued: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
            reader_done: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            pool,
        }
    }

    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves from Open to Closing. Has no effect in any other state.
    fn start_closing(&self) {
        let result = self.state.compare_exchange(
            LifecycleState::Open as u8,
            LifecycleState::Closing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if result.is_ok() {
            event!(Level::DEBUG, STATE_CHANGED, state = %LifecycleState::Closing);
        }
    }

    fn set_closed(&self) {
        let previous = self
            .state
            .swap(LifecycleState::Closed as u8, Ordering::SeqCst);
        if previous != LifecycleState::Closed as u8 {
            event!(Level::DEBUG, STATE_CHANGED, state = %LifecycleState::Closed);
        }
    }
}

/// A handle to a connection that enqueues frames for the write task. Handles may be freely
/// cloned and shared between tasks.
#[derive(Debug, Clone)]
pub struct Connection {
    outbox: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl Connection {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    /// Enqueues a text frame, waiting if the outbox is full. Returns the number of payload bytes
    /// accepted.
    pub async fn write(&self, payload: &[u8]) -> Result<usize, ConnectionClosed> {
        self.send(OpCode::Text, payload).await
    }

    /// Enqueues a binary frame, waiting if the outbox is full. Returns the number of payload
    /// bytes accepted.
    pub async fn write_binary(&self, payload: &[u8]) -> Result<usize, ConnectionClosed> {
        self.send(OpCode::Binary, payload).await
    }

    pub async fn ping(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_control(OpCode::Ping, payload).await
    }

    pub async fn pong(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_control(OpCode::Pong, payload).await
    }

    /// Starts the closing handshake with a normal closure status.
    pub async fn close(&self) -> Result<(), ConnectionClosed> {
        self.close_with(CloseCode::Normal.code()).await
    }

    /// Starts (or completes) the closing handshake with the provided status. Only the first call
    /// for a connection enqueues a close frame; subsequent calls do nothing.
    pub async fn close_with(&self, code: u16) -> Result<(), ConnectionClosed> {
        let Connection { outbox, shared } = self;
        if shared.close_queued.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        shared.start_closing();

        let mut frame = shared.pool.acquire();
        frame.set_close(code);
        outbox.send(frame).await.map_err(|_| ConnectionClosed)
    }

    async fn send_control(&self, opcode: OpCode, payload: &[u8]) -> Result<(), SendError> {
        if payload.len() > CONTROL_MAX_SIZE {
            return Err(SendError::ControlTooLarge(payload.len()));
        }
        self.send(opcode, payload).await?;
        Ok(())
    }

    async fn send(&self, opcode: OpCode, payload: &[u8]) -> Result<usize, ConnectionClosed> {
        let Connection { outbox, shared } = self;
        if shared.state() != LifecycleState::Open {
            return Err(ConnectionClosed);
        }

        let mut frame = shared.pool.acquire();
        frame.set(opcode, payload);
        outbox.send(frame).await.map_err(|_| ConnectionClosed)?;
        Ok(payload.len())
    }
}

/// The owner of a running connection: receives inbound frames and shuts the connection down.
#[derive(Debug)]
pub struct ConnectionTask<S> {
    connection: Connection,
    inbox: mpsc::Receiver<Frame>,
    reader: JoinHandle<ReadHalf<S>>,
    writer: JoinHandle<WriteHalf<S>>,
    _cancel_on_drop: DropGuard,
}

impl<S> ConnectionTask<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Starts the read and write tasks for an upgraded stream.
    ///
    /// # Arguments
    /// * `stream` - The upgraded stream.
    /// * `prefix` - Bytes that have already been read from the stream (after the end of the
    ///   handshake).
    /// * `role` - The role of this endpoint.
    /// * `config` - Configuration for the connection.
    /// * `pool` - Pool to draw frames from and to return them to.
    pub fn spawn(
        stream: S,
        prefix: BytesMut,
        role: Role,
        config: WebSocketConfig,
        pool: FramePool,
    ) -> ConnectionTask<S> {
        let WebSocketConfig {
            inbox_capacity,
            outbox_capacity,
            max_payload_size,
            close_timeout,
            ..
        } = config;

        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity.get());
        let (outbox_tx, outbox_rx) = mpsc::channel(outbox_capacity.get());
        let shared = Arc::new(Shared::new(role, pool));
        let codec = FrameCodec::new(max_payload_size);
        let (read_half, write_half) = tokio::io::split(stream);

        let reader = tokio::spawn(read_task(
            read_half,
            prefix,
            codec,
            inbox_tx,
            outbox_tx.clone(),
            shared.clone(),
        ));
        let writer = tokio::spawn(write_task(
            write_half,
            codec,
            outbox_rx,
            shared.clone(),
            close_timeout,
        ));

        ConnectionTask {
            _cancel_on_drop: shared.cancel.clone().drop_guard(),
            connection: Connection {
                outbox: outbox_tx,
                shared,
            },
            inbox: inbox_rx,
            reader,
            writer,
        }
    }
}

impl<S> ConnectionTask<S> {
    /// A new handle to the connection.
    pub fn connection(&self) -> Connection {
        self.connection.clone()
    }

    /// Waits for the next received frame. Returns `None` once the connection has been cancelled
    /// or the read task has stopped and all of its frames have been consumed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        let ConnectionTask {
            connection, inbox, ..
        } = self;
        tokio::select! {
            biased;
            _ = connection.shared.cancel.cancelled() => None,
            frame = inbox.recv() => frame,
        }
    }

    /// Takes a received frame, if one is available, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.inbox.try_recv().ok()
    }

    /// Returns a frame to the pool of the connection.
    pub fn release(&self, frame: Frame) {
        self.connection.shared.pool.release(frame);
    }
}

impl<S> ConnectionTask<S>
where
    S: AsyncWrite + Unpin,
{
    /// Stops both tasks and waits for them to complete before shutting down the transport.
    pub async fn shutdown(self) {
        let ConnectionTask {
            connection,
            inbox,
            reader,
            writer,
            _cancel_on_drop,
        } = self;
        let shared = &connection.shared;

        shared.start_closing();
        shared.cancel.cancel();
        drop(inbox);

        match join(reader, writer).await {
            (Ok(read_half), Ok(write_half)) => {
                let mut stream = read_half.unsplit(write_half);
                if let Err(error) = stream.shutdown().await {
                    event!(Level::DEBUG, SHUTDOWN_FAILED, ?error);
                }
            }
            (read_result, write_result) => {
                for error in read_result.err().into_iter().chain(write_result.err()) {
                    event!(Level::ERROR, JOIN_FAILED, ?error);
                }
            }
        }

        shared.set_closed();
    }
}

/// Checks the rules that the codec does not enforce.
fn validate_frame(frame: &Frame, role: Role) -> Result<(), ProtocolError> {
    let Frame { header, payload } = frame;

    if header.opcode.is_control() {
        if !header.flags.is_fin() {
            return Err(ProtocolError::FragmentedControl);
        }
        if payload.len() > CONTROL_MAX_SIZE {
            return Err(ProtocolError::ControlTooLarge(payload.len()));
        }
    }
    if header.flags.intersects(HeaderFlags::RESERVED) {
        return Err(ProtocolError::ReservedBits);
    }

    match (role, header.mask) {
        (Role::Server, None) => Err(ProtocolError::UnmaskedFrame),
        (Role::Client, Some(_)) => Err(ProtocolError::MaskedFrame),
        _ => Ok(()),
    }
}

async fn read_task<R>(
    mut reader: R,
    mut buffer: BytesMut,
    codec: FrameCodec,
    inbox: mpsc::Sender<Frame>,
    outbox: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
) -> R
where
    R: AsyncRead + Unpin,
{
    let cancel = &shared.cancel;

    loop {
        let mut frame = shared.pool.acquire();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = codec.read_frame(&mut reader, &mut buffer, &mut frame) => Some(result),
        };

        match result {
            None => {
                shared.pool.release(frame);
                break;
            }
            Some(Ok(())) => {
                event!(Level::TRACE, RECEIVED_FRAME, %frame);

                if let Err(error) = validate_frame(&frame, shared.role) {
                    event!(Level::WARN, PROTOCOL_VIOLATION, ?error);
                    shared.pool.release(frame);
                    shared.start_closing();
                    if !shared.close_queued.swap(true, Ordering::SeqCst) {
                        let mut close = shared.pool.acquire();
                        close.set_close(CloseCode::ProtocolError.code());
                        if outbox.try_send(close).is_err() {
                            cancel.cancel();
                        }
                    }
                    break;
                }

                let is_close = frame.is_close();
                if is_close {
                    shared.start_closing();
                }
                let delivered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    result = inbox.send(frame) => result.is_ok(),
                };
                if !delivered || is_close {
                    break;
                }
            }
            Some(Err(error)) => {
                shared.pool.release(frame);
                shared.start_closing();
                if error.is_clean_close() {
                    event!(Level::DEBUG, PEER_DISCONNECTED);
                } else {
                    event!(Level::WARN, READ_FAILED, ?error);
                }
                cancel.cancel();
                break;
            }
        }
    }

    shared.reader_done.store(true, Ordering::SeqCst);
    if shared.close_sent.load(Ordering::SeqCst) {
        cancel.cancel();
    }
    event!(Level::DEBUG, READER_STOPPED);
    reader
}

async fn write_task<W>(
    mut writer: W,
    codec: FrameCodec,
    mut outbox: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    close_timeout: Duration,
) -> W
where
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::new();

    loop {
        let next = tokio::select! {
            biased;
            frame = outbox.recv() => frame,
            _ = shared.cancel.cancelled() => None,
        };

        let frame = match next {
            Some(frame) => frame,
            None => {
                drain_outbox(&codec, &mut writer, &mut buffer, &mut outbox, &shared).await;
                break;
            }
        };

        match write_one(&codec, &mut writer, &mut buffer, frame, &shared).await {
            Ok(true) => {
                await_peer_close(&shared, close_timeout).await;
                break;
            }
            Ok(false) => {}
            Err(error) => {
                write_failed(&shared, error);
                break;
            }
        }
    }

    event!(Level::DEBUG, WRITER_STOPPED);
    writer
}

/// Writes the frames remaining in the outbox after cancellation, stopping after a close frame.
async fn drain_outbox<W>(
    codec: &FrameCodec,
    writer: &mut W,
    buffer: &mut BytesMut,
    outbox: &mut mpsc::Receiver<Frame>,
    shared: &Shared,
) where
    W: AsyncWrite + Unpin,
{
    while let Ok(frame) = outbox.try_recv() {
        match write_one(codec, writer, buffer, frame, shared).await {
            Ok(true) => {
                shared.close_sent.store(true, Ordering::SeqCst);
                break;
            }
            Ok(false) => {}
            Err(error) => {
                write_failed(shared, error);
                break;
            }
        }
    }
}

/// Writes a single frame and returns it to the pool. Returns whether it was a close frame.
async fn write_one<W>(
    codec: &FrameCodec,
    writer: &mut W,
    buffer: &mut BytesMut,
    mut frame: Frame,
    shared: &Shared,
) -> Result<bool, WriteError>
where
    W: AsyncWrite + Unpin,
{
    frame.header.mask = match shared.role {
        Role::Client => Some(rand::random()),
        Role::Server => None,
    };

    let result = codec
        .write_frame(writer, buffer, &frame)
        .await
        .map(|_| frame.is_close());
    if result.is_ok() {
        event!(Level::TRACE, SENT_FRAME, %frame);
    }
    shared.pool.release(frame);
    result
}

fn write_failed(shared: &Shared, error: WriteError) {
    event!(Level::WARN, WRITE_FAILED, ?error);
    shared.start_closing();
    shared.cancel.cancel();
}

/// Waits for the peer to complete the closing handshake after a close frame has been sent.
async fn await_peer_close(shared: &Shared, close_timeout: Duration) {
    shared.close_sent.store(true, Ordering::SeqCst);
    shared.start_closing();

    if !shared.reader_done.load(Ordering::SeqCst)
        && tokio::time::timeout(close_timeout, shared.cancel.cancelled())
            .await
            .is_err()
    {
        event!(Level::DEBUG, CLOSE_TIMED_OUT);
    }
    shared.cancel.cancel();
}
