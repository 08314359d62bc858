// Copyright (c) 2023 Huawei Device Co., Ltd.
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

//! Connection lifecycle and the embedder-facing handles.
//!
//! [`Connection::client`] and [`Connection::server`] adopt an established
//! transport and launch the three connection tasks; [`Connection::connect`]
//! dials TCP first, [`start_server`] runs an accept loop. The returned
//! [`Connection`] and per-stream [`StreamHandle`]s talk to the manager task
//! over its command channel, never touching shared state directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::body::ResponseState;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::{ConnConfig, H2Config};
use crate::error::{DispatchError, ErrorCode, H2Error};
use crate::fields::FieldBlock;
use crate::frame::{SettingsUpdate, StreamId};
use crate::mux::manager::ConnManager;
use crate::mux::reader::RecvData;
use crate::mux::settings::{SettingsSync, SettingsToken};
use crate::mux::streams::{Role, StreamCounters, StreamSet, StreamsSnapshot};
use crate::mux::writer::SendData;
use crate::mux::ConnEvent;

const DEFAULT_WINDOW_SIZE: u32 = 65535;

/// What a transport can tell us about itself beyond moving bytes.
pub trait ConnInfo {
    /// Address information of the transport.
    fn conn_detail(&self) -> ConnDetail;

    /// The peer's identity material, such as a certificate, when the
    /// transport authenticates the peer.
    fn peer_identity(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Transport address information.
#[derive(Clone, Debug, Default)]
pub struct ConnDetail {
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl ConnDetail {
    /// Gets the local socket address, when known.
    pub fn local(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Gets the peer socket address, when known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl ConnInfo for TcpStream {
    fn conn_detail(&self) -> ConnDetail {
        ConnDetail {
            local: self.local_addr().ok(),
            peer: self.peer_addr().ok(),
        }
    }
}

impl ConnInfo for tokio::io::DuplexStream {
    fn conn_detail(&self) -> ConnDetail {
        ConnDetail::default()
    }
}

/// The application-layer per-stream callback.
///
/// One handler instance serves every stream of a connection; a dedicated
/// task per stream invokes it with that stream's events in order. The
/// [`StreamHandle`] sends frames back without a reference cycle.
pub trait StreamHandler: Send + Sync + 'static {
    /// A header block arrived.
    fn on_headers(&self, stream: &StreamHandle, headers: FieldBlock, end_stream: bool);

    /// A DATA frame arrived.
    fn on_data(&self, stream: &StreamHandle, data: Vec<u8>, end_stream: bool);

    /// A trailing header block arrived.
    fn on_trailers(&self, stream: &StreamHandle, trailers: FieldBlock) {
        let _ = (stream, trailers);
    }

    /// The peer promised a pushed stream associated with this one.
    fn on_promise(&self, stream: &StreamHandle, promised_id: StreamId, headers: FieldBlock) {
        let _ = (stream, promised_id, headers);
    }

    /// The stream was reset.
    fn on_reset(&self, stream: &StreamHandle, code: ErrorCode) {
        let _ = (stream, code);
    }
}

/// Options applying to one send call.
#[derive(Clone, Copy, Default)]
pub struct SendOptions {
    /// Sets END_STREAM on the final frame of this send.
    pub end_stream: bool,
}

pub(crate) enum Command {
    NewStream {
        headers: Option<FieldBlock>,
        body: Option<Vec<u8>>,
        end_stream: bool,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
        reply: oneshot::Sender<Result<StreamId, H2Error>>,
    },
    SendHeaders {
        id: StreamId,
        fields: FieldBlock,
        end_stream: bool,
    },
    SendBody {
        id: StreamId,
        data: Vec<u8>,
        end_stream: bool,
    },
    SendTrailers {
        id: StreamId,
        fields: FieldBlock,
    },
    RstStream {
        id: StreamId,
        code: ErrorCode,
    },
    SendPromise {
        id: StreamId,
        fields: FieldBlock,
        reply: oneshot::Sender<Result<StreamId, H2Error>>,
    },
    Ping,
    UpdateSettings(SettingsUpdate),
    WindowUpdate(u32),
    GetResponse {
        id: StreamId,
        reply: oneshot::Sender<ResponseState>,
    },
    SettingsTimeout(SettingsToken),
    Stop,
}

/// A handle to one stream, valid for the life of the connection.
#[derive(Clone)]
pub struct StreamHandle {
    id: StreamId,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl StreamHandle {
    pub(crate) fn new(id: StreamId, cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { id, cmd_tx }
    }

    /// The stream's id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Sends a header block on this stream.
    pub fn send_headers(&self, headers: FieldBlock, opts: SendOptions) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::SendHeaders {
                id: self.id,
                fields: headers,
                end_stream: opts.end_stream,
            })
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Queues body bytes on this stream; the scheduler releases them as
    /// flow control allows.
    pub fn send_body(&self, data: Vec<u8>, opts: SendOptions) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::SendBody {
                id: self.id,
                data,
                end_stream: opts.end_stream,
            })
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Queues a trailing header block, emitted once the body drains.
    pub fn send_trailers(&self, trailers: FieldBlock) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::SendTrailers {
                id: self.id,
                fields: trailers,
            })
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Resets this stream.
    pub fn rst_stream(&self, code: ErrorCode) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::RstStream { id: self.id, code })
            .map_err(|_| DispatchError::ChannelClosed)
    }
}

/// One HTTP/2 connection over an adopted transport.
///
/// Dropping the `Connection` aborts its tasks; use
/// [`Connection::detach`] to let the connection run to completion in the
/// background, or [`Connection::stop`] for a graceful GOAWAY.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    counters: Arc<StreamCounters>,
    detail: ConnDetail,
    peer_identity: Option<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Starts a client connection over an established transport.
    pub fn client<S>(io: S, config: H2Config, conn_config: ConnConfig) -> Connection
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + ConnInfo + Unpin + Send + 'static,
    {
        Self::launch(Role::Client, io, config, conn_config, None)
    }

    /// Adopts an already-accepted socket as a server connection.
    pub fn server<S>(
        io: S,
        config: H2Config,
        conn_config: ConnConfig,
        handler: Arc<dyn StreamHandler>,
    ) -> Connection
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + ConnInfo + Unpin + Send + 'static,
    {
        Self::launch(Role::Server, io, config, conn_config, Some(handler))
    }

    /// Dials `addr` over TCP, honoring the configured connect timeout and
    /// TCP user timeout, and starts a client connection.
    pub async fn connect(
        addr: &str,
        config: H2Config,
        conn_config: ConnConfig,
    ) -> std::io::Result<Connection> {
        let stream = match timeout(conn_config.connect_timeout(), TcpStream::connect(addr)).await
        {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            }
        };
        stream.set_nodelay(true)?;
        #[cfg(target_os = "linux")]
        if let Some(user_timeout) = conn_config.tcp_user_timeout() {
            set_tcp_user_timeout(&stream, user_timeout);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = conn_config.tcp_user_timeout();
        Ok(Self::client(stream, config, conn_config))
    }

    fn launch<S>(
        role: Role,
        io: S,
        config: H2Config,
        conn_config: ConnConfig,
        handler: Option<Arc<dyn StreamHandler>>,
    ) -> Connection
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + ConnInfo + Unpin + Send + 'static,
    {
        let detail = io.conn_detail();
        let peer_identity = io.peer_identity();
        let streams = StreamSet::new(
            role,
            config.stream_window_size(),
            DEFAULT_WINDOW_SIZE,
            DEFAULT_WINDOW_SIZE,
        );
        let counters = streams.counters();
        let settings = Arc::new(Mutex::new(SettingsSync::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::channel(config.handler_channel_cap());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (read, write) = tokio::io::split(io);
        let (preface_tx, preface_rx) = match role {
            Role::Server => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            Role::Client => (None, None),
        };

        let mut handles = Vec::with_capacity(3);
        let send = SendData::new(FrameEncoder::new(), role, write, input_rx, preface_rx);
        handles.push(tokio::spawn(send.run()));
        let recv = RecvData::new(
            FrameDecoder::new(),
            role,
            settings.clone(),
            read,
            resp_tx,
            preface_tx,
        );
        handles.push(tokio::spawn(recv.run()));
        let manager = ConnManager::new(
            config,
            conn_config,
            handler,
            settings,
            input_tx,
            resp_rx,
            cmd_rx,
            cmd_tx.clone(),
            streams,
            shutdown.clone(),
        );
        handles.push(tokio::spawn(async move {
            let _ = manager.run().await;
        }));

        Connection {
            cmd_tx,
            counters,
            detail,
            peer_identity,
            shutdown,
            handles,
        }
    }

    /// Opens a new locally-initiated stream, optionally sending a header
    /// block and body right away. Fails with REFUSED_STREAM at the peer's
    /// concurrency cap.
    pub async fn new_stream(
        &self,
        headers: Option<FieldBlock>,
        body: Option<Vec<u8>>,
        opts: SendOptions,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
    ) -> Result<StreamHandle, H2Error> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::NewStream {
                headers,
                body,
                end_stream: opts.end_stream,
                notifier,
                reply,
            })
            .map_err(|_| H2Error::ConnectionError(ErrorCode::InternalError))?;
        let id = rx
            .await
            .map_err(|_| H2Error::ConnectionError(ErrorCode::InternalError))??;
        Ok(StreamHandle::new(id, self.cmd_tx.clone()))
    }

    /// Sends a header block on an existing stream.
    pub fn send_headers(
        &self,
        id: StreamId,
        headers: FieldBlock,
        opts: SendOptions,
    ) -> Result<(), DispatchError> {
        StreamHandle::new(id, self.cmd_tx.clone()).send_headers(headers, opts)
    }

    /// Queues body bytes on an existing stream.
    pub fn send_body(
        &self,
        id: StreamId,
        data: Vec<u8>,
        opts: SendOptions,
    ) -> Result<(), DispatchError> {
        StreamHandle::new(id, self.cmd_tx.clone()).send_body(data, opts)
    }

    /// Queues a trailing header block on an existing stream.
    pub fn send_trailers(&self, id: StreamId, trailers: FieldBlock) -> Result<(), DispatchError> {
        StreamHandle::new(id, self.cmd_tx.clone()).send_trailers(trailers)
    }

    /// Resets a stream.
    pub fn rst_stream(&self, id: StreamId, code: ErrorCode) -> Result<(), DispatchError> {
        StreamHandle::new(id, self.cmd_tx.clone()).rst_stream(code)
    }

    /// Promises a pushed stream associated with `id` (server only),
    /// returning the reserved stream id.
    pub async fn send_promise(&self, id: StreamId, headers: FieldBlock) -> Result<StreamId, H2Error> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendPromise {
                id,
                fields: headers,
                reply,
            })
            .map_err(|_| H2Error::ConnectionError(ErrorCode::InternalError))?;
        rx.await
            .map_err(|_| H2Error::ConnectionError(ErrorCode::InternalError))?
    }

    /// The state of a stream's stored response. `NotReady` until the
    /// stream reaches its terminal state.
    pub async fn get_response(&self, id: StreamId) -> Result<ResponseState, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetResponse { id, reply })
            .map_err(|_| DispatchError::ChannelClosed)?;
        rx.await.map_err(|_| DispatchError::ChannelClosed)
    }

    /// Round-trips a PING; the connection notifier receives
    /// [`ConnEvent::Pong`] when the peer acknowledges it.
    pub fn send_ping(&self) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::Ping)
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Sends a SETTINGS frame; values apply once the peer ACKs.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::UpdateSettings(update))
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Manually grants the peer connection-level receive window.
    pub fn send_window_update(&self, increment: u32) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::WindowUpdate(increment))
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// A snapshot of the stream set counters.
    pub fn get_streams(&self) -> StreamsSnapshot {
        self.counters.snapshot()
    }

    /// Transport address information captured at adoption.
    pub fn get_peer(&self) -> ConnDetail {
        self.detail.clone()
    }

    /// The peer identity the transport reported, if any.
    pub fn get_peercert(&self) -> Option<Vec<u8>> {
        self.peer_identity.clone()
    }

    /// Whether the connection tasks have terminated or begun closing.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Sends GOAWAY(NO_ERROR) and drains the connection.
    pub fn stop(&self) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(Command::Stop)
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Lets the connection tasks run to completion in the background
    /// instead of aborting them on drop.
    pub fn detach(mut self) {
        self.handles.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Accepts TCP connections forever, serving each with `handler`.
pub async fn start_server(
    listener: TcpListener,
    config: H2Config,
    conn_config: ConnConfig,
    handler: Arc<dyn StreamHandler>,
) -> std::io::Result<()> {
    loop {
        let (socket, _) = listener.accept().await?;
        Connection::server(socket, config.clone(), conn_config.clone(), handler.clone())
            .detach();
    }
}

#[cfg(target_os = "linux")]
fn set_tcp_user_timeout(stream: &TcpStream, user_timeout: std::time::Duration) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let millis = user_timeout.as_millis() as libc::c_uint;
    // A failed setsockopt only loses the tuning, not the connection.
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_USER_TIMEOUT,
            &millis as *const libc::c_uint as *const libc::c_void,
            std::mem::size_of::<libc::c_uint>() as libc::socklen_t,
        );
    }
}
