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

//! The connection manager task.
//!
//! `ConnManager` owns the stream set and serializes every state change:
//! frames validated by the reader arrive on one channel, embedder commands
//! on another, and everything leaving the connection goes through the
//! writer's frame channel. The connection walks `handshake` (peer SETTINGS
//! awaited under a deadline) to `connected` to `closing` (GOAWAY sent or
//! received, drain, terminate); header-block continuation state lives in
//! the reader-side decoder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::{ConnConfig, H2Config};
use crate::error::{DispatchError, ErrorCode, H2Error};
use crate::fields::FieldBlock;
use crate::frame::{Frame, SettingsUpdate, StreamId};
use crate::mux::conn::{Command, StreamHandle, StreamHandler};
use crate::mux::reader::OutputMessage;
use crate::mux::settings::{SettingsSync, SettingsToken};
use crate::mux::streams::{
    FrameRecvState, Role, ScheduleTarget, StreamEndState, StreamKind, StreamSet,
};
use crate::mux::{ConnEvent, StreamEvent};

// Deadline for the peer's first SETTINGS after the preface.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(4500);
// Deadline for the peer to ACK a SETTINGS frame we sent.
const SETTINGS_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, PartialEq, Eq)]
enum ConnState {
    Handshake,
    Connected,
    Closing,
}

pub(crate) struct ConnManager {
    config: H2Config,
    conn_config: ConnConfig,
    handler: Option<Arc<dyn StreamHandler>>,
    settings: Arc<Mutex<SettingsSync>>,
    input_tx: mpsc::UnboundedSender<Frame>,
    resp_rx: mpsc::Receiver<OutputMessage>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    streams: StreamSet,
    pings: HashMap<[u8; 8], Instant>,
    ping_counter: u64,
    state: ConnState,
    // The GOAWAY we sent, if any: (error code, last stream id).
    going_away: Option<(u32, StreamId)>,
    // The error code of a GOAWAY the peer sent.
    peer_goaway: Option<u32>,
    shutdown: Arc<AtomicBool>,
}

impl ConnManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: H2Config,
        conn_config: ConnConfig,
        handler: Option<Arc<dyn StreamHandler>>,
        settings: Arc<Mutex<SettingsSync>>,
        input_tx: mpsc::UnboundedSender<Frame>,
        resp_rx: mpsc::Receiver<OutputMessage>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        cmd_tx: mpsc::UnboundedSender<Command>,
        streams: StreamSet,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            conn_config,
            handler,
            settings,
            input_tx,
            resp_rx,
            cmd_rx,
            cmd_tx,
            streams,
            pings: HashMap::new(),
            ping_counter: 0,
            state: ConnState::Handshake,
            going_away: None,
            peer_goaway: None,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), DispatchError> {
        if let Err(e) = self.startup() {
            self.shutdown.store(true, Ordering::Release);
            return Err(e);
        }
        let handshake = sleep(HANDSHAKE_TIMEOUT);
        tokio::pin!(handshake);
        let result = loop {
            let step = tokio::select! {
                _ = &mut handshake, if self.state == ConnState::Handshake => {
                    Err(H2Error::ConnectionError(ErrorCode::SettingsTimeout).into())
                }
                message = self.resp_rx.recv() => match message {
                    None => Err(DispatchError::ChannelClosed),
                    Some(OutputMessage::Output(frame)) => self.recv_frame(frame).await,
                    Some(OutputMessage::SettingsAcked(update)) => {
                        self.on_settings_acked(update)
                    }
                    Some(OutputMessage::OutputExit(e)) => Err(e),
                },
                command = self.cmd_rx.recv() => match command {
                    None => Err(DispatchError::ChannelClosed),
                    Some(command) => self.handle_command(command).await,
                },
            };
            if let Err(e) = step {
                if let Some(exit) = self.handle_error(e).await {
                    break exit;
                }
            }
            if let Some(exit) = self.poll_goaway_finish() {
                break exit;
            }
        };
        self.shutdown.store(true, Ordering::Release);
        result
    }

    fn startup(&mut self) -> Result<(), DispatchError> {
        let update = self.config.initial_settings();
        let token = self.record_settings(update.clone())?;
        self.arm_settings_timer(token);
        self.push_frame(Frame::Settings(update))?;
        if let Some(window_update) =
            self.streams.conn_recv_setup(self.config.conn_window_size())
        {
            self.push_frame(window_update)?;
        }
        Ok(())
    }

    fn record_settings(&self, update: SettingsUpdate) -> Result<SettingsToken, DispatchError> {
        match self.settings.lock() {
            Ok(mut sync) => Ok(sync.record(update)),
            Err(_) => Err(DispatchError::ChannelClosed),
        }
    }

    fn arm_settings_timer(&self, token: SettingsToken) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            sleep(SETTINGS_ACK_TIMEOUT).await;
            let _ = cmd_tx.send(Command::SettingsTimeout(token));
        });
    }

    fn push_frame(&self, frame: Frame) -> Result<(), DispatchError> {
        self.input_tx
            .send(frame)
            .map_err(|_| DispatchError::ChannelClosed)
    }

    async fn recv_frame(&mut self, frame: Frame) -> Result<(), DispatchError> {
        match frame {
            Frame::Settings(update) => self.recv_settings_frame(update),
            // Inbound ACKs are resolved by the reader against the
            // settings FIFO and arrive as `SettingsAcked`.
            Frame::SettingsAck(_) => Ok(()),
            Frame::Ping { payload, ack } => self.recv_ping_frame(payload, ack),
            Frame::Headers {
                stream,
                fields,
                end_stream,
            } => self.recv_header_frame(stream, fields, end_stream).await,
            Frame::Data {
                stream,
                payload,
                end_stream,
            } => self.recv_data_frame(stream, payload, end_stream).await,
            Frame::RstStream { stream, code } => self.recv_reset_frame(stream, code).await,
            Frame::WindowUpdate { stream, increment } => {
                self.recv_window_frame(stream, increment)
            }
            Frame::GoAway {
                last_stream, code, ..
            } => self.recv_goaway_frame(last_stream, code).await,
            Frame::PushPromise {
                stream,
                promised,
                fields,
            } => self.recv_push_promise_frame(stream, promised, fields).await,
            // PRIORITY is parsed for wire compatibility and ignored.
            Frame::Priority { .. } => Ok(()),
        }
    }

    fn recv_settings_frame(&mut self, update: SettingsUpdate) -> Result<(), DispatchError> {
        if self.state == ConnState::Handshake {
            self.state = ConnState::Connected;
        }
        if let Some(num) = update.max_concurrent_streams {
            self.streams.update_their_max_active(num);
        }
        if let Some(size) = update.initial_window_size {
            self.streams.apply_send_initial_window_size(size)?;
        }
        if let Some(size) = update.max_frame_size {
            self.streams.set_max_frame_size(size);
        }
        // The header table size reaches the encoder when the ACK passes
        // through the writer; the wire ACK itself is empty.
        self.push_frame(Frame::SettingsAck(update))?;
        // A larger initial window may unblock queued bodies.
        self.run_scheduler(ScheduleTarget::All)
    }

    fn on_settings_acked(&mut self, update: SettingsUpdate) -> Result<(), DispatchError> {
        if let Some(size) = update.initial_window_size {
            let previous = self.streams.recv_initial_window();
            self.streams.apply_recv_initial_window_size(size);
            if size > previous {
                self.push_frame(Frame::WindowUpdate {
                    stream: 0,
                    increment: size - previous,
                })?;
            }
        }
        if let Some(num) = update.max_concurrent_streams {
            self.streams.update_my_max_active(num);
        }
        Ok(())
    }

    fn recv_ping_frame(&mut self, payload: [u8; 8], ack: bool) -> Result<(), DispatchError> {
        if ack {
            if self.pings.remove(&payload).is_some() {
                self.notify(ConnEvent::Pong);
            }
            Ok(())
        } else {
            self.push_frame(Frame::Ping { payload, ack: true })
        }
    }

    async fn recv_header_frame(
        &mut self,
        id: StreamId,
        fields: FieldBlock,
        eos: bool,
    ) -> Result<(), DispatchError> {
        if self.streams.get(id) == StreamKind::Idle {
            match self.streams.role() {
                Role::Server => {
                    if id % 2 == 0 {
                        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
                    }
                    let events = if self.handler.is_some() {
                        Some(self.open_handler_channel(id))
                    } else {
                        None
                    };
                    match self.streams.accept_peer_stream(
                        id,
                        events,
                        self.conn_config.notifier(),
                        false,
                    ) {
                        Ok(()) => {}
                        Err(H2Error::StreamError(id, ErrorCode::RefusedStream)) => {
                            self.push_frame(rst_frame(id, ErrorCode::RefusedStream))?;
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Role::Client => {
                    return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
                }
            }
        }
        let trailer = !self.streams.expects_leading_headers(id);
        match self.streams.recv_headers(id, eos) {
            FrameRecvState::OK => {
                self.streams.store_resp_headers(id, fields.clone(), trailer);
                let event = if trailer {
                    StreamEvent::Trailers(fields)
                } else {
                    StreamEvent::Headers {
                        fields,
                        end_stream: eos,
                    }
                };
                self.deliver(id, event).await;
                if self.streams.is_terminal(id) {
                    self.finalize(id);
                }
                Ok(())
            }
            FrameRecvState::Ignore => Ok(()),
            FrameRecvState::Err(e) => Err(e.into()),
        }
    }

    async fn recv_data_frame(
        &mut self,
        id: StreamId,
        data: Vec<u8>,
        eos: bool,
    ) -> Result<(), DispatchError> {
        let auto = self.conn_config.auto_flow_control();
        let len = data.len() as u32;
        if let Some(update) = self.streams.release_conn_recv_window(len, auto)? {
            self.push_frame(update)?;
        }
        if let Some(update) = self.streams.release_stream_recv_window(id, len, auto)? {
            self.push_frame(update)?;
        }
        match self.streams.recv_data(id, eos) {
            FrameRecvState::OK => {
                self.streams.store_resp_data(id, &data);
                self.deliver(
                    id,
                    StreamEvent::Data {
                        data,
                        end_stream: eos,
                    },
                )
                .await;
                if self.streams.is_terminal(id) {
                    self.finalize(id);
                }
                Ok(())
            }
            FrameRecvState::Ignore => Ok(()),
            FrameRecvState::Err(e) => Err(e.into()),
        }
    }

    async fn recv_reset_frame(&mut self, id: StreamId, code: u32) -> Result<(), DispatchError> {
        if self.streams.get(id) == StreamKind::Idle {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
        }
        let code = ErrorCode::from_wire(code).unwrap_or(ErrorCode::ProtocolError);
        match self.streams.recv_remote_reset(id) {
            StreamEndState::OK => {
                self.deliver(id, StreamEvent::Reset(code)).await;
                self.streams.close_with_reset(id, code);
                Ok(())
            }
            StreamEndState::Ignore => Ok(()),
            StreamEndState::Err(e) => Err(e.into()),
        }
    }

    fn recv_window_frame(&mut self, id: StreamId, increment: u32) -> Result<(), DispatchError> {
        if id == 0 {
            self.streams.increase_conn_send_window(increment)?;
            return self.run_scheduler(ScheduleTarget::All);
        }
        match self.streams.get(id) {
            StreamKind::Idle => Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into()),
            StreamKind::Closed => {
                self.push_frame(rst_frame(id, ErrorCode::StreamClosed))?;
                Ok(())
            }
            StreamKind::Active => {
                self.streams.increase_stream_send_window(id, increment)?;
                self.run_scheduler(ScheduleTarget::One(id))
            }
        }
    }

    async fn recv_goaway_frame(
        &mut self,
        last_stream_id: StreamId,
        code: u32,
    ) -> Result<(), DispatchError> {
        // A subsequent GOAWAY may only lower the last stream id.
        if self.streams.max_send_id < last_stream_id {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
        }
        self.streams.max_send_id = last_stream_id;
        self.state = ConnState::Closing;
        self.peer_goaway = Some(code);
        let code = ErrorCode::from_wire(code).unwrap_or(ErrorCode::ProtocolError);
        self.notify(ConnEvent::GoingAway(code));
        for id in self.streams.streams_above(last_stream_id) {
            self.deliver(id, StreamEvent::Reset(ErrorCode::RefusedStream))
                .await;
            self.streams.close_with_reset(id, ErrorCode::RefusedStream);
        }
        Ok(())
    }

    async fn recv_push_promise_frame(
        &mut self,
        id: StreamId,
        promised_id: StreamId,
        fields: FieldBlock,
    ) -> Result<(), DispatchError> {
        if self.streams.role() == Role::Server || !self.config.enable_push() {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
        }
        self.streams.reserve_remote(
            promised_id,
            self.conn_config.notifier(),
            !self.conn_config.garbage_on_end(),
        )?;
        self.deliver(
            id,
            StreamEvent::Promise {
                promised_id,
                fields,
            },
        )
        .await;
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), DispatchError> {
        match command {
            Command::NewStream {
                headers,
                body,
                end_stream,
                notifier,
                reply,
            } => {
                if self.state == ConnState::Closing {
                    let _ = reply.send(Err(H2Error::StreamError(0, ErrorCode::RefusedStream)));
                    return Ok(());
                }
                let store = !self.conn_config.garbage_on_end();
                let reserved = self.next_local_id();
                let events = if self.handler.is_some() {
                    Some(self.open_handler_channel(reserved))
                } else {
                    None
                };
                match self.streams.new_stream(events, notifier, store) {
                    Ok(id) => {
                        let _ = reply.send(Ok(id));
                        let headers_end = end_stream && body.is_none();
                        if let Some(fields) = headers {
                            self.send_headers_now(id, fields, headers_end)?;
                        }
                        if let Some(bytes) = body {
                            self.streams.queue_body(id, &bytes, end_stream);
                            self.run_scheduler(ScheduleTarget::One(id))?;
                        }
                        Ok(())
                    }
                    Err(e @ H2Error::StreamError(_, ErrorCode::RefusedStream)) => {
                        let _ = reply.send(Err(e));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Err(e.into())
                    }
                }
            }
            Command::SendHeaders {
                id,
                fields,
                end_stream,
            } => {
                if self.state == ConnState::Closing {
                    return Ok(());
                }
                self.send_headers_now(id, fields, end_stream)
            }
            Command::SendBody {
                id,
                data,
                end_stream,
            } => {
                if self.state == ConnState::Closing {
                    return Ok(());
                }
                self.streams.queue_body(id, &data, end_stream);
                self.run_scheduler(ScheduleTarget::One(id))
            }
            Command::SendTrailers { id, fields } => {
                if self.state == ConnState::Closing {
                    return Ok(());
                }
                self.streams.queue_trailers(id, fields);
                self.run_scheduler(ScheduleTarget::One(id))
            }
            Command::RstStream { id, code } => self.reset_stream_locally(id, code).await,
            Command::SendPromise { id, fields, reply } => {
                if self.streams.role() != Role::Server {
                    let _ = reply.send(Err(H2Error::ConnectionError(ErrorCode::ProtocolError)));
                    return Ok(());
                }
                if self.streams.get(id) != StreamKind::Active {
                    let _ = reply.send(Err(H2Error::StreamError(id, ErrorCode::StreamClosed)));
                    return Ok(());
                }
                let events = if self.handler.is_some() {
                    Some(self.open_handler_channel(self.next_local_id()))
                } else {
                    None
                };
                match self.streams.reserve_local(events) {
                    Ok(promised_id) => {
                        let _ = reply.send(Ok(promised_id));
                        self.push_frame(Frame::PushPromise {
                            stream: id,
                            promised: promised_id,
                            fields,
                        })
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Err(e.into())
                    }
                }
            }
            Command::Ping => {
                self.ping_counter += 1;
                let opaque = self.ping_counter.to_be_bytes();
                self.pings.insert(opaque, Instant::now());
                self.push_frame(Frame::Ping {
                    payload: opaque,
                    ack: false,
                })
            }
            Command::UpdateSettings(update) => {
                let token = self.record_settings(update.clone())?;
                self.arm_settings_timer(token);
                self.push_frame(Frame::Settings(update))
            }
            Command::WindowUpdate(increment) => {
                self.streams.manual_conn_window_release(increment);
                self.push_frame(Frame::WindowUpdate {
                    stream: 0,
                    increment,
                })
            }
            Command::GetResponse { id, reply } => {
                let _ = reply.send(self.streams.take_response(id));
                Ok(())
            }
            Command::SettingsTimeout(token) => {
                let timed_out = match self.settings.lock() {
                    Ok(sync) => sync.is_head(token),
                    Err(_) => false,
                };
                if timed_out {
                    Err(H2Error::ConnectionError(ErrorCode::SettingsTimeout).into())
                } else {
                    Ok(())
                }
            }
            Command::Stop => {
                self.go_away(ErrorCode::NoError)?;
                Err(DispatchError::Disconnect)
            }
        }
    }

    fn next_local_id(&self) -> StreamId {
        self.streams.counters().snapshot().my_next_stream_id
    }

    fn send_headers_now(
        &mut self,
        id: StreamId,
        fields: FieldBlock,
        end_stream: bool,
    ) -> Result<(), DispatchError> {
        match self.streams.send_headers_frame(id, end_stream) {
            FrameRecvState::OK => {
                self.push_frame(Frame::Headers {
                    stream: id,
                    fields,
                    end_stream,
                })?;
                if self.streams.is_terminal(id) {
                    self.finalize(id);
                }
                Ok(())
            }
            FrameRecvState::Ignore => Ok(()),
            FrameRecvState::Err(e) => Err(e.into()),
        }
    }

    async fn reset_stream_locally(
        &mut self,
        id: StreamId,
        code: ErrorCode,
    ) -> Result<(), DispatchError> {
        match self.streams.get(id) {
            // Settled streams still get the reset frame; there is no state
            // left to change.
            StreamKind::Closed => self.push_frame(rst_frame(id, code)),
            StreamKind::Idle => Ok(()),
            StreamKind::Active => match self.streams.send_local_reset(id) {
                StreamEndState::OK => {
                    self.push_frame(rst_frame(id, code))?;
                    self.deliver(id, StreamEvent::Reset(code)).await;
                    self.streams.close_with_reset(id, code);
                    Ok(())
                }
                StreamEndState::Ignore => Ok(()),
                StreamEndState::Err(e) => Err(e.into()),
            },
        }
    }

    fn run_scheduler(&mut self, target: ScheduleTarget) -> Result<(), DispatchError> {
        let outcome = self.streams.send_what_we_can(target);
        for frame in outcome.frames {
            self.push_frame(frame)?;
        }
        for id in outcome.finished {
            self.finalize(id);
        }
        Ok(())
    }

    fn finalize(&mut self, id: StreamId) {
        self.streams.close(id, self.conn_config.garbage_on_end());
    }

    async fn deliver(&mut self, id: StreamId, event: StreamEvent) {
        if let Some(sender) = self.streams.events_sender(id) {
            let _ = sender.send(event).await;
        }
    }

    fn notify(&self, event: ConnEvent) {
        if let Some(notifier) = self.conn_config.notifier() {
            let _ = notifier.send(event);
        }
    }

    fn open_handler_channel(&self, id: StreamId) -> mpsc::Sender<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(self.config.handler_channel_cap());
        let handle = StreamHandle::new(id, self.cmd_tx.clone());
        let handler = match self.handler.clone() {
            Some(handler) => handler,
            None => return tx,
        };
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Headers { fields, end_stream } => {
                        handler.on_headers(&handle, fields, end_stream);
                    }
                    StreamEvent::Data { data, end_stream } => {
                        handler.on_data(&handle, data, end_stream);
                    }
                    StreamEvent::Trailers(fields) => {
                        handler.on_trailers(&handle, fields);
                    }
                    StreamEvent::Promise {
                        promised_id,
                        fields,
                    } => {
                        handler.on_promise(&handle, promised_id, fields);
                    }
                    StreamEvent::Reset(code) => {
                        handler.on_reset(&handle, code);
                        break;
                    }
                }
            }
        });
        tx
    }

    // Connection errors send one GOAWAY and drain; stream errors reset one
    // stream and keep the connection alive.
    async fn handle_error(&mut self, error: DispatchError) -> Option<Result<(), DispatchError>> {
        match error {
            DispatchError::H2(H2Error::StreamError(id, code)) => {
                match self.reset_stream_locally(id, code).await {
                    Ok(()) => None,
                    Err(e) => Some(Err(e)),
                }
            }
            DispatchError::H2(H2Error::ConnectionError(code)) => {
                let _ = self.go_away(code);
                self.close_everything().await;
                Some(Err(error))
            }
            DispatchError::Disconnect => {
                self.close_everything().await;
                Some(Ok(()))
            }
            DispatchError::BadPreface => {
                // An invalid preface closes the socket without GOAWAY.
                self.close_everything().await;
                Some(Ok(()))
            }
            other => {
                self.close_everything().await;
                Some(Err(other))
            }
        }
    }

    fn go_away(&mut self, code: ErrorCode) -> Result<(), DispatchError> {
        let last_stream_id = self.streams.latest_remote_id;
        if let Some((prev_code, prev_last)) = self.going_away {
            if prev_code == code.into_code() && prev_last == last_stream_id {
                return Ok(());
            }
        }
        self.going_away = Some((code.into_code(), last_stream_id));
        self.streams.max_recv_id = last_stream_id;
        self.state = ConnState::Closing;
        self.notify(ConnEvent::GoingAway(code));
        self.push_frame(Frame::GoAway {
            last_stream: last_stream_id,
            code: code.into_code(),
            debug: vec![],
        })
    }

    async fn close_everything(&mut self) {
        for id in self.streams.all_unclosed() {
            self.deliver(id, StreamEvent::Reset(ErrorCode::Cancel)).await;
            self.streams.close(id, true);
        }
    }

    // After a peer GOAWAY, reply with our own once every allowed stream
    // has finished, then terminate.
    fn poll_goaway_finish(&mut self) -> Option<Result<(), DispatchError>> {
        if self.state != ConnState::Closing {
            return None;
        }
        let code = self.peer_goaway?;
        if !self.streams.is_closed() {
            return None;
        }
        if self.going_away.is_none() {
            let _ = self.push_frame(Frame::GoAway {
                last_stream: self.streams.latest_remote_id,
                code,
                debug: vec![],
            });
        }
        Some(Ok(()))
    }
}

fn rst_frame(id: StreamId, code: ErrorCode) -> Frame {
    Frame::RstStream {
        stream: id,
        code: code.into_code(),
    }
}
