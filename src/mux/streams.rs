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

//! The stream set.
//!
//! Central registry of every stream on one connection: identity, lifecycle
//! state, flow-control credit and queued outbound data. Streams are
//! partitioned by initiator. Ids below a partition's `lowest_stream_id`
//! are implicitly closed, ids at or above its `next_available_stream_id`
//! are implicitly idle; only ids in between ever occupy storage.
//!
//! The set is owned by the connection manager task. A shared
//! [`StreamCounters`] mirror lets handles observe the partition counters
//! and the connection send credit without a round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::body::{ResponseState, StoredResponse};
use crate::error::{ErrorCode, H2Error};
use crate::fields::FieldBlock;
use crate::frame::{Frame, StreamId};
use crate::mux::credit::{Credit, RecvCredit};
use crate::mux::{ConnEvent, StreamEvent};

const DEFAULT_MAX_STREAM_ID: StreamId = u32::MAX >> 1;

// The connection-level window starts at the RFC 7540 initial value; only
// WINDOW_UPDATE moves it.
const INITIAL_CONN_WINDOW: u32 = 65_535;

/// The role this endpoint plays on the connection. Client-initiated stream
/// ids are odd, server-initiated ids are even.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The observable kind of a stream id, per the implicit-state rules.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Idle,
    Active,
    Closed,
}

/// Counters mirrored out of the stream set for lock-free observation.
pub struct StreamCounters {
    mine_next: AtomicU32,
    theirs_next: AtomicU32,
    mine_lowest: AtomicU32,
    theirs_lowest: AtomicU32,
    mine_active: AtomicU32,
    theirs_active: AtomicU32,
    conn_send_window: AtomicI64,
}

/// A snapshot of the stream set counters, as returned by `get_streams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamsSnapshot {
    /// Locally initiated streams currently active.
    pub my_active: u32,
    /// Peer initiated streams currently active.
    pub their_active: u32,
    /// The next id a locally initiated stream would get.
    pub my_next_stream_id: StreamId,
    /// The next peer-initiated id we expect.
    pub their_next_stream_id: StreamId,
    /// Ids below these are settled locally / for the peer.
    pub my_lowest_stream_id: StreamId,
    /// See `my_lowest_stream_id`.
    pub their_lowest_stream_id: StreamId,
    /// The connection-level send window.
    pub conn_send_window: i64,
}

impl StreamCounters {
    fn new(mine_next: StreamId, theirs_next: StreamId, conn_send_window: u32) -> Self {
        Self {
            mine_next: AtomicU32::new(mine_next),
            theirs_next: AtomicU32::new(theirs_next),
            mine_lowest: AtomicU32::new(mine_next),
            theirs_lowest: AtomicU32::new(theirs_next),
            mine_active: AtomicU32::new(0),
            theirs_active: AtomicU32::new(0),
            conn_send_window: AtomicI64::new(conn_send_window as i64),
        }
    }

    /// Builds a [`StreamsSnapshot`] from the current counter values.
    pub fn snapshot(&self) -> StreamsSnapshot {
        StreamsSnapshot {
            my_active: self.mine_active.load(Ordering::Relaxed),
            their_active: self.theirs_active.load(Ordering::Relaxed),
            my_next_stream_id: self.mine_next.load(Ordering::Relaxed),
            their_next_stream_id: self.theirs_next.load(Ordering::Relaxed),
            my_lowest_stream_id: self.mine_lowest.load(Ordering::Relaxed),
            their_lowest_stream_id: self.theirs_lowest.load(Ordering::Relaxed),
            conn_send_window: self.conn_send_window.load(Ordering::Relaxed),
        }
    }
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum FrameRecvState {
    OK,
    Ignore,
    Err(H2Error),
}

#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum StreamEndState {
    OK,
    Ignore,
    Err(H2Error),
}

// The stream lifecycle of RFC 7540 section 5.1: idle streams open on a
// header block (or reserve on PUSH_PROMISE), each direction half-closes on
// its END_STREAM, and a reset or GOAWAY closes from any state.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum H2StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open {
        send: ActiveState,
        recv: ActiveState,
    },
    // The parameter tracks the still-open direction.
    LocalHalfClosed(ActiveState),
    RemoteHalfClosed(ActiveState),
    Closed(CloseReason),
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum ActiveState {
    WaitHeaders,
    WaitData,
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub(crate) enum CloseReason {
    LocalRst,
    RemoteRst,
    RemoteGoAway,
    LocalGoAway,
    EndStream,
}

pub(crate) struct ActiveStream {
    state: H2StreamState,
    send_credit: Credit,
    recv_credit: RecvCredit,
    // Outbound body bytes not yet released by flow control.
    queued: Vec<u8>,
    body_complete: bool,
    // Trailing header block deferred until the queued body drains.
    trailers: Option<FieldBlock>,
    // Inbound accumulation for `get_response`.
    resp_headers: Option<FieldBlock>,
    resp_body: Vec<u8>,
    resp_trailers: Option<FieldBlock>,
    store_response: bool,
    events: Option<mpsc::Sender<StreamEvent>>,
    notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
}

struct ClosedStream {
    outcome: ClosedOutcome,
    garbage: bool,
}

enum ClosedOutcome {
    Response(StoredResponse),
    Reset(ErrorCode),
    Nothing,
}

enum StreamSlot {
    Active(Box<ActiveStream>),
    Closed(ClosedStream),
}

struct Partition {
    max_active: Option<u32>,
    active_count: u32,
    lowest: StreamId,
    next: StreamId,
}

impl Partition {
    fn new(first_id: StreamId) -> Self {
        Self {
            max_active: None,
            active_count: 0,
            lowest: first_id,
            next: first_id,
        }
    }

    fn at_capacity(&self) -> bool {
        match self.max_active {
            Some(max) => self.active_count >= max,
            None => false,
        }
    }
}

/// What the scheduler produced in one pass.
#[derive(Default)]
pub(crate) struct SchedulerOutcome {
    pub(crate) frames: Vec<Frame>,
    pub(crate) finished: Vec<StreamId>,
}

/// Which streams a scheduler pass covers.
#[derive(Copy, Clone)]
pub(crate) enum ScheduleTarget {
    All,
    One(StreamId),
}

enum ScheduleStep {
    Done,
    Trailers(FieldBlock),
    EmptyEnd,
    Chunk { chunk: Vec<u8>, eos: bool, drained: bool },
}

pub(crate) struct StreamSet {
    role: Role,
    map: HashMap<StreamId, StreamSlot>,
    mine: Partition,
    theirs: Partition,
    // Connection-level flow control.
    conn_send: Credit,
    conn_recv: RecvCredit,
    // Peer SETTINGS_INITIAL_WINDOW_SIZE, seeds and shifts stream send
    // credit.
    send_initial_window: u32,
    // Our SETTINGS_INITIAL_WINDOW_SIZE, applied on ACK.
    recv_initial_window: u32,
    // Peer SETTINGS_MAX_FRAME_SIZE, the egress frame cap.
    max_frame_size: u32,
    // Highest peer-initiated id we have accepted.
    pub(crate) latest_remote_id: StreamId,
    // last_stream_id from a peer GOAWAY; our streams above it are dead.
    pub(crate) max_send_id: StreamId,
    // last_stream_id from our own GOAWAY; peer frames above it are stale.
    pub(crate) max_recv_id: StreamId,
    counters: Arc<StreamCounters>,
}

impl StreamSet {
    pub(crate) fn new(
        role: Role,
        recv_window_size: u32,
        send_window_size: u32,
        conn_send_window: u32,
    ) -> Self {
        let (mine_first, theirs_first) = match role {
            Role::Client => (1, 2),
            Role::Server => (2, 1),
        };
        let counters = Arc::new(StreamCounters::new(
            mine_first,
            theirs_first,
            conn_send_window,
        ));
        Self {
            role,
            map: HashMap::new(),
            mine: Partition::new(mine_first),
            theirs: Partition::new(theirs_first),
            conn_send: Credit::new(conn_send_window),
            conn_recv: RecvCredit::new(INITIAL_CONN_WINDOW),
            send_initial_window: send_window_size,
            recv_initial_window: recv_window_size,
            max_frame_size: crate::codec::DEFAULT_MAX_FRAME_SIZE,
            latest_remote_id: 0,
            max_send_id: DEFAULT_MAX_STREAM_ID,
            max_recv_id: DEFAULT_MAX_STREAM_ID,
            counters,
        }
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn counters(&self) -> Arc<StreamCounters> {
        self.counters.clone()
    }

    pub(crate) fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub(crate) fn recv_initial_window(&self) -> u32 {
        self.recv_initial_window
    }

    /// Whether the stream reached its terminal state and awaits
    /// finalization.
    pub(crate) fn is_terminal(&self, id: StreamId) -> bool {
        matches!(
            self.active(id).map(|stream| stream.state),
            Some(H2StreamState::Closed(_))
        )
    }

    fn is_mine(&self, id: StreamId) -> bool {
        let odd = id % 2 == 1;
        match self.role {
            Role::Client => odd,
            Role::Server => !odd,
        }
    }

    fn partition(&self, id: StreamId) -> &Partition {
        if self.is_mine(id) {
            &self.mine
        } else {
            &self.theirs
        }
    }

    fn sync_partition_counters(&self) {
        self.counters
            .mine_next
            .store(self.mine.next, Ordering::Relaxed);
        self.counters
            .theirs_next
            .store(self.theirs.next, Ordering::Relaxed);
        self.counters
            .mine_lowest
            .store(self.mine.lowest, Ordering::Relaxed);
        self.counters
            .theirs_lowest
            .store(self.theirs.lowest, Ordering::Relaxed);
        self.counters
            .mine_active
            .store(self.mine.active_count, Ordering::Relaxed);
        self.counters
            .theirs_active
            .store(self.theirs.active_count, Ordering::Relaxed);
    }

    fn sync_conn_window(&self) {
        self.counters
            .conn_send_window
            .store(self.conn_send.available() as i64, Ordering::Relaxed);
    }

    /// Resolves an id to its observable kind: materialized streams report
    /// their slot, everything at or above the partition's next id is idle,
    /// everything else is closed.
    pub(crate) fn get(&self, id: StreamId) -> StreamKind {
        match self.map.get(&id) {
            Some(StreamSlot::Active(_)) => StreamKind::Active,
            Some(StreamSlot::Closed(_)) => StreamKind::Closed,
            None => {
                if id >= self.partition(id).next {
                    StreamKind::Idle
                } else {
                    StreamKind::Closed
                }
            }
        }
    }

    fn active(&self, id: StreamId) -> Option<&ActiveStream> {
        match self.map.get(&id) {
            Some(StreamSlot::Active(stream)) => Some(stream),
            _ => None,
        }
    }

    fn active_mut(&mut self, id: StreamId) -> Option<&mut ActiveStream> {
        match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Allocates the next locally-initiated stream id and materializes the
    /// stream. Fails with REFUSED_STREAM at the partition's concurrency
    /// cap; no id is consumed in that case.
    pub(crate) fn new_stream(
        &mut self,
        events: Option<mpsc::Sender<StreamEvent>>,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
        store_response: bool,
    ) -> Result<StreamId, H2Error> {
        if self.mine.at_capacity() {
            return Err(H2Error::StreamError(0, ErrorCode::RefusedStream));
        }
        if self.mine.next > DEFAULT_MAX_STREAM_ID || self.mine.next > self.max_send_id {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let id = self.mine.next;
        self.mine.next += 2;
        self.mine.active_count += 1;
        self.insert_active(id, H2StreamState::Idle, events, notifier, store_response);
        self.sync_partition_counters();
        Ok(id)
    }

    /// Materializes a peer-initiated stream for an inbound HEADERS on an
    /// idle id. Fails with REFUSED_STREAM at our advertised cap.
    pub(crate) fn accept_peer_stream(
        &mut self,
        id: StreamId,
        events: Option<mpsc::Sender<StreamEvent>>,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
        store_response: bool,
    ) -> Result<(), H2Error> {
        if self.is_mine(id) || id < self.theirs.next {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        if self.theirs.at_capacity() {
            return Err(H2Error::StreamError(id, ErrorCode::RefusedStream));
        }
        self.theirs.next = id + 2;
        self.theirs.active_count += 1;
        self.latest_remote_id = self.latest_remote_id.max(id);
        self.insert_active(id, H2StreamState::Idle, events, notifier, store_response);
        self.sync_partition_counters();
        Ok(())
    }

    /// Reserves a peer-promised id (client side of PUSH_PROMISE).
    pub(crate) fn reserve_remote(
        &mut self,
        promised_id: StreamId,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
        store_response: bool,
    ) -> Result<(), H2Error> {
        if self.is_mine(promised_id) || promised_id < self.theirs.next {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        self.theirs.next = promised_id + 2;
        self.theirs.active_count += 1;
        self.latest_remote_id = self.latest_remote_id.max(promised_id);
        self.insert_active(
            promised_id,
            H2StreamState::ReservedRemote,
            None,
            notifier,
            store_response,
        );
        self.sync_partition_counters();
        Ok(())
    }

    /// Reserves a locally-promised id (server side of PUSH_PROMISE).
    pub(crate) fn reserve_local(
        &mut self,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<StreamId, H2Error> {
        if self.mine.next > DEFAULT_MAX_STREAM_ID || self.mine.next > self.max_send_id {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let id = self.mine.next;
        self.mine.next += 2;
        self.mine.active_count += 1;
        self.insert_active(id, H2StreamState::ReservedLocal, events, None, false);
        self.sync_partition_counters();
        Ok(id)
    }

    fn insert_active(
        &mut self,
        id: StreamId,
        state: H2StreamState,
        events: Option<mpsc::Sender<StreamEvent>>,
        notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
        store_response: bool,
    ) {
        let stream = ActiveStream {
            state,
            send_credit: Credit::new(self.send_initial_window),
            recv_credit: RecvCredit::new(self.recv_initial_window),
            queued: Vec::new(),
            body_complete: false,
            trailers: None,
            resp_headers: None,
            resp_body: Vec::new(),
            resp_trailers: None,
            store_response,
            events,
            notifier,
        };
        self.map.insert(id, StreamSlot::Active(Box::new(stream)));
    }

    pub(crate) fn events_sender(&self, id: StreamId) -> Option<mpsc::Sender<StreamEvent>> {
        self.active(id).and_then(|stream| stream.events.clone())
    }

    fn count_closed(&mut self, id: StreamId) {
        let partition = if self.is_mine(id) {
            &mut self.mine
        } else {
            &mut self.theirs
        };
        partition.active_count = partition.active_count.saturating_sub(1);
        self.sync_partition_counters();
    }

    fn on_missing_recv(&self, id: StreamId) -> FrameRecvState {
        if id >= self.partition(id).next {
            // Frames on an idle stream are a connection error.
            FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        } else {
            FrameRecvState::Err(H2Error::StreamError(id, ErrorCode::StreamClosed))
        }
    }

    /// Receiving a header block. Whether it is the leading block or a
    /// trailer block is decided by the stream's receive progress.
    pub(crate) fn recv_headers(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        if id > self.max_recv_id {
            return FrameRecvState::Ignore;
        }
        if !self.map.contains_key(&id) {
            return self.on_missing_recv(id);
        }
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => {
                match stream.state {
                    H2StreamState::Idle => {
                        stream.state = if eos {
                            H2StreamState::RemoteHalfClosed(ActiveState::WaitHeaders)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitHeaders,
                                recv: ActiveState::WaitData,
                            }
                        };
                    }
                    H2StreamState::ReservedRemote => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        } else {
                            stream.state = H2StreamState::LocalHalfClosed(ActiveState::WaitData);
                        }
                    }
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitHeaders,
                    } => {
                        stream.state = if eos {
                            H2StreamState::RemoteHalfClosed(send)
                        } else {
                            H2StreamState::Open {
                                send,
                                recv: ActiveState::WaitData,
                            }
                        };
                    }
                    // A header block after DATA is a trailer block and must
                    // end the stream.
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitData,
                    } => {
                        if !eos {
                            return FrameRecvState::Err(H2Error::StreamError(
                                id,
                                ErrorCode::ProtocolError,
                            ));
                        }
                        stream.state = H2StreamState::RemoteHalfClosed(send);
                    }
                    H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        } else {
                            stream.state = H2StreamState::LocalHalfClosed(ActiveState::WaitData);
                        }
                    }
                    H2StreamState::LocalHalfClosed(ActiveState::WaitData) => {
                        if !eos {
                            return FrameRecvState::Err(H2Error::StreamError(
                                id,
                                ErrorCode::ProtocolError,
                            ));
                        }
                        stream.state = H2StreamState::Closed(CloseReason::EndStream);
                        closed = true;
                    }
                    H2StreamState::Closed(
                        CloseReason::LocalRst | CloseReason::LocalGoAway,
                    ) => {
                        return FrameRecvState::Ignore;
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::StreamError(
                            id,
                            ErrorCode::StreamClosed,
                        ));
                    }
                }
                FrameRecvState::OK
            }
            _ => FrameRecvState::Err(H2Error::StreamError(id, ErrorCode::StreamClosed)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    pub(crate) fn recv_data(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        if id > self.max_recv_id {
            return FrameRecvState::Ignore;
        }
        if !self.map.contains_key(&id) {
            return self.on_missing_recv(id);
        }
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => {
                match stream.state {
                    H2StreamState::Open {
                        send,
                        recv: ActiveState::WaitData,
                    } => {
                        if eos {
                            stream.state = H2StreamState::RemoteHalfClosed(send);
                        }
                    }
                    H2StreamState::LocalHalfClosed(ActiveState::WaitData) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        }
                    }
                    H2StreamState::Closed(
                        CloseReason::LocalRst | CloseReason::LocalGoAway,
                    ) => {
                        return FrameRecvState::Ignore;
                    }
                    H2StreamState::Idle
                    | H2StreamState::Open {
                        recv: ActiveState::WaitHeaders,
                        ..
                    }
                    | H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders) => {
                        return FrameRecvState::Err(H2Error::StreamError(
                            id,
                            ErrorCode::ProtocolError,
                        ));
                    }
                    _ => {
                        return FrameRecvState::Err(H2Error::StreamError(
                            id,
                            ErrorCode::StreamClosed,
                        ));
                    }
                }
                FrameRecvState::OK
            }
            _ => FrameRecvState::Err(H2Error::StreamError(id, ErrorCode::StreamClosed)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    pub(crate) fn send_headers_frame(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => {
                match stream.state {
                    H2StreamState::Idle => {
                        stream.state = if eos {
                            H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitData,
                                recv: ActiveState::WaitHeaders,
                            }
                        };
                    }
                    H2StreamState::ReservedLocal => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        } else {
                            stream.state = H2StreamState::RemoteHalfClosed(ActiveState::WaitData);
                        }
                    }
                    H2StreamState::Open {
                        send: ActiveState::WaitHeaders,
                        recv,
                    } => {
                        stream.state = if eos {
                            H2StreamState::LocalHalfClosed(recv)
                        } else {
                            H2StreamState::Open {
                                send: ActiveState::WaitData,
                                recv,
                            }
                        };
                    }
                    // A header block after DATA is a trailer block.
                    H2StreamState::Open {
                        send: ActiveState::WaitData,
                        recv,
                    } => {
                        if !eos {
                            return FrameRecvState::Err(H2Error::ConnectionError(
                                ErrorCode::InternalError,
                            ));
                        }
                        stream.state = H2StreamState::LocalHalfClosed(recv);
                    }
                    H2StreamState::RemoteHalfClosed(ActiveState::WaitHeaders) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        } else {
                            stream.state =
                                H2StreamState::RemoteHalfClosed(ActiveState::WaitData);
                        }
                    }
                    H2StreamState::RemoteHalfClosed(ActiveState::WaitData) => {
                        if !eos {
                            return FrameRecvState::Err(H2Error::ConnectionError(
                                ErrorCode::InternalError,
                            ));
                        }
                        stream.state = H2StreamState::Closed(CloseReason::EndStream);
                        closed = true;
                    }
                    H2StreamState::Closed(_) => return FrameRecvState::Ignore,
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
            Some(StreamSlot::Closed(_)) => FrameRecvState::Ignore,
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    pub(crate) fn send_data_frame(&mut self, id: StreamId, eos: bool) -> FrameRecvState {
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => {
                match stream.state {
                    H2StreamState::Open {
                        send: ActiveState::WaitData,
                        recv,
                    } => {
                        if eos {
                            stream.state = H2StreamState::LocalHalfClosed(recv);
                        }
                    }
                    H2StreamState::RemoteHalfClosed(ActiveState::WaitData) => {
                        if eos {
                            stream.state = H2StreamState::Closed(CloseReason::EndStream);
                            closed = true;
                        }
                    }
                    H2StreamState::Closed(_) => return FrameRecvState::Ignore,
                    _ => {
                        return FrameRecvState::Err(H2Error::ConnectionError(
                            ErrorCode::ProtocolError,
                        ));
                    }
                }
                FrameRecvState::OK
            }
            Some(StreamSlot::Closed(_)) => FrameRecvState::Ignore,
            None => FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    pub(crate) fn send_local_reset(&mut self, id: StreamId) -> StreamEndState {
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => match stream.state {
                H2StreamState::Closed(_) => StreamEndState::Ignore,
                _ => {
                    stream.state = H2StreamState::Closed(CloseReason::LocalRst);
                    stream.queued.clear();
                    stream.trailers = None;
                    closed = true;
                    StreamEndState::OK
                }
            },
            Some(StreamSlot::Closed(_)) => StreamEndState::Ignore,
            None => StreamEndState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    pub(crate) fn recv_remote_reset(&mut self, id: StreamId) -> StreamEndState {
        if id > self.max_recv_id {
            return StreamEndState::Ignore;
        }
        let mut closed = false;
        let result = match self.map.get_mut(&id) {
            Some(StreamSlot::Active(stream)) => match stream.state {
                H2StreamState::Closed(_) => StreamEndState::Ignore,
                _ => {
                    stream.state = H2StreamState::Closed(CloseReason::RemoteRst);
                    stream.queued.clear();
                    stream.trailers = None;
                    closed = true;
                    StreamEndState::OK
                }
            },
            Some(StreamSlot::Closed(_)) => StreamEndState::Ignore,
            None => StreamEndState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        if closed {
            self.count_closed(id);
        }
        result
    }

    /// Finalizes a stream: replaces its slot with a closed record, keeps
    /// the accumulated response for the embedder when asked to, then
    /// advances the partition's `lowest_stream_id` over leading garbage.
    pub(crate) fn close(&mut self, id: StreamId, garbage: bool) {
        self.close_inner(id, garbage, None)
    }

    /// Like [`StreamSet::close`], recording the reset code the stream died
    /// with.
    pub(crate) fn close_with_reset(&mut self, id: StreamId, code: ErrorCode) {
        self.close_inner(id, false, Some(code))
    }

    fn close_inner(&mut self, id: StreamId, garbage: bool, reset: Option<ErrorCode>) {
        let slot = match self.map.remove(&id) {
            Some(slot) => slot,
            None => return,
        };
        let record = match slot {
            StreamSlot::Active(stream) => {
                if !matches!(stream.state, H2StreamState::Closed(_)) {
                    self.count_closed(id);
                }
                let stream = *stream;
                let keep = stream.store_response && !garbage;
                let record = if let Some(code) = reset {
                    if keep {
                        ClosedStream {
                            outcome: ClosedOutcome::Reset(code),
                            garbage: false,
                        }
                    } else {
                        ClosedStream {
                            outcome: ClosedOutcome::Nothing,
                            garbage: true,
                        }
                    }
                } else if keep {
                    match stream.resp_headers {
                        Some(headers) => ClosedStream {
                            outcome: ClosedOutcome::Response(StoredResponse {
                                headers,
                                body: stream.resp_body,
                                trailers: stream.resp_trailers,
                            }),
                            garbage: false,
                        },
                        None => ClosedStream {
                            outcome: ClosedOutcome::Nothing,
                            garbage: true,
                        },
                    }
                } else {
                    ClosedStream {
                        outcome: ClosedOutcome::Nothing,
                        garbage: true,
                    }
                };
                if let Some(notifier) = stream.notifier {
                    let _ = notifier.send(ConnEvent::StreamFinished(id));
                }
                record
            }
            StreamSlot::Closed(record) => record,
        };
        self.map.insert(id, StreamSlot::Closed(record));
        self.collect_garbage(id);
    }

    fn collect_garbage(&mut self, id: StreamId) {
        let is_mine = self.is_mine(id);
        let (mut lowest, next) = if is_mine {
            (self.mine.lowest, self.mine.next)
        } else {
            (self.theirs.lowest, self.theirs.next)
        };
        while lowest < next {
            match self.map.get(&lowest) {
                None => lowest += 2,
                Some(StreamSlot::Closed(record)) if record.garbage => {
                    self.map.remove(&lowest);
                    lowest += 2;
                }
                _ => break,
            }
        }
        if is_mine {
            self.mine.lowest = lowest;
        } else {
            self.theirs.lowest = lowest;
        }
        self.sync_partition_counters();
    }

    /// The `get_response` read side. Consuming a ready response or reset
    /// marks the record garbage so the partition floor can move past it.
    pub(crate) fn take_response(&mut self, id: StreamId) -> ResponseState {
        if !self.map.contains_key(&id) {
            return if id >= self.partition(id).next {
                ResponseState::NotReady
            } else {
                ResponseState::Garbage
            };
        }
        let state = match self.map.get_mut(&id) {
            Some(StreamSlot::Closed(record)) => {
                match std::mem::replace(&mut record.outcome, ClosedOutcome::Nothing) {
                    ClosedOutcome::Response(mut response) => {
                        record.garbage = true;
                        response.decode_body();
                        ResponseState::Ready(response)
                    }
                    ClosedOutcome::Reset(code) => {
                        record.garbage = true;
                        ResponseState::Reset(code)
                    }
                    ClosedOutcome::Nothing => ResponseState::Garbage,
                }
            }
            _ => ResponseState::NotReady,
        };
        if !matches!(state, ResponseState::NotReady) {
            self.collect_garbage(id);
        }
        state
    }

    pub(crate) fn store_resp_headers(&mut self, id: StreamId, fields: FieldBlock, trailer: bool) {
        if let Some(stream) = self.active_mut(id) {
            if stream.store_response {
                if trailer {
                    stream.resp_trailers = Some(fields);
                } else {
                    stream.resp_headers = Some(fields);
                }
            }
        }
    }

    pub(crate) fn store_resp_data(&mut self, id: StreamId, data: &[u8]) {
        if let Some(stream) = self.active_mut(id) {
            if stream.store_response {
                stream.resp_body.extend_from_slice(data);
            }
        }
    }

    /// Whether the receive side of `id` still waits for its leading header
    /// block. Decides HEADERS-vs-trailers routing.
    pub(crate) fn expects_leading_headers(&self, id: StreamId) -> bool {
        matches!(
            self.active(id).map(|stream| stream.state),
            Some(H2StreamState::Idle)
                | Some(H2StreamState::ReservedRemote)
                | Some(H2StreamState::Open {
                    recv: ActiveState::WaitHeaders,
                    ..
                })
                | Some(H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders))
        )
    }

    pub(crate) fn queue_body(&mut self, id: StreamId, bytes: &[u8], end_stream: bool) {
        if let Some(stream) = self.active_mut(id) {
            stream.queued.extend_from_slice(bytes);
            if end_stream {
                stream.body_complete = true;
            }
        }
    }

    pub(crate) fn queue_trailers(&mut self, id: StreamId, trailers: FieldBlock) {
        if let Some(stream) = self.active_mut(id) {
            stream.trailers = Some(trailers);
            stream.body_complete = true;
        }
    }

    /// The send scheduler. Walks peer-initiated then locally-initiated
    /// active streams in id order, emitting DATA frames bounded by
    /// `min(connection credit, stream credit)` and the peer frame size
    /// cap. The final frame of a drained body carries END_STREAM unless
    /// trailers are deferred; drained trailers follow immediately as a
    /// HEADERS frame.
    pub(crate) fn send_what_we_can(&mut self, target: ScheduleTarget) -> SchedulerOutcome {
        let mut outcome = SchedulerOutcome::default();
        let ids: Vec<StreamId> = match target {
            ScheduleTarget::One(id) => vec![id],
            ScheduleTarget::All => {
                let mut theirs: Vec<StreamId> = Vec::new();
                let mut mine: Vec<StreamId> = Vec::new();
                for (&id, slot) in self.map.iter() {
                    if matches!(slot, StreamSlot::Active(_)) {
                        if self.is_mine(id) {
                            mine.push(id);
                        } else {
                            theirs.push(id);
                        }
                    }
                }
                theirs.sort_unstable();
                mine.sort_unstable();
                theirs.extend(mine);
                theirs
            }
        };
        for id in ids {
            if matches!(target, ScheduleTarget::All) && self.conn_send.available() == 0 {
                break;
            }
            self.schedule_stream(id, &mut outcome);
        }
        self.sync_conn_window();
        outcome
    }

    fn schedule_stream(&mut self, id: StreamId, outcome: &mut SchedulerOutcome) {
        loop {
            let conn_available = self.conn_send.available();
            let max_frame_size = self.max_frame_size as usize;
            let step = match self.map.get_mut(&id) {
                Some(StreamSlot::Active(stream)) => {
                    let sendable = matches!(
                        stream.state,
                        H2StreamState::Open {
                            send: ActiveState::WaitData,
                            ..
                        } | H2StreamState::RemoteHalfClosed(ActiveState::WaitData)
                    );
                    if !sendable {
                        ScheduleStep::Done
                    } else if stream.queued.is_empty() {
                        if !stream.body_complete {
                            ScheduleStep::Done
                        } else {
                            match stream.trailers.take() {
                                Some(trailers) => ScheduleStep::Trailers(trailers),
                                None => ScheduleStep::EmptyEnd,
                            }
                        }
                    } else {
                        let window =
                            stream.send_credit.available().min(conn_available) as usize;
                        if window == 0 {
                            ScheduleStep::Done
                        } else {
                            let take = window.min(stream.queued.len()).min(max_frame_size);
                            let chunk: Vec<u8> = stream.queued.drain(..take).collect();
                            let drained = stream.queued.is_empty();
                            let eos =
                                drained && stream.body_complete && stream.trailers.is_none();
                            stream.send_credit.spend(take as u32);
                            ScheduleStep::Chunk { chunk, eos, drained }
                        }
                    }
                }
                _ => ScheduleStep::Done,
            };
            match step {
                ScheduleStep::Done => return,
                ScheduleStep::Trailers(trailers) => {
                    outcome.frames.push(Frame::Headers {
                        stream: id,
                        fields: trailers,
                        end_stream: true,
                    });
                    if self.mark_sent_headers(id, true) {
                        outcome.finished.push(id);
                    }
                    return;
                }
                ScheduleStep::EmptyEnd => {
                    // The body finished on an earlier frame boundary; close
                    // with an empty DATA frame.
                    outcome.frames.push(Frame::Data {
                        stream: id,
                        payload: Vec::new(),
                        end_stream: true,
                    });
                    if self.mark_sent_data(id, true) {
                        outcome.finished.push(id);
                    }
                    return;
                }
                ScheduleStep::Chunk { chunk, eos, drained } => {
                    self.conn_send.spend(chunk.len() as u32);
                    outcome.frames.push(Frame::Data {
                        stream: id,
                        payload: chunk,
                        end_stream: eos,
                    });
                    if self.mark_sent_data(id, eos) {
                        outcome.finished.push(id);
                        return;
                    }
                    if eos {
                        return;
                    }
                    if drained {
                        // Deferred trailers are emitted on the next turn.
                        continue;
                    }
                }
            }
        }
    }

    fn mark_sent_data(&mut self, id: StreamId, eos: bool) -> bool {
        let _ = self.send_data_frame(id, eos);
        matches!(
            self.active(id).map(|stream| stream.state),
            Some(H2StreamState::Closed(_))
        )
    }

    fn mark_sent_headers(&mut self, id: StreamId, eos: bool) -> bool {
        let _ = self.send_headers_frame(id, eos);
        matches!(
            self.active(id).map(|stream| stream.state),
            Some(H2StreamState::Closed(_))
        )
    }

    /// Applies a peer INITIAL_WINDOW_SIZE change to every active stream's
    /// send credit.
    pub(crate) fn apply_send_initial_window_size(&mut self, size: u32) -> Result<(), H2Error> {
        let delta = size as i64 - self.send_initial_window as i64;
        self.send_initial_window = size;
        for slot in self.map.values_mut() {
            if let StreamSlot::Active(stream) = slot {
                if !stream.send_credit.shift(delta) {
                    return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
                }
            }
        }
        Ok(())
    }

    /// Applies our acknowledged INITIAL_WINDOW_SIZE to every active
    /// stream's receive credit. The peer adjusts its own view, so the
    /// grants shift without a WINDOW_UPDATE.
    pub(crate) fn apply_recv_initial_window_size(&mut self, size: u32) {
        self.recv_initial_window = size;
        for slot in self.map.values_mut() {
            if let StreamSlot::Active(stream) = slot {
                stream.recv_credit.sync_initial(size);
            }
        }
    }

    /// Sets the cap the peer's SETTINGS place on streams we initiate.
    pub(crate) fn update_their_max_active(&mut self, num: u32) {
        self.mine.max_active = Some(num);
    }

    /// Sets the cap our acknowledged SETTINGS place on peer streams.
    pub(crate) fn update_my_max_active(&mut self, num: u32) {
        self.theirs.max_active = Some(num);
    }

    pub(crate) fn increase_conn_send_window(&mut self, size: u32) -> Result<(), H2Error> {
        let granted = self.conn_send.grant(size);
        self.sync_conn_window();
        if granted {
            Ok(())
        } else {
            Err(H2Error::ConnectionError(ErrorCode::FlowControlError))
        }
    }

    pub(crate) fn increase_stream_send_window(
        &mut self,
        id: StreamId,
        size: u32,
    ) -> Result<(), H2Error> {
        match self.active_mut(id) {
            Some(stream) => {
                if stream.send_credit.grant(size) {
                    Ok(())
                } else {
                    Err(H2Error::StreamError(id, ErrorCode::FlowControlError))
                }
            }
            None => Ok(()),
        }
    }

    /// Accounts an inbound DATA payload against the connection receive
    /// credit, emitting a WINDOW_UPDATE when automatic flow control says
    /// one is due.
    pub(crate) fn release_conn_recv_window(
        &mut self,
        size: u32,
        auto: bool,
    ) -> Result<Option<Frame>, H2Error> {
        if !self.conn_recv.consume(size) {
            return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
        }
        if auto {
            Ok(self
                .conn_recv
                .refill()
                .map(|increment| Frame::WindowUpdate {
                    stream: 0,
                    increment,
                }))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn release_stream_recv_window(
        &mut self,
        id: StreamId,
        size: u32,
        auto: bool,
    ) -> Result<Option<Frame>, H2Error> {
        let stream = match self.active_mut(id) {
            Some(stream) => stream,
            None => return Ok(None),
        };
        if !stream.recv_credit.consume(size) {
            return Err(H2Error::StreamError(id, ErrorCode::FlowControlError));
        }
        if auto {
            let receiving = matches!(
                stream.state,
                H2StreamState::Idle
                    | H2StreamState::Open {
                        recv: ActiveState::WaitData,
                        ..
                    }
                    | H2StreamState::LocalHalfClosed(ActiveState::WaitData)
            );
            if receiving {
                return Ok(stream
                    .recv_credit
                    .refill()
                    .map(|increment| Frame::WindowUpdate {
                        stream: id,
                        increment,
                    }));
            }
        }
        Ok(None)
    }

    /// Manually grows the connection receive credit, for
    /// `client_flow_control = manual`.
    pub(crate) fn manual_conn_window_release(&mut self, size: u32) {
        self.conn_recv.advertise(size);
    }

    /// Reconfigures the connection receive window, returning the stream-0
    /// WINDOW_UPDATE that advertises any growth.
    pub(crate) fn conn_recv_setup(&mut self, size: u32) -> Option<Frame> {
        self.conn_recv.set_target(size);
        self.conn_recv.refill().map(|increment| Frame::WindowUpdate {
            stream: 0,
            increment,
        })
    }

    /// Streams above a peer GOAWAY's last id: closed as refused, returned
    /// for notification.
    pub(crate) fn streams_above(&mut self, last_stream_id: StreamId) -> Vec<StreamId> {
        let mut ids = vec![];
        let mut newly_closed = vec![];
        for (&id, slot) in self.map.iter_mut() {
            if id <= last_stream_id {
                continue;
            }
            if let StreamSlot::Active(stream) = slot {
                if !matches!(stream.state, H2StreamState::Closed(_)) {
                    newly_closed.push(id);
                }
                stream.state = H2StreamState::Closed(CloseReason::RemoteGoAway);
                stream.queued.clear();
                stream.trailers = None;
                ids.push(id);
            }
        }
        for id in newly_closed {
            self.count_closed(id);
        }
        ids.sort_unstable();
        ids
    }

    /// Every stream not yet closed: closed for local GOAWAY, returned for
    /// notification.
    pub(crate) fn all_unclosed(&mut self) -> Vec<StreamId> {
        let mut ids = vec![];
        let mut newly_closed = vec![];
        for (&id, slot) in self.map.iter_mut() {
            if let StreamSlot::Active(stream) = slot {
                if !matches!(stream.state, H2StreamState::Closed(_)) {
                    newly_closed.push(id);
                }
                stream.state = H2StreamState::Closed(CloseReason::LocalGoAway);
                stream.queued.clear();
                stream.trailers = None;
                ids.push(id);
            }
        }
        for id in newly_closed {
            self.count_closed(id);
        }
        ids.sort_unstable();
        ids
    }

    /// Whether every materialized stream is closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.map.values().all(|slot| match slot {
            StreamSlot::Active(stream) => matches!(stream.state, H2StreamState::Closed(_)),
            StreamSlot::Closed(_) => true,
        })
    }

    #[cfg(test)]
    pub(crate) fn state_of(&self, id: StreamId) -> Option<H2StreamState> {
        self.active(id).map(|stream| stream.state)
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self, mine: bool) -> u32 {
        if mine {
            self.mine.active_count
        } else {
            self.theirs.active_count
        }
    }

    #[cfg(test)]
    pub(crate) fn lowest(&self, mine: bool) -> StreamId {
        if mine {
            self.mine.lowest
        } else {
            self.theirs.lowest
        }
    }
}

#[cfg(test)]
mod ut_streams {
    use super::*;

    fn client_set() -> StreamSet {
        StreamSet::new(Role::Client, 65535, 65535, 65535)
    }

    fn server_set() -> StreamSet {
        StreamSet::new(Role::Server, 65535, 65535, 65535)
    }

    fn open_for_send(set: &mut StreamSet) -> StreamId {
        let id = set.new_stream(None, None, true).unwrap();
        assert_eq!(set.send_headers_frame(id, false), FrameRecvState::OK);
        id
    }

    fn data_sizes(outcome: &SchedulerOutcome) -> Vec<usize> {
        outcome
            .frames
            .iter()
            .map(|frame| match frame {
                Frame::Data { payload, .. } => payload.len(),
                _ => panic!("expected DATA"),
            })
            .collect()
    }

    fn ends_stream(frame: &Frame) -> bool {
        matches!(
            frame,
            Frame::Data {
                end_stream: true, ..
            } | Frame::Headers {
                end_stream: true,
                ..
            }
        )
    }

    /// UT test case for stream id parity.
    ///
    /// # Brief
    /// 1. Allocates streams on a client and a server set.
    /// 2. Checks clients allocate odd ids and servers even ids, rising by
    ///    two.
    #[test]
    fn ut_streams_id_parity() {
        let mut client = client_set();
        assert_eq!(client.new_stream(None, None, true).unwrap(), 1);
        assert_eq!(client.new_stream(None, None, true).unwrap(), 3);
        assert_eq!(client.new_stream(None, None, true).unwrap(), 5);

        let mut server = server_set();
        assert_eq!(server.new_stream(None, None, false).unwrap(), 2);
        assert_eq!(server.new_stream(None, None, false).unwrap(), 4);
    }

    /// UT test case for the concurrency cap.
    ///
    /// # Brief
    /// 1. Caps locally initiated streams at two and opens three.
    /// 2. Checks the third fails with REFUSED_STREAM and no id is burned.
    #[test]
    fn ut_streams_concurrency_cap() {
        let mut set = client_set();
        set.update_their_max_active(2);
        assert_eq!(set.new_stream(None, None, true).unwrap(), 1);
        assert_eq!(set.new_stream(None, None, true).unwrap(), 3);
        assert_eq!(
            set.new_stream(None, None, true),
            Err(H2Error::StreamError(0, ErrorCode::RefusedStream))
        );
        assert_eq!(set.counters().snapshot().my_next_stream_id, 5);
    }

    /// UT test case for the implicit stream states.
    ///
    /// # Brief
    /// 1. Opens streams 1 and 3 and closes stream 1 as garbage.
    /// 2. Checks `get` reports materialized, implicitly idle and implicitly
    ///    closed ids correctly.
    #[test]
    fn ut_streams_implicit_states() {
        let mut set = client_set();
        let first = set.new_stream(None, None, true).unwrap();
        let second = set.new_stream(None, None, true).unwrap();
        assert_eq!(set.get(first), StreamKind::Active);
        assert_eq!(set.get(second), StreamKind::Active);
        assert_eq!(set.get(5), StreamKind::Idle);
        assert_eq!(set.get(101), StreamKind::Idle);

        set.close(first, true);
        assert_eq!(set.get(first), StreamKind::Closed);
    }

    /// UT test case for garbage collection of the partition floor.
    ///
    /// # Brief
    /// 1. Opens three streams and closes them in mixed order, garbage
    ///    first.
    /// 2. Checks `lowest_stream_id` only advances over leading garbage
    ///    records.
    #[test]
    fn ut_streams_garbage_collection() {
        let mut set = client_set();
        let s1 = set.new_stream(None, None, true).unwrap();
        let s3 = set.new_stream(None, None, true).unwrap();
        let s5 = set.new_stream(None, None, true).unwrap();
        assert_eq!(set.lowest(true), 1);

        // Closing the middle stream as garbage cannot move the floor.
        set.close(s3, true);
        assert_eq!(set.lowest(true), 1);

        // Closing the first stream frees both leading garbage records.
        set.close(s1, true);
        assert_eq!(set.lowest(true), 5);

        set.close(s5, true);
        assert_eq!(set.lowest(true), 7);
        assert_eq!(set.get(s1), StreamKind::Closed);
        assert_eq!(set.get(s5), StreamKind::Closed);
    }

    /// UT test case for non-garbage closed records blocking the floor.
    ///
    /// # Brief
    /// 1. Completes a stream whose response is stored.
    /// 2. Checks the floor waits until `take_response` consumes it.
    #[test]
    fn ut_streams_response_blocks_gc() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert_eq!(set.recv_headers(id, false), FrameRecvState::OK);
        set.store_resp_headers(id, FieldBlock::response(200), false);
        set.store_resp_data(id, b"body");
        set.close(id, false);
        assert_eq!(set.lowest(true), id);

        match set.take_response(id) {
            ResponseState::Ready(response) => {
                assert_eq!(response.body, b"body");
                assert_eq!(response.headers.status(), Some("200"));
            }
            _ => panic!("expected a ready response"),
        }
        assert_eq!(set.lowest(true), id + 2);
    }

    /// UT test case for reset outcomes surviving until consumed.
    ///
    /// # Brief
    /// 1. Resets a stream remotely and finalizes it with the reset code.
    /// 2. Checks `take_response` reports the reset, then the record is
    ///    collectable.
    #[test]
    fn ut_streams_reset_outcome() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert_eq!(set.recv_remote_reset(id), StreamEndState::OK);
        set.close_with_reset(id, ErrorCode::Cancel);
        match set.take_response(id) {
            ResponseState::Reset(code) => assert_eq!(code, ErrorCode::Cancel),
            _ => panic!("expected a reset outcome"),
        }
        assert_eq!(set.lowest(true), id + 2);
    }

    /// UT test case for the active count invariant.
    ///
    /// # Brief
    /// 1. Walks a stream through open, half-closed and closed.
    /// 2. Checks the partition's active count matches materialized active
    ///    records at each step.
    #[test]
    fn ut_streams_active_count() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert_eq!(set.active_count(true), 1);
        assert_eq!(set.send_data_frame(id, true), FrameRecvState::OK);
        assert_eq!(set.active_count(true), 1);
        assert_eq!(set.recv_headers(id, false), FrameRecvState::OK);
        assert_eq!(set.recv_data(id, true), FrameRecvState::OK);
        assert_eq!(set.active_count(true), 0);
        assert_eq!(
            set.state_of(id),
            Some(H2StreamState::Closed(CloseReason::EndStream))
        );
    }

    /// UT test case for receive transitions on illegal states.
    ///
    /// # Brief
    /// 1. Sends DATA before HEADERS and a non-final second header block.
    /// 2. Checks the documented stream errors come back.
    #[test]
    fn ut_streams_recv_transitions() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert_eq!(
            set.recv_data(id, false),
            FrameRecvState::Err(H2Error::StreamError(id, ErrorCode::ProtocolError))
        );
        assert_eq!(set.recv_headers(id, false), FrameRecvState::OK);
        // A second block that is not a final trailer block is malformed.
        assert_eq!(
            set.recv_headers(id, false),
            FrameRecvState::Err(H2Error::StreamError(id, ErrorCode::ProtocolError))
        );
        assert_eq!(set.recv_headers(id, true), FrameRecvState::OK);
    }

    /// UT test case for frames on idle and settled ids.
    ///
    /// # Brief
    /// 1. Receives on an id above the partition's next and one below it.
    /// 2. Checks the idle id raises a connection error, the settled one a
    ///    STREAM_CLOSED stream error.
    #[test]
    fn ut_streams_recv_on_missing() {
        let mut set = server_set();
        assert_eq!(
            set.recv_data(5, false),
            FrameRecvState::Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
        set.accept_peer_stream(1, None, None, false).unwrap();
        set.close(1, true);
        assert_eq!(
            set.recv_data(1, false),
            FrameRecvState::Err(H2Error::StreamError(1, ErrorCode::StreamClosed))
        );
    }

    /// UT test case for local and remote resets.
    ///
    /// # Brief
    /// 1. Resets one stream locally, another remotely, and repeats.
    /// 2. Checks repeats are ignored and counts decrement once.
    #[test]
    fn ut_streams_resets() {
        let mut set = client_set();
        let first = open_for_send(&mut set);
        let second = open_for_send(&mut set);
        assert_eq!(set.active_count(true), 2);

        assert_eq!(set.send_local_reset(first), StreamEndState::OK);
        assert_eq!(set.send_local_reset(first), StreamEndState::Ignore);
        assert_eq!(set.recv_remote_reset(second), StreamEndState::OK);
        assert_eq!(set.recv_remote_reset(second), StreamEndState::Ignore);
        assert_eq!(set.active_count(true), 0);
    }

    /// UT test case for the scheduler's credit split.
    ///
    /// # Brief
    /// 1. Queues 100000 bytes with end-of-stream on one stream, credit at
    ///    65535 both levels and frame cap 16384.
    /// 2. Checks exactly four DATA frames totalling 65535 bytes come out
    ///    and the stream blocks without END_STREAM.
    /// 3. Grants both levels 34465 more bytes and checks the remaining
    ///    three frames, the last with END_STREAM.
    #[test]
    fn ut_streams_scheduler_flow_control_split() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        set.queue_body(id, &[7u8; 100000], true);

        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        assert_eq!(data_sizes(&outcome), [16384, 16384, 16384, 16383]);
        assert!(outcome.frames.iter().all(|f| !ends_stream(f)));
        assert!(outcome.finished.is_empty());

        // Nothing more can move until both windows reopen.
        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        assert!(outcome.frames.is_empty());

        set.increase_conn_send_window(34465).unwrap();
        set.increase_stream_send_window(id, 34465).unwrap();
        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        assert_eq!(data_sizes(&outcome), [16384, 16384, 1697]);
        assert!(!ends_stream(&outcome.frames[0]));
        assert!(!ends_stream(&outcome.frames[1]));
        assert!(ends_stream(&outcome.frames[2]));
    }

    /// UT test case for deferred trailers.
    ///
    /// # Brief
    /// 1. Queues a body and trailers on one stream.
    /// 2. Checks the DATA frame carries no END_STREAM and a trailing
    ///    HEADERS frame with END_STREAM follows once the body drains.
    #[test]
    fn ut_streams_scheduler_trailers() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        set.queue_body(id, &[1u8; 100], true);
        let mut trailers = FieldBlock::new();
        trailers.push("grpc-status", "0");
        set.queue_trailers(id, trailers);

        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        assert_eq!(outcome.frames.len(), 2);
        match &outcome.frames[0] {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => {
                assert_eq!(payload.len(), 100);
                assert!(!end_stream);
            }
            _ => panic!("expected DATA"),
        }
        match &outcome.frames[1] {
            Frame::Headers {
                fields, end_stream, ..
            } => {
                assert!(*end_stream);
                assert_eq!(fields.get("grpc-status"), Some("0"));
            }
            _ => panic!("expected trailing HEADERS"),
        }
        assert_eq!(
            set.state_of(id),
            Some(H2StreamState::LocalHalfClosed(ActiveState::WaitHeaders))
        );
    }

    /// UT test case for the connection-level sweep order.
    ///
    /// # Brief
    /// 1. Opens responses on peer streams 1 and 3 with the connection
    ///    credit covering only part of the total.
    /// 2. Checks peer streams are served in id order and the sweep stops
    ///    once the connection credit empties.
    #[test]
    fn ut_streams_scheduler_sweep_order() {
        let mut set = StreamSet::new(Role::Server, 65535, 65535, 150);
        set.accept_peer_stream(1, None, None, false).unwrap();
        set.accept_peer_stream(3, None, None, false).unwrap();
        assert_eq!(set.recv_headers(1, false), FrameRecvState::OK);
        assert_eq!(set.recv_headers(3, false), FrameRecvState::OK);
        assert_eq!(set.send_headers_frame(1, false), FrameRecvState::OK);
        assert_eq!(set.send_headers_frame(3, false), FrameRecvState::OK);
        set.queue_body(1, &[1u8; 100], true);
        set.queue_body(3, &[3u8; 100], true);

        let outcome = set.send_what_we_can(ScheduleTarget::All);
        assert_eq!(outcome.frames.len(), 2);
        match &outcome.frames[0] {
            Frame::Data {
                stream, end_stream, ..
            } => {
                assert_eq!(*stream, 1);
                assert!(*end_stream);
            }
            _ => panic!("expected DATA"),
        }
        match &outcome.frames[1] {
            Frame::Data {
                stream,
                payload,
                end_stream,
            } => {
                assert_eq!(*stream, 3);
                assert_eq!(payload.len(), 50);
                assert!(!end_stream);
            }
            _ => panic!("expected DATA"),
        }
    }

    /// UT test case for initial window size changes.
    ///
    /// # Brief
    /// 1. Raises and lowers the peer initial window size.
    /// 2. Checks every active send credit shifts by the delta.
    #[test]
    fn ut_streams_apply_send_initial_window_size() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        set.queue_body(id, &[0u8; 70000], false);

        assert!(set.apply_send_initial_window_size(70000).is_ok());
        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        // The connection credit still caps the stream at 65535.
        assert_eq!(data_sizes(&outcome).iter().sum::<usize>(), 65535);

        assert!(set.apply_send_initial_window_size(0).is_ok());
        let outcome = set.send_what_we_can(ScheduleTarget::One(id));
        assert!(outcome.frames.is_empty());
    }

    /// UT test case for receive credit accounting.
    ///
    /// # Brief
    /// 1. Releases data against the connection and stream receive credit.
    /// 2. Checks an over-limit release reports the documented
    ///    FLOW_CONTROL_ERROR scope.
    #[test]
    fn ut_streams_release_recv_windows() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert!(set.release_conn_recv_window(1000, true).unwrap().is_none());
        assert!(set
            .release_stream_recv_window(id, 1000, true)
            .unwrap()
            .is_none());
        assert_eq!(
            set.release_conn_recv_window(65535, true),
            Err(H2Error::ConnectionError(ErrorCode::FlowControlError))
        );
        assert_eq!(
            set.release_stream_recv_window(id, 65535, true),
            Err(H2Error::StreamError(id, ErrorCode::FlowControlError))
        );
    }

    /// UT test case for the automatic receive refill.
    ///
    /// # Brief
    /// 1. Consumes more than half the stream's receive credit.
    /// 2. Checks a WINDOW_UPDATE for the consumed share is produced.
    #[test]
    fn ut_streams_auto_refill() {
        let mut set = client_set();
        let id = open_for_send(&mut set);
        assert_eq!(set.recv_headers(id, false), FrameRecvState::OK);
        let update = set
            .release_stream_recv_window(id, 40000, true)
            .unwrap()
            .expect("refill due");
        match update {
            Frame::WindowUpdate { stream, increment } => {
                assert_eq!(stream, id);
                assert_eq!(increment, 40000);
            }
            _ => panic!("expected WINDOW_UPDATE"),
        }
    }

    /// UT test case for GOAWAY sweeps.
    ///
    /// # Brief
    /// 1. Opens streams 1, 3 and 5 and applies a peer GOAWAY with last id
    ///    3.
    /// 2. Checks only stream 5 is swept and the others stay live, then a
    ///    local sweep closes the rest.
    #[test]
    fn ut_streams_goaway_sweep() {
        let mut set = client_set();
        let s1 = open_for_send(&mut set);
        let s3 = open_for_send(&mut set);
        let s5 = open_for_send(&mut set);
        let swept = set.streams_above(3);
        assert_eq!(swept, vec![s5]);
        assert!(matches!(
            set.state_of(s5),
            Some(H2StreamState::Closed(CloseReason::RemoteGoAway))
        ));
        assert!(!matches!(set.state_of(s1), Some(H2StreamState::Closed(_))));
        assert!(!matches!(set.state_of(s3), Some(H2StreamState::Closed(_))));
        assert_eq!(set.active_count(true), 2);

        let rest = set.all_unclosed();
        assert_eq!(rest, vec![s1, s3, s5]);
        assert_eq!(set.active_count(true), 0);
        assert!(set.is_closed());
    }

    /// UT test case for push reservations.
    ///
    /// # Brief
    /// 1. Reserves a promised even id on a client set.
    /// 2. Checks parity violations and stale ids are rejected.
    #[test]
    fn ut_streams_reserve_remote() {
        let mut set = client_set();
        assert!(set.reserve_remote(2, None, true).is_ok());
        assert_eq!(set.get(2), StreamKind::Active);
        // Promised ids must carry peer parity.
        assert_eq!(
            set.reserve_remote(7, None, true),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
        // Reusing an id at or below the highest promised one is stale.
        assert_eq!(
            set.reserve_remote(2, None, true),
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );

        assert_eq!(set.recv_headers(2, false), FrameRecvState::OK);
        assert_eq!(
            set.state_of(2),
            Some(H2StreamState::LocalHalfClosed(ActiveState::WaitData))
        );
    }
}
