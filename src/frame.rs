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

//! HTTP/2 frame model.
//!
//! One variant per RFC 7540 frame type, carrying already-interpreted
//! content: flag bits arrive here as booleans, padding is gone, and a
//! header block is a decoded [`FieldBlock`]. The wire shape — the 9-byte
//! header, flag octets, CONTINUATION splitting — lives entirely in the
//! codec; nothing outside it ever sees raw frame bytes.

use crate::fields::FieldBlock;

/// Stream identifier: an unsigned 31-bit integer. Id 0 addresses the
/// connection itself.
pub type StreamId = u32;

const ID_HEADER_TABLE_SIZE: u16 = 0x1;
const ID_ENABLE_PUSH: u16 = 0x2;
const ID_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const ID_INITIAL_WINDOW_SIZE: u16 = 0x4;
const ID_MAX_FRAME_SIZE: u16 = 0x5;
const ID_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// A decoded HTTP/2 frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A chunk of body bytes on one stream.
    Data {
        stream: StreamId,
        payload: Vec<u8>,
        end_stream: bool,
    },
    /// A complete header block, reassembled across CONTINUATION frames
    /// and run through HPACK by the codec. Covers both leading headers
    /// and trailers.
    Headers {
        stream: StreamId,
        fields: FieldBlock,
        end_stream: bool,
    },
    /// Sender-advised priority. Parsed for wire compatibility, never
    /// acted upon.
    Priority {
        stream: StreamId,
        dependency: StreamId,
        weight: u8,
        exclusive: bool,
    },
    /// Immediate termination of one stream.
    RstStream { stream: StreamId, code: u32 },
    /// The peer's connection parameters. Values apply from our ACK
    /// onward.
    Settings(SettingsUpdate),
    /// Acknowledgement of a SETTINGS frame. On the wire this is empty;
    /// internally an outbound ACK carries the acknowledged values so the
    /// writer can retune the encoder as the ACK passes it.
    SettingsAck(SettingsUpdate),
    /// Reservation of a peer-parity stream for a pushed response.
    PushPromise {
        stream: StreamId,
        promised: StreamId,
        fields: FieldBlock,
    },
    /// Liveness probe; eight opaque bytes echoed back with `ack` set.
    Ping { payload: [u8; 8], ack: bool },
    /// Connection shutdown: the highest stream id the sender will still
    /// process, and why.
    GoAway {
        last_stream: StreamId,
        code: u32,
        debug: Vec<u8>,
    },
    /// Flow-control credit for one stream, or for the connection when
    /// `stream` is 0.
    WindowUpdate { stream: StreamId, increment: u32 },
}

impl Frame {
    /// The stream this frame addresses; 0 for connection-scoped frames.
    pub fn stream(&self) -> StreamId {
        match self {
            Frame::Data { stream, .. }
            | Frame::Headers { stream, .. }
            | Frame::Priority { stream, .. }
            | Frame::RstStream { stream, .. }
            | Frame::PushPromise { stream, .. }
            | Frame::WindowUpdate { stream, .. } => *stream,
            Frame::Settings(_)
            | Frame::SettingsAck(_)
            | Frame::Ping { .. }
            | Frame::GoAway { .. } => 0,
        }
    }
}

/// A set of SETTINGS parameters; unset fields are absent from the frame.
///
/// # Examples
///
/// ```
/// use h2mux::SettingsUpdate;
///
/// let update = SettingsUpdate {
///     max_concurrent_streams: Some(100),
///     initial_window_size: Some(65535),
///     ..SettingsUpdate::default()
/// };
/// assert_eq!(update.entries().len(), 2);
/// ```
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// SETTINGS_HEADER_TABLE_SIZE
    pub header_table_size: Option<u32>,
    /// SETTINGS_ENABLE_PUSH
    pub enable_push: Option<bool>,
    /// SETTINGS_MAX_CONCURRENT_STREAMS
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE
    pub initial_window_size: Option<u32>,
    /// SETTINGS_MAX_FRAME_SIZE
    pub max_frame_size: Option<u32>,
    /// SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size: Option<u32>,
}

impl SettingsUpdate {
    /// Creates an update with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no parameter is set.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// The wire representation: `(identifier, value)` pairs for every set
    /// parameter, in identifier order.
    pub fn entries(&self) -> Vec<(u16, u32)> {
        let mut entries = Vec::new();
        if let Some(size) = self.header_table_size {
            entries.push((ID_HEADER_TABLE_SIZE, size));
        }
        if let Some(enable) = self.enable_push {
            entries.push((ID_ENABLE_PUSH, enable as u32));
        }
        if let Some(num) = self.max_concurrent_streams {
            entries.push((ID_MAX_CONCURRENT_STREAMS, num));
        }
        if let Some(size) = self.initial_window_size {
            entries.push((ID_INITIAL_WINDOW_SIZE, size));
        }
        if let Some(size) = self.max_frame_size {
            entries.push((ID_MAX_FRAME_SIZE, size));
        }
        if let Some(size) = self.max_header_list_size {
            entries.push((ID_MAX_HEADER_LIST_SIZE, size));
        }
        entries
    }
}
