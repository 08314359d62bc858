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

//! The per-connection runtime.
//!
//! One connection runs three long-lived tasks over one transport:
//!
//! - [`SendData`] drains the frame channel onto the socket write half.
//! - [`RecvData`] pumps the socket read half through the frame decoder.
//! - [`ConnManager`] owns the stream set and routes every event.
//!
//! Each locally-dispatched stream additionally runs one handler task fed
//! over a bounded channel.
//!
//! [`SendData`]: writer::SendData
//! [`RecvData`]: reader::RecvData
//! [`ConnManager`]: manager::ConnManager

mod conn;
mod credit;
mod manager;
mod reader;
mod settings;
mod streams;
mod writer;

pub use conn::{
    start_server, ConnDetail, ConnInfo, Connection, SendOptions, StreamHandle, StreamHandler,
};
pub use credit::MAX_FLOW_CONTROL_WINDOW;
pub use streams::{Role, StreamKind, StreamsSnapshot};

use crate::error::ErrorCode;
use crate::fields::FieldBlock;
use crate::frame::StreamId;

/// Events delivered to a stream's handler task.
pub enum StreamEvent {
    /// A decoded header block opened or continued the exchange.
    Headers {
        fields: FieldBlock,
        end_stream: bool,
    },
    /// A DATA frame arrived.
    Data { data: Vec<u8>, end_stream: bool },
    /// A trailing header block arrived.
    Trailers(FieldBlock),
    /// The peer promised a pushed stream associated with this one.
    Promise {
        promised_id: StreamId,
        fields: FieldBlock,
    },
    /// The peer reset the stream.
    Reset(ErrorCode),
}

/// Events delivered to a connection or stream notifier.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnEvent {
    /// A stream reached its terminal state.
    StreamFinished(StreamId),
    /// A PING we sent was acknowledged.
    Pong,
    /// The peer told us to go away, or we did.
    GoingAway(ErrorCode),
}

/// The 24-byte client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
