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

//! `h2mux` is an HTTP/2 endpoint runtime: the per-connection protocol
//! engine that multiplexes logical streams over a single reliable byte
//! transport according to [RFC 7540].
//!
//! One adopted transport runs three tasks — a frame reader, a frame writer
//! and a connection manager owning the stream set — plus one handler task
//! per dispatched stream. The crate covers the connection state machine
//! (preface, settings negotiation, GOAWAY), the stream registry with its
//! implicit idle/closed states, dual-level flow control with a send
//! scheduler, HPACK context management and the HEADERS/CONTINUATION
//! reassembly discipline. Transport setup (TCP/TLS) and request semantics
//! live outside; the transport only needs to be an async byte duplex with
//! a [`ConnInfo`] answer.
//!
//! [RFC 7540]: https://httpwg.org/specs/rfc7540.html

mod body;
mod codec;
mod config;
mod error;
mod fields;
mod frame;
mod hpack;
mod mux;

pub use body::{ResponseState, StoredResponse};
pub use codec::{FrameDecoder, FrameEncoder, DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_MAX_FRAME_SIZE};
pub use config::{ConnConfig, FlowControlMode, H2Config};
pub use error::{DispatchError, ErrorCode, H2Error};
pub use fields::FieldBlock;
pub use frame::{Frame, SettingsUpdate, StreamId};
pub use hpack::{HpackDecodeContext, HpackEncodeContext};
pub use mux::{
    start_server, ConnDetail, ConnEvent, ConnInfo, Connection, Role, SendOptions, StreamEvent,
    StreamHandle, StreamHandler, StreamKind, StreamsSnapshot, CONNECTION_PREFACE,
    MAX_FLOW_CONTROL_WINDOW,
};
