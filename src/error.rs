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

//! Error types.
//!
//! HTTP/2 distinguishes two failure scopes: a stream error tears down one
//! stream with RST_STREAM, a connection error tears down everything with
//! GOAWAY. Both carry one of the fourteen RFC 7540 section 7 codes.
//! [`DispatchError`] adds the runtime-level ways a connection task can
//! end: transport failures, closed channels and a rejected preface.

use std::fmt;

use crate::frame::StreamId;

/// The fourteen error codes of RFC 7540 section 7, in wire order.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ErrorCode {
    /// 0x0, graceful shutdown.
    NoError,
    /// 0x1, a protocol rule was broken.
    ProtocolError,
    /// 0x2, the endpoint failed internally.
    InternalError,
    /// 0x3, flow control was violated.
    FlowControlError,
    /// 0x4, SETTINGS went unacknowledged too long.
    SettingsTimeout,
    /// 0x5, a frame arrived on a half-closed stream.
    StreamClosed,
    /// 0x6, a frame had an illegal size.
    FrameSizeError,
    /// 0x7, the stream was declined before any processing.
    RefusedStream,
    /// 0x8, the stream is no longer wanted.
    Cancel,
    /// 0x9, the header compression state is unrecoverable.
    CompressionError,
    /// 0xa, a CONNECT tunnel broke.
    ConnectError,
    /// 0xb, the peer is overloading us.
    EnhanceYourCalm,
    /// 0xc, the transport is not secure enough.
    InadequateSecurity,
    /// 0xd, HTTP/1.1 is required instead.
    Http1_1Required,
}

// Indexed by wire value.
const WIRE_CODES: [ErrorCode; 14] = [
    ErrorCode::NoError,
    ErrorCode::ProtocolError,
    ErrorCode::InternalError,
    ErrorCode::FlowControlError,
    ErrorCode::SettingsTimeout,
    ErrorCode::StreamClosed,
    ErrorCode::FrameSizeError,
    ErrorCode::RefusedStream,
    ErrorCode::Cancel,
    ErrorCode::CompressionError,
    ErrorCode::ConnectError,
    ErrorCode::EnhanceYourCalm,
    ErrorCode::InadequateSecurity,
    ErrorCode::Http1_1Required,
];

impl ErrorCode {
    /// Resolves a wire value; unknown codes yield `None` and the caller
    /// picks a fallback, since peers may send codes from extensions.
    pub fn from_wire(code: u32) -> Option<Self> {
        WIRE_CODES.get(code as usize).copied()
    }

    /// The wire value of this code.
    pub fn into_code(self) -> u32 {
        self as u32
    }
}

/// The two HTTP/2 error scopes: one stream, or the whole connection.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum H2Error {
    /// Fatal for one stream only; answered with RST_STREAM.
    StreamError(StreamId, ErrorCode),
    /// Fatal for the connection; answered with GOAWAY.
    ConnectionError(ErrorCode),
}

impl fmt::Display for H2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            H2Error::StreamError(id, code) => {
                write!(f, "stream {id} error: {code:?}")
            }
            H2Error::ConnectionError(code) => write!(f, "connection error: {code:?}"),
        }
    }
}

impl std::error::Error for H2Error {}

/// Why a connection task stopped.
///
/// `H2` carries a protocol error that is reported to the peer; the rest
/// describe transport or channel failures. A transport read that returns
/// "closed" surfaces as `Disconnect` and terminates the connection
/// normally; any other transport error surfaces as `Io` and shuts the
/// connection down.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DispatchError {
    H2(H2Error),
    Io(std::io::ErrorKind),
    ChannelClosed,
    Disconnect,
    BadPreface,
}

impl From<std::io::Error> for DispatchError {
    fn from(value: std::io::Error) -> Self {
        DispatchError::Io(value.kind())
    }
}

impl From<H2Error> for DispatchError {
    fn from(err: H2Error) -> Self {
        DispatchError::H2(err)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::H2(e) => write!(f, "{e}"),
            DispatchError::Io(kind) => write!(f, "io error: {kind:?}"),
            DispatchError::ChannelClosed => write!(f, "connection task channel closed"),
            DispatchError::Disconnect => write!(f, "remote peer closed"),
            DispatchError::BadPreface => write!(f, "invalid connection preface"),
        }
    }
}

impl std::error::Error for DispatchError {}
