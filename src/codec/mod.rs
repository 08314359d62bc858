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

//! Frame wire codec: the 9-byte frame header plus typed payloads.
//!
//! Wire layout per RFC 7540 section 4: a 24-bit payload length, an 8-bit
//! frame kind, an 8-bit flags octet and a 31-bit stream id, followed by
//! the payload. The constants below are the only place the raw kind and
//! flag values appear.

mod decoder;
mod encoder;

pub use decoder::{FrameDecoder, DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_MAX_FRAME_SIZE};
pub use encoder::FrameEncoder;

pub(crate) const FRAME_HEADER_SIZE: usize = 9;

pub(crate) const KIND_DATA: u8 = 0x0;
pub(crate) const KIND_HEADERS: u8 = 0x1;
pub(crate) const KIND_PRIORITY: u8 = 0x2;
pub(crate) const KIND_RST_STREAM: u8 = 0x3;
pub(crate) const KIND_SETTINGS: u8 = 0x4;
pub(crate) const KIND_PUSH_PROMISE: u8 = 0x5;
pub(crate) const KIND_PING: u8 = 0x6;
pub(crate) const KIND_GOAWAY: u8 = 0x7;
pub(crate) const KIND_WINDOW_UPDATE: u8 = 0x8;
pub(crate) const KIND_CONTINUATION: u8 = 0x9;

pub(crate) const FLAG_END_STREAM: u8 = 0x1;
pub(crate) const FLAG_ACK: u8 = 0x1;
pub(crate) const FLAG_END_HEADERS: u8 = 0x4;
pub(crate) const FLAG_PADDED: u8 = 0x8;
pub(crate) const FLAG_PRIORITY: u8 = 0x20;
