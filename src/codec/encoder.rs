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

//! Frame serialization.
//!
//! [`FrameEncoder`] turns one [`Frame`] into its complete wire bytes. It
//! owns the HPACK encode context; a header block is encoded through it and
//! split into a HEADERS or PUSH_PROMISE frame plus CONTINUATION frames no
//! larger than the peer's SETTINGS_MAX_FRAME_SIZE, with END_HEADERS on the
//! final fragment. Because one call produces the whole block, nothing can
//! interleave inside it on the wire.

use crate::codec::decoder::{DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_MAX_FRAME_SIZE};
use crate::codec::{
    FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, KIND_CONTINUATION, KIND_DATA, KIND_GOAWAY,
    KIND_HEADERS, KIND_PING, KIND_PRIORITY, KIND_PUSH_PROMISE, KIND_RST_STREAM, KIND_SETTINGS,
    KIND_WINDOW_UPDATE,
};
use crate::error::{ErrorCode, H2Error};
use crate::fields::FieldBlock;
use crate::frame::{Frame, StreamId};
use crate::hpack::HpackEncodeContext;

/// Frame serializer owning the connection's HPACK encode context.
pub struct FrameEncoder {
    hpack: HpackEncodeContext,
    max_frame_size: u32,
}

impl FrameEncoder {
    /// `FrameEncoder` constructor.
    pub fn new() -> Self {
        Self {
            hpack: HpackEncodeContext::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Applies the peer's SETTINGS_MAX_FRAME_SIZE to outbound framing.
    pub fn update_max_frame_size(&mut self, size: u32) -> Result<(), H2Error> {
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_MAX_FRAME_SIZE).contains(&size) {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        self.max_frame_size = size;
        Ok(())
    }

    /// Applies the peer's SETTINGS_HEADER_TABLE_SIZE to the encode
    /// context.
    pub fn update_header_table_size(&mut self, size: usize) {
        self.hpack.set_max_table_size(size);
    }

    /// Serializes `frame` into its complete wire bytes.
    pub fn encode(&mut self, frame: &Frame) -> Result<Vec<u8>, H2Error> {
        let mut out = Vec::new();
        match frame {
            Frame::Data {
                stream,
                payload,
                end_stream,
            } => {
                let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                put_header(&mut out, payload.len(), KIND_DATA, flags, *stream);
                out.extend_from_slice(payload);
            }
            Frame::Headers {
                stream,
                fields,
                end_stream,
            } => {
                let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                self.put_block(&mut out, *stream, KIND_HEADERS, flags, &[], fields);
            }
            Frame::PushPromise {
                stream,
                promised,
                fields,
            } => {
                let prefix = promised.to_be_bytes();
                self.put_block(&mut out, *stream, KIND_PUSH_PROMISE, 0, &prefix, fields);
            }
            Frame::Settings(update) => {
                let entries = update.entries();
                put_header(&mut out, entries.len() * 6, KIND_SETTINGS, 0, 0);
                for (id, value) in entries {
                    out.extend_from_slice(&id.to_be_bytes());
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            // The internal copy of acknowledged values never reaches the
            // wire; an ACK is always empty.
            Frame::SettingsAck(_) => {
                put_header(&mut out, 0, KIND_SETTINGS, FLAG_ACK, 0);
            }
            Frame::Ping { payload, ack } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                put_header(&mut out, payload.len(), KIND_PING, flags, 0);
                out.extend_from_slice(payload);
            }
            Frame::GoAway {
                last_stream,
                code,
                debug,
            } => {
                put_header(&mut out, 8 + debug.len(), KIND_GOAWAY, 0, 0);
                out.extend_from_slice(&last_stream.to_be_bytes());
                out.extend_from_slice(&code.to_be_bytes());
                out.extend_from_slice(debug);
            }
            Frame::WindowUpdate { stream, increment } => {
                put_header(&mut out, 4, KIND_WINDOW_UPDATE, 0, *stream);
                out.extend_from_slice(&increment.to_be_bytes());
            }
            Frame::RstStream { stream, code } => {
                put_header(&mut out, 4, KIND_RST_STREAM, 0, *stream);
                out.extend_from_slice(&code.to_be_bytes());
            }
            Frame::Priority {
                stream,
                dependency,
                weight,
                exclusive,
            } => {
                put_header(&mut out, 5, KIND_PRIORITY, 0, *stream);
                let mut dependency = dependency & 0x7fff_ffff;
                if *exclusive {
                    dependency |= 0x8000_0000;
                }
                out.extend_from_slice(&dependency.to_be_bytes());
                out.push(*weight);
            }
        }
        Ok(out)
    }

    // Encodes a header block and splits it into an opening frame plus
    // CONTINUATION frames, END_HEADERS on the last fragment. `prefix` is
    // the promised stream id of a PUSH_PROMISE, empty for HEADERS.
    fn put_block(
        &mut self,
        out: &mut Vec<u8>,
        stream: StreamId,
        opening: u8,
        opening_flags: u8,
        prefix: &[u8],
        fields: &FieldBlock,
    ) {
        let block = self.hpack.encode_block(fields);
        let cap = self.max_frame_size as usize;
        let first_room = cap - prefix.len();
        let (first, mut rest) = if block.len() <= first_room {
            (block.as_slice(), &[][..])
        } else {
            block.split_at(first_room)
        };

        let mut flags = opening_flags;
        if rest.is_empty() {
            flags |= FLAG_END_HEADERS;
        }
        put_header(out, prefix.len() + first.len(), opening, flags, stream);
        out.extend_from_slice(prefix);
        out.extend_from_slice(first);

        while !rest.is_empty() {
            let take = rest.len().min(cap);
            let (chunk, remain) = rest.split_at(take);
            rest = remain;
            let flags = if rest.is_empty() { FLAG_END_HEADERS } else { 0 };
            put_header(out, chunk.len(), KIND_CONTINUATION, flags, stream);
            out.extend_from_slice(chunk);
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn put_header(out: &mut Vec<u8>, len: usize, kind: u8, flags: u8, stream: StreamId) {
    out.push(((len >> 16) & 0xff) as u8);
    out.push(((len >> 8) & 0xff) as u8);
    out.push((len & 0xff) as u8);
    out.push(kind);
    out.push(flags);
    out.extend_from_slice(&(stream & 0x7fff_ffff).to_be_bytes());
}
