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

//! Frame deserialization.
//!
//! [`FrameDecoder`] accumulates transport bytes and peels complete frames
//! off the front: a frame is only parsed once its whole payload is
//! buffered, so every per-kind parser sees one contiguous payload slice.
//! The decoder owns the HPACK decode context and the open-header-block
//! state; a HEADERS or PUSH_PROMISE block only leaves it as a single
//! decoded [`Frame`] once END_HEADERS arrives, and nothing may interleave
//! with the block's CONTINUATION frames. Unknown frame kinds are consumed
//! and dropped so extension frames cannot break the connection.

use crate::codec::{
    FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY, FRAME_HEADER_SIZE,
    KIND_CONTINUATION, KIND_DATA, KIND_GOAWAY, KIND_HEADERS, KIND_PING, KIND_PRIORITY,
    KIND_PUSH_PROMISE, KIND_RST_STREAM, KIND_SETTINGS, KIND_WINDOW_UPDATE,
};
use crate::error::{ErrorCode, H2Error};
use crate::frame::{Frame, SettingsUpdate, StreamId};
use crate::hpack::HpackDecodeContext;

/// The initial SETTINGS_MAX_FRAME_SIZE value.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// The largest SETTINGS_MAX_FRAME_SIZE value an endpoint may advertise.
pub const MAX_ALLOWED_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// The largest SETTINGS_INITIAL_WINDOW_SIZE value.
const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// Frame bytes sequence decoder, accepting arbitrarily fragmented input.
///
/// # Examples
///
/// ```
/// use h2mux::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// let data_frame_bytes = &[0, 0, 5, 0, 0, 0, 0, 0, 1, b'h', b'e', b'l', b'l', b'o'];
/// let frames = decoder.decode(&data_frame_bytes[..9]).unwrap();
/// assert!(frames.is_empty());
/// let frames = decoder.decode(&data_frame_bytes[9..]).unwrap();
/// assert_eq!(frames.len(), 1);
/// ```
pub struct FrameDecoder {
    // Bytes carried over between feeds: always a frame-aligned prefix of
    // the stream.
    pending: Vec<u8>,
    limit: u32,
    hpack: HpackDecodeContext,
    // The header block currently spanning CONTINUATION frames, if any.
    assembly: Option<BlockAssembly>,
}

// An open HEADERS or PUSH_PROMISE block awaiting END_HEADERS.
struct BlockAssembly {
    stream: StreamId,
    promised: Option<StreamId>,
    end_stream: bool,
    fragments: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder {
            pending: Vec::new(),
            limit: DEFAULT_MAX_FRAME_SIZE,
            hpack: HpackDecodeContext::new(),
            assembly: None,
        }
    }
}

impl FrameDecoder {
    /// `FrameDecoder` constructor.
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    /// Updates our acknowledged SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) -> Result<(), H2Error> {
        if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_MAX_FRAME_SIZE).contains(&size) {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        self.limit = size;
        Ok(())
    }

    /// Updates our acknowledged SETTINGS_HEADER_TABLE_SIZE on the decode
    /// context.
    pub fn set_max_header_table_size(&mut self, size: usize) {
        self.hpack.set_max_table_size(size);
    }

    /// Feeds transport bytes and returns every frame completed by them.
    ///
    /// Header-block fragments and unknown frame kinds are consumed without
    /// producing a frame. An oversized announced length fails immediately,
    /// before any of its payload arrives.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>, H2Error> {
        self.pending.extend_from_slice(input);
        let mut frames = Vec::new();
        let mut pos = 0;
        loop {
            let rest = &self.pending[pos..];
            if rest.len() < FRAME_HEADER_SIZE {
                break;
            }
            let length = be24(&rest[..3]) as usize;
            if length > self.limit as usize {
                return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
            }
            if rest.len() < FRAME_HEADER_SIZE + length {
                break;
            }
            let kind = rest[3];
            let flags = rest[4];
            let stream = be31(&rest[5..9]);
            let payload = rest[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length].to_vec();
            pos += FRAME_HEADER_SIZE + length;
            if let Some(frame) = self.parse(kind, flags, stream, payload)? {
                frames.push(frame);
            }
        }
        self.pending.drain(..pos);
        Ok(frames)
    }

    fn parse(
        &mut self,
        kind: u8,
        flags: u8,
        stream: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        // While a header block is open, only its own CONTINUATION frames
        // are legal on the wire.
        if let Some(assembly) = &self.assembly {
            if kind != KIND_CONTINUATION || stream != assembly.stream {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
        }
        match kind {
            KIND_DATA => parse_data(flags, stream, payload).map(Some),
            KIND_HEADERS => self.parse_headers(flags, stream, payload),
            KIND_PRIORITY => parse_priority(stream, payload).map(Some),
            KIND_RST_STREAM => parse_rst_stream(stream, payload).map(Some),
            KIND_SETTINGS => parse_settings(flags, stream, payload).map(Some),
            KIND_PUSH_PROMISE => self.parse_push_promise(flags, stream, payload),
            KIND_PING => parse_ping(flags, stream, payload).map(Some),
            KIND_GOAWAY => parse_goaway(stream, payload).map(Some),
            KIND_WINDOW_UPDATE => parse_window_update(stream, payload).map(Some),
            KIND_CONTINUATION => self.parse_continuation(flags, stream, payload),
            // Unknown frame kinds are extension points; drop them whole.
            _ => Ok(None),
        }
    }

    fn parse_headers(
        &mut self,
        flags: u8,
        stream: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        require_stream(stream)?;
        let mut fragment = payload.as_slice();
        fragment = strip_padding(flags, fragment)?;
        if flags & FLAG_PRIORITY != 0 {
            if fragment.len() < 5 {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            fragment = &fragment[5..];
        }
        let end_stream = flags & FLAG_END_STREAM != 0;
        if flags & FLAG_END_HEADERS != 0 {
            let fields = self.hpack.decode_block(fragment)?;
            return Ok(Some(Frame::Headers {
                stream,
                fields,
                end_stream,
            }));
        }
        self.assembly = Some(BlockAssembly {
            stream,
            promised: None,
            end_stream,
            fragments: fragment.to_vec(),
        });
        Ok(None)
    }

    fn parse_push_promise(
        &mut self,
        flags: u8,
        stream: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        require_stream(stream)?;
        let body = strip_padding(flags, payload.as_slice())?;
        if body.len() < 4 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let promised = be31(&body[..4]);
        if promised == 0 {
            return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
        }
        let fragment = &body[4..];
        if flags & FLAG_END_HEADERS != 0 {
            let fields = self.hpack.decode_block(fragment)?;
            return Ok(Some(Frame::PushPromise {
                stream,
                promised,
                fields,
            }));
        }
        self.assembly = Some(BlockAssembly {
            stream,
            promised: Some(promised),
            end_stream: false,
            fragments: fragment.to_vec(),
        });
        Ok(None)
    }

    fn parse_continuation(
        &mut self,
        flags: u8,
        stream: StreamId,
        payload: Vec<u8>,
    ) -> Result<Option<Frame>, H2Error> {
        require_stream(stream)?;
        let assembly = match &mut self.assembly {
            Some(assembly) => assembly,
            // CONTINUATION with no open header block.
            None => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
        };
        assembly.fragments.extend_from_slice(&payload);
        if flags & FLAG_END_HEADERS == 0 {
            return Ok(None);
        }
        let assembly = match self.assembly.take() {
            Some(assembly) => assembly,
            None => return Ok(None),
        };
        let fields = self.hpack.decode_block(&assembly.fragments)?;
        let frame = match assembly.promised {
            Some(promised) => Frame::PushPromise {
                stream: assembly.stream,
                promised,
                fields,
            },
            None => Frame::Headers {
                stream: assembly.stream,
                fields,
                end_stream: assembly.end_stream,
            },
        };
        Ok(Some(frame))
    }
}

fn parse_data(flags: u8, stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_stream(stream)?;
    let end_stream = flags & FLAG_END_STREAM != 0;
    if flags & FLAG_PADDED == 0 {
        return Ok(Frame::Data {
            stream,
            payload,
            end_stream,
        });
    }
    let body = strip_padding(flags, payload.as_slice())?;
    Ok(Frame::Data {
        stream,
        payload: body.to_vec(),
        end_stream,
    })
}

fn parse_priority(stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_stream(stream)?;
    if payload.len() != 5 {
        return Err(H2Error::StreamError(stream, ErrorCode::FrameSizeError));
    }
    Ok(Frame::Priority {
        stream,
        dependency: be31(&payload[..4]),
        weight: payload[4],
        exclusive: payload[0] & 0x80 != 0,
    })
}

fn parse_rst_stream(stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_stream(stream)?;
    if payload.len() != 4 {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    Ok(Frame::RstStream {
        stream,
        code: be32(&payload[..4]),
    })
}

fn parse_settings(flags: u8, stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_connection(stream)?;
    if flags & FLAG_ACK != 0 {
        if !payload.is_empty() {
            return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
        }
        return Ok(Frame::SettingsAck(SettingsUpdate::new()));
    }
    if payload.len() % 6 != 0 {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    let mut update = SettingsUpdate::new();
    for entry in payload.chunks(6) {
        let id = u16::from_be_bytes([entry[0], entry[1]]);
        let value = be32(&entry[2..6]);
        apply_wire_setting(&mut update, id, value)?;
    }
    Ok(Frame::Settings(update))
}

fn apply_wire_setting(update: &mut SettingsUpdate, id: u16, value: u32) -> Result<(), H2Error> {
    match id {
        0x1 => update.header_table_size = Some(value),
        0x2 => {
            update.enable_push = Some(match value {
                0 => false,
                1 => true,
                _ => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
            });
        }
        0x3 => update.max_concurrent_streams = Some(value),
        0x4 => {
            if value > MAX_INITIAL_WINDOW_SIZE {
                return Err(H2Error::ConnectionError(ErrorCode::FlowControlError));
            }
            update.initial_window_size = Some(value);
        }
        0x5 => {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_MAX_FRAME_SIZE).contains(&value) {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
            }
            update.max_frame_size = Some(value);
        }
        0x6 => update.max_header_list_size = Some(value),
        // Unknown parameters are ignored.
        _ => {}
    }
    Ok(())
}

fn parse_ping(flags: u8, stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_connection(stream)?;
    if payload.len() != 8 {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    let mut opaque = [0u8; 8];
    opaque.copy_from_slice(&payload);
    Ok(Frame::Ping {
        payload: opaque,
        ack: flags & FLAG_ACK != 0,
    })
}

fn parse_goaway(stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    require_connection(stream)?;
    if payload.len() < 8 {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    Ok(Frame::GoAway {
        last_stream: be31(&payload[..4]),
        code: be32(&payload[4..8]),
        debug: payload[8..].to_vec(),
    })
}

fn parse_window_update(stream: StreamId, payload: Vec<u8>) -> Result<Frame, H2Error> {
    if payload.len() != 4 {
        return Err(H2Error::ConnectionError(ErrorCode::FrameSizeError));
    }
    let increment = be31(&payload[..4]);
    if increment == 0 {
        return if stream == 0 {
            Err(H2Error::ConnectionError(ErrorCode::ProtocolError))
        } else {
            Err(H2Error::StreamError(stream, ErrorCode::ProtocolError))
        };
    }
    Ok(Frame::WindowUpdate { stream, increment })
}

// Validates and removes the PADDED prefix and trailing pad bytes.
fn strip_padding(flags: u8, payload: &[u8]) -> Result<&[u8], H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    let pad = match payload.first() {
        Some(&pad) => pad as usize,
        None => return Err(H2Error::ConnectionError(ErrorCode::ProtocolError)),
    };
    if payload.len() <= pad {
        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
    }
    Ok(&payload[1..payload.len() - pad])
}

fn require_stream(stream: StreamId) -> Result<(), H2Error> {
    if stream == 0 {
        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
    }
    Ok(())
}

fn require_connection(stream: StreamId) -> Result<(), H2Error> {
    if stream != 0 {
        return Err(H2Error::ConnectionError(ErrorCode::ProtocolError));
    }
    Ok(())
}

fn be24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

fn be31(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7fff_ffff
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod ut_frame_decoder {
    use super::*;
    use crate::fields::FieldBlock;
    use crate::hpack::HpackEncodeContext;

    fn frame_header(len: usize, kind: u8, flags: u8, stream: u32) -> Vec<u8> {
        let mut bytes = vec![
            ((len >> 16) & 0xff) as u8,
            ((len >> 8) & 0xff) as u8,
            (len & 0xff) as u8,
            kind,
            flags,
        ];
        bytes.extend_from_slice(&stream.to_be_bytes());
        bytes
    }

    fn status_block() -> Vec<u8> {
        HpackEncodeContext::new().encode_block(&FieldBlock::response(200))
    }

    fn one(frames: Vec<Frame>) -> Frame {
        let mut frames = frames;
        assert_eq!(frames.len(), 1);
        frames.pop().unwrap()
    }

    /// UT test case for decoding a complete DATA frame.
    ///
    /// # Brief
    /// 1. Feeds a DATA frame in one chunk.
    /// 2. Checks stream id, END_STREAM and payload bytes.
    #[test]
    fn ut_frame_decoder_with_complete_data_frame() {
        let mut decoder = FrameDecoder::new();
        let bytes = &[0, 0, 5, 0, 1, 0, 0, 0, 1, b'h', b'e', b'l', b'l', b'o'];
        match one(decoder.decode(bytes).unwrap()) {
            Frame::Data {
                stream,
                payload,
                end_stream,
            } => {
                assert_eq!(stream, 1);
                assert!(end_stream);
                assert_eq!(payload, b"hello");
            }
            _ => panic!("expected DATA"),
        }
    }

    /// UT test case for decoding a padded DATA frame.
    ///
    /// # Brief
    /// 1. Feeds a DATA frame with the PADDED flag and three pad bytes.
    /// 2. Checks padding is stripped.
    #[test]
    fn ut_frame_decoder_with_padded_data_frame() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(7, KIND_DATA, FLAG_PADDED, 1);
        bytes.push(3);
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(&[0, 0, 0]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Data { payload, .. } => assert_eq!(payload, b"abc"),
            _ => panic!("expected DATA"),
        }
    }

    /// UT test case for fragmented input.
    ///
    /// # Brief
    /// 1. Feeds a DATA frame one byte at a time.
    /// 2. Checks exactly one frame is produced at the final byte.
    #[test]
    fn ut_frame_decoder_with_fragmented_input() {
        let mut decoder = FrameDecoder::new();
        let bytes = &[0, 0, 4, 0, 0, 0, 0, 0, 3, b'd', b'a', b't', b'a'];
        for byte in &bytes[..bytes.len() - 1] {
            assert!(decoder.decode(std::slice::from_ref(byte)).unwrap().is_empty());
        }
        match one(decoder.decode(&bytes[bytes.len() - 1..]).unwrap()) {
            Frame::Data { stream, .. } => assert_eq!(stream, 3),
            _ => panic!("expected DATA"),
        }
    }

    /// UT test case for an announced length above our MAX_FRAME_SIZE.
    ///
    /// # Brief
    /// 1. Feeds only the 9-byte header of an oversized frame.
    /// 2. Checks the connection FRAME_SIZE_ERROR fires before any payload.
    #[test]
    fn ut_frame_decoder_with_oversized_frame() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame_header(DEFAULT_MAX_FRAME_SIZE as usize + 1, KIND_DATA, 0, 1);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );
    }

    /// UT test case for a complete HEADERS frame.
    ///
    /// # Brief
    /// 1. Encodes a response block and wraps it in HEADERS with
    ///    END_HEADERS.
    /// 2. Checks the decoded `:status`.
    #[test]
    fn ut_frame_decoder_with_complete_headers_frame() {
        let mut decoder = FrameDecoder::new();
        let block = status_block();
        let mut bytes = frame_header(block.len(), KIND_HEADERS, FLAG_END_HEADERS, 1);
        bytes.extend_from_slice(&block);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Headers { fields, .. } => assert_eq!(fields.status(), Some("200")),
            _ => panic!("expected HEADERS"),
        }
    }

    /// UT test case for HEADERS plus CONTINUATION reassembly.
    ///
    /// # Brief
    /// 1. Splits a block between HEADERS without END_HEADERS and a
    ///    CONTINUATION carrying it.
    /// 2. Checks a single HEADERS frame comes out with END_STREAM from
    ///    the opening frame.
    #[test]
    fn ut_frame_decoder_with_continuation() {
        let mut decoder = FrameDecoder::new();
        let block = status_block();
        let (first, second) = block.split_at(1);

        let mut bytes = frame_header(first.len(), KIND_HEADERS, FLAG_END_STREAM, 1);
        bytes.extend_from_slice(first);
        assert!(decoder.decode(&bytes).unwrap().is_empty());

        let mut bytes = frame_header(second.len(), KIND_CONTINUATION, FLAG_END_HEADERS, 1);
        bytes.extend_from_slice(second);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Headers {
                stream,
                fields,
                end_stream,
            } => {
                assert_eq!(stream, 1);
                assert!(end_stream);
                assert_eq!(fields.status(), Some("200"));
            }
            _ => panic!("expected HEADERS"),
        }
    }

    /// UT test case for the continuation interleaving prohibition.
    ///
    /// # Brief
    /// 1. Opens a header block without END_HEADERS.
    /// 2. Feeds DATA on the same stream.
    /// 3. Checks the connection PROTOCOL_ERROR.
    #[test]
    fn ut_frame_decoder_with_interleaved_continuation() {
        let mut decoder = FrameDecoder::new();
        let block = status_block();
        let mut bytes = frame_header(block.len(), KIND_HEADERS, 0, 1);
        bytes.extend_from_slice(&block);
        assert!(decoder.decode(&bytes).unwrap().is_empty());

        let data = &[0, 0, 1, 0, 0, 0, 0, 0, 1, b'x'];
        assert_eq!(
            decoder.decode(data).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for CONTINUATION on a different stream.
    ///
    /// # Brief
    /// 1. Opens a header block on stream 1.
    /// 2. Feeds a CONTINUATION on stream 3.
    /// 3. Checks the connection PROTOCOL_ERROR.
    #[test]
    fn ut_frame_decoder_with_continuation_on_other_stream() {
        let mut decoder = FrameDecoder::new();
        let block = status_block();
        let mut bytes = frame_header(block.len(), KIND_HEADERS, 0, 1);
        bytes.extend_from_slice(&block);
        assert!(decoder.decode(&bytes).unwrap().is_empty());

        let bytes = frame_header(0, KIND_CONTINUATION, FLAG_END_HEADERS, 3);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for CONTINUATION with no open block.
    ///
    /// # Brief
    /// 1. Feeds a CONTINUATION frame first.
    /// 2. Checks the connection PROTOCOL_ERROR.
    #[test]
    fn ut_frame_decoder_with_orphan_continuation() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame_header(0, KIND_CONTINUATION, FLAG_END_HEADERS, 1);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for PING payloads.
    ///
    /// # Brief
    /// 1. Decodes a valid 8-byte PING.
    /// 2. Feeds a PING with length 9 and checks FRAME_SIZE_ERROR.
    /// 3. Feeds a PING on stream 1 and checks PROTOCOL_ERROR.
    #[test]
    fn ut_decode_ping() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(8, KIND_PING, 0, 0);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Ping { payload, ack } => {
                assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8]);
                assert!(!ack);
            }
            _ => panic!("expected PING"),
        }

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(9, KIND_PING, 0, 0);
        bytes.extend_from_slice(&[0; 9]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(8, KIND_PING, 0, 1);
        bytes.extend_from_slice(&[0; 8]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for SETTINGS payloads.
    ///
    /// # Brief
    /// 1. Decodes a SETTINGS frame carrying two known parameters and one
    ///    unknown.
    /// 2. Checks the unknown parameter is dropped.
    /// 3. Feeds a SETTINGS whose length is not a multiple of six and
    ///    checks FRAME_SIZE_ERROR.
    #[test]
    fn ut_decode_settings() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(18, KIND_SETTINGS, 0, 0);
        bytes.extend_from_slice(&[0, 3, 0, 0, 0, 100]);
        bytes.extend_from_slice(&[0, 4, 0, 0, 255, 255]);
        bytes.extend_from_slice(&[0, 9, 0, 0, 0, 1]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Settings(update) => {
                assert_eq!(update.max_concurrent_streams, Some(100));
                assert_eq!(update.initial_window_size, Some(65535));
                assert_eq!(update.header_table_size, None);
            }
            _ => panic!("expected SETTINGS"),
        }

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(5, KIND_SETTINGS, 0, 0);
        bytes.extend_from_slice(&[0; 5]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );
    }

    /// UT test case for SETTINGS value validation.
    ///
    /// # Brief
    /// 1. Feeds an INITIAL_WINDOW_SIZE above 2^31 - 1 and checks
    ///    FLOW_CONTROL_ERROR.
    /// 2. Feeds a MAX_FRAME_SIZE below 16384 and checks PROTOCOL_ERROR.
    /// 3. Feeds a SETTINGS ACK with a payload and checks FRAME_SIZE_ERROR.
    #[test]
    fn ut_decode_settings_validation() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(6, KIND_SETTINGS, 0, 0);
        bytes.extend_from_slice(&[0, 4, 0x80, 0, 0, 0]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::FlowControlError))
        );

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(6, KIND_SETTINGS, 0, 0);
        bytes.extend_from_slice(&[0, 5, 0, 0, 0, 1]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(6, KIND_SETTINGS, FLAG_ACK, 0);
        bytes.extend_from_slice(&[0; 6]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::FrameSizeError))
        );
    }

    /// UT test case for GOAWAY payloads.
    ///
    /// # Brief
    /// 1. Decodes a GOAWAY with debug data.
    /// 2. Checks last stream id, error code and debug bytes.
    #[test]
    fn ut_decode_goaway() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(10, KIND_GOAWAY, 0, 0);
        bytes.extend_from_slice(&[0, 0, 0, 5]);
        bytes.extend_from_slice(&[0, 0, 0, 2]);
        bytes.extend_from_slice(b"hi");
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::GoAway {
                last_stream,
                code,
                debug,
            } => {
                assert_eq!(last_stream, 5);
                assert_eq!(code, 2);
                assert_eq!(debug, b"hi");
            }
            _ => panic!("expected GOAWAY"),
        }
    }

    /// UT test case for WINDOW_UPDATE payloads.
    ///
    /// # Brief
    /// 1. Decodes a valid increment.
    /// 2. Feeds a zero increment on a stream and on the connection and
    ///    checks the error scopes.
    #[test]
    fn ut_decode_window_update() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(4, KIND_WINDOW_UPDATE, 0, 0);
        bytes.extend_from_slice(&[0, 0, 0x10, 0]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::WindowUpdate { stream, increment } => {
                assert_eq!(stream, 0);
                assert_eq!(increment, 0x1000);
            }
            _ => panic!("expected WINDOW_UPDATE"),
        }

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(4, KIND_WINDOW_UPDATE, 0, 1);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::StreamError(1, ErrorCode::ProtocolError))
        );

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(4, KIND_WINDOW_UPDATE, 0, 0);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for RST_STREAM payloads.
    ///
    /// # Brief
    /// 1. Decodes a reset with CANCEL.
    /// 2. Feeds a reset on stream 0 and checks PROTOCOL_ERROR.
    #[test]
    fn ut_decode_rst_stream() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(4, KIND_RST_STREAM, 0, 1);
        bytes.extend_from_slice(&[0, 0, 0, 8]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::RstStream { stream, code } => {
                assert_eq!(stream, 1);
                assert_eq!(code, 8);
            }
            _ => panic!("expected RST_STREAM"),
        }

        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(4, KIND_RST_STREAM, 0, 0);
        bytes.extend_from_slice(&[0, 0, 0, 8]);
        assert_eq!(
            decoder.decode(&bytes).err(),
            Some(H2Error::ConnectionError(ErrorCode::ProtocolError))
        );
    }

    /// UT test case for PRIORITY payloads.
    ///
    /// # Brief
    /// 1. Decodes a PRIORITY frame with the exclusive bit set.
    /// 2. Checks dependency, weight and exclusivity.
    #[test]
    fn ut_decode_priority() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(5, KIND_PRIORITY, 0, 3);
        bytes.extend_from_slice(&[0x80, 0, 0, 1, 15]);
        match one(decoder.decode(&bytes).unwrap()) {
            Frame::Priority {
                stream,
                dependency,
                weight,
                exclusive,
            } => {
                assert_eq!(stream, 3);
                assert_eq!(dependency, 1);
                assert_eq!(weight, 15);
                assert!(exclusive);
            }
            _ => panic!("expected PRIORITY"),
        }
    }

    /// UT test case for unknown frame kinds.
    ///
    /// # Brief
    /// 1. Feeds a frame of kind 0x20 followed by a DATA frame.
    /// 2. Checks the unknown frame is skipped and the DATA frame decodes.
    #[test]
    fn ut_decode_unknown_frame_kind() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame_header(3, 0x20, 0, 1);
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&[0, 0, 1, 0, 0, 0, 0, 0, 1, b'x']);
        let frames = decoder.decode(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Data { .. }));
    }
}
