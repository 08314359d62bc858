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

//! HPACK context adapters.
//!
//! The connection owns exactly one encode context and one decode context;
//! each advances monotonically as header blocks pass through it. The
//! contexts wrap `loona_hpack` and translate between its byte pairs and
//! [`FieldBlock`] lines. A decode failure is always a connection-level
//! COMPRESSION_ERROR.

use loona_hpack::{Decoder, Encoder};

use crate::error::{ErrorCode, H2Error};
use crate::fields::FieldBlock;

/// The HPACK encode context of a connection. Owned by the frame encoder on
/// the writer path.
pub struct HpackEncodeContext {
    inner: Encoder<'static>,
}

/// The HPACK decode context of a connection. Owned by the frame decoder on
/// the reader path.
pub struct HpackDecodeContext {
    inner: Decoder<'static>,
}

impl HpackEncodeContext {
    /// Creates an encode context with the default 4096-byte dynamic table.
    pub fn new() -> Self {
        Self {
            inner: Encoder::new(),
        }
    }

    /// Applies the peer's SETTINGS_HEADER_TABLE_SIZE to the dynamic table.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.inner.set_max_table_size(size);
    }

    /// Encodes one header block, line order preserved.
    pub fn encode_block(&mut self, fields: &FieldBlock) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = fields
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}

impl Default for HpackEncodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecodeContext {
    /// Creates a decode context with the default 4096-byte dynamic table.
    pub fn new() -> Self {
        Self {
            inner: Decoder::new(),
        }
    }

    /// Applies our acknowledged SETTINGS_HEADER_TABLE_SIZE: the largest
    /// dynamic table the peer's encoder may ask this decoder to use.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.inner.set_max_allowed_table_size(size);
        self.inner.set_max_table_size(size);
    }

    /// Decodes one complete header block into a [`FieldBlock`].
    pub fn decode_block(&mut self, block: &[u8]) -> Result<FieldBlock, H2Error> {
        let pairs = self
            .inner
            .decode(block)
            .map_err(|_| H2Error::ConnectionError(ErrorCode::CompressionError))?;
        let mut fields = FieldBlock::new();
        for (name, value) in pairs {
            let name = String::from_utf8(name)
                .map_err(|_| H2Error::ConnectionError(ErrorCode::CompressionError))?;
            let value = String::from_utf8(value)
                .map_err(|_| H2Error::ConnectionError(ErrorCode::CompressionError))?;
            fields.push(name.as_str(), value.as_str());
        }
        Ok(fields)
    }
}

impl Default for HpackDecodeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod ut_hpack {
    use super::*;

    fn request_fields() -> FieldBlock {
        let mut fields = FieldBlock::request("GET", "https", "example.com", "/");
        fields.push("accept", "*/*");
        fields.push("x-request-id", "42");
        fields
    }

    /// UT test case for encode-then-decode with a cooperating context pair.
    ///
    /// # Brief
    /// 1. Encodes a request header block.
    /// 2. Decodes it with a fresh decode context.
    /// 3. Checks the original block is reproduced exactly, line order
    ///    included.
    #[test]
    fn ut_hpack_round_trip() {
        let mut enc = HpackEncodeContext::new();
        let mut dec = HpackDecodeContext::new();
        let fields = request_fields();
        let block = enc.encode_block(&fields);
        let decoded = dec.decode_block(&block).unwrap();
        assert_eq!(decoded, fields);
    }

    /// UT test case for context continuity across blocks.
    ///
    /// # Brief
    /// 1. Encodes the same block twice with one encode context.
    /// 2. Checks the second encoding is no longer (dynamic table hits) and
    ///    both decode to the same block with one decode context.
    #[test]
    fn ut_hpack_dynamic_table_advance() {
        let mut enc = HpackEncodeContext::new();
        let mut dec = HpackDecodeContext::new();
        let fields = request_fields();
        let first = enc.encode_block(&fields);
        let second = enc.encode_block(&fields);
        assert!(second.len() <= first.len());
        assert_eq!(dec.decode_block(&first).unwrap(), fields);
        assert_eq!(dec.decode_block(&second).unwrap(), fields);
    }

    /// UT test case for decode failure mapping.
    ///
    /// # Brief
    /// 1. Feeds a truncated header block to the decode context.
    /// 2. Checks the failure surfaces as a connection COMPRESSION_ERROR.
    #[test]
    fn ut_hpack_decode_error() {
        let mut enc = HpackEncodeContext::new();
        let mut dec = HpackDecodeContext::new();
        let block = enc.encode_block(&request_fields());
        let err = dec.decode_block(&block[..block.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            H2Error::ConnectionError(ErrorCode::CompressionError)
        );
    }
}
