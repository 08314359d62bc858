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

//! Stored responses and their body decoding.
//!
//! A client stream that finishes normally leaves its response in the stream
//! set until the embedder consumes it with `get_response`. Consumption
//! applies `Content-Encoding` decoding: gzip, zip and deflate bodies are
//! inflated, `compress` and unknown encodings pass through unchanged.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::error::ErrorCode;
use crate::fields::FieldBlock;

/// A completed exchange kept for `get_response`.
pub struct StoredResponse {
    /// The response header block.
    pub headers: FieldBlock,
    /// The response body, already de-chunked by framing.
    pub body: Vec<u8>,
    /// The trailing header block, if the peer sent one.
    pub trailers: Option<FieldBlock>,
}

/// The observable state of one stream's response.
pub enum ResponseState {
    /// The stream finished and its response is returned, body decoded.
    Ready(StoredResponse),
    /// The stream finished but the connection was told not to keep
    /// response data.
    Garbage,
    /// The stream was reset before completing.
    Reset(ErrorCode),
    /// The stream has not reached its terminal state yet.
    NotReady,
}

impl StoredResponse {
    /// Applies `Content-Encoding` to the stored body.
    pub(crate) fn decode_body(&mut self) {
        let encoding = match self.headers.get("content-encoding") {
            Some(value) => value.to_ascii_lowercase(),
            None => return,
        };
        let decoded = match encoding.as_str() {
            "gzip" | "x-gzip" => decompress(GzDecoder::new(self.body.as_slice())),
            "deflate" | "zip" => decompress(ZlibDecoder::new(self.body.as_slice())),
            _ => return,
        };
        if let Some(decoded) = decoded {
            self.body = decoded;
        }
    }
}

fn decompress<R: Read>(mut reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok().map(|_| out)
}
