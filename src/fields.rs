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

//! Header blocks.
//!
//! A [`FieldBlock`] is the decoded form of one HEADERS or PUSH_PROMISE
//! block: an ordered list of name/value lines, exactly what HPACK encodes
//! and decodes. Pseudo headers are ordinary lines whose names start with
//! `:`; they must precede regular lines, which the constructors guarantee
//! and decoding preserves. Names are normalized to lowercase. Because the
//! line order is kept, a block survives an HPACK round trip unchanged.

/// One decoded header block.
///
/// # Examples
///
/// ```
/// use h2mux::FieldBlock;
///
/// let mut fields = FieldBlock::request("GET", "https", "example.com", "/");
/// fields.push("Accept", "text/html");
/// assert_eq!(fields.method(), Some("GET"));
/// assert_eq!(fields.get("accept"), Some("text/html"));
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FieldBlock {
    lines: Vec<(String, String)>,
}

impl FieldBlock {
    /// Creates an empty block (also the shape of a trailer block).
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Creates a request block with the four request pseudo headers.
    pub fn request(method: &str, scheme: &str, authority: &str, path: &str) -> Self {
        let mut block = Self::new();
        block.push(":method", method);
        block.push(":scheme", scheme);
        block.push(":authority", authority);
        block.push(":path", path);
        block
    }

    /// Creates a response block carrying `:status`.
    pub fn response(status: u16) -> Self {
        let mut block = Self::new();
        block.push(":status", &status.to_string());
        block
    }

    /// Returns the number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if the block has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a line, keeping any lines already present under the same
    /// name. The name is lowercased.
    pub fn push(&mut self, name: &str, value: &str) {
        self.lines
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    /// Returns the first value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.lines
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes every line stored under `name`, returning the first
    /// removed value, if any.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let first = self
            .lines
            .iter()
            .position(|(n, _)| *n == name)
            .map(|pos| self.lines[pos].1.clone());
        self.lines.retain(|(n, _)| *n != name);
        first
    }

    /// Iterates the lines in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// The `:method` pseudo header.
    pub fn method(&self) -> Option<&str> {
        self.get(":method")
    }

    /// The `:scheme` pseudo header.
    pub fn scheme(&self) -> Option<&str> {
        self.get(":scheme")
    }

    /// The `:authority` pseudo header.
    pub fn authority(&self) -> Option<&str> {
        self.get(":authority")
    }

    /// The `:path` pseudo header.
    pub fn path(&self) -> Option<&str> {
        self.get(":path")
    }

    /// The `:status` pseudo header.
    pub fn status(&self) -> Option<&str> {
        self.get(":status")
    }
}

impl std::fmt::Debug for FieldBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.lines.iter().map(|(n, v)| (n, v)))
            .finish()
    }
}
