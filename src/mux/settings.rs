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

//! Bookkeeping for locally-sent SETTINGS awaiting the peer's ACK.
//!
//! Every SETTINGS frame we send is recorded as `(token, settings)` in FIFO
//! order. An inbound ACK acknowledges exactly the oldest record; a record
//! whose token is still at the head of the queue when its timer fires has
//! timed out. Values apply from ACK onward, never before.

use std::collections::VecDeque;

use crate::frame::SettingsUpdate;

/// A monotonically increasing identifier for one sent SETTINGS frame.
pub(crate) type SettingsToken = u64;

#[derive(Default)]
pub(crate) struct SettingsSync {
    queue: VecDeque<(SettingsToken, SettingsUpdate)>,
    next_token: SettingsToken,
}

impl SettingsSync {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a SETTINGS frame about to be sent, returning its token.
    pub(crate) fn record(&mut self, update: SettingsUpdate) -> SettingsToken {
        let token = self.next_token;
        self.next_token += 1;
        self.queue.push_back((token, update));
        token
    }

    /// Acknowledges the oldest outstanding record, returning it.
    pub(crate) fn ack(&mut self) -> Option<SettingsUpdate> {
        self.queue.pop_front().map(|(_, update)| update)
    }

    /// Whether `token` is still the oldest outstanding record.
    pub(crate) fn is_head(&self, token: SettingsToken) -> bool {
        self.queue.front().is_some_and(|(head, _)| *head == token)
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.queue.len()
    }
}
