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

//! Connection configuration.

use core::time::Duration;

use tokio::sync::mpsc;

use crate::frame::SettingsUpdate;
use crate::mux::ConnEvent;

const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024;
const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 16 * 1024;
// Window size at the connection level. The initial value specified in
// RFC 7540 is 64kb; a larger default is advertised with WINDOW_UPDATE right
// after SETTINGS.
const DEFAULT_CONN_WINDOW: u32 = 10 * 1024 * 1024;
const DEFAULT_STREAM_WINDOW: u32 = 2 * 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings which can be used to configure an HTTP/2 connection.
#[derive(Clone)]
pub struct H2Config {
    max_frame_size: u32,
    max_header_list_size: u32,
    header_table_size: u32,
    max_concurrent_streams: Option<u32>,
    conn_window: u32,
    stream_window: u32,
    enable_push: bool,
    handler_channel_cap: usize,
}

impl H2Config {
    /// `H2Config` constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Sets the SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn set_max_header_list_size(&mut self, size: u32) {
        self.max_header_list_size = size;
    }

    /// Sets the SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_header_table_size(&mut self, size: u32) {
        self.header_table_size = size;
    }

    /// Sets the SETTINGS_MAX_CONCURRENT_STREAMS we advertise.
    pub fn set_max_concurrent_streams(&mut self, num: u32) {
        self.max_concurrent_streams = Some(num);
    }

    /// Sets the connection-level receive window.
    pub fn set_conn_window_size(&mut self, size: u32) {
        self.conn_window = size;
    }

    /// Sets the per-stream receive window (SETTINGS_INITIAL_WINDOW_SIZE).
    pub fn set_stream_window_size(&mut self, size: u32) {
        self.stream_window = size;
    }

    /// Sets SETTINGS_ENABLE_PUSH.
    pub fn set_enable_push(&mut self, enable: bool) {
        self.enable_push = enable;
    }

    /// Sets how many events a stream handler channel may buffer.
    pub fn set_handler_channel_cap(&mut self, size: usize) {
        self.handler_channel_cap = size;
    }

    /// Gets the SETTINGS_MAX_FRAME_SIZE.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Gets the SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn max_header_list_size(&self) -> u32 {
        self.max_header_list_size
    }

    /// Gets the SETTINGS_HEADER_TABLE_SIZE.
    pub fn header_table_size(&self) -> u32 {
        self.header_table_size
    }

    /// Gets the advertised SETTINGS_MAX_CONCURRENT_STREAMS.
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub(crate) fn enable_push(&self) -> bool {
        self.enable_push
    }

    pub(crate) fn conn_window_size(&self) -> u32 {
        self.conn_window
    }

    pub(crate) fn stream_window_size(&self) -> u32 {
        self.stream_window
    }

    pub(crate) fn handler_channel_cap(&self) -> usize {
        self.handler_channel_cap
    }

    /// Builds the SETTINGS payload sent right after the preface.
    pub(crate) fn initial_settings(&self) -> SettingsUpdate {
        SettingsUpdate {
            header_table_size: Some(self.header_table_size),
            enable_push: Some(self.enable_push),
            max_concurrent_streams: self.max_concurrent_streams,
            initial_window_size: Some(self.stream_window),
            max_frame_size: Some(self.max_frame_size),
            max_header_list_size: Some(self.max_header_list_size),
        }
    }
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            max_concurrent_streams: None,
            conn_window: DEFAULT_CONN_WINDOW,
            stream_window: DEFAULT_STREAM_WINDOW,
            enable_push: false,
            handler_channel_cap: 5,
        }
    }
}

/// Whether inbound DATA is re-credited to the peer automatically or only
/// through explicit `send_window_update` calls.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FlowControlMode {
    #[default]
    Auto,
    Manual,
}

/// Per-connection behavior knobs outside the SETTINGS frame.
#[derive(Clone, Default)]
pub struct ConnConfig {
    connect_timeout: Option<Duration>,
    tcp_user_timeout: Option<Duration>,
    garbage_on_end: bool,
    flow_control: FlowControlMode,
    notifier: Option<mpsc::UnboundedSender<ConnEvent>>,
}

impl ConnConfig {
    /// `ConnConfig` constructor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TCP connect timeout used by `Connection::connect`.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = Some(timeout);
    }

    /// Sets TCP_USER_TIMEOUT on the dialed socket (Linux only).
    pub fn set_tcp_user_timeout(&mut self, timeout: Duration) {
        self.tcp_user_timeout = Some(timeout);
    }

    /// Discards response data when a stream finishes; `get_response`
    /// reports garbage.
    pub fn set_garbage_on_end(&mut self, garbage: bool) {
        self.garbage_on_end = garbage;
    }

    /// Selects automatic or manual receive flow control.
    pub fn set_flow_control(&mut self, mode: FlowControlMode) {
        self.flow_control = mode;
    }

    /// Registers the connection notifier receiving [`ConnEvent`]s.
    pub fn set_notifier(&mut self, notifier: mpsc::UnboundedSender<ConnEvent>) {
        self.notifier = Some(notifier);
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub(crate) fn tcp_user_timeout(&self) -> Option<Duration> {
        self.tcp_user_timeout
    }

    pub(crate) fn garbage_on_end(&self) -> bool {
        self.garbage_on_end
    }

    pub(crate) fn auto_flow_control(&self) -> bool {
        self.flow_control == FlowControlMode::Auto
    }

    pub(crate) fn notifier(&self) -> Option<mpsc::UnboundedSender<ConnEvent>> {
        self.notifier.clone()
    }
}
