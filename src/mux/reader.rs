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

//! Frame receive task.
//!
//! `RecvData` owns the transport read half and the frame decoder. It
//! verifies the connection preface (server role), enforces that the peer's
//! first frame is a non-ACK SETTINGS, pops the settings FIFO when the
//! peer's ACK arrives, and forwards everything else to the manager as a
//! typed event. A read returning zero bytes is a normal disconnect; any
//! other transport failure shuts the connection down.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{mpsc, oneshot};

use crate::codec::FrameDecoder;
use crate::error::{DispatchError, ErrorCode, H2Error};
use crate::frame::{Frame, SettingsUpdate};
use crate::mux::settings::SettingsSync;
use crate::mux::{Role, CONNECTION_PREFACE};

pub(crate) enum OutputMessage {
    Output(Frame),
    /// The peer acknowledged our oldest outstanding SETTINGS; the record
    /// has been popped and its decoder-affecting values applied.
    SettingsAcked(SettingsUpdate),
    OutputExit(DispatchError),
}

pub(crate) struct RecvData<S> {
    decoder: FrameDecoder,
    role: Role,
    settings: Arc<Mutex<SettingsSync>>,
    reader: ReadHalf<S>,
    resp_tx: mpsc::Sender<OutputMessage>,
    // Releases the writer once a server has verified the preface.
    preface_tx: Option<oneshot::Sender<()>>,
    first_frame_seen: bool,
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static> RecvData<S> {
    pub(crate) fn new(
        decoder: FrameDecoder,
        role: Role,
        settings: Arc<Mutex<SettingsSync>>,
        reader: ReadHalf<S>,
        resp_tx: mpsc::Sender<OutputMessage>,
        preface_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            decoder,
            role,
            settings,
            reader,
            resp_tx,
            preface_tx,
            first_frame_seen: false,
        }
    }

    pub(crate) async fn run(mut self) {
        if let Err(e) = self.pump().await {
            let _ = self.resp_tx.send(OutputMessage::OutputExit(e)).await;
        }
    }

    async fn pump(&mut self) -> Result<(), DispatchError> {
        if self.role == Role::Server {
            self.read_preface().await?;
        }
        if let Some(preface_tx) = self.preface_tx.take() {
            let _ = preface_tx.send(());
        }
        let mut buf = [0u8; 1024];
        loop {
            let read = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| DispatchError::Io(e.kind()))?;
            if read == 0 {
                return Err(DispatchError::Disconnect);
            }
            let frames = self
                .decoder
                .decode(&buf[..read])
                .map_err(DispatchError::H2)?;
            for frame in frames {
                self.forward(frame).await?;
            }
        }
    }

    async fn read_preface(&mut self) -> Result<(), DispatchError> {
        let mut buf = [0u8; CONNECTION_PREFACE.len()];
        let mut filled = 0;
        while filled < buf.len() {
            let read = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| DispatchError::Io(e.kind()))?;
            if read == 0 {
                return Err(DispatchError::Disconnect);
            }
            filled += read;
            if buf[..filled] != CONNECTION_PREFACE[..filled] {
                return Err(DispatchError::BadPreface);
            }
        }
        Ok(())
    }

    async fn forward(&mut self, frame: Frame) -> Result<(), DispatchError> {
        if !self.first_frame_seen {
            self.first_frame_seen = true;
            if !matches!(frame, Frame::Settings(_)) {
                return Err(H2Error::ConnectionError(ErrorCode::ProtocolError).into());
            }
        }
        let message = if matches!(frame, Frame::SettingsAck(_)) {
            let acked = self.pop_acknowledged()?;
            self.apply_decoder_settings(&acked)?;
            OutputMessage::SettingsAcked(acked)
        } else {
            OutputMessage::Output(frame)
        };
        self.resp_tx
            .send(message)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    fn pop_acknowledged(&mut self) -> Result<SettingsUpdate, DispatchError> {
        let mut sync = match self.settings.lock() {
            Ok(sync) => sync,
            Err(_) => return Err(DispatchError::ChannelClosed),
        };
        match sync.ack() {
            Some(update) => Ok(update),
            // An ACK with nothing outstanding.
            None => Err(H2Error::ConnectionError(ErrorCode::ConnectError).into()),
        }
    }

    fn apply_decoder_settings(&mut self, update: &SettingsUpdate) -> Result<(), DispatchError> {
        if let Some(size) = update.max_frame_size {
            self.decoder
                .set_max_frame_size(size)
                .map_err(DispatchError::H2)?;
        }
        if let Some(size) = update.header_table_size {
            self.decoder.set_max_header_table_size(size as usize);
        }
        Ok(())
    }
}
