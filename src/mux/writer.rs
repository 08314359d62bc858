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

//! Frame send task.
//!
//! `SendData` owns the transport write half and the frame encoder, and
//! drains the connection's frame channel in order. The client preface goes
//! out before anything else. When the ACK for the peer's SETTINGS passes
//! through, the acknowledged header table size and frame size cap are
//! applied to the encoder before the bare ACK hits the wire, so the ACK
//! precedes any frame shaped by the new values.

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::codec::FrameEncoder;
use crate::error::DispatchError;
use crate::frame::Frame;
use crate::mux::{Role, CONNECTION_PREFACE};

pub(crate) struct SendData<S> {
    encoder: FrameEncoder,
    role: Role,
    writer: WriteHalf<S>,
    input_rx: mpsc::UnboundedReceiver<Frame>,
    // A server writes nothing until the reader verified the preface.
    preface_rx: Option<oneshot::Receiver<()>>,
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static> SendData<S> {
    pub(crate) fn new(
        encoder: FrameEncoder,
        role: Role,
        writer: WriteHalf<S>,
        input_rx: mpsc::UnboundedReceiver<Frame>,
        preface_rx: Option<oneshot::Receiver<()>>,
    ) -> Self {
        Self {
            encoder,
            role,
            writer,
            input_rx,
            preface_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        let _ = self.pump().await;
    }

    async fn pump(&mut self) -> Result<(), DispatchError> {
        if let Some(preface_rx) = self.preface_rx.take() {
            if preface_rx.await.is_err() {
                return Err(DispatchError::BadPreface);
            }
        }
        if self.role == Role::Client {
            self.writer
                .write_all(CONNECTION_PREFACE)
                .await
                .map_err(|e| DispatchError::Io(e.kind()))?;
        }
        loop {
            let frame = match self.input_rx.recv().await {
                Some(frame) => frame,
                None => {
                    let _ = self.writer.flush().await;
                    return Err(DispatchError::ChannelClosed);
                }
            };
            // An outbound ACK carries the peer values the encoder must
            // adopt; the wire frame stays empty.
            if let Frame::SettingsAck(update) = &frame {
                if let Some(size) = update.header_table_size {
                    self.encoder.update_header_table_size(size as usize);
                }
                if let Some(size) = update.max_frame_size {
                    let _ = self.encoder.update_max_frame_size(size);
                }
            }
            let bytes = match self.encoder.encode(&frame) {
                Ok(bytes) => bytes,
                Err(e) => return Err(e.into()),
            };
            self.writer
                .write_all(&bytes)
                .await
                .map_err(|e| DispatchError::Io(e.kind()))?;
            self.writer
                .flush()
                .await
                .map_err(|e| DispatchError::Io(e.kind()))?;
        }
    }
}
