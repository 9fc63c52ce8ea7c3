// Copyright (C) 2019-2021 Aleo Systems Inc.
// This file is part of the meshwire library.

// The meshwire library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The meshwire library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the meshwire library. If not, see <https://www.gnu.org/licenses/>.

use crate::{
    buffer::MessageBuffer,
    channels::{manager::ChannelManager, ChannelRole},
    connection::ConnWriter,
    errors::NetworkError,
    message::Message,
};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;

/// The state shared between a channel's user handle and the manager that
/// routes inbound frames into it.
pub(crate) struct ChannelState {
    id: u32,
    role: ChannelRole,
    buffer: MessageBuffer,
    writer: Arc<ConnWriter>,
    closed: AtomicBool,
    manager: Weak<ChannelManager>,
    // Held by requester channels until the id is back on the free list.
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl ChannelState {
    pub(crate) fn new(
        id: u32,
        role: ChannelRole,
        buffer_capacity: usize,
        writer: Arc<ConnWriter>,
        manager: Weak<ChannelManager>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            id,
            role,
            buffer: MessageBuffer::new(buffer_capacity),
            writer,
            closed: AtomicBool::new(false),
            manager,
            permit: Mutex::new(permit),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues an inbound message for this end to read. Invoked by the
    /// channel manager; blocks while the buffer is full.
    pub(crate) async fn push(&self, message: Message) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ChannelClosed);
        }
        self.buffer.push(message).await
    }

    /// Wraps the message with this end's payload tag and channel id, and
    /// writes it under the connection's write lock.
    pub(crate) async fn write(&self, message: Message) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ChannelClosed);
        }
        let frame = message.wrap(self.role.payload_protocol(), self.id);
        self.writer.write_message(&frame).await?;

        Ok(())
    }

    pub(crate) async fn read(&self) -> Result<Message, NetworkError> {
        self.buffer.pop().await
    }

    pub(crate) async fn read_timeout(&self, timeout: Duration) -> Result<Message, NetworkError> {
        self.buffer.pop_timeout(timeout).await
    }

    /// Closes the channel: further writes fail, reads drain the buffer and
    /// then report the channel as closed, and the close frame is sent
    /// exactly once. Closing an already-closed channel has no effect.
    pub(crate) async fn close(&self) {
        if !self.begin_close() {
            return;
        }
        self.finish_close().await;
    }

    /// The synchronous part of closing. Returns `true` on the first call
    /// only; that caller is responsible for running [`Self::finish_close`].
    pub(crate) fn begin_close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.buffer.close();

        true
    }

    /// Sends the close frame and returns the id to its owner. The id is
    /// only released after the frame is on the wire, so a reused id can
    /// never see this channel's close frame trailing its own traffic.
    pub(crate) async fn finish_close(&self) {
        let mut body = [0u8; 4];
        LittleEndian::write_u32(&mut body, self.id);
        let frame = Message::new(self.role.close_protocol(), body.to_vec());

        if let Err(e) = self.writer.write_message(&frame).await {
            // The channel stays closed; the peer will learn of it when the
            // connection goes down.
            warn!(
                "Failed to send the close frame for channel {} to {}: {}",
                self.id,
                self.writer.addr(),
                e
            );
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.release(self.id, self.role);
        }
        drop(self.permit.lock().take());

        debug!("Closed channel {} to {}", self.id, self.writer.addr());
    }
}

/// One end of a multiplexed exchange with a peer.
///
/// Writes are framed onto the shared peer connection; reads pop messages the
/// peer sent on this channel. Dropping the handle closes the channel.
pub struct Channel {
    state: Arc<ChannelState>,
}

impl Channel {
    pub(crate) fn new(state: Arc<ChannelState>) -> Self {
        Self { state }
    }

    /// The id of the channel, local to its peer connection.
    pub fn id(&self) -> u32 {
        self.state.id()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Sends a message to the other end of the channel.
    pub async fn write(&self, message: Message) -> Result<(), NetworkError> {
        self.state.write(message).await
    }

    /// Receives the next message from the other end, blocking until one
    /// arrives or the channel is closed.
    pub async fn read(&self) -> Result<Message, NetworkError> {
        self.state.read().await
    }

    /// Like [`Channel::read`], but bounded by a timeout.
    pub async fn read_timeout(&self, timeout: Duration) -> Result<Message, NetworkError> {
        self.state.read_timeout(timeout).await
    }

    /// Closes the channel. Idempotent.
    pub async fn close(&self) {
        self.state.close().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state.begin_close() {
            let state = self.state.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { state.finish_close().await });
            }
            // Without a runtime the connection is being torn down with us;
            // the id is deliberately left unreleased so no close frame can
            // be reordered behind a newer channel's traffic.
        }
    }
}
