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
    errors::MessageError,
    message::{read_message, write_message, Message},
};

use std::net::SocketAddr;

use tokio::{
    io::AsyncWriteExt,
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex as AsyncMutex,
};

/// The write half of a peer connection.
///
/// The stream is guarded by an async mutex so that the connector and every
/// channel multiplexed over the connection frame their messages atomically;
/// this lock is the only one in the stack held across I/O.
pub struct ConnWriter {
    addr: SocketAddr,
    writer: AsyncMutex<OwnedWriteHalf>,
}

impl ConnWriter {
    pub(crate) fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            addr,
            writer: AsyncMutex::new(writer),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Writes a full frame under the connection's write lock.
    pub async fn write_message(&self, message: &Message) -> Result<(), MessageError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await?;
        trace!("Sent a {} to {}", message, self.addr);

        Ok(())
    }

    /// Shuts the write side down, signaling EOF to the peer.
    pub async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// The read half of a peer connection, owned by that peer's reader task.
pub struct ConnReader {
    addr: SocketAddr,
    reader: OwnedReadHalf,
}

impl ConnReader {
    pub(crate) fn new(addr: SocketAddr, reader: OwnedReadHalf) -> Self {
        Self { addr, reader }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reads one full frame, blocking until it has arrived.
    pub async fn read_message(&mut self) -> Result<Message, MessageError> {
        let message = read_message(&mut self.reader).await?;
        trace!("Received a {} from {}", message, self.addr);

        Ok(message)
    }
}
