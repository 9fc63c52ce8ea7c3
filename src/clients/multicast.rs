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

use crate::{errors::NetworkError, message::Message};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// A send-only datagram endpoint for a multicast group.
///
/// A frame occupies two datagrams on this transport, the header followed by
/// the body, matching what the UDP server expects. The body datagram is sent
/// even when empty.
pub struct MulticastClient {
    interface: Ipv4Addr,
    group: SocketAddrV4,
    ttl: u32,
    socket: Option<UdpSocket>,
}

impl MulticastClient {
    /// Creates an unopened client sending to `group:port` through the given
    /// local interface.
    pub fn new(interface: Ipv4Addr, group: Ipv4Addr, port: u16, ttl: u32) -> Self {
        Self {
            interface,
            group: SocketAddrV4::new(group, port),
            ttl,
            socket: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Creates the datagram socket, sets the multicast TTL and the outbound
    /// interface, and binds to an ephemeral port. A no-op if already open.
    ///
    /// Must be called within a tokio runtime.
    pub fn open_socket(&mut self) -> Result<(), NetworkError> {
        if self.is_open() {
            return Ok(());
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_multicast_ttl_v4(self.ttl)?;
        socket.set_multicast_if_v4(&self.interface)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;

        self.socket = Some(UdpSocket::from_std(socket.into())?);
        debug!("Opened a multicast socket towards {}", self.group);

        Ok(())
    }

    /// Closes the socket. Closing an already-closed socket has no effect.
    pub fn close_socket(&mut self) {
        self.socket = None;
    }

    /// Sends one frame to the group as a header datagram followed by a body
    /// datagram.
    pub async fn send_message(&self, message: &Message) -> Result<(), NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::SocketNotOpen)?;
        let group = SocketAddr::from(self.group);

        let header = message.header().as_bytes();
        let sent = socket.send_to(&header, group).await?;
        if sent < header.len() {
            return Err(short_write(sent, header.len()));
        }

        let sent = socket.send_to(message.body(), group).await?;
        if sent < message.len() {
            return Err(short_write(sent, message.len()));
        }
        trace!("Sent a {} to {}", message, self.group);

        Ok(())
    }

    /// This endpoint never receives.
    pub async fn receive_message(&self) -> Result<Message, NetworkError> {
        Err(NetworkError::ReceiveUnsupported)
    }
}

fn short_write(sent: usize, expected: usize) -> NetworkError {
    NetworkError::Io(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        format!("sent {} of {} bytes", sent, expected),
    ))
}
