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

use crate::errors::MessageError;

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

/// The error type shared by every component of the stack.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("the channel is closed")]
    ChannelClosed,

    #[error("no channel with the id {0}")]
    ChannelNotFound(u32),

    #[error("the discovery announcement couldn't be delivered")]
    DiscoveryFailed,

    #[error("a handler is already registered for the protocol {0:#04x}")]
    HandlerAlreadyExists(u32),

    #[error("the handshake with {0} timed out")]
    HandshakeTimeout(Ipv4Addr),

    #[error("{0} is not a multicast address")]
    InvalidMulticastGroup(Ipv4Addr),

    #[error("the protocol {0:#04x} is reserved or unknown")]
    InvalidProtocol(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("the peer address {0} is not IPv4")]
    PeerAddressNotSupported(SocketAddr),

    #[error("the peer {0} is already connected")]
    PeerAlreadyConnected(Ipv4Addr),

    #[error("no connected peer with the address {0}")]
    PeerNotFound(Ipv4Addr),

    #[error("the read timed out")]
    ReceiveTimeout,

    #[error("this request can't receive messages")]
    ReceiveUnsupported,

    #[error("this request can't send messages")]
    SendUnsupported,

    #[error("the socket is already open")]
    SocketAlreadyOpen,

    #[error("the socket is not open")]
    SocketNotOpen,
}

impl NetworkError {
    /// Returns `true` if the error indicates that the remote side went away,
    /// as opposed to a malformed or unroutable message.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Io(err) => [
                ErrorKind::BrokenPipe,
                ErrorKind::ConnectionReset,
                ErrorKind::UnexpectedEof,
            ]
            .contains(&err.kind()),
            Self::Message(err) => err.is_disconnect(),
            _ => false,
        }
    }
}
