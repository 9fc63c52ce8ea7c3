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

//! A peer-to-peer server framework for local networks.
//!
//! Cooperating processes discover each other over UDP multicast, maintain a
//! single TCP connection per peer, and multiplex any number of independent
//! request/response channels over it. User code registers protocol handlers
//! on a [`Node`] and exchanges length-prefixed, protocol-tagged messages.

#[macro_use]
extern crate log;

pub mod buffer;
pub use self::buffer::MessageBuffer;

pub mod channels;
pub use self::channels::Channel;

pub mod clients;
pub use self::clients::{MulticastClient, TcpClient};

pub mod config;
pub use self::config::Config;

pub mod connection;

pub mod connector;
pub use self::connector::Connector;

pub mod errors;
pub use self::errors::NetworkError;

pub mod message;
pub use self::message::{protocols, Message, MessageHeader};

pub mod node;
pub use self::node::{Node, PeerCallback};

pub mod request;
pub use self::request::{Handler, Request};

pub mod servers;
pub use self::servers::{TcpServer, UdpServer};

/// The maximum size of a message accepted from a stream, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// The maximum size of a message body carried in a single datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
