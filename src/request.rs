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
    channels::Channel,
    errors::NetworkError,
    message::{read_message, write_message, Message},
};

use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::TcpStream;

/// A protocol handler. The handler owns the request for its lifetime.
///
/// Any `Fn(Request) -> impl Future<Output = Result<(), NetworkError>>`
/// closure is a handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Result<(), NetworkError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), NetworkError>> + Send + 'static,
{
    async fn handle(&self, request: Request) -> Result<(), NetworkError> {
        (self)(request).await
    }
}

/// A table mapping protocol tags to handlers, with a fallback for
/// unregistered tags. Registering a tag twice is rejected.
pub(crate) struct HandlerTable {
    handlers: RwLock<HashMap<u32, Arc<dyn Handler>>>,
    default_handler: Arc<dyn Handler>,
}

impl HandlerTable {
    pub fn new(default_handler: Arc<dyn Handler>) -> Self {
        Self {
            handlers: Default::default(),
            default_handler,
        }
    }

    pub fn add(&self, protocol: u32, handler: Arc<dyn Handler>) -> Result<(), NetworkError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&protocol) {
            return Err(NetworkError::HandlerAlreadyExists(protocol));
        }
        handlers.insert(protocol, handler);

        Ok(())
    }

    pub fn get(&self, protocol: u32) -> Arc<dyn Handler> {
        self.handlers
            .read()
            .get(&protocol)
            .cloned()
            .unwrap_or_else(|| self.default_handler.clone())
    }
}

/// An inbound exchange handed to a protocol handler, unified over its
/// transport: a fresh TCP connection, a single datagram, or one end of a
/// multiplexed channel.
pub enum Request {
    Tcp(TcpRequest),
    Udp(UdpRequest),
    Channel(ChannelRequest),
}

impl Request {
    /// The address of the peer that sent the request.
    pub fn peer_addr(&self) -> SocketAddr {
        match self {
            Self::Tcp(request) => request.peer_addr,
            Self::Udp(request) => request.peer_addr,
            Self::Channel(request) => request.peer_addr,
        }
    }

    /// The protocol tag of the request's first message.
    pub fn protocol(&self) -> u32 {
        match self {
            Self::Tcp(request) => request.protocol,
            Self::Udp(request) => request.protocol,
            Self::Channel(request) => request.protocol,
        }
    }

    /// Receives the next message of the exchange.
    pub async fn receive(&mut self) -> Result<Message, NetworkError> {
        match self {
            Self::Tcp(request) => request.receive().await,
            Self::Udp(request) => request.receive(),
            Self::Channel(request) => request.channel.read().await,
        }
    }

    /// Like [`Request::receive`], but fails with
    /// [`NetworkError::ReceiveTimeout`] once the given duration elapses.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message, NetworkError> {
        match self {
            Self::Tcp(request) => match tokio::time::timeout(timeout, request.receive()).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::ReceiveTimeout),
            },
            Self::Udp(request) => request.receive(),
            Self::Channel(request) => request.channel.read_timeout(timeout).await,
        }
    }

    /// Sends a message back to the peer. Datagram requests can't reply.
    pub async fn send(&mut self, message: Message) -> Result<(), NetworkError> {
        match self {
            Self::Tcp(request) => request.send(&message).await,
            Self::Udp(_) => Err(NetworkError::SendUnsupported),
            Self::Channel(request) => request.channel.write(message).await,
        }
    }

    /// Ends the exchange, releasing the underlying transport.
    pub async fn terminate(self) {
        match self {
            Self::Tcp(request) => request.terminate().await,
            Self::Udp(_) => {}
            Self::Channel(request) => request.channel.close().await,
        }
    }

    /// Takes ownership of the underlying TCP stream, leaving the request
    /// unable to perform further I/O; its cleanup then no longer closes the
    /// connection. Fails for non-TCP requests.
    pub fn take_stream(&mut self) -> Result<TcpStream, NetworkError> {
        match self {
            Self::Tcp(request) => request.stream.take().ok_or(NetworkError::SocketNotOpen),
            _ => Err(NetworkError::SocketNotOpen),
        }
    }

    /// Returns the channel of a multiplexed request, consuming the request.
    pub fn into_channel(self) -> Option<Channel> {
        match self {
            Self::Channel(request) => Some(request.channel),
            _ => None,
        }
    }
}

/// A request arriving on a fresh inbound TCP connection. The first message
/// is buffered; subsequent receives read from the socket. Dropping the
/// request closes the connection unless the stream was taken out.
pub struct TcpRequest {
    peer_addr: SocketAddr,
    protocol: u32,
    first: Option<Message>,
    stream: Option<TcpStream>,
}

impl TcpRequest {
    pub(crate) fn new(stream: TcpStream, peer_addr: SocketAddr, first: Message) -> Self {
        Self {
            peer_addr,
            protocol: first.protocol(),
            first: Some(first),
            stream: Some(stream),
        }
    }

    async fn receive(&mut self) -> Result<Message, NetworkError> {
        if let Some(message) = self.first.take() {
            return Ok(message);
        }
        match self.stream.as_mut() {
            Some(stream) => Ok(read_message(stream).await?),
            None => Err(NetworkError::SocketNotOpen),
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), NetworkError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(write_message(stream, message).await?),
            None => Err(NetworkError::SocketNotOpen),
        }
    }

    async fn terminate(mut self) {
        if let Some(mut stream) = self.stream.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stream.shutdown().await;
        }
    }
}

/// A request carried by a single datagram: it delivers its message on the
/// first receive, can't reply, and has no connection to release.
pub struct UdpRequest {
    peer_addr: SocketAddr,
    protocol: u32,
    message: Option<Message>,
}

impl UdpRequest {
    pub(crate) fn new(peer_addr: SocketAddr, message: Message) -> Self {
        Self {
            peer_addr,
            protocol: message.protocol(),
            message: Some(message),
        }
    }

    fn receive(&mut self) -> Result<Message, NetworkError> {
        self.message.take().ok_or(NetworkError::ChannelClosed)
    }
}

/// A request multiplexed over a peer connection; receives and replies flow
/// through its channel.
pub struct ChannelRequest {
    peer_addr: SocketAddr,
    protocol: u32,
    channel: Channel,
}

impl ChannelRequest {
    pub(crate) fn new(peer_addr: SocketAddr, protocol: u32, channel: Channel) -> Self {
        Self {
            peer_addr,
            protocol,
            channel,
        }
    }
}
