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
    channels::{Channel, ChannelManager},
    clients::TcpClient,
    connection::{ConnReader, ConnWriter},
    errors::NetworkError,
    message::Message,
    request::{ChannelRequest, Handler, HandlerTable, Request},
};

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use tokio::task::{self, JoinHandle};

/// The record kept for one connected peer.
pub(crate) struct PeerHandle {
    address: SocketAddr,
    channels: Arc<ChannelManager>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// The per-process registry of peer connections.
///
/// Each registered peer gets a dedicated reader task that routes inbound
/// frames into that peer's channels; new inbound exchanges are dispatched to
/// the handler table on their own tasks, so a reader never blocks on user
/// code. At most one peer is kept per IPv4 address.
#[derive(Clone)]
pub struct Connector {
    handlers: Arc<HandlerTable>,
    disconnect_callback: Arc<dyn Fn(Ipv4Addr) + Send + Sync>,
    peers: Arc<RwLock<HashMap<Ipv4Addr, Arc<PeerHandle>>>>,
    max_channels: usize,
    buffer_capacity: usize,
}

impl Connector {
    /// Creates a connector dispatching unregistered tags to the given
    /// default handler and reporting lost peers through the callback.
    pub fn new(
        default_handler: Arc<dyn Handler>,
        disconnect_callback: Arc<dyn Fn(Ipv4Addr) + Send + Sync>,
        max_channels: usize,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            handlers: Arc::new(HandlerTable::new(default_handler)),
            disconnect_callback,
            peers: Default::default(),
            max_channels,
            buffer_capacity,
        }
    }

    /// Registers a handler for the given protocol tag. Fails if the tag
    /// already has one.
    pub fn add_handler<H: Handler>(&self, protocol: u32, handler: H) -> Result<(), NetworkError> {
        self.handlers.add(protocol, Arc::new(handler))
    }

    /// Registers a peer connection and starts its reader task.
    ///
    /// The client is opened first if needed. Fails with
    /// [`NetworkError::PeerAlreadyConnected`] if a peer with the same
    /// address is already registered; the client is dropped (and with it
    /// the socket) in that case.
    pub async fn add_client(&self, mut client: TcpClient) -> Result<Ipv4Addr, NetworkError> {
        client.open_socket().await?;
        let address = client.peer_addr()?;
        let ip = match address.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => return Err(NetworkError::PeerAddressNotSupported(address)),
        };

        let (read_half, write_half) = client.into_stream()?.into_split();
        let writer = Arc::new(ConnWriter::new(address, write_half));
        let reader = ConnReader::new(address, read_half);
        let channels = ChannelManager::new(writer, self.max_channels, self.buffer_capacity);

        let handle = Arc::new(PeerHandle {
            address,
            channels: channels.clone(),
            reader_task: Mutex::new(None),
        });

        {
            let mut peers = self.peers.write();
            if peers.contains_key(&ip) {
                return Err(NetworkError::PeerAlreadyConnected(ip));
            }
            peers.insert(ip, handle.clone());
        }
        info!("Connected to peer {}", address);

        let connector = self.clone();
        let task = task::spawn(async move {
            connector.run_reader(reader, ip, channels).await;
        });
        handle.reader_task.lock().replace(task);

        Ok(ip)
    }

    /// Reads frames from one peer until the connection fails, then tears the
    /// peer down and fires the disconnect callback.
    async fn run_reader(self, mut reader: ConnReader, ip: Ipv4Addr, channels: Arc<ChannelManager>) {
        let address = reader.addr();

        loop {
            let message = match reader.read_message().await {
                Ok(message) => message,
                Err(e) => {
                    if e.is_disconnect() {
                        debug!("The connection to {} was closed", address);
                    } else {
                        error!("Can't read from {}: {}", address, e);
                    }
                    break;
                }
            };

            match channels.forward(message).await {
                Ok(None) => {}
                Ok(Some((protocol, channel))) => {
                    // A new inbound exchange; the handler gets its own task
                    // so this loop keeps draining the socket.
                    let handler = self.handlers.get(protocol);
                    let request =
                        Request::Channel(ChannelRequest::new(address, protocol, channel));
                    task::spawn(async move {
                        if let Err(e) = handler.handle(request).await {
                            error!("The handler for protocol {:#04x} failed: {}", protocol, e);
                        }
                    });
                }
                Err(e) => error!("Can't route a message from {}: {}", address, e),
            }
        }

        self.peers.write().remove(&ip);
        channels.shutdown().await;
        info!("Disconnected from peer {}", address);
        (self.disconnect_callback)(ip);
    }

    /// Opens a new request channel to the peer and sends the first message
    /// on it. Blocks while all of the peer's channel ids are in use. The
    /// reply stream is read off the returned channel.
    pub async fn send_request(
        &self,
        peer: Ipv4Addr,
        message: Message,
    ) -> Result<Channel, NetworkError> {
        let handle = self
            .peers
            .read()
            .get(&peer)
            .cloned()
            .ok_or(NetworkError::PeerNotFound(peer))?;

        let channel = handle.channels.create_request_channel().await?;
        channel.write(message).await?;

        Ok(channel)
    }

    pub fn is_connected(&self, peer: Ipv4Addr) -> bool {
        self.peers.read().contains_key(&peer)
    }

    /// The addresses of all currently connected peers, in no particular
    /// order.
    pub fn connected_peers(&self) -> Vec<Ipv4Addr> {
        self.peers.read().keys().copied().collect()
    }

    /// The full socket address of a connected peer.
    pub fn peer_address(&self, peer: Ipv4Addr) -> Option<SocketAddr> {
        self.peers.read().get(&peer).map(|handle| handle.address)
    }

    /// Drops every peer: reader tasks are aborted, all channels closed and
    /// the write sides shut down. The disconnect callback is not invoked
    /// for peers removed this way.
    pub async fn shut_down(&self) {
        let handles: Vec<_> = self.peers.write().drain().map(|(_, handle)| handle).collect();

        for handle in handles {
            if let Some(task) = handle.reader_task.lock().take() {
                task.abort();
            }
            handle.channels.shutdown().await;
        }
    }
}
