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
    clients::{MulticastClient, TcpClient},
    config::Config,
    connector::Connector,
    errors::NetworkError,
    message::{protocols, Message},
    request::{Handler, HandlerTable, Request},
    servers::{TcpServer, UdpServer},
};

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::Deref,
    sync::{Arc, Weak},
};

use byteorder::{ByteOrder, LittleEndian};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle, time::sleep};

/// A callback invoked when a peer joins or leaves the group.
pub type PeerCallback = Arc<dyn Fn(Ipv4Addr) + Send + Sync>;

/// The internal state of a node.
pub struct InnerNode {
    /// The pre-configured parameters of this node.
    pub config: Config,
    /// The registry of peer connections and their multiplexed channels.
    pub connector: Connector,
    /// The server accepting peer connections.
    tcp_server: TcpServer,
    /// The server receiving discovery announcements.
    udp_server: UdpServer,
    /// The client announcing this node to the group.
    multicast: AsyncMutex<MulticastClient>,
    /// The user-registered protocol handlers.
    handlers: Arc<HandlerTable>,
    /// The address of the TCP listener, set once `run` binds it.
    local_address: OnceCell<SocketAddr>,
    /// The address of the discovery socket, set once `run` binds it.
    discovery_address: OnceCell<SocketAddr>,
    /// Invoked after a handshake completes.
    on_peer_connect: Option<PeerCallback>,
    /// The service tasks spawned by the node.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for InnerNode {
    // This won't make a difference in regular scenarios, but keeps tests
    // from leaking service tasks.
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..).rev() {
            task.abort();
        }
    }
}

/// A member of a distributed group.
///
/// A node owns a TCP server for peer connections, a UDP server joined to the
/// discovery group, a multicast client for its own announcements, and a
/// connector multiplexing request/response channels over one connection per
/// peer. User code registers handlers for its protocol tags and exchanges
/// messages with [`Node::send_request`].
#[derive(Clone)]
pub struct Node(Arc<InnerNode>);

impl Deref for Node {
    type Target = Arc<InnerNode>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Node {
    /// Creates a new instance of `Node`.
    ///
    /// Traffic with an unregistered protocol tag lands in `default_handler`;
    /// the callbacks fire on completed handshakes and lost peers.
    pub fn new(
        config: Config,
        default_handler: Arc<dyn Handler>,
        on_peer_connect: Option<PeerCallback>,
        on_peer_disconnect: Option<PeerCallback>,
    ) -> Result<Self, NetworkError> {
        let handlers = Arc::new(HandlerTable::new(default_handler));

        // The servers and the connector all funnel traffic into the user
        // handler table, dispatching by the protocol tag of the request.
        let dispatch: Arc<dyn Handler> = {
            let handlers = handlers.clone();
            Arc::new(move |request: Request| {
                let handlers = handlers.clone();
                async move { handlers.get(request.protocol()).handle(request).await }
            })
        };

        let disconnect_callback: Arc<dyn Fn(Ipv4Addr) + Send + Sync> = {
            Arc::new(move |peer| {
                if let Some(callback) = &on_peer_disconnect {
                    callback(peer);
                }
            })
        };

        let connector = Connector::new(
            dispatch.clone(),
            disconnect_callback,
            config.max_channels(),
            config.message_buffer_capacity(),
        );
        let tcp_server = TcpServer::new(dispatch.clone());
        let udp_server = UdpServer::new(dispatch);
        let multicast = MulticastClient::new(
            config.multicast_interface(),
            config.multicast_group(),
            config.discovery_port(),
            config.multicast_ttl(),
        );

        let node = Node(Arc::new(InnerNode {
            config,
            connector,
            tcp_server,
            udp_server,
            multicast: AsyncMutex::new(multicast),
            handlers,
            local_address: OnceCell::new(),
            discovery_address: OnceCell::new(),
            on_peer_connect,
            tasks: Default::default(),
        }));

        // Wire up the handshake: announcements arrive over UDP, their
        // acknowledgements over TCP. The handlers hold a weak reference so
        // the node can be dropped while its servers still run.
        let weak = Arc::downgrade(&node.0);
        node.udp_server
            .add_handler(protocols::CONNECT, connect_handler(weak.clone()))?;
        node.tcp_server
            .add_handler(protocols::CONNECT_ACK_REQUEST, connect_ack_handler(weak))?;

        Ok(node)
    }

    /// Registers a handler for a user protocol tag. Reserved tags are
    /// rejected, as is a tag that already has a handler.
    pub fn add_handler<H: Handler>(&self, protocol: u32, handler: H) -> Result<(), NetworkError> {
        if protocols::is_reserved(protocol) {
            return Err(NetworkError::InvalidProtocol(protocol));
        }
        self.handlers.add(protocol, Arc::new(handler))
    }

    /// Starts the TCP and UDP servers, then announces this node to the
    /// multicast group, retrying a bounded number of times.
    ///
    /// The servers stay up even if every announcement fails; the caller
    /// decides what to do with the error.
    pub async fn run(&self) -> Result<(), NetworkError> {
        let (local_address, tcp_task) = self.tcp_server.listen(self.config.port()).await?;
        let _ = self.local_address.set(local_address);
        self.register_task(tcp_task);

        let (discovery_address, udp_task) = self
            .udp_server
            .listen(
                self.config.discovery_port(),
                self.config.multicast_group(),
                self.config.interfaces(),
            )
            .await?;
        let _ = self.discovery_address.set(discovery_address);
        self.register_task(udp_task);

        self.announce().await
    }

    /// Multicasts the discovery announcement carrying this node's listen
    /// port.
    async fn announce(&self) -> Result<(), NetworkError> {
        let port = self
            .local_address()
            .map(|address| address.port())
            .unwrap_or_else(|| self.config.port());
        let mut body = [0u8; 2];
        LittleEndian::write_u16(&mut body, port);
        let announcement = Message::new(protocols::CONNECT, body.to_vec());

        let mut attempts = self.config.discovery_retries();
        loop {
            match self.multicast_message(&announcement).await {
                Ok(()) => {
                    debug!("Announced the node to {}", self.config.multicast_group());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to announce the node: {}", e);
                    attempts = attempts.saturating_sub(1);
                    if attempts == 0 {
                        return Err(NetworkError::DiscoveryFailed);
                    }
                    sleep(self.config.discovery_retry_interval()).await;
                }
            }
        }
    }

    /// Sends a message to the whole group, opening the multicast socket on
    /// first use.
    pub async fn multicast_message(&self, message: &Message) -> Result<(), NetworkError> {
        let mut multicast = self.multicast.lock().await;
        multicast.open_socket()?;
        multicast.send_message(message).await
    }

    /// Opens a request channel to a peer and sends the first message on it;
    /// replies are read off the returned channel until it closes.
    pub async fn send_request(
        &self,
        peer: Ipv4Addr,
        message: Message,
    ) -> Result<Channel, NetworkError> {
        self.connector.send_request(peer, message).await
    }

    /// The address of the TCP listener, once [`Node::run`] has bound it.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address.get().copied()
    }

    /// The address of the discovery socket, once [`Node::run`] has bound it.
    pub fn discovery_address(&self) -> Option<SocketAddr> {
        self.discovery_address.get().copied()
    }

    pub fn is_connected(&self, peer: Ipv4Addr) -> bool {
        self.connector.is_connected(peer)
    }

    /// The addresses of all currently connected peers, in no particular
    /// order.
    pub fn connected_peers(&self) -> Vec<Ipv4Addr> {
        self.connector.connected_peers()
    }

    /// Stops the servers, drops every peer connection and closes the
    /// multicast socket.
    pub async fn shut_down(&self) {
        debug!("Shutting down");

        for task in self.tasks.lock().drain(..).rev() {
            task.abort();
        }
        self.connector.shut_down().await;
        self.multicast.lock().await.close_socket();
    }

    fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Handles a discovery announcement: opens a connection to the
    /// announcer and performs the acknowledgement exchange over it.
    async fn handle_connect(&self, mut request: Request) -> Result<(), NetworkError> {
        let message = request.receive().await?;
        if message.len() < 2 {
            warn!("Ignoring a malformed announcement from {}", request.peer_addr());
            return Ok(());
        }
        let peer_port = LittleEndian::read_u16(&message.body()[..2]);

        let peer_ip = match request.peer_addr().ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => return Ok(()),
        };

        // This node's own announcement comes back through the group; it is
        // recognized by carrying our port from one of our own addresses.
        let own_port = self.local_address().map(|address| address.port());
        let own_address =
            peer_ip.is_loopback() || self.config.interfaces().contains(&peer_ip);
        if own_address && Some(peer_port) == own_port {
            trace!("Ignoring our own announcement");
            return Ok(());
        }
        if self.is_connected(peer_ip) {
            debug!("Already connected to {}", peer_ip);
            return Ok(());
        }
        debug!("Discovered peer {}:{}", peer_ip, peer_port);

        let mut client = TcpClient::new(peer_ip.to_string(), peer_port);
        // Connect from the announcing interface, so the peer records this
        // node under the same address its own announcements carry.
        let local_address = self.config.multicast_interface();
        if !local_address.is_unspecified() {
            client.set_local_address(local_address);
        }
        client.open_socket().await?;
        client
            .send_message(&Message::new(protocols::CONNECT_ACK_REQUEST, Vec::new()))
            .await?;

        let response = match tokio::time::timeout(
            self.config.handshake_timeout(),
            client.receive_message(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(NetworkError::HandshakeTimeout(peer_ip)),
        };
        if response.protocol() != protocols::CONNECT_ACK_RESPONSE {
            return Err(NetworkError::InvalidProtocol(response.protocol()));
        }

        match self.connector.add_client(client).await {
            Ok(_) => {}
            // Simultaneous handshakes can race; the first one wins.
            Err(NetworkError::PeerAlreadyConnected(_)) => {
                debug!("Already completed a handshake with {}", peer_ip);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        info!("Completed the handshake with {}", peer_ip);

        if let Some(callback) = &self.on_peer_connect {
            callback(peer_ip);
        }

        Ok(())
    }

    /// Handles the acknowledgement request of a discovered peer: confirms
    /// it and transfers the accepted connection into the connector.
    async fn handle_connect_ack(&self, mut request: Request) -> Result<(), NetworkError> {
        let peer_address = request.peer_addr();
        let peer_ip = match peer_address.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => return Err(NetworkError::PeerAddressNotSupported(peer_address)),
        };

        request
            .send(Message::new(protocols::CONNECT_ACK_RESPONSE, Vec::new()))
            .await?;

        // Keep the connection alive past this request's lifetime.
        let stream = request.take_stream()?;
        let client = TcpClient::from_stream(stream)?;

        match self.connector.add_client(client).await {
            Ok(_) => {}
            Err(NetworkError::PeerAlreadyConnected(_)) => {
                debug!("Already completed a handshake with {}", peer_ip);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        info!("Completed the handshake with {}", peer_ip);

        if let Some(callback) = &self.on_peer_connect {
            callback(peer_ip);
        }

        Ok(())
    }
}

/// The UDP-side handler driving the outbound leg of a handshake.
fn connect_handler(node: Weak<InnerNode>) -> impl Handler {
    move |request: Request| {
        let node = node.clone();
        async move {
            match node.upgrade() {
                Some(inner) => Node(inner).handle_connect(request).await,
                None => Ok(()),
            }
        }
    }
}

/// The TCP-side handler completing the inbound leg of a handshake.
fn connect_ack_handler(node: Weak<InnerNode>) -> impl Handler {
    move |request: Request| {
        let node = node.clone();
        async move {
            match node.upgrade() {
                Some(inner) => Node(inner).handle_connect_ack(request).await,
                None => Ok(()),
            }
        }
    }
}
