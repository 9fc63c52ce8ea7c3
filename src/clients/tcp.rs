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
    errors::NetworkError,
    message::{read_message, write_message, Message},
};

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{lookup_host, TcpSocket, TcpStream};

/// A connected TCP endpoint owning its socket.
///
/// The client is constructed unopened and connected with
/// [`TcpClient::open_socket`], or built directly around an already-accepted
/// stream with [`TcpClient::from_stream`]. All I/O fails fast while the
/// socket is not open.
pub struct TcpClient {
    address: String,
    port: u16,
    local_address: Option<Ipv4Addr>,
    peer_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl TcpClient {
    /// Creates an unopened client for the given remote address.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            local_address: None,
            peer_addr: None,
            stream: None,
        }
    }

    /// Wraps an already-connected stream, typically one accepted by a
    /// server. [`TcpClient::open_socket`] is then a no-op.
    pub fn from_stream(stream: TcpStream) -> Result<Self, NetworkError> {
        let peer_addr = stream.peer_addr()?;

        Ok(Self {
            address: peer_addr.ip().to_string(),
            port: peer_addr.port(),
            local_address: None,
            peer_addr: Some(peer_addr),
            stream: Some(stream),
        })
    }

    /// Fixes the local address the connection is opened from. Without it,
    /// the OS picks a source address per its routing table. Multi-homed
    /// hosts (and several nodes sharing one host) use this so peers record
    /// a single, stable address per node.
    pub fn set_local_address(&mut self, local_address: Ipv4Addr) -> &mut Self {
        self.local_address = Some(local_address);
        self
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// The address of the remote endpoint.
    pub fn peer_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.peer_addr.ok_or(NetworkError::SocketNotOpen)
    }

    /// Resolves the configured address and connects to the first candidate
    /// that accepts, in resolution order. A no-op if the socket is already
    /// open; on failure, returns the last OS error encountered.
    pub async fn open_socket(&mut self) -> Result<(), NetworkError> {
        if self.is_open() {
            return Ok(());
        }

        let mut last_error = None;
        for candidate in lookup_host((self.address.as_str(), self.port)).await? {
            // This stack is IPv4-only.
            if !candidate.is_ipv4() {
                continue;
            }
            match self.connect_to(candidate).await {
                Ok(stream) => {
                    debug!("Connected to {}", candidate);
                    self.peer_addr = Some(candidate);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(NetworkError::Io(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no usable address for {}:{}", self.address, self.port),
            )
        })))
    }

    /// Connects to one candidate, from the fixed local address if one was
    /// set.
    async fn connect_to(&self, candidate: SocketAddr) -> std::io::Result<TcpStream> {
        match self.local_address {
            Some(local_address) => {
                let socket = TcpSocket::new_v4()?;
                socket.bind(SocketAddr::from((local_address, 0)))?;
                socket.connect(candidate).await
            }
            None => TcpStream::connect(candidate).await,
        }
    }

    /// Closes the socket. Closing an already-closed socket has no effect.
    pub fn close_socket(&mut self) {
        self.stream = None;
        self.peer_addr = None;
    }

    /// Writes one message to the remote endpoint.
    pub async fn send_message(&mut self, message: &Message) -> Result<(), NetworkError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(write_message(stream, message).await?),
            None => Err(NetworkError::SocketNotOpen),
        }
    }

    /// Reads one message from the remote endpoint, blocking until a full
    /// frame has arrived.
    pub async fn receive_message(&mut self) -> Result<Message, NetworkError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(read_message(stream).await?),
            None => Err(NetworkError::SocketNotOpen),
        }
    }

    /// Surrenders the underlying stream, e.g. to register it with a
    /// connector.
    pub(crate) fn into_stream(self) -> Result<TcpStream, NetworkError> {
        self.stream.ok_or(NetworkError::SocketNotOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn operations_fail_while_unopened() {
        let mut client = TcpClient::new("127.0.0.1", 0);

        assert!(!client.is_open());
        assert!(matches!(client.peer_addr(), Err(NetworkError::SocketNotOpen)));
        assert!(matches!(
            client.send_message(&Message::new(0x20, vec![])).await,
            Err(NetworkError::SocketNotOpen)
        ));
        assert!(matches!(
            client.receive_message().await,
            Err(NetworkError::SocketNotOpen)
        ));
    }

    #[tokio::test]
    async fn open_send_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let message = read_message(&mut stream).await.unwrap();
            assert_eq!(message.body(), b"ping");
            write_message(&mut stream, &Message::new(0x20, b"pong".to_vec()))
                .await
                .unwrap();
        });

        let mut client = TcpClient::new("127.0.0.1", addr.port());
        client.open_socket().await.unwrap();
        assert!(client.is_open());

        // Opening an open socket is a no-op.
        client.open_socket().await.unwrap();

        client
            .send_message(&Message::new(0x20, b"ping".to_vec()))
            .await
            .unwrap();
        let reply = client.receive_message().await.unwrap();
        assert_eq!(reply.body(), b"pong");

        client.close_socket();
        client.close_socket();
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn open_binds_the_fixed_local_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut client = TcpClient::new("127.0.0.1", addr.port());
        client.set_local_address(Ipv4Addr::LOCALHOST);
        client.open_socket().await.unwrap();

        let local = client.stream.as_ref().unwrap().local_addr().unwrap();
        assert_eq!(local.ip(), std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn open_fails_when_nobody_listens() {
        // Bind and immediately drop to get a (very likely) free port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = TcpClient::new("127.0.0.1", addr.port());
        assert!(client.open_socket().await.is_err());
        assert!(!client.is_open());
    }
}
