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
    message::{Message, MessageHeader, MESSAGE_HEADER_LENGTH},
    request::{Handler, HandlerTable, Request, UdpRequest},
};

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::UdpSocket,
    task::{self, JoinHandle},
};

/// A datagram server joined to a multicast group, dispatching each received
/// frame by its protocol tag.
///
/// A frame arrives as two datagrams, the header followed by the body; the
/// body datagram is present even when empty. The sender of a frame is taken
/// from its header datagram.
pub struct UdpServer {
    handlers: Arc<HandlerTable>,
}

impl UdpServer {
    pub fn new(default_handler: Arc<dyn Handler>) -> Self {
        Self {
            handlers: Arc::new(HandlerTable::new(default_handler)),
        }
    }

    /// Registers a handler for the given protocol tag. Fails if the tag
    /// already has one.
    pub fn add_handler<H: Handler>(&self, protocol: u32, handler: H) -> Result<(), NetworkError> {
        self.handlers.add(protocol, Arc::new(handler))
    }

    /// Binds `0.0.0.0:port` and joins the group on every given interface.
    /// Any failed join aborts the startup. Returns the bound address and
    /// the receive loop's task handle.
    pub async fn listen(
        &self,
        port: u16,
        group: Ipv4Addr,
        interfaces: &[Ipv4Addr],
    ) -> Result<(SocketAddr, JoinHandle<()>), NetworkError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        // Several processes on one host may share the group port.
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
        let socket = UdpSocket::from_std(socket.into())?;

        for interface in interfaces {
            socket.join_multicast_v4(group, *interface)?;
            debug!("Joined {} on interface {}", group, interface);
        }
        let local_address = socket.local_addr()?;
        info!("Listening for datagrams at {}", local_address);

        let handlers = self.handlers.clone();
        let task = task::spawn(async move {
            Self::recv_loop(socket, handlers).await;
        });

        Ok((local_address, task))
    }

    async fn recv_loop(socket: UdpSocket, handlers: Arc<HandlerTable>) {
        let mut header_buffer = [0u8; MESSAGE_HEADER_LENGTH];
        let mut body_buffer = vec![0u8; crate::MAX_DATAGRAM_SIZE];

        loop {
            let (received, sender) = match socket.recv_from(&mut header_buffer).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Failed to receive a datagram: {}", e);
                    continue;
                }
            };
            if received < MESSAGE_HEADER_LENGTH {
                error!("Received a truncated header from {}", sender);
                continue;
            }

            let header = MessageHeader::from(header_buffer);
            if header.length as usize > crate::MAX_DATAGRAM_SIZE {
                error!(
                    "The header from {} declares an oversized body ({} bytes)",
                    sender, header.length
                );
                continue;
            }

            // The body always follows in its own datagram.
            let received = match socket.recv_from(&mut body_buffer).await {
                Ok((received, _)) => received,
                Err(e) => {
                    error!("Failed to receive a datagram: {}", e);
                    continue;
                }
            };
            if received != header.length as usize {
                error!(
                    "The body from {} is {} bytes, the header declared {}",
                    sender, received, header.length
                );
                continue;
            }

            let message = Message::new(header.protocol, body_buffer[..received].to_vec());
            let protocol = message.protocol();
            let handler = handlers.get(protocol);
            let request = Request::Udp(UdpRequest::new(sender, message));

            task::spawn(async move {
                if let Err(e) = handler.handle(request).await {
                    error!(
                        "The handler for protocol {:#04x} failed on a datagram from {}: {}",
                        protocol, sender, e
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NetworkError;

    use tokio::sync::mpsc;

    fn noop_handler() -> Arc<dyn Handler> {
        Arc::new(|_request: Request| async move { Ok::<(), NetworkError>(()) })
    }

    #[tokio::test]
    async fn dispatches_datagram_frames() {
        let server = UdpServer::new(noop_handler());

        let (sender, mut receiver) = mpsc::channel::<(SocketAddr, Vec<u8>)>(1);
        server
            .add_handler(0x22, move |mut request: Request| {
                let sender = sender.clone();
                async move {
                    let peer = request.peer_addr();
                    let message = request.receive().await?;
                    let _ = sender.send((peer, message.into_body())).await;
                    Ok(())
                }
            })
            .unwrap();

        let (address, _task) = server
            .listen(0, Ipv4Addr::new(239, 0, 0, 9), &[])
            .await
            .unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = ("127.0.0.1", address.port());
        let message = Message::new(0x22, b"dgram".to_vec());
        socket
            .send_to(&message.header().as_bytes(), target)
            .await
            .unwrap();
        socket.send_to(message.body(), target).await.unwrap();

        let (peer, body) = receiver.recv().await.unwrap();
        assert_eq!(peer.ip(), socket.local_addr().unwrap().ip());
        assert_eq!(body, b"dgram".to_vec());
    }

    #[tokio::test]
    async fn a_datagram_request_cannot_reply() {
        let server = UdpServer::new(noop_handler());

        let (sender, mut receiver) = mpsc::channel::<Result<(), NetworkError>>(1);
        server
            .add_handler(0x23, move |mut request: Request| {
                let sender = sender.clone();
                async move {
                    let _ = request.receive().await?;
                    let result = request.send(Message::new(0x23, Vec::new())).await;
                    let _ = sender.send(result).await;
                    Ok(())
                }
            })
            .unwrap();

        let (address, _task) = server
            .listen(0, Ipv4Addr::new(239, 0, 0, 9), &[])
            .await
            .unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = ("127.0.0.1", address.port());
        let message = Message::new(0x23, Vec::new());
        socket
            .send_to(&message.header().as_bytes(), target)
            .await
            .unwrap();
        socket.send_to(message.body(), target).await.unwrap();

        assert!(matches!(
            receiver.recv().await.unwrap(),
            Err(NetworkError::SendUnsupported)
        ));
    }
}
