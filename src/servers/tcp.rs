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
    message::read_message,
    request::{Handler, HandlerTable, Request, TcpRequest},
};

use std::{net::SocketAddr, sync::Arc};

use once_cell::sync::OnceCell;
use tokio::{
    net::{TcpListener, TcpStream},
    task::{self, JoinHandle},
};

/// A server accepting framed connections and dispatching each one by the
/// protocol tag of its first message.
///
/// The accepted connection is owned by the request handed to the handler;
/// dropping the request closes it, unless the handler took the stream out to
/// keep it alive.
pub struct TcpServer {
    handlers: Arc<HandlerTable>,
    local_address: OnceCell<SocketAddr>,
}

impl TcpServer {
    pub fn new(default_handler: Arc<dyn Handler>) -> Self {
        Self {
            handlers: Arc::new(HandlerTable::new(default_handler)),
            local_address: OnceCell::new(),
        }
    }

    /// Registers a handler for the given protocol tag. Fails if the tag
    /// already has one.
    pub fn add_handler<H: Handler>(&self, protocol: u32, handler: H) -> Result<(), NetworkError> {
        self.handlers.add(protocol, Arc::new(handler))
    }

    /// The address the server is bound to, once listening.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address.get().copied()
    }

    /// Binds to `0.0.0.0:port` (an ephemeral port if 0) and starts the
    /// accept loop. Returns the bound address and the loop's task handle.
    pub async fn listen(&self, port: u16) -> Result<(SocketAddr, JoinHandle<()>), NetworkError> {
        if self.local_address.get().is_some() {
            return Err(NetworkError::SocketAlreadyOpen);
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_address = listener.local_addr()?;
        let _ = self.local_address.set(local_address);
        info!("Listening at {}", local_address);

        let handlers = self.handlers.clone();
        let task = task::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_address)) => {
                        debug!("Got a connection request from {}", peer_address);
                        let handlers = handlers.clone();
                        task::spawn(async move {
                            handle_connection(stream, peer_address, handlers).await;
                        });
                    }
                    Err(e) => error!("Failed to accept a connection: {}", e),
                }
            }
        });

        Ok((local_address, task))
    }
}

/// Reads exactly one message off a fresh connection and hands the resulting
/// request to the handler registered for its tag.
async fn handle_connection(
    mut stream: TcpStream,
    peer_address: SocketAddr,
    handlers: Arc<HandlerTable>,
) {
    let message = match read_message(&mut stream).await {
        Ok(message) => message,
        Err(e) => {
            error!(
                "Failed to read the first message from {}: {}",
                peer_address, e
            );
            return;
        }
    };

    let protocol = message.protocol();
    let handler = handlers.get(protocol);
    let request = Request::Tcp(TcpRequest::new(stream, peer_address, message));

    if let Err(e) = handler.handle(request).await {
        error!(
            "The handler for protocol {:#04x} failed on a request from {}: {}",
            protocol, peer_address, e
        );
    }
}
