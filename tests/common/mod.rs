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

#![allow(dead_code)]

use meshwire::{
    message::protocols, Config, Handler, Message, NetworkError, Node, Request,
};

use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::net::UdpSocket;

/// The group used by the test nodes.
pub const GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 77);

/// A node plus counters for its peer callbacks.
pub struct TestNode {
    pub node: Node,
    pub connects: Arc<AtomicUsize>,
    pub disconnects: Arc<AtomicUsize>,
}

/// A configuration with ephemeral ports, suitable for several nodes sharing
/// the loopback interface.
pub fn test_config() -> Config {
    let mut config = Config::new(0, GROUP, Ipv4Addr::LOCALHOST, vec![]).unwrap();
    config
        .set_discovery_port(0)
        .set_discovery_retries(1, Duration::from_millis(50))
        .set_handshake_timeout(Duration::from_secs(2));

    config
}

fn noop_handler() -> Arc<dyn Handler> {
    Arc::new(|_request: Request| async move { Ok::<(), NetworkError>(()) })
}

/// Starts a node with the given configuration and counting callbacks. The
/// multicast announcement is allowed to fail; these tests drive discovery
/// with unicast datagrams instead.
pub async fn start_node(config: Config) -> TestNode {
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let on_connect = {
        let connects = connects.clone();
        Arc::new(move |_peer: Ipv4Addr| {
            connects.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn(Ipv4Addr) + Send + Sync>
    };
    let on_disconnect = {
        let disconnects = disconnects.clone();
        Arc::new(move |_peer: Ipv4Addr| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn(Ipv4Addr) + Send + Sync>
    };

    let node = Node::new(config, noop_handler(), Some(on_connect), Some(on_disconnect)).unwrap();
    match node.run().await {
        // A missing multicast route only fails the announcement; the
        // servers are up regardless.
        Ok(()) | Err(NetworkError::DiscoveryFailed) => {}
        Err(e) => panic!("failed to start a node: {}", e),
    }

    TestNode {
        node,
        connects,
        disconnects,
    }
}

/// Sends `announcer`'s discovery announcement straight to `receiver`'s
/// discovery socket, standing in for the multicast fabric.
pub async fn announce_to(announcer: &TestNode, receiver: &TestNode) {
    let port = announcer.node.local_address().unwrap().port();
    let target = (
        "127.0.0.1",
        receiver.node.discovery_address().unwrap().port(),
    );

    let message = Message::new(protocols::CONNECT, port.to_le_bytes().to_vec());
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&message.header().as_bytes(), target)
        .await
        .unwrap();
    socket.send_to(message.body(), target).await.unwrap();
}

/// Starts two nodes and completes a handshake between them.
pub async fn connect_pair() -> (TestNode, TestNode) {
    let a = start_node(test_config()).await;
    let b = start_node(test_config()).await;

    announce_to(&a, &b).await;
    wait_until(Duration::from_secs(5), || {
        a.node.is_connected(Ipv4Addr::LOCALHOST) && b.node.is_connected(Ipv4Addr::LOCALHOST)
    })
    .await;

    (a, b)
}

/// Polls a condition until it holds, panicking after the timeout.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for a condition");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
