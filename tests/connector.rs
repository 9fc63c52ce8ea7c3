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

mod common;

use common::*;
use meshwire::{
    message::protocols, Connector, Handler, Message, NetworkError, Request, TcpClient,
};

use std::{net::Ipv4Addr, sync::Arc};

use tokio::net::TcpListener;

fn noop_handler() -> Arc<dyn Handler> {
    Arc::new(|_request: Request| async move { Ok::<(), NetworkError>(()) })
}

fn test_connector() -> Connector {
    Connector::new(noop_handler(), Arc::new(|_peer| {}), 16, 16)
}

/// Accepts connections and keeps them open for the duration of the test.
async fn parking_listener() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut streams = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            streams.push(stream);
        }
    });

    address
}

#[tokio::test(flavor = "multi_thread")]
async fn at_most_one_peer_per_address() {
    let connector = test_connector();
    let address = parking_listener().await;

    let mut first = TcpClient::new("127.0.0.1", address.port());
    first.open_socket().await.unwrap();
    connector.add_client(first).await.unwrap();
    assert!(connector.is_connected(Ipv4Addr::LOCALHOST));
    assert_eq!(connector.connected_peers(), vec![Ipv4Addr::LOCALHOST]);

    let mut second = TcpClient::new("127.0.0.1", address.port());
    second.open_socket().await.unwrap();
    assert!(matches!(
        connector.add_client(second).await,
        Err(NetworkError::PeerAlreadyConnected(ip)) if ip == Ipv4Addr::LOCALHOST
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_to_unknown_peers_are_rejected() {
    let connector = test_connector();

    assert!(matches!(
        connector
            .send_request(Ipv4Addr::new(10, 1, 2, 3), Message::new(0x20, vec![]))
            .await,
        Err(NetworkError::PeerNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_handlers_are_rejected() {
    let connector = test_connector();

    connector
        .add_handler(0x20, |_request: Request| async move {
            Ok::<(), NetworkError>(())
        })
        .unwrap();
    assert!(matches!(
        connector.add_handler(0x20, |_request: Request| async move {
            Ok::<(), NetworkError>(())
        }),
        Err(NetworkError::HandlerAlreadyExists(0x20))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn reserved_tags_are_rejected_on_a_node() {
    let node = start_node(test_config()).await;

    assert!(matches!(
        node.node.add_handler(protocols::REQUEST_PAYLOAD, |_request: Request| async move {
            Ok::<(), NetworkError>(())
        }),
        Err(NetworkError::InvalidProtocol(_))
    ));
    assert!(node
        .node
        .add_handler(0x20, |_request: Request| async move {
            Ok::<(), NetworkError>(())
        })
        .is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_dead_peer_is_removed_and_reported() {
    let disconnected = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let connector = {
        let disconnected = disconnected.clone();
        Connector::new(
            noop_handler(),
            Arc::new(move |_peer| {
                disconnected.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
            16,
            16,
        )
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let accepted = tokio::spawn(async move { listener.accept().await.unwrap().0 });

    let mut client = TcpClient::new("127.0.0.1", address.port());
    client.open_socket().await.unwrap();
    connector.add_client(client).await.unwrap();

    // Dropping the accepted stream severs the connection.
    drop(accepted.await.unwrap());

    wait_until(std::time::Duration::from_secs(5), || {
        disconnected.load(std::sync::atomic::Ordering::SeqCst) == 1
    })
    .await;
    assert!(!connector.is_connected(Ipv4Addr::LOCALHOST));
}
