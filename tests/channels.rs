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
use meshwire::{Message, NetworkError, Request};

use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

const PING_PONG: u32 = 0x20;
const STREAM: u32 = 0x21;
const SINK: u32 = 0x22;
const HOLD: u32 = 0x23;

/// A handler replying once and dropping the exchange.
fn register_pong(node: &meshwire::Node) {
    node.add_handler(PING_PONG, |mut request: Request| async move {
        let message = request.receive().await?;
        let mut reply = b"pong:".to_vec();
        reply.extend_from_slice(message.body());
        request.send(Message::new(PING_PONG, reply)).await?;
        Ok(())
    })
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn request_with_a_single_reply() {
    let (a, b) = connect_pair().await;
    register_pong(&b.node);

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(PING_PONG, b"ping".to_vec()))
        .await
        .unwrap();

    let reply = channel.read().await.unwrap();
    assert_eq!(reply.protocol(), PING_PONG);
    assert_eq!(reply.body(), b"pong:ping");

    // The handler dropped its end, so the next read reports the close.
    assert!(matches!(
        channel.read().await,
        Err(NetworkError::ChannelClosed)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn streamed_replies_arrive_in_order() {
    let (a, b) = connect_pair().await;

    b.node
        .add_handler(STREAM, |mut request: Request| async move {
            let _ = request.receive().await?;
            for body in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
                request.send(Message::new(STREAM, body)).await?;
            }
            Ok(())
        })
        .unwrap();

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(STREAM, b"go".to_vec()))
        .await
        .unwrap();

    for expected in [b"a", b"b", b"c"] {
        assert_eq!(channel.read().await.unwrap().body(), expected);
    }
    assert!(matches!(
        channel.read().await,
        Err(NetworkError::ChannelClosed)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_stream_both_ways() {
    let (a, b) = connect_pair().await;

    // Echo every message until the requester closes.
    b.node
        .add_handler(SINK, |mut request: Request| async move {
            loop {
                match request.receive().await {
                    Ok(message) => request.send(message).await?,
                    Err(_) => return Ok(()),
                }
            }
        })
        .unwrap();

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(SINK, b"0".to_vec()))
        .await
        .unwrap();
    assert_eq!(channel.read().await.unwrap().body(), b"0");

    for i in 1..5u8 {
        channel
            .write(Message::new(SINK, vec![b'0' + i]))
            .await
            .unwrap();
        assert_eq!(channel.read().await.unwrap().body(), [b'0' + i]);
    }

    channel.close().await;
    assert!(matches!(
        channel.write(Message::new(SINK, vec![])).await,
        Err(NetworkError::ChannelClosed)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_timeout_elapses_without_a_reply() {
    let (a, b) = connect_pair().await;

    // A handler that never replies, holding the exchange open.
    b.node
        .add_handler(HOLD, |mut request: Request| async move {
            loop {
                if request.receive().await.is_err() {
                    return Ok(());
                }
            }
        })
        .unwrap();

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![]))
        .await
        .unwrap();

    assert!(matches!(
        channel.read_timeout(Duration::from_millis(50)).await,
        Err(NetworkError::ReceiveTimeout)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_ids_are_exhausted_and_recycled() {
    let mut config_a = test_config();
    config_a.set_max_channels(4);
    let a = start_node(config_a).await;
    let b = start_node(test_config()).await;

    announce_to(&a, &b).await;
    wait_until(Duration::from_secs(5), || {
        a.node.is_connected(Ipv4Addr::LOCALHOST) && b.node.is_connected(Ipv4Addr::LOCALHOST)
    })
    .await;

    // Hold every exchange open on the responding side.
    b.node
        .add_handler(HOLD, |mut request: Request| async move {
            loop {
                if request.receive().await.is_err() {
                    return Ok(());
                }
            }
        })
        .unwrap();

    let mut channels = Vec::new();
    for _ in 0..4 {
        channels.push(
            a.node
                .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![]))
                .await
                .unwrap(),
        );
    }

    // All ids are out; the next request blocks.
    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        a.node
            .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![])),
    )
    .await;
    assert!(blocked.is_err());

    // Closing one frees its id and unblocks a new request.
    channels.pop().unwrap().close().await;
    let channel = tokio::time::timeout(
        Duration::from_secs(5),
        a.node
            .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![])),
    )
    .await
    .expect("a released channel id should unblock the next request")
    .unwrap();

    channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_a_channel_closes_it_remotely() {
    // A single channel id makes the recycling observable: nothing else can
    // proceed until the dropped channel's id is back on the free list.
    let mut config_a = test_config();
    config_a.set_max_channels(1);
    let a = start_node(config_a).await;
    let b = start_node(test_config()).await;

    announce_to(&a, &b).await;
    wait_until(Duration::from_secs(5), || {
        a.node.is_connected(Ipv4Addr::LOCALHOST) && b.node.is_connected(Ipv4Addr::LOCALHOST)
    })
    .await;

    // Counts how many exchanges the responding side saw closed under it.
    let closes = Arc::new(AtomicUsize::new(0));
    b.node
        .add_handler(HOLD, {
            let closes = closes.clone();
            move |mut request: Request| {
                let closes = closes.clone();
                async move {
                    while request.receive().await.is_ok() {}
                    closes.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), NetworkError>(())
                }
            }
        })
        .unwrap();

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![]))
        .await
        .unwrap();
    let id = channel.id();

    // No explicit close: dropping the handle must still put the close
    // frame on the wire.
    drop(channel);

    // The responder observes it as the end of its exchange...
    wait_until(Duration::from_secs(5), || closes.load(Ordering::SeqCst) == 1).await;

    // ...and the id returns to the free list, unblocking the next request.
    let next = tokio::time::timeout(
        Duration::from_secs(5),
        a.node
            .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![])),
    )
    .await
    .expect("the dropped channel's id should be released")
    .unwrap();
    assert_eq!(next.id(), id);

    next.close().await;
    wait_until(Duration::from_secs(5), || closes.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_close_is_idempotent_on_the_wire() {
    let (a, b) = connect_pair().await;
    register_pong(&b.node);

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(PING_PONG, b"x".to_vec()))
        .await
        .unwrap();
    assert_eq!(channel.read().await.unwrap().body(), b"pong:x");

    channel.close().await;
    channel.close().await;
    assert!(channel.is_closed());

    // The connection survives the double close and carries new exchanges.
    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(PING_PONG, b"y".to_vec()))
        .await
        .unwrap();
    assert_eq!(channel.read().await.unwrap().body(), b"pong:y");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_peer_shutdown_closes_inflight_requests() {
    let (a, b) = connect_pair().await;

    // Hold the exchange so the reply never comes.
    b.node
        .add_handler(HOLD, |mut request: Request| async move {
            loop {
                if request.receive().await.is_err() {
                    return Ok(());
                }
            }
        })
        .unwrap();

    let channel = a
        .node
        .send_request(Ipv4Addr::LOCALHOST, Message::new(HOLD, vec![]))
        .await
        .unwrap();

    b.node.shut_down().await;

    // The requester observes the close without a reply ever arriving.
    let result = tokio::time::timeout(Duration::from_secs(5), channel.read())
        .await
        .expect("the disconnect should close the channel");
    assert!(matches!(result, Err(NetworkError::ChannelClosed)));

    wait_until(Duration::from_secs(5), || {
        a.disconnects.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(!a.node.is_connected(Ipv4Addr::LOCALHOST));
}
