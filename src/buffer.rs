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

use crate::{errors::NetworkError, message::Message};

use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use tokio::sync::Notify;

/// A bounded FIFO of messages with a terminal `closed` state.
///
/// Readers block until a message is available or the buffer is closed;
/// writers block while the buffer is full. After `close`, pushes fail
/// immediately, while pops drain the remaining messages before reporting
/// the buffer as closed.
pub struct MessageBuffer {
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

struct Inner {
    queue: VecDeque<Message>,
    closed: bool,
}

impl MessageBuffer {
    /// Creates a buffer holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a message buffer can't have a zero capacity");

        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    /// Appends a message, blocking while the buffer is full.
    ///
    /// Fails with [`NetworkError::ChannelClosed`] once the buffer is closed.
    pub async fn push(&self, message: Message) -> Result<(), NetworkError> {
        let mut message = Some(message);

        loop {
            // Register for a wakeup before checking the state, so a slot
            // freed (or a close) in between is never missed.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(NetworkError::ChannelClosed);
                }
                if inner.queue.len() < self.capacity {
                    inner.queue.push_back(message.take().expect("the message was already taken"));
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Removes the oldest message, blocking until one is available.
    ///
    /// Fails with [`NetworkError::ChannelClosed`] once the buffer is closed
    /// and drained.
    pub async fn pop(&self) -> Result<Message, NetworkError> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(message) = inner.queue.pop_front() {
                    self.not_full.notify_one();
                    return Ok(message);
                }
                if inner.closed {
                    return Err(NetworkError::ChannelClosed);
                }
            }

            notified.await;
        }
    }

    /// Like [`MessageBuffer::pop`], but fails with
    /// [`NetworkError::ReceiveTimeout`] if no message arrives within the
    /// given duration.
    pub async fn pop_timeout(&self, timeout: Duration) -> Result<Message, NetworkError> {
        match tokio::time::timeout(timeout, self.pop()).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::ReceiveTimeout),
        }
    }

    /// Closes the buffer, waking all blocked readers and writers.
    /// Closing an already-closed buffer has no effect.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);

        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}
