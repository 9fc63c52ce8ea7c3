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
    channels::{channel::ChannelState, Channel, ChannelRole},
    connection::ConnWriter,
    errors::{MessageError, NetworkError},
    message::{protocols, Message},
};

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// The per-peer allocator and router for multiplexed channels.
///
/// Requester ids are drawn from this side's free list; responder ids are
/// chosen by the peer, so the two sides can never collide. At any instant an
/// id is either on the free list or in at most one of the two maps.
pub struct ChannelManager {
    /// The ids available for new request channels, paired with the
    /// semaphore: an id is pushed back before its permit is released.
    free_list: Mutex<Vec<u32>>,
    slots: Arc<Semaphore>,
    requesters: Mutex<HashMap<u32, Arc<ChannelState>>>,
    responders: Mutex<HashMap<u32, Arc<ChannelState>>>,
    writer: Arc<ConnWriter>,
    buffer_capacity: usize,
    /// Handed to each channel so its close path can detach itself.
    this: Weak<ChannelManager>,
}

impl ChannelManager {
    /// Creates a manager multiplexing up to `max_channels` locally-opened
    /// channels over the given connection.
    pub(crate) fn new(
        writer: Arc<ConnWriter>,
        max_channels: usize,
        buffer_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            free_list: Mutex::new((0..max_channels as u32).rev().collect()),
            slots: Arc::new(Semaphore::new(max_channels)),
            requesters: Default::default(),
            responders: Default::default(),
            writer,
            buffer_capacity,
            this: this.clone(),
        })
    }

    /// Opens a new request channel, blocking while all ids are in use.
    pub async fn create_request_channel(&self) -> Result<Channel, NetworkError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| NetworkError::ChannelClosed)?;
        let id = self
            .free_list
            .lock()
            .pop()
            .expect("the free list and its semaphore went out of sync");

        let state = Arc::new(ChannelState::new(
            id,
            ChannelRole::Requester,
            self.buffer_capacity,
            self.writer.clone(),
            self.this.clone(),
            Some(permit),
        ));
        self.requesters.lock().insert(id, state.clone());
        trace!("Opened request channel {} to {}", id, self.writer.addr());

        Ok(Channel::new(state))
    }

    /// Routes one inbound frame into the channel it belongs to.
    ///
    /// Returns the inner protocol tag and the new responder end when the
    /// frame opened an exchange, so the caller can dispatch a handler for it.
    pub async fn forward(&self, message: Message) -> Result<Option<(u32, Channel)>, NetworkError> {
        match message.protocol() {
            protocols::REQUEST_PAYLOAD => {
                let (id, inner) = message.unwrap()?;
                let inner_protocol = inner.protocol();

                // The peer chose the id, so no free-list slot is consumed.
                let (state, created) = {
                    let mut responders = self.responders.lock();
                    match responders.get(&id) {
                        Some(state) => (state.clone(), false),
                        None => {
                            let state = Arc::new(ChannelState::new(
                                id,
                                ChannelRole::Responder,
                                self.buffer_capacity,
                                self.writer.clone(),
                                self.this.clone(),
                                None,
                            ));
                            responders.insert(id, state.clone());
                            trace!(
                                "Opened response channel {} from {}",
                                id,
                                self.writer.addr()
                            );
                            (state, true)
                        }
                    }
                };

                match state.push(inner).await {
                    Ok(()) => {}
                    Err(NetworkError::ChannelClosed) => {
                        debug!("Dropped a payload for the closed channel {}", id);
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }

                if created {
                    Ok(Some((inner_protocol, Channel::new(state))))
                } else {
                    Ok(None)
                }
            }
            protocols::RESPONSE_PAYLOAD => {
                let (id, inner) = message.unwrap()?;

                let state = self.requesters.lock().get(&id).cloned();
                match state {
                    Some(state) => match state.push(inner).await {
                        Ok(()) => Ok(None),
                        Err(NetworkError::ChannelClosed) => {
                            debug!("Dropped a payload for the closed channel {}", id);
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    },
                    // A response for a channel this side never opened.
                    None => Err(NetworkError::ChannelNotFound(id)),
                }
            }
            protocols::REQUEST_CLOSE => {
                let id = close_frame_id(&message)?;
                let state = self.responders.lock().get(&id).cloned();
                match state {
                    Some(state) => state.close().await,
                    None => debug!("Channel {} is already gone", id),
                }

                Ok(None)
            }
            protocols::RESPONSE_CLOSE => {
                // Only the requester end closes here; the responder end is
                // closed by its own side.
                let id = close_frame_id(&message)?;
                let state = self.requesters.lock().get(&id).cloned();
                match state {
                    Some(state) => state.close().await,
                    None => debug!("Channel {} is already gone", id),
                }

                Ok(None)
            }
            protocols::CHANNEL_ERROR => {
                if message.len() < 4 {
                    return Err(MessageError::InvalidWrap(message.len()).into());
                }
                let id = LittleEndian::read_u32(&message.body()[..4]);
                error!(
                    "Channel {} to {} reported an error: {}",
                    id,
                    self.writer.addr(),
                    String::from_utf8_lossy(&message.body()[4..])
                );

                let state = self.requesters.lock().get(&id).cloned();
                if let Some(state) = state {
                    state.close().await;
                }

                Ok(None)
            }
            protocol => Err(NetworkError::InvalidProtocol(protocol)),
        }
    }

    /// Detaches a closed channel and, for requester ids, returns the id to
    /// the free list. Called exactly once per channel lifecycle, from the
    /// channel's own close path.
    pub(crate) fn release(&self, id: u32, role: ChannelRole) {
        match role {
            ChannelRole::Requester => {
                self.requesters.lock().remove(&id);
                self.free_list.lock().push(id);
            }
            ChannelRole::Responder => {
                self.responders.lock().remove(&id);
            }
        }
    }

    /// Closes every still-open channel in both maps, fails any callers
    /// blocked on a free id, and shuts the write side down. Used when the
    /// peer connection goes away.
    pub async fn shutdown(&self) {
        self.slots.close();

        let requesters: Vec<_> = self.requesters.lock().values().cloned().collect();
        let responders: Vec<_> = self.responders.lock().values().cloned().collect();

        for state in requesters.into_iter().chain(responders) {
            state.close().await;
        }

        self.writer.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn free_ids(&self) -> usize {
        self.free_list.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn open_channels(&self) -> (usize, usize) {
        (self.requesters.lock().len(), self.responders.lock().len())
    }
}

/// Extracts the channel id from a close frame, whose body is exactly the
/// 4-byte id.
fn close_frame_id(message: &Message) -> Result<u32, NetworkError> {
    if message.len() != 4 {
        return Err(MessageError::InvalidWrap(message.len()).into());
    }
    Ok(LittleEndian::read_u32(message.body()))
}
