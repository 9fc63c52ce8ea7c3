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

use crate::errors::NetworkError;

use std::{net::Ipv4Addr, time::Duration};

/// The pre-configured parameters of a node.
#[derive(Clone, Debug)]
pub struct Config {
    /// The TCP listen port; 0 picks an ephemeral port.
    port: u16,
    /// The UDP port bound for discovery; announcements are sent to the
    /// group on this port.
    discovery_port: u16,
    /// The multicast group used for discovery.
    multicast_group: Ipv4Addr,
    /// The local interface announcements are sent through.
    multicast_interface: Ipv4Addr,
    /// The local interface addresses to join the group on; also used to
    /// recognize this node's own traffic.
    interfaces: Vec<Ipv4Addr>,
    /// The TTL of the discovery datagrams; 1 keeps them link-local.
    multicast_ttl: u32,
    /// The maximum number of concurrently open request channels per peer.
    max_channels: usize,
    /// The capacity of each channel's message buffer.
    message_buffer_capacity: usize,
    /// How many times the discovery announcement is attempted.
    discovery_retries: usize,
    /// The pause between discovery attempts.
    discovery_retry_interval: Duration,
    /// How long a handshake may take before the attempt is abandoned.
    handshake_timeout: Duration,
}

impl Config {
    /// Creates a configuration with the default tunables.
    ///
    /// The discovery port defaults to `port`; several nodes sharing a host
    /// need distinct listen ports but the same discovery port.
    pub fn new(
        port: u16,
        multicast_group: Ipv4Addr,
        multicast_interface: Ipv4Addr,
        interfaces: Vec<Ipv4Addr>,
    ) -> Result<Self, NetworkError> {
        if !multicast_group.is_multicast() {
            return Err(NetworkError::InvalidMulticastGroup(multicast_group));
        }

        Ok(Self {
            port,
            discovery_port: port,
            multicast_group,
            multicast_interface,
            interfaces,
            multicast_ttl: 1,
            max_channels: 1024,
            message_buffer_capacity: 1024,
            discovery_retries: 5,
            discovery_retry_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(3),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
    }

    pub fn multicast_group(&self) -> Ipv4Addr {
        self.multicast_group
    }

    pub fn multicast_interface(&self) -> Ipv4Addr {
        self.multicast_interface
    }

    pub fn interfaces(&self) -> &[Ipv4Addr] {
        &self.interfaces
    }

    pub fn multicast_ttl(&self) -> u32 {
        self.multicast_ttl
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    pub fn message_buffer_capacity(&self) -> usize {
        self.message_buffer_capacity
    }

    pub fn discovery_retries(&self) -> usize {
        self.discovery_retries
    }

    pub fn discovery_retry_interval(&self) -> Duration {
        self.discovery_retry_interval
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn set_discovery_port(&mut self, port: u16) -> &mut Self {
        self.discovery_port = port;
        self
    }

    pub fn set_multicast_ttl(&mut self, ttl: u32) -> &mut Self {
        self.multicast_ttl = ttl;
        self
    }

    pub fn set_max_channels(&mut self, max_channels: usize) -> &mut Self {
        assert!(max_channels > 0, "a node needs at least one channel per peer");
        self.max_channels = max_channels;
        self
    }

    pub fn set_message_buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        assert!(capacity > 0, "a message buffer can't have a zero capacity");
        self.message_buffer_capacity = capacity;
        self
    }

    pub fn set_discovery_retries(&mut self, retries: usize, interval: Duration) -> &mut Self {
        self.discovery_retries = retries;
        self.discovery_retry_interval = interval;
        self
    }

    pub fn set_handshake_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.handshake_timeout = timeout;
        self
    }
}
