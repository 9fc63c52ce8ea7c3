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

pub mod channel;
pub use self::channel::Channel;

pub mod manager;
pub use self::manager::ChannelManager;

use crate::message::protocols;

/// Which end of an exchange a channel is: the requester originated it, the
/// responder received its first message. The role fixes the protocol tags
/// used in the channel's write direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelRole {
    Requester,
    Responder,
}

impl ChannelRole {
    /// The tag carried by this end's payload frames.
    pub fn payload_protocol(self) -> u32 {
        match self {
            Self::Requester => protocols::REQUEST_PAYLOAD,
            Self::Responder => protocols::RESPONSE_PAYLOAD,
        }
    }

    /// The tag carried by this end's close frame.
    pub fn close_protocol(self) -> u32 {
        match self {
            Self::Requester => protocols::REQUEST_CLOSE,
            Self::Responder => protocols::RESPONSE_CLOSE,
        }
    }
}
