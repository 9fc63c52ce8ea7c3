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
    errors::MessageError,
    message::header::{MessageHeader, MESSAGE_HEADER_LENGTH},
};

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// The size of an inline value carried by a wrapped message.
const WRAP_VALUE_LENGTH: usize = 4;

/// A length-prefixed, protocol-tagged message.
///
/// The header's `length` always equals the body length; constructors and the
/// codec maintain this invariant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    header: MessageHeader,
    body: Vec<u8>,
}

impl Message {
    /// Creates a new message with the given protocol tag and body.
    pub fn new(protocol: u32, body: Vec<u8>) -> Self {
        Self {
            header: MessageHeader::new(body.len() as u32, protocol),
            body,
        }
    }

    /// Assembles a message from a header and a body of matching length.
    pub(crate) fn from_parts(header: MessageHeader, body: Vec<u8>) -> Self {
        debug_assert_eq!(header.length as usize, body.len());
        Self { header, body }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn protocol(&self) -> u32 {
        self.header.protocol
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Extends the message in place to carry an inline value, without nesting
    /// a second frame:
    ///
    /// ```text
    /// | new header | original body | original header | value |
    /// ```
    ///
    /// The outer header takes the given protocol tag; the original header
    /// travels inside the body so the receiver can restore the message with
    /// [`Message::unwrap`].
    pub fn wrap(self, protocol: u32, value: u32) -> Message {
        let Message { header, mut body } = self;

        body.reserve(MESSAGE_HEADER_LENGTH + WRAP_VALUE_LENGTH);
        body.extend_from_slice(&header.as_bytes());

        let mut value_bytes = [0u8; WRAP_VALUE_LENGTH];
        LittleEndian::write_u32(&mut value_bytes, value);
        body.extend_from_slice(&value_bytes);

        let header = MessageHeader::new(body.len() as u32, protocol);
        Message { header, body }
    }

    /// Reverses [`Message::wrap`], returning the inline value and the
    /// original message.
    ///
    /// Fails if the body is too short to hold the trailer, or if the inner
    /// header disagrees with the remaining body length.
    pub fn unwrap(self) -> Result<(u32, Message), MessageError> {
        let Message { mut body, .. } = self;

        if body.len() < MESSAGE_HEADER_LENGTH + WRAP_VALUE_LENGTH {
            return Err(MessageError::InvalidWrap(body.len()));
        }

        let value_offset = body.len() - WRAP_VALUE_LENGTH;
        let value = LittleEndian::read_u32(&body[value_offset..]);

        let header_offset = value_offset - MESSAGE_HEADER_LENGTH;
        let mut header_bytes = [0u8; MESSAGE_HEADER_LENGTH];
        header_bytes.copy_from_slice(&body[header_offset..value_offset]);
        let header = MessageHeader::from(header_bytes);

        if header.length as usize != header_offset {
            return Err(MessageError::LengthMismatch(header.length, header_offset));
        }

        body.truncate(header_offset);
        Ok((value, Message { header, body }))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message ({:#04x}, {} bytes)", self.protocol(), self.len())
    }
}
