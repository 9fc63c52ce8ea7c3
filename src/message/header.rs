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

use byteorder::{ByteOrder, LittleEndian};

/// The size of the wire representation of a [`MessageHeader`] in bytes.
pub const MESSAGE_HEADER_LENGTH: usize = 8;

/// A fixed-size header preceding every message on the wire.
///
/// ```text
/// | 0x00 | 0x01 | 0x02 | 0x03 | 0x04 | 0x05 | 0x06 | 0x07 |
/// |-------------------------------------------------------|
/// | body length (LE)          | protocol tag (LE)         |
/// ```
///
/// All integers are little-endian, on every platform.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    /// The length of the message body in bytes.
    pub length: u32,
    /// The protocol tag of the message.
    pub protocol: u32,
}

impl MessageHeader {
    pub fn new(length: u32, protocol: u32) -> Self {
        Self { length, protocol }
    }

    /// Returns the wire representation of the header.
    pub fn as_bytes(&self) -> [u8; MESSAGE_HEADER_LENGTH] {
        let mut bytes = [0u8; MESSAGE_HEADER_LENGTH];
        LittleEndian::write_u32(&mut bytes[..4], self.length);
        LittleEndian::write_u32(&mut bytes[4..], self.protocol);
        bytes
    }
}

impl From<[u8; MESSAGE_HEADER_LENGTH]> for MessageHeader {
    fn from(bytes: [u8; MESSAGE_HEADER_LENGTH]) -> Self {
        Self {
            length: LittleEndian::read_u32(&bytes[..4]),
            protocol: LittleEndian::read_u32(&bytes[4..]),
        }
    }
}
