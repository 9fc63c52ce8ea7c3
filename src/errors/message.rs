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

use thiserror::Error;

/// An error encountered while framing, unframing or transporting a message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("the message is too big ({0} bytes, the maximum is {1})")]
    TooBig(usize, usize),

    #[error("the message is too short to carry an inline value ({0} bytes)")]
    InvalidWrap(usize),

    #[error("the inner header declares {0} bytes, but {1} remain after unwrapping")]
    LengthMismatch(u32, usize),
}

impl MessageError {
    /// Returns `true` if the error indicates that the remote side went away.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Io(err) => [
                ErrorKind::BrokenPipe,
                ErrorKind::ConnectionReset,
                ErrorKind::UnexpectedEof,
            ]
            .contains(&err.kind()),
            _ => false,
        }
    }
}
