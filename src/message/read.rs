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
    message::{
        header::{MessageHeader, MESSAGE_HEADER_LENGTH},
        Message,
    },
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one full frame from an input stream, blocking until the header and
/// the declared number of body bytes have arrived.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message, MessageError> {
    let mut header_bytes = [0u8; MESSAGE_HEADER_LENGTH];
    stream.read_exact(&mut header_bytes).await?;
    let header = MessageHeader::from(header_bytes);

    if header.length as usize > crate::MAX_MESSAGE_SIZE {
        return Err(MessageError::TooBig(header.length as usize, crate::MAX_MESSAGE_SIZE));
    }

    let mut body = vec![0u8; header.length as usize];
    stream.read_exact(&mut body).await?;

    Ok(Message::from_parts(header, body))
}

/// Writes a frame to an output stream, flushing before returning.
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &Message,
) -> Result<(), MessageError> {
    stream.write_all(&message.header().as_bytes()).await?;
    stream.write_all(message.body()).await?;
    stream.flush().await?;

    Ok(())
}
