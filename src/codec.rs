#![allow(clippy::unusual_byte_groupings)]
use crate::{errors::proto_err, utils::*, Error, Frame, Opcode, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Which end of the connection a codec speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Decodes [Frame]s from the read half of a negotiated stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    /// Maximum allowed payload length in bytes.
    ///
    /// Default: 16 MB
    pub max_payload_len: usize,

    stream: R,
    role: Role,
    fragment: Option<Opcode>,
}

impl<R> FrameReader<R> {
    pub fn new(stream: R, role: Role) -> Self {
        Self {
            stream,
            max_payload_len: 16 * 1024 * 1024,
            role,
            fragment: None,
        }
    }
}

impl<R> FrameReader<R>
where
    R: Unpin + AsyncRead,
{
    // ### WebSocket Frame Header
    //
    // ```txt
    //  0                   1                   2                   3
    //  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    // +-+-+-+-+-------+-+-------------+-------------------------------+
    // |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
    // |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
    // |N|V|V|V|       |S|             |   (if payload len==126/127)   |
    // | |1|2|3|       |K|             |                               |
    // +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
    // |     Extended payload length continued, if payload len == 127  |
    // + - - - - - - - - - - - - - - - +-------------------------------+
    // |                               |Masking-key, if MASK set to 1  |
    // +-------------------------------+-------------------------------+
    // | Masking-key (continued)       |          Payload Data         |
    // +-------------------------------- - - - - - - - - - - - - - - - +
    // :                     Payload Data continued ...                :
    // + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
    // |                     Payload Data continued ...                |
    // +---------------------------------------------------------------+
    // ```
    /// Reads the next frame.
    ///
    /// This is not cancel safe: dropping the future mid-frame loses the
    /// position in the stream. Run it on a task of its own.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let [b1, b2] = read_buf(&mut self.stream).await?;

        let fin = b1 & 0b_1000_0000 != 0;
        let rsv = b1 & 0b_111_0000;
        let opcode = b1 & 0b_1111;
        let len = (b2 & 0b_111_1111) as usize;
        let is_masked = b2 & 0b_1000_0000 != 0;

        if rsv != 0 {
            // MUST be `0` unless an extension is negotiated that defines meanings
            // for non-zero values.
            return proto_err("reserve bit must be `0`");
        }

        // The server MUST close the connection upon receiving a frame that is
        // not masked. A client MUST close it upon receiving a masked one.
        match self.role {
            Role::Server if !is_masked => return proto_err("expected masked frame"),
            Role::Client if is_masked => return proto_err("expected unmasked frame"),
            _ => {}
        }

        let opcode = Opcode::try_from(opcode).map_err(Error::Protocol)?;

        if opcode.is_control() {
            if !fin {
                return proto_err("control frame must not be fragmented");
            }
            if len > 125 {
                return proto_err("control frame must have a payload length of 125 bytes or less");
            }
            let data = self.read_payload(len).await?;
            return Ok(Frame::with_payload(opcode, data));
        }

        // Control frames MAY be injected in the middle of a fragmented
        // message, data frames may not.
        self.fragment = match (opcode, fin, self.fragment) {
            (Opcode::Text | Opcode::Binary, true, None) => None,
            (Opcode::Text | Opcode::Binary, false, None) => Some(opcode),
            (Opcode::Continuation, false, Some(ty)) => Some(ty),
            (Opcode::Continuation, true, Some(_)) => None,
            (Opcode::Continuation, _, None) => {
                return proto_err("continuation frame without a message to continue")
            }
            _ => return proto_err("expected continuation frame"),
        };

        let len = match len {
            126 => u16::from_be_bytes(read_buf(&mut self.stream).await?) as usize,
            127 => {
                let len = u64::from_be_bytes(read_buf(&mut self.stream).await?);
                usize::try_from(len).unwrap_or(usize::MAX)
            }
            len => len,
        };
        if len > self.max_payload_len {
            return Err(Error::PayloadTooLarge {
                len,
                max: self.max_payload_len,
            });
        }
        let data = self.read_payload(len).await?;
        Ok(Frame::fragment(fin, opcode, data))
    }

    async fn read_payload(&mut self, len: usize) -> Result<Box<[u8]>> {
        let mut data = vec![0; len].into_boxed_slice();
        match self.role {
            Role::Server => {
                let mask: [u8; 4] = read_buf(&mut self.stream).await?;
                self.stream.read_exact(&mut data).await?;
                apply_mask(&mut data, mask);
            }
            Role::Client => {
                self.stream.read_exact(&mut data).await?;
            }
        }
        Ok(data)
    }
}
