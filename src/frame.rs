use crate::{CloseCode, Opcode, Role};

/// A single decoded WebSocket frame.
///
/// Frames are values: once built they are never mutated, only encoded,
/// acknowledged by a [crate::TimeoutManager] and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    opcode: Opcode,
    payload: Box<[u8]>,
}

impl Frame {
    /// A final frame without payload.
    #[inline]
    pub fn new(opcode: Opcode) -> Self {
        Self::with_payload(opcode, Box::<[u8]>::default())
    }

    /// A final frame carrying `payload`.
    #[inline]
    pub fn with_payload(opcode: Opcode, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// A data fragment. `fin` is `false` for every fragment but the last one.
    #[inline]
    pub fn fragment(fin: bool, opcode: Opcode, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::with_payload(Opcode::Text, data.into().into_bytes())
    }

    pub fn binary(data: impl Into<Box<[u8]>>) -> Self {
        Self::with_payload(Opcode::Binary, data)
    }

    /// A Close frame whose body starts with the 2-byte close code.
    pub fn close(code: CloseCode) -> Self {
        Self::with_payload(Opcode::Close, u16::from(code).to_be_bytes())
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.fin
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Box<[u8]> {
        self.payload
    }

    /// Raw status code of a Close frame, `None` when the body is empty.
    pub fn close_status(&self) -> Option<u16> {
        match self.payload.get(..2) {
            Some(&[a, b]) if self.opcode == Opcode::Close => Some(u16::from_be_bytes([a, b])),
            _ => None,
        }
    }

    /// Append the wire representation of this frame to `writer`.
    ///
    /// A server MUST NOT mask any frames that it sends to the client, a
    /// client MUST mask all of them.
    pub fn encode(&self, role: Role, writer: &mut Vec<u8>) {
        let data_len = self.payload.len();
        writer.reserve(14 + data_len);

        let mask_bit = match role {
            Role::Server => 0,
            Role::Client => 0x80,
        };
        writer.push((u8::from(self.fin) << 7) | u8::from(self.opcode));

        if data_len < 126 {
            writer.push(mask_bit | data_len as u8);
        } else if data_len < 65536 {
            writer.push(mask_bit | 126);
            writer.extend_from_slice(&(data_len as u16).to_be_bytes());
        } else {
            writer.push(mask_bit | 127);
            writer.extend_from_slice(&(data_len as u64).to_be_bytes());
        }

        match role {
            Role::Server => writer.extend_from_slice(&self.payload),
            Role::Client => {
                let mask: [u8; 4] = rand::random();
                writer.extend_from_slice(&mask);
                let start = writer.len();
                writer.extend_from_slice(&self.payload);
                crate::utils::apply_mask(&mut writer[start..], mask);
            }
        }
    }
}
