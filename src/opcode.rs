/// Defines the interpretation of the "Payload data".  If an unknown
/// opcode is received, the receiving endpoint MUST _Fail the WebSocket Connection_.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continues a message whose first fragment was a [Opcode::Text] or
    /// [Opcode::Binary] frame with `fin` unset.
    ///
    /// ```txt
    /// Client: FIN=1, opcode=0x1, msg="hello"
    /// Server: (process complete message immediately) Hi.
    /// Client: FIN=0, opcode=0x1, msg="and a"
    /// Server: (listening, new message containing text started)
    /// Client: FIN=0, opcode=0x0, msg="happy new"
    /// Server: (listening, payload concatenated to previous message)
    /// Client: FIN=1, opcode=0x0, msg="year!"
    /// Server: (process complete message) Happy new year to you too!
    /// ```
    Continuation = 0,

    Text = 1,
    Binary = 2,

    // 3-7 are reserved for further non-control frames.
    /// Starts (or acknowledges) the closing handshake.
    ///
    /// If an endpoint receives a Close frame and did not previously send a
    /// Close frame, the endpoint MUST send a Close frame in response.
    Close = 8,

    /// May serve either as a keepalive or as a means to verify that the
    /// remote endpoint is still responsive.
    Ping = 9,

    /// Answer to a [Opcode::Ping]. A Pong frame MAY be sent unsolicited, a
    /// response to it is not expected.
    Pong = 10,
    // 11-15 are reserved for further control frames
}

impl Opcode {
    /// Whether the opcode indicates a control frame.
    #[inline]
    pub fn is_control(self) -> bool {
        self as u8 >= 8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = &'static str;
    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Opcode::Continuation,
            1 => Opcode::Text,
            2 => Opcode::Binary,
            8 => Opcode::Close,
            9 => Opcode::Ping,
            10 => Opcode::Pong,
            _ => return Err("unknown opcode"),
        })
    }
}

impl From<Opcode> for u8 {
    #[inline]
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_and_data_split() {
        for op in [Opcode::Close, Opcode::Ping, Opcode::Pong] {
            assert!(op.is_control());
        }
        for op in [Opcode::Continuation, Opcode::Text, Opcode::Binary] {
            assert!(!op.is_control());
        }
    }

    #[test]
    fn reserved_values_are_rejected() {
        assert_eq!(Opcode::try_from(9u8), Ok(Opcode::Ping));
        for reserved in (3u8..=7).chain(11..=15) {
            assert!(Opcode::try_from(reserved).is_err());
        }
    }
}
