use crate::CloseCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end a connection other than a detected timeout.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed or was closed by the peer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a frame sequence that violates RFC 6455.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A frame or reassembled message exceeded `max_payload_len`.
    #[error("payload too large: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A text message was not valid UTF-8.
    #[error("invalid utf-8 in text message")]
    InvalidUtf8,

    /// The application did not drain its incoming messages.
    #[error("incoming message buffer full ({capacity} messages)")]
    Overloaded { capacity: usize },

    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Close code sent to the peer when this error tears the connection down.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Io(_) | Error::Closed => CloseCode::AbnormalClosure,
            Error::Protocol(_) => CloseCode::ProtocolError,
            Error::PayloadTooLarge { .. } => CloseCode::MessageTooBig,
            Error::InvalidUtf8 => CloseCode::InconsistentData,
            Error::Overloaded { .. } => CloseCode::TryLater,
        }
    }

    /// Whether the transport is still usable to send a Close frame.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

pub(crate) fn proto_err<T>(msg: &'static str) -> Result<T> {
    Err(Error::Protocol(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(Error::Protocol("x").close_code(), CloseCode::ProtocolError);
        assert_eq!(
            Error::PayloadTooLarge { len: 2, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(Error::InvalidUtf8.close_code(), CloseCode::InconsistentData);
        assert_eq!(
            Error::Overloaded { capacity: 1 }.close_code(),
            CloseCode::TryLater
        );

        let io = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io.is_transport());
        assert!(!io.close_code().is_sendable());
    }
}
