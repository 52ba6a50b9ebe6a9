use crate::TimeoutReason;

/// When closing an established connection an endpoint MAY indicate a reason for closure.
///
/// Codes in the `4000..=4999` range are private to this server and let a
/// client tell a voluntary close apart from the different forced ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// The purpose for which the connection was established has been fulfilled.
    Clean = 1000,
    /// Server going down or a browser having navigated away from a page.
    GoingAway = 1001,
    /// An endpoint is terminating the connection due to a protocol error.
    ProtocolError = 1002,
    /// It has received a type of data it cannot accept.
    IncorrectData = 1003,
    /// MUST NOT be set as a status code in a Close control frame by an endpoint.
    ///
    /// Connection was severed without a closing handshake.
    AbnormalClosure = 1006,
    /// Received data within a message that was not consistent with the type of the message.
    InconsistentData = 1007,
    /// Generic status code when there is no other more suitable one.
    MessageViolatingPolicy = 1008,
    /// Message that is too big for it to process.
    MessageTooBig = 1009,
    /// The client expected the server to negotiate one or more extension.
    ExtensionNegotiationFailed = 1010,
    /// The server has encountered an unexpected condition.
    ServerError = 1011,
    /// The server is restarting, the client may reconnect.
    Restart = 1012,
    /// Temporary overload, the client should reconnect later.
    TryLater = 1013,
    /// A gateway received an invalid response from upstream.
    BadGateway = 1014,
    /// The session bound to this connection is no longer valid.
    SessionExpired = 4001,
    /// No traffic of any kind for `KEEP_ALIVE_TIMEOUT`.
    KeepAliveTimeout = 4002,
    /// The server requests an immediate shutdown of the connection.
    KillNow = 4003,
    /// An awaited control frame (pong or close) did not arrive within `TIMEOUT`.
    NoResponse = 4004,
}

impl CloseCode {
    /// Whether the code may appear in a Close frame on the wire.
    #[inline]
    pub fn is_sendable(self) -> bool {
        !matches!(self, CloseCode::AbnormalClosure)
    }
}

impl From<CloseCode> for u16 {
    #[inline]
    fn from(code: CloseCode) -> Self {
        code as u16
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = u16;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1000 => CloseCode::Clean,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::IncorrectData,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InconsistentData,
            1008 => CloseCode::MessageViolatingPolicy,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::ExtensionNegotiationFailed,
            1011 => CloseCode::ServerError,
            1012 => CloseCode::Restart,
            1013 => CloseCode::TryLater,
            1014 => CloseCode::BadGateway,
            4001 => CloseCode::SessionExpired,
            4002 => CloseCode::KeepAliveTimeout,
            4003 => CloseCode::KillNow,
            4004 => CloseCode::NoResponse,
            code => return Err(code),
        })
    }
}

impl From<TimeoutReason> for CloseCode {
    #[inline]
    fn from(reason: TimeoutReason) -> Self {
        match reason {
            TimeoutReason::NoResponse => CloseCode::NoResponse,
            TimeoutReason::KeepAlive => CloseCode::KeepAliveTimeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reasons_have_distinct_codes() {
        let no_response = CloseCode::from(TimeoutReason::NoResponse);
        let keep_alive = CloseCode::from(TimeoutReason::KeepAlive);
        assert_ne!(no_response, keep_alive);
        assert_ne!(no_response, CloseCode::Clean);
        assert_eq!(u16::from(keep_alive), 4002);
    }

    #[test]
    fn unknown_code() {
        assert_eq!(CloseCode::try_from(1000u16), Ok(CloseCode::Clean));
        assert_eq!(CloseCode::try_from(1004u16), Err(1004));
        assert!(!CloseCode::AbnormalClosure.is_sendable());
    }
}
