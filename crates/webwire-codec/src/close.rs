//! Close status codes from RFC 6455 section 7.4.

/// Reason an endpoint gave for closing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away.
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: received a data type it cannot accept.
    Unsupported,
    /// 1005: no status code was present in the close frame.
    Status,
    /// 1006: connection dropped without a close frame.
    Abnormal,
    /// 1007: payload inconsistent with the message type.
    Invalid,
    /// 1008: generic policy violation.
    Policy,
    /// 1009: message too big to process.
    Size,
    /// 1010: client expected an extension the server did not negotiate.
    Extension,
    /// 1011: unexpected server-side error.
    Error,
    /// Any other code (reserved, IANA-registered or application-defined).
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_codes() {
        for raw in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011] {
            assert_eq!(u16::from(CloseCode::from(raw)), raw);
        }
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(CloseCode::from(4001), CloseCode::Other(4001));
        assert_eq!(u16::from(CloseCode::Other(3000)), 3000);
    }
}
