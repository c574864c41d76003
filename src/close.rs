//! Close status codes and close frame payloads ([RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4)).
use bytes::{BufMut, Bytes, BytesMut};

use crate::{frame::MAX_CONTROL_PAYLOAD, Result, WebSocketError};

/// Longest close reason that still fits a control frame next to the two byte status code.
pub const MAX_REASON_LEN: usize = MAX_CONTROL_PAYLOAD - 2;

/// Status code indicating why an endpoint is closing the connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away, such as a server going down or a page navigating away.
    Away,
    /// 1002: an endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: an endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present. Never sent on the wire.
    Status,
    /// 1006: the connection was closed without a Close frame. Never sent on the wire.
    Abnormal,
    /// 1007: a message contained data inconsistent with its type (e.g. non-UTF-8 text).
    Invalid,
    /// 1008: a message violates the endpoint's policy.
    Policy,
    /// 1009: a message is too big to process.
    Size,
    /// 1010: the client expected the server to negotiate an extension it did not.
    Extension,
    /// 1011: the server encountered an unexpected condition.
    Error,
    /// 1012: the server is restarting.
    Restart,
    /// 1013: the server is overloaded, try again later.
    Again,
    /// 1015: TLS handshake failure. Never sent on the wire.
    Tls,
    /// 1004, 1014 and 1016-2999: reserved by the protocol.
    Reserved(u16),
    /// 3000-3999: registered with IANA for libraries and frameworks.
    Iana(u16),
    /// 4000-4999: private use by applications.
    Library(u16),
    /// Anything outside of 1000-4999.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if the code may legally appear in a Close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Bad(_)
                | CloseCode::Reserved(_)
                | CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
        )
    }

    /// Returns `true` for the codes an application may pass to [`crate::Channel::close`]:
    /// 1000 and the 3000-4999 ranges.
    pub fn is_sendable_by_client(self) -> bool {
        matches!(
            self,
            CloseCode::Normal | CloseCode::Iana(_) | CloseCode::Library(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1000..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
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
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

/// The status code and reason reported when the connection goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// 1005, used when a Close frame carried no status code.
    pub fn no_status() -> Self {
        Self::new(CloseCode::Status, String::new())
    }

    /// 1006, used when the connection went away without a completed closing handshake.
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal, String::new())
    }

    /// Parses the payload of a received Close frame.
    ///
    /// An empty payload means no status code (1005). A one byte payload, a status code that
    /// must not appear on the wire or a reason that is not UTF-8 are protocol errors.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [] => Ok(Self::no_status()),
            [_] => Err(WebSocketError::InvalidCloseFrame),
            [hi, lo, reason @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !CloseCode::from(code).is_allowed() {
                    return Err(WebSocketError::InvalidCloseCode(code));
                }
                let reason = crate::frame::decode_utf8(reason)?;
                Ok(Self { code, reason })
            }
        }
    }
}

/// Builds a Close frame payload: nothing without a code, otherwise the big-endian code followed
/// by the reason.
pub(crate) fn payload(code: Option<u16>, reason: &str) -> Bytes {
    match code {
        None => Bytes::new(),
        Some(code) => {
            let mut buf = BytesMut::with_capacity(2 + reason.len());
            buf.put_u16(code);
            buf.extend_from_slice(reason.as_bytes());
            buf.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_conversions() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1011, 1015, 1004, 2999, 3000, 4999, 5000] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(1004), CloseCode::Reserved(1004));
        assert_eq!(CloseCode::from(3500), CloseCode::Iana(3500));
        assert_eq!(CloseCode::from(4500), CloseCode::Library(4500));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
    }

    #[test]
    fn test_allowed_on_the_wire() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 3000, 4999] {
            assert!(CloseCode::from(code).is_allowed(), "{code} should be allowed");
        }
        for code in [0u16, 999, 1004, 1005, 1006, 1014, 1015, 1016, 2999, 5000] {
            assert!(!CloseCode::from(code).is_allowed(), "{code} should be rejected");
        }
    }

    #[test]
    fn test_sendable_by_client() {
        assert!(CloseCode::Normal.is_sendable_by_client());
        assert!(CloseCode::from(3000).is_sendable_by_client());
        assert!(CloseCode::from(4999).is_sendable_by_client());
        assert!(!CloseCode::Away.is_sendable_by_client());
        assert!(!CloseCode::Status.is_sendable_by_client());
        assert!(!CloseCode::from(2999).is_sendable_by_client());
    }

    #[test]
    fn test_parse_empty_payload() {
        assert_eq!(CloseInfo::parse(&[]).unwrap(), CloseInfo::new(1005u16, ""));
    }

    #[test]
    fn test_parse_single_byte() {
        assert!(matches!(
            CloseInfo::parse(&[0x03]),
            Err(WebSocketError::InvalidCloseFrame)
        ));
    }

    #[test]
    fn test_parse_code_and_reason() {
        let info = CloseInfo::parse(b"\x03\xe8bye").unwrap();
        assert_eq!(info.code, 1000);
        assert_eq!(info.reason, "bye");

        let info = CloseInfo::parse(b"\x0f\xa0").unwrap();
        assert_eq!(info, CloseInfo::new(4000u16, ""));
    }

    #[test]
    fn test_parse_reserved_codes() {
        for code in [1004u16, 1005, 1006, 1015] {
            let payload = code.to_be_bytes();
            assert!(matches!(
                CloseInfo::parse(&payload),
                Err(WebSocketError::InvalidCloseCode(c)) if c == code
            ));
        }
    }

    #[test]
    fn test_parse_invalid_reason() {
        assert!(matches!(
            CloseInfo::parse(b"\x03\xe8\xff\xfe"),
            Err(WebSocketError::InvalidUTF8)
        ));
    }

    #[test]
    fn test_payload() {
        assert!(payload(None, "ignored").is_empty());
        assert_eq!(&payload(Some(1000), "bye")[..], b"\x03\xe8bye");
        assert_eq!(&payload(Some(1005), "")[..], b"\x03\xed");
    }
}
