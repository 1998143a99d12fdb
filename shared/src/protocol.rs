//! Framed wire protocol spoken over the TCP connection
//!
//! Every frame is an 8-byte header followed by a payload:
//! - bytes `[0, 4)`: payload length `N`, big-endian `u32`
//! - bytes `[4, 8)`: message type tag, big-endian `u32`
//! - bytes `[8, 8 + N)`: JSON encoding of the message fields
//!
//! The set of messages is closed: [`Message`] has one variant per tag and
//! every conversion matches it exhaustively, so a new kind of message does
//! not compile until both directions handle it.

use crate::entities::{Badge, Hotel, LocalRank, Scores};
use crate::MAX_SCORE;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted unless a different limit is configured.
pub const DEFAULT_MAX_PAYLOAD: u32 = 1024 * 1024;

pub const TAG_LOGIN: u32 = 0;
pub const TAG_LOGIN_RESPONSE: u32 = 1;
pub const TAG_LOGOUT: u32 = 2;
pub const TAG_LOGOUT_RESPONSE: u32 = 3;
pub const TAG_HOTEL_LOOKUP: u32 = 4;
pub const TAG_HOTEL_LOOKUP_RESPONSE: u32 = 5;
pub const TAG_HOTEL_LIST: u32 = 6;
pub const TAG_HOTEL_LIST_RESPONSE: u32 = 7;
pub const TAG_REVIEW: u32 = 8;
pub const TAG_REVIEW_RESPONSE: u32 = 9;
pub const TAG_BADGE: u32 = 10;
pub const TAG_BADGE_RESPONSE: u32 = 11;
pub const TAG_ERROR: u32 = 12;
pub const TAG_REGISTER: u32 = 13;
pub const TAG_REGISTER_RESPONSE: u32 = 14;
pub const TAG_SUBSCRIBE: u32 = 15;
pub const TAG_SUBSCRIBE_RESPONSE: u32 = 16;
pub const TAG_UNSUBSCRIBE: u32 = 17;
pub const TAG_UNSUBSCRIBE_RESPONSE: u32 = 18;
pub const TAG_LOCAL_RANK_CHANGED: u32 = 19;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    #[error("malformed payload for tag {tag}: {source}")]
    MalformedPayload {
        tag: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: u32, max: u32 },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Fatal errors leave the byte stream unsynchronised, so the connection
    /// has to be dropped. The others only cost the offending frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::PayloadTooLarge { .. } | ProtocolError::Truncated { .. }
        )
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub tag: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            len: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            tag: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.len.to_be_bytes());
        bytes[4..].copy_from_slice(&self.tag.to_be_bytes());
        bytes
    }

    pub fn check_len(&self, max: u32) -> Result<(), ProtocolError> {
        if self.len > max {
            return Err(ProtocolError::PayloadTooLarge { len: self.len, max });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Plain confirmation text returned by most successful operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub response: String,
}

impl Confirmation {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// Payload of requests that carry no fields; encodes as `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelLookup {
    pub name: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelLookupResponse {
    pub hotel: Hotel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelListRequest {
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelListResponse {
    pub hotels: Vec<Hotel>,
}

/// Sub-scores as they travel on the wire. Plain signed integers, so a
/// value out of range still decodes and can be refused with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmittedScores {
    pub cleaning: i64,
    pub position: i64,
    pub services: i64,
    pub quality: i64,
}

impl From<Scores> for SubmittedScores {
    fn from(scores: Scores) -> Self {
        Self {
            cleaning: scores.cleaning.into(),
            position: scores.position.into(),
            services: scores.services.into(),
            quality: scores.quality.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub hotel_name: String,
    pub city: String,
    pub rate: i64,
    pub scores: SubmittedScores,
}

impl ReviewSubmission {
    pub fn new(hotel_name: &str, city: &str, rate: u8, scores: Scores) -> Self {
        Self {
            hotel_name: hotel_name.to_string(),
            city: city.to_string(),
            rate: rate.into(),
            scores: scores.into(),
        }
    }

    /// Rate and sub-scores, or `None` if any of them is outside `0..=MAX_SCORE`.
    pub fn checked_values(&self) -> Option<(u8, Scores)> {
        let check = |value: i64| u8::try_from(value).ok().filter(|v| *v <= MAX_SCORE);
        let scores = Scores::new(
            check(self.scores.cleaning)?,
            check(self.scores.position)?,
            check(self.scores.services)?,
            check(self.scores.quality)?,
        );
        Some((check(self.rate)?, scores))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeResponse {
    pub badge: Badge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub cities: Vec<String>,
}

/// Every message that can cross the wire, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Login(Credentials),
    LoginResponse(Confirmation),
    Logout(Empty),
    LogoutResponse(Confirmation),
    HotelLookup(HotelLookup),
    HotelLookupResponse(HotelLookupResponse),
    HotelList(HotelListRequest),
    HotelListResponse(HotelListResponse),
    Review(ReviewSubmission),
    ReviewResponse(Confirmation),
    Badge(Empty),
    BadgeResponse(BadgeResponse),
    Error(ErrorResponse),
    Register(Credentials),
    RegisterResponse(Confirmation),
    Subscribe(SubscribeRequest),
    SubscribeResponse(Confirmation),
    Unsubscribe(Empty),
    UnsubscribeResponse(Confirmation),
    /// Unsolicited push sent to subscribers of a city whose ranking changed.
    LocalRankChanged(LocalRank),
}

impl Message {
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorResponse {
            message: message.into(),
        })
    }

    pub fn tag(&self) -> u32 {
        match self {
            Message::Login(_) => TAG_LOGIN,
            Message::LoginResponse(_) => TAG_LOGIN_RESPONSE,
            Message::Logout(_) => TAG_LOGOUT,
            Message::LogoutResponse(_) => TAG_LOGOUT_RESPONSE,
            Message::HotelLookup(_) => TAG_HOTEL_LOOKUP,
            Message::HotelLookupResponse(_) => TAG_HOTEL_LOOKUP_RESPONSE,
            Message::HotelList(_) => TAG_HOTEL_LIST,
            Message::HotelListResponse(_) => TAG_HOTEL_LIST_RESPONSE,
            Message::Review(_) => TAG_REVIEW,
            Message::ReviewResponse(_) => TAG_REVIEW_RESPONSE,
            Message::Badge(_) => TAG_BADGE,
            Message::BadgeResponse(_) => TAG_BADGE_RESPONSE,
            Message::Error(_) => TAG_ERROR,
            Message::Register(_) => TAG_REGISTER,
            Message::RegisterResponse(_) => TAG_REGISTER_RESPONSE,
            Message::Subscribe(_) => TAG_SUBSCRIBE,
            Message::SubscribeResponse(_) => TAG_SUBSCRIBE_RESPONSE,
            Message::Unsubscribe(_) => TAG_UNSUBSCRIBE,
            Message::UnsubscribeResponse(_) => TAG_UNSUBSCRIBE_RESPONSE,
            Message::LocalRankChanged(_) => TAG_LOCAL_RANK_CHANGED,
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Login(_) => "Login",
            Message::LoginResponse(_) => "LoginResponse",
            Message::Logout(_) => "Logout",
            Message::LogoutResponse(_) => "LogoutResponse",
            Message::HotelLookup(_) => "HotelLookup",
            Message::HotelLookupResponse(_) => "HotelLookupResponse",
            Message::HotelList(_) => "HotelList",
            Message::HotelListResponse(_) => "HotelListResponse",
            Message::Review(_) => "Review",
            Message::ReviewResponse(_) => "ReviewResponse",
            Message::Badge(_) => "Badge",
            Message::BadgeResponse(_) => "BadgeResponse",
            Message::Error(_) => "Error",
            Message::Register(_) => "Register",
            Message::RegisterResponse(_) => "RegisterResponse",
            Message::Subscribe(_) => "Subscribe",
            Message::SubscribeResponse(_) => "SubscribeResponse",
            Message::Unsubscribe(_) => "Unsubscribe",
            Message::UnsubscribeResponse(_) => "UnsubscribeResponse",
            Message::LocalRankChanged(_) => "LocalRankChanged",
        }
    }

    fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Login(p) | Message::Register(p) => serde_json::to_vec(p),
            Message::LoginResponse(p)
            | Message::LogoutResponse(p)
            | Message::ReviewResponse(p)
            | Message::RegisterResponse(p)
            | Message::SubscribeResponse(p)
            | Message::UnsubscribeResponse(p) => serde_json::to_vec(p),
            Message::Logout(p) | Message::Badge(p) | Message::Unsubscribe(p) => {
                serde_json::to_vec(p)
            }
            Message::HotelLookup(p) => serde_json::to_vec(p),
            Message::HotelLookupResponse(p) => serde_json::to_vec(p),
            Message::HotelList(p) => serde_json::to_vec(p),
            Message::HotelListResponse(p) => serde_json::to_vec(p),
            Message::Review(p) => serde_json::to_vec(p),
            Message::BadgeResponse(p) => serde_json::to_vec(p),
            Message::Error(p) => serde_json::to_vec(p),
            Message::Subscribe(p) => serde_json::to_vec(p),
            Message::LocalRankChanged(p) => serde_json::to_vec(p),
        }
    }
}

/// Encodes a message into a complete frame, header included.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = message.payload().map_err(ProtocolError::Encode)?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;

    let header = FrameHeader {
        len,
        tag: message.tag(),
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn parse<T: DeserializeOwned>(tag: u32, payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|source| ProtocolError::MalformedPayload { tag, source })
}

/// Rebuilds a message from its type tag and payload bytes.
pub fn decode(tag: u32, payload: &[u8]) -> Result<Message, ProtocolError> {
    let message = match tag {
        TAG_LOGIN => Message::Login(parse(tag, payload)?),
        TAG_LOGIN_RESPONSE => Message::LoginResponse(parse(tag, payload)?),
        TAG_LOGOUT => Message::Logout(parse(tag, payload)?),
        TAG_LOGOUT_RESPONSE => Message::LogoutResponse(parse(tag, payload)?),
        TAG_HOTEL_LOOKUP => Message::HotelLookup(parse(tag, payload)?),
        TAG_HOTEL_LOOKUP_RESPONSE => Message::HotelLookupResponse(parse(tag, payload)?),
        TAG_HOTEL_LIST => Message::HotelList(parse(tag, payload)?),
        TAG_HOTEL_LIST_RESPONSE => Message::HotelListResponse(parse(tag, payload)?),
        TAG_REVIEW => Message::Review(parse(tag, payload)?),
        TAG_REVIEW_RESPONSE => Message::ReviewResponse(parse(tag, payload)?),
        TAG_BADGE => Message::Badge(parse(tag, payload)?),
        TAG_BADGE_RESPONSE => Message::BadgeResponse(parse(tag, payload)?),
        TAG_ERROR => Message::Error(parse(tag, payload)?),
        TAG_REGISTER => Message::Register(parse(tag, payload)?),
        TAG_REGISTER_RESPONSE => Message::RegisterResponse(parse(tag, payload)?),
        TAG_SUBSCRIBE => Message::Subscribe(parse(tag, payload)?),
        TAG_SUBSCRIBE_RESPONSE => Message::SubscribeResponse(parse(tag, payload)?),
        TAG_UNSUBSCRIBE => Message::Unsubscribe(parse(tag, payload)?),
        TAG_UNSUBSCRIBE_RESPONSE => Message::UnsubscribeResponse(parse(tag, payload)?),
        TAG_LOCAL_RANK_CHANGED => Message::LocalRankChanged(parse(tag, payload)?),
        unknown => return Err(ProtocolError::UnknownTag(unknown)),
    };
    Ok(message)
}

/// Decodes one complete frame. Trailing bytes past the declared payload
/// length are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<Message, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }

    let mut header_bytes = [0u8; HEADER_LEN];
    header_bytes.copy_from_slice(&frame[..HEADER_LEN]);
    let header = FrameHeader::parse(&header_bytes);

    let end = HEADER_LEN + header.len as usize;
    if frame.len() < end {
        return Err(ProtocolError::Truncated {
            expected: end,
            actual: frame.len(),
        });
    }

    decode(header.tag, &frame[HEADER_LEN..end])
}
