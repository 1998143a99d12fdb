//! Types shared by the Hotelier server and client: the entity model, the
//! framed wire protocol and a handful of text helpers both sides agree on.

pub mod entities;
pub mod protocol;

pub use entities::{Badge, Hotel, HotelId, LocalRank, Ratings, Review, ScoreTotals, Scores, User};
pub use protocol::{
    decode, decode_frame, encode, FrameHeader, Message, ProtocolError, DEFAULT_MAX_PAYLOAD,
    HEADER_LEN,
};

pub const DEFAULT_TCP_PORT: u16 = 4316;
pub const DEFAULT_MULTICAST_GROUP: &str = "230.0.0.0";
pub const DEFAULT_MULTICAST_PORT: u16 = 49152;

/// Highest value accepted for a review's overall rate and each sub-score.
pub const MAX_SCORE: u8 = 5;

const TOP_HOTEL_SEPARATOR: &str = " top hotel changed: ";

/// Case-insensitive comparison used for usernames, passwords, hotel names and cities.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Rounds to one decimal place, the precision published for every average.
pub fn round_to_tenth(value: f64) -> f32 {
    ((value * 10.0).round() / 10.0) as f32
}

/// Text line multicast when the best hotel of a city changes.
pub fn top_hotel_message(city: &str, hotel_name: &str) -> String {
    format!("{}{}{}", city, TOP_HOTEL_SEPARATOR, hotel_name)
}

/// Splits a line produced by [`top_hotel_message`] back into `(city, hotel_name)`.
pub fn parse_top_hotel_message(line: &str) -> Option<(&str, &str)> {
    line.trim_end().split_once(TOP_HOTEL_SEPARATOR)
}
