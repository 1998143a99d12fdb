//! Async client for the Hotelier protocol.

use log::{debug, info};
use shared::protocol::{
    Credentials, Empty, HotelListRequest, HotelLookup, ReviewSubmission, SubscribeRequest,
};
use shared::{decode, encode, Badge, FrameHeader, Hotel, LocalRank, Message, ProtocolError, Scores};
use shared::{DEFAULT_MAX_PAYLOAD, HEADER_LEN};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an `ErrorResponse`.
    #[error("{0}")]
    Server(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

pub struct Client {
    stream: TcpStream,
    pushed: VecDeque<LocalRank>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);
        Ok(Self {
            stream,
            pushed: VecDeque::new(),
        })
    }

    async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let frame = encode(message)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, ClientError> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let header = FrameHeader::parse(&header);
        header.check_len(DEFAULT_MAX_PAYLOAD)?;

        let mut payload = vec![0u8; header.len as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(decode(header.tag, &payload)?)
    }

    /// Sends one request and waits for its response. Rank updates pushed
    /// by the server in the meantime are kept for [`Client::next_rank_update`].
    pub async fn request(&mut self, message: &Message) -> Result<Message, ClientError> {
        self.send(message).await?;
        loop {
            match self.receive().await? {
                Message::LocalRankChanged(rank) => {
                    debug!("Buffered rank update for {}", rank.city);
                    self.pushed.push_back(rank);
                }
                Message::Error(e) => return Err(ClientError::Server(e.message)),
                response => return Ok(response),
            }
        }
    }

    /// Next rank update, waiting for the server to push one if none is buffered.
    pub async fn next_rank_update(&mut self) -> Result<LocalRank, ClientError> {
        if let Some(rank) = self.pushed.pop_front() {
            return Ok(rank);
        }
        loop {
            match self.receive().await? {
                Message::LocalRankChanged(rank) => return Ok(rank),
                other => debug!("Ignoring unsolicited {}", other.kind()),
            }
        }
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<String, ClientError> {
        match self
            .request(&Message::Register(Credentials::new(username, password)))
            .await?
        {
            Message::RegisterResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ClientError> {
        match self
            .request(&Message::Login(Credentials::new(username, password)))
            .await?
        {
            Message::LoginResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn logout(&mut self) -> Result<String, ClientError> {
        match self.request(&Message::Logout(Empty {})).await? {
            Message::LogoutResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn search_hotel(&mut self, name: &str, city: &str) -> Result<Hotel, ClientError> {
        let request = Message::HotelLookup(HotelLookup {
            name: name.to_string(),
            city: city.to_string(),
        });
        match self.request(&request).await? {
            Message::HotelLookupResponse(r) => Ok(r.hotel),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn search_all_hotels(&mut self, city: &str) -> Result<Vec<Hotel>, ClientError> {
        let request = Message::HotelList(HotelListRequest {
            city: city.to_string(),
        });
        match self.request(&request).await? {
            Message::HotelListResponse(r) => Ok(r.hotels),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn insert_review(
        &mut self,
        hotel_name: &str,
        city: &str,
        rate: u8,
        scores: Scores,
    ) -> Result<String, ClientError> {
        let request = Message::Review(ReviewSubmission::new(hotel_name, city, rate, scores));
        match self.request(&request).await? {
            Message::ReviewResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn show_badge(&mut self) -> Result<Badge, ClientError> {
        match self.request(&Message::Badge(Empty {})).await? {
            Message::BadgeResponse(r) => Ok(r.badge),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn subscribe(&mut self, cities: &[&str]) -> Result<String, ClientError> {
        let request = Message::Subscribe(SubscribeRequest {
            cities: cities.iter().map(|city| city.to_string()).collect(),
        });
        match self.request(&request).await? {
            Message::SubscribeResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }

    pub async fn unsubscribe(&mut self) -> Result<String, ClientError> {
        match self.request(&Message::Unsubscribe(Empty {})).await? {
            Message::UnsubscribeResponse(r) => Ok(r.response),
            other => Err(ClientError::UnexpectedResponse(other.kind())),
        }
    }
}
