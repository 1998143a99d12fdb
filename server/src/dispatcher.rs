//! Request dispatcher
//!
//! Turns one decoded request into exactly one response: either the success
//! message of that request kind or an `ErrorResponse`. Handlers run on the
//! worker pool and never touch sockets; the response goes back through the
//! connection's outbox.
//!
//! Each connection has a [`ConnectionContext`] holding its authenticated
//! user. The context lock is held for the whole request, which serialises a
//! request with the disconnect cleanup of the same connection.

use crate::error::DispatchError;
use crate::lock;
use crate::login::LoginTracker;
use crate::notify::{OutboxSubscriber, SubscriberHub};
use crate::registry::Registries;
use crate::session::Outbox;
use chrono::Utc;
use log::{debug, error, info};
use shared::protocol::{
    BadgeResponse, Confirmation, Credentials, HotelListRequest, HotelListResponse, HotelLookup,
    HotelLookupResponse, ReviewSubmission, SubscribeRequest,
};
use shared::{Message, Review, User, MAX_SCORE};
use std::sync::{Arc, Mutex, Weak};

/// Server-side state of one client connection.
#[derive(Debug)]
pub struct ConnectionContext {
    id: u64,
    user: Option<String>,
    outbox: Weak<Outbox>,
    closed: bool,
}

impl ConnectionContext {
    pub fn new(id: u64, outbox: Weak<Outbox>) -> Self {
        Self {
            id,
            user: None,
            outbox,
            closed: false,
        }
    }

    /// Context without a live connection behind it.
    pub fn detached(id: u64) -> Self {
        Self::new(id, Weak::new())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn require_user(&self, action: &str) -> Result<String, DispatchError> {
        self.user
            .clone()
            .ok_or_else(|| DispatchError::auth(format!("You must be logged in to {}", action)))
    }
}

type Outcome = Result<Message, DispatchError>;

pub struct Dispatcher {
    registries: Arc<Registries>,
    logins: LoginTracker,
    subscribers: Arc<SubscriberHub>,
}

impl Dispatcher {
    pub fn new(registries: Arc<Registries>, subscribers: Arc<SubscriberHub>) -> Self {
        Self {
            registries,
            logins: LoginTracker::new(),
            subscribers,
        }
    }

    pub fn logins(&self) -> &LoginTracker {
        &self.logins
    }

    /// Handles one request of the connection owning `ctx`.
    pub fn handle(&self, ctx: &Mutex<ConnectionContext>, message: Message) -> Message {
        let mut ctx = lock(ctx);
        if ctx.closed {
            return Message::error(DispatchError::auth("Connection is closed").client_message());
        }

        let kind = message.kind();
        match self.route(&mut ctx, message) {
            Ok(response) => {
                debug!("Connection {}: {} -> {}", ctx.id, kind, response.kind());
                response
            }
            Err(e) => {
                debug!("Connection {}: {} failed: {}", ctx.id, kind, e);
                Message::error(e.client_message())
            }
        }
    }

    fn route(&self, ctx: &mut ConnectionContext, message: Message) -> Outcome {
        match message {
            Message::Login(credentials) => self.login(ctx, credentials),
            Message::Logout(_) => self.logout(ctx),
            Message::HotelLookup(request) => self.lookup(request),
            Message::HotelList(request) => self.list(request),
            Message::Review(request) => self.review(ctx, request),
            Message::Badge(_) => self.badge(ctx),
            Message::Register(credentials) => self.register(credentials),
            Message::Subscribe(request) => self.subscribe(ctx, request),
            Message::Unsubscribe(_) => self.unsubscribe(ctx),
            Message::LoginResponse(_)
            | Message::LogoutResponse(_)
            | Message::HotelLookupResponse(_)
            | Message::HotelListResponse(_)
            | Message::ReviewResponse(_)
            | Message::BadgeResponse(_)
            | Message::Error(_)
            | Message::RegisterResponse(_)
            | Message::SubscribeResponse(_)
            | Message::UnsubscribeResponse(_)
            | Message::LocalRankChanged(_) => Err(DispatchError::Unsupported),
        }
    }

    fn login(&self, ctx: &mut ConnectionContext, credentials: Credentials) -> Outcome {
        if ctx.user.is_some() {
            return Err(DispatchError::auth("You are already logged in"));
        }

        let user = self
            .registries
            .users
            .get(&credentials.username)
            .ok_or_else(|| DispatchError::not_found("User does not exist"))?;

        if !user.password_matches(&credentials.password) {
            return Err(DispatchError::auth("Wrong password"));
        }

        if !self.logins.try_login(&user.username) {
            return Err(DispatchError::auth(
                "User is already logged in on another connection",
            ));
        }

        info!("Connection {} logged in as {}", ctx.id, user.username);
        ctx.user = Some(user.username);
        Ok(Message::LoginResponse(Confirmation::new("Login successful")))
    }

    fn logout(&self, ctx: &mut ConnectionContext) -> Outcome {
        let username = ctx
            .user
            .take()
            .ok_or_else(|| DispatchError::auth("You are not logged in"))?;
        self.logins.logout(&username);
        info!("Connection {} logged out {}", ctx.id, username);
        Ok(Message::LogoutResponse(Confirmation::new("Logout successful")))
    }

    fn lookup(&self, request: HotelLookup) -> Outcome {
        let hotel = self
            .registries
            .hotels
            .find(&request.name, &request.city)
            .ok_or_else(|| {
                DispatchError::not_found(format!(
                    "Hotel {} not found in {}",
                    request.name, request.city
                ))
            })?;
        Ok(Message::HotelLookupResponse(HotelLookupResponse { hotel }))
    }

    fn list(&self, request: HotelListRequest) -> Outcome {
        let hotels = self.registries.hotels.by_city(&request.city);
        if hotels.is_empty() {
            return Err(DispatchError::not_found(format!(
                "No hotels found in {}",
                request.city
            )));
        }
        Ok(Message::HotelListResponse(HotelListResponse { hotels }))
    }

    fn review(&self, ctx: &mut ConnectionContext, request: ReviewSubmission) -> Outcome {
        let username = ctx.require_user("submit a review")?;

        let (rate, scores) = request.checked_values().ok_or_else(|| {
            DispatchError::validation(format!(
                "Rate and scores must be between 0 and {}",
                MAX_SCORE
            ))
        })?;

        let registries = &self.registries;
        let hotel_id = registries
            .hotels
            .apply_review(&request.hotel_name, &request.city, rate, &scores)
            .ok_or_else(|| {
                DispatchError::not_found(format!(
                    "Hotel {} not found in {}",
                    request.hotel_name, request.city
                ))
            })?;

        registries.reviews.add(Review::new(
            &username,
            hotel_id,
            rate,
            scores,
            Utc::now(),
        ));

        let badge = registries
            .users
            .record_review(&username)
            .ok_or_else(|| DispatchError::not_found("User does not exist"))?;

        if let Err(e) = registries.save_all() {
            error!("Failed to persist review by {}: {}", username, e);
        }

        info!(
            "{} reviewed hotel {} (badge now {})",
            username, hotel_id, badge
        );
        Ok(Message::ReviewResponse(Confirmation::new("Review added")))
    }

    fn badge(&self, ctx: &mut ConnectionContext) -> Outcome {
        let username = ctx.require_user("see your badge")?;
        let badge = self
            .registries
            .users
            .badge(&username)
            .ok_or_else(|| DispatchError::not_found("User does not exist"))?;
        Ok(Message::BadgeResponse(BadgeResponse { badge }))
    }

    fn register(&self, credentials: Credentials) -> Outcome {
        let Credentials { username, password } = credentials;

        if username.is_empty() || password.is_empty() {
            return Err(DispatchError::validation(
                "Username and password must not be empty",
            ));
        }
        if username.chars().any(char::is_whitespace) || password.chars().any(char::is_whitespace)
        {
            return Err(DispatchError::validation(
                "Username and password must not contain spaces",
            ));
        }

        let users = &self.registries.users;
        if !users.insert(User::new(&username, &password)) {
            return Err(DispatchError::validation(format!(
                "Username {} is already taken",
                username
            )));
        }

        if let Err(e) = users.save() {
            error!("Failed to persist registration of {}: {}", username, e);
        }

        info!("Registered user {}", username);
        Ok(Message::RegisterResponse(Confirmation::new(format!(
            "User {} registered",
            username
        ))))
    }

    fn subscribe(&self, ctx: &mut ConnectionContext, request: SubscribeRequest) -> Outcome {
        let cities: Vec<String> = request
            .cities
            .into_iter()
            .map(|city| city.trim().to_string())
            .filter(|city| !city.is_empty())
            .collect();

        if cities.is_empty() {
            return Err(DispatchError::validation("At least one city is required"));
        }

        let response = format!("Subscribed to {}", cities.join(", "));
        let subscriber = Arc::new(OutboxSubscriber::new(ctx.outbox.clone()));
        self.subscribers.subscribe(ctx.id, cities, subscriber);
        Ok(Message::SubscribeResponse(Confirmation::new(response)))
    }

    fn unsubscribe(&self, ctx: &mut ConnectionContext) -> Outcome {
        self.subscribers.unsubscribe(ctx.id);
        Ok(Message::UnsubscribeResponse(Confirmation::new("Unsubscribed")))
    }

    /// Releases everything a closed connection held: its login and its
    /// subscription. Further requests on the context are refused.
    pub fn disconnect(&self, ctx: &Mutex<ConnectionContext>) {
        let mut ctx = lock(ctx);
        if ctx.closed {
            return;
        }
        ctx.closed = true;

        if let Some(username) = ctx.user.take() {
            self.logins.logout(&username);
            info!("Connection {} closed, {} logged out", ctx.id, username);
        }
        self.subscribers.unsubscribe(ctx.id);
    }
}
