//! Hotels, users, reviews and local-rank snapshots.
//!
//! These types carry no behaviour beyond keeping their own invariants:
//! a hotel's published averages always match its exact totals, and a
//! user's badge is always the one dictated by their review count.

use crate::{eq_ignore_case, round_to_tenth};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type HotelId = u32;

/// The four sub-scores of a single review, each in `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub cleaning: u8,
    pub position: u8,
    pub services: u8,
    pub quality: u8,
}

impl Scores {
    pub fn new(cleaning: u8, position: u8, services: u8, quality: u8) -> Self {
        Self {
            cleaning,
            position,
            services,
            quality,
        }
    }
}

/// Published sub-score averages of a hotel, rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Ratings {
    pub cleaning: f32,
    pub position: f32,
    pub services: f32,
    pub quality: f32,
}

/// Exact sums of every review value a hotel has absorbed.
///
/// The published averages are derived from these, so the rounding applied
/// for display never feeds back into later updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreTotals {
    pub rate: u64,
    pub cleaning: u64,
    pub position: u64,
    pub services: u64,
    pub quality: u64,
}

impl ScoreTotals {
    pub fn is_empty(&self) -> bool {
        *self == ScoreTotals::default()
    }
}

/// Folds one more value into an exact total and returns the new total with
/// its published (rounded) average over `count + 1` values.
fn absorb(total: u64, count: u32, value: u8) -> (u64, f32) {
    let total = total + value as u64;
    // (old_avg * count + value) / (count + 1), with old_avg * count kept exact.
    let mean = total as f64 / (count as f64 + 1.0);
    (total, round_to_tenth(mean))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: HotelId,
    pub name: String,
    pub description: String,
    pub city: String,
    pub phone: String,
    pub services: Vec<String>,
    #[serde(default)]
    pub rate: f32,
    #[serde(default)]
    pub ratings: Ratings,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub rank: f64,
    #[serde(default)]
    pub local_rank: u32,
    #[serde(default)]
    pub totals: ScoreTotals,
}

impl Hotel {
    pub fn new(
        id: HotelId,
        name: &str,
        description: &str,
        city: &str,
        phone: &str,
        services: Vec<String>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            city: city.to_string(),
            phone: phone.to_string(),
            services,
            rate: 0.0,
            ratings: Ratings::default(),
            review_count: 0,
            rank: 0.0,
            local_rank: 0,
            totals: ScoreTotals::default(),
        }
    }

    pub fn matches(&self, name: &str, city: &str) -> bool {
        eq_ignore_case(&self.name, name) && eq_ignore_case(&self.city, city)
    }

    pub fn in_city(&self, city: &str) -> bool {
        eq_ignore_case(&self.city, city)
    }

    /// Applies one review to the running averages and the review count.
    ///
    /// Rate, sub-scores and count change together under the caller's
    /// borrow, so readers never observe a half-applied review.
    pub fn absorb_review(&mut self, rate: u8, scores: &Scores) {
        let n = self.review_count;
        let totals = &mut self.totals;

        (totals.rate, self.rate) = absorb(totals.rate, n, rate);
        (totals.cleaning, self.ratings.cleaning) = absorb(totals.cleaning, n, scores.cleaning);
        (totals.position, self.ratings.position) = absorb(totals.position, n, scores.position);
        (totals.services, self.ratings.services) = absorb(totals.services, n, scores.services);
        (totals.quality, self.ratings.quality) = absorb(totals.quality, n, scores.quality);

        self.review_count = n + 1;
    }

    /// Rebuilds exact totals for records persisted with averages only.
    pub fn seed_totals(&mut self) {
        if self.review_count == 0 || !self.totals.is_empty() {
            return;
        }

        let n = self.review_count as f32;
        let total = |avg: f32| (avg * n).round().max(0.0) as u64;
        self.totals = ScoreTotals {
            rate: total(self.rate),
            cleaning: total(self.ratings.cleaning),
            position: total(self.ratings.position),
            services: total(self.ratings.services),
            quality: total(self.ratings.quality),
        };
    }
}

impl fmt::Display for Hotel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Description: {}", self.description)?;
        writeln!(f, "City: {}", self.city)?;
        writeln!(f, "Phone: {}", self.phone)?;
        writeln!(f, "Services: {}", self.services.join(", "))?;
        writeln!(f, "Rate: {:.1}", self.rate)?;
        writeln!(
            f,
            "Cleaning: {:.1}  Position: {:.1}  Services: {:.1}  Quality: {:.1}",
            self.ratings.cleaning,
            self.ratings.position,
            self.ratings.services,
            self.ratings.quality
        )?;
        writeln!(f, "Review Count: {}", self.review_count)?;
        writeln!(f, "Rank: {:.3}", self.rank)?;
        write!(f, "Local Rank: {}", self.local_rank)
    }
}

/// Reputation tier, derived only from how many reviews a user has written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Badge {
    Reviewer,
    ExpertReviewer,
    Contributor,
    ExpertContributor,
    SuperContributor,
}

impl Badge {
    pub fn for_review_count(count: u32) -> Self {
        match count {
            0 | 1 => Badge::Reviewer,
            2 => Badge::ExpertReviewer,
            3 => Badge::Contributor,
            4 => Badge::ExpertContributor,
            _ => Badge::SuperContributor,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Badge::Reviewer => "Reviewer",
            Badge::ExpertReviewer => "Expert Reviewer",
            Badge::Contributor => "Contributor",
            Badge::ExpertContributor => "Expert Contributor",
            Badge::SuperContributor => "Super Contributor",
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
    pub badge: Badge,
    pub review_count: u32,
}

impl User {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            badge: Badge::Reviewer,
            review_count: 0,
        }
    }

    /// Passwords compare case-insensitively, like every other key in the system.
    pub fn password_matches(&self, candidate: &str) -> bool {
        eq_ignore_case(&self.password, candidate)
    }

    pub fn record_review(&mut self) {
        self.review_count += 1;
        self.badge = Badge::for_review_count(self.review_count);
    }
}

/// A submitted review. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub username: String,
    pub hotel_id: HotelId,
    pub rate: u8,
    pub scores: Scores,
    pub timestamp: DateTime<Utc>,
}

impl Review {
    pub fn new(
        username: &str,
        hotel_id: HotelId,
        rate: u8,
        scores: Scores,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.to_string(),
            hotel_id,
            rate,
            scores,
            timestamp,
        }
    }

    /// Minutes elapsed since the review was written; never negative.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.timestamp);
        (elapsed.num_milliseconds() as f64 / 60_000.0).max(0.0)
    }
}

/// Ordered hotels of one city, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRank {
    pub city: String,
    pub hotels: Vec<Hotel>,
}

impl LocalRank {
    pub fn new(city: &str, hotels: Vec<Hotel>) -> Self {
        Self {
            city: city.to_string(),
            hotels,
        }
    }

    pub fn top(&self) -> Option<&Hotel> {
        self.hotels.first()
    }

    pub fn hotel_ids(&self) -> Vec<HotelId> {
        self.hotels.iter().map(|hotel| hotel.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use chrono::Duration;

    fn test_hotel() -> Hotel {
        Hotel::new(
            1,
            "Hotel Pisa 1",
            "Near the tower",
            "Pisa",
            "050-123456",
            vec!["wifi".to_string(), "breakfast".to_string()],
        )
    }

    #[test]
    fn test_hotel_creation() {
        let hotel = test_hotel();
        assert_eq!(hotel.id, 1);
        assert_eq!(hotel.review_count, 0);
        assert_eq!(hotel.rate, 0.0);
        assert_eq!(hotel.local_rank, 0);
        assert!(hotel.totals.is_empty());
    }

    #[test]
    fn test_hotel_matches_ignores_case() {
        let hotel = test_hotel();
        assert!(hotel.matches("hotel pisa 1", "PISA"));
        assert!(!hotel.matches("Hotel Pisa 2", "Pisa"));
        assert!(hotel.in_city("pisa"));
    }

    #[test]
    fn test_absorb_review_updates_all_averages() {
        let mut hotel = test_hotel();
        hotel.absorb_review(4, &Scores::new(5, 3, 4, 2));
        hotel.absorb_review(3, &Scores::new(4, 4, 4, 4));

        assert_eq!(hotel.review_count, 2);
        assert_approx_eq!(hotel.rate, 3.5, 1e-6);
        assert_approx_eq!(hotel.ratings.cleaning, 4.5, 1e-6);
        assert_approx_eq!(hotel.ratings.position, 3.5, 1e-6);
        assert_approx_eq!(hotel.ratings.services, 4.0, 1e-6);
        assert_approx_eq!(hotel.ratings.quality, 3.0, 1e-6);
        assert_eq!(hotel.totals.rate, 7);
    }

    #[test]
    fn test_absorb_review_is_order_independent() {
        let rates = [1u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let mut forward = test_hotel();
        for rate in rates {
            forward.absorb_review(rate, &Scores::default());
        }

        let mut backward = test_hotel();
        for rate in rates.iter().rev() {
            backward.absorb_review(*rate, &Scores::default());
        }

        // 1/11 = 0.09 -> 0.1, where naive rounding at every step would drift to 0.2
        assert_approx_eq!(forward.rate, 0.1, 1e-6);
        assert_eq!(forward.rate, backward.rate);
    }

    #[test]
    fn test_seed_totals_from_averages() {
        let mut hotel = test_hotel();
        hotel.review_count = 4;
        hotel.rate = 3.5;
        hotel.ratings.cleaning = 4.0;
        hotel.seed_totals();

        assert_eq!(hotel.totals.rate, 14);
        assert_eq!(hotel.totals.cleaning, 16);

        hotel.absorb_review(5, &Scores::new(5, 0, 0, 0));
        assert_approx_eq!(hotel.rate, 3.8, 1e-6);
        assert_approx_eq!(hotel.ratings.cleaning, 4.2, 1e-6);
    }

    #[test]
    fn test_hotel_deserializes_without_runtime_fields() {
        let json = r#"{
            "id": 7,
            "name": "Hotel Roma 7",
            "description": "Central",
            "city": "Roma",
            "phone": "06-1",
            "services": []
        }"#;
        let hotel: Hotel = serde_json::from_str(json).unwrap();
        assert_eq!(hotel.id, 7);
        assert_eq!(hotel.review_count, 0);
        assert!(hotel.services.is_empty());
    }

    #[test]
    fn test_badge_thresholds() {
        assert_eq!(Badge::for_review_count(0), Badge::Reviewer);
        assert_eq!(Badge::for_review_count(1), Badge::Reviewer);
        assert_eq!(Badge::for_review_count(2), Badge::ExpertReviewer);
        assert_eq!(Badge::for_review_count(3), Badge::Contributor);
        assert_eq!(Badge::for_review_count(4), Badge::ExpertContributor);
        assert_eq!(Badge::for_review_count(5), Badge::SuperContributor);
        assert_eq!(Badge::for_review_count(6), Badge::SuperContributor);
        assert_eq!(Badge::for_review_count(500), Badge::SuperContributor);
    }

    #[test]
    fn test_badge_is_monotonic() {
        let mut previous = Badge::for_review_count(0);
        for count in 1..20 {
            let badge = Badge::for_review_count(count);
            assert!(badge >= previous);
            previous = badge;
        }
    }

    #[test]
    fn test_user_record_review() {
        let mut user = User::new("ann", "secret");
        assert_eq!(user.badge, Badge::Reviewer);

        user.record_review();
        user.record_review();
        assert_eq!(user.review_count, 2);
        assert_eq!(user.badge, Badge::ExpertReviewer);
    }

    #[test]
    fn test_password_matches_ignores_case() {
        let user = User::new("ann", "Secret");
        assert!(user.password_matches("sECRET"));
        assert!(!user.password_matches("secret!"));
    }

    #[test]
    fn test_review_age_minutes() {
        let now = Utc::now();
        let review = Review::new("ann", 1, 4, Scores::default(), now - Duration::minutes(90));
        assert_approx_eq!(review.age_minutes(now), 90.0, 1e-6);

        let future = Review::new("ann", 1, 4, Scores::default(), now + Duration::minutes(5));
        assert_eq!(future.age_minutes(now), 0.0);
    }

    #[test]
    fn test_local_rank_accessors() {
        let mut second = test_hotel();
        second.id = 2;
        let rank = LocalRank::new("Pisa", vec![second, test_hotel()]);
        assert_eq!(rank.hotel_ids(), vec![2, 1]);
        assert_eq!(rank.top().map(|hotel| hotel.id), Some(2));
        assert!(LocalRank::new("Pisa", vec![]).top().is_none());
    }
}
