//! Periodic ranking engine
//!
//! Every cycle scores each reviewed hotel, orders the hotels of every city
//! by score and publishes what changed since the previous cycle:
//! - a new top hotel in a city is announced on the broadcast channel;
//! - any change in a city's ordering is pushed to that city's subscribers.
//!
//! The engine keeps, per city, a deep copy of the last ordering it published.
//! Those snapshots are its own and nothing else reads or writes them. The
//! first cycle only records snapshots, since there is nothing to compare to.

use crate::error::RankingError;
use crate::notify::{Broadcaster, SubscriberHub};
use crate::registry::Registries;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use shared::{top_hotel_message, Hotel, HotelId, LocalRank};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Rate below which the optional penalty applies.
pub const LOW_RATE_THRESHOLD: f32 = 2.0;
const LOW_RATE_PENALTY_DIVISOR: f64 = 10.0;
const RECENCY_MINUTES: f64 = 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// Divide the score of hotels rated below [`LOW_RATE_THRESHOLD`] by ten.
    pub low_rate_penalty: bool,
}

/// Global score of a hotel:
/// `log10(1 + reviews) * rate + exp(-average_age_minutes / 60)`.
///
/// `average_age_minutes` is `None` when none of the hotel's reviews are
/// stored, in which case the recency term is zero.
pub fn score(
    hotel: &Hotel,
    average_age_minutes: Option<f64>,
    policy: ScoringPolicy,
) -> Result<f64, RankingError> {
    let volume = (1.0 + hotel.review_count as f64).log10();
    let recency = average_age_minutes
        .map(|age| (-age.max(0.0) / RECENCY_MINUTES).exp())
        .unwrap_or(0.0);

    let mut score = volume * hotel.rate as f64 + recency;
    if policy.low_rate_penalty && hotel.rate < LOW_RATE_THRESHOLD {
        score /= LOW_RATE_PENALTY_DIVISOR;
    }

    if !score.is_finite() {
        return Err(RankingError::NonFiniteScore {
            hotel_id: hotel.id,
            score,
        });
    }
    Ok(score)
}

/// Orders the hotels of every city by descending global rank, ties broken
/// by ascending id, and rewrites their local ranks as `1..=K`.
///
/// Cities are grouped ignoring case; each group is reported under the
/// spelling of its first hotel.
pub fn assign_local_ranks(hotels: &mut [Hotel]) -> Vec<LocalRank> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();

    for (index, hotel) in hotels.iter().enumerate() {
        let key = hotel.city.to_lowercase();
        let group = *group_of.entry(key).or_insert_with(|| {
            groups.push((hotel.city.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[group].1.push(index);
    }

    groups
        .into_iter()
        .map(|(city, mut members)| {
            members.sort_by(|a, b| {
                hotels[*b]
                    .rank
                    .total_cmp(&hotels[*a].rank)
                    .then(hotels[*a].id.cmp(&hotels[*b].id))
            });

            let ranked = members
                .iter()
                .enumerate()
                .map(|(position, index)| {
                    let hotel = &mut hotels[*index];
                    hotel.local_rank = position as u32 + 1;
                    hotel.clone()
                })
                .collect();

            LocalRank::new(&city, ranked)
        })
        .collect()
}

/// What a single cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub scored: usize,
    pub failed: Vec<HotelId>,
    pub broadcast: Vec<String>,
    pub directed: Vec<String>,
}

pub struct RankingEngine {
    registries: Arc<Registries>,
    broadcaster: Arc<dyn Broadcaster>,
    subscribers: Arc<SubscriberHub>,
    policy: ScoringPolicy,
    snapshots: HashMap<String, LocalRank>,
    initialized: bool,
}

impl RankingEngine {
    pub fn new(
        registries: Arc<Registries>,
        broadcaster: Arc<dyn Broadcaster>,
        subscribers: Arc<SubscriberHub>,
        policy: ScoringPolicy,
    ) -> Self {
        Self {
            registries,
            broadcaster,
            subscribers,
            policy,
            snapshots: HashMap::new(),
            initialized: false,
        }
    }

    /// Last published ordering of a city.
    pub fn snapshot(&self, city: &str) -> Option<&LocalRank> {
        self.snapshots.get(&city.to_lowercase())
    }

    /// Runs one full cycle as of `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        let ages = self.registries.reviews.average_age_minutes(now);
        let policy = self.policy;

        // Scoring and local ranking happen under one hotel lock, so no
        // reader sees a city half re-ranked.
        let rankings = self.registries.hotels.with_hotels_mut(|hotels| {
            for hotel in hotels.iter_mut().filter(|hotel| hotel.review_count > 0) {
                match score(hotel, ages.get(&hotel.id).copied(), policy) {
                    Ok(value) => {
                        hotel.rank = value;
                        report.scored += 1;
                    }
                    Err(e) => {
                        warn!("Skipping hotel {}: {}", hotel.id, e);
                        report.failed.push(hotel.id);
                    }
                }
            }
            assign_local_ranks(hotels)
        });

        if self.initialized {
            for rank in rankings {
                self.publish(rank, &mut report);
            }
        } else {
            info!("Recorded initial ranking of {} cities", rankings.len());
            self.snapshots = rankings
                .into_iter()
                .map(|rank| (rank.city.to_lowercase(), rank))
                .collect();
            self.initialized = true;
        }

        if let Err(e) = self.registries.hotels.save() {
            error!("Failed to persist hotel ranking: {}", e);
        }

        report
    }

    fn publish(&mut self, rank: LocalRank, report: &mut CycleReport) {
        let key = rank.city.to_lowercase();
        let previous = self.snapshots.get(&key);

        let previous_top = previous.and_then(LocalRank::top).map(|hotel| hotel.id);
        if let Some(top) = rank.top() {
            if previous_top != Some(top.id) {
                self.broadcaster
                    .announce(&top_hotel_message(&rank.city, &top.name));
                report.broadcast.push(rank.city.clone());
            }
        }

        let previous_ids = previous.map(LocalRank::hotel_ids).unwrap_or_default();
        if previous_ids != rank.hotel_ids() {
            let delivered = self.subscribers.notify(&rank);
            debug!(
                "Ranking of {} changed, {} subscribers notified",
                rank.city, delivered
            );
            report.directed.push(rank.city.clone());
            self.snapshots.insert(key, rank);
        }
    }

    /// Runs a cycle every `period`, forever. The first cycle starts
    /// immediately. Each cycle executes on the blocking pool.
    pub async fn run(mut self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let cycle = tokio::task::spawn_blocking(move || {
                let report = self.run_cycle(Utc::now());
                (self, report)
            })
            .await;

            match cycle {
                Ok((engine, report)) => {
                    self = engine;
                    debug!(
                        "Ranking cycle: {} scored, {} failed, broadcast {:?}, directed {:?}",
                        report.scored, report.failed.len(), report.broadcast, report.directed
                    );
                }
                Err(e) => {
                    error!("Ranking cycle aborted: {}", e);
                    return;
                }
            }
        }
    }
}
