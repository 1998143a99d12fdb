//! In-memory registries of hotels, users and reviews with JSON persistence
//!
//! Each registry owns its collection behind a single mutex. Every
//! read-modify-write sequence (lookup then mutate, iterate then sort) runs
//! under one acquisition of that mutex, so a hotel's rate, sub-scores and
//! review count always change together.
//!
//! Persistence rewrites the whole collection as a pretty-printed JSON array,
//! first to a sibling temp file which is then renamed over the target.
//! Saves of one file are serialised by a per-file lock held from taking the
//! snapshot until the rename, so the file on disk is always the newest
//! snapshot that was written. The collection lock itself is only held while
//! the snapshot is serialised.

use crate::error::PersistenceError;
use crate::lock;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};
use shared::{Badge, Hotel, HotelId, Review, Scores, User};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const HOTELS_FILE: &str = "Hotels.json";
pub const USERS_FILE: &str = "Users.json";
pub const REVIEWS_FILE: &str = "Reviews.json";

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    let bytes = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PersistenceError::json(path, e))
}

fn to_json<T: Serialize>(path: &Path, items: &[T]) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(items).map_err(|e| PersistenceError::json(path, e))
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| PersistenceError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::io(path, e));
    }
    debug!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Creates `path` holding an empty JSON array if it does not exist yet.
fn ensure_file(path: &Path) -> Result<(), PersistenceError> {
    if !path.exists() {
        info!("Creating empty data file {}", path.display());
        write_atomically(path, b"[]")?;
    }
    Ok(())
}

/// Target file of one registry.
struct DataFile {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl DataFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            save_lock: Mutex::new(()),
        }
    }

    /// Serialises the snapshot taken by `snapshot` and writes it, with no
    /// other save of this file in between.
    fn save(
        &self,
        snapshot: impl FnOnce() -> Result<Vec<u8>, PersistenceError>,
    ) -> Result<(), PersistenceError> {
        let _guard = lock(&self.save_lock);
        let bytes = snapshot()?;
        write_atomically(&self.path, &bytes)
    }
}

fn user_key(username: &str) -> String {
    username.to_lowercase()
}

pub struct HotelRegistry {
    file: DataFile,
    hotels: Mutex<Vec<Hotel>>,
}

impl HotelRegistry {
    pub fn new(path: impl Into<PathBuf>, mut hotels: Vec<Hotel>) -> Self {
        for hotel in &mut hotels {
            hotel.seed_totals();
        }
        Self {
            file: DataFile::new(path.into()),
            hotels: Mutex::new(hotels),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::MissingFile(path.to_path_buf()));
        }
        Ok(Self::new(path, load_json(path)?))
    }

    pub fn len(&self) -> usize {
        lock(&self.hotels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hotel with the given name in the given city, both compared case-insensitively.
    pub fn find(&self, name: &str, city: &str) -> Option<Hotel> {
        lock(&self.hotels)
            .iter()
            .find(|hotel| hotel.matches(name, city))
            .cloned()
    }

    pub fn get(&self, id: HotelId) -> Option<Hotel> {
        lock(&self.hotels).iter().find(|hotel| hotel.id == id).cloned()
    }

    /// Hotels of a city, best local rank first.
    pub fn by_city(&self, city: &str) -> Vec<Hotel> {
        let mut hotels: Vec<Hotel> = lock(&self.hotels)
            .iter()
            .filter(|hotel| hotel.in_city(city))
            .cloned()
            .collect();
        hotels.sort_by_key(|hotel| (hotel.local_rank, hotel.id));
        hotels
    }

    /// Folds a review into the matching hotel's averages. Returns the hotel
    /// id, or `None` if no hotel matches.
    pub fn apply_review(&self, name: &str, city: &str, rate: u8, scores: &Scores) -> Option<HotelId> {
        let mut hotels = lock(&self.hotels);
        let hotel = hotels.iter_mut().find(|hotel| hotel.matches(name, city))?;
        hotel.absorb_review(rate, scores);
        Some(hotel.id)
    }

    /// Runs `f` with exclusive access to every hotel.
    pub fn with_hotels_mut<R>(&self, f: impl FnOnce(&mut [Hotel]) -> R) -> R {
        let mut hotels = lock(&self.hotels);
        f(&mut hotels)
    }

    pub fn snapshot(&self) -> Vec<Hotel> {
        lock(&self.hotels).clone()
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let path = &self.file.path;
        self.file
            .save(|| to_json(path, lock(&self.hotels).as_slice()))
    }
}

pub struct UserRegistry {
    file: DataFile,
    users: Mutex<BTreeMap<String, User>>,
}

impl UserRegistry {
    pub fn new(path: impl Into<PathBuf>, users: Vec<User>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user_key(&user.username), user))
            .collect();
        Self {
            file: DataFile::new(path.into()),
            users: Mutex::new(users),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        ensure_file(path)?;
        Ok(Self::new(path, load_json(path)?))
    }

    pub fn len(&self) -> usize {
        lock(&self.users).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, username: &str) -> Option<User> {
        lock(&self.users).get(&user_key(username)).cloned()
    }

    pub fn contains(&self, username: &str) -> bool {
        lock(&self.users).contains_key(&user_key(username))
    }

    /// Adds a user unless one with the same (case-insensitive) name exists.
    pub fn insert(&self, user: User) -> bool {
        let mut users = lock(&self.users);
        let key = user_key(&user.username);
        if users.contains_key(&key) {
            return false;
        }
        users.insert(key, user);
        true
    }

    /// Counts one more review for the user and returns their updated badge.
    pub fn record_review(&self, username: &str) -> Option<Badge> {
        let mut users = lock(&self.users);
        let user = users.get_mut(&user_key(username))?;
        user.record_review();
        Some(user.badge)
    }

    pub fn badge(&self, username: &str) -> Option<Badge> {
        lock(&self.users).get(&user_key(username)).map(|user| user.badge)
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let path = &self.file.path;
        self.file.save(|| {
            let users = lock(&self.users);
            let list: Vec<&User> = users.values().collect();
            to_json(path, &list)
        })
    }
}

pub struct ReviewRegistry {
    file: DataFile,
    reviews: Mutex<Vec<Review>>,
}

impl ReviewRegistry {
    pub fn new(path: impl Into<PathBuf>, reviews: Vec<Review>) -> Self {
        Self {
            file: DataFile::new(path.into()),
            reviews: Mutex::new(reviews),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        ensure_file(path)?;
        Ok(Self::new(path, load_json(path)?))
    }

    pub fn len(&self) -> usize {
        lock(&self.reviews).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, review: Review) {
        lock(&self.reviews).push(review);
    }

    pub fn for_hotel(&self, hotel_id: HotelId) -> Vec<Review> {
        lock(&self.reviews)
            .iter()
            .filter(|review| review.hotel_id == hotel_id)
            .cloned()
            .collect()
    }

    /// Mean review age in minutes per hotel, for hotels with stored reviews.
    pub fn average_age_minutes(&self, now: DateTime<Utc>) -> HashMap<HotelId, f64> {
        let mut sums: HashMap<HotelId, (f64, u32)> = HashMap::new();
        for review in lock(&self.reviews).iter() {
            let entry = sums.entry(review.hotel_id).or_insert((0.0, 0));
            entry.0 += review.age_minutes(now);
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(id, (total, count))| (id, total / count as f64))
            .collect()
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let path = &self.file.path;
        self.file
            .save(|| to_json(path, lock(&self.reviews).as_slice()))
    }
}

/// The three registries of one server process.
pub struct Registries {
    pub hotels: HotelRegistry,
    pub users: UserRegistry,
    pub reviews: ReviewRegistry,
}

impl Registries {
    /// Loads every collection from `data_dir`. The directory and the hotel
    /// file must exist; missing user and review files start out empty.
    pub fn open(data_dir: &Path) -> Result<Self, PersistenceError> {
        if !data_dir.is_dir() {
            return Err(PersistenceError::MissingDataDir(data_dir.to_path_buf()));
        }

        let registries = Self {
            hotels: HotelRegistry::load(&data_dir.join(HOTELS_FILE))?,
            users: UserRegistry::load(&data_dir.join(USERS_FILE))?,
            reviews: ReviewRegistry::load(&data_dir.join(REVIEWS_FILE))?,
        };

        info!(
            "Loaded {} hotels, {} users, {} reviews from {}",
            registries.hotels.len(),
            registries.users.len(),
            registries.reviews.len(),
            data_dir.display()
        );
        Ok(registries)
    }

    /// Writes all three collections. Every save is attempted; the first
    /// failure is returned.
    pub fn save_all(&self) -> Result<(), PersistenceError> {
        let results = [self.hotels.save(), self.users.save(), self.reviews.save()];
        results.into_iter().collect()
    }
}
