//! Process-wide set of logged-in usernames.

use crate::lock;
use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks which accounts currently hold an authenticated session.
///
/// Keys are lowercased, so `Ann` and `ann` are the same account.
#[derive(Debug, Default)]
pub struct LoginTracker {
    active: Mutex<HashSet<String>>,
}

impl LoginTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `username` as logged in. Returns false if it already was, in
    /// which case nothing changes. Check and insert are one atomic step.
    pub fn try_login(&self, username: &str) -> bool {
        lock(&self.active).insert(username.to_lowercase())
    }

    /// Returns true if the user was logged in.
    pub fn logout(&self, username: &str) -> bool {
        lock(&self.active).remove(&username.to_lowercase())
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        lock(&self.active).contains(&username.to_lowercase())
    }

    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_login_logout_cycle() {
        let tracker = LoginTracker::new();
        assert!(tracker.try_login("Ann"));
        assert!(tracker.is_logged_in("ann"));
        assert!(!tracker.try_login("ANN"));
        assert_eq!(tracker.len(), 1);

        assert!(tracker.logout("aNn"));
        assert!(!tracker.logout("ann"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_concurrent_logins_admit_one() {
        let tracker = Arc::new(LoginTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || tracker.try_login("ann"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
