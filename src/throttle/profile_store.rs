//! Shared profile table and the currently selected level

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::Profile;

/// Fixed set of profiles keyed by level, plus the active level.
///
/// Profiles never change after construction; only the selector does. Readers
/// get an owned clone taken under the read lock, so a concurrent switch can
/// never hand out a profile assembled from two tiers.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: BTreeMap<i64, Profile>,
    current: RwLock<i64>,
}

impl ProfileStore {
    /// Build a store. Fails when the table is empty, a level repeats, or
    /// `initial_level` is not one of the levels.
    pub fn new(profiles: Vec<Profile>, initial_level: i64) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::Config("at least one profile is required".to_string()));
        }

        let mut table = BTreeMap::new();
        for profile in profiles {
            let level = profile.level;
            if let Some(existing) = table.insert(level, profile) {
                return Err(Error::Config(format!(
                    "duplicate profile level {} ({})",
                    level, existing.name
                )));
            }
        }

        if !table.contains_key(&initial_level) {
            return Err(Error::Config(format!(
                "initial level {} does not match any profile",
                initial_level
            )));
        }

        Ok(Self {
            profiles: table,
            current: RwLock::new(initial_level),
        })
    }

    pub fn current_level(&self) -> i64 {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_profile(&self) -> Profile {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        // The selector only ever holds a key of `profiles`.
        self.profiles[&*current].clone()
    }

    /// Switch the active level. Unknown levels are ignored and the caller
    /// is not told.
    pub fn set_level(&self, level: i64) {
        let Some(profile) = self.profiles.get(&level) else {
            warn!("Ignoring switch to unknown level {}", level);
            return;
        };

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = level;
        info!("📶 Active profile is now {} (level {})", profile.name, level);
    }

    /// All profiles, worst to best.
    pub fn profiles(&self) -> Vec<Profile> {
        self.profiles.values().cloned().collect()
    }
}
