//! Mapping between the session profile and the key-value store.
//!
//! Each profile field lives under its own key so that a change to one field
//! only rewrites that blob:
//!
//! | Key                        | Encoding                      |
//! |----------------------------|-------------------------------|
//! | `faunasphere_favorites`    | JSON array of favorite items  |
//! | `faunasphere_history`      | JSON array of strings         |
//! | `faunasphere_streak`       | decimal integer               |
//! | `faunasphere_last_date`    | `YYYY-MM-DD`                  |
//!
//! Unreadable blobs are logged and replaced by defaults; database failures
//! are returned.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::model::FavoriteItem;
use crate::session::{PersistedSlice, Profile, decay_streak};
use crate::storage::Storage;

pub const FAVORITES_KEY: &str = "faunasphere_favorites";
pub const HISTORY_KEY: &str = "faunasphere_history";
pub const STREAK_KEY: &str = "faunasphere_streak";
pub const LAST_DATE_KEY: &str = "faunasphere_last_date";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Older clients wrote dates like `Mon Oct 19 2026`.
const LEGACY_DATE_FORMAT: &str = "%a %b %d %Y";

/// Load the profile as of `today`.
///
/// A streak more than a day away from the last search is broken here and
/// the zero is written back; the last search date is kept as stored.
pub async fn load_profile(storage: &Storage, today: NaiveDate) -> Result<Profile, StorageError> {
    let favorites: Vec<FavoriteItem> = match storage.get(FAVORITES_KEY).await? {
        Some(raw) => or_default(decode_json(FAVORITES_KEY, &raw)),
        None => Vec::new(),
    };
    let search_history: Vec<String> = match storage.get(HISTORY_KEY).await? {
        Some(raw) => or_default(decode_json(HISTORY_KEY, &raw)),
        None => Vec::new(),
    };
    let stored_streak = match storage.get(STREAK_KEY).await? {
        Some(raw) => or_default(decode_streak(&raw)),
        None => 0,
    };
    let last_search_date = match storage.get(LAST_DATE_KEY).await? {
        Some(raw) => or_default(decode_date(&raw).map(Some)),
        None => None,
    };

    let streak = decay_streak(stored_streak, last_search_date, today);
    if streak != stored_streak {
        info!(
            previous = stored_streak,
            last_search_date = ?last_search_date,
            "Streak broken since last visit"
        );
        persist(storage, &PersistedSlice::Streak(streak)).await?;
    }

    Ok(Profile {
        favorites,
        search_history,
        streak,
        last_search_date,
    })
}

/// Write one profile field.
pub async fn persist(storage: &Storage, slice: &PersistedSlice) -> Result<(), StorageError> {
    let (key, value) = encode(slice)?;
    storage.set(key, &value).await
}

fn encode(slice: &PersistedSlice) -> Result<(&'static str, String), StorageError> {
    let encoded = match slice {
        PersistedSlice::Favorites(items) => (FAVORITES_KEY, encode_json(FAVORITES_KEY, items)?),
        PersistedSlice::SearchHistory(names) => (HISTORY_KEY, encode_json(HISTORY_KEY, names)?),
        PersistedSlice::Streak(streak) => (STREAK_KEY, streak.to_string()),
        PersistedSlice::LastSearchDate(date) => {
            (LAST_DATE_KEY, date.format(DATE_FORMAT).to_string())
        }
    };
    Ok(encoded)
}

fn encode_json<T: serde::Serialize>(key: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|source| StorageError::Json { key, source })
}

fn decode_json<T: DeserializeOwned>(key: &'static str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|source| StorageError::Json { key, source })
}

fn decode_streak(raw: &str) -> Result<u32, StorageError> {
    raw.trim().parse().map_err(|_| StorageError::InvalidValue {
        key: STREAK_KEY,
        value: raw.to_string(),
    })
}

fn decode_date(raw: &str) -> Result<NaiveDate, StorageError> {
    let raw_trimmed = raw.trim();
    NaiveDate::parse_from_str(raw_trimmed, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw_trimmed, LEGACY_DATE_FORMAT))
        .map_err(|_| StorageError::InvalidValue {
            key: LAST_DATE_KEY,
            value: raw.to_string(),
        })
}

fn or_default<T: Default>(decoded: Result<T, StorageError>) -> T {
    decoded.unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable stored value");
        T::default()
    })
}
