//! The ephemeral seat selection store.
//!
//! [`SelectionStore`] keeps at most one [`SeatSelection`] in a storage slot
//! and enforces its time-to-live. Expiry is detected eagerly whenever the
//! record is read, and on a timer by [`crate::watcher::ExpiryWatcher`], which
//! follows the store's deadline channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{SelectionConfig, MAX_TTL_SECONDS};
use crate::error::{Error, Result};
use crate::selection::{
    expiry_after, SeatSelection, SelectionDraft, SelectionPatch, SelectionRules, StoredSelection,
};
use crate::storage::{Storage, StorageStats};

/// What a read of the slot found.
#[derive(Debug)]
enum Loaded {
    Empty,
    Active(SeatSelection),
    Expired(SeatSelection),
}

/// Holds the single in-progress seat selection.
///
/// Share it as `Arc<SelectionStore>`; every method takes `&self`.
#[derive(Debug)]
pub struct SelectionStore {
    storage: Mutex<Storage>,
    key: String,
    ttl: Duration,
    rules: SelectionRules,
    clock: Arc<dyn Clock>,
    expired: AtomicBool,
    deadline_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl SelectionStore {
    /// Create a store over `storage` using the wall clock.
    ///
    /// The stored record, if any, is checked immediately: an expired record
    /// is purged before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the initial read fails.
    pub fn new(storage: Storage, config: &SelectionConfig) -> Result<Self> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the initial read fails.
    pub fn with_clock(
        storage: Storage,
        config: &SelectionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ttl = i64::try_from(config.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| Error::ConfigValidation {
                message: format!("ttl_seconds out of range: {}", config.ttl_seconds),
            })?;
        Self::with_ttl(storage, config, ttl, clock)
    }

    /// Create a store with an explicit TTL, overriding `config.ttl_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL is not positive or longer than
    /// [`MAX_TTL_SECONDS`], the rules don't compile, or the initial read fails.
    pub fn with_ttl(
        storage: Storage,
        config: &SelectionConfig,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if ttl <= Duration::zero() {
            return Err(Error::ConfigValidation {
                message: "selection TTL must be positive".to_string(),
            });
        }
        if ttl.num_seconds().unsigned_abs() > MAX_TTL_SECONDS {
            return Err(Error::ConfigValidation {
                message: format!(
                    "selection TTL of {}s exceeds the {MAX_TTL_SECONDS}s limit",
                    ttl.num_seconds()
                ),
            });
        }

        let (deadline_tx, _) = watch::channel(None);
        let store = Self {
            storage: Mutex::new(storage),
            key: config.storage_key.clone(),
            ttl,
            rules: SelectionRules::from_config(config)?,
            clock,
            expired: AtomicBool::new(false),
            deadline_tx,
        };

        store.current()?;
        Ok(store)
    }

    /// The slot key the selection lives under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fixed time-to-live applied on save.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store a new selection, replacing any existing one.
    ///
    /// The expiry is `now + ttl`. Saving lowers the expired flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] if the draft breaks a rule, or a
    /// storage error if the write fails.
    pub fn save(&self, draft: SelectionDraft) -> Result<SeatSelection> {
        let selection = SeatSelection::from_draft(draft, self.clock.now(), self.ttl)?;
        self.rules.check(&selection)?;

        let storage = self.lock_storage()?;
        self.persist(&storage, &selection)?;
        self.expired.store(false, Ordering::SeqCst);
        self.publish(Some(selection.expires_at));

        info!(
            showtime = %selection.showtime_id,
            seats = selection.seat_count(),
            expires_at = %selection.expires_at,
            "Saved seat selection"
        );
        Ok(selection)
    }

    /// Merge `patch` into the stored selection.
    ///
    /// Returns the merged record, or `None` without writing anything when no
    /// live selection exists. The expiry is never extended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] if the merged record breaks a rule,
    /// or a storage error if the read or write fails.
    pub fn update(&self, patch: SelectionPatch) -> Result<Option<SeatSelection>> {
        let storage = self.lock_storage()?;
        let Loaded::Active(mut selection) = self.load(&storage)? else {
            debug!("No live selection to update");
            return Ok(None);
        };

        patch.apply_to(&mut selection);
        self.rules.check(&selection)?;
        self.persist(&storage, &selection)?;

        debug!(showtime = %selection.showtime_id, "Updated seat selection");
        Ok(Some(selection))
    }

    /// Remove the selection immediately.
    ///
    /// Returns `true` if a record was removed. Clearing also lowers the
    /// expired flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn clear(&self) -> Result<bool> {
        let storage = self.lock_storage()?;
        let removed = storage.remove(&self.key)?;
        self.expired.store(false, Ordering::SeqCst);
        self.publish(None);

        if removed {
            info!("Cleared seat selection");
        }
        Ok(removed)
    }

    /// Read the live selection.
    ///
    /// Malformed records are discarded, records without an expiry get one
    /// and are written back, and expired records are purged.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn current(&self) -> Result<Option<SeatSelection>> {
        let storage = self.lock_storage()?;
        match self.load(&storage)? {
            Loaded::Active(selection) => Ok(Some(selection)),
            Loaded::Empty | Loaded::Expired(_) => Ok(None),
        }
    }

    /// Time until the live selection expires, zero if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn remaining_time(&self) -> Result<std::time::Duration> {
        let now = self.clock.now();
        Ok(self
            .current()?
            .and_then(|selection| selection.remaining_at(now).to_std().ok())
            .unwrap_or_default())
    }

    /// Purge the selection if it is past its expiry.
    ///
    /// Returns the purged record. A record that was replaced or extended
    /// since the caller last looked is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn expire_if_due(&self) -> Result<Option<SeatSelection>> {
        let storage = self.lock_storage()?;
        match self.load(&storage)? {
            Loaded::Expired(selection) => Ok(Some(selection)),
            Loaded::Empty | Loaded::Active(_) => Ok(None),
        }
    }

    /// Whether a selection has expired since the last save, clear, or acknowledgement.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Lower the expired flag.
    pub fn acknowledge_expiry(&self) {
        self.expired.store(false, Ordering::SeqCst);
    }

    /// The live selection's expiry as last observed by the store.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        *self.deadline_tx.borrow()
    }

    /// Follow deadline changes. The value is `None` while no selection is live.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.deadline_tx.subscribe()
    }

    /// Time from now until `deadline`, zero if it has passed.
    #[must_use]
    pub fn time_until(&self, deadline: DateTime<Utc>) -> std::time::Duration {
        (deadline - self.clock.now()).to_std().unwrap_or_default()
    }

    /// Statistics of the underlying database.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.lock_storage()?.stats()
    }

    fn lock_storage(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| Error::internal("selection storage lock poisoned"))
    }

    fn load(&self, storage: &Storage) -> Result<Loaded> {
        let Some(slot) = storage.get(&self.key)? else {
            self.publish(None);
            return Ok(Loaded::Empty);
        };

        if !slot.is_intact() {
            warn!(key = %self.key, "Discarding selection with mismatched hash");
            return self.discard(storage);
        }

        let stored = match StoredSelection::parse(&slot.payload) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding malformed selection");
                return self.discard(storage);
            }
        };

        let now = self.clock.now();
        let needs_expiry = stored.expires_at().is_none();
        let selection = stored.into_selection(expiry_after(now, self.ttl)?);
        if needs_expiry {
            info!(expires_at = %selection.expires_at, "Assigned expiry to stored selection");
            self.persist(storage, &selection)?;
        }

        if selection.is_expired_at(now) {
            storage.remove(&self.key)?;
            self.expired.store(true, Ordering::SeqCst);
            self.publish(None);
            info!(
                showtime = %selection.showtime_id,
                expired_at = %selection.expires_at,
                "Seat selection expired"
            );
            return Ok(Loaded::Expired(selection));
        }

        self.publish(Some(selection.expires_at));
        Ok(Loaded::Active(selection))
    }

    fn discard(&self, storage: &Storage) -> Result<Loaded> {
        storage.remove(&self.key)?;
        self.publish(None);
        Ok(Loaded::Empty)
    }

    fn persist(&self, storage: &Storage, selection: &SeatSelection) -> Result<()> {
        let payload = serde_json::to_string(selection)?;
        storage.put(&self.key, &payload)
    }

    fn publish(&self, deadline: Option<DateTime<Utc>>) {
        self.deadline_tx.send_if_modified(|current| {
            if *current == deadline {
                false
            } else {
                *current = deadline;
                true
            }
        });
    }

    #[cfg(test)]
    fn raw_put(&self, payload: &str) -> Result<()> {
        self.lock_storage()?.put(&self.key, payload)
    }

    #[cfg(test)]
    fn raw_payload(&self) -> Result<Option<String>> {
        Ok(self.lock_storage()?.get(&self.key)?.map(|slot| slot.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (SelectionStore, ManualClock) {
        let clock = ManualClock::default();
        let store = SelectionStore::with_clock(
            Storage::open_in_memory().unwrap(),
            &SelectionConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (store, clock)
    }

    fn draft() -> SelectionDraft {
        SelectionDraft::new("show-7", ["D4", "D5"]).with_amount(21.0)
    }

    #[test]
    fn test_save_sets_expiry_from_ttl() {
        let (store, clock) = store_with_clock();
        let saved = store.save(draft()).unwrap();

        assert_eq!(saved.created_at, clock.now());
        assert_eq!(saved.expires_at, clock.now() + Duration::minutes(10));
        assert_eq!(store.deadline(), Some(saved.expires_at));
    }

    #[test]
    fn test_present_before_ttl_absent_after() {
        let (store, clock) = store_with_clock();
        store.save(draft()).unwrap();

        clock.advance(Duration::minutes(10) - Duration::milliseconds(1));
        assert!(store.current().unwrap().is_some());
        assert!(!store.is_expired());

        clock.advance(Duration::milliseconds(2));
        assert!(store.current().unwrap().is_none());
        assert!(store.is_expired());
        assert_eq!(store.deadline(), None);
        assert!(store.raw_payload().unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_unconditionally() {
        let (store, _clock) = store_with_clock();
        store.save(draft()).unwrap();

        assert!(store.clear().unwrap());
        assert!(store.current().unwrap().is_none());
        assert!(!store.clear().unwrap());
        assert_eq!(store.deadline(), None);
    }

    #[test]
    fn test_clear_lowers_expired_flag() {
        let (store, clock) = store_with_clock();
        store.save(draft()).unwrap();
        clock.advance(Duration::minutes(11));
        store.current().unwrap();
        assert!(store.is_expired());

        store.clear().unwrap();
        assert!(!store.is_expired());
    }

    #[test]
    fn test_update_without_record_is_noop() {
        let (store, _clock) = store_with_clock();
        let patch = SelectionPatch {
            booking_id: Some("bk-1".to_string()),
            ..SelectionPatch::default()
        };

        assert!(store.update(patch).unwrap().is_none());
        assert!(store.raw_payload().unwrap().is_none());
    }

    #[test]
    fn test_update_after_expiry_is_noop() {
        let (store, clock) = store_with_clock();
        store.save(draft()).unwrap();
        clock.advance(Duration::minutes(20));

        let patch = SelectionPatch {
            total_amount: Some(1.0),
            ..SelectionPatch::default()
        };
        assert!(store.update(patch).unwrap().is_none());
        assert!(store.raw_payload().unwrap().is_none());
    }

    #[test]
    fn test_update_merges_and_keeps_expiry() {
        let (store, clock) = store_with_clock();
        let saved = store.save(draft()).unwrap();
        clock.advance(Duration::minutes(3));

        let patch = SelectionPatch {
            booking_id: Some("bk-9".to_string()),
            ..SelectionPatch::default()
        };
        let updated = store.update(patch).unwrap().unwrap();

        assert_eq!(updated.booking_id.as_deref(), Some("bk-9"));
        assert_eq!(updated.seats, saved.seats);
        assert_eq!(updated.expires_at, saved.expires_at);

        let reread = store.current().unwrap().unwrap();
        assert_eq!(reread, updated);
    }

    #[test]
    fn test_update_rejects_invalid_merge() {
        let (store, _clock) = store_with_clock();
        let saved = store.save(draft()).unwrap();

        let patch = SelectionPatch {
            seats: Some(std::collections::BTreeSet::new()),
            ..SelectionPatch::default()
        };
        let err = store.update(patch).unwrap_err();
        assert!(err.is_invalid_selection());
        assert_eq!(store.current().unwrap().unwrap(), saved);
    }

    #[test]
    fn test_save_rejects_invalid_draft() {
        let (store, _clock) = store_with_clock();
        let err = store
            .save(SelectionDraft::new("show-1", Vec::<String>::new()))
            .unwrap_err();

        assert!(err.is_invalid_selection());
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_save_lowers_expired_flag() {
        let (store, clock) = store_with_clock();
        store.save(draft()).unwrap();
        clock.advance(Duration::minutes(11));
        store.current().unwrap();
        assert!(store.is_expired());

        store.save(draft()).unwrap();
        assert!(!store.is_expired());
    }

    #[test]
    fn test_acknowledge_expiry() {
        let (store, clock) = store_with_clock();
        store.save(draft()).unwrap();
        clock.advance(Duration::minutes(11));
        store.current().unwrap();

        store.acknowledge_expiry();
        assert!(!store.is_expired());
    }

    #[test]
    fn test_remaining_time() {
        let (store, clock) = store_with_clock();
        assert_eq!(store.remaining_time().unwrap(), std::time::Duration::ZERO);

        store.save(draft()).unwrap();
        clock.advance(Duration::minutes(4));
        assert_eq!(
            store.remaining_time().unwrap(),
            std::time::Duration::from_secs(6 * 60)
        );

        clock.advance(Duration::minutes(30));
        assert_eq!(store.remaining_time().unwrap(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_malformed_payload_discarded() {
        let (store, _clock) = store_with_clock();
        store.raw_put("{ definitely not a selection").unwrap();

        assert!(store.current().unwrap().is_none());
        assert!(store.raw_payload().unwrap().is_none());
        assert!(!store.is_expired());
    }

    #[test]
    fn test_tampered_payload_discarded() {
        let (store, _clock) = store_with_clock();
        store.save(draft()).unwrap();
        store
            .lock_storage()
            .unwrap()
            .corrupt_payload(store.key(), r#"{"selectedSeats":["Z9"]}"#)
            .unwrap();

        assert!(store.current().unwrap().is_none());
        assert!(store.raw_payload().unwrap().is_none());
    }

    #[test]
    fn test_missing_expiry_is_assigned_and_persisted() {
        let (store, clock) = store_with_clock();
        store
            .raw_put(
                r#"{"selectedSeats":["A1"],"showtimeId":"show-2","totalAmount":9.5,"timestamp":"2026-01-01T00:00:00Z"}"#,
            )
            .unwrap();

        let selection = store.current().unwrap().unwrap();
        assert_eq!(selection.expires_at, clock.now() + Duration::minutes(10));

        let payload = store.raw_payload().unwrap().unwrap();
        assert!(payload.contains("expiresAt"));

        // A second read sees the persisted expiry, not a fresh one
        clock.advance(Duration::minutes(1));
        assert_eq!(store.current().unwrap().unwrap().expires_at, selection.expires_at);
    }

    #[test]
    fn test_expired_on_open_is_purged() {
        let clock = ManualClock::default();
        let storage = Storage::open_in_memory().unwrap();
        let stale = SeatSelection::from_draft(
            draft(),
            clock.now() - Duration::hours(1),
            Duration::minutes(10),
        )
        .unwrap();
        storage
            .put("seat_selection", &serde_json::to_string(&stale).unwrap())
            .unwrap();

        let store = SelectionStore::with_clock(
            storage,
            &SelectionConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap();

        assert!(store.is_expired());
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_expire_if_due() {
        let (store, clock) = store_with_clock();
        let saved = store.save(draft()).unwrap();

        assert!(store.expire_if_due().unwrap().is_none());

        clock.advance(Duration::minutes(11));
        let purged = store.expire_if_due().unwrap().unwrap();
        assert_eq!(purged.showtime_id, saved.showtime_id);
        assert!(store.is_expired());
        assert!(store.expire_if_due().unwrap().is_none());
    }

    #[test]
    fn test_subscribe_sees_deadline_changes() {
        let (store, _clock) = store_with_clock();
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow_and_update(), None);

        let saved = store.save(draft()).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(saved.expires_at));

        // Reading an unchanged record publishes nothing new
        store.current().unwrap();
        assert!(!rx.has_changed().unwrap());

        store.clear().unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[test]
    fn test_time_until() {
        let (store, clock) = store_with_clock();
        let deadline = clock.now() + Duration::seconds(5);

        assert_eq!(store.time_until(deadline), std::time::Duration::from_secs(5));
        assert_eq!(
            store.time_until(clock.now() - Duration::seconds(5)),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn test_longest_valid_ttl_can_save() {
        let config = crate::config::Config {
            selection: SelectionConfig {
                ttl_seconds: MAX_TTL_SECONDS,
                ..SelectionConfig::default()
            },
            ..crate::config::Config::default()
        };
        config.validate().unwrap();

        let clock = ManualClock::default();
        let store = SelectionStore::with_clock(
            Storage::open_in_memory().unwrap(),
            &config.selection,
            Arc::new(clock.clone()),
        )
        .unwrap();

        let saved = store.save(draft()).unwrap();
        assert_eq!(saved.expires_at, clock.now() + Duration::days(1));
        assert_eq!(store.current().unwrap(), Some(saved));
    }

    #[test]
    fn test_oversized_ttl_is_rejected_not_panicking() {
        let config = SelectionConfig {
            ttl_seconds: 9_000_000_000_000,
            ..SelectionConfig::default()
        };
        let result = SelectionStore::new(Storage::open_in_memory().unwrap(), &config);
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_with_ttl_rejects_non_positive() {
        let result = SelectionStore::with_ttl(
            Storage::open_in_memory().unwrap(),
            &SelectionConfig::default(),
            Duration::zero(),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }
}
