//! Core seat selection types.
//!
//! A [`SeatSelection`] is the single in-progress record a customer builds
//! while picking seats for a showtime. It is only valid until `expires_at`.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SelectionConfig;
use crate::error::{Error, Result};

/// An in-progress seat selection with a fixed expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSelection {
    /// Selected seat identifiers, e.g. `B7`.
    #[serde(rename = "selectedSeats")]
    pub seats: BTreeSet<String>,

    /// Showtime the seats belong to.
    pub showtime_id: String,

    /// Movie being shown, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<String>,

    /// Theater hosting the showtime, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theater_id: Option<String>,

    /// Booking created for this selection, once there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,

    /// Total price of the selected seats.
    pub total_amount: f64,

    /// When the selection was saved.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// When the selection stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl SeatSelection {
    /// Build a selection from a draft, valid for `ttl` starting at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if `now + ttl` is out of range.
    pub fn from_draft(draft: SelectionDraft, now: DateTime<Utc>, ttl: Duration) -> Result<Self> {
        Ok(Self {
            seats: draft.seats,
            showtime_id: draft.showtime_id,
            movie_id: draft.movie_id,
            theater_id: draft.theater_id,
            booking_id: draft.booking_id,
            total_amount: draft.total_amount,
            created_at: now,
            expires_at: expiry_after(now, ttl)?,
        })
    }

    /// Whether the selection is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left until expiry at `now`, never negative.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Number of selected seats.
    #[must_use]
    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }
}

/// `now + ttl`, or an error instead of overflowing.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if the sum is not a representable time.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| Error::ConfigValidation {
            message: format!("selection TTL of {}s is out of range", ttl.num_seconds()),
        })
}

/// The persisted shape of a selection.
///
/// Older records may lack `expiresAt`; the store repairs those on load.
/// Timestamps are written as RFC 3339 text but epoch milliseconds are also
/// read, as browser clients store them that way.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSelection {
    #[serde(rename = "selectedSeats")]
    seats: BTreeSet<String>,
    showtime_id: String,
    #[serde(default)]
    movie_id: Option<String>,
    #[serde(default)]
    theater_id: Option<String>,
    #[serde(default)]
    booking_id: Option<String>,
    #[serde(default)]
    total_amount: f64,
    #[serde(rename = "timestamp", deserialize_with = "timestamp::required")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    expires_at: Option<DateTime<Utc>>,
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(DateTime<Utc>),
    }

    impl Raw {
        fn into_datetime<E: de::Error>(self) -> Result<DateTime<Utc>, E> {
            match self {
                Self::Text(at) => Ok(at),
                Self::Millis(ms) => DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| E::custom(format!("timestamp {ms}ms is out of range"))),
            }
        }
    }

    pub(super) fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Raw::deserialize(deserializer)?.into_datetime()
    }

    pub(super) fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(Raw::into_datetime)
            .transpose()
    }
}

impl StoredSelection {
    /// Parse a stored JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid selection record.
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// The stored expiry, if the record has one.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Finish the record, using `fallback_expiry` when none was stored.
    #[must_use]
    pub fn into_selection(self, fallback_expiry: DateTime<Utc>) -> SeatSelection {
        SeatSelection {
            seats: self.seats,
            showtime_id: self.showtime_id,
            movie_id: self.movie_id,
            theater_id: self.theater_id,
            booking_id: self.booking_id,
            total_amount: self.total_amount,
            created_at: self.created_at,
            expires_at: self.expires_at.unwrap_or(fallback_expiry),
        }
    }
}

/// Caller-supplied fields for a new selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionDraft {
    /// Seats to hold.
    pub seats: BTreeSet<String>,
    /// Showtime the seats belong to.
    pub showtime_id: String,
    /// Movie being shown.
    pub movie_id: Option<String>,
    /// Theater hosting the showtime.
    pub theater_id: Option<String>,
    /// Booking created for this selection.
    pub booking_id: Option<String>,
    /// Total price.
    pub total_amount: f64,
}

impl SelectionDraft {
    /// Start a draft for `showtime_id` holding `seats`.
    #[must_use]
    pub fn new<I, S>(showtime_id: impl Into<String>, seats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seats: seats.into_iter().map(Into::into).collect(),
            showtime_id: showtime_id.into(),
            ..Self::default()
        }
    }

    /// Set the total amount.
    #[must_use]
    pub fn with_amount(mut self, total_amount: f64) -> Self {
        self.total_amount = total_amount;
        self
    }

    /// Set the booking id.
    #[must_use]
    pub fn with_booking(mut self, booking_id: impl Into<String>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }
}

/// A partial update. `None` fields are left untouched.
///
/// Timestamps are not patchable: an update never extends the hold.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionPatch {
    /// Replacement seat set.
    pub seats: Option<BTreeSet<String>>,
    /// Replacement showtime.
    pub showtime_id: Option<String>,
    /// Replacement movie id.
    pub movie_id: Option<String>,
    /// Replacement theater id.
    pub theater_id: Option<String>,
    /// Replacement booking id.
    pub booking_id: Option<String>,
    /// Replacement total.
    pub total_amount: Option<f64>,
}

impl SelectionPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge the patch into `selection`.
    pub fn apply_to(self, selection: &mut SeatSelection) {
        if let Some(seats) = self.seats {
            selection.seats = seats;
        }
        if let Some(showtime_id) = self.showtime_id {
            selection.showtime_id = showtime_id;
        }
        if let Some(movie_id) = self.movie_id {
            selection.movie_id = Some(movie_id);
        }
        if let Some(theater_id) = self.theater_id {
            selection.theater_id = Some(theater_id);
        }
        if let Some(booking_id) = self.booking_id {
            selection.booking_id = Some(booking_id);
        }
        if let Some(total_amount) = self.total_amount {
            selection.total_amount = total_amount;
        }
    }
}

/// Acceptance rules for selections, compiled from [`SelectionConfig`].
#[derive(Debug, Clone)]
pub struct SelectionRules {
    max_seats: usize,
    seat_pattern: Regex,
}

impl SelectionRules {
    /// Compile the rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the seat id pattern is not a valid regex.
    pub fn from_config(config: &SelectionConfig) -> Result<Self> {
        let seat_pattern =
            Regex::new(&config.seat_id_pattern).map_err(|e| Error::ConfigValidation {
                message: format!("invalid regex pattern: {e}"),
            })?;
        Ok(Self {
            max_seats: config.max_seats,
            seat_pattern,
        })
    }

    /// Check a selection against the rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] describing the first violation.
    pub fn check(&self, selection: &SeatSelection) -> Result<()> {
        if selection.showtime_id.trim().is_empty() {
            return Err(Error::invalid_selection("showtime id cannot be empty"));
        }
        if selection.seats.is_empty() {
            return Err(Error::invalid_selection("no seats selected"));
        }
        if selection.seats.len() > self.max_seats {
            return Err(Error::invalid_selection(format!(
                "{} seats selected, at most {} allowed",
                selection.seats.len(),
                self.max_seats
            )));
        }
        if let Some(bad) = selection
            .seats
            .iter()
            .find(|seat| !self.seat_pattern.is_match(seat))
        {
            return Err(Error::invalid_selection(format!("invalid seat id: {bad}")));
        }
        if !selection.total_amount.is_finite() || selection.total_amount < 0.0 {
            return Err(Error::invalid_selection(format!(
                "total amount must be a non-negative number, got {}",
                selection.total_amount
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: DateTime<Utc>) -> SeatSelection {
        SeatSelection::from_draft(
            SelectionDraft::new("show-1", ["A1", "A2"]).with_amount(24.0),
            now,
            Duration::minutes(10),
        )
        .unwrap()
    }

    fn default_rules() -> SelectionRules {
        SelectionRules::from_config(&SelectionConfig::default()).unwrap()
    }

    #[test]
    fn test_from_draft_sets_expiry() {
        let now = Utc::now();
        let selection = sample(now);

        assert_eq!(selection.created_at, now);
        assert_eq!(selection.expires_at, now + Duration::minutes(10));
        assert_eq!(selection.seat_count(), 2);
    }

    #[test]
    fn test_from_draft_rejects_unrepresentable_expiry() {
        let err = SeatSelection::from_draft(
            SelectionDraft::new("show-1", ["A1"]),
            DateTime::<Utc>::MAX_UTC - Duration::seconds(30),
            Duration::minutes(1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let now = Utc::now();
        let selection = sample(now);

        assert!(!selection.is_expired_at(selection.expires_at));
        assert!(selection.is_expired_at(selection.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_remaining_at_never_negative() {
        let now = Utc::now();
        let selection = sample(now);

        assert_eq!(selection.remaining_at(now), Duration::minutes(10));
        assert_eq!(
            selection.remaining_at(now + Duration::hours(1)),
            Duration::zero()
        );
    }

    #[test]
    fn test_json_uses_browser_field_names() {
        let selection = sample(Utc::now());
        let json = serde_json::to_string(&selection).unwrap();

        assert!(json.contains("\"selectedSeats\""));
        assert!(json.contains("\"showtimeId\""));
        assert!(json.contains("\"totalAmount\""));
        assert!(json.contains("\"timestamp\""));
        assert!(json.contains("\"expiresAt\""));
        assert!(!json.contains("bookingId"));
    }

    #[test]
    fn test_stored_selection_without_expiry() {
        let payload = r#"{
            "selectedSeats": ["C4"],
            "showtimeId": "show-9",
            "totalAmount": 12.5,
            "timestamp": "2026-01-01T10:00:00Z"
        }"#;
        let stored = StoredSelection::parse(payload).unwrap();
        assert!(stored.expires_at().is_none());

        let fallback = "2026-01-01T10:10:00Z".parse::<DateTime<Utc>>().unwrap();
        let selection = stored.into_selection(fallback);
        assert_eq!(selection.expires_at, fallback);
        assert!(selection.seats.contains("C4"));
    }

    #[test]
    fn test_stored_selection_accepts_epoch_millis() {
        let payload = r#"{
            "selectedSeats": ["D1", "D2"],
            "showtimeId": "show-4",
            "totalAmount": 30,
            "timestamp": 1767261600000,
            "expiresAt": 1767262200000
        }"#;
        let stored = StoredSelection::parse(payload).unwrap();
        let expires_at = "2026-01-01T10:10:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(stored.expires_at(), Some(expires_at));

        let selection = stored.into_selection(Utc::now());
        assert_eq!(
            selection.created_at,
            "2026-01-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(selection.expires_at, expires_at);

        // Written back as RFC 3339 text
        let json = serde_json::to_value(&selection).unwrap();
        assert_eq!(json["expiresAt"], "2026-01-01T10:10:00Z");
    }

    #[test]
    fn test_stored_selection_rejects_out_of_range_millis() {
        let payload = r#"{
            "selectedSeats": ["D1"],
            "showtimeId": "show-4",
            "timestamp": 9223372036854775807
        }"#;
        assert!(StoredSelection::parse(payload).is_err());
    }

    #[test]
    fn test_stored_selection_rejects_garbage() {
        assert!(StoredSelection::parse("not json").is_err());
        assert!(StoredSelection::parse(r#"{"selectedSeats": 3}"#).is_err());
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut selection = sample(Utc::now());
        let expires_at = selection.expires_at;

        let patch = SelectionPatch {
            booking_id: Some("bk-42".to_string()),
            total_amount: Some(30.0),
            ..SelectionPatch::default()
        };
        patch.apply_to(&mut selection);

        assert_eq!(selection.booking_id.as_deref(), Some("bk-42"));
        assert!((selection.total_amount - 30.0).abs() < f64::EPSILON);
        assert_eq!(selection.showtime_id, "show-1");
        assert_eq!(selection.expires_at, expires_at);
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(SelectionPatch::default().is_empty());
        let patch = SelectionPatch {
            movie_id: Some("m-1".to_string()),
            ..SelectionPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_rules_accept_valid_selection() {
        let rules = default_rules();
        assert!(rules.check(&sample(Utc::now())).is_ok());
    }

    #[test]
    fn test_rules_reject_empty_seats() {
        let rules = default_rules();
        let mut selection = sample(Utc::now());
        selection.seats.clear();

        let err = rules.check(&selection).unwrap_err();
        assert!(err.is_invalid_selection());
        assert!(err.to_string().contains("no seats"));
    }

    #[test]
    fn test_rules_reject_too_many_seats() {
        let config = SelectionConfig {
            max_seats: 1,
            ..SelectionConfig::default()
        };
        let rules = SelectionRules::from_config(&config).unwrap();

        let err = rules.check(&sample(Utc::now())).unwrap_err();
        assert!(err.to_string().contains("at most 1"));
    }

    #[test]
    fn test_rules_reject_bad_seat_id() {
        let rules = default_rules();
        let mut selection = sample(Utc::now());
        selection.seats.insert("row 7 seat 3".to_string());

        let err = rules.check(&selection).unwrap_err();
        assert!(err.to_string().contains("row 7 seat 3"));
    }

    #[test]
    fn test_rules_reject_negative_amount() {
        let rules = default_rules();
        let mut selection = sample(Utc::now());
        selection.total_amount = -1.0;
        assert!(rules.check(&selection).is_err());

        selection.total_amount = f64::NAN;
        assert!(rules.check(&selection).is_err());
    }

    #[test]
    fn test_rules_reject_blank_showtime() {
        let rules = default_rules();
        let mut selection = sample(Utc::now());
        selection.showtime_id = " ".to_string();
        assert!(rules.check(&selection).is_err());
    }

    #[test]
    fn test_rules_from_invalid_pattern() {
        let config = SelectionConfig {
            seat_id_pattern: "[".to_string(),
            ..SelectionConfig::default()
        };
        assert!(SelectionRules::from_config(&config).is_err());
    }
}
