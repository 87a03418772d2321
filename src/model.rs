use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Calendar helpers ─────────────────────────────────────────────

/// Midnight UTC of `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    (i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE) * DAY_MS
}

/// The whole UTC day of `date`.
pub fn day_span(date: NaiveDate) -> Span {
    let start = day_start(date);
    Span::new(start, start + DAY_MS)
}

/// UTC calendar date containing the instant `t`.
pub fn utc_date(t: Ms) -> Option<NaiveDate> {
    let days = t.div_euclid(DAY_MS) + UNIX_EPOCH_DAYS_FROM_CE;
    i32::try_from(days)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
}

/// 0 = Sunday through 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn time_of_day_ms(t: NaiveTime) -> Ms {
    Ms::from(t.num_seconds_from_midnight()) * 1000
}

// ── Marketplace records ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Ulid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub id: Ulid,
    pub user_id: Ulid,
    pub full_name: String,
    pub specialization: String,
    pub bio: Option<String>,
    pub updated_at: Ms,
}

impl ExpertProfile {
    /// Overwrite the fields `update` names. An empty bio clears it.
    pub fn apply(&mut self, update: &ExpertProfileUpdate, updated_at: Ms) {
        if let Some(full_name) = &update.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(specialization) = &update.specialization {
            self.specialization = specialization.clone();
        }
        if let Some(bio) = &update.bio {
            self.bio = (!bio.is_empty()).then(|| bio.clone());
        }
        self.updated_at = updated_at;
    }
}

/// Profile fields an expert may edit; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertProfileUpdate {
    pub full_name: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
}

impl ExpertProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.specialization.is_none() && self.bio.is_none()
    }
}

/// An expert profile with its owning user and the consultations it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpertDetails {
    pub profile: ExpertProfile,
    pub user: Option<UserSummary>,
    pub consultation_types: Vec<ConsultationType>,
}

/// A recurring weekly window during which an expert accepts bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertAvailability {
    pub id: Ulid,
    pub expert_id: Ulid,
    /// 0 = Sunday through 6 = Saturday.
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
}

impl ExpertAvailability {
    /// The concrete span this window opens on `date`, if it applies to that day.
    pub fn span_on(&self, date: NaiveDate) -> Option<Span> {
        if !self.is_active || self.day_of_week != day_of_week(date) {
            return None;
        }
        let midnight = day_start(date);
        let start = midnight + time_of_day_ms(self.start_time);
        let end = midnight + time_of_day_ms(self.end_time);
        (start < end).then(|| Span::new(start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationType {
    pub id: Ulid,
    pub expert_id: Ulid,
    pub duration_minutes: u32,
    /// Minor currency units.
    pub price: u64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold a slot on the expert's calendar.
    pub const ACTIVE: [BookingStatus; 2] = [BookingStatus::Pending, BookingStatus::Confirmed];

    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn blocks_calendar(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// pending → confirmed → completed, with cancel allowed from either non-terminal state.
    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
                | (Self::Confirmed, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid booking status: {s}")),
        }
    }
}

/// Which side of a booking a user is listing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Expert,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "expert" => Ok(Self::Expert),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_id: Ulid,
    pub expert_id: Ulid,
    pub consultation_type_id: Ulid,
    pub scheduled_at: Ms,
    /// Snapshot of the consultation type's duration at creation.
    pub duration_minutes: u32,
    /// Snapshot of the consultation type's price at creation.
    pub total_price: u64,
    pub status: BookingStatus,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.scheduled_at, self.duration_minutes)
    }
}

/// What a client submits to reserve a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_id: Ulid,
    pub expert_id: Ulid,
    pub consultation_type_id: Ulid,
    pub requested_start: Ms,
    pub notes: Option<String>,
}

/// A client's rating of a completed booking. One per booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub client_id: Ulid,
    pub expert_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewDetails {
    pub review: Review,
    pub client_name: Option<String>,
}

/// A booking with its related records attached for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingDetails {
    pub booking: Booking,
    pub client: Option<UserSummary>,
    pub expert: Option<ExpertProfile>,
    pub consultation_type: Option<ConsultationType>,
}

// ── Per-expert calendar ──────────────────────────────────────────

/// Everything that decides an expert's bookable time: windows plus bookings.
/// Reviews live here too, since each one hangs off a booking.
#[derive(Debug, Clone)]
pub struct ExpertCalendar {
    pub expert_id: Ulid,
    pub windows: Vec<ExpertAvailability>,
    /// All bookings regardless of status, sorted by `scheduled_at`.
    pub bookings: Vec<Booking>,
    pub reviews: Vec<Review>,
}

impl ExpertCalendar {
    pub fn new(expert_id: Ulid) -> Self {
        Self {
            expert_id,
            windows: Vec::new(),
            bookings: Vec::new(),
            reviews: Vec::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn review_for_booking(&self, booking_id: Ulid) -> Option<&Review> {
        self.reviews.iter().find(|r| r.booking_id == booking_id)
    }

    /// Insert booking maintaining sort order by scheduled_at.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.scheduled_at, |b| b.scheduled_at)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn window_mut(&mut self, id: Ulid) -> Option<&mut ExpertAvailability> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.scheduled_at < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span().end > query.start)
    }

    /// First pending/confirmed booking that overlaps `span`.
    pub fn active_conflict(&self, span: &Span) -> Option<&Booking> {
        self.overlapping(span).find(|b| b.status.blocks_calendar())
    }
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: UserSummary,
    },
    ExpertCreated {
        profile: ExpertProfile,
    },
    ExpertUpdated {
        id: Ulid,
        update: ExpertProfileUpdate,
        updated_at: Ms,
    },
    ConsultationTypeCreated {
        consultation_type: ConsultationType,
    },
    WindowAdded {
        window: ExpertAvailability,
    },
    WindowActiveSet {
        id: Ulid,
        expert_id: Ulid,
        active: bool,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        expert_id: Ulid,
        status: BookingStatus,
        meeting_link: Option<String>,
        updated_at: Ms,
    },
    ReviewPosted {
        review: Review,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking_at(start: Ms, minutes: u32, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            client_id: Ulid::new(),
            expert_id: Ulid::nil(),
            consultation_type_id: Ulid::new(),
            scheduled_at: start,
            duration_minutes: minutes,
            total_price: 0,
            status,
            meeting_link: None,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.contains_span(&Span::new(120, 200)));
        assert!(!a.contains_span(&b));
    }

    #[test]
    fn day_start_matches_unix_epoch() {
        assert_eq!(day_start(date(1970, 1, 1)), 0);
        assert_eq!(day_start(date(1970, 1, 2)), DAY_MS);
        assert_eq!(day_start(date(1969, 12, 31)), -DAY_MS);
    }

    #[test]
    fn utc_date_inverts_day_start() {
        let d = date(2026, 3, 2);
        let midnight = day_start(d);
        assert_eq!(utc_date(midnight), Some(d));
        assert_eq!(utc_date(midnight + DAY_MS - 1), Some(d));
        assert_eq!(utc_date(midnight - 1), Some(date(2026, 3, 1)));
    }

    #[test]
    fn weekday_numbering_starts_on_sunday() {
        // 2026-03-01 is a Sunday.
        assert_eq!(day_of_week(date(2026, 3, 1)), 0);
        assert_eq!(day_of_week(date(2026, 3, 2)), 1);
        assert_eq!(day_of_week(date(2026, 3, 7)), 6);
    }

    #[test]
    fn window_span_only_on_matching_weekday() {
        let window = ExpertAvailability {
            id: Ulid::new(),
            expert_id: Ulid::new(),
            day_of_week: 1,
            start_time: hm(9, 0),
            end_time: hm(12, 0),
            is_active: true,
        };
        let monday = date(2026, 3, 2);
        let span = window.span_on(monday).unwrap();
        assert_eq!(span.start, day_start(monday) + 9 * 60 * MINUTE_MS);
        assert_eq!(span.end, day_start(monday) + 12 * 60 * MINUTE_MS);
        assert!(window.span_on(date(2026, 3, 3)).is_none());

        let inactive = ExpertAvailability { is_active: false, ..window };
        assert!(inactive.span_on(monday).is_none());
    }

    #[test]
    fn inverted_window_opens_nothing() {
        let window = ExpertAvailability {
            id: Ulid::new(),
            expert_id: Ulid::new(),
            day_of_week: 1,
            start_time: hm(12, 0),
            end_time: hm(9, 0),
            is_active: true,
        };
        assert!(window.span_on(date(2026, 3, 2)).is_none());
    }

    #[test]
    fn status_machine_edges() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Pending));
        for target in BookingStatus::ALL {
            assert!(!Completed.can_transition_to(target));
            assert!(!Cancelled.can_transition_to(target));
        }
    }

    #[test]
    fn status_parse_and_display() {
        for status in BookingStatus::ALL {
            assert_eq!(status.to_string().parse::<BookingStatus>(), Ok(status));
        }
        assert_eq!("CANCELED".parse::<BookingStatus>(), Ok(BookingStatus::Cancelled));
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn calendar_keeps_bookings_sorted() {
        let mut cal = ExpertCalendar::new(Ulid::new());
        cal.insert_booking(booking_at(300, 1, BookingStatus::Pending));
        cal.insert_booking(booking_at(100, 1, BookingStatus::Pending));
        cal.insert_booking(booking_at(200, 1, BookingStatus::Confirmed));
        let starts: Vec<Ms> = cal.bookings.iter().map(|b| b.scheduled_at).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_future() {
        let mut cal = ExpertCalendar::new(Ulid::new());
        let h = 60 * MINUTE_MS;
        cal.insert_booking(booking_at(9 * h, 60, BookingStatus::Confirmed));
        cal.insert_booking(booking_at(10 * h, 60, BookingStatus::Pending));
        cal.insert_booking(booking_at(14 * h, 60, BookingStatus::Pending));

        let query = Span::new(10 * h, 11 * h);
        let hits: Vec<_> = cal.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scheduled_at, 10 * h);
    }

    #[test]
    fn cancelled_booking_is_not_a_conflict() {
        let mut cal = ExpertCalendar::new(Ulid::new());
        cal.insert_booking(booking_at(1_000 * MINUTE_MS, 30, BookingStatus::Cancelled));
        let span = Span::from_minutes(1_000 * MINUTE_MS, 30);
        assert!(cal.active_conflict(&span).is_none());

        cal.insert_booking(booking_at(1_010 * MINUTE_MS, 30, BookingStatus::Pending));
        assert!(cal.active_conflict(&span).is_some());
    }

    #[test]
    fn profile_update_touches_only_named_fields() {
        let mut profile = ExpertProfile {
            id: Ulid::new(),
            user_id: Ulid::new(),
            full_name: "Dr. Vega".into(),
            specialization: "therapy".into(),
            bio: Some("twenty years of practice".into()),
            updated_at: 1,
        };
        profile.apply(
            &ExpertProfileUpdate {
                specialization: Some("couples therapy".into()),
                ..Default::default()
            },
            5,
        );
        assert_eq!(profile.full_name, "Dr. Vega");
        assert_eq!(profile.specialization, "couples therapy");
        assert_eq!(profile.bio.as_deref(), Some("twenty years of practice"));
        assert_eq!(profile.updated_at, 5);

        profile.apply(
            &ExpertProfileUpdate {
                bio: Some(String::new()),
                ..Default::default()
            },
            6,
        );
        assert!(profile.bio.is_none());
        assert!(ExpertProfileUpdate::default().is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking_at(42, 45, BookingStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
