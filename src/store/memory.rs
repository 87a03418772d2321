use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;

use super::wal::Wal;
use super::writer::{self, WalCommand};
use super::{Repository, StoreError};

pub type SharedCalendar = Arc<RwLock<ExpertCalendar>>;

/// In-memory repository. With [`BookingStore::open`] every mutation is made
/// durable in the WAL before it becomes visible.
///
/// Each mutation runs to completion on its own task. A caller that stops
/// waiting (a timeout, a dropped connection) still gets its event applied in
/// memory exactly when it lands in the WAL.
pub struct BookingStore {
    state: Arc<StoreState>,
}

struct StoreState {
    users: DashMap<Ulid, UserSummary>,
    experts: DashMap<Ulid, ExpertProfile>,
    expert_by_user: DashMap<Ulid, Ulid>,
    consultation_types: DashMap<Ulid, ConsultationType>,
    calendars: DashMap<Ulid, SharedCalendar>,
    /// Reverse lookup: booking or window id → expert id.
    entity_to_expert: DashMap<Ulid, Ulid>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Mutations hold it shared; compaction holds it exclusively so no event
    /// lands between the snapshot and the file swap.
    write_gate: RwLock<()>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    /// Volatile store, nothing survives a restart.
    pub fn new() -> Self {
        Self {
            state: Arc::new(StoreState::new()),
        }
    }

    /// Replay the WAL at `wal_path` and start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer::run(wal, rx));

        let mut state = StoreState::new();
        state.wal_tx = Some(tx);
        state.restore(&events);
        tracing::info!(events = events.len(), path = %wal_path.display(), "store replayed");
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.state.wal_tx.is_some()
    }

    /// Number of WAL appends since the last compaction (0 when volatile).
    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.state.wal_appends_since_compact().await
    }

    /// Rewrite the WAL as the minimal event set that recreates the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.compact_wal().await }).await
    }

    /// Run a mutation on a task of its own and wait for its answer. Dropping
    /// the returned future abandons the answer, never the mutation.
    async fn detached<T, F, Fut>(&self, mutation: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(mutation())
            .await
            .map_err(|e| StoreError::Wal(format!("store task failed: {e}")))?
    }
}

impl StoreState {
    fn new() -> Self {
        Self {
            users: DashMap::new(),
            experts: DashMap::new(),
            expert_by_user: DashMap::new(),
            consultation_types: DashMap::new(),
            calendars: DashMap::new(),
            entity_to_expert: DashMap::new(),
            wal_tx: None,
            write_gate: RwLock::new(()),
        }
    }

    /// Rebuild state from a replayed event stream. Calendars are assembled
    /// unlocked and only then published. An active booking that overlaps one
    /// already replayed is dropped; the live store never commits such a pair.
    fn restore(&self, events: &[Event]) {
        let mut calendars: HashMap<Ulid, ExpertCalendar> = HashMap::new();
        for event in events {
            match calendar_owner(event) {
                Some(expert_id) => {
                    let cal = calendars
                        .entry(expert_id)
                        .or_insert_with(|| ExpertCalendar::new(expert_id));
                    if let Event::BookingCreated { booking } = event
                        && booking.status.blocks_calendar()
                        && let Some(existing) = cal.active_conflict(&booking.span())
                    {
                        tracing::warn!(
                            booking_id = %booking.id,
                            conflicting = %existing.id,
                            "dropping overlapping booking from replay"
                        );
                        continue;
                    }
                    apply_to_calendar(cal, event, &self.entity_to_expert);
                }
                None => self.apply_directory(event),
            }
        }
        // Replaces the empty calendars apply_directory created for known experts.
        for (id, cal) in calendars {
            self.calendars.insert(id, Arc::new(RwLock::new(cal)));
        }
    }

    fn calendar(&self, expert_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(expert_id).map(|e| e.value().clone())
    }

    fn expert_calendar(&self, expert_id: Ulid) -> Result<SharedCalendar, StoreError> {
        self.calendar(&expert_id).ok_or(StoreError::NotFound {
            entity: "expert",
            id: expert_id,
        })
    }

    fn calendar_for_entity(&self, entity: &'static str, id: Ulid) -> Result<SharedCalendar, StoreError> {
        self.entity_to_expert
            .get(&id)
            .map(|e| *e.value())
            .and_then(|expert_id| self.calendar(&expert_id))
            .ok_or(StoreError::NotFound { entity, id })
    }

    fn all_calendars(&self) -> Vec<SharedCalendar> {
        self.calendars.iter().map(|e| e.value().clone()).collect()
    }

    /// Write event to the WAL via the background writer. No-op when volatile.
    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append {
            event: event.clone(),
            response,
        })
        .await
        .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append then apply, for events that live outside any calendar.
    async fn commit_directory(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        self.persist(&event).await?;
        self.apply_directory(&event);
        Ok(())
    }

    /// WAL-append then apply, with the calendar's write lock already held.
    async fn commit_calendar(&self, cal: &mut ExpertCalendar, event: Event) -> Result<(), StoreError> {
        self.persist(&event).await?;
        apply_to_calendar(cal, &event, &self.entity_to_expert);
        Ok(())
    }

    fn apply_directory(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } => {
                self.users.insert(user.id, user.clone());
            }
            Event::ExpertCreated { profile } => {
                self.expert_by_user.insert(profile.user_id, profile.id);
                self.experts.insert(profile.id, profile.clone());
                self.calendars
                    .entry(profile.id)
                    .or_insert_with(|| Arc::new(RwLock::new(ExpertCalendar::new(profile.id))));
            }
            Event::ExpertUpdated { id, update, updated_at } => {
                if let Some(mut profile) = self.experts.get_mut(id) {
                    profile.apply(update, *updated_at);
                }
            }
            Event::ConsultationTypeCreated { consultation_type } => {
                self.consultation_types
                    .insert(consultation_type.id, consultation_type.clone());
            }
            Event::WindowAdded { .. }
            | Event::WindowActiveSet { .. }
            | Event::BookingCreated { .. }
            | Event::BookingStatusChanged { .. }
            | Event::ReviewPosted { .. } => {}
        }
    }

    async fn wal_appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.wal_tx else { return 0 };
        let (response, rx) = oneshot::channel();
        if tx.send(WalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.wal_tx else { return Ok(()) };
        let _gate = self.write_gate.write().await;

        let mut events: Vec<Event> = Vec::new();
        events.extend(self.users.iter().map(|e| Event::UserRegistered { user: e.value().clone() }));
        events.extend(self.experts.iter().map(|e| Event::ExpertCreated { profile: e.value().clone() }));
        events.extend(self.consultation_types.iter().map(|e| Event::ConsultationTypeCreated {
            consultation_type: e.value().clone(),
        }));
        for cal in self.all_calendars() {
            let guard = cal.read().await;
            events.extend(guard.windows.iter().map(|w| Event::WindowAdded { window: w.clone() }));
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
            events.extend(guard.reviews.iter().map(|r| Event::ReviewPosted { review: r.clone() }));
        }

        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Compact { events, response })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    // ── Mutations ───────────────────────────────────────────────

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        if self.entity_to_expert.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists {
                entity: "booking",
                id: booking.id,
            });
        }
        let cal = self.expert_calendar(booking.expert_id)?;
        let _gate = self.write_gate.read().await;
        let mut guard = cal.write().await;

        // Re-check under the write lock; whoever committed first keeps the slot.
        if let Some(existing) = guard.active_conflict(&booking.span()) {
            return Err(StoreError::SlotConflict {
                conflicting: existing.id,
            });
        }

        self.commit_calendar(&mut guard, Event::BookingCreated { booking: booking.clone() })
            .await?;
        Ok(booking)
    }

    async fn update_booking_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        status: BookingStatus,
        meeting_link: Option<String>,
        updated_at: Ms,
    ) -> Result<Booking, StoreError> {
        let cal = self.calendar_for_entity("booking", id)?;
        let _gate = self.write_gate.read().await;
        let mut guard = cal.write().await;
        let current = guard
            .booking(id)
            .ok_or(StoreError::NotFound { entity: "booking", id })?;
        if current.status != expected {
            return Err(StoreError::StatusChanged {
                id,
                actual: current.status,
            });
        }
        let expert_id = current.expert_id;

        let event = Event::BookingStatusChanged {
            id,
            expert_id,
            status,
            meeting_link,
            updated_at,
        };
        self.commit_calendar(&mut guard, event).await?;
        guard
            .booking(id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "booking", id })
    }

    async fn insert_user(&self, user: UserSummary) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::AlreadyExists { entity: "user", id: user.id });
        }
        self.commit_directory(Event::UserRegistered { user }).await
    }

    async fn insert_expert(&self, profile: ExpertProfile) -> Result<(), StoreError> {
        if self.experts.contains_key(&profile.id) {
            return Err(StoreError::AlreadyExists {
                entity: "expert",
                id: profile.id,
            });
        }
        if self.expert_by_user.contains_key(&profile.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "expert profile for user",
                id: profile.user_id,
            });
        }
        self.commit_directory(Event::ExpertCreated { profile }).await
    }

    /// The expert's calendar lock orders concurrent edits of one profile, so
    /// the WAL and memory agree on which edit came last.
    async fn update_expert(
        &self,
        id: Ulid,
        update: ExpertProfileUpdate,
        updated_at: Ms,
    ) -> Result<ExpertProfile, StoreError> {
        let cal = self.expert_calendar(id)?;
        let _gate = self.write_gate.read().await;
        let _guard = cal.write().await;

        let event = Event::ExpertUpdated { id, update, updated_at };
        self.persist(&event).await?;
        self.apply_directory(&event);
        self.experts
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { entity: "expert", id })
    }

    async fn insert_consultation_type(&self, consultation_type: ConsultationType) -> Result<(), StoreError> {
        if !self.experts.contains_key(&consultation_type.expert_id) {
            return Err(StoreError::NotFound {
                entity: "expert",
                id: consultation_type.expert_id,
            });
        }
        if self.consultation_types.contains_key(&consultation_type.id) {
            return Err(StoreError::AlreadyExists {
                entity: "consultation type",
                id: consultation_type.id,
            });
        }
        self.commit_directory(Event::ConsultationTypeCreated { consultation_type })
            .await
    }

    async fn insert_availability(&self, window: ExpertAvailability) -> Result<(), StoreError> {
        if self.entity_to_expert.contains_key(&window.id) {
            return Err(StoreError::AlreadyExists {
                entity: "availability window",
                id: window.id,
            });
        }
        let cal = self.expert_calendar(window.expert_id)?;
        let _gate = self.write_gate.read().await;
        let mut guard = cal.write().await;
        self.commit_calendar(&mut guard, Event::WindowAdded { window }).await
    }

    async fn set_availability_active(&self, id: Ulid, active: bool) -> Result<ExpertAvailability, StoreError> {
        let not_found = StoreError::NotFound {
            entity: "availability window",
            id,
        };
        let cal = self.calendar_for_entity("availability window", id)?;
        let _gate = self.write_gate.read().await;
        let mut guard = cal.write().await;
        let expert_id = guard
            .windows
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.expert_id)
            .ok_or(not_found.clone())?;
        self.commit_calendar(&mut guard, Event::WindowActiveSet { id, expert_id, active })
            .await?;
        guard.windows.iter().find(|w| w.id == id).cloned().ok_or(not_found)
    }

    async fn insert_review(&self, review: Review) -> Result<Review, StoreError> {
        let cal = self.expert_calendar(review.expert_id)?;
        let _gate = self.write_gate.read().await;
        let mut guard = cal.write().await;

        let booking = guard.booking(review.booking_id).ok_or(StoreError::NotFound {
            entity: "booking",
            id: review.booking_id,
        })?;
        if booking.status != BookingStatus::Completed {
            return Err(StoreError::Invalid("only completed bookings can be reviewed"));
        }
        if booking.client_id != review.client_id {
            return Err(StoreError::Invalid("only the booking's client can review it"));
        }
        if guard.review_for_booking(review.booking_id).is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "review for booking",
                id: review.booking_id,
            });
        }

        self.commit_calendar(&mut guard, Event::ReviewPosted { review: review.clone() })
            .await?;
        Ok(review)
    }
}

/// Expert whose calendar an event mutates, if any.
fn calendar_owner(event: &Event) -> Option<Ulid> {
    match event {
        Event::WindowAdded { window } => Some(window.expert_id),
        Event::WindowActiveSet { expert_id, .. } => Some(*expert_id),
        Event::BookingCreated { booking } => Some(booking.expert_id),
        Event::BookingStatusChanged { expert_id, .. } => Some(*expert_id),
        Event::ReviewPosted { review } => Some(review.expert_id),
        Event::UserRegistered { .. }
        | Event::ExpertCreated { .. }
        | Event::ExpertUpdated { .. }
        | Event::ConsultationTypeCreated { .. } => None,
    }
}

/// Apply a calendar event. Caller holds the lock.
fn apply_to_calendar(cal: &mut ExpertCalendar, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowAdded { window } => {
            entity_map.insert(window.id, window.expert_id);
            cal.windows.push(window.clone());
        }
        Event::WindowActiveSet { id, active, .. } => {
            if let Some(window) = cal.window_mut(*id) {
                window.is_active = *active;
            }
        }
        Event::BookingCreated { booking } => {
            entity_map.insert(booking.id, booking.expert_id);
            cal.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged {
            id,
            status,
            meeting_link,
            updated_at,
            ..
        } => {
            if let Some(booking) = cal.booking_mut(*id) {
                booking.status = *status;
                if meeting_link.is_some() {
                    booking.meeting_link = meeting_link.clone();
                }
                booking.updated_at = *updated_at;
            }
        }
        Event::ReviewPosted { review } => cal.reviews.push(review.clone()),
        Event::UserRegistered { .. }
        | Event::ExpertCreated { .. }
        | Event::ExpertUpdated { .. }
        | Event::ConsultationTypeCreated { .. } => {}
    }
}

#[async_trait]
impl Repository for BookingStore {
    async fn get_availability(&self, expert_id: Ulid) -> Result<Vec<ExpertAvailability>, StoreError> {
        match self.state.calendar(&expert_id) {
            Some(cal) => Ok(cal.read().await.windows.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn get_bookings_for_expert_on_date(
        &self,
        expert_id: Ulid,
        date: NaiveDate,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        let Some(cal) = self.state.calendar(&expert_id) else {
            return Ok(Vec::new());
        };
        let guard = cal.read().await;
        let day = day_span(date);
        Ok(guard
            .overlapping(&day)
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect())
    }

    async fn get_consultation_type(&self, id: Ulid) -> Result<ConsultationType, StoreError> {
        self.state
            .consultation_types
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound {
                entity: "consultation type",
                id,
            })
    }

    async fn list_consultation_types(&self, expert_id: Ulid) -> Result<Vec<ConsultationType>, StoreError> {
        let mut types: Vec<ConsultationType> = self
            .state
            .consultation_types
            .iter()
            .filter(|e| e.value().expert_id == expert_id)
            .map(|e| e.value().clone())
            .collect();
        types.sort_by_key(|t| (t.duration_minutes, t.id));
        Ok(types)
    }

    async fn get_booking(&self, id: Ulid) -> Result<Booking, StoreError> {
        let cal = self.state.calendar_for_entity("booking", id)?;
        let guard = cal.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "booking", id })
    }

    async fn insert_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_booking(booking).await })
            .await
    }

    async fn update_booking_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        status: BookingStatus,
        meeting_link: Option<String>,
        updated_at: Ms,
    ) -> Result<Booking, StoreError> {
        let state = self.state.clone();
        self.detached(move || async move {
            state
                .update_booking_status(id, expected, status, meeting_link, updated_at)
                .await
        })
        .await
    }

    async fn list_bookings_by_client(&self, client_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let mut out = Vec::new();
        for cal in self.state.all_calendars() {
            let guard = cal.read().await;
            out.extend(guard.bookings.iter().filter(|b| b.client_id == client_id).cloned());
        }
        Ok(out)
    }

    async fn list_bookings_by_expert(&self, expert_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        match self.state.calendar(&expert_id) {
            Some(cal) => Ok(cal.read().await.bookings.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn get_user(&self, id: Ulid) -> Result<UserSummary, StoreError> {
        self.state
            .users
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { entity: "user", id })
    }

    async fn get_expert(&self, id: Ulid) -> Result<ExpertProfile, StoreError> {
        self.state
            .experts
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { entity: "expert", id })
    }

    async fn get_expert_by_user(&self, user_id: Ulid) -> Result<ExpertProfile, StoreError> {
        let expert_id = self
            .state
            .expert_by_user
            .get(&user_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound {
                entity: "expert profile for user",
                id: user_id,
            })?;
        self.get_expert(expert_id).await
    }

    async fn insert_user(&self, user: UserSummary) -> Result<(), StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_user(user).await }).await
    }

    async fn insert_expert(&self, profile: ExpertProfile) -> Result<(), StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_expert(profile).await })
            .await
    }

    async fn update_expert(
        &self,
        id: Ulid,
        update: ExpertProfileUpdate,
        updated_at: Ms,
    ) -> Result<ExpertProfile, StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.update_expert(id, update, updated_at).await })
            .await
    }

    async fn insert_consultation_type(&self, consultation_type: ConsultationType) -> Result<(), StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_consultation_type(consultation_type).await })
            .await
    }

    async fn insert_availability(&self, window: ExpertAvailability) -> Result<(), StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_availability(window).await })
            .await
    }

    async fn set_availability_active(&self, id: Ulid, active: bool) -> Result<ExpertAvailability, StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.set_availability_active(id, active).await })
            .await
    }

    async fn insert_review(&self, review: Review) -> Result<Review, StoreError> {
        let state = self.state.clone();
        self.detached(move || async move { state.insert_review(review).await })
            .await
    }

    async fn list_reviews_by_expert(&self, expert_id: Ulid) -> Result<Vec<Review>, StoreError> {
        match self.state.calendar(&expert_id) {
            Some(cal) => Ok(cal.read().await.reviews.clone()),
            None => Ok(Vec::new()),
        }
    }
}
