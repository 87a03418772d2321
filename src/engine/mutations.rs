use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::validate::{now_ms, validate_duration, validate_text, validate_timestamp, validate_window};
use super::{BookingEngine, BookingError};

impl BookingEngine {
    /// Reserve a slot. The booking starts out `pending` with the consultation
    /// type's duration and price copied onto it.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<BookingDetails, BookingError> {
        let expert_id = request.expert_id;
        let requested_start = request.requested_start;
        let result = self.try_create_booking(request).await;
        match &result {
            Ok(details) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    booking_id = %details.booking.id,
                    %expert_id,
                    scheduled_at = requested_start,
                    "booking created"
                );
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.reason())
                    .increment(1);
                tracing::info!(%expert_id, scheduled_at = requested_start, reason = e.reason(), "booking rejected: {e}");
            }
        }
        result
    }

    async fn try_create_booking(&self, request: BookingRequest) -> Result<BookingDetails, BookingError> {
        validate_text("notes", request.notes.as_deref(), MAX_NOTES_LEN)?;
        validate_timestamp(request.requested_start)?;

        let consultation_type = self
            .fetch(
                "get_consultation_type",
                self.repo.get_consultation_type(request.consultation_type_id),
            )
            .await?;
        if consultation_type.expert_id != request.expert_id {
            return Err(BookingError::NotFound {
                entity: "consultation type",
                id: request.consultation_type_id,
            });
        }

        let date = utc_date(request.requested_start)
            .ok_or_else(|| BookingError::Invalid("requested start has no calendar date".into()))?;
        let open = self
            .compute_open_slots(request.expert_id, date, consultation_type.duration_minutes)
            .await?;
        if open.binary_search(&request.requested_start).is_err() {
            return Err(BookingError::SlotUnavailable {
                expert_id: request.expert_id,
                start: request.requested_start,
            });
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            client_id: request.client_id,
            expert_id: request.expert_id,
            consultation_type_id: consultation_type.id,
            scheduled_at: request.requested_start,
            duration_minutes: consultation_type.duration_minutes,
            total_price: consultation_type.price,
            status: BookingStatus::Pending,
            meeting_link: None,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        let booking = self.fetch("insert_booking", self.repo.insert_booking(booking)).await?;
        self.details_for(booking).await
    }

    /// Move a booking along pending → confirmed → completed, or cancel it.
    /// `meeting_link` is recorded only when confirming.
    pub async fn transition_status(
        &self,
        id: Ulid,
        target: BookingStatus,
        meeting_link: Option<String>,
    ) -> Result<Booking, BookingError> {
        let result = self.try_transition(id, target, meeting_link).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "to" => target.as_str())
                    .increment(1);
                tracing::info!(booking_id = %id, status = %booking.status, "booking status changed");
            }
            Err(e) => {
                metrics::counter!(observability::STATUS_TRANSITIONS_REJECTED_TOTAL, "reason" => e.reason())
                    .increment(1);
                tracing::info!(booking_id = %id, to = %target, reason = e.reason(), "transition rejected: {e}");
            }
        }
        result
    }

    async fn try_transition(
        &self,
        id: Ulid,
        target: BookingStatus,
        meeting_link: Option<String>,
    ) -> Result<Booking, BookingError> {
        validate_text("meeting_link", meeting_link.as_deref(), MAX_MEETING_LINK_LEN)?;

        let current = self.fetch("get_booking", self.repo.get_booking(id)).await?;
        if !current.status.can_transition_to(target) {
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }

        let meeting_link = match target {
            BookingStatus::Confirmed => meeting_link,
            _ => {
                if meeting_link.is_some() {
                    tracing::debug!(booking_id = %id, to = %target, "meeting link ignored outside confirmation");
                }
                None
            }
        };

        let updated_at = now_ms().max(current.updated_at);
        match self
            .within(
                "update_booking_status",
                self.repo
                    .update_booking_status(id, current.status, target, meeting_link, updated_at),
            )
            .await?
        {
            Ok(booking) => Ok(booking),
            // Someone else moved the booking first; report from where it is now.
            Err(StoreError::StatusChanged { actual, .. }) => Err(BookingError::InvalidTransition {
                from: actual,
                to: target,
            }),
            Err(e) => Err(e.into()),
        }
    }

    // ── Directory ────────────────────────────────────────────

    pub async fn register_user(&self, user: UserSummary) -> Result<(), BookingError> {
        validate_text("full_name", Some(&user.full_name), MAX_NAME_LEN)?;
        validate_text("email", Some(&user.email), MAX_NAME_LEN)?;
        let id = user.id;
        self.fetch("insert_user", self.repo.insert_user(user)).await?;
        tracing::debug!(user_id = %id, "user registered");
        Ok(())
    }

    /// `updated_at` is stamped here; whatever the caller passed is replaced.
    pub async fn create_expert_profile(&self, mut profile: ExpertProfile) -> Result<(), BookingError> {
        validate_text("full_name", Some(&profile.full_name), MAX_NAME_LEN)?;
        validate_text("specialization", Some(&profile.specialization), MAX_NAME_LEN)?;
        validate_text("bio", profile.bio.as_deref(), MAX_BIO_LEN)?;
        profile.updated_at = now_ms();
        let id = profile.id;
        self.fetch("insert_expert", self.repo.insert_expert(profile)).await?;
        tracing::info!(expert_id = %id, "expert profile created");
        Ok(())
    }

    /// Change the named profile fields and bump `updated_at`. An empty `bio`
    /// clears it.
    pub async fn update_expert_profile(
        &self,
        id: Ulid,
        update: ExpertProfileUpdate,
    ) -> Result<ExpertProfile, BookingError> {
        if update.is_empty() {
            return Err(BookingError::Invalid("nothing to update".into()));
        }
        validate_text("full_name", update.full_name.as_deref(), MAX_NAME_LEN)?;
        validate_text("specialization", update.specialization.as_deref(), MAX_NAME_LEN)?;
        validate_text("bio", update.bio.as_deref(), MAX_BIO_LEN)?;

        let current = self.fetch("get_expert", self.repo.get_expert(id)).await?;
        let updated_at = now_ms().max(current.updated_at);
        let profile = self
            .fetch("update_expert", self.repo.update_expert(id, update, updated_at))
            .await?;
        tracing::info!(expert_id = %id, updated_at, "expert profile updated");
        Ok(profile)
    }

    pub async fn create_consultation_type(
        &self,
        id: Ulid,
        expert_id: Ulid,
        duration_minutes: u32,
        price: u64,
        description: Option<String>,
    ) -> Result<ConsultationType, BookingError> {
        validate_duration(duration_minutes)?;
        validate_text("description", description.as_deref(), MAX_DESCRIPTION_LEN)?;

        self.fetch("get_expert", self.repo.get_expert(expert_id)).await?;
        let existing = self
            .fetch("list_consultation_types", self.repo.list_consultation_types(expert_id))
            .await?;
        if existing.len() >= MAX_CONSULTATION_TYPES_PER_EXPERT {
            return Err(BookingError::Invalid(format!(
                "expert {expert_id} already offers {MAX_CONSULTATION_TYPES_PER_EXPERT} consultation types"
            )));
        }

        let consultation_type = ConsultationType {
            id,
            expert_id,
            duration_minutes,
            price,
            description,
        };
        self.fetch(
            "insert_consultation_type",
            self.repo.insert_consultation_type(consultation_type.clone()),
        )
        .await?;
        tracing::info!(consultation_type_id = %id, %expert_id, duration_minutes, price, "consultation type created");
        Ok(consultation_type)
    }

    pub async fn add_availability_window(
        &self,
        id: Ulid,
        expert_id: Ulid,
        day_of_week: u8,
        start_time: chrono::NaiveTime,
        end_time: chrono::NaiveTime,
    ) -> Result<ExpertAvailability, BookingError> {
        validate_window(day_of_week, start_time, end_time)?;

        self.fetch("get_expert", self.repo.get_expert(expert_id)).await?;
        let existing = self
            .fetch("get_availability", self.repo.get_availability(expert_id))
            .await?;
        if existing.len() >= MAX_WINDOWS_PER_EXPERT {
            return Err(BookingError::Invalid(format!(
                "expert {expert_id} already has {MAX_WINDOWS_PER_EXPERT} availability windows"
            )));
        }

        let window = ExpertAvailability {
            id,
            expert_id,
            day_of_week,
            start_time,
            end_time,
            is_active: true,
        };
        self.fetch("insert_availability", self.repo.insert_availability(window.clone()))
            .await?;
        tracing::info!(window_id = %id, %expert_id, day_of_week, %start_time, %end_time, "availability window added");
        Ok(window)
    }

    /// Windows are never deleted; deactivating one stops it opening slots.
    /// Existing bookings inside it are left alone.
    pub async fn set_window_active(&self, id: Ulid, active: bool) -> Result<ExpertAvailability, BookingError> {
        let window = self
            .fetch("set_availability_active", self.repo.set_availability_active(id, active))
            .await?;
        tracing::info!(window_id = %id, active, "availability window toggled");
        Ok(window)
    }

    // ── Reviews ──────────────────────────────────────────────

    /// Rate a completed session. Only the booking's client may do so, once.
    pub async fn post_review(
        &self,
        booking_id: Ulid,
        client_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, BookingError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(BookingError::Invalid(format!(
                "rating must be {MIN_RATING}..={MAX_RATING}, got {rating}"
            )));
        }
        validate_text("comment", comment.as_deref(), MAX_REVIEW_COMMENT_LEN)?;

        let booking = self.fetch("get_booking", self.repo.get_booking(booking_id)).await?;
        if booking.client_id != client_id {
            return Err(BookingError::Invalid(format!(
                "booking {booking_id} belongs to another client"
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(BookingError::Invalid(format!(
                "booking {booking_id} is {}; only completed sessions can be reviewed",
                booking.status
            )));
        }

        let review = Review {
            id: Ulid::new(),
            booking_id,
            client_id,
            expert_id: booking.expert_id,
            rating,
            comment,
            created_at: now_ms(),
        };
        let review = self.fetch("insert_review", self.repo.insert_review(review)).await?;
        metrics::counter!(observability::REVIEWS_POSTED_TOTAL).increment(1);
        tracing::info!(review_id = %review.id, %booking_id, expert_id = %review.expert_id, rating, "review posted");
        Ok(review)
    }
}
