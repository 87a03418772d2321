use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_REVIEWS_PAGE;
use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::availability::{open_slots, windows_on};
use super::validate::validate_duration;
use super::{BookingEngine, BookingError};

impl BookingEngine {
    /// Open slot starts of `duration_minutes` for `expert_id` on the UTC day `date`.
    ///
    /// Pending and confirmed bookings block; cancelled and completed do not.
    /// An expert with no windows that day gets an empty list, not an error.
    pub async fn compute_open_slots(
        &self,
        expert_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Ms>, BookingError> {
        validate_duration(duration_minutes)?;
        let started = Instant::now();

        let windows = self
            .fetch("get_availability", self.repo.get_availability(expert_id))
            .await?;
        let open = windows_on(&windows, date);
        if open.is_empty() {
            return Ok(Vec::new());
        }

        let booked = self
            .fetch(
                "get_bookings_for_expert_on_date",
                self.repo
                    .get_bookings_for_expert_on_date(expert_id, date, &BookingStatus::ACTIVE),
            )
            .await?;
        let busy: Vec<Span> = booked.iter().map(Booking::span).collect();
        let slots = open_slots(&open, &busy, Ms::from(duration_minutes) * MINUTE_MS);

        metrics::histogram!(observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            %expert_id,
            %date,
            duration_minutes,
            windows = open.len(),
            booked = busy.len(),
            slots = slots.len(),
            "computed open slots"
        );
        Ok(slots)
    }

    /// Open slots for a consultation the expert actually offers. A duration
    /// that matches none of the expert's consultation types is refused
    /// instead of answered with slots nobody can book.
    pub async fn bookable_slots(
        &self,
        expert_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Ms>, BookingError> {
        validate_duration(duration_minutes)?;
        let types = self
            .fetch("list_consultation_types", self.repo.list_consultation_types(expert_id))
            .await?;
        if !types.iter().any(|t| t.duration_minutes == duration_minutes) {
            return Err(BookingError::Invalid(format!(
                "expert {expert_id} offers no {duration_minutes}-minute consultation"
            )));
        }
        self.compute_open_slots(expert_id, date, duration_minutes).await
    }

    /// Every booking where `user_id` plays `role`, newest `scheduled_at` first.
    pub async fn list_bookings(&self, user_id: Ulid, role: Role) -> Result<Vec<BookingDetails>, BookingError> {
        let mut bookings = match role {
            Role::Client => {
                self.fetch("list_bookings_by_client", self.repo.list_bookings_by_client(user_id))
                    .await?
            }
            Role::Expert => {
                match self
                    .within("get_expert_by_user", self.repo.get_expert_by_user(user_id))
                    .await?
                {
                    Ok(profile) => {
                        self.fetch("list_bookings_by_expert", self.repo.list_bookings_by_expert(profile.id))
                            .await?
                    }
                    // A user without an expert profile simply has no expert-side bookings.
                    Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                }
            }
        };
        bookings.sort_by(|a, b| {
            b.scheduled_at
                .cmp(&a.scheduled_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        self.attach_details(bookings).await
    }

    pub async fn booking_details(&self, id: Ulid) -> Result<BookingDetails, BookingError> {
        let booking = self.fetch("get_booking", self.repo.get_booking(id)).await?;
        self.details_for(booking).await
    }

    /// Consultation types offered by an expert, shortest first.
    pub async fn consultation_types(&self, expert_id: Ulid) -> Result<Vec<ConsultationType>, BookingError> {
        self.fetch("get_expert", self.repo.get_expert(expert_id)).await?;
        self.fetch("list_consultation_types", self.repo.list_consultation_types(expert_id))
            .await
    }

    /// Public profile: the expert, their user record if still present, and
    /// what they offer.
    pub async fn expert_details(&self, expert_id: Ulid) -> Result<ExpertDetails, BookingError> {
        let profile = self.fetch("get_expert", self.repo.get_expert(expert_id)).await?;
        let user = self.optional("get_user", self.repo.get_user(profile.user_id)).await?;
        let consultation_types = self
            .fetch("list_consultation_types", self.repo.list_consultation_types(expert_id))
            .await?;
        Ok(ExpertDetails {
            profile,
            user,
            consultation_types,
        })
    }

    /// Newest reviews first, at most `limit` (capped at [`MAX_REVIEWS_PAGE`]),
    /// each with the reviewing client's name when known.
    pub async fn expert_reviews(&self, expert_id: Ulid, limit: usize) -> Result<Vec<ReviewDetails>, BookingError> {
        self.fetch("get_expert", self.repo.get_expert(expert_id)).await?;
        let mut reviews = self
            .fetch("list_reviews_by_expert", self.repo.list_reviews_by_expert(expert_id))
            .await?;
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        reviews.truncate(limit.min(MAX_REVIEWS_PAGE));

        let client_ids: BTreeSet<Ulid> = reviews.iter().map(|r| r.client_id).collect();
        let mut names = HashMap::new();
        for id in client_ids {
            if let Some(user) = self.optional("get_user", self.repo.get_user(id)).await? {
                names.insert(id, user.full_name);
            }
        }
        Ok(reviews
            .into_iter()
            .map(|review| ReviewDetails {
                client_name: names.get(&review.client_id).cloned(),
                review,
            })
            .collect())
    }

    pub async fn review_details(&self, review: Review) -> Result<ReviewDetails, BookingError> {
        let client = self.optional("get_user", self.repo.get_user(review.client_id)).await?;
        Ok(ReviewDetails {
            client_name: client.map(|u| u.full_name),
            review,
        })
    }

    pub(super) async fn details_for(&self, booking: Booking) -> Result<BookingDetails, BookingError> {
        let client = self.optional("get_user", self.repo.get_user(booking.client_id)).await?;
        let expert = self.optional("get_expert", self.repo.get_expert(booking.expert_id)).await?;
        let consultation_type = self
            .optional(
                "get_consultation_type",
                self.repo.get_consultation_type(booking.consultation_type_id),
            )
            .await?;
        Ok(BookingDetails {
            booking,
            client,
            expert,
            consultation_type,
        })
    }

    /// Attaches related records, fetching each distinct one once. Records that
    /// have disappeared are left as `None`.
    async fn attach_details(&self, bookings: Vec<Booking>) -> Result<Vec<BookingDetails>, BookingError> {
        let client_ids: BTreeSet<Ulid> = bookings.iter().map(|b| b.client_id).collect();
        let expert_ids: BTreeSet<Ulid> = bookings.iter().map(|b| b.expert_id).collect();
        let type_ids: BTreeSet<Ulid> = bookings.iter().map(|b| b.consultation_type_id).collect();

        let mut clients = HashMap::new();
        for id in client_ids {
            if let Some(user) = self.optional("get_user", self.repo.get_user(id)).await? {
                clients.insert(id, user);
            }
        }
        let mut experts = HashMap::new();
        for id in expert_ids {
            if let Some(profile) = self.optional("get_expert", self.repo.get_expert(id)).await? {
                experts.insert(id, profile);
            }
        }
        let mut types = HashMap::new();
        for id in type_ids {
            if let Some(ct) = self
                .optional("get_consultation_type", self.repo.get_consultation_type(id))
                .await?
            {
                types.insert(id, ct);
            }
        }

        Ok(bookings
            .into_iter()
            .map(|booking| BookingDetails {
                client: clients.get(&booking.client_id).cloned(),
                expert: experts.get(&booking.expert_id).cloned(),
                consultation_type: types.get(&booking.consultation_type_id).cloned(),
                booking,
            })
            .collect())
    }
}
