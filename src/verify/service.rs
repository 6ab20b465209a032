use std::{path::Path, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    cache::ListingCache,
    db::{Role, User, VerificationState},
    events::{Event, EventAction, EventSink},
    jobs::{JobQueue, NOTIFICATION, Notification},
    store::Store,
    upload::StoredDocument,
};

use super::{Decision, LICENSE_KEYWORDS, OWNERSHIP_KEYWORDS, TextExtractor, decide};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub status: VerificationState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

/// Runs uploaded documents through text extraction and records the decision.
#[derive(Clone)]
pub struct Verifier {
    store: Store,
    extractor: Arc<dyn TextExtractor>,
    jobs: JobQueue,
    events: Arc<dyn EventSink>,
    cache: ListingCache,
    timeout: Duration,
}

impl Verifier {
    pub fn new(
        store: Store,
        extractor: Arc<dyn TextExtractor>,
        jobs: JobQueue,
        events: Arc<dyn EventSink>,
        cache: ListingCache,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            jobs,
            events,
            cache,
            timeout,
        }
    }

    /// Checks an ownership document. A verified bike goes live immediately.
    pub async fn verify_bike(
        &self,
        owner: &User,
        bike_id: Uuid,
        document: StoredDocument,
    ) -> AppResult<VerificationOutcome> {
        let outcome = self.check_bike(owner, bike_id, &document).await;
        if outcome.is_err() {
            document.discard().await;
        }
        outcome
    }

    /// Checks a renter's driving license.
    pub async fn verify_renter(&self, user: &User, document: StoredDocument) -> AppResult<VerificationOutcome> {
        let outcome = self.check_renter(user, &document).await;
        if outcome.is_err() {
            document.discard().await;
        }
        outcome
    }

    async fn check_bike(&self, owner: &User, bike_id: Uuid, document: &StoredDocument) -> AppResult<VerificationOutcome> {
        if owner.role != Role::Owner {
            return Err(AppError::forbidden("only owners can verify bikes"));
        }

        let bike = self
            .store
            .bike(bike_id)
            .await?
            .ok_or_else(|| AppError::not_found("bike not found"))?;
        if bike.owner_id != owner.id {
            return Err(AppError::forbidden("you do not own this bike"));
        }

        let current = bike.verification_status;
        if !current.accepts_documents() {
            return Err(AppError::conflict("bike is already verified"));
        }

        let text = self.extract(&document.path).await?;
        let decision = decide(&text, &owner.username, OWNERSHIP_KEYWORDS);
        let next = current
            .transition(decision.into())
            .map_err(|err| AppError::conflict(err.to_string()))?;

        let (subject, body, message) = match decision {
            Decision::Verified => (
                "Bike Verified - Bike Rental App",
                format!("Hi {}, {} ({}) has been verified and is now listed.", owner.username, bike.name, bike.bike_number),
                "Bike verified and listed!",
            ),
            Decision::Pending => (
                "Verification Pending",
                format!(
                    "Hi {}, we could not auto-verify the document for {}. An admin will review it shortly.",
                    owner.username, bike.name
                ),
                "Could not auto-verify ownership. Marked for manual review.",
            ),
        };
        let notification = notification(&owner.email, subject, body);

        // the decision and its notification commit together or not at all
        let mut tx = self.store.begin().await?;
        if !Store::set_bike_verification(&mut *tx, bike.id, current, next, &document.reference).await? {
            return Err(AppError::conflict("bike verification changed while the document was checked"));
        }
        let job_id = JobQueue::insert(&mut *tx, NOTIFICATION, &notification).await?;
        tx.commit().await?;
        self.jobs.wake_worker();
        info!(bike_id = %bike.id, status = %next, %job_id, "bike verification recorded");

        if next.is_verified() {
            self.cache.invalidate_available().await;
            self.events.emit(Event::new(
                EventAction::Verified,
                bike.id,
                Some(owner.id),
                format!("Ownership of {} has been verified.", bike.name),
            ));
            self.events.emit(Event::new(
                EventAction::Added,
                bike.id,
                Some(owner.id),
                format!("{} is now listed for rent.", bike.name),
            ));
        }

        Ok(outcome(next, message, text))
    }

    async fn check_renter(&self, user: &User, document: &StoredDocument) -> AppResult<VerificationOutcome> {
        if user.role != Role::Renter {
            return Err(AppError::forbidden("only renters need to verify a driver's license"));
        }

        let current = user.verification_status;
        if !current.accepts_documents() {
            return Err(AppError::conflict("license is already verified"));
        }

        let text = self.extract(&document.path).await?;
        let decision = decide(&text, &user.username, LICENSE_KEYWORDS);
        let next = current
            .transition(decision.into())
            .map_err(|err| AppError::conflict(err.to_string()))?;

        let (subject, body, message) = match decision {
            Decision::Verified => (
                "Identity Verified - Bike Rental App",
                format!("Hi {}, your driver's license has been verified! You can now rent bikes.", user.username),
                "Identity verified successfully!",
            ),
            Decision::Pending => (
                "Verification Pending",
                format!(
                    "Hi {}, we could not auto-verify your ID. An admin will review it shortly.",
                    user.username
                ),
                "Could not auto-verify name. Marked for manual review.",
            ),
        };
        let notification = notification(&user.email, subject, body);

        let mut tx = self.store.begin().await?;
        if !Store::set_user_verification(&mut *tx, user.id, current, next, &document.reference).await? {
            return Err(AppError::conflict("license verification changed while the document was checked"));
        }
        let job_id = JobQueue::insert(&mut *tx, NOTIFICATION, &notification).await?;
        tx.commit().await?;
        self.jobs.wake_worker();
        info!(user_id = %user.id, status = %next, %job_id, "license verification recorded");

        Ok(outcome(next, message, text))
    }

    async fn extract(&self, path: &Path) -> AppResult<String> {
        match tokio::time::timeout(self.timeout, self.extractor.extract(path)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "text extraction failed");
                Err(AppError::Extraction(err.to_string()))
            }
            Err(_) => {
                warn!(path = %path.display(), timeout = ?self.timeout, "text extraction timed out");
                Err(AppError::ExtractionTimeout(self.timeout))
            }
        }
    }
}

fn notification(to: &str, subject: &str, body: String) -> Notification {
    Notification {
        to: to.to_owned(),
        subject: subject.to_owned(),
        body,
    }
}

fn outcome(status: VerificationState, message: &str, text: String) -> VerificationOutcome {
    VerificationOutcome {
        status,
        message: message.to_owned(),
        extracted_text: status.is_verified().then_some(text),
    }
}
