use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::{
    db::User,
    events::{Event, EventAction, EventHandler},
    store::Store,
};

use super::{Job, JobHandler, JobQueue, Mailer, Notification};

/// Runs `notification` jobs against the mail collaborator.
pub struct NotificationHandler {
    mailer: Arc<dyn Mailer>,
}

impl NotificationHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn run(&self, job: &Job) -> anyhow::Result<()> {
        let Notification { to, subject, body } = job.payload()?;
        self.mailer.deliver(&to, &subject, &body).await
    }
}

/// Turns lifecycle events into notification jobs.
pub struct Notifier {
    store: Store,
    jobs: JobQueue,
}

impl Notifier {
    pub fn new(store: Store, jobs: JobQueue) -> Self {
        Self { store, jobs }
    }

    async fn recipients(&self, event: &Event) -> anyhow::Result<Vec<User>> {
        let mut ids: Vec<Uuid> = Vec::new();
        match event.action {
            // the verification outcome job already covers these
            EventAction::Added | EventAction::Verified => {}
            EventAction::Rented => {
                if let Some(bike) = self.store.bike(event.item_id).await? {
                    ids.push(bike.owner_id);
                }
                ids.extend(event.actor_id);
            }
            EventAction::Returned => {
                if let Some(bike) = self.store.bike(event.item_id).await? {
                    ids.push(bike.owner_id);
                }
            }
            // the bike row is gone, the actor is its owner
            EventAction::Deleted => ids.extend(event.actor_id),
        }

        ids.dedup();
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.store.user(id).await? {
                users.push(user);
            }
        }
        Ok(users)
    }
}

fn subject(action: EventAction) -> &'static str {
    match action {
        EventAction::Added => "Bike listed",
        EventAction::Verified => "Bike verified",
        EventAction::Rented => "Bike rented",
        EventAction::Returned => "Bike returned",
        EventAction::Deleted => "Bike removed",
    }
}

#[async_trait]
impl EventHandler for Notifier {
    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let recipients = self.recipients(event).await?;
        if recipients.is_empty() {
            debug!(action = ?event.action, item_id = %event.item_id, "no one to notify");
            return Ok(());
        }

        for user in recipients {
            let job_id = self
                .jobs
                .notify(&Notification {
                    to: user.email.clone(),
                    subject: format!("{} - Bike Rental App", subject(event.action)),
                    body: format!("Hi {}, {}", user.username, event.message),
                })
                .await?;
            debug!(%job_id, action = ?event.action, to = %user.email, "notification job enqueued");
        }
        Ok(())
    }
}
