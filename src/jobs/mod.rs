mod mailer;
mod notifier;
mod queue;

use serde::{Deserialize, Serialize};

pub use mailer::{HttpMailer, LogMailer, Mailer};
pub use notifier::{NotificationHandler, Notifier};
pub use queue::{Job, JobHandler, JobQueue, JobStatus, QueueConfig, QueueStats};

/// Job kind for outbound notifications.
pub const NOTIFICATION: &str = "notification";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}
