use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Outbound notification delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Delivers through an HTTP mail API accepting `{from, to, subject, text}`.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(url: String, api_key: Option<String>, from: String) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.url).json(&MailRequest {
            from: &self.from,
            to,
            subject,
            text: body,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        request.send().await?.error_for_status()?;
        info!(to, subject, "mail delivered");
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(to, subject, body, "mail delivery disabled, logging notification");
        Ok(())
    }
}
