#![allow(dead_code)]

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use pedalshare::{
    app::{App, Collaborators},
    cache::MemoryCache,
    config::Config,
    db::{Bike, Role, User, VerificationState},
    jobs::{LogMailer, QueueConfig},
    rooms::ChatSettings,
    store::{NewBike, NewUser, Store},
    verify::TextExtractor,
};
use reqwest::{StatusCode, header};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// HTTP client that carries the session cookie between requests.
pub struct Client {
    http: reqwest::Client,
    base: String,
    cookie: Option<String>,
}

impl Client {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.to_owned(),
            cookie: None,
        }
    }

    pub async fn send(&mut self, method: reqwest::Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = self.http.request(method, format!("{}{path}", self.base));
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        self.finish(request).await
    }

    /// Posts `bytes` as the multipart file field `field`.
    pub async fn upload(&mut self, path: &str, field: &str, file_name: &str, bytes: &'static [u8]) -> (StatusCode, Value) {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new().part(field.to_owned(), part);
        let mut request = self.http.post(format!("{}{path}", self.base)).multipart(form);
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.finish(request).await
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    async fn finish(&mut self, request: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let response = request.send().await.unwrap();
        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_owned());
        }

        let status = response.status();
        let text = response.text().await.unwrap();
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, body)
    }
}

/// Extractor that always reads the same text.
pub struct FixedText(pub &'static str);

#[async_trait]
impl TextExtractor for FixedText {
    async fn extract(&self, _image: &Path) -> anyhow::Result<String> {
        Ok(self.0.to_owned())
    }
}

pub fn config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_owned(),
        database_url: "sqlite::memory:".to_owned(),
        redis_url: None,
        upload_dir: std::env::temp_dir().join(format!("pedalshare-it-{}", Uuid::now_v7().simple())),
        mail_api_url: None,
        mail_api_key: None,
        mail_from: "test@localhost".to_owned(),
        ocr_command: "tesseract".to_owned(),
        ocr_timeout: Duration::from_secs(2),
        listing_ttl: Duration::from_secs(60),
        queue: QueueConfig {
            max_attempts: 3,
            job_timeout: Duration::from_secs(2),
            backoff_base: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
        },
        chat: ChatSettings {
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        },
        require_verified_to_rent: false,
    }
}

pub async fn app(ocr_text: &'static str) -> (App, Store) {
    let store = Store::in_memory().await.unwrap();
    let app = App::assemble(
        &config(),
        store.clone(),
        Collaborators {
            cache: Arc::new(MemoryCache::default()),
            extractor: Arc::new(FixedText(ocr_text)),
            mailer: Arc::new(LogMailer),
        },
    )
    .await
    .unwrap();
    (app, store)
}

/// Serves the app's router on an ephemeral port; returns its base URL.
pub async fn serve(app: &App) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = app.router();
    let server = tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    (base, server)
}

pub async fn user(store: &Store, name: &str, role: Role) -> User {
    store
        .create_user(NewUser {
            username: name,
            email: &format!("{name}@example.com"),
            password_hash: "unused",
            role,
        })
        .await
        .unwrap()
}

pub async fn verified_user(store: &Store, name: &str, role: Role) -> User {
    let user = user(store, name, role).await;
    store
        .record_user_verification(user.id, VerificationState::Unverified, VerificationState::Verified, "license.png")
        .await
        .unwrap();
    store.user(user.id).await.unwrap().unwrap()
}

pub async fn listed_bike(store: &Store, owner: &User, number: &str) -> Bike {
    let bike = store
        .create_bike(NewBike {
            owner_id: owner.id,
            name: "R15",
            bike_number: number,
            price_per_hour: 50.0,
        })
        .await
        .unwrap();
    store
        .record_bike_verification(bike.id, VerificationState::Unverified, VerificationState::Verified, "receipt.png")
        .await
        .unwrap();
    store.bike(bike.id).await.unwrap().unwrap()
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
