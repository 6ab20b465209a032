use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::{info, warn};

use crate::{
    AppState, auth, bikes,
    bikes::Lifecycle,
    cache::{CacheBackend, ListingCache},
    config::Config,
    events::{BIKE_EVENTS, EventBus, EventSink},
    jobs::{JobQueue, Mailer, NOTIFICATION, NotificationHandler, Notifier},
    rooms::{self, ChatBridge, ChatCoordinator, RoomRegistry},
    store::Store,
    upload::UploadDir,
    verify::{TextExtractor, Verifier},
};

/// The pluggable outside world.
pub struct Collaborators {
    pub cache: Arc<dyn CacheBackend>,
    pub extractor: Arc<dyn TextExtractor>,
    pub mailer: Arc<dyn Mailer>,
}

/// A wired service: shared state plus the background tasks serving it.
pub struct App {
    pub state: AppState,
    pub bus: EventBus,
    pub jobs: JobQueue,
    pub registry: RoomRegistry,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Builds the state and starts the event subscribers, job worker and room reaper.
    pub async fn assemble(config: &Config, store: Store, collaborators: Collaborators) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();

        let uploads = UploadDir::new(config.upload_dir.clone());
        uploads.ensure_root().await?;

        let cache = ListingCache::new(collaborators.cache, config.listing_ttl);
        let bus = EventBus::new(shutdown.child_token());
        let events: Arc<dyn EventSink> = Arc::new(bus.clone());

        let jobs = JobQueue::new(store.pool().clone(), config.queue.clone());
        jobs.register(NOTIFICATION, Arc::new(NotificationHandler::new(collaborators.mailer)));

        let registry = RoomRegistry::new();
        let chat = ChatCoordinator::new(store.clone(), registry.clone());

        let tasks = vec![
            bus.subscribe(BIKE_EVENTS, Arc::new(ChatBridge::new(chat.clone()))),
            bus.subscribe(BIKE_EVENTS, Arc::new(Notifier::new(store.clone(), jobs.clone()))),
            jobs.spawn_worker(shutdown.child_token()),
            registry.spawn_reaper(config.chat.ping_interval, config.chat.idle_timeout, shutdown.child_token()),
        ];

        let state = AppState {
            lifecycle: Lifecycle::new(
                store.clone(),
                cache.clone(),
                events.clone(),
                config.require_verified_to_rent,
            ),
            verifier: Verifier::new(
                store.clone(),
                collaborators.extractor,
                jobs.clone(),
                events,
                cache,
                config.ocr_timeout,
            ),
            store,
            chat,
            uploads,
            chat_settings: config.chat,
        };

        info!(subscribers = bus.subscriber_count(BIKE_EVENTS), "service assembled");
        Ok(Self {
            state,
            bus,
            jobs,
            registry,
            shutdown,
            tasks,
        })
    }

    pub fn router(&self) -> Router {
        let session_layer = SessionManagerLayer::new(MemoryStore::default())
            .with_secure(false)
            .with_same_site(SameSite::Lax)
            .with_expiry(Expiry::OnInactivity(time::Duration::hours(12)));

        Router::new()
            .nest("/auth", auth::router())
            .nest("/bikes", bikes::router())
            .nest("/chat", rooms::router())
            .with_state(self.state.clone())
            .layer(session_layer)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Stops background work and closes every chat connection.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.registry.drain();

        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("service stopped");
    }
}
