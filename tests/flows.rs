mod common;

use std::{sync::Arc, time::Duration};

use pedalshare::{
    AppError,
    bikes::BikeDraft,
    db::{ChatMessage, Role, VerificationState},
    rooms::Connection,
    upload::StoredDocument,
};
use tokio::sync::mpsc;

use common::{eventually, listed_bike, user, verified_user};

#[tokio::test]
async fn rented_event_posts_one_system_message_to_the_room() {
    let (app, store) = common::app("").await;
    let owner = user(&store, "olga", Role::Owner).await;
    let renter = user(&store, "rita", Role::Renter).await;
    let bike = listed_bike(&store, &owner, "MH12").await;

    let (tx, mut rx) = mpsc::channel::<Arc<ChatMessage>>(16);
    let conn = Arc::new(Connection::new(owner.id, tx));
    app.registry.register(conn.clone());
    app.registry.join(conn.id, bike.id);

    app.state.lifecycle.rent(&renter, bike.id).await.unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("system message broadcast")
        .unwrap();
    assert!(notice.system);
    assert_eq!(notice.sender_id, None);
    assert_eq!(notice.rental_id, bike.id);
    assert!(notice.body.contains("rita"));

    let history = app.state.chat.history(bike.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message.id, notice.id);
    assert_eq!(history[0].sender_name, None);

    // owner and renter are each notified once the worker drains the queue
    let jobs = app.jobs.clone();
    assert!(eventually(|| {
        let jobs = jobs.clone();
        async move { jobs.stats().await.unwrap().completed == 2 }
    })
    .await);

    assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    app.shutdown().await;
}

#[tokio::test]
async fn verified_bike_goes_live_and_is_announced() {
    let (app, store) = common::app("Receipt confirmed for OLGA paid fully.").await;
    let owner = user(&store, "olga", Role::Owner).await;

    let bike = app
        .state
        .lifecycle
        .add(
            &owner,
            BikeDraft {
                name: "Classic 350".to_owned(),
                bike_number: "KA01".to_owned(),
                price_per_hour: 80.0,
            },
        )
        .await
        .unwrap();
    assert!(app.state.lifecycle.available_bikes().await.unwrap().is_empty());

    let document = app.state.uploads.write(b"fake image", Some("png")).await.unwrap();
    let outcome = app
        .state
        .verifier
        .verify_bike(&owner, bike.id, document.clone())
        .await
        .unwrap();
    assert_eq!(outcome.status, VerificationState::Verified);

    let listed = app.state.lifecycle.available_bikes().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].ownership_document.as_deref(), Some(document.reference.as_str()));

    // `verified` lands in the chat; `added` does not add a second notice
    let chat = app.state.chat.clone();
    assert!(eventually(|| {
        let chat = chat.clone();
        async move { chat.history(bike.id).await.unwrap().len() == 1 }
    })
    .await);

    // exactly one outcome notification, nothing from the events
    let jobs = app.jobs.clone();
    assert!(eventually(|| {
        let jobs = jobs.clone();
        async move { jobs.stats().await.unwrap().completed == 1 }
    })
    .await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = app.jobs.stats().await.unwrap();
    assert_eq!(stats.completed + stats.queued + stats.running + stats.failed, 1);

    document.discard().await;
    app.shutdown().await;
}

#[tokio::test]
async fn unmatched_document_leaves_the_bike_unlisted() {
    let (app, store) = common::app("Random grocery list: apples, bananas.").await;
    let owner = user(&store, "olga", Role::Owner).await;
    let bike = app
        .state
        .lifecycle
        .add(
            &owner,
            BikeDraft {
                name: "R15".to_owned(),
                bike_number: "MH12".to_owned(),
                price_per_hour: 50.0,
            },
        )
        .await
        .unwrap();

    let document = StoredDocument {
        path: std::env::temp_dir().join("pedalshare-missing.png"),
        reference: "pedalshare-missing.png".to_owned(),
    };
    let outcome = app.state.verifier.verify_bike(&owner, bike.id, document).await.unwrap();
    assert_eq!(outcome.status, VerificationState::Pending);

    let bike = store.bike(bike.id).await.unwrap().unwrap();
    assert!(!bike.available);
    assert!(app.state.lifecycle.available_bikes().await.unwrap().is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn many_renters_one_bike() {
    let (app, store) = common::app("").await;
    let owner = user(&store, "olga", Role::Owner).await;
    let bike = listed_bike(&store, &owner, "MH12").await;

    let mut renters = Vec::new();
    for i in 0..8 {
        renters.push(user(&store, &format!("renter{i}"), Role::Renter).await);
    }

    let attempts = renters.iter().map(|renter| {
        let lifecycle = app.state.lifecycle.clone();
        let renter = renter.clone();
        tokio::spawn(async move { lifecycle.rent(&renter, bike.id).await })
    });
    let mut won = 0;
    let mut conflicts = 0;
    for attempt in attempts.collect::<Vec<_>>() {
        match attempt.await.unwrap() {
            Ok(_) => won += 1,
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!((won, conflicts), (1, 7));

    let bike = store.bike(bike.id).await.unwrap().unwrap();
    assert!(!bike.available && bike.rented_by.is_some());
    app.shutdown().await;
}

#[tokio::test]
async fn cached_listing_never_outlives_a_mutation() {
    let (app, store) = common::app("").await;
    let owner = user(&store, "olga", Role::Owner).await;
    let renter = verified_user(&store, "rita", Role::Renter).await;
    let first = listed_bike(&store, &owner, "MH12").await;
    let second = listed_bike(&store, &owner, "MH13").await;
    let lifecycle = &app.state.lifecycle;

    assert_eq!(lifecycle.available_bikes().await.unwrap().len(), 2);

    lifecycle.rent(&renter, first.id).await.unwrap();
    let ids: Vec<_> = lifecycle.available_bikes().await.unwrap().iter().map(|b| b.id).collect();
    assert_eq!(ids, [second.id]);

    lifecycle.delete(&owner, second.id).await.unwrap();
    assert!(lifecycle.available_bikes().await.unwrap().is_empty());

    lifecycle.return_bike(&renter, first.id).await.unwrap();
    let ids: Vec<_> = lifecycle.available_bikes().await.unwrap().iter().map(|b| b.id).collect();
    assert_eq!(ids, [first.id]);

    app.shutdown().await;
}
