mod common;

use common::Client;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn owner_and_renter_over_http() {
    let (app, _store) = common::app("").await;
    let (base, server) = common::serve(&app).await;

    let mut anonymous = Client::new(&base);
    let (status, body) = anonymous.send(reqwest::Method::GET, "/bikes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "availableBikes": [] }));

    let (status, body) = anonymous
        .send(reqwest::Method::POST, "/bikes/rent", Some(json!({ "bikeId": uuid::Uuid::now_v7() })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let mut owner = Client::new(&base);
    let (status, body) = owner
        .send(
            reqwest::Method::POST,
            "/auth/signup",
            Some(json!({ "username": "olga", "email": "olga@example.com", "password": "hunter22", "role": "owner" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["isVerified"], false);
    assert!(body.get("passwordHash").is_none());

    let draft = json!({ "name": "R15", "bikeNumber": "MH12", "pricePerHour": 50 });
    let (status, body) = owner.send(reqwest::Method::POST, "/bikes", Some(draft.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["bike"]["verificationStatus"], "unverified");
    assert_eq!(body["bike"]["available"], false);

    let (status, _) = owner.send(reqwest::Method::POST, "/bikes", Some(draft)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = owner.send(reqwest::Method::GET, "/bikes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bikes"].as_array().unwrap().len(), 1);

    let mut renter = Client::new(&base);
    let (status, _) = renter
        .send(
            reqwest::Method::POST,
            "/auth/signup",
            Some(json!({ "username": "rita", "email": "rita@example.com", "password": "hunter22", "role": "renter" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = renter.send(reqwest::Method::GET, "/bikes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "availableBikes": [], "rentedByMe": [] }));

    let (status, _) = renter.send(reqwest::Method::POST, "/auth/logout", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = renter
        .send(
            reqwest::Method::POST,
            "/auth/login",
            Some(json!({ "email": "rita@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    server.abort();
    app.shutdown().await;
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let (app, _store) = common::app("").await;
    let (base, server) = common::serve(&app).await;

    let mut owner = Client::new(&base);
    let (status, body) = owner
        .send(
            reqwest::Method::POST,
            "/auth/signup",
            Some(json!({ "username": "olga", "email": "olga@example.com", "role": "owner" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("password"));

    let (status, _) = owner
        .send(
            reqwest::Method::POST,
            "/auth/signup",
            Some(json!({ "username": "olga", "email": "olga@example.com", "password": "hunter22", "role": "owner" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = owner
        .send(reqwest::Method::POST, "/bikes", Some(json!({ "name": "R15", "pricePerHour": 50 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = owner.send(reqwest::Method::DELETE, "/bikes/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = owner.send(reqwest::Method::GET, "/chat/not-a-uuid/history", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    server.abort();
    app.shutdown().await;
}
