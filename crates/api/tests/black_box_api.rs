use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use surplus_auth::{AccessClaims, Role};
use surplus_core::UserId;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = surplus_api::app::build_app(jwt_secret.to_string()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, user_id: UserId, role: Role) -> String {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user_id,
        role,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn create_listing(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    quantity: i64,
) -> serde_json::Value {
    let res = client
        .post(format!("{}/listings", base_url))
        .bearer_auth(token)
        .json(&json!({
            "title": "Evening surprise bag",
            "description": "Whatever is left at closing",
            "contents": "pastries, bread",
            "original_price": 10_000,
            "discount_price": 7_000,
            "quantity": quantity,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn deposit(client: &reqwest::Client, base_url: &str, token: &str, amount: u64) {
    let res = client
        .post(format!("{}/balance/deposit", base_url))
        .bearer_auth(token)
        .json(&json!({ "amount": amount }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

async fn balance(client: &reqwest::Client, base_url: &str, token: &str) -> i64 {
    let res = client
        .get(format!("{}/balance", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    body["balance"].as_i64().unwrap()
}

/// Poll the public browse endpoint until the listing's projected quantity
/// matches (the query path is intentionally eventual-consistent).
async fn browse_quantity_eventually(
    client: &reqwest::Client,
    base_url: &str,
    listing_id: &str,
    expected: i64,
) {
    for _ in 0..100 {
        let res = client
            .get(format!("{}/listings", base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        let found = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|l| l["id"] == listing_id)
            .map(|l| l["quantity"].as_i64().unwrap());
        if found == Some(expected) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("listing did not reach quantity {expected} in the projection within timeout");
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_is_derived_from_token() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let user_id = UserId::new();
    let token = mint_jwt(jwt_secret, user_id, Role::Store);

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user_id.to_string());
    assert_eq!(body["role"].as_str().unwrap(), "store");
}

#[tokio::test]
async fn browse_is_public_but_placement_is_role_gated() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    // Browsing requires no token.
    let res = client
        .get(format!("{}/listings", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // A store cannot place orders.
    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&store_token)
        .json(&json!({ "listing_id": UserId::new().to_string(), "quantity": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // A customer cannot create listings.
    let customer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);
    let res = client
        .post(format!("{}/listings", srv.base_url))
        .bearer_auth(&customer_token)
        .json(&json!({
            "title": "nope",
            "original_price": 2,
            "discount_price": 1,
            "quantity": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn placement_debits_buyer_and_decrements_stock() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 20_000).await;

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: serde_json::Value = res.json().await.unwrap();

    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_price"], 14_000);
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["listing"]["quantity"], 3);

    assert_eq!(balance(&client, &srv.base_url, &buyer_token).await, 6_000);
}

#[tokio::test]
async fn confirm_then_cancel_round_trips_stock_and_balance() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 20_000).await;

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: serde_json::Value = res.json().await.unwrap();
    let order_id = order["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/orders/confirm/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let confirmed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(confirmed["status"], "confirmed");

    let res = client
        .post(format!("{}/orders/cancel/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: serde_json::Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    assert_eq!(balance(&client, &srv.base_url, &buyer_token).await, 20_000);
    browse_quantity_eventually(&client, &srv.base_url, &listing_id, 5).await;
}

#[tokio::test]
async fn overdrawn_or_overstocked_placements_mutate_nothing() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 20_000).await;

    // Requesting more than the remaining stock reads as not-found.
    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 6 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Requesting more than the balance covers is a payment failure.
    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);

    // Neither attempt touched the balance or the stock.
    assert_eq!(balance(&client, &srv.base_url, &buyer_token).await, 20_000);
    browse_quantity_eventually(&client, &srv.base_url, &listing_id, 5).await;
}

#[tokio::test]
async fn complete_pays_the_seller_and_refund_reverses_it() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 20_000).await;

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: serde_json::Value = res.json().await.unwrap();
    let order_id = order["id"].as_str().unwrap().to_string();

    client
        .post(format!("{}/orders/confirm/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/orders/complete/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let completed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(completed["status"], "completed");

    assert_eq!(balance(&client, &srv.base_url, &store_token).await, 14_000);
    assert_eq!(balance(&client, &srv.base_url, &buyer_token).await, 6_000);

    // Refund: money is conserved, only reassigned.
    let buyer_before = balance(&client, &srv.base_url, &buyer_token).await;
    let seller_before = balance(&client, &srv.base_url, &store_token).await;

    let res = client
        .post(format!("{}/orders/refund/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let refunded: serde_json::Value = res.json().await.unwrap();
    assert_eq!(refunded["status"], "cancelled");

    let buyer_after = balance(&client, &srv.base_url, &buyer_token).await;
    let seller_after = balance(&client, &srv.base_url, &store_token).await;

    assert_eq!(buyer_before + seller_before, buyer_after + seller_after);
    assert_eq!(buyer_after, 20_000);
    assert_eq!(seller_after, 0);

    browse_quantity_eventually(&client, &srv.base_url, &listing_id, 5).await;
}

#[tokio::test]
async fn transitions_by_the_wrong_buyer_read_as_not_found() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);
    let other_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 20_000).await;

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 1 }))
        .send()
        .await
        .unwrap();
    let order: serde_json::Value = res.json().await.unwrap();
    let order_id = order["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/orders/confirm/{}", srv.base_url, order_id))
        .bearer_auth(&other_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Completing a pending order is also a filter miss.
    let res = client
        .post(format!("{}/orders/complete/{}", srv.base_url, order_id))
        .bearer_auth(&buyer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn repeat_placements_reuse_the_open_order() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    let buyer_token = mint_jwt(jwt_secret, UserId::new(), Role::Customer);

    let listing = create_listing(&client, &srv.base_url, &store_token, 5).await;
    let listing_id = listing["id"].as_str().unwrap().to_string();

    deposit(&client, &srv.base_url, &buyer_token, 50_000).await;

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 1 }))
        .send()
        .await
        .unwrap();
    let first: serde_json::Value = res.json().await.unwrap();
    let first_id = first["id"].as_str().unwrap().to_string();

    // The orders projection feeds the open-order lookup; wait for it.
    for _ in 0..100 {
        let res = client
            .get(format!("{}/orders", srv.base_url))
            .bearer_auth(&buyer_token)
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = res.json().await.unwrap();
        if !body["items"].as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .bearer_auth(&buyer_token)
        .json(&json!({ "listing_id": listing_id, "quantity": 2 }))
        .send()
        .await
        .unwrap();
    let second: serde_json::Value = res.json().await.unwrap();

    assert_eq!(second["id"].as_str().unwrap(), first_id);
    assert_eq!(second["items"].as_array().unwrap().len(), 2);
    assert_eq!(second["total_price"], 21_000);
    assert_eq!(balance(&client, &srv.base_url, &buyer_token).await, 29_000);
}

#[tokio::test]
async fn store_report_is_generated_in_the_background() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let store_token = mint_jwt(jwt_secret, UserId::new(), Role::Store);
    create_listing(&client, &srv.base_url, &store_token, 5).await;

    let res = client
        .post(format!("{}/store/reports", srv.base_url))
        .bearer_auth(&store_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    for _ in 0..200 {
        let res = client
            .get(format!("{}/store/reports/{}", srv.base_url, job_id))
            .bearer_auth(&store_token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"]["state"] == "completed" {
            assert!(body["result"]["total_listings"].as_u64().unwrap() >= 1);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("report job did not complete within timeout");
}
