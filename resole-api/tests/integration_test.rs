use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use resole_api::middleware::mint_token;
use resole_api::{app, AppState, AuthConfig, Backends};
use resole_catalog::{GenderTag, ServiceOffering};
use resole_core::{AccountRepository, PartnerDirectory};
use resole_order::{CheckoutUrls, PollSchedule, RetryPolicy};
use resole_shared::{Account, GeoPoint, PartnerStatus, PlatformSettings, Role};
use resole_store::gateways::{MockPaymentProcessor, RecordingNotifier, StaticGeocoder};
use resole_store::{
    InMemoryAccountRepository, InMemoryOrderRepository, InMemoryServiceCatalog,
    InMemorySettingsRepository,
};

const SECRET: &str = "integration-secret";
const DELIVERY_ADDRESS: &str = "Seefeldstrasse 10, Zurich";
const WORKSHOP_ADDRESS: &str = "Langstrasse 1, Zurich";

struct TestApp {
    router: Router,
    accounts: Arc<InMemoryAccountRepository>,
    processor: Arc<MockPaymentProcessor>,
    notifier: Arc<RecordingNotifier>,
    offering: ServiceOffering,
}

impl TestApp {
    fn new() -> Self {
        let offering = ServiceOffering {
            id: Uuid::new_v4(),
            name: "Full resole".into(),
            price: 4000,
            estimated_duration_hours: 72,
            category: "soles".into(),
            gender: GenderTag::Unisex,
            is_active: true,
        };

        let accounts = Arc::new(InMemoryAccountRepository::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let geocoder = StaticGeocoder::new()
            .with(DELIVERY_ADDRESS, GeoPoint::new(2.01, 3.01))
            .with(WORKSHOP_ADDRESS, GeoPoint::new(2.0, 3.0));

        let backends = Backends {
            orders: Arc::new(InMemoryOrderRepository::new()),
            accounts: accounts.clone(),
            partners: accounts.clone(),
            settings: Arc::new(InMemorySettingsRepository::new(PlatformSettings::default())),
            catalog: Arc::new(InMemoryServiceCatalog::new(vec![offering.clone()])),
            geocoder: Arc::new(geocoder),
            processor: processor.clone(),
            notifier: notifier.clone(),
        };

        let state = AppState::new(
            backends,
            RetryPolicy::new(1, Duration::from_millis(1)),
            CheckoutUrls {
                success_url: "https://app.test/success?order={order_id}".into(),
                cancel_url: "https://app.test/cancel?order={order_id}".into(),
            },
            AuthConfig { secret: SECRET.into(), expiration: 3600 },
        )
        .with_poll_schedule(PollSchedule::new(5, Duration::from_secs(2)));

        Self { router: app(state), accounts, processor, notifier, offering }
    }

    async fn account(&self, role: Role, email: &str) -> (Account, String) {
        let account = Account::new(role, email.into(), email.into());
        self.accounts.create(&account).await.unwrap();
        let token = mint_token(SECRET, account.id, email, role, 3600).unwrap();
        (account, token)
    }

    async fn approved_partner(&self, email: &str) -> (Account, String) {
        let (partner, token) = self.account(Role::Partner, email).await;
        self.accounts
            .update_location(partner.id, WORKSHOP_ADDRESS, GeoPoint::new(2.0, 3.0))
            .await
            .unwrap();
        let partner = self.accounts.set_status(partner.id, PartnerStatus::Approved).await.unwrap();
        (partner, token)
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn place_order(&self, token: &str, address: &str) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/orders",
                Some(token),
                Some(json!({
                    "service_id": self.offering.id,
                    "delivery_option": "standard",
                    "delivery_address": address,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_order_requires_authentication() {
    let app = TestApp::new();
    let (status, _) = app
        .send(
            Method::POST,
            "/orders",
            None,
            Some(json!({ "service_id": app.offering.id, "delivery_address": DELIVERY_ADDRESS })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(Method::GET, "/orders", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_checkout_pay_and_fulfil() {
    let app = TestApp::new();
    let (partner, partner_token) = app.approved_partner("partner@example.com").await;
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;

    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order = &receipt["order"];
    assert_eq!(order["service_subtotal"], 4000);
    assert_eq!(order["delivery_price"], 500);
    assert_eq!(order["total_amount"], 4500);
    assert_eq!(order["commission"], 600);
    assert_eq!(order["status"], "accepted");
    assert_eq!(order["cobbler_id"], json!(partner.id));
    assert_eq!(receipt["assignment"]["assignment"], "assigned");
    let order_id = order["id"].as_str().unwrap().to_string();

    // Work cannot start before payment.
    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/orders/{}/status?status=in_progress", order_id),
            Some(&partner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    assert_eq!(session["amount"], 4500);
    let session_id = session["session_id"].as_str().unwrap().to_string();

    let (status, poll) = app
        .send(Method::GET, &format!("/payments/checkout-status/{}?attempt=1", session_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["state"], "pending");
    assert_eq!(poll["retry_after_ms"], 2000);

    assert!(app.processor.complete(&session_id).await);

    let (status, _) = app
        .send(
            Method::POST,
            "/payments/webhook",
            None,
            Some(json!({ "type": "checkout.session.completed", "data": { "session_id": session_id } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, poll) = app
        .send(Method::GET, &format!("/payments/checkout-status/{}?attempt=2", session_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["state"], "paid");
    assert_eq!(poll["commission"], 600);

    let confirmations = app
        .notifier
        .kinds()
        .await
        .into_iter()
        .filter(|k| *k == "payment_confirmed")
        .count();
    assert_eq!(confirmations, 1);

    let (status, _) = app
        .send(Method::POST, &format!("/orders/{}/confirm", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for target in ["in_progress", "shipped", "delivered"] {
        let (status, body) = app
            .send(
                Method::PATCH,
                &format!("/orders/{}/status?status={}", order_id, target),
                Some(&partner_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["order"]["status"], target);
        assert_eq!(body["changed"], true);
    }

    let (status, body) = app
        .send(
            Method::PATCH,
            &format!("/orders/{}/status?status=delivered", order_id),
            Some(&partner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_partner_payout_account_splits_payment() {
    let app = TestApp::new();
    let (partner, partner_token) = app.approved_partner("partner@example.com").await;
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;

    let (status, _) = app
        .send(Method::POST, "/cobbler/payout-account", Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, connected) = app
        .send(Method::POST, "/cobbler/payout-account", Some(&partner_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", connected);
    assert_eq!(connected["created"], true);
    assert_eq!(connected["partner_id"], json!(partner.id));
    let payout_account = connected["payout_account"].as_str().unwrap().to_string();

    let (status, again) = app
        .send(Method::POST, "/cobbler/payout-account", Some(&partner_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["created"], false);
    assert_eq!(again["payout_account"], payout_account.as_str());

    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();
    let (status, session) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);

    let request = app
        .processor
        .request_for(session["session_id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(request.destination.as_deref(), Some(payout_account.as_str()));
    assert_eq!(request.application_fee, 600);
}

#[tokio::test]
async fn test_superseded_session_payment_is_not_lost() {
    let app = TestApp::new();
    app.approved_partner("partner@example.com").await;
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let mut sessions = Vec::new();
    for _ in 0..2 {
        let (status, session) = app
            .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        sessions.push(session["session_id"].as_str().unwrap().to_string());
    }

    assert!(app.processor.complete(&sessions[0]).await);
    let event = json!({
        "type": "checkout.session.completed",
        "data": { "session_id": sessions[0] }
    });
    let (status, _) = app
        .send(Method::POST, "/payments/webhook", None, Some(event))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, order) = app
        .send(Method::GET, &format!("/orders/{}", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["payment_status"], "paid");
    assert_eq!(order["settlement"]["source"], "processor_callback");
}

#[tokio::test]
async fn test_foreign_partner_cannot_touch_order() {
    let app = TestApp::new();
    app.approved_partner("assigned@example.com").await;
    let (_, stranger_token) = app.account(Role::Partner, "stranger@example.com").await;
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let (_, admin_token) = app.account(Role::Admin, "admin@example.com").await;

    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    app.send(Method::POST, &format!("/orders/{}/confirm", order_id), Some(&admin_token), None)
        .await;

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/orders/{}/status?status=in_progress", order_id),
            Some(&stranger_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::GET, &format!("/orders/{}", order_id), Some(&stranger_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.send(Method::GET, "/orders", Some(&stranger_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/orders/{}/status?status=teleported", order_id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unassigned_order_and_manual_accept() {
    let app = TestApp::new();
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let (_, admin_token) = app.account(Role::Admin, "admin@example.com").await;

    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    assert_eq!(receipt["order"]["status"], "pending");
    assert_eq!(receipt["assignment"]["assignment"], "unassigned");
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(Method::POST, &format!("/orders/{}/accept", order_id), Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], true);

    let (partner, _) = app.approved_partner("late@example.com").await;

    let (status, report) = app
        .send(Method::POST, "/admin/assignments/sweep", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["assigned"], 1);

    let (_, order) = app
        .send(Method::GET, &format!("/orders/{}", order_id), Some(&client_token), None)
        .await;
    assert_eq!(order["status"], "accepted");
    assert_eq!(order["cobbler_id"], json!(partner.id));

    let (status, _) = app
        .send(Method::POST, "/admin/assignments/sweep", Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_guest_checkout_and_payment_by_reference() {
    let app = TestApp::new();
    app.approved_partner("partner@example.com").await;

    let (status, receipt) = app
        .send(
            Method::POST,
            "/orders/guest",
            None,
            Some(json!({
                "items": [{ "service_id": app.offering.id, "quantity": 2 }],
                "delivery_option": "express",
                "delivery_address": DELIVERY_ADDRESS,
                "guest_name": "Guest Walker",
                "guest_email": "guest@example.com",
                "guest_phone": "+41 79 000 00 00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", receipt);
    assert_eq!(receipt["order"]["service_subtotal"], 8000);
    assert_eq!(receipt["order"]["delivery_price"], 1500);
    assert_eq!(receipt["order"]["total_amount"], 9500);
    assert_eq!(receipt["order"]["commission"], 1200);
    assert_eq!(receipt["delivery_hours"], 72);

    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();
    let reference = receipt["order"]["reference_number"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            Method::POST,
            "/payments/create-checkout-session",
            None,
            Some(json!({ "order_id": order_id, "reference_number": "REF-00000000" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, session) = app
        .send(
            Method::POST,
            "/payments/create-checkout-session",
            None,
            Some(json!({ "order_id": order_id, "reference_number": reference })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    assert_eq!(session["amount"], 9500);
}

#[tokio::test]
async fn test_guest_with_existing_account_must_sign_in() {
    let app = TestApp::new();
    app.account(Role::Client, "taken@example.com").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/orders/guest",
            None,
            Some(json!({
                "items": [{ "service_id": app.offering.id }],
                "delivery_address": DELIVERY_ADDRESS,
                "guest_name": "Guest",
                "guest_email": "Taken@example.com",
                "guest_phone": "+41 79 000 00 00",
                "create_account": true,
                "password": "hunter22",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sign in"));
}

#[tokio::test]
async fn test_poll_budget_ends_in_verify_by_email() {
    let app = TestApp::new();
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let (_, session) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    let session_id = session["session_id"].as_str().unwrap().to_string();

    let (status, poll) = app
        .send(Method::GET, &format!("/payments/checkout-status/{}?attempt=5", session_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(poll["state"], "verify_by_email");
    assert_eq!(poll["payment_status"], "pending");
    assert!(app.notifier.kinds().await.contains(&"payment_verification_pending"));
}

#[tokio::test]
async fn test_expired_session_reports_gone() {
    let app = TestApp::new();
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    let (_, session) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert!(app.processor.expire(&session_id).await);

    let (status, _) = app
        .send(Method::GET, &format!("/payments/checkout-status/{}", session_id), None, None)
        .await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_processor_outage_keeps_order_payable() {
    let app = TestApp::new();
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let receipt = app.place_order(&client_token, DELIVERY_ADDRESS).await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

    app.processor.set_unavailable(true);
    let (status, _) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    app.processor.set_unavailable(false);
    let (status, _) = app
        .send(Method::POST, &format!("/orders/{}/payment", order_id), Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_settings_admin_only_and_versioned() {
    let app = TestApp::new();
    let (_, client_token) = app.account(Role::Client, "client@example.com").await;
    let (_, admin_token) = app.account(Role::Admin, "admin@example.com").await;

    let (status, settings) = app.send(Method::GET, "/settings", Some(&client_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["commission_rate_bps"], 1500);
    let version = settings["version"].as_u64().unwrap();

    let mut next = settings.clone();
    next["commission_rate_bps"] = json!(2000);

    let (status, _) = app
        .send(Method::PUT, "/settings", Some(&client_token), Some(next.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, stored) = app.send(Method::PUT, "/settings", Some(&admin_token), Some(next)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["commission_rate_bps"], 2000);
    assert!(stored["version"].as_u64().unwrap() > version);

    let mut invalid = stored.clone();
    invalid["commission_rate_bps"] = json!(20_000);
    let (status, _) = app.send(Method::PUT, "/settings", Some(&admin_token), Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_partner_address_refresh_and_approval() {
    let app = TestApp::new();
    let (partner, partner_token) = app.account(Role::Partner, "new@example.com").await;
    let (_, admin_token) = app.account(Role::Admin, "admin@example.com").await;

    let (status, _) = app
        .send(
            Method::PUT,
            "/cobbler/address",
            Some(&partner_token),
            Some(json!({ "address": "Unknown Road 9" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(app.accounts.get(partner.id).await.unwrap().unwrap().location.is_none());

    let (status, body) = app
        .send(
            Method::PUT,
            "/cobbler/address",
            Some(&partner_token),
            Some(json!({ "address": WORKSHOP_ADDRESS })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location"]["lat"], 2.0);
    assert!(body.get("password_hash").is_none());

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/admin/partners/{}/approve", partner.id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["partner"]["status"], "approved");

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/admin/partners/{}/reject", partner.id),
            Some(&partner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
