//! API handlers driven through the full router.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use cilab_edge::services::payments::sign_hex;
use cilab_edge::services::{ContentGenerator, DataStore, GeneratedPost, Role, ServiceError};
use common::{
    delete, get, json_body, location, patch, post, set_cookie, test_config, TestApp, KEY_SECRET,
    WEBHOOK_SECRET,
};

async fn post_ok(app: &TestApp, path: &str, body: Value) -> (StatusCode, Value) {
    let token = app.csrf_token().await;
    let response = app.send(post(path).csrf(&token).json(body)).await;
    let status = response.status();
    (status, json_body(response).await)
}

async fn post_as(app: &TestApp, sid: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let token = app.csrf_token().await;
    let response = app.send(post(path).csrf(&token).session(sid).json(body)).await;
    let status = response.status();
    (status, json_body(response).await)
}

async fn get_as(app: &TestApp, sid: &str, path: &str) -> (StatusCode, Value) {
    let response = app.send(get(path).session(sid).build()).await;
    let status = response.status();
    (status, json_body(response).await)
}

async fn patch_as(app: &TestApp, sid: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let token = app.csrf_token().await;
    let response = app.send(patch(path).csrf(&token).session(sid).json(body)).await;
    let status = response.status();
    (status, json_body(response).await)
}

// --- contact ---------------------------------------------------------------

#[tokio::test]
async fn test_contact_validation_lists_every_error() {
    let app = TestApp::new();
    let (status, body) = post_ok(
        &app,
        "/api/contact",
        json!({ "name": "A", "email": "not-an-email", "message": "short" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    assert_eq!(body["error"]["message"], json!("Name must be at least 2 characters"));
    assert_eq!(body["error"]["details"]["errors"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_contact_stores_sanitized_and_notifies() {
    let app = TestApp::new();
    let (status, body) = post_ok(
        &app,
        "/api/contact",
        json!({
            "name": "Ada <b>Lovelace</b>",
            "email": " ADA@Example.com ",
            "subject": "Partnership",
            "message": "We would like to collaborate on a study.",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("Thank you for your message! We'll get back to you soon."));

    let stored = app
        .store
        .find_one("contact_submissions", "email", &json!("ada@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["name"], json!("Ada &lt;b&gt;Lovelace&lt;&#x2F;b&gt;"));
    assert_eq!(stored["status"], json!("new"));

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, "admin@culturalinnovationlab.org");
    assert_eq!(sent[0].reply_to.as_deref(), Some("ada@example.com"));
    assert_eq!(sent[1].to, "ada@example.com");
}

#[tokio::test]
async fn test_contact_admin_mail_failure_is_500() {
    let app = TestApp::new();
    app.mailer.fail_for("admin@culturalinnovationlab.org");

    let (status, body) = post_ok(
        &app,
        "/api/contact",
        json!({ "name": "Ada", "email": "ada@example.com", "message": "A long enough message." }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], json!("INTERNAL_ERROR"));
    // Saved before the mail went out.
    assert_eq!(app.store.count("contact_submissions"), 1);
}

#[tokio::test]
async fn test_contact_confirmation_failure_is_ignored() {
    let app = TestApp::new();
    app.mailer.fail_for("ada@example.com");

    let (status, _) = post_ok(
        &app,
        "/api/contact",
        json!({ "name": "Ada", "email": "ada@example.com", "message": "A long enough message." }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();
    let token = app.csrf_token().await;
    let response = app
        .send(post("/api/contact").csrf(&token).raw("{not json"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], json!("BAD_REQUEST"));
}

// --- newsletter / waitlist -------------------------------------------------

#[tokio::test]
async fn test_newsletter_subscribe_then_already_subscribed() {
    let app = TestApp::new();
    let (status, body) = post_ok(&app, "/api/newsletter", json!({ "email": "reader@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        json!("Thank you for subscribing! Check your inbox for a welcome email.")
    );
    assert_eq!(app.mailer.sent().len(), 1);

    let (status, body) = post_ok(&app, "/api/newsletter", json!({ "email": "Reader@Example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alreadySubscribed"], json!(true));
    assert_eq!(app.store.count("newsletter_subscribers"), 1);
}

#[tokio::test]
async fn test_newsletter_resubscribes() {
    let app = TestApp::new();
    app.store
        .insert(
            "newsletter_subscribers",
            json!({ "email": "gone@example.com", "subscribed": false }),
        )
        .await
        .unwrap();

    let (status, body) = post_ok(&app, "/api/newsletter", json!({ "email": "gone@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        json!("Welcome back! You've been resubscribed to our newsletter.")
    );

    let record = app
        .store
        .find_one("newsletter_subscribers", "email", &json!("gone@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record["subscribed"], json!(true));
}

#[tokio::test]
async fn test_newsletter_store_down_is_database_error() {
    let app = TestApp::new();
    app.store.set_available(false);
    let (status, body) = post_ok(&app, "/api/newsletter", json!({ "email": "reader@example.com" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], json!("DATABASE_ERROR"));
    assert_eq!(body["error"]["message"], json!("Failed to subscribe"));
}

#[tokio::test]
async fn test_waitlist_duplicate_and_own_limit_message() {
    let app = TestApp::new();
    let signup = json!({ "email": "early@example.com", "organization": "Museum of Things" });

    let (status, body) = post_ok(&app, "/api/waitlist", signup.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        json!("You're on the list! We'll notify you when the platform launches.")
    );

    let (_, body) = post_ok(&app, "/api/waitlist", signup.clone()).await;
    assert_eq!(body["data"]["alreadyOnList"], json!(true));

    let (_, _) = post_ok(&app, "/api/waitlist", signup.clone()).await;
    let (status, body) = post_ok(&app, "/api/waitlist", signup).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], json!("Too many signup attempts. Please try again later."));
}

// --- auth ------------------------------------------------------------------

#[tokio::test]
async fn test_login_success_sets_session_and_sanitizes_redirect() {
    let app = TestApp::new();
    let user = app.identity.add_user("ada@example.com", "password-123", Role::User);
    let token = app.csrf_token().await;

    let response = app
        .send(post("/api/auth/login").csrf(&token).json(json!({
            "email": "ada@example.com",
            "password": "password-123",
            "redirectTo": "https://evil.example/phish",
        })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "cilab_session").is_some());

    let body = json_body(response).await;
    assert_eq!(body["message"], json!("Login successful"));
    assert_eq!(body["data"]["user"]["id"], json!(user.id.to_string()));
    assert_eq!(body["data"]["redirectTo"], json!("/dashboard"));
}

#[tokio::test]
async fn test_login_failure_is_generic() {
    let app = TestApp::new();
    app.identity.add_user("ada@example.com", "password-123", Role::User);

    let (status, body) = post_ok(
        &app,
        "/api/auth/login",
        json!({ "email": "ada@example.com", "password": "wrong-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], json!("Invalid email or password"));

    let (status, body) = post_ok(
        &app,
        "/api/auth/login",
        json!({ "email": "ada@example.com", "password": "123" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], json!("Password must be at least 6 characters"));
}

#[tokio::test]
async fn test_signup_and_conflict() {
    let app = TestApp::new();
    let form = json!({
        "email": "new@example.com",
        "password": "password-123",
        "fullName": "New Member",
        "role": "researcher",
        "redirectTo": "/tools/canvas",
    });

    let (status, body) = post_ok(&app, "/api/auth/signup", form.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["requiresEmailConfirmation"], json!(false));
    assert_eq!(body["data"]["redirectTo"], json!("/tools/canvas"));
    assert_eq!(app.identity.profile("new@example.com").unwrap()["full_name"], json!("New Member"));

    let (status, body) = post_ok(&app, "/api/auth/signup", form).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], json!("An account with this email already exists"));

    let (status, body) = post_ok(
        &app,
        "/api/auth/signup",
        json!({ "email": "x@example.com", "password": "password-123", "fullName": "X", "role": "wizard" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], json!("Invalid role"));
}

#[tokio::test]
async fn test_forgot_password_never_reveals_accounts() {
    let app = TestApp::new();
    app.identity.add_user("ada@example.com", "password-123", Role::User);

    let (_, known) = post_ok(&app, "/api/auth/forgot-password", json!({ "email": "ada@example.com" })).await;
    let (_, unknown) = post_ok(&app, "/api/auth/forgot-password", json!({ "email": "ghost@example.com" })).await;
    assert_eq!(known["message"], unknown["message"]);
    assert_eq!(app.identity.reset_requests("ada@example.com"), 1);

    for _ in 0..3 {
        post_ok(&app, "/api/auth/forgot-password", json!({ "email": "ada@example.com" })).await;
    }
    let (status, body) = post_ok(&app, "/api/auth/forgot-password", json!({ "email": "ada@example.com" })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body["error"],
        json!("Too many password reset attempts. Please try again in 15 minutes.")
    );
}

#[tokio::test]
async fn test_callback_exchanges_code() {
    let app = TestApp::new();
    app.identity.add_user("ada@example.com", "password-123", Role::User);
    let code = app.identity.issue_code("ada@example.com").unwrap();

    let response = app
        .send(get(&format!("/auth/callback?code={code}&redirectTo=%2Fpricing")).build())
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/pricing");
    assert!(set_cookie(&response, "cilab_session").is_some());

    // Codes are single use.
    let response = app
        .send(get(&format!("/auth/callback?code={code}")).build())
        .await;
    assert!(location(&response).starts_with("/auth/login?error=Authentication+failed"));
}

#[tokio::test]
async fn test_callback_maps_provider_errors() {
    let app = TestApp::new();
    let response = app
        .send(
            get("/auth/callback?error=access_denied&error_description=%3Cscript%3E&redirectTo=%2F%2Fevil.example")
                .build(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let target = location(&response);
    assert!(target.starts_with("/auth/login?"));
    assert!(target.contains("You+cancelled+the+sign-in+process"));
    assert!(target.ends_with("redirectTo=%2Fdashboard"));
    assert!(!target.contains("script"));
}

// --- payments --------------------------------------------------------------

#[tokio::test]
async fn test_create_order_requires_login_and_valid_pack() {
    let app = TestApp::new();
    let (status, _) = post_ok(&app, "/api/razorpay/create-order", json!({ "packId": "pack_5" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (user, sid) = app.sign_in_as("buyer@example.com", Role::User);
    let (status, body) = post_as(&app, &sid, "/api/razorpay/create-order", json!({ "packId": "pack_7" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("INVALID_PACK"));

    let (status, body) = post_as(
        &app,
        &sid,
        "/api/razorpay/create-order",
        json!({ "packId": "pack_15", "currency": "USD" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount"], json!(4_900));
    assert_eq!(body["data"]["currency"], json!("USD"));
    assert_eq!(body["data"]["keyId"], json!("rzp_test_key"));
    assert_eq!(body["data"]["pack"]["credits"], json!(15));

    let order_id = body["data"]["orderId"].as_str().unwrap();
    let notes = app.gateway.order_notes(order_id).unwrap();
    assert_eq!(notes["userId"], json!(user.id.to_string()));
    assert_eq!(notes["credits"], json!("15"));
}

fn checkout_signature(order_id: &str, payment_id: &str) -> String {
    sign_hex(KEY_SECRET.as_bytes(), format!("{order_id}|{payment_id}").as_bytes()).unwrap()
}

#[tokio::test]
async fn test_verify_credits_once() {
    let app = TestApp::new();
    let (user, sid) = app.sign_in_as("buyer@example.com", Role::User);
    let verify = json!({
        "razorpay_order_id": "order_1",
        "razorpay_payment_id": "pay_1",
        "razorpay_signature": checkout_signature("order_1", "pay_1"),
        "packId": "pack_5",
        "credits": 5,
    });

    let (status, body) = post_as(&app, &sid, "/api/razorpay/verify", verify.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Successfully added 5 credits to your account"));
    assert_eq!(app.store.balance(user.id), 5);

    let (status, body) = post_as(&app, &sid, "/api/razorpay/verify", verify).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alreadyProcessed"], json!(true));
    assert_eq!(app.store.balance(user.id), 5);
    assert_eq!(app.store.count("payment_orders"), 1);
}

#[tokio::test]
async fn test_verify_rejects_bad_signature_and_inflated_credits() {
    let app = TestApp::new();
    let (user, sid) = app.sign_in_as("buyer@example.com", Role::User);

    let (status, body) = post_as(
        &app,
        &sid,
        "/api/razorpay/verify",
        json!({
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": checkout_signature("order_1", "pay_2"),
            "packId": "pack_5",
            "credits": 5,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("PAYMENT_VERIFICATION_FAILED"));

    let (status, body) = post_as(
        &app,
        &sid,
        "/api/razorpay/verify",
        json!({
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": checkout_signature("order_1", "pay_1"),
            "packId": "pack_5",
            "credits": 500,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], json!("Invalid credit amount"));
    assert_eq!(app.store.balance(user.id), 0);
}

#[tokio::test]
async fn test_refund_is_admin_only_and_single_shot() {
    let app = TestApp::new();
    let (_, buyer) = app.sign_in_as("buyer@example.com", Role::User);
    let (_, admin) = app.sign_in_as("admin@example.com", Role::Admin);

    post_as(
        &app,
        &buyer,
        "/api/razorpay/verify",
        json!({
            "razorpay_order_id": "order_9",
            "razorpay_payment_id": "pay_9",
            "razorpay_signature": checkout_signature("order_9", "pay_9"),
            "packId": "pack_50",
            "credits": 50,
        }),
    )
    .await;

    let (status, _) = post_as(&app, &buyer, "/api/razorpay/refund", json!({ "paymentId": "pay_9" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_as(&app, &admin, "/api/razorpay/refund", json!({ "paymentId": "pay_404" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_as(
        &app,
        &admin,
        "/api/razorpay/refund",
        json!({ "paymentId": "pay_9", "reason": "Requested by customer" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paymentId"], json!("pay_9"));
    assert_eq!(body["data"]["status"], json!("processed"));
    assert_eq!(app.gateway.refund_count(), 1);

    let (status, body) = post_as(&app, &admin, "/api/razorpay/refund", json!({ "paymentId": "pay_9" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], json!("Payment has already been refunded"));
}

fn captured_event(payment_id: &str, user_id: &str, credits: &str) -> String {
    json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": payment_id,
            "order_id": "order_w",
            "notes": { "userId": user_id, "credits": credits, "packId": "pack_15" },
        }}},
    })
    .to_string()
}

async fn deliver(app: &TestApp, body: &str, secret: &str) -> (StatusCode, Value) {
    let signature = sign_hex(secret.as_bytes(), body.as_bytes()).unwrap();
    let response = app
        .send(
            post("/api/razorpay/webhook")
                .header("x-razorpay-signature", &signature)
                .raw(body.to_string()),
        )
        .await;
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_webhook_credits_captured_payment_idempotently() {
    let app = TestApp::new();
    let user = app.identity.add_user("buyer@example.com", "password-123", Role::User);
    let event = captured_event("pay_w1", &user.id.to_string(), "15");

    let (status, body) = deliver(&app, &event, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(app.store.balance(user.id), 15);

    let (status, _) = deliver(&app, &event, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.balance(user.id), 15);
}

#[tokio::test]
async fn test_webhook_rejections() {
    let app = TestApp::new();
    let event = captured_event("pay_w2", "not-a-uuid", "15");

    let (status, body) = deliver(&app, &event, "wrong-secret").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Webhook signature verification failed"));

    let (status, body) = deliver(&app, &event, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid user ID format"));

    let no_notes = json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": { "id": "pay_w3" } } },
    })
    .to_string();
    let (status, body) = deliver(&app, &no_notes, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Missing metadata"));

    let (status, body) = deliver(&app, "not json", WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid JSON body"));
}

#[tokio::test]
async fn test_webhook_without_secret_is_500() {
    let mut config = test_config();
    config.payments.webhook_secret = None;
    let app = TestApp::with_config(config);

    let (status, body) = deliver(&app, r#"{"event":"order.paid"}"#, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Webhook not configured"));
}

#[tokio::test]
async fn test_webhook_credit_failure_after_retries() {
    let app = TestApp::new();
    let user = app.identity.add_user("buyer@example.com", "password-123", Role::User);
    app.store.set_available(false);

    let event = captured_event("pay_w4", &user.id.to_string(), "15");
    let (status, body) = deliver(&app, &event, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("Error processing webhook"));
}

// --- ai --------------------------------------------------------------------

struct EchoGenerator;

impl ContentGenerator for EchoGenerator {
    fn generate_post<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<GeneratedPost, ServiceError>> {
        Box::pin(async move {
            Ok(GeneratedPost {
                title: topic.to_string(),
                excerpt: "excerpt".to_string(),
                content: "content".to_string(),
            })
        })
    }
}

#[tokio::test]
async fn test_ai_gates() {
    let app = TestApp::new();
    let topic = json!({ "topic": "Community archives" });

    let (status, _) = post_ok(&app, "/api/ai/generate-post", topic.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, member) = app.sign_in_as("member@example.com", Role::User);
    let (status, body) = post_as(&app, &member, "/api/ai/generate-post", topic.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["message"], json!("Admin access required"));

    let (_, admin) = app.sign_in_as("admin@example.com", Role::Admin);
    let (status, body) = post_as(&app, &admin, "/api/ai/generate-post", topic).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["message"], json!("AI service is temporarily unavailable"));
}

#[tokio::test]
async fn test_ai_generates_and_limits_per_user() {
    let app = TestApp::with(test_config(), Arc::new(EchoGenerator));
    let (_, admin) = app.sign_in_as("admin@example.com", Role::Admin);
    let (_, other_admin) = app.sign_in_as("editor@example.com", Role::Admin);
    let topic = json!({ "topic": "Community archives" });

    for _ in 0..3 {
        let (status, body) = post_as(&app, &admin, "/api/ai/generate-post", topic.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], json!("Community archives"));
    }
    let (status, _) = post_as(&app, &admin, "/api/ai/generate-post", topic.clone()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Same address, different user: separate budget.
    let (status, _) = post_as(&app, &other_admin, "/api/ai/generate-post", topic).await;
    assert_eq!(status, StatusCode::OK);
}

// --- profile ---------------------------------------------------------------

#[tokio::test]
async fn test_profile_requires_session() {
    let app = TestApp::new();
    let response = app.send(get("/api/user/profile").build()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await["error"]["message"],
        json!("Authentication required")
    );

    let (_, sid) = app.sign_in_as("member@example.com", Role::User);
    let (status, body) = get_as(&app, &sid, "/api/user/profile").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], json!("Profile not found"));
}

#[tokio::test]
async fn test_profile_patch_merges_named_fields() {
    let app = TestApp::new();
    let (user, sid) = app.sign_in_as("ada@example.com", Role::User);

    let (status, body) = patch_as(
        &app,
        &sid,
        "/api/user/profile",
        json!({
            "full_name": "  Ada Lovelace ",
            "website": "https://ada.example",
            "years_operating": 12,
            "role": "admin",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Profile updated successfully"));
    assert_eq!(body["data"]["full_name"], json!("Ada Lovelace"));
    assert_eq!(body["data"]["user_id"], json!(user.id.to_string()));
    assert!(body["data"].get("role").is_none());

    let (status, _) =
        patch_as(&app, &sid, "/api/user/profile", json!({ "city": "London", "phone": null })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_as(&app, &sid, "/api/user/profile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["full_name"], json!("Ada Lovelace"));
    assert_eq!(body["data"]["city"], json!("London"));
    assert_eq!(body["data"]["phone"], Value::Null);
    assert_eq!(app.store.count("profiles"), 1);
}

#[tokio::test]
async fn test_profile_patch_validation() {
    let app = TestApp::new();
    let (_, sid) = app.sign_in_as("ada@example.com", Role::User);

    let (status, body) = patch_as(
        &app,
        &sid,
        "/api/user/profile",
        json!({ "full_name": "", "website": "ftp://files.example", "profile_completed": "yes" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    assert_eq!(
        body["error"]["details"]["errors"],
        json!([
            "Full name is required",
            "Website must be a valid URL",
            "Profile completed must be true or false"
        ])
    );
    assert_eq!(app.store.count("profiles"), 0);
}

#[tokio::test]
async fn test_general_limit_is_per_user() {
    let mut config = test_config();
    config.rate_limit.api.max_requests = 2;
    let app = TestApp::with_config(config);
    let (_, first) = app.sign_in_as("one@example.com", Role::User);
    let (_, second) = app.sign_in_as("two@example.com", Role::User);

    for _ in 0..2 {
        let (status, _) = get_as(&app, &first, "/api/user/profile").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, body) = get_as(&app, &first, "/api/user/profile").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], json!("Too many API requests. Please slow down."));

    let (status, _) = get_as(&app, &second, "/api/user/profile").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- assessment drafts -----------------------------------------------------

#[tokio::test]
async fn test_draft_lifecycle() {
    let app = TestApp::new();
    let (_, sid) = app.sign_in_as("ada@example.com", Role::User);
    let (_, other) = app.sign_in_as("grace@example.com", Role::User);
    let path = "/api/assessments/draft?type=cirf";

    let (status, body) = get_as(&app, &sid, path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "hasDraft": false, "draft": null }));
    assert_eq!(body["message"], json!("No draft found"));

    let (status, body) = post_as(
        &app,
        &sid,
        "/api/assessments/draft",
        json!({
            "assessmentType": "cirf",
            "answers": { "q1": 3, "q2": "often", "q3": ["a", "b"] },
            "currentSection": "values",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let draft_id = body["data"]["draftId"].as_str().unwrap().to_string();
    assert!(body["data"]["savedAt"].as_str().unwrap().ends_with('Z'));

    let (_, body) = post_as(
        &app,
        &sid,
        "/api/assessments/draft",
        json!({ "assessmentType": "cirf", "answers": { "q1": 5 }, "currentSection": "context" }),
    )
    .await;
    assert_eq!(body["data"]["draftId"], json!(draft_id));
    assert_eq!(app.store.count("assessment_drafts"), 1);

    let (_, body) = get_as(&app, &sid, path).await;
    assert_eq!(body["data"]["hasDraft"], json!(true));
    assert_eq!(body["data"]["draft"]["id"], json!(draft_id));
    assert_eq!(body["data"]["draft"]["answers"], json!({ "q1": 5 }));
    assert_eq!(body["data"]["draft"]["currentSection"], json!("context"));

    // Drafts are private to their owner.
    let (_, body) = get_as(&app, &other, path).await;
    assert_eq!(body["data"]["hasDraft"], json!(false));

    let token = app.csrf_token().await;
    let response = app.send(delete(path).csrf(&token).session(&sid).build()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], json!("Draft deleted successfully"));
    assert_eq!(app.store.count("assessment_drafts"), 0);

    let (_, body) = get_as(&app, &sid, path).await;
    assert_eq!(body["data"]["hasDraft"], json!(false));
}

#[tokio::test]
async fn test_draft_rejections() {
    let app = TestApp::new();
    let (status, body) = post_ok(
        &app,
        "/api/assessments/draft",
        json!({ "assessmentType": "cirf", "answers": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], json!("You must be logged in to save drafts"));

    let (_, sid) = app.sign_in_as("ada@example.com", Role::User);
    let (status, body) = post_as(
        &app,
        &sid,
        "/api/assessments/draft",
        json!({ "assessmentType": "quiz", "answers": { "q1": { "nested": true } } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["details"]["errors"],
        json!(["Invalid assessment type", "Invalid answers"])
    );

    let (status, body) = get_as(&app, &sid, "/api/assessments/draft").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], json!("Assessment type is required"));
}

// --- health ----------------------------------------------------------------

#[tokio::test]
async fn test_health_reports_checks() {
    let app = TestApp::new();
    let response = app.send(get("/api/health").build()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["checks"]["database"]["status"], json!("pass"));
    assert_eq!(body["checks"]["features"]["payments"], json!(true));
    assert_eq!(body["checks"]["features"]["ai"], json!(false));
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_health_unhealthy_when_store_down() {
    let app = TestApp::new();
    app.store.set_available(false);
    let response = app.send(get("/api/health").build()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], json!("unhealthy"));
}
