use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use mcash_ledger::{
    payment_message, sign_fields, AccountId, FixedMerkleTree, DEPOSIT_UNIT,
    REPUTATION_TREE_HEIGHT,
};
use mcash_operator::{app_router, AppState};

const BODY_LIMIT: usize = usize::MAX;

async fn test_app() -> Router {
    app_router(AppState::in_memory().await.unwrap())
}

fn keypair() -> (SigningKey, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = hex::encode(signing_key.verifying_key().as_bytes());
    (signing_key, public_key)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn fund(app: &Router, public_key: &str, deposit_id: &str) {
    let (status, _) = post(
        app,
        "/deposits/verify",
        json!({ "public_key": public_key, "deposit_amount": DEPOSIT_UNIT }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post(
        app,
        "/deposits/confirm",
        json!({ "public_key": public_key, "deposit_id": deposit_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "committed");
}

fn payment_body(key: &SigningKey, sender: &str, recipient: &str, amount: u64) -> Value {
    let sender_id = AccountId::from_hex(sender).unwrap();
    let recipient_id = AccountId::from_hex(recipient).unwrap();
    let signature = sign_fields(key, &[payment_message(&recipient_id, &sender_id)]);
    json!({
        "sender": sender,
        "recipient_address": recipient,
        "payment_amount": amount,
        "signature": hex::encode(signature.to_bytes()),
    })
}

#[tokio::test]
async fn health_reports_initialised_ledger() {
    let app = test_app().await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["initialized"], true);

    let (status, roots) = get(&app, "/roots").await;
    assert_eq!(status, StatusCode::OK);
    assert!(roots["settled"].as_str().unwrap().starts_with("0x"));
}

#[tokio::test]
async fn deposit_and_payment_flow() {
    let app = test_app().await;
    let (alice_key, alice) = keypair();
    let (_, bob) = keypair();
    fund(&app, &alice, "tx-1").await;

    let (status, repeat) = post(
        &app,
        "/deposits/confirm",
        json!({ "public_key": alice, "deposit_id": "tx-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repeat["status"], "already_settled");

    let (status, receipt) = post(
        &app,
        "/payments",
        payment_body(&alice_key, &alice, &bob, 250_000),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["kind"], "make_payment");
    assert_eq!(receipt["transfer"]["amount"], 250_000);
    assert_eq!(receipt["transfer"]["destination"], bob);

    let (status, view) = get(&app, &format!("/accounts/{alice}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["settled"], DEPOSIT_UNIT - 250_000);
    assert_eq!(view["unstable"], 0);
    assert_eq!(view["reputation"], 1);

    let (status, proof) = get(&app, &format!("/accounts/{alice}/reputation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proof["reputation"], 1);
    let (_, roots) = get(&app, "/roots").await;
    assert_eq!(proof["root"], roots["reputation"]);
}

#[tokio::test]
async fn overdraft_and_forgery_are_rejected() {
    let app = test_app().await;
    let (alice_key, alice) = keypair();
    let (mallory_key, _) = keypair();
    let (_, bob) = keypair();
    fund(&app, &alice, "tx-9").await;

    let (status, body) = post(
        &app,
        "/payments",
        payment_body(&alice_key, &alice, &bob, DEPOSIT_UNIT + 1),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["retryable"], false);

    let (status, body) = post(
        &app,
        "/payments",
        payment_body(&mallory_key, &alice, &bob, 10),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let (_, view) = get(&app, &format!("/accounts/{alice}")).await;
    assert_eq!(view["settled"], DEPOSIT_UNIT);
    assert_eq!(view["reputation"], 0);
}

#[tokio::test]
async fn malformed_requests_are_invalid_input() {
    let app = test_app().await;
    let (status, body) = get(&app, "/accounts/not-a-key").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (_, alice) = keypair();
    let (status, body) = post(
        &app,
        "/deposits/verify",
        json!({ "public_key": alice, "deposit_amount": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, body) = post(
        &app,
        "/deposits/confirm",
        json!({ "public_key": alice, "deposit_id": "tx-1" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");
}

#[tokio::test]
async fn positional_reputation_witness_against_map_root_is_a_mismatch() {
    let app = test_app().await;
    let tree = FixedMerkleTree::new(REPUTATION_TREE_HEIGHT).unwrap();
    let witness = tree.witness(0).unwrap();

    let (status, body) = post(
        &app,
        "/reputation/verify",
        json!({ "witness": witness, "reputation": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "PROOF_MISMATCH");
}
