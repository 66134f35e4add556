use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use courier_dispatch::api::rest::router;
use courier_dispatch::clock::ManualClock;
use courier_dispatch::models::event::NotificationKind;
use courier_dispatch::state::AppState;
use courier_dispatch::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Copy)]
enum As {
    Restaurant(Uuid),
    Courier(Uuid),
    Staff,
}

impl As {
    fn headers(self) -> (&'static str, Option<Uuid>) {
        match self {
            As::Restaurant(id) => ("restaurant", Some(id)),
            As::Courier(id) => ("courier", Some(id)),
            As::Staff => ("staff", None),
        }
    }
}

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(TIMEOUT, 1024));
    (router(state.clone()), state)
}

fn setup_with_clock() -> (axum::Router, Arc<AppState>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = Arc::new(AppState::with_parts(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        TIMEOUT,
        1024,
    ));
    (router(state.clone()), state, clock)
}

fn json_request(method: &str, uri: &str, actor: Option<As>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(actor) = actor {
        let (role, id) = actor.headers();
        builder = builder.header("x-actor-role", role);
        if let Some(id) = id {
            builder = builder.header("x-actor-id", id.to_string());
        }
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_as(uri: &str, actor: As) -> Request<Body> {
    json_request("POST", uri, Some(actor), json!({}))
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn id_of(body: &Value) -> Uuid {
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn online_courier(app: &axum::Router, name: &str) -> Uuid {
    let res = app
        .clone()
        .oneshot(json_request("POST", "/couriers", None, json!({ "name": name })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let id = id_of(&body_json(res).await);

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{id}/availability"),
            Some(As::Courier(id)),
            json!({ "available": true }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    id
}

/// Walks a fresh order through intake up to `ready_broadcasting`.
async fn ready_order(app: &axum::Router, restaurant: Uuid) -> Uuid {
    let res = app
        .clone()
        .oneshot(post_as("/orders", As::Restaurant(restaurant)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let id = id_of(&body_json(res).await);

    for step in ["confirm", "preparing", "ready"] {
        let res = app
            .clone()
            .oneshot(post_as(&format!("/orders/{id}/{step}"), As::Restaurant(restaurant)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "step {step}");
    }
    id
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["couriers"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["open_broadcasts"], 0);
    assert_eq!(body["awaiting_manual"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Metric Mia").await;
    let order = ready_order(&app, restaurant).await;
    app.clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(courier)))
        .await
        .unwrap();

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("dispatch_broadcasts_opened_total 1"));
    assert!(body.contains("dispatch_claims_total{outcome=\"claimed\"} 1"));
}

#[tokio::test]
async fn register_courier_starts_offline() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request("POST", "/couriers", None, json!({ "name": "Alice" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["name"], "Alice");
    assert_eq!(body["is_available"], false);
    assert!(body["active_order_id"].is_null());
}

#[tokio::test]
async fn register_courier_empty_name_returns_400() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request("POST", "/couriers", None, json!({ "name": "  " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn availability_toggles_eligibility() {
    let (app, _state) = setup();
    let courier = online_courier(&app, "Eve").await;

    let res = app
        .clone()
        .oneshot(get_request("/couriers/eligible"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await, json!([courier.to_string()]));

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{courier}/availability"),
            Some(As::Courier(courier)),
            json!({ "available": false }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["is_available"], false);

    let res = app.oneshot(get_request("/couriers/eligible")).await.unwrap();
    assert_eq!(body_json(res).await, json!([]));
}

#[tokio::test]
async fn availability_of_another_courier_is_forbidden() {
    let (app, _state) = setup();
    let courier = online_courier(&app, "Frank").await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/couriers/{courier}/availability"),
            Some(As::Courier(Uuid::new_v4())),
            json!({ "available": false }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _state) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "order_not_found");
}

#[tokio::test]
async fn missing_role_header_returns_400() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request("POST", "/orders", None, json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_must_name_the_restaurant() {
    let (app, _state) = setup();
    let res = app
        .clone()
        .oneshot(post_as("/orders", As::Staff))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let restaurant = Uuid::new_v4();
    let res = app
        .oneshot(json_request(
            "POST",
            "/orders",
            Some(As::Staff),
            json!({ "restaurant_id": restaurant }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["restaurant_id"], restaurant.to_string());
    assert_eq!(body["status"], "created");
}

#[tokio::test]
async fn create_order_for_another_restaurant_is_forbidden() {
    let (app, _state) = setup();
    let res = app
        .oneshot(json_request(
            "POST",
            "/orders",
            Some(As::Restaurant(Uuid::new_v4())),
            json!({ "restaurant_id": Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn full_dispatch_flow() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Dispatch Dan").await;
    let order = ready_order(&app, restaurant).await;

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order}/broadcast")))
        .await
        .unwrap();
    let status = body_json(res).await;
    assert_eq!(status["open"], true);
    assert!(status["remaining_ms"].as_u64().unwrap() <= 300_000);

    let res = app
        .clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(courier)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let claim = body_json(res).await;
    assert_eq!(claim["outcome"], "claimed");
    assert_eq!(claim["courier_id"], courier.to_string());

    let res = app
        .clone()
        .oneshot(post_as(
            &format!("/orders/{order}/claim/confirm"),
            As::Courier(courier),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assigned = body_json(res).await;
    assert_eq!(assigned["status"], "assigned");
    assert_eq!(assigned["courier_id"], courier.to_string());
    assert_eq!(assigned["assignment_version"], 2);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/couriers/{courier}")))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["active_order_id"], order.to_string());

    let res = app
        .clone()
        .oneshot(post_as(&format!("/orders/{order}/deliver"), As::Courier(courier)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "delivered");

    let res = app
        .oneshot(get_request(&format!("/couriers/{courier}")))
        .await
        .unwrap();
    assert!(body_json(res).await["active_order_id"].is_null());
}

#[tokio::test]
async fn second_claim_reports_already_claimed() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let c1 = online_courier(&app, "C1").await;
    let c2 = online_courier(&app, "C2").await;
    let order = ready_order(&app, restaurant).await;

    let res = app
        .clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(c1)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["outcome"], "claimed");

    let res = app
        .clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(c2)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["outcome"], "already_claimed");

    let res = app
        .oneshot(post_as(
            &format!("/orders/{order}/claim/confirm"),
            As::Courier(c2),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn restaurant_cannot_claim() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let order = ready_order(&app, restaurant).await;

    let res = app
        .oneshot(post_as(
            &format!("/orders/{order}/claim"),
            As::Restaurant(restaurant),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn marking_ready_out_of_order_is_a_conflict() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let res = app
        .clone()
        .oneshot(post_as("/orders", As::Restaurant(restaurant)))
        .await
        .unwrap();
    let order = id_of(&body_json(res).await);

    let res = app
        .oneshot(post_as(
            &format!("/orders/{order}/ready"),
            As::Restaurant(restaurant),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(res).await["code"], "invalid_transition");
}

#[tokio::test]
async fn expired_broadcast_falls_back_to_manual_assignment() {
    let (app, _state, clock) = setup_with_clock();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Late Larry").await;
    let order = ready_order(&app, restaurant).await;

    clock.advance(Duration::from_secs(301));

    let res = app
        .clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(courier)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["outcome"], "not_open");

    let res = app
        .clone()
        .oneshot(get_request("/orders?status=expired_awaiting_manual"))
        .await
        .unwrap();
    let queue = body_json(res).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["id"], order.to_string());

    let res = app
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["awaiting_manual"], 1);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order}/manual-assign"),
            Some(As::Restaurant(restaurant)),
            json!({ "courier_id": courier }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assigned = body_json(res).await;
    assert_eq!(assigned["status"], "assigned");
    assert_eq!(assigned["courier_id"], courier.to_string());
}

#[tokio::test]
async fn manual_assign_on_open_broadcast_is_a_conflict() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Early Erin").await;
    let order = ready_order(&app, restaurant).await;

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order}/manual-assign"),
            Some(As::Restaurant(restaurant)),
            json!({ "courier_id": courier }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_releases_the_claiming_courier() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Cancelled Carl").await;
    let order = ready_order(&app, restaurant).await;

    app.clone()
        .oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(courier)))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(post_as(
            &format!("/orders/{order}/cancel"),
            As::Restaurant(restaurant),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled = body_json(res).await;
    assert_eq!(cancelled["status"], "cancelled");
    assert!(cancelled["courier_id"].is_null());

    let res = app
        .clone()
        .oneshot(post_as(
            &format!("/orders/{order}/cancel"),
            As::Restaurant(restaurant),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(get_request("/couriers/eligible"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await, json!([courier.to_string()]));
}

#[tokio::test]
async fn list_orders_rejects_unknown_status() {
    let (app, _state) = setup();
    let res = app
        .oneshot(get_request("/orders?status=teleported"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn open_broadcasts_lists_only_claimable_orders() {
    let (app, _state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Picky Pat").await;
    let claimed = ready_order(&app, restaurant).await;
    let open = ready_order(&app, restaurant).await;

    app.clone()
        .oneshot(post_as(&format!("/orders/{claimed}/claim"), As::Courier(courier)))
        .await
        .unwrap();

    let res = app.oneshot(get_request("/broadcasts")).await.unwrap();
    let broadcasts = body_json(res).await;
    let list = broadcasts.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["order_id"], open.to_string());
}

#[tokio::test]
async fn ready_order_is_pushed_to_eligible_couriers() {
    let (app, state) = setup();
    let mut events = state.events_tx.subscribe();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Listening Lou").await;
    let order = ready_order(&app, restaurant).await;

    let event = events.try_recv().unwrap();
    assert_eq!(event.order_id, order);
    assert_eq!(event.kind, NotificationKind::NewReadyOrder);
    assert!(event.is_addressed_to(&courier));
}

#[tokio::test]
async fn claim_is_announced_on_the_restaurant_stream() {
    let (app, state) = setup();
    let restaurant = Uuid::new_v4();
    let courier = online_courier(&app, "Quick Quinn").await;
    let order = ready_order(&app, restaurant).await;
    let mut events = state.events_tx.subscribe();

    app.oneshot(post_as(&format!("/orders/{order}/claim"), As::Courier(courier)))
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.order_id, order);
    assert_eq!(event.kind, NotificationKind::ClaimPending);
    assert!(event.recipients.is_empty());
}
