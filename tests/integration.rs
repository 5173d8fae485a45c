use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use delivery_dispatch::api::rest::router;
use delivery_dispatch::config::Config;
use delivery_dispatch::models::role::{Identity, Role};
use delivery_dispatch::state::AppState;
use delivery_dispatch::store::cache::MemoryCache;
use delivery_dispatch::store::orders::InMemoryOrderStore;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const VENDOR_AT: [f64; 2] = [77.5946, 12.9716];
const DROPOFF_AT: [f64; 2] = [77.6033, 12.9352];

struct TestApp {
    state: Arc<AppState>,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::new("test-secret");
        let state = AppState::new(
            &config,
            Arc::new(MemoryCache::new()),
            Arc::new(InMemoryOrderStore::new()),
        );
        Self {
            state: Arc::new(state),
        }
    }

    fn app(&self) -> axum::Router {
        router(self.state.clone())
    }

    fn token(&self, identity: Identity) -> String {
        self.state
            .tokens
            .issue(identity, Duration::minutes(10))
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn register_vendor(&self, vendor: Identity, coordinates: [f64; 2]) {
        let admin = Identity::new(Uuid::new_v4(), Role::Admin);
        let (status, _) = self
            .send(json_request(
                "POST",
                "/vendors",
                Some(&self.token(admin)),
                json!({
                    "id": vendor.subject_id,
                    "name": "Fresh Dairy",
                    "coordinates": coordinates,
                    "area": "Indiranagar",
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn create_order(&self, customer: Identity, vendor: Identity) -> Value {
        let (status, body) = self
            .send(json_request(
                "POST",
                "/orders",
                Some(&self.token(customer)),
                json!({
                    "vendor_id": vendor.subject_id,
                    "subtotal": 180.0,
                    "delivery_address": { "label": "Home", "coordinates": DROPOFF_AT },
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    async fn set_status(&self, order_id: &str, actor: Identity, target: &str) -> (StatusCode, Value) {
        self.send(json_request(
            "PUT",
            &format!("/orders/{order_id}/status"),
            Some(&self.token(actor)),
            json!({ "target_status": target }),
        ))
        .await
    }

    /// Customer order moved by its vendor to READY_FOR_PICKUP.
    async fn ready_order(&self) -> (String, Identity, Identity) {
        let vendor = Identity::new(Uuid::new_v4(), Role::Vendor);
        let customer = Identity::new(Uuid::new_v4(), Role::Customer);
        self.register_vendor(vendor, VENDOR_AT).await;

        let order = self.create_order(customer, vendor).await;
        let order_id = order["id"].as_str().unwrap().to_string();
        assert_eq!(self.set_status(&order_id, vendor, "ACCEPTED").await.0, StatusCode::OK);
        assert_eq!(
            self.set_status(&order_id, vendor, "READY_FOR_PICKUP").await.0,
            StatusCode::OK
        );
        (order_id, customer, vendor)
    }

    async fn report_location(&self, courier: Identity, coordinates: [f64; 2], order_id: Option<&str>) -> (StatusCode, Value) {
        self.send(json_request(
            "POST",
            "/couriers/location",
            Some(&self.token(courier)),
            json!({ "coordinates": coordinates, "order_id": order_id }),
        ))
        .await
    }
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let t = TestApp::new();
    let (status, body) = t.send(get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["vendors"], 0);
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let t = TestApp::new();
    let response = t.app().oneshot(get_request("/metrics", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("realtime_connections"));
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let t = TestApp::new();
    let (status, body) = t
        .send(get_request(&format!("/orders/{}", Uuid::new_v4()), None))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn only_admins_register_vendors() {
    let t = TestApp::new();
    let customer = Identity::new(Uuid::new_v4(), Role::Customer);
    let (status, body) = t
        .send(json_request(
            "POST",
            "/vendors",
            Some(&t.token(customer)),
            json!({ "name": "Sneaky", "coordinates": VENDOR_AT }),
        ))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn create_order_computes_charges() {
    let t = TestApp::new();
    let vendor = Identity::new(Uuid::new_v4(), Role::Vendor);
    let customer = Identity::new(Uuid::new_v4(), Role::Customer);
    t.register_vendor(vendor, VENDOR_AT).await;

    let order = t.create_order(customer, vendor).await;

    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["number"], "ORD-000001");
    assert_eq!(order["charges"]["delivery_fee"], 51.0);
    assert_eq!(order["charges"]["tax"], 9.0);
    assert_eq!(order["charges"]["total"], 240.0);
    assert_eq!(order["status_history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn vendor_moves_order_but_customer_cannot() {
    let t = TestApp::new();
    let vendor = Identity::new(Uuid::new_v4(), Role::Vendor);
    let customer = Identity::new(Uuid::new_v4(), Role::Customer);
    t.register_vendor(vendor, VENDOR_AT).await;
    let order = t.create_order(customer, vendor).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = t.set_status(order_id, customer, "ACCEPTED").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["current_status"], "PENDING");

    let (status, body) = t.set_status(order_id, vendor, "ACCEPTED").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ACCEPTED");
}

#[tokio::test]
async fn invalid_transition_reports_current_status() {
    let t = TestApp::new();
    let vendor = Identity::new(Uuid::new_v4(), Role::Vendor);
    let customer = Identity::new(Uuid::new_v4(), Role::Customer);
    t.register_vendor(vendor, VENDOR_AT).await;
    let order = t.create_order(customer, vendor).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, body) = t.set_status(order_id, vendor, "DELIVERED").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(body["current_status"], "PENDING");
}

#[tokio::test]
async fn status_history_is_returned_in_order() {
    let t = TestApp::new();
    let (order_id, customer, _vendor) = t.ready_order().await;

    let (status, body) = t
        .send(get_request(
            &format!("/orders/{order_id}/history"),
            Some(&t.token(customer)),
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let statuses: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["PENDING", "ACCEPTED", "READY_FOR_PICKUP"]);
}

#[tokio::test]
async fn jobs_require_a_reported_location() {
    let t = TestApp::new();
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, body) = t
        .send(get_request("/couriers/jobs", Some(&t.token(courier))))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "location_unavailable");
}

#[tokio::test]
async fn reported_location_surfaces_nearby_jobs() {
    let t = TestApp::new();
    let (order_id, _customer, _vendor) = t.ready_order().await;
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, _) = t.report_location(courier, [77.5950, 12.9720], None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = t
        .send(get_request(
            "/couriers/jobs?max_distance_km=3",
            Some(&t.token(courier)),
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["order"]["id"], order_id.as_str());
    assert!(jobs[0]["distance_km"].as_f64().unwrap() < 0.1);
}

#[tokio::test]
async fn second_accept_conflicts() {
    let t = TestApp::new();
    let (order_id, _customer, _vendor) = t.ready_order().await;
    let first = Identity::new(Uuid::new_v4(), Role::Courier);
    let second = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, body) = t
        .send(json_request(
            "POST",
            &format!("/couriers/jobs/{order_id}/accept"),
            Some(&t.token(first)),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["courier_id"], first.subject_id.to_string());
    assert_eq!(body["status"], "READY_FOR_PICKUP");

    let (status, body) = t
        .send(json_request(
            "POST",
            &format!("/couriers/jobs/{order_id}/accept"),
            Some(&t.token(second)),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_assigned");
}

#[tokio::test]
async fn assigned_courier_location_is_visible_on_the_order() {
    let t = TestApp::new();
    let (order_id, customer, _vendor) = t.ready_order().await;
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, _) = t
        .send(json_request(
            "POST",
            &format!("/couriers/jobs/{order_id}/accept"),
            Some(&t.token(courier)),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .report_location(courier, [77.5990, 12.9600], Some(&order_id))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = t
        .send(get_request(
            &format!("/orders/{order_id}/location"),
            Some(&t.token(customer)),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["position"]["coordinates"]["lng"], 77.5990);
}

#[tokio::test]
async fn unassigned_courier_cannot_broadcast_for_order() {
    let t = TestApp::new();
    let (order_id, _customer, _vendor) = t.ready_order().await;
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, body) = t
        .report_location(courier, [77.5990, 12.9600], Some(&order_id))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["current_status"], "READY_FOR_PICKUP");

    // The refused report must not have moved the courier.
    let (status, body) = t
        .send(get_request("/couriers/jobs", Some(&t.token(courier))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "location_unavailable");
}

#[tokio::test]
async fn refused_batch_stores_nothing() {
    let t = TestApp::new();
    let (order_id, _customer, _vendor) = t.ready_order().await;
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, _) = t
        .send(json_request(
            "POST",
            "/couriers/location/batch",
            Some(&t.token(courier)),
            json!([
                { "coordinates": [77.5950, 12.9720] },
                { "coordinates": [77.5960, 12.9710], "order_id": order_id },
            ]),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let history = t.state.positions.history(courier.subject_id).await.unwrap();
    assert!(history.is_empty());
    let current = t
        .state
        .positions
        .courier_position(courier.subject_id)
        .await
        .unwrap();
    assert!(current.is_none());
}

#[tokio::test]
async fn nearby_vendors_carry_fee_and_radius_flag() {
    let t = TestApp::new();
    let vendor = Identity::new(Uuid::new_v4(), Role::Vendor);
    let customer = Identity::new(Uuid::new_v4(), Role::Customer);
    t.register_vendor(vendor, VENDOR_AT).await;

    let uri = format!(
        "/vendors/nearby?lng={}&lat={}&max_distance_km=10&area=indiranagar",
        DROPOFF_AT[0], DROPOFF_AT[1]
    );
    let (status, body) = t.send(get_request(&uri, Some(&t.token(customer)))).await;

    assert_eq!(status, StatusCode::OK);
    let vendors = body.as_array().unwrap();
    assert_eq!(vendors.len(), 1);
    assert_eq!(vendors[0]["delivery_fee"], 51.0);
    assert_eq!(vendors[0]["is_within_service_radius"], true);
}

#[tokio::test]
async fn courier_declines_offer_and_order_stays_open() {
    let t = TestApp::new();
    let (order_id, customer, _vendor) = t.ready_order().await;
    let courier = Identity::new(Uuid::new_v4(), Role::Courier);

    let (status, body) = t
        .send(json_request(
            "POST",
            &format!("/couriers/jobs/{order_id}/reject"),
            Some(&t.token(courier)),
            json!({ "reason": "too far" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "too far");

    let (_, order) = t
        .send(get_request(&format!("/orders/{order_id}"), Some(&t.token(customer))))
        .await;
    assert_eq!(order["status"], "READY_FOR_PICKUP");
    assert!(order["courier_id"].is_null());
}
