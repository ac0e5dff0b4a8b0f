use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use ordering::config::DispatchConfig;
use ordering::entities::memory::MemoryDatabase;
use ordering::rest::router;
use ordering::services::DispatchServices;
use ordering::utils::actor::{USER_ID_HEADER, USER_ROLE_HEADER};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    let services =
        DispatchServices::new(MemoryDatabase::new().into(), DispatchConfig::default()).unwrap();
    router(services)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<(i32, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = user {
        request = request
            .header(USER_ID_HEADER, user_id.to_string())
            .header(USER_ROLE_HEADER, role);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn order_body(store_id: i64, payment_method: &str) -> Value {
    json!({
        "storeId": store_id,
        "items": [
            { "productId": 501, "quantity": 2, "price": "49.50" },
            { "productId": 502, "quantity": 1, "price": "120.00" }
        ],
        "shippingAddress": "4 Lake View",
        "paymentMethod": payment_method,
        "latitude": 12.9352,
        "longitude": 77.6245
    })
}

async fn open_store(app: &Router) -> i64 {
    let (status, store) = call(
        app,
        Method::POST,
        "/api/stores",
        Some((22, "shopkeeper")),
        Some(json!({
            "name": "Corner Grocer",
            "address": "12 Market Road",
            "latitude": 12.9716,
            "longitude": 77.5946
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{store}");
    store["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_needs_no_identity() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn missing_identity_headers_are_rejected() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/orders",
        None,
        Some(order_body(1, "card")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, Method::GET, "/api/orders/1", Some((11, "pirate")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn placed_order_is_visible_to_its_parties_only() {
    let app = app();
    let store_id = open_store(&app).await;

    let (status, order) = call(
        &app,
        Method::POST,
        "/api/orders",
        Some((11, "customer")),
        Some(order_body(store_id, "upi")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "pending");
    assert_eq!(order["items"].as_array().map(Vec::len), Some(2));
    let order_id = order["id"].as_i64().unwrap();

    let uri = format!("/api/orders/{order_id}");
    let (status, _) = call(&app, Method::GET, &uri, Some((11, "customer")), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, &uri, Some((22, "shopkeeper")), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, &uri, Some((12, "customer")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, count) = call(
        &app,
        Method::GET,
        "/api/notifications/user/22/unread-count",
        Some((22, "shopkeeper")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count, json!({ "count": 1 }));
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let app = app();
    let store_id = open_store(&app).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/orders",
        Some((11, "customer")),
        Some(order_body(store_id, "barter")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let mut empty = order_body(store_id, "card");
    empty["items"] = json!([]);
    let (status, _) = call(&app, Method::POST, "/api/orders", Some((11, "customer")), Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/orders/1/status",
        Some((22, "shopkeeper")),
        Some(json!({ "status": "teleported" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    for body in [json!({ "orderId": 0 }), json!({ "orderId": 1, "deliveryPartnerId": -3 })] {
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/deliveries/assign",
            Some((1, "admin")),
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/deliveries/1/reassign",
        Some((1, "admin")),
        Some(json!({ "deliveryPartnerId": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn roles_are_enforced() {
    let app = app();
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/stores",
        Some((11, "customer")),
        Some(json!({ "name": "Not Mine", "address": "Nowhere 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/delivery-partners",
        Some((11, "customer")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/notifications/user/22",
        Some((11, "customer")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = app();
    let (status, _) = call(&app, Method::GET, "/api/orders/999", Some((1, "admin")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
