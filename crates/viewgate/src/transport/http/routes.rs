//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    response::{IntoResponse, Json},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::health::HealthSnapshot;
use crate::protocol::ClientId;
use crate::queue::QueueStatus;
use crate::service::{ProductId, QueueService};

use super::session;

/// Envelope shared by the JSON status endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    pub user_id: String,
}

async fn queue_socket(
    ws: WebSocketUpgrade,
    Path(product_id): Path<ProductId>,
    Query(params): Query<QueueParams>,
    State(service): State<Arc<QueueService>>,
) -> impl IntoResponse {
    let client_id = ClientId::from(params.user_id);
    ws.on_upgrade(move |socket| session::handle_socket(socket, service, product_id, client_id))
}

async fn queue_status(
    State(service): State<Arc<QueueService>>,
    Path(product_id): Path<ProductId>,
) -> Json<ApiResponse<QueueStatus<ProductId>>> {
    ApiResponse::ok(service.status(product_id))
}

async fn all_queue_status(
    State(service): State<Arc<QueueService>>,
) -> Json<ApiResponse<Vec<QueueStatus<ProductId>>>> {
    ApiResponse::ok(service.all_statuses())
}

async fn health_check(State(service): State<Arc<QueueService>>) -> Json<HealthSnapshot> {
    Json(service.health())
}

pub fn routes(service: Arc<QueueService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/ws/products/{product_id}/queue", get(queue_socket))
        .route("/api/products/{product_id}/queue/status", get(queue_status))
        .route("/api/products/queue/all", get(all_queue_status))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::service::AdmissionConfig;

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn service() -> Arc<QueueService> {
        Arc::new(QueueService::new(AdmissionConfig::default()))
    }

    fn admit(service: &QueueService, product: ProductId, client: &str) {
        let (channel, _rx) = service.open_channel();
        service.enter(product, ClientId::from(client), channel);
    }

    #[tokio::test]
    async fn status_of_unknown_product_is_empty() {
        let app = routes(service());

        let response = app
            .oneshot(
                Request::get("/api/products/42/queue/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "data": {
                    "resource_key": 42,
                    "occupied": false,
                    "occupant_id": null,
                    "waiting_count": 0,
                    "waiting_ids": []
                }
            })
        );
    }

    #[tokio::test]
    async fn status_reports_occupant_and_waiters() {
        let service = service();
        admit(&service, 7, "u1");
        admit(&service, 7, "u2");
        admit(&service, 7, "u3");
        let app = routes(service);

        let response = app
            .oneshot(
                Request::get("/api/products/7/queue/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["data"]["occupied"], true);
        assert_eq!(json["data"]["occupant_id"], "u1");
        assert_eq!(json["data"]["waiting_count"], 2);
        assert_eq!(json["data"]["waiting_ids"], serde_json::json!(["u2", "u3"]));
    }

    #[tokio::test]
    async fn all_status_lists_known_products() {
        let service = service();
        admit(&service, 2, "u1");
        admit(&service, 1, "u2");
        admit(&service, 1, "u3");
        let app = routes(service);

        let response = app
            .oneshot(
                Request::get("/api/products/queue/all")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["success"], true);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["resource_key"], 1);
        assert_eq!(data[0]["waiting_count"], 1);
        assert_eq!(data[1]["resource_key"], 2);
        assert_eq!(data[1]["occupant_id"], "u1");
    }

    #[tokio::test]
    async fn status_rejects_non_numeric_product() {
        let app = routes(service());

        let response = app
            .oneshot(
                Request::get("/api/products/abc/queue/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_check_reports_version_and_delivery() {
        let service = service();
        admit(&service, 1, "u1");
        let app = routes(service);

        let response = app
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["status"], "READY");
        assert_eq!(json["version"]["viewgate"], crate::VIEWGATE_VERSION);
        assert_eq!(json["resources"], 1);
        assert_eq!(json["delivery"]["delivered"], 2);
        assert_eq!(json["delivery"]["failed"], 0);
    }
}
