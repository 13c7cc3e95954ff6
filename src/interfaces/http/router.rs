//! HTTP router with Swagger UI

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::health::{self, HealthResponse, HealthState};
use super::metrics::{http_metrics_middleware, prometheus_metrics, MetricsState};
use crate::auth::TokenVerifier;
use crate::interfaces::ws::{self, SharedHub, SubscriberState};
use crate::support::shutdown::ShutdownSignal;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        ws::subscriber::ws_subscriber_handler,
    ),
    components(schemas(HealthResponse)),
    tags(
        (name = "Health", description = "Server health check endpoints"),
        (name = "WebSocket Notifications", description = "Tenant-scoped change notifications via WebSocket"),
    ),
    info(
        title = "CSMS Realtime Notifications",
        version = "1.0.0",
        description = "Tenant-scoped, deduplicated change notifications for CSMS front-ends",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Everything the HTTP surface needs
#[derive(Clone)]
pub struct RouterState {
    pub hub: SharedHub,
    pub verifier: Arc<dyn TokenVerifier>,
    pub shutdown: ShutdownSignal,
    /// `None` leaves `/metrics` unrouted
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Arc<Instant>,
}

/// Create the router with all routes
pub fn create_router(state: RouterState) -> Router {
    let notification_routes = Router::new()
        .route("/ws", get(ws::ws_subscriber_handler))
        .with_state(SubscriberState {
            hub: state.hub.clone(),
            verifier: state.verifier,
            shutdown: state.shutdown,
        });

    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .with_state(HealthState {
            hub: state.hub,
            started_at: state.started_at,
        });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(health_routes)
        .nest("/notifications", notification_routes);

    if let Some(handle) = state.metrics {
        router = router.merge(
            Router::new()
                .route("/metrics", get(prometheus_metrics))
                .with_state(MetricsState { handle }),
        );
    }

    router
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError, Message};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{create_token, JwtConfig, JwtTenantVerifier};
    use crate::domain::notification::{Action, NotificationData, NotificationKind};
    use crate::interfaces::ws::{HubConfig, TenantBroadcastHub};

    fn jwt() -> JwtConfig {
        JwtConfig {
            secret: "router-secret".into(),
            expiration_hours: 1,
            issuer: "csms-realtime".into(),
        }
    }

    fn state(hub: SharedHub) -> RouterState {
        RouterState {
            hub,
            verifier: Arc::new(JwtTenantVerifier::new(jwt())),
            shutdown: ShutdownSignal::new(),
            metrics: None,
            started_at: Arc::new(Instant::now()),
        }
    }

    fn token(tenant: Option<&str>) -> String {
        create_token("U1", tenant, &jwt()).unwrap()
    }

    async fn serve(state: RouterState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn wait_for_room(hub: &SharedHub, tenant: &str, size: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.room_size(tenant) != size {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn health_reports_hub_counters() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let _subscriber = hub.join("t");
        hub.notifier().notify_company("t", Action::Create, NotificationData::new("C1"));

        let response = create_router(state(hub))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["subscribers"], 1);
        assert_eq!(json["tenants"], 1);
        assert_eq!(json["pending_list_changes"], 1);
        assert_eq!(json["pending_single_changes"], 1);
    }

    #[tokio::test]
    async fn subscriber_without_token_is_unauthorized() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let response = create_router(state(hub.clone()))
            .oneshot(Request::get("/notifications/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_with_tenantless_token_is_unauthorized() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let uri = format!("/notifications/ws?token={}", token(None));
        let response = create_router(state(hub))
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn metrics_route_only_exists_with_a_handle() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let response = create_router(state(hub.clone()))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let with_metrics = RouterState {
            metrics: Some(recorder.handle()),
            ..state(hub)
        };
        let response = create_router(with_metrics)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn upgrade_is_refused_for_bad_token() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let addr = serve(state(hub)).await;

        let result = tokio_tungstenite::connect_async(format!("ws://{addr}/notifications/ws?token=garbage")).await;
        match result {
            Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
            Err(e) => panic!("expected 401, got {e}"),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }

    #[tokio::test]
    async fn subscribers_only_receive_their_tenant() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let addr = serve(state(hub.clone())).await;

        let (mut a, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/notifications/ws?token={}",
            token(Some("tenantA"))
        ))
        .await
        .unwrap();

        let mut request = format!("ws://{addr}/notifications/ws").into_client_request().unwrap();
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token(Some("tenantB"))).parse().unwrap(),
        );
        let (mut b, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        wait_for_room(&hub, "tenantA", 1).await;
        wait_for_room(&hub, "tenantB", 1).await;

        let notifier = hub.notifier();
        notifier.notify_transaction("tenantA", Action::Update, NotificationData::new("42"));
        notifier.notify_transaction("tenantB", Action::Delete, NotificationData::new("7"));
        hub.flush(NotificationKind::Single);

        for (socket, tenant, id) in [(&mut a, "tenantA", "42"), (&mut b, "tenantB", "7")] {
            let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let json: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(json["event"], "Transaction");
            assert_eq!(json["data"]["tenantID"], tenant);
            assert_eq!(json["data"]["data"]["id"], id);
        }

        // Nothing else was queued for either socket
        assert!(tokio::time::timeout(Duration::from_millis(100), a.next()).await.is_err());
        assert!(tokio::time::timeout(Duration::from_millis(100), b.next()).await.is_err());
    }

    #[tokio::test]
    async fn ping_is_answered_and_close_leaves_room() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let addr = serve(state(hub.clone())).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/notifications/ws?token={}",
            token(Some("t"))
        ))
        .await
        .unwrap();
        wait_for_room(&hub, "t", 1).await;

        socket.send(Message::Ping(b"hi".to_vec())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::Pong(b"hi".to_vec()));

        socket.close(None).await.unwrap();
        wait_for_room(&hub, "t", 0).await;
        assert_eq!(hub.tenant_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriber_sockets() {
        let hub = TenantBroadcastHub::shared(HubConfig::default());
        let router_state = state(hub.clone());
        let shutdown = router_state.shutdown.clone();
        let addr = serve(router_state).await;
        let (mut socket, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/notifications/ws?token={}",
            token(Some("t"))
        ))
        .await
        .unwrap();
        wait_for_room(&hub, "t", 1).await;

        shutdown.trigger();
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match frame {
            Message::Close(Some(close)) => {
                assert_eq!(u16::from(close.code), 1001);
                assert_eq!(close.reason, "server shutdown");
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
        wait_for_room(&hub, "t", 0).await;
    }
}
