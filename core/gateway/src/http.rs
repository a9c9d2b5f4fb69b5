//! REST gateway over reqwest.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use goalpost_common::{EntityId, Error, Fields, GoalOrder, RemoteRow, Result};

use crate::gateway::RemoteGateway;

/// API prefix shared by every endpoint.
const API_PREFIX: &str = "api/v1";

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend root, e.g. `http://localhost:3000`. Empty means not configured.
    pub base_url: String,
    /// Per-request timeout.
    #[serde(with = "goalpost_common::duration_secs")]
    pub request_timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(10),
            user_agent: "Goalpost/0.1".to_string(),
        }
    }
}

/// Response wrapper used by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn failure_message(&self) -> Option<String> {
        self.error.clone().or_else(|| self.message.clone())
    }
}

/// Minimal view of a created row.
#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: EntityId,
}

#[derive(Debug, Serialize)]
struct ReorderRequest<'a> {
    orders: &'a [GoalOrder],
}

/// Gateway speaking the backend's REST contract.
pub struct HttpGateway {
    http: Client,
    base_url: Arc<RwLock<String>>,
}

impl HttpGateway {
    /// Create a new gateway.
    ///
    /// # Errors
    /// - `InvalidInput` if `base_url` is not a valid http(s) URL
    /// - `TransportUnavailable` if the HTTP client cannot be built
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let base_url = normalize_base_url(&config.base_url)?;
        let http = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                Error::TransportUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: Arc::new(RwLock::new(base_url)),
        })
    }

    /// Current backend root.
    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_default()
    }

    /// Point the gateway at a different backend. Takes effect on the next call.
    ///
    /// An empty string unconfigures the gateway; every call then fails with
    /// `TransportUnavailable`.
    ///
    /// # Errors
    /// - `InvalidInput` if `base_url` is not a valid http(s) URL
    pub fn set_base_url(&self, base_url: &str) -> Result<()> {
        let normalized = normalize_base_url(base_url)?;
        let mut current = self
            .base_url
            .write()
            .map_err(|_| Error::Storage("base URL lock poisoned".to_string()))?;
        debug!("Backend base URL set to {:?}", normalized);
        *current = normalized;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        let base = self.base_url();
        if base.is_empty() {
            return Err(Error::TransportUnavailable(
                "Backend base URL not configured".to_string(),
            ));
        }
        Ok(format!("{base}/{API_PREFIX}/{path}"))
    }

    fn collection<F: Fields>() -> &'static str {
        F::KIND.collection()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.endpoint(path)?))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                Error::TransportUnavailable(format!("Failed to {what}: {e}"))
            } else {
                Error::gateway(e.status().map(|s| s.as_u16()), format!("Failed to {what}: {e}"))
            }
        })
    }

    /// Decode an envelope, mapping non-2xx and `success: false` to errors.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<Option<T>> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::gateway(Some(status.as_u16()), format!("Failed to read body: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.failure_message())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(Error::gateway(Some(status.as_u16()), message));
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            Error::gateway(Some(status.as_u16()), format!("Failed to parse response: {e}"))
        })?;

        if envelope.success == Some(false) {
            let message = envelope
                .failure_message()
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(Error::gateway(Some(status.as_u16()), message));
        }

        Ok(envelope.data)
    }
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| Error::InvalidInput(format!("Invalid backend URL {trimmed:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "Backend URL must be http or https: {trimmed}"
        )));
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn health(&self) -> Result<()> {
        let request = self.request(Method::GET, "health")?;
        let response = self.send(request, "probe health").await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::gateway(Some(status.as_u16()), "health check failed"))
        }
    }

    async fn list_all<F: Fields>(&self) -> Result<Vec<RemoteRow<F>>> {
        let collection = Self::collection::<F>();
        let request = self.request(Method::GET, collection)?;
        let response = self.send(request, &format!("list {collection}")).await?;
        let rows: Option<Vec<RemoteRow<F>>> = self.handle_response(response).await?;
        Ok(rows.unwrap_or_default())
    }

    async fn get<F: Fields>(&self, id: &EntityId) -> Result<Option<RemoteRow<F>>> {
        let path = format!("{}/{id}", Self::collection::<F>());
        let request = self.request(Method::GET, &path)?;
        let response = self.send(request, &format!("get {path}")).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await
    }

    async fn create<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<EntityId> {
        let collection = Self::collection::<F>();
        let mut body = serde_json::to_value(fields)?;
        if let Some(object) = body.as_object_mut() {
            object.insert("id".to_string(), serde_json::to_value(id)?);
        }

        let request = self.request(Method::POST, collection)?.json(&body);
        let response = self.send(request, &format!("create {collection}/{id}")).await?;
        let created: Option<CreatedRow> = self.handle_response(response).await?;

        match created {
            Some(row) if &row.id != id => {
                warn!(
                    "Server stored {} {} under id {}; keeping local id",
                    F::KIND,
                    id,
                    row.id
                );
                Ok(row.id)
            }
            Some(row) => Ok(row.id),
            None => Ok(id.clone()),
        }
    }

    async fn update<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<()> {
        let path = format!("{}/{id}", Self::collection::<F>());
        let request = self.request(Method::PUT, &path)?.json(fields);
        let response = self.send(request, &format!("update {path}")).await?;
        let _: Option<serde_json::Value> = self.handle_response(response).await?;
        Ok(())
    }

    async fn delete<F: Fields>(&self, id: &EntityId) -> Result<()> {
        let path = format!("{}/{id}", Self::collection::<F>());
        let request = self.request(Method::DELETE, &path)?;
        let response = self.send(request, &format!("delete {path}")).await?;
        let _: Option<serde_json::Value> = self.handle_response(response).await?;
        Ok(())
    }

    async fn reorder_goals(&self, orders: &[GoalOrder]) -> Result<()> {
        let request = self
            .request(Method::POST, "goals/reorder")?
            .json(&ReorderRequest { orders });
        let response = self.send(request, "reorder goals").await?;
        let _: Option<serde_json::Value> = self.handle_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goalpost_common::{GoalFields, TodoFields};
    use httpmock::Method::{DELETE, GET, POST, PUT};
    use httpmock::MockServer;
    use serde_json::json;

    fn gateway_for(server: &MockServer) -> HttpGateway {
        HttpGateway::new(GatewayConfig {
            base_url: server.base_url(),
            ..GatewayConfig::default()
        })
        .unwrap()
    }

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn test_base_url_validation() {
        assert!(normalize_base_url("ftp://example.com").is_err());
        assert!(normalize_base_url("not a url").is_err());
        assert_eq!(normalize_base_url("  ").unwrap(), "");
        assert_eq!(
            normalize_base_url("http://localhost:3000/").unwrap(),
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_unavailable() {
        let gateway = HttpGateway::new(GatewayConfig::default()).unwrap();
        let err = gateway.health().await.unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let server = MockServer::start_async().await;
        let health = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/health");
                then.status(200).json_body(json!({ "status": "ok" }));
            })
            .await;

        gateway_for(&server).health().await.unwrap();
        health.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_all_parses_rows() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/goals");
                then.status(200).json_body(json!({
                    "success": true,
                    "data": [
                        { "id": "g1", "name": "Run", "order": 1, "updatedAt": "2024-05-01T08:00:00Z" },
                        { "id": "g2", "name": "Read", "order": 2, "userId": "u1" }
                    ]
                }));
            })
            .await;

        let rows: Vec<RemoteRow<GoalFields>> = gateway_for(&server).list_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields.name, "Run");
        assert!(rows[0].updated_at.is_some());
        assert!(rows[1].updated_at.is_none());
    }

    #[tokio::test]
    async fn test_create_sends_id_and_domain_fields_only() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/todos")
                    .json_body_partial(r#"{ "id": "td1", "title": "Call mom" }"#);
                then.status(201).json_body(json!({
                    "success": true,
                    "data": { "id": "td1", "title": "Call mom" }
                }));
            })
            .await;
        let leaked_meta = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/todos")
                    .body_contains("syncStatus");
                then.status(400);
            })
            .await;

        let created = gateway_for(&server)
            .create(&id("td1"), &TodoFields::new("Call mom"))
            .await
            .unwrap();
        assert_eq!(created, id("td1"));
        create.assert_async().await;
        assert_eq!(leaked_meta.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_success_false_is_gateway_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/api/v1/goals/g1");
                then.status(200)
                    .json_body(json!({ "success": false, "error": "validation failed" }));
            })
            .await;

        let err = gateway_for(&server)
            .update(&id("g1"), &GoalFields::new("Run"))
            .await
            .unwrap_err();
        match err {
            Error::Gateway { status, message } => {
                assert_eq!(status, Some(200));
                assert_eq!(message, "validation failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_2xx_carries_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/api/v1/goals/g1");
                then.status(404)
                    .json_body(json!({ "success": false, "error": "Goal not found" }));
            })
            .await;

        let err = gateway_for(&server)
            .delete::<GoalFields>(&id("g1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/goals/g9");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/goals/g8");
                then.status(200).json_body(json!({ "success": true, "data": null }));
            })
            .await;

        let gateway = gateway_for(&server);
        assert!(gateway.get::<GoalFields>(&id("g9")).await.unwrap().is_none());
        assert!(gateway.get::<GoalFields>(&id("g8")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reorder_posts_orders() {
        let server = MockServer::start_async().await;
        let reorder = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/goals/reorder")
                    .json_body(json!({ "orders": [{ "id": "b", "order": 1 }, { "id": "a", "order": 2 }] }));
                then.status(200).json_body(json!({ "success": true }));
            })
            .await;

        let orders = [
            GoalOrder { id: id("b"), order: 1 },
            GoalOrder { id: id("a"), order: 2 },
        ];
        gateway_for(&server).reorder_goals(&orders).await.unwrap();
        reorder.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_base_url_at_runtime() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/health");
                then.status(200);
            })
            .await;

        let gateway = HttpGateway::new(GatewayConfig::default()).unwrap();
        assert!(gateway.health().await.is_err());

        gateway.set_base_url(&server.base_url()).unwrap();
        gateway.health().await.unwrap();

        gateway.set_base_url("").unwrap();
        assert!(matches!(
            gateway.health().await.unwrap_err(),
            Error::TransportUnavailable(_)
        ));
    }
}
