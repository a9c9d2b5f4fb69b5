//! Remote gateway trait definition.

use async_trait::async_trait;

use goalpost_common::{EntityId, Fields, GoalOrder, RemoteRow, Result};

/// Transport to the remote store.
///
/// Pure transport: no retries and no interpretation of responses beyond
/// success or failure. Any non-2xx answer or transport failure surfaces as
/// `Error::Gateway` or `Error::TransportUnavailable`.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Probe the health endpoint.
    ///
    /// # Errors
    /// - `TransportUnavailable` if the service cannot be reached
    async fn health(&self) -> Result<()>;

    /// List every remote row of kind `F`.
    async fn list_all<F: Fields>(&self) -> Result<Vec<RemoteRow<F>>>;

    /// Fetch one remote row. `None` when the remote has no such row.
    async fn get<F: Fields>(&self, id: &EntityId) -> Result<Option<RemoteRow<F>>>;

    /// Create a row under the client-chosen `id`.
    ///
    /// Returns the id the server stored the row under.
    async fn create<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<EntityId>;

    /// Replace the domain fields of an existing row.
    ///
    /// # Errors
    /// - `Gateway` with status 404 if the remote row is gone
    async fn update<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<()>;

    /// Delete a row.
    ///
    /// # Errors
    /// - `Gateway` with status 404 if the remote row is already gone
    async fn delete<F: Fields>(&self, id: &EntityId) -> Result<()>;

    /// Push a complete goal ranking.
    async fn reorder_goals(&self, orders: &[GoalOrder]) -> Result<()>;
}
