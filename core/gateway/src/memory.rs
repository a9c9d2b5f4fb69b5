//! In-memory remote for testing.
//!
//! Behaves like the REST backend: rows are kept as JSON, the server stamps
//! `createdAt`/`updatedAt`, and missing rows answer 404. Availability,
//! per-id and per-listing failures and latency can be injected.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use goalpost_common::{
    timestamp_now, EntityId, EntityKind, Error, Fields, GoalOrder, RemoteRow, Result,
};

use crate::gateway::RemoteGateway;

/// One call received by a `MemoryGateway`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Health,
    List(EntityKind),
    Get(EntityKind, EntityId),
    Create(EntityKind, EntityId),
    Update(EntityKind, EntityId),
    Delete(EntityKind, EntityId),
    Reorder(usize),
}

impl GatewayCall {
    /// True for calls that change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GatewayCall::Create(..)
                | GatewayCall::Update(..)
                | GatewayCall::Delete(..)
                | GatewayCall::Reorder(_)
        )
    }
}

impl fmt::Display for GatewayCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayCall::Health => write!(f, "GET /health"),
            GatewayCall::List(kind) => write!(f, "GET /{}", kind.collection()),
            GatewayCall::Get(kind, id) => write!(f, "GET /{}/{id}", kind.collection()),
            GatewayCall::Create(kind, _) => write!(f, "POST /{}", kind.collection()),
            GatewayCall::Update(kind, id) => write!(f, "PUT /{}/{id}", kind.collection()),
            GatewayCall::Delete(kind, id) => write!(f, "DELETE /{}/{id}", kind.collection()),
            GatewayCall::Reorder(_) => write!(f, "POST /goals/reorder"),
        }
    }
}

type Rows = BTreeMap<EntityId, Value>;

/// In-memory remote gateway.
pub struct MemoryGateway {
    rows: Mutex<HashMap<EntityKind, Rows>>,
    calls: Mutex<Vec<GatewayCall>>,
    failing: Mutex<HashSet<EntityId>>,
    failing_lists: Mutex<HashSet<EntityKind>>,
    latency: Mutex<Duration>,
    available: AtomicBool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create an empty, reachable remote.
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            failing_lists: Mutex::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
            available: AtomicBool::new(true),
        }
    }

    /// Make the remote reachable or not.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail every call that targets `id` with a 500.
    pub fn fail_calls_for(&self, id: &EntityId) {
        lock(&self.failing).insert(id.clone());
    }

    /// Fail every listing of `kind` with a 500.
    pub fn fail_listing(&self, kind: EntityKind) {
        lock(&self.failing_lists).insert(kind);
    }

    /// Stop every injected failure.
    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
        lock(&self.failing_lists).clear();
    }

    /// Delay every call except the health probe by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Seed a remote row as if another client had created it.
    pub fn insert_remote<F: Fields>(&self, row: RemoteRow<F>) {
        let now = timestamp_now();
        let mut value = serde_json::to_value(&row).unwrap_or(Value::Null);
        if let Some(object) = value.as_object_mut() {
            stamp(object, "createdAt", row.created_at.unwrap_or(now));
            stamp(object, "updatedAt", row.updated_at.unwrap_or(now));
        }
        lock(&self.rows)
            .entry(F::KIND)
            .or_default()
            .insert(row.id, value);
    }

    /// Delete a remote row as if another client had deleted it.
    pub fn remove_remote(&self, kind: EntityKind, id: &EntityId) -> bool {
        lock(&self.rows)
            .get_mut(&kind)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Current remote copy of a row.
    pub fn remote_row<F: Fields>(&self, id: &EntityId) -> Option<RemoteRow<F>> {
        lock(&self.rows)
            .get(&F::KIND)
            .and_then(|rows| rows.get(id))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Number of remote rows of `kind`.
    pub fn row_count(&self, kind: EntityKind) -> usize {
        lock(&self.rows).get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Number of create, update, delete and reorder calls received.
    pub fn mutation_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_mutation()).count()
    }

    /// Record the call, apply latency, then check availability and failures.
    async fn enter(&self, call: GatewayCall, id: Option<&EntityId>) -> Result<()> {
        lock(&self.calls).push(call.clone());

        let latency = *lock(&self.latency);
        if call != GatewayCall::Health && !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable(format!("{call}: connection refused")));
        }
        if let GatewayCall::List(kind) = &call {
            if lock(&self.failing_lists).contains(kind) {
                return Err(Error::gateway(Some(500), format!("{call}: injected failure")));
            }
        }
        if let Some(id) = id {
            if lock(&self.failing).contains(id) {
                return Err(Error::gateway(Some(500), format!("{call}: injected failure")));
            }
        }
        Ok(())
    }
}

/// Lock a mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn stamp(object: &mut Map<String, Value>, key: &str, at: chrono::DateTime<chrono::Utc>) {
    object.insert(key.to_string(), Value::String(at.to_rfc3339()));
}

fn not_found(kind: EntityKind, id: &EntityId) -> Error {
    Error::gateway(Some(404), format!("{kind} {id} not found"))
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn health(&self) -> Result<()> {
        self.enter(GatewayCall::Health, None).await
    }

    async fn list_all<F: Fields>(&self) -> Result<Vec<RemoteRow<F>>> {
        self.enter(GatewayCall::List(F::KIND), None).await?;
        let values: Vec<Value> = lock(&self.rows)
            .get(&F::KIND)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .collect()
    }

    async fn get<F: Fields>(&self, id: &EntityId) -> Result<Option<RemoteRow<F>>> {
        self.enter(GatewayCall::Get(F::KIND, id.clone()), Some(id))
            .await?;
        Ok(self.remote_row(id))
    }

    async fn create<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<EntityId> {
        self.enter(GatewayCall::Create(F::KIND, id.clone()), Some(id))
            .await?;
        let mut value = serde_json::to_value(fields)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::gateway(Some(400), "body must be an object"))?;
        let now = timestamp_now();
        object.insert("id".to_string(), serde_json::to_value(id)?);
        stamp(object, "createdAt", now);
        stamp(object, "updatedAt", now);

        lock(&self.rows)
            .entry(F::KIND)
            .or_default()
            .insert(id.clone(), value);
        Ok(id.clone())
    }

    async fn update<F: Fields>(&self, id: &EntityId, fields: &F) -> Result<()> {
        self.enter(GatewayCall::Update(F::KIND, id.clone()), Some(id))
            .await?;
        let mut rows = lock(&self.rows);
        let existing = rows
            .get_mut(&F::KIND)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| not_found(F::KIND, id))?;

        let created_at = existing.get("createdAt").cloned();
        let mut value = serde_json::to_value(fields)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("id".to_string(), serde_json::to_value(id)?);
            if let Some(created_at) = created_at {
                object.insert("createdAt".to_string(), created_at);
            }
            stamp(object, "updatedAt", timestamp_now());
        }
        *existing = value;
        Ok(())
    }

    async fn delete<F: Fields>(&self, id: &EntityId) -> Result<()> {
        self.enter(GatewayCall::Delete(F::KIND, id.clone()), Some(id))
            .await?;
        if self.remove_remote(F::KIND, id) {
            Ok(())
        } else {
            Err(not_found(F::KIND, id))
        }
    }

    async fn reorder_goals(&self, orders: &[GoalOrder]) -> Result<()> {
        self.enter(GatewayCall::Reorder(orders.len()), None).await?;
        let mut rows = lock(&self.rows);
        let goals = rows.entry(EntityKind::Goal).or_default();
        for entry in orders {
            let row = goals
                .get_mut(&entry.id)
                .ok_or_else(|| not_found(EntityKind::Goal, &entry.id))?;
            row["order"] = Value::from(entry.order);
        }
        Ok(())
    }
}
