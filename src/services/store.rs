//! Data store seam: named collections of JSON records plus the credit ledger.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::security::rate_limit::iso_millis;
use crate::security::unix_millis;
use crate::services::ServiceError;

/// Outcome of crediting a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { balance: u64 },
    /// The payment id was already credited; balance unchanged.
    Duplicate { balance: u64 },
}

pub trait DataStore: Send + Sync {
    /// Insert `record` (an object) and return it with `id` and `created_at` set.
    fn insert<'a>(&'a self, collection: &'a str, record: Value)
        -> BoxFuture<'a, Result<Value, ServiceError>>;

    /// First record whose `field` equals `value`.
    fn find_one<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<Option<Value>, ServiceError>>;

    /// Merge `patch` into the record with `id`. `None` if no such record.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        patch: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Option<Value>, ServiceError>>;

    /// Merge `fields` into the first record whose `field` equals `value`, or
    /// insert a new record keyed that way. Concurrent upserts on one key
    /// never produce two records.
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a Value,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ServiceError>>;

    /// Remove the record with `id`. `false` if there was none.
    fn delete<'a>(&'a self, collection: &'a str, id: &'a str)
        -> BoxFuture<'a, Result<bool, ServiceError>>;

    /// Liveness check used by the health route.
    fn ping(&self) -> BoxFuture<'_, Result<(), ServiceError>>;

    /// Credit `credits` to `user_id` once per `payment_id`.
    fn add_credits<'a>(
        &'a self,
        user_id: Uuid,
        credits: u32,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<CreditOutcome, ServiceError>>;
}

#[derive(Debug, Default)]
pub struct MemoryDataStore {
    collections: DashMap<String, Vec<Value>>,
    balances: DashMap<Uuid, u64>,
    credited_payments: DashMap<String, Uuid>,
    unavailable: AtomicBool,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` (health check tests).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    pub fn balance(&self, user_id: Uuid) -> u64 {
        self.balances.get(&user_id).map(|b| *b).unwrap_or(0)
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(ServiceError::Unavailable("data store offline".to_string()));
        }
        Ok(())
    }
}

impl DataStore for MemoryDataStore {
    fn insert<'a>(
        &'a self,
        collection: &'a str,
        record: Value,
    ) -> BoxFuture<'a, Result<Value, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let Value::Object(mut fields) = record else {
                return Err(ServiceError::Backend("record must be an object".to_string()));
            };
            stamp(&mut fields);

            let record = Value::Object(fields);
            self.collections
                .entry(collection.to_string())
                .or_default()
                .push(record.clone());
            Ok(record)
        })
    }

    fn find_one<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<Option<Value>, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self.collections.get(collection).and_then(|records| {
                records
                    .iter()
                    .find(|r| r.get(field) == Some(value))
                    .cloned()
            }))
        })
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        patch: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Option<Value>, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let Some(mut records) = self.collections.get_mut(collection) else {
                return Ok(None);
            };
            let Some(Value::Object(fields)) = records
                .iter_mut()
                .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            else {
                return Ok(None);
            };
            fields.extend(patch);
            Ok(Some(Value::Object(fields.clone())))
        })
    }

    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: &'a Value,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            // Holding the collection entry serializes upserts on it.
            let mut records = self.collections.entry(collection.to_string()).or_default();
            if let Some(Value::Object(existing)) =
                records.iter_mut().find(|r| r.get(field) == Some(value))
            {
                existing.extend(fields);
                return Ok(Value::Object(existing.clone()));
            }

            let mut record = fields;
            record.insert(field.to_string(), value.clone());
            stamp(&mut record);
            let record = Value::Object(record);
            records.push(record.clone());
            Ok(record)
        })
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<bool, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            let Some(mut records) = self.collections.get_mut(collection) else {
                return Ok(false);
            };
            let before = records.len();
            records.retain(|r| r.get("id").and_then(Value::as_str) != Some(id));
            Ok(records.len() < before)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move { self.ensure_available() })
    }

    fn add_credits<'a>(
        &'a self,
        user_id: Uuid,
        credits: u32,
        payment_id: &'a str,
    ) -> BoxFuture<'a, Result<CreditOutcome, ServiceError>> {
        Box::pin(async move {
            self.ensure_available()?;
            // The entry guard serializes concurrent deliveries of one payment.
            match self.credited_payments.entry(payment_id.to_string()) {
                Entry::Occupied(_) => Ok(CreditOutcome::Duplicate {
                    balance: self.balance(user_id),
                }),
                Entry::Vacant(slot) => {
                    slot.insert(user_id);
                    let mut balance = self.balances.entry(user_id).or_insert(0);
                    *balance = balance.saturating_add(u64::from(credits));
                    Ok(CreditOutcome::Applied { balance: *balance })
                }
            }
        })
    }
}

/// Assign `id` and `created_at` to a new record.
fn stamp(fields: &mut Map<String, Value>) {
    fields.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    fields.insert("created_at".to_string(), Value::String(iso_millis(unix_millis())));
}
