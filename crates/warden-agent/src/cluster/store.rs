//! Safety configuration resource store.
//!
//! Resources carry a version that is bumped on every write. Status patches
//! name the version they were computed from and fail with a conflict if
//! another writer got there first.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use warden_common::constants::redis_keys;
use warden_common::{ConfigSpec, ConfigStatus, Result, SafetyConfigResource, WardenError};

use super::{redis_err, with_deadline};

/// Access to the cluster-visible safety configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch a resource by name
    async fn get(&self, name: &str) -> Result<Option<SafetyConfigResource>>;

    /// List all resources
    async fn list(&self) -> Result<Vec<SafetyConfigResource>>;

    /// Insert the resource if no resource with that name exists.
    /// Returns true if it was created.
    async fn create(&self, resource: SafetyConfigResource) -> Result<bool>;

    /// Replace the status, provided the stored version still equals
    /// `expected_version`. Returns the updated resource.
    async fn patch_status(
        &self,
        name: &str,
        expected_version: u64,
        status: ConfigStatus,
    ) -> Result<SafetyConfigResource>;
}

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'spec', ARGV[1], 'status', ARGV[2], 'version', 1)
redis.call('SADD', KEYS[2], ARGV[3])
return 1
"#;

const PATCH_STATUS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
  return {-1, 0}
end
if current ~= ARGV[1] then
  return {0, tonumber(current)}
end
local next = tonumber(current) + 1
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'version', next)
return {1, next}
"#;

/// Store backed by one Redis hash per resource (`spec`, `status`, `version`)
#[derive(Clone)]
pub struct RedisConfigStore {
    redis: ConnectionManager,
    timeout: Duration,
}

impl RedisConfigStore {
    pub fn new(redis: ConnectionManager, timeout: Duration) -> Self {
        Self { redis, timeout }
    }

    fn key(name: &str) -> String {
        format!("{}{}", redis_keys::CONFIG_PREFIX, name)
    }

    fn decode(name: &str, fields: HashMap<String, String>) -> Result<Option<SafetyConfigResource>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let spec: ConfigSpec = match fields.get("spec") {
            Some(data) => serde_json::from_str(data)?,
            None => ConfigSpec::default(),
        };
        let status: ConfigStatus = match fields.get("status") {
            Some(data) => serde_json::from_str(data)?,
            None => ConfigStatus::default(),
        };
        let version = fields
            .get("version")
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| WardenError::Store(format!("invalid version for {name}: {e}")))?
            .unwrap_or_default();

        Ok(Some(SafetyConfigResource {
            name: name.to_string(),
            version,
            spec,
            status,
        }))
    }
}

#[async_trait]
impl ConfigStore for RedisConfigStore {
    async fn get(&self, name: &str) -> Result<Option<SafetyConfigResource>> {
        let mut conn = self.redis.clone();
        let key = Self::key(name);

        let fields: HashMap<String, String> = with_deadline(self.timeout, "config get", async move {
            conn.hgetall(&key).await.map_err(redis_err)
        })
        .await?;

        Self::decode(name, fields)
    }

    async fn list(&self) -> Result<Vec<SafetyConfigResource>> {
        let mut conn = self.redis.clone();
        let mut names: Vec<String> = with_deadline(self.timeout, "config list", async move {
            conn.smembers(redis_keys::CONFIG_INDEX).await.map_err(redis_err)
        })
        .await?;
        names.sort();

        let mut resources = Vec::with_capacity(names.len());
        for name in names {
            if let Some(resource) = self.get(&name).await? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    async fn create(&self, resource: SafetyConfigResource) -> Result<bool> {
        let spec = serde_json::to_string(&resource.spec)?;
        let status = serde_json::to_string(&resource.status)?;
        let mut conn = self.redis.clone();
        let key = Self::key(&resource.name);
        let name = resource.name.clone();

        let created: i64 = with_deadline(self.timeout, "config create", async move {
            let script = redis::Script::new(CREATE_SCRIPT);
            script
                .key(&key)
                .key(redis_keys::CONFIG_INDEX)
                .arg(spec)
                .arg(status)
                .arg(&name)
                .invoke_async(&mut conn)
                .await
                .map_err(redis_err)
        })
        .await?;

        Ok(created == 1)
    }

    async fn patch_status(
        &self,
        name: &str,
        expected_version: u64,
        status: ConfigStatus,
    ) -> Result<SafetyConfigResource> {
        let data = serde_json::to_string(&status)?;
        let mut conn = self.redis.clone();
        let key = Self::key(name);

        let reply: Vec<i64> = with_deadline(self.timeout, "config patch status", async move {
            let script = redis::Script::new(PATCH_STATUS_SCRIPT);
            script
                .key(&key)
                .arg(expected_version.to_string())
                .arg(data)
                .invoke_async(&mut conn)
                .await
                .map_err(redis_err)
        })
        .await?;

        match reply.as_slice() {
            [1, _] => self
                .get(name)
                .await?
                .ok_or_else(|| WardenError::ConfigNotFound(name.to_string())),
            [0, found] => Err(WardenError::Conflict {
                name: name.to_string(),
                expected: expected_version,
                found: u64::try_from(*found).unwrap_or_default(),
            }),
            [-1, _] => Err(WardenError::ConfigNotFound(name.to_string())),
            other => Err(WardenError::Store(format!(
                "unexpected patch reply for {name}: {other:?}"
            ))),
        }
    }
}

/// In-memory store with the same versioning rules
#[derive(Default)]
pub struct MemoryConfigStore {
    resources: RwLock<BTreeMap<String, SafetyConfigResource>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a resource as-is, bypassing version checks
    pub fn replace(&self, resource: SafetyConfigResource) {
        self.resources.write().insert(resource.name.clone(), resource);
    }

    /// Current copy of a resource
    pub fn snapshot(&self, name: &str) -> Option<SafetyConfigResource> {
        self.resources.read().get(name).cloned()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, name: &str) -> Result<Option<SafetyConfigResource>> {
        Ok(self.snapshot(name))
    }

    async fn list(&self) -> Result<Vec<SafetyConfigResource>> {
        Ok(self.resources.read().values().cloned().collect())
    }

    async fn create(&self, mut resource: SafetyConfigResource) -> Result<bool> {
        let mut resources = self.resources.write();
        if resources.contains_key(&resource.name) {
            return Ok(false);
        }
        resource.version = 1;
        resources.insert(resource.name.clone(), resource);
        Ok(true)
    }

    async fn patch_status(
        &self,
        name: &str,
        expected_version: u64,
        status: ConfigStatus,
    ) -> Result<SafetyConfigResource> {
        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(name)
            .ok_or_else(|| WardenError::ConfigNotFound(name.to_string()))?;

        if resource.version != expected_version {
            return Err(WardenError::Conflict {
                name: name.to_string(),
                expected: expected_version,
                found: resource.version,
            });
        }

        resource.status = status;
        resource.version += 1;
        Ok(resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = MemoryConfigStore::new();
        assert!(store.create(SafetyConfigResource::default_named("warden-config")).await.unwrap());
        assert!(!store.create(SafetyConfigResource::default_named("warden-config")).await.unwrap());

        let res = store.get("warden-config").await.unwrap().unwrap();
        assert_eq!(res.version, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patch_status_bumps_version() {
        let store = MemoryConfigStore::new();
        store.create(SafetyConfigResource::default_named("warden-config")).await.unwrap();

        let status = ConfigStatus {
            min_safe_time_to_assume_node_rebooted_seconds: 120,
            ..Default::default()
        };
        let updated = store.patch_status("warden-config", 1, status).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status.min_safe_time_to_assume_node_rebooted_seconds, 120);
    }

    #[tokio::test]
    async fn test_stale_patch_conflicts() {
        let store = MemoryConfigStore::new();
        store.create(SafetyConfigResource::default_named("warden-config")).await.unwrap();
        store
            .patch_status("warden-config", 1, ConfigStatus::default())
            .await
            .unwrap();

        let err = store
            .patch_status("warden-config", 1, ConfigStatus::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Conflict { expected: 1, found: 2, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_patch_missing_resource() {
        let store = MemoryConfigStore::new();
        let err = store
            .patch_status("nope", 0, ConfigStatus::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::ConfigNotFound(_)));
    }

    #[test]
    fn test_decode_redis_fields() {
        let mut fields = HashMap::new();
        fields.insert("version".to_string(), "4".to_string());
        fields.insert(
            "status".to_string(),
            r#"{"min_safe_time_to_assume_node_rebooted_seconds":95}"#.to_string(),
        );

        let res = RedisConfigStore::decode("warden-config", fields).unwrap().unwrap();
        assert_eq!(res.version, 4);
        assert_eq!(res.status.min_safe_time_to_assume_node_rebooted_seconds, 95);
        assert_eq!(res.spec, ConfigSpec::default());

        assert!(RedisConfigStore::decode("warden-config", HashMap::new()).unwrap().is_none());
    }
}
