//! Backing-store capacity and quota.
//!
//! The backing store reports capacity through a directory quota: total size
//! (GiB) and file count of the first per-user entry of the first directory
//! entry. Used/free bytes are not reported by the service and read as zero.

mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::api::{MountSpec, RuntimeRef};
use crate::cluster::RuntimeStore;
use crate::error::{log_error_except_conflict, EngineError, EngineResult};
use crate::values::parse_quantity;

pub use http::HttpQuotaClient;

pub const BYTES_PER_GIB: i64 = 1 << 30;

/// Scheme prefix of backing-store mount points.
pub const EAC_MOUNT_SCHEME: &str = "eac://";

/// Location of, and credentials for, the backing-store directory.
///
/// `Debug` never prints the credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: String,
    pub service_addr: String,
    pub file_system_id: String,
    pub dir_path: String,
    pub access_key_id: String,
    pub access_key_secret: String,
}

impl MountInfo {
    /// Parse `eac://<fsid>-<suffix>.<region>.<domain>:<dir>` plus credentials.
    pub fn from_mount(spec: &MountSpec) -> EngineResult<Self> {
        let invalid = |reason: &str| EngineError::InvalidMountPoint {
            mount_point: spec.mount_point.clone(),
            reason: reason.to_string(),
        };

        let rest = spec
            .mount_point
            .strip_prefix(EAC_MOUNT_SCHEME)
            .ok_or_else(|| invalid("missing eac:// scheme"))?;
        let (host, dir_path) = rest
            .split_once(':')
            .ok_or_else(|| invalid("expected <host>:<path>"))?;
        if dir_path.is_empty() {
            return Err(invalid("empty directory path"));
        }

        let mut labels = host.split('.');
        let first = labels.next().unwrap_or_default();
        let service_addr = labels.next().unwrap_or_default();
        let file_system_id = first.split('-').next().unwrap_or_default();
        if file_system_id.is_empty() || service_addr.is_empty() {
            return Err(invalid("host must look like <fsid>-<suffix>.<region>.<domain>"));
        }

        Ok(Self {
            mount_point: rest.to_string(),
            service_addr: service_addr.to_string(),
            file_system_id: file_system_id.to_string(),
            dir_path: dir_path.to_string(),
            access_key_id: spec.access_key_id.clone(),
            access_key_secret: spec.access_key_secret.clone(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_key_id.is_empty() && !self.access_key_secret.is_empty()
    }
}

impl fmt::Debug for MountInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountInfo")
            .field("mount_point", &self.mount_point)
            .field("service_addr", &self.service_addr)
            .field("file_system_id", &self.file_system_id)
            .field("dir_path", &self.dir_path)
            .field("access_key_id", &"<redacted>")
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeDirQuotasRequest {
    pub file_system_id: String,
    pub path: String,
}

impl DescribeDirQuotasRequest {
    pub fn for_mount(mount: &MountInfo) -> Self {
        Self {
            file_system_id: mount.file_system_id.clone(),
            path: mount.dir_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetDirQuotaRequest {
    pub file_system_id: String,
    pub path: String,
    pub user_type: String,
    pub quota_type: String,
}

impl SetDirQuotaRequest {
    /// Statistics-only quota covering all users of the directory.
    pub fn for_mount(mount: &MountInfo) -> Self {
        Self {
            file_system_id: mount.file_system_id.clone(),
            path: mount.dir_path.clone(),
            user_type: "AllUsers".to_string(),
            quota_type: "Statistic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeDirQuotasResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub dir_quota_infos: Vec<DirQuotaInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirQuotaInfo {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub user_quota_infos: Vec<UserQuotaInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserQuotaInfo {
    #[serde(default)]
    pub user_type: String,
    /// Directory size in GiB.
    #[serde(default)]
    pub size_real: i64,
    #[serde(default)]
    pub file_count_real: i64,
}

impl DescribeDirQuotasResponse {
    /// The first per-user entry of the first directory entry.
    pub fn first_user_quota(&self) -> EngineResult<&UserQuotaInfo> {
        let dir = self.dir_quota_infos.first().ok_or_else(|| {
            EngineError::MalformedResponse(
                "invalid DescribeDirQuotasResponse size: no DirQuotaInfos".to_string(),
            )
        })?;
        dir.user_quota_infos.first().ok_or_else(|| {
            EngineError::MalformedResponse(
                "invalid DescribeDirQuotasResponse size: no UserQuotaInfos in DirQuotaInfos[0]"
                    .to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetDirQuotaResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub success: bool,
}

/// The backing store's quota service.
#[async_trait]
pub trait QuotaClient: Send + Sync {
    async fn describe_dir_quotas(&self, mount: &MountInfo) -> EngineResult<DescribeDirQuotasResponse>;

    async fn set_dir_quota(&self, mount: &MountInfo) -> EngineResult<SetDirQuotaResponse>;
}

/// Quota client used when no quota service is configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredQuotaClient;

#[async_trait]
impl QuotaClient for UnconfiguredQuotaClient {
    async fn describe_dir_quotas(&self, _mount: &MountInfo) -> EngineResult<DescribeDirQuotasResponse> {
        Err(EngineError::Quota("quota service endpoint not configured".to_string()))
    }

    async fn set_dir_quota(&self, _mount: &MountInfo) -> EngineResult<SetDirQuotaResponse> {
        Err(EngineError::Quota("quota service endpoint not configured".to_string()))
    }
}

/// Pending change to the backing store's mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UfsToUpdate {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

/// Capacity/quota queries for one runtime's backing store.
pub struct QuotaGateway {
    target: RuntimeRef,
    runtimes: Arc<dyn RuntimeStore>,
    client: Arc<dyn QuotaClient>,
}

impl QuotaGateway {
    pub fn new(target: RuntimeRef, runtimes: Arc<dyn RuntimeStore>, client: Arc<dyn QuotaClient>) -> Self {
        Self {
            target,
            runtimes,
            client,
        }
    }

    async fn mount_info(&self) -> EngineResult<MountInfo> {
        let runtime = self
            .runtimes
            .get_runtime(&self.target.namespace, &self.target.name)
            .await?;
        MountInfo::from_mount(&runtime.value.spec.mount)
    }

    async fn first_user_quota(&self) -> EngineResult<UserQuotaInfo> {
        let mount = self.mount_info().await?;
        let response = self.client.describe_dir_quotas(&mount).await?;
        response.first_user_quota().cloned()
    }

    /// Not reported by the backing store; zero is a valid answer, not a failure.
    pub async fn used_storage_bytes(&self) -> EngineResult<i64> {
        Ok(0)
    }

    /// Not reported by the backing store; zero is a valid answer, not a failure.
    pub async fn free_storage_bytes(&self) -> EngineResult<i64> {
        Ok(0)
    }

    #[instrument(skip(self), fields(runtime = %self.target))]
    pub async fn total_storage_bytes(&self) -> EngineResult<i64> {
        let quota = self
            .first_user_quota()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to get total storage bytes", &self.target))?;
        quota.size_real.checked_mul(BYTES_PER_GIB).ok_or_else(|| {
            EngineError::MalformedResponse(format!("SizeReal {} GiB overflows bytes", quota.size_real))
        })
    }

    #[instrument(skip(self), fields(runtime = %self.target))]
    pub async fn total_file_nums(&self) -> EngineResult<i64> {
        let quota = self
            .first_user_quota()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to get total file nums", &self.target))?;
        Ok(quota.file_count_real)
    }

    /// Quota checks are enabled only when credentials are configured.
    pub async fn should_check_ufs(&self) -> EngineResult<bool> {
        let mount = self
            .mount_info()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to check ufs", &self.target))?;
        Ok(mount.has_credentials())
    }

    /// Install the directory quota the capacity queries rely on.
    #[instrument(skip(self), fields(runtime = %self.target))]
    pub async fn prepare_ufs(&self) -> EngineResult<()> {
        let mount = self
            .mount_info()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to prepare ufs", &self.target))?;
        let response = self
            .client
            .set_dir_quota(&mount)
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to set dir quota", &self.target))?;
        info!(
            file_system_id = %mount.file_system_id,
            path = %mount.dir_path,
            request_id = %response.request_id,
            "Dir quota set"
        );
        Ok(())
    }

    /// Mount changes on the backing store are not tracked.
    pub fn should_update_ufs(&self) -> Option<UfsToUpdate> {
        None
    }

    pub async fn update_on_ufs_change(&self, _ufs_to_update: &UfsToUpdate) -> EngineResult<bool> {
        Ok(true)
    }

    /// Size of the workers' level-0 cache tier in bytes; zero when unset.
    pub async fn cache_capacity_bytes(&self) -> EngineResult<i64> {
        self.level0_quota_bytes()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to get cache capacity", &self.target))
    }

    async fn level0_quota_bytes(&self) -> EngineResult<i64> {
        let runtime = self
            .runtimes
            .get_runtime(&self.target.namespace, &self.target.name)
            .await?;
        let quota = runtime.value.spec.values.worker.tiered_store_level0_quota();
        if quota.is_empty() {
            return Ok(0);
        }
        parse_quantity(quota)
    }
}
