//! HTTP transport to the quota service.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    DescribeDirQuotasRequest, DescribeDirQuotasResponse, MountInfo, QuotaClient, SetDirQuotaRequest,
    SetDirQuotaResponse,
};
use crate::error::{EngineError, EngineResult};

/// Posts quota requests as JSON to `<endpoint>/<Action>`, authenticating with
/// the mount's access key pair.
#[derive(Debug, Clone)]
pub struct HttpQuotaClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQuotaClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn call<Req, Resp>(&self, action: &str, mount: &MountInfo, request: &Req) -> EngineResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let base = self.endpoint.trim_end_matches('/');
        let url = format!("{base}/{action}");
        debug!(action, file_system_id = %mount.file_system_id, "Calling quota service");

        let resp = self
            .client
            .post(url)
            .basic_auth(&mount.access_key_id, Some(&mount.access_key_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::Quota(format!("{action} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Quota(format!(
                "{action} failed (status={status}): {body}"
            )));
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| EngineError::Quota(format!("{action} returned an unreadable body: {e}")))
    }
}

#[async_trait]
impl QuotaClient for HttpQuotaClient {
    async fn describe_dir_quotas(&self, mount: &MountInfo) -> EngineResult<DescribeDirQuotasResponse> {
        self.call(
            "DescribeDirQuotas",
            mount,
            &DescribeDirQuotasRequest::for_mount(mount),
        )
        .await
    }

    async fn set_dir_quota(&self, mount: &MountInfo) -> EngineResult<SetDirQuotaResponse> {
        self.call("SetDirQuota", mount, &SetDirQuotaRequest::for_mount(mount))
            .await
    }
}
