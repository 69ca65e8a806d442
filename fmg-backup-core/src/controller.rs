//! FortiManager endpoints behind [`ControllerApi`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::contract::{ControllerApi, Device, Domain, RevisionMeta};
use crate::error::RpcError;
use crate::rpc::JsonRpcClient;

const ADOM_URL: &str = "/dvmdb/adom";
const REVISION_LIST_URL: &str = "/deployment/get/device/revision";
const REVISION_CHECKOUT_URL: &str = "/deployment/checkout/revision";

pub struct FortiManagerClient {
    rpc: JsonRpcClient,
}

impl FortiManagerClient {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }
}

/// Deserialises a `data` payload that should be a list. `null` means an empty list.
fn parse_list<T: DeserializeOwned>(data: Value, what: &str) -> Result<Vec<T>, RpcError> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(data)
        .map_err(|e| RpcError::Protocol(format!("unexpected {what} payload: {e}")))
}

/// Reads one `revinfo` entry field by field, so a mistyped entry only affects itself.
fn revision_meta(entry: &Value) -> RevisionMeta {
    let revision = match entry.get("revision") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let instime = match entry.get("instime") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    RevisionMeta { revision, instime }
}

#[async_trait]
impl ControllerApi for FortiManagerClient {
    async fn list_domains(&self) -> Result<Vec<Domain>, RpcError> {
        let data = self.rpc.call("get", ADOM_URL, None).await?;
        let domains: Vec<Domain> = parse_list(data, "ADOM list")?;
        info!(count = domains.len(), "Fetched ADOM list");
        Ok(domains)
    }

    async fn list_devices(&self, domain: &str) -> Result<Vec<Device>, RpcError> {
        if domain.is_empty() || domain.contains('/') {
            return Err(RpcError::Protocol(format!(
                "ADOM name '{domain}' cannot be addressed in a resource URL"
            )));
        }
        let url = format!("{ADOM_URL}/{domain}/device");
        let data = self.rpc.call("get", &url, None).await?;
        let devices: Vec<Device> = parse_list(data, "device list")?;
        info!(
            domain,
            devices = ?devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "Devices in ADOM"
        );
        Ok(devices)
    }

    async fn list_revisions(&self, domain: &str, device: &str) -> Result<Vec<RevisionMeta>, RpcError> {
        let data = self
            .rpc
            .call(
                "exec",
                REVISION_LIST_URL,
                Some(json!({ "adom": domain, "device": device })),
            )
            .await?;
        let revinfo = match data.get("revinfo") {
            Some(list @ Value::Array(_)) => list.clone(),
            Some(other) => {
                return Err(RpcError::Protocol(format!(
                    "'revinfo' is not a list for {domain}/{device}: {other}"
                )))
            }
            None => {
                return Err(RpcError::Protocol(format!(
                    "missing 'revinfo' in revision data for {domain}/{device}"
                )))
            }
        };
        let entries: Vec<Value> = parse_list(revinfo, "revinfo")?;
        let revisions: Vec<RevisionMeta> = entries.iter().map(revision_meta).collect();
        debug!(domain, device, count = revisions.len(), "Fetched revision metadata");
        Ok(revisions)
    }

    async fn fetch_revision(&self, domain: &str, device: &str, revision: u64) -> Result<String, RpcError> {
        let data = self
            .rpc
            .call(
                "exec",
                REVISION_CHECKOUT_URL,
                Some(json!({ "adom": domain, "device": device, "revision": revision })),
            )
            .await?;
        match data.get("content") {
            Some(Value::String(content)) => {
                debug!(domain, device, revision, bytes = content.len(), "Checked out revision");
                Ok(content.clone())
            }
            _ => Err(RpcError::Protocol(format!(
                "'content' missing from checkout of {domain}/{device} revision {revision}"
            ))),
        }
    }
}
