//! Adapter registry: one adapter per sending profile.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;
use uuid::Uuid;

use postbote_core::model::{EspKind, SendingProfile};

use crate::adapter::EspAdapter;
use crate::error::EspError;
use crate::mailgun::MailgunAdapter;
use crate::pmta::PmtaAdapter;
use crate::sendgrid::SendgridAdapter;
use crate::ses::SesAdapter;
use crate::sparkpost::SparkpostAdapter;

/// Source of adapters for sending profiles. The send worker depends
/// on this seam rather than the concrete registry.
pub trait AdapterSource: Send + Sync {
    fn adapter_for(&self, profile: &SendingProfile) -> Result<Arc<dyn EspAdapter>, EspError>;
}

/// Builds and caches adapters from sending-profile credentials.
///
/// Construction failures (missing API key, unknown vendor) surface
/// here, synchronously, so the send path never discovers a broken
/// profile mid-batch.
pub struct AdapterRegistry {
    client: reqwest::Client,
    adapters: RwLock<HashMap<Uuid, Arc<dyn EspAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch or build the adapter for a profile.
    pub fn adapter_for(&self, profile: &SendingProfile) -> Result<Arc<dyn EspAdapter>, EspError> {
        if let Some(adapter) = self.adapters.read().unwrap().get(&profile.id) {
            return Ok(adapter.clone());
        }

        let adapter = self.build(profile)?;
        info!(profile = %profile.id, kind = %profile.kind, "esp adapter built");
        self.adapters
            .write()
            .unwrap()
            .insert(profile.id, adapter.clone());
        Ok(adapter)
    }

    /// Drop a cached adapter (e.g. after credential rotation).
    pub fn evict(&self, profile_id: Uuid) {
        self.adapters.write().unwrap().remove(&profile_id);
    }

    fn build(&self, profile: &SendingProfile) -> Result<Arc<dyn EspAdapter>, EspError> {
        let adapter: Arc<dyn EspAdapter> = match &profile.kind {
            EspKind::Sparkpost => Arc::new(SparkpostAdapter::new(
                self.client.clone(),
                &profile.credentials,
            )?),
            EspKind::Ses => Arc::new(SesAdapter::new(&profile.credentials)?),
            EspKind::Mailgun => Arc::new(MailgunAdapter::new(
                self.client.clone(),
                &profile.credentials,
            )?),
            EspKind::Sendgrid => Arc::new(SendgridAdapter::new(
                self.client.clone(),
                &profile.credentials,
            )?),
            EspKind::Pmta => Arc::new(PmtaAdapter::new(&profile.credentials)?),
            EspKind::Other(kind) => {
                return Err(EspError::Config(format!("no adapter for vendor '{kind}'")))
            }
        };
        Ok(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterSource for AdapterRegistry {
    fn adapter_for(&self, profile: &SendingProfile) -> Result<Arc<dyn EspAdapter>, EspError> {
        AdapterRegistry::adapter_for(self, profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(kind: EspKind, credentials: serde_json::Value) -> SendingProfile {
        SendingProfile {
            id: Uuid::new_v4(),
            kind,
            from_name: "Post Bote".into(),
            from_email: "bote@example.com".into(),
            credentials,
            ip_pool: None,
        }
    }

    #[test]
    fn builds_and_caches_sparkpost() {
        let registry = AdapterRegistry::new();
        let p = profile(EspKind::Sparkpost, json!({ "api_key": "sp-key" }));

        let first = registry.adapter_for(&p).unwrap();
        let second = registry.adapter_for(&p).unwrap();
        assert_eq!(first.kind(), EspKind::Sparkpost);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_vendor_is_config_error() {
        let registry = AdapterRegistry::new();
        let p = profile(EspKind::Other("fax".into()), json!({}));
        assert!(matches!(
            registry.adapter_for(&p),
            Err(EspError::Config(_))
        ));
    }

    #[test]
    fn broken_credentials_are_not_cached() {
        let registry = AdapterRegistry::new();
        let mut p = profile(EspKind::Mailgun, json!({ "api_key": "key" })); // missing domain
        assert!(registry.adapter_for(&p).is_err());

        p.credentials = json!({ "api_key": "key", "domain": "mg.example.com" });
        assert!(registry.adapter_for(&p).is_ok());
    }

    #[test]
    fn evict_forces_rebuild() {
        let registry = AdapterRegistry::new();
        let p = profile(EspKind::Sendgrid, json!({ "api_key": "sg-key" }));
        let first = registry.adapter_for(&p).unwrap();
        registry.evict(p.id);
        let second = registry.adapter_for(&p).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
