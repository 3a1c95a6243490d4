//! Operation registry: which SOAP operations each API surface accepts and how
//! they are routed.

use crate::error::GatewayError;
use crate::schemas::{ApiSurface, SoapRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Privilege a legacy certificate can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    LegacyAgencyViewer,
    LegacyAgencyGrantRetriever,
    LegacyAgencyAssigner,
}

/// Routing record for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Privileges required for the internal path. `None` means the operation
    /// is known but not configured and is rejected.
    pub privileges: Option<BTreeSet<Privilege>>,

    /// Operation may be answered by the internal responder.
    pub internal: bool,

    /// Run the internal responder even when internal serving is globally off.
    pub always_call_internal: bool,
}

impl OperationConfig {
    pub fn forward_only(privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            privileges: Some(privileges.into_iter().collect()),
            internal: false,
            always_call_internal: false,
        }
    }

    pub fn internal(privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            privileges: Some(privileges.into_iter().collect()),
            internal: true,
            always_call_internal: false,
        }
    }

    pub fn with_always_call_internal(mut self) -> Self {
        self.always_call_internal = true;
        self
    }
}

/// Per-surface operation overrides, as they appear in configuration.
pub type OperationOverrides = BTreeMap<ApiSurface, BTreeMap<String, OperationConfig>>;

#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: HashMap<(ApiSurface, String), OperationConfig>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        use Privilege::*;

        let entries = [
            (ApiSurface::Applicants, "GetOpportunityListRequest", OperationConfig::internal([])),
            (ApiSurface::Applicants, "GetApplicationListRequest", OperationConfig::forward_only([])),
            (
                ApiSurface::Applicants,
                "GetApplicationStatusDetailRequest",
                OperationConfig::forward_only([]),
            ),
            (ApiSurface::Applicants, "GetSubmissionListRequest", OperationConfig::forward_only([])),
            (ApiSurface::Applicants, "SubmitApplicationRequest", OperationConfig::forward_only([])),
            (
                ApiSurface::Grantors,
                "GetSubmissionListExpandedRequest",
                OperationConfig::internal([LegacyAgencyGrantRetriever]),
            ),
            (
                ApiSurface::Grantors,
                "GetApplicationZipRequest",
                OperationConfig::forward_only([LegacyAgencyGrantRetriever]),
            ),
            (
                ApiSurface::Grantors,
                "GetApplicationRequest",
                OperationConfig::forward_only([LegacyAgencyGrantRetriever]),
            ),
            (
                ApiSurface::Grantors,
                "ConfirmApplicationDeliveryRequest",
                OperationConfig::forward_only([LegacyAgencyGrantRetriever]),
            ),
            (
                ApiSurface::Grantors,
                "UpdateApplicationInfoRequest",
                OperationConfig::forward_only([LegacyAgencyAssigner]),
            ),
            (
                ApiSurface::Grantors,
                "GetOpportunityListRequest",
                OperationConfig::forward_only([LegacyAgencyViewer]),
            ),
        ];

        Self {
            operations: entries
                .into_iter()
                .map(|(api, name, config)| ((api, name.to_string()), config))
                .collect(),
        }
    }
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Built-in operations with `overrides` applied on top.
    pub fn with_overrides(overrides: &OperationOverrides) -> Self {
        let mut registry = Self::default();
        for (api, operations) in overrides {
            for (name, config) in operations {
                registry.register(*api, name.clone(), config.clone());
            }
        }
        registry
    }

    pub fn register(&mut self, api: ApiSurface, operation: impl Into<String>, config: OperationConfig) {
        self.operations.insert((api, operation.into()), config);
    }

    pub fn get_operation_config(&self, api: ApiSurface, operation: &str) -> Option<&OperationConfig> {
        self.operations.get(&(api, operation.to_string()))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Validate the request's operation against the registry.
    ///
    /// Unknown operations and operations without a privilege set are
    /// rejected before anything is forwarded.
    pub async fn resolve(&self, request: &mut SoapRequest) -> Result<&OperationConfig, GatewayError> {
        let operation = request.operation_name().await?;
        let config = self
            .get_operation_config(request.api, &operation)
            .ok_or_else(|| GatewayError::OperationNotSupported {
                api: request.api,
                operation: operation.clone(),
            })?;
        if config.privileges.is_none() {
            return Err(GatewayError::OperationNotConfigured {
                api: request.api,
                operation,
            });
        }
        debug!(
            api = %request.api,
            operation = %operation,
            internal = config.internal,
            "Resolved SOAP operation"
        );
        Ok(config)
    }
}
