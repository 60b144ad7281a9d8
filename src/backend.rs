//! Backend availability view.
//!
//! Availability is published as a TOML document in the parameter store,
//! shaped `[backends.<backend>.<role>] status = "...", description = "..."`.
//! The document is re-fetched on every query so operator edits take effect
//! without a restart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::constants::UNIFIED_BACKEND_KEY;
use crate::error::{SchedulerError, SchedulerResult};
use crate::stores::params::ParameterStore;

const CORRUPTED_DESCRIPTION: &str = "Status data is corrupted or invalid.";

/// Availability status of a backend for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Available,
    Maintenance,
    Unavailable,
}

impl ServiceStatus {
    fn parse(status: &str) -> Self {
        match status {
            "available" => ServiceStatus::Available,
            "maintenance" => ServiceStatus::Maintenance,
            "unavailable" => ServiceStatus::Unavailable,
            other => {
                error!("Invalid status string '{other}'. Falling back to 'unavailable'.");
                ServiceStatus::Unavailable
            }
        }
    }
}

/// Availability state of a backend for a specific user role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAvailability {
    pub backend: String,
    pub role: String,
    pub status: ServiceStatus,
    pub description: String,
}

/// Read-through view of the backend-status parameter.
pub struct BackendStatusView {
    status_parameter_name: String,
    params: Arc<dyn ParameterStore>,
    unify_backends: bool,
}

impl BackendStatusView {
    /// Create the view and validate the status parameter.
    ///
    /// A missing or unparsable parameter at construction time is fatal.
    pub async fn new(
        status_parameter_name: &str,
        params: Arc<dyn ParameterStore>,
        unify_backends: bool,
    ) -> SchedulerResult<Self> {
        let view = Self {
            status_parameter_name: status_parameter_name.to_string(),
            params,
            unify_backends,
        };

        let Some(status_toml) = view.fetch_status_toml().await? else {
            return Err(SchedulerError::Parameter(
                "failed to retrieve the status parameter".to_string(),
            ));
        };
        toml::from_str::<toml::Table>(&status_toml).map_err(|e| {
            SchedulerError::Parameter(format!("failed to validate the status parameter: {e}"))
        })?;

        Ok(view)
    }

    async fn fetch_status_toml(&self) -> SchedulerResult<Option<String>> {
        info!(
            "Retrieving the backend status parameter (key: {}).",
            self.status_parameter_name
        );
        self.params
            .get_parameter(&self.status_parameter_name)
            .await
    }

    /// Fetch and parse the status document, `None` on any failure.
    async fn load_backend_status(&self) -> Option<toml::Table> {
        let status_toml = match self.fetch_status_toml().await {
            Ok(Some(status_toml)) => status_toml,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to load the backend status: {e}");
                return None;
            }
        };
        match toml::from_str(&status_toml) {
            Ok(table) => Some(table),
            Err(e) => {
                error!("Failed to load the backend status: {e}");
                None
            }
        }
    }

    fn degraded(&self, backend: &str, role: &str, description: &str) -> BackendAvailability {
        BackendAvailability {
            backend: backend.to_string(),
            role: role.to_string(),
            status: ServiceStatus::Unavailable,
            description: description.to_string(),
        }
    }

    /// Retrieve availability for the specified backend and user role.
    ///
    /// Unknown backends and roles are errors the caller translates to an
    /// invalid request; a corrupted or unreadable document degrades to
    /// `Unavailable` instead of failing.
    pub async fn availability(
        &self,
        backend: &str,
        role: &str,
    ) -> SchedulerResult<BackendAvailability> {
        let Some(backend_status) = self.load_backend_status().await else {
            return Ok(self.degraded(backend, role, "Failed to load the backend status."));
        };

        let Some(backend_infos) = backend_status.get("backends").and_then(|v| v.as_table()) else {
            // Reached only when the system that updates the parameter wrote
            // a malformed document.
            error!(
                "Missing 'backends' section in the status parameter '{}'.",
                self.status_parameter_name
            );
            return Ok(self.degraded(backend, role, CORRUPTED_DESCRIPTION));
        };

        let lookup_backend = if self.unify_backends {
            UNIFIED_BACKEND_KEY
        } else {
            backend
        };

        let Some(role_infos) = backend_infos.get(lookup_backend) else {
            return Err(SchedulerError::UnknownBackend(lookup_backend.to_string()));
        };
        let Some(entry) = role_infos.as_table().and_then(|roles| roles.get(role)) else {
            return Err(SchedulerError::UnknownRole {
                backend: lookup_backend.to_string(),
                role: role.to_string(),
            });
        };

        let status = entry.get("status").and_then(|v| v.as_str());
        let description = entry.get("description").and_then(|v| v.as_str());
        match (status, description) {
            (Some(status), Some(description)) => Ok(BackendAvailability {
                backend: lookup_backend.to_string(),
                role: role.to_string(),
                status: ServiceStatus::parse(status),
                description: description.to_string(),
            }),
            _ => {
                error!("Malformed status entry (backend: {lookup_backend}, role: {role}).");
                Ok(self.degraded(lookup_backend, role, CORRUPTED_DESCRIPTION))
            }
        }
    }

    /// All backend names defined in the status parameter.
    pub async fn all_backends(&self) -> BTreeSet<String> {
        let Some(backend_status) = self.load_backend_status().await else {
            return BTreeSet::new();
        };
        let Some(backend_infos) = backend_status.get("backends").and_then(|v| v.as_table()) else {
            error!(
                "Missing 'backends' section in the status parameter '{}'.",
                self.status_parameter_name
            );
            return BTreeSet::new();
        };
        backend_infos.keys().cloned().collect()
    }
}
