//! Startup provisioning results.

use entity_store::StorageError;

/// The kind of backend resource provisioned at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Schema,
    Table,
    Container,
    Queue,
    FileShare,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Schema => "schema",
            ResourceKind::Table => "table",
            ResourceKind::Container => "container",
            ResourceKind::Queue => "queue",
            ResourceKind::FileShare => "file_share",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened when a resource was provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExisted,
    /// Provisioning failed; later operations on the resource may fail too.
    Failed(String),
    /// The backend is not available in this storage mode.
    Skipped(String),
}

/// One provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: ProvisionOutcome,
}

/// Per-resource result of the facade's one-time "ensure exists" pass.
///
/// Failures recorded here never stop the facade from being constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningReport {
    resources: Vec<ProvisionedResource>,
}

impl ProvisioningReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of a `create_*_if_not_exists` call.
    pub fn record(
        &mut self,
        kind: ResourceKind,
        name: &str,
        result: Result<bool, StorageError>,
    ) -> &mut Self {
        let outcome = match result {
            Ok(true) => ProvisionOutcome::Created,
            Ok(false) => ProvisionOutcome::AlreadyExisted,
            Err(e) => ProvisionOutcome::Failed(e.to_string()),
        };
        self.push(kind, name, outcome)
    }

    /// Records a resource that was not provisioned because its backend is unavailable.
    pub fn skip(&mut self, kind: ResourceKind, name: &str, reason: impl Into<String>) -> &mut Self {
        self.push(kind, name, ProvisionOutcome::Skipped(reason.into()))
    }

    fn push(&mut self, kind: ResourceKind, name: &str, outcome: ProvisionOutcome) -> &mut Self {
        self.resources.push(ProvisionedResource {
            kind,
            name: name.to_string(),
            outcome,
        });
        self
    }

    pub fn resources(&self) -> &[ProvisionedResource] {
        &self.resources
    }

    /// Returns the resource entry for a name, if recorded.
    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&ProvisionedResource> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.name == name)
    }

    /// Returns the resources whose provisioning failed.
    pub fn failures(&self) -> impl Iterator<Item = &ProvisionedResource> {
        self.resources
            .iter()
            .filter(|r| matches!(r.outcome, ProvisionOutcome::Failed(_)))
    }

    /// Returns true if nothing failed. Skipped resources do not count as failures.
    pub fn is_healthy(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Logs one line per resource.
    pub fn log(&self) {
        for resource in &self.resources {
            match &resource.outcome {
                ProvisionOutcome::Created => {
                    tracing::info!(kind = %resource.kind, name = %resource.name, "provisioned")
                }
                ProvisionOutcome::AlreadyExisted => {
                    tracing::debug!(kind = %resource.kind, name = %resource.name, "already provisioned")
                }
                ProvisionOutcome::Failed(error) => tracing::warn!(
                    kind = %resource.kind,
                    name = %resource.name,
                    %error,
                    "provisioning failed; continuing"
                ),
                ProvisionOutcome::Skipped(reason) => tracing::warn!(
                    kind = %resource.kind,
                    name = %resource.name,
                    %reason,
                    "provisioning skipped"
                ),
            }
        }
    }
}
