//! Domain types for fabricsync.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FabricId(pub String);

impl fmt::Display for FabricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FabricId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FabricId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for a Git repository binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(pub String);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepositoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepositoryId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Arena index of a tracked resource inside a fabric's record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// Arena index of a reconciliation alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert-{}", self.0)
    }
}

/// Arena index of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Resource kinds
// ---------------------------------------------------------------------------

/// Every manifest kind the fabric understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "VPC")]
    Vpc,
    #[serde(rename = "VPCAttachment")]
    VpcAttachment,
    #[serde(rename = "VPCPeering")]
    VpcPeering,
    External,
    ExternalAttachment,
    ExternalPeering,
    #[serde(rename = "IPv4Namespace")]
    Ipv4Namespace,
    #[serde(rename = "VLANNamespace")]
    VlanNamespace,
    Switch,
    SwitchGroup,
    Server,
    Connection,
}

pub const VPC_API_GROUP: &str = "vpc.githedgehog.com";
pub const WIRING_API_GROUP: &str = "wiring.githedgehog.com";
pub const API_VERSION: &str = "v1beta1";

impl ResourceKind {
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Vpc,
            ResourceKind::VpcAttachment,
            ResourceKind::VpcPeering,
            ResourceKind::External,
            ResourceKind::ExternalAttachment,
            ResourceKind::ExternalPeering,
            ResourceKind::Ipv4Namespace,
            ResourceKind::VlanNamespace,
            ResourceKind::Switch,
            ResourceKind::SwitchGroup,
            ResourceKind::Server,
            ResourceKind::Connection,
        ]
    }

    /// The `kind:` field as it appears in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::VpcAttachment => "VPCAttachment",
            ResourceKind::VpcPeering => "VPCPeering",
            ResourceKind::External => "External",
            ResourceKind::ExternalAttachment => "ExternalAttachment",
            ResourceKind::ExternalPeering => "ExternalPeering",
            ResourceKind::Ipv4Namespace => "IPv4Namespace",
            ResourceKind::VlanNamespace => "VLANNamespace",
            ResourceKind::Switch => "Switch",
            ResourceKind::SwitchGroup => "SwitchGroup",
            ResourceKind::Server => "Server",
            ResourceKind::Connection => "Connection",
        }
    }

    pub fn api_group(&self) -> &'static str {
        match self {
            ResourceKind::Vpc
            | ResourceKind::VpcAttachment
            | ResourceKind::VpcPeering
            | ResourceKind::External
            | ResourceKind::ExternalAttachment
            | ResourceKind::ExternalPeering
            | ResourceKind::Ipv4Namespace => VPC_API_GROUP,
            ResourceKind::VlanNamespace
            | ResourceKind::Switch
            | ResourceKind::SwitchGroup
            | ResourceKind::Server
            | ResourceKind::Connection => WIRING_API_GROUP,
        }
    }

    /// `<group>/<version>` for the manifest `apiVersion:` field.
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.api_group(), API_VERSION)
    }

    /// Directory under `managed/` holding resources of this kind.
    pub fn directory(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    /// Inverse of [`ResourceKind::directory`].
    pub fn from_directory(dir: &str) -> Option<ResourceKind> {
        Self::all().iter().copied().find(|k| k.directory() == dir)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// Identity of a tracked resource within a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `managed/<kind-directory>/<name>.yaml`, relative to the fabric root.
    pub fn managed_path(&self) -> PathBuf {
        PathBuf::from("managed")
            .join(self.kind.directory())
            .join(format!("{}.yaml", self.name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which store is authoritative when a fabric's stores disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    GitToCluster,
    ClusterToGit,
    Bidirectional,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::GitToCluster => write!(f, "git-to-cluster"),
            SyncDirection::ClusterToGit => write!(f, "cluster-to-git"),
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

/// Lifecycle state of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    /// Ingested, not yet pushed or applied.
    Draft,
    /// Pushed to Git, not yet confirmed applied.
    Committed,
    /// Applied to the cluster, awaiting read-back confirmation.
    Pending,
    /// Git, cluster and record store agree.
    Synced,
    Drifted,
    /// Source removed from both Git and cluster. Terminal except for purge.
    Orphaned,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Draft => "DRAFT",
            ResourceState::Committed => "COMMITTED",
            ResourceState::Pending => "PENDING",
            ResourceState::Synced => "SYNCED",
            ResourceState::Drifted => "DRIFTED",
            ResourceState::Orphaned => "ORPHANED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    #[default]
    None,
    Detected,
    Resolved,
}

/// What caused a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionTrigger {
    Ingest,
    Sync,
    Reconcile,
    Manual,
}

impl fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTrigger::Ingest => write!(f, "ingest"),
            TransitionTrigger::Sync => write!(f, "sync"),
            TransitionTrigger::Reconcile => write!(f, "reconcile"),
            TransitionTrigger::Manual => write!(f, "manual"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration structs
// ---------------------------------------------------------------------------

/// Connection configuration for a remote Git host.
///
/// Owned independently of fabrics so one repository can back several of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepository {
    pub id: RepositoryId,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Prefix inside the repository under which fabric files live.
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    pub author_name: String,
    pub author_email: String,
    /// Name of the token in the credential store; never the token itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
}

/// A fabric: one repository binding plus the resources it tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConfig {
    pub id: FabricId,
    pub name: String,
    pub repository: RepositoryId,
    /// Local working tree holding `raw/`, `managed/` and metadata.
    pub root: PathBuf,
    #[serde(default = "default_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    pub sync_direction: SyncDirection,
}

impl FabricConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Bounded exponential backoff for retried external calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth per retry, rounded to a whole factor.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            max_attempts: 4,
        }
    }
}

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_git_timeout")]
    pub git_timeout_ms: u64,
    #[serde(default = "default_cluster_timeout")]
    pub cluster_timeout_ms: u64,
    #[serde(default)]
    pub retry: BackoffConfig,
    /// Alert priority grows by one step per this many minutes of divergence.
    #[serde(default = "default_persistence_step")]
    pub alert_persistence_step_mins: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            git_timeout_ms: default_git_timeout(),
            cluster_timeout_ms: default_cluster_timeout(),
            retry: BackoffConfig::default(),
            alert_persistence_step_mins: default_persistence_step(),
        }
    }
}

impl EngineConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_millis(self.git_timeout_ms)
    }

    pub fn cluster_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster_timeout_ms)
    }
}

/// Root of the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub repositories: Vec<GitRepository>,
    #[serde(default)]
    pub fabrics: Vec<FabricConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            repositories: vec![],
            fabrics: vec![],
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn fabric(&self, id: &FabricId) -> Option<&FabricConfig> {
        self.fabrics.iter().find(|f| &f.id == id)
    }

    pub fn repository(&self, id: &RepositoryId) -> Option<&GitRepository> {
        self.repositories.iter().find(|r| &r.id == id)
    }

    /// The repository bound to `fabric`, if both exist.
    pub fn repository_for(&self, fabric: &FabricId) -> Option<&GitRepository> {
        self.fabric(fabric)
            .and_then(|f| self.repository(&f.repository))
    }

    /// Fabrics bound to `repository`, in configuration order.
    pub fn fabrics_using(&self, repository: &RepositoryId) -> Vec<&FabricConfig> {
        self.fabrics
            .iter()
            .filter(|f| &f.repository == repository)
            .collect()
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    300
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_git_timeout() -> u64 {
    30_000
}

fn default_cluster_timeout() -> u64 {
    10_000
}

fn default_persistence_step() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(FabricId::from("dc1").to_string(), "dc1");
        assert_eq!(RepositoryId::from("gitops").to_string(), "gitops");
        assert_eq!(ResourceId(7).to_string(), "res-7");
    }

    #[test]
    fn kind_directory_roundtrip() {
        for kind in ResourceKind::all() {
            assert_eq!(ResourceKind::from_directory(&kind.directory()), Some(*kind));
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), *kind);
        }
        assert_eq!(ResourceKind::Vpc.directory(), "vpc");
    }

    #[test]
    fn managed_path_uses_kind_directory() {
        let key = ResourceKey::new(ResourceKind::Vpc, "default", "a");
        assert_eq!(key.managed_path(), PathBuf::from("managed/vpc/a.yaml"));
    }

    #[test]
    fn kind_serializes_as_manifest_kind() {
        let yaml = serde_yaml::to_string(&ResourceKind::Ipv4Namespace).unwrap();
        assert_eq!(yaml.trim(), "IPv4Namespace");
    }

    #[test]
    fn direction_uses_kebab_case() {
        let yaml = serde_yaml::to_string(&SyncDirection::GitToCluster).unwrap();
        assert_eq!(yaml.trim(), "git-to-cluster");
    }
}
