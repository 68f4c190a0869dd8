//! DH-001: Declaration, lock, plan, and event types.
//!
//! Defines the YAML schema for a stack (resources, engine, pipeline, policy),
//! the per-stack lock file, execution plans, and provenance events.
//! Config types derive `JsonSchema` so `deckhand schema` can publish them.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Top-level deckhand.yaml
// ============================================================================

/// Root configuration — the declared target state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name; also names the state sub-directory
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Provider region (templatable)
    pub region: String,

    /// Global parameters (templatable)
    #[serde(default)]
    #[schemars(with = "HashMap<String, serde_json::Value>")]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// External provisioning engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Resource declarations (order-preserving)
    pub resources: IndexMap<String, Resource>,

    /// Deployment pipeline
    #[serde(default)]
    pub pipeline: Option<PipelineSpec>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

// ============================================================================
// Resources
// ============================================================================

/// A single declared cloud resource.
///
/// Flat record: every type reads the attributes it needs and ignores the
/// rest. Reference fields name other resource ids.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Resource {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    /// Number of instances (addresses become `id[i]` when > 1)
    #[serde(default = "default_count")]
    pub count: u32,

    /// Explicit dependencies (applied before this resource)
    #[serde(default)]
    pub depends_on: Vec<String>,

    // -- References --
    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub gateway: Option<String>,

    #[serde(default)]
    pub route_table: Option<String>,

    #[serde(default)]
    pub subnets: Vec<String>,

    #[serde(default)]
    pub security_groups: Vec<String>,

    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub execution_role: Option<String>,

    #[serde(default)]
    pub task_definition: Option<String>,

    #[serde(default)]
    pub target_group: Option<String>,

    #[serde(default)]
    pub load_balancer: Option<String>,

    // -- Network fields --
    /// Address block (network, or explicit subnet block)
    #[serde(default)]
    pub cidr_block: Option<String>,

    /// Extra prefix bits for derived subnet blocks (default 8)
    #[serde(default)]
    pub cidr_newbits: Option<u8>,

    /// Added to the instance index to form the subnet number (default 1)
    #[serde(default)]
    pub cidr_netnum_offset: Option<u32>,

    /// Placement zones, one per subnet instance
    #[serde(default)]
    pub zones: Vec<String>,

    #[serde(default)]
    pub public_ip_on_launch: Option<bool>,

    /// Route destination block (default 0.0.0.0/0)
    #[serde(default)]
    pub destination: Option<String>,

    #[serde(default)]
    pub ingress: Vec<SecurityRule>,

    #[serde(default)]
    pub egress: Vec<SecurityRule>,

    #[serde(default)]
    pub description: Option<String>,

    // -- Compute fields --
    /// Cluster/role/service/load balancer/target group name
    #[serde(default)]
    pub name: Option<String>,

    /// Task definition family
    #[serde(default)]
    pub family: Option<String>,

    /// Service principal allowed to assume the role
    #[serde(default)]
    pub trust_service: Option<String>,

    /// Managed policy ARNs attached to the role
    #[serde(default)]
    pub policies: Vec<String>,

    /// Task CPU units
    #[serde(default)]
    pub cpu: Option<u32>,

    /// Task memory (MiB)
    #[serde(default)]
    pub memory: Option<u32>,

    /// Task networking mode (default awsvpc)
    #[serde(default)]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub container: Option<ContainerSpec>,

    /// Desired running task count (default 1)
    #[serde(default)]
    pub desired_count: Option<u32>,

    /// Launch type (default FARGATE)
    #[serde(default)]
    pub launch_type: Option<String>,

    #[serde(default)]
    pub assign_public_ip: Option<bool>,

    // -- Traffic fields --
    #[serde(default)]
    pub port: Option<u32>,

    #[serde(default)]
    pub protocol: Option<String>,

    /// Target group registration type (ip, instance, lambda)
    #[serde(default)]
    pub target_type: Option<String>,

    #[serde(default)]
    pub health_check_path: Option<String>,

    #[serde(default)]
    pub internal: Option<bool>,

    /// Tags copied onto every rendered block
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

fn default_count() -> u32 {
    1
}

impl Resource {
    /// An empty declaration of the given type.
    pub fn of_type(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            count: 1,
            depends_on: vec![],
            network: None,
            gateway: None,
            route_table: None,
            subnets: vec![],
            security_groups: vec![],
            cluster: None,
            execution_role: None,
            task_definition: None,
            target_group: None,
            load_balancer: None,
            cidr_block: None,
            cidr_newbits: None,
            cidr_netnum_offset: None,
            zones: vec![],
            public_ip_on_launch: None,
            destination: None,
            ingress: vec![],
            egress: vec![],
            description: None,
            name: None,
            family: None,
            trust_service: None,
            policies: vec![],
            cpu: None,
            memory: None,
            network_mode: None,
            container: None,
            desired_count: None,
            launch_type: None,
            assign_public_ip: None,
            port: None,
            protocol: None,
            target_type: None,
            health_check_path: None,
            internal: None,
            tags: IndexMap::new(),
        }
    }

    pub fn network_mode(&self) -> &str {
        self.network_mode.as_deref().unwrap_or("awsvpc")
    }
}

/// Resource type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Network,
    Gateway,
    Subnet,
    RouteTable,
    Route,
    RouteAssociation,
    SecurityGroup,
    Cluster,
    ExecutionRole,
    TaskDefinition,
    Service,
    LoadBalancer,
    TargetGroup,
    Listener,
}

impl ResourceType {
    /// Immutable types are replaced rather than updated in place.
    pub fn is_immutable(self) -> bool {
        matches!(self, Self::TaskDefinition)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Gateway => "gateway",
            Self::Subnet => "subnet",
            Self::RouteTable => "route_table",
            Self::Route => "route",
            Self::RouteAssociation => "route_association",
            Self::SecurityGroup => "security_group",
            Self::Cluster => "cluster",
            Self::ExecutionRole => "execution_role",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
        };
        f.write_str(s)
    }
}

/// One container of a task definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContainerSpec {
    pub name: String,

    /// Image reference (templatable)
    pub image: String,

    /// Container port
    pub port: u32,

    /// Host port (defaults to the container port)
    #[serde(default)]
    pub host_port: Option<u32>,

    #[serde(default = "default_true")]
    pub essential: bool,

    #[serde(default)]
    pub environment: IndexMap<String, String>,
}

impl ContainerSpec {
    pub fn host_port(&self) -> u32 {
        self.host_port.unwrap_or(self.port)
    }
}

/// Ingress or egress rule of a security group.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecurityRule {
    /// tcp, udp, or "-1" for all
    pub protocol: String,
    pub from_port: u32,
    pub to_port: u32,
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Engine
// ============================================================================

/// External provisioning engine invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Engine binary (invoked as `<command> -chdir=<workdir> <verb>`)
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Directory that receives the rendered `main.tf.json`
    #[serde(default = "default_engine_workdir")]
    pub workdir: PathBuf,

    /// Run `init` before apply/destroy
    #[serde(default = "default_true")]
    pub init: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            workdir: default_engine_workdir(),
            init: true,
        }
    }
}

fn default_engine_command() -> String {
    "terraform".to_string()
}

fn default_engine_workdir() -> PathBuf {
    PathBuf::from(".deckhand/engine")
}

// ============================================================================
// Pipeline
// ============================================================================

/// Continuous-deployment pipeline declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineSpec {
    #[serde(default)]
    pub trigger: Trigger,

    /// Environment variable names holding the opaque secrets
    #[serde(default)]
    pub secrets: SecretNames,

    /// Local image name produced by the build step
    pub image: String,

    /// Build context
    #[serde(default = "default_context")]
    pub context: String,

    /// Registry tag pushed and deployed
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Bound on the deploy step's stability wait
    #[serde(default = "default_stability_timeout")]
    pub stability_timeout_secs: u64,

    /// Bound on every other step (0 = unbounded)
    #[serde(default)]
    pub step_timeout_secs: u64,
}

fn default_context() -> String {
    ".".to_string()
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_stability_timeout() -> u64 {
    600
}

/// Source-control event that starts the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Trigger {
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            event: default_event(),
            branch: default_branch(),
        }
    }
}

fn default_event() -> String {
    "push".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

/// Names of the environment variables that carry pipeline secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SecretNames {
    pub repository: String,
    pub account: String,
    pub region: String,
    pub task_definition: String,
    pub service: String,
    pub cluster: String,
}

impl SecretNames {
    /// (secret, variable) pairs in a stable order.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("repository", &self.repository),
            ("account", &self.account),
            ("region", &self.region),
            ("task_definition", &self.task_definition),
            ("service", &self.service),
            ("cluster", &self.cluster),
        ]
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Append provenance events on every apply and pipeline run
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist the BLAKE3 lock after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,

    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    pub blake3_version: String,

    /// Hash of the engine document written by the last successful apply
    #[serde(default)]
    pub document_hash: Option<String>,

    /// Per-instance state, keyed by address
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-instance lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    pub status: ResourceStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    /// BLAKE3 hash of the rendered declaration
    pub hash: String,

    #[serde(default)]
    pub details: IndexMap<String, String>,
}

/// Convergence status of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
    /// Engine input changed outside deckhand after the last apply
    Drifted,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Drifted => write!(f, "DRIFTED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action the external engine is expected to take on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Replace,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Replace => write!(f, "REPLACE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Instance address (`id` or `id[i]`)
    pub address: String,

    /// Declaring resource id
    pub resource_id: String,

    pub resource_type: ResourceType,

    pub action: PlanAction,

    /// Human-readable description
    pub description: String,

    /// Desired-state hash (None for destroys)
    pub hash: Option<String>,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,

    /// Changes in application order
    pub changes: Vec<PlannedChange>,

    /// Topological order (resource ids)
    pub execution_order: Vec<String>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_replace: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    /// True when the engine has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.to_create + self.to_update + self.to_replace + self.to_destroy == 0
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        deckhand_version: String,
    },
    ChangePlanned {
        stack: String,
        address: String,
        action: String,
    },
    EngineFailed {
        stack: String,
        run_id: String,
        phase: String,
        error: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        created: u32,
        updated: u32,
        replaced: u32,
        destroyed: u32,
        unchanged: u32,
        total_seconds: f64,
    },
    TeardownCompleted {
        stack: String,
        run_id: String,
        destroyed: u32,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        address: String,
        expected_hash: String,
        actual_hash: String,
    },
    PipelineStarted {
        run_id: String,
        branch: String,
        commit: Option<String>,
    },
    StepStarted {
        run_id: String,
        step: String,
    },
    StepSucceeded {
        run_id: String,
        step: String,
        duration_seconds: f64,
    },
    StepFailed {
        run_id: String,
        step: String,
        error: String,
    },
    PipelineCompleted {
        run_id: String,
        success: bool,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of applying (or tearing down) a stack.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub stack: String,
    pub created: u32,
    pub updated: u32,
    pub replaced: u32,
    pub destroyed: u32,
    pub unchanged: u32,
    /// Whether the external engine was called
    pub engine_invoked: bool,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}
