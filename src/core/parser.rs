//! DH-002: YAML parsing and declaration validation.
//!
//! Parses deckhand.yaml and rejects declaration errors before any external
//! call is made:
//! - Version must be "1.0"
//! - Every reference and depends_on entry must resolve to a resource of an
//!   accepted type, and the induced graph must be acyclic
//! - Required attributes and value ranges per resource type
//! - Every `{{params.*}}` template resolves; rules apply to resolved values
//! - Subnet blocks must sit inside their network and not overlap
//! - Instances map to distinct engine block names
//! - Pipeline secrets and timeouts

use super::cidr::Cidr;
use super::codegen;
use super::resolver;
use super::types::*;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::LazyLock;

static RESOURCE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static id regex"));

const TARGET_TYPES: [&str; 3] = ["ip", "instance", "lambda"];
const LB_PROTOCOLS: [&str; 2] = ["HTTP", "HTTPS"];
const NETWORK_MODES: [&str; 4] = ["awsvpc", "bridge", "host", "none"];
const LAUNCH_TYPES: [&str; 2] = ["FARGATE", "EC2"];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a deckhand.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a deckhand.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Collects errors while walking the declaration.
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, message: String) {
        self.0.push(ValidationError { message });
    }

    fn require<T>(&mut self, id: &str, ty: ResourceType, field: &str, value: &Option<T>) {
        if value.is_none() {
            self.push(format!("resource '{}' ({}) has no {}", id, ty, field));
        }
    }

    fn port(&mut self, id: &str, field: &str, port: Option<u32>) {
        if let Some(p) = port {
            if !(1..=65535).contains(&p) {
                self.push(format!(
                    "resource '{}' {} {} is outside 1-65535",
                    id, field, p
                ));
            }
        }
    }

    fn one_of(&mut self, id: &str, field: &str, value: Option<&str>, allowed: &[&str]) {
        if let Some(v) = value {
            if !allowed.contains(&v) {
                self.push(format!(
                    "resource '{}' {} '{}' is not one of: {}",
                    id,
                    field,
                    v,
                    allowed.join(", ")
                ));
            }
        }
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Errors(Vec::new());

    if config.version != "1.0" {
        errors.push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }
    if config.name.is_empty() {
        errors.push("name must not be empty".to_string());
    }
    if config.region.is_empty() {
        errors.push("region must not be empty".to_string());
    }
    if let Err(e) = resolver::resolve_template(&config.region, &config.params) {
        errors.push(format!("region: {}", e));
    }

    let resolved = resolve_templates(config, &mut errors);
    let config = &resolved;

    let mut references_ok = true;
    for (id, resource) in &config.resources {
        if !RESOURCE_ID.is_match(id) {
            errors.push(format!(
                "resource id '{}' must match [a-z][a-z0-9_-]*",
                id
            ));
        }
        references_ok &= validate_references(config, id, resource, &mut errors);
        validate_attributes(id, resource, &mut errors);
    }

    // Cycle detection needs every edge to resolve first
    if references_ok {
        if let Err(e) = resolver::build_execution_order(config) {
            errors.push(e);
        }
    }

    validate_block_names(config, &mut errors);
    validate_subnet_blocks(config, &mut errors);
    validate_service_wiring(config, &mut errors);

    if let Some(ref pipeline) = config.pipeline {
        validate_pipeline(pipeline, &mut errors);
    }

    errors.0
}

/// The declaration with every template resolved. A resource whose
/// templates fail is reported and kept as written.
fn resolve_templates(config: &StackConfig, errors: &mut Errors) -> StackConfig {
    let mut resolved = config.clone();
    for (id, resource) in resolved.resources.iter_mut() {
        match resolver::resolve_resource_templates(resource, &config.params) {
            Ok(r) => *resource = r,
            Err(e) => errors.push(format!("resource '{}': {}", id, e)),
        }
    }
    resolved
}

/// `public_1` and `public[1]` would land on the same engine block.
fn validate_block_names(config: &StackConfig, errors: &mut Errors) {
    let mut seen: FxHashMap<(&'static str, String), String> = FxHashMap::default();
    for (id, resource) in &config.resources {
        let kind = codegen::block_kind(resource.resource_type);
        for address in resolver::expand_instances(id, resource) {
            let name = codegen::block_name(&address);
            if let Some(first) = seen.insert((kind, name.clone()), address.clone()) {
                errors.push(format!(
                    "resource '{}' and '{}' both render as engine block {}.{}",
                    first, address, kind, name
                ));
            }
        }
    }
}

fn validate_references(
    config: &StackConfig,
    id: &str,
    resource: &Resource,
    errors: &mut Errors,
) -> bool {
    let before = errors.0.len();

    for reference in resolver::resource_references(resource) {
        match config.resources.get(reference.target) {
            None => errors.push(format!(
                "resource '{}' {} references unknown resource '{}'",
                id, reference.field, reference.target
            )),
            Some(target) if !reference.accepts.contains(&target.resource_type) => {
                errors.push(format!(
                    "resource '{}' {} must reference a {}, but '{}' is a {}",
                    id, reference.field, reference.accepts[0], reference.target, target.resource_type
                ))
            }
            Some(_) if reference.target == id => {
                errors.push(format!("resource '{}' references itself", id))
            }
            Some(_) => {}
        }
    }

    for dep in &resource.depends_on {
        if !config.resources.contains_key(dep) {
            errors.push(format!(
                "resource '{}' depends on unknown resource '{}'",
                id, dep
            ));
        }
        if dep == id {
            errors.push(format!("resource '{}' depends on itself", id));
        }
    }

    errors.0.len() == before
}

fn validate_attributes(id: &str, r: &Resource, errors: &mut Errors) {
    let ty = r.resource_type;

    if r.count == 0 {
        errors.push(format!("resource '{}' count must be at least 1", id));
    }
    if r.count > 1 && ty != ResourceType::Subnet {
        errors.push(format!(
            "resource '{}' ({}) cannot use count; only subnets are countable",
            id, ty
        ));
    }

    match ty {
        ResourceType::Network => {
            errors.require(id, ty, "cidr_block", &r.cidr_block);
            if let Some(ref block) = r.cidr_block {
                if let Err(e) = block.parse::<Cidr>() {
                    errors.push(format!("resource '{}' cidr_block: {}", id, e));
                }
            }
        }
        ResourceType::Gateway | ResourceType::RouteTable => {
            errors.require(id, ty, "network", &r.network);
        }
        ResourceType::Subnet => {
            errors.require(id, ty, "network", &r.network);
            if r.cidr_block.is_some() && r.count > 1 {
                errors.push(format!(
                    "resource '{}' (subnet) cannot combine an explicit cidr_block with count {}",
                    id, r.count
                ));
            }
            if !r.zones.is_empty() && (r.zones.len() as u64) < u64::from(r.count) {
                errors.push(format!(
                    "resource '{}' (subnet) lists {} zone(s) for {} instance(s)",
                    id,
                    r.zones.len(),
                    r.count
                ));
            }
        }
        ResourceType::Route => {
            errors.require(id, ty, "route_table", &r.route_table);
            errors.require(id, ty, "gateway", &r.gateway);
            if let Some(ref dest) = r.destination {
                if let Err(e) = dest.parse::<Cidr>() {
                    errors.push(format!("resource '{}' destination: {}", id, e));
                }
            }
        }
        ResourceType::RouteAssociation => {
            errors.require(id, ty, "route_table", &r.route_table);
            if r.subnets.is_empty() {
                errors.push(format!("resource '{}' ({}) has no subnets", id, ty));
            }
        }
        ResourceType::SecurityGroup => {
            errors.require(id, ty, "network", &r.network);
            for rule in r.ingress.iter().chain(&r.egress) {
                if rule.from_port > rule.to_port {
                    errors.push(format!(
                        "resource '{}' rule {}-{} has from_port above to_port",
                        id, rule.from_port, rule.to_port
                    ));
                }
                if rule.to_port > 65535 {
                    errors.push(format!(
                        "resource '{}' rule port {} is outside 0-65535",
                        id, rule.to_port
                    ));
                }
                for block in &rule.cidr_blocks {
                    if let Err(e) = block.parse::<Cidr>() {
                        errors.push(format!("resource '{}' rule block: {}", id, e));
                    }
                }
            }
        }
        ResourceType::Cluster => {
            errors.require(id, ty, "name", &r.name);
        }
        ResourceType::ExecutionRole => {
            errors.require(id, ty, "name", &r.name);
            errors.require(id, ty, "trust_service", &r.trust_service);
        }
        ResourceType::TaskDefinition => validate_task_definition(id, r, errors),
        ResourceType::Service => {
            errors.require(id, ty, "name", &r.name);
            errors.require(id, ty, "cluster", &r.cluster);
            errors.require(id, ty, "task_definition", &r.task_definition);
            if r.subnets.is_empty() {
                errors.push(format!("resource '{}' ({}) has no subnets", id, ty));
            }
            errors.one_of(id, "launch_type", r.launch_type.as_deref(), &LAUNCH_TYPES);
        }
        ResourceType::LoadBalancer => {
            errors.require(id, ty, "name", &r.name);
            if r.subnets.is_empty() {
                errors.push(format!("resource '{}' ({}) has no subnets", id, ty));
            }
        }
        ResourceType::TargetGroup => {
            errors.require(id, ty, "name", &r.name);
            errors.require(id, ty, "network", &r.network);
            errors.require(id, ty, "port", &r.port);
            errors.port(id, "port", r.port);
            errors.one_of(id, "protocol", r.protocol.as_deref(), &LB_PROTOCOLS);
            errors.one_of(id, "target_type", r.target_type.as_deref(), &TARGET_TYPES);
        }
        ResourceType::Listener => {
            errors.require(id, ty, "load_balancer", &r.load_balancer);
            errors.require(id, ty, "target_group", &r.target_group);
            errors.require(id, ty, "port", &r.port);
            errors.port(id, "port", r.port);
            errors.one_of(id, "protocol", r.protocol.as_deref(), &LB_PROTOCOLS);
        }
    }
}

fn validate_task_definition(id: &str, r: &Resource, errors: &mut Errors) {
    let ty = r.resource_type;
    errors.require(id, ty, "family", &r.family);
    errors.require(id, ty, "cpu", &r.cpu);
    errors.require(id, ty, "memory", &r.memory);
    errors.require(id, ty, "container", &r.container);
    errors.one_of(id, "network_mode", Some(r.network_mode()), &NETWORK_MODES);

    if let (Some(cpu), Some(memory)) = (r.cpu, r.memory) {
        if !fargate_size_valid(cpu, memory) {
            errors.push(format!(
                "resource '{}' cpu {} / memory {} is not a valid task size",
                id, cpu, memory
            ));
        }
    }

    if let Some(ref container) = r.container {
        errors.port(id, "container port", Some(container.port));
        errors.port(id, "container host_port", container.host_port);
        if container.image.is_empty() {
            errors.push(format!("resource '{}' container has no image", id));
        }
        if r.network_mode() == "awsvpc" && container.host_port() != container.port {
            errors.push(format!(
                "resource '{}' awsvpc requires host_port {} to equal container port {}",
                id,
                container.host_port(),
                container.port
            ));
        }
    }
}

/// Task sizes accepted by the serverless launch type.
pub fn fargate_size_valid(cpu: u32, memory: u32) -> bool {
    match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    }
}

/// Subnets must sit inside their network and not overlap each other.
fn validate_subnet_blocks(config: &StackConfig, errors: &mut Errors) {
    let mut blocks: Vec<(String, String, Cidr)> = Vec::new();

    for (id, resource) in &config.resources {
        if resource.resource_type != ResourceType::Subnet {
            continue;
        }
        let Some(network_id) = resource.network.as_deref() else {
            continue;
        };
        let network_block = config
            .resources
            .get(network_id)
            .filter(|n| n.resource_type == ResourceType::Network)
            .and_then(|n| n.cidr_block.as_deref())
            .and_then(|b| b.parse::<Cidr>().ok());

        for index in 0..resource.count {
            let address = resolver::instance_address(id, resource.count, index);
            let block = match resolver::subnet_cidr(config, id, index) {
                Ok(b) => b,
                Err(e) => {
                    // Missing or malformed network blocks are reported elsewhere
                    if network_block.is_some() || resource.cidr_block.is_some() {
                        errors.push(e);
                    }
                    continue;
                }
            };
            if let Some(ref net) = network_block {
                if !net.contains(&block) {
                    errors.push(format!(
                        "subnet '{}' block {} lies outside network '{}' ({})",
                        address, block, network_id, net
                    ));
                }
            }
            for (other_addr, other_net, other_block) in &blocks {
                if other_net == network_id && other_block.overlaps(&block) {
                    errors.push(format!(
                        "subnet '{}' block {} overlaps '{}' ({})",
                        address, block, other_addr, other_block
                    ));
                }
            }
            blocks.push((address, network_id.to_string(), block));
        }
    }
}

/// Cross-resource rules between services, tasks, and target groups.
fn validate_service_wiring(config: &StackConfig, errors: &mut Errors) {
    for (id, resource) in &config.resources {
        if resource.resource_type != ResourceType::Service {
            continue;
        }
        let task = resource
            .task_definition
            .as_deref()
            .and_then(|t| config.resources.get(t))
            .filter(|t| t.resource_type == ResourceType::TaskDefinition);
        let group = resource
            .target_group
            .as_deref()
            .and_then(|t| config.resources.get(t).map(|g| (t, g)))
            .filter(|(_, g)| g.resource_type == ResourceType::TargetGroup);

        let (Some(task), Some((group_id, group))) = (task, group) else {
            continue;
        };

        if task.network_mode() == "awsvpc" && group.target_type.as_deref() != Some("ip") {
            errors.push(format!(
                "service '{}' runs awsvpc tasks, so target group '{}' needs target_type ip",
                id, group_id
            ));
        }
        if let (Some(container), Some(port)) = (task.container.as_ref(), group.port) {
            if container.port != port {
                errors.push(format!(
                    "service '{}' registers container port {} but target group '{}' uses port {}",
                    id, container.port, group_id, port
                ));
            }
        }
    }
}

fn validate_pipeline(pipeline: &PipelineSpec, errors: &mut Errors) {
    if pipeline.image.is_empty() {
        errors.push("pipeline image must not be empty".to_string());
    }
    if pipeline.trigger.branch.is_empty() {
        errors.push("pipeline trigger branch must not be empty".to_string());
    }
    if pipeline.stability_timeout_secs == 0 {
        errors.push("pipeline stability_timeout_secs must be positive".to_string());
    }
    for (secret, var) in pipeline.secrets.entries() {
        if var.is_empty() {
            errors.push(format!("pipeline secret '{}' has no variable name", secret));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = include_str!("../../demos/web-stack.yaml");

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_config(yaml).unwrap();
        validate_config(&config)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    fn assert_error(yaml: &str, needle: &str) {
        let msgs = messages(yaml);
        assert!(
            msgs.iter().any(|m| m.contains(needle)),
            "expected '{}' in {:?}",
            needle,
            msgs
        );
    }

    #[test]
    fn test_dh002_reference_stack_valid() {
        let msgs = messages(STACK);
        assert!(msgs.is_empty(), "unexpected errors: {:?}", msgs);
    }

    #[test]
    fn test_dh002_bad_version() {
        assert_error(
            "version: \"2.0\"\nname: t\nregion: r\nresources: {}\n",
            "version",
        );
    }

    #[test]
    fn test_dh002_bad_resource_id() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  Main:
    type: cluster
    name: c
"#,
            "must match",
        );
    }

    #[test]
    fn test_dh002_unknown_reference() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  sub:
    type: subnet
    network: ghost
"#,
            "references unknown resource 'ghost'",
        );
    }

    #[test]
    fn test_dh002_wrong_reference_type() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  c:
    type: cluster
    name: c
  sub:
    type: subnet
    network: c
"#,
            "must reference a network",
        );
    }

    #[test]
    fn test_dh002_self_dependency() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  c:
    type: cluster
    name: c
    depends_on: [c]
"#,
            "depends on itself",
        );
    }

    #[test]
    fn test_dh002_cycle() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  a:
    type: cluster
    name: a
    depends_on: [b]
  b:
    type: cluster
    name: b
    depends_on: [a]
"#,
            "cycle",
        );
    }

    #[test]
    fn test_dh002_network_needs_block() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
"#,
            "has no cidr_block",
        );
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.5/16
"#,
            "host bits",
        );
    }

    #[test]
    fn test_dh002_overlapping_subnets() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.0/16
  a:
    type: subnet
    network: net
    count: 2
  b:
    type: subnet
    network: net
    cidr_block: 10.0.2.0/24
"#,
            "overlaps 'a[1]'",
        );
    }

    #[test]
    fn test_dh002_subnet_outside_network() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.0/16
  a:
    type: subnet
    network: net
    cidr_block: 10.9.0.0/24
"#,
            "lies outside network",
        );
    }

    #[test]
    fn test_dh002_zones_shorter_than_count() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.0/16
  a:
    type: subnet
    network: net
    count: 3
    zones: [us-east-1a]
"#,
            "1 zone(s) for 3 instance(s)",
        );
    }

    #[test]
    fn test_dh002_count_only_on_subnets() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  c:
    type: cluster
    name: c
    count: 2
"#,
            "only subnets are countable",
        );
    }

    #[test]
    fn test_dh002_task_size() {
        assert!(fargate_size_valid(256, 512));
        assert!(fargate_size_valid(1024, 3072));
        assert!(!fargate_size_valid(256, 4096));
        assert!(!fargate_size_valid(300, 512));
        assert!(!fargate_size_valid(512, 1536));
    }

    #[test]
    fn test_dh002_awsvpc_host_port() {
        let yaml = STACK.replace("      port: 8080\n", "      port: 8080\n      host_port: 80\n");
        assert_error(&yaml, "host_port 80 to equal container port 8080");
    }

    #[test]
    fn test_dh002_awsvpc_requires_ip_targets() {
        let yaml = STACK.replace("target_type: ip", "target_type: instance");
        assert_error(&yaml, "needs target_type ip");
    }

    #[test]
    fn test_dh002_target_group_port_mismatch() {
        let yaml = STACK.replace("    port: 8080\n    protocol: HTTP\n    target_type", "    port: 9090\n    protocol: HTTP\n    target_type");
        assert_error(&yaml, "uses port 9090");
    }

    #[test]
    fn test_dh002_listener_port_range() {
        let yaml = STACK.replace("    port: 80\n", "    port: 70000\n");
        assert_error(&yaml, "outside 1-65535");
    }

    #[test]
    fn test_dh002_pipeline_missing_secret() {
        let yaml = STACK.replace("    cluster: ECS_CLUSTER\n", "");
        assert_error(&yaml, "secret 'cluster'");
    }

    #[test]
    fn test_dh002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deckhand.yaml");
        std::fs::write(&path, STACK).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "web-stack");
    }

    #[test]
    fn test_dh002_parse_invalid_yaml() {
        assert!(parse_config("not: [valid: yaml: {{").is_err());
    }

    #[test]
    fn test_dh002_netnum_overflow_reported() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.0/16
  public:
    type: subnet
    network: net
    count: 2
    cidr_netnum_offset: 4294967295
"#,
            "subnet number overflows",
        );
    }

    #[test]
    fn test_dh002_templated_network_block() {
        let msgs = messages(
            r#"
version: "1.0"
name: t
region: "{{params.region}}"
params:
  region: us-east-1
  cidr: 10.0.0.0/16
resources:
  net:
    type: network
    cidr_block: "{{params.cidr}}"
  public:
    type: subnet
    network: net
"#,
        );
        assert!(msgs.is_empty(), "unexpected errors: {:?}", msgs);
    }

    #[test]
    fn test_dh002_unknown_param() {
        let yaml = STACK.replace("{{params.app}}-cluster", "{{params.nope}}");
        assert_error(&yaml, "resource 'cluster': unknown param");

        let yaml = STACK.replace("region: \"{{params.region}}\"", "region: \"{{params.zone}}\"");
        assert_error(&yaml, "region: unknown param");
    }

    #[test]
    fn test_dh002_block_name_collision() {
        assert_error(
            r#"
version: "1.0"
name: t
region: r
resources:
  net:
    type: network
    cidr_block: 10.0.0.0/16
  public:
    type: subnet
    network: net
    count: 2
  public_1:
    type: subnet
    network: net
    cidr_block: 10.0.9.0/24
"#,
            "both render as engine block aws_subnet.public_1",
        );
    }
}
