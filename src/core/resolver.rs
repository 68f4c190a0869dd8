//! DH-003: Template resolution, reference edges, and dependency ordering.
//!
//! Resolves `{{params.key}}` templates. Builds a DAG from implicit edges
//! (reference fields) and explicit `depends_on` edges, then computes the
//! topological order with Kahn's algorithm and alphabetical tie-breaking.

use super::cidr::{self, Cidr};
use super::types::*;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("static template regex"));

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<String, String> {
    let mut failure = None;
    let resolved = TEMPLATE.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match key.strip_prefix("params.") {
            Some(param) => match params.get(param) {
                Some(v) => yaml_value_to_string(v),
                None => {
                    failure.get_or_insert_with(|| format!("unknown param: {}", param));
                    String::new()
                }
            },
            None => {
                failure.get_or_insert_with(|| format!("unknown template variable: {}", key));
                String::new()
            }
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if let Some(pos) = resolved.find("{{") {
        return Err(format!("unclosed template at position {}", pos));
    }
    Ok(resolved.into_owned())
}

fn resolve_opt(
    field: &mut Option<String>,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<(), String> {
    if let Some(value) = field.as_mut() {
        *value = resolve_template(value, params)?;
    }
    Ok(())
}

/// Resolve all templates in a resource's string attributes.
pub fn resolve_resource_templates(
    resource: &Resource,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<Resource, String> {
    let mut resolved = resource.clone();

    resolve_opt(&mut resolved.name, params)?;
    resolve_opt(&mut resolved.family, params)?;
    resolve_opt(&mut resolved.description, params)?;
    resolve_opt(&mut resolved.cidr_block, params)?;
    resolve_opt(&mut resolved.destination, params)?;
    resolve_opt(&mut resolved.trust_service, params)?;
    resolve_opt(&mut resolved.health_check_path, params)?;
    for zone in &mut resolved.zones {
        *zone = resolve_template(zone, params)?;
    }
    for policy in &mut resolved.policies {
        *policy = resolve_template(policy, params)?;
    }
    for value in resolved.tags.values_mut() {
        *value = resolve_template(value, params)?;
    }
    if let Some(container) = resolved.container.as_mut() {
        container.name = resolve_template(&container.name, params)?;
        container.image = resolve_template(&container.image, params)?;
        for value in container.environment.values_mut() {
            *value = resolve_template(value, params)?;
        }
    }

    Ok(resolved)
}

/// An implicit dependency edge: `field` of a resource names `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub target: &'a str,
    pub accepts: &'static [ResourceType],
}

/// Collect every reference a resource makes through its reference fields.
pub fn resource_references(resource: &Resource) -> Vec<Reference<'_>> {
    let singles: [(&'static str, &Option<String>, &'static [ResourceType]); 8] = [
        ("network", &resource.network, &[ResourceType::Network]),
        ("gateway", &resource.gateway, &[ResourceType::Gateway]),
        ("route_table", &resource.route_table, &[ResourceType::RouteTable]),
        ("cluster", &resource.cluster, &[ResourceType::Cluster]),
        (
            "execution_role",
            &resource.execution_role,
            &[ResourceType::ExecutionRole],
        ),
        (
            "task_definition",
            &resource.task_definition,
            &[ResourceType::TaskDefinition],
        ),
        ("target_group", &resource.target_group, &[ResourceType::TargetGroup]),
        (
            "load_balancer",
            &resource.load_balancer,
            &[ResourceType::LoadBalancer],
        ),
    ];

    let mut refs: Vec<Reference<'_>> = singles
        .into_iter()
        .filter_map(|(field, value, accepts)| {
            value.as_deref().map(|target| Reference {
                field,
                target,
                accepts,
            })
        })
        .collect();

    for target in &resource.subnets {
        refs.push(Reference {
            field: "subnets",
            target,
            accepts: &[ResourceType::Subnet],
        });
    }
    for target in &resource.security_groups {
        refs.push(Reference {
            field: "security_groups",
            target,
            accepts: &[ResourceType::SecurityGroup],
        });
    }
    refs
}

/// All (dependency, dependent) pairs, implicit and explicit, deduplicated.
pub fn dependency_edges(config: &StackConfig) -> Vec<(String, String)> {
    let mut seen = FxHashSet::default();
    let mut edges = Vec::new();
    for (id, resource) in &config.resources {
        let targets = resource_references(resource)
            .into_iter()
            .map(|r| r.target)
            .chain(resource.depends_on.iter().map(String::as_str));
        for target in targets {
            if seen.insert((target.to_string(), id.clone())) {
                edges.push((target.to_string(), id.clone()));
            }
        }
    }
    edges
}

/// Build a topological execution order from references and depends_on.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_execution_order(config: &StackConfig) -> Result<Vec<String>, String> {
    let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

    for id in config.resources.keys() {
        in_degree.insert(id.as_str(), 0);
        adjacency.insert(id.as_str(), Vec::new());
    }

    for (dep, id) in dependency_edges(config) {
        let dep_key = match config.resources.get_key_value(&dep) {
            Some((k, _)) => k.as_str(),
            None => return Err(format!("resource '{}' depends on unknown '{}'", id, dep)),
        };
        if dep == id {
            return Err(format!("resource '{}' depends on itself", id));
        }
        let Some((id_key, _)) = config.resources.get_key_value(&id) else {
            continue;
        };
        if let Some(next) = adjacency.get_mut(dep_key) {
            next.push(id_key.as_str());
        }
        if let Some(degree) = in_degree.get_mut(id_key.as_str()) {
            *degree += 1;
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(config.resources.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != config.resources.len() {
        let ordered: FxHashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<&str> = config
            .resources
            .keys()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Teardown runs dependents before their dependencies.
pub fn teardown_order(execution_order: &[String]) -> Vec<String> {
    execution_order.iter().rev().cloned().collect()
}

/// Address of instance `index` of a declaration with `count` instances.
pub fn instance_address(id: &str, count: u32, index: u32) -> String {
    if count <= 1 {
        id.to_string()
    } else {
        format!("{}[{}]", id, index)
    }
}

/// Instance addresses of a declaration: `id` alone, or `id[0..count]`.
pub fn expand_instances(id: &str, resource: &Resource) -> Vec<String> {
    let count = resource.count.max(1);
    (0..count)
        .map(|i| instance_address(id, count, i))
        .collect()
}

/// The address block of subnet instance `index`.
pub fn subnet_cidr(config: &StackConfig, id: &str, index: u32) -> Result<Cidr, String> {
    let subnet = config
        .resources
        .get(id)
        .ok_or_else(|| format!("unknown subnet '{}'", id))?;

    if let Some(ref explicit) = subnet.cidr_block {
        return resolve_template(explicit, &config.params)
            .and_then(|block| block.parse())
            .map_err(|e| format!("subnet '{}': {}", id, e));
    }

    let network_id = subnet
        .network
        .as_deref()
        .ok_or_else(|| format!("subnet '{}' has no network", id))?;
    let network = config
        .resources
        .get(network_id)
        .ok_or_else(|| format!("subnet '{}' references unknown network '{}'", id, network_id))?;
    let raw = network
        .cidr_block
        .as_deref()
        .ok_or_else(|| format!("network '{}' has no cidr_block", network_id))?;
    let base: Cidr = resolve_template(raw, &config.params)
        .and_then(|block| block.parse())
        .map_err(|e| format!("network '{}': {}", network_id, e))?;

    let newbits = subnet.cidr_newbits.unwrap_or(8);
    let netnum = index
        .checked_add(subnet.cidr_netnum_offset.unwrap_or(1))
        .ok_or_else(|| format!("subnet '{}': subnet number overflows", id))?;
    cidr::cidrsubnet(&base, newbits, netnum).map_err(|e| format!("subnet '{}': {}", id, e))
}
