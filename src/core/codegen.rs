//! DH-005: Engine document generation — dispatch to resource handlers.
//!
//! Every declared instance renders to one or more engine blocks. The blocks
//! are collected into a single JSON document that the external provisioning
//! engine reconciles against the live account.

use super::resolver;
use super::types::{Resource, ResourceType, StackConfig};
use crate::resources;
use serde_json::{json, Map, Value};

/// One engine resource block, e.g. `aws_subnet.public_0`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBlock {
    pub kind: &'static str,
    pub name: String,
    pub body: Value,
}

/// All blocks produced by one declared instance.
#[derive(Debug, Clone)]
pub struct RenderedInstance {
    pub address: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub blocks: Vec<RenderedBlock>,
}

/// Engine block type for a resource type.
pub fn block_kind(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Network => "aws_vpc",
        ResourceType::Gateway => "aws_internet_gateway",
        ResourceType::Subnet => "aws_subnet",
        ResourceType::RouteTable => "aws_route_table",
        ResourceType::Route => "aws_route",
        ResourceType::RouteAssociation => "aws_route_table_association",
        ResourceType::SecurityGroup => "aws_security_group",
        ResourceType::Cluster => "aws_ecs_cluster",
        ResourceType::ExecutionRole => "aws_iam_role",
        ResourceType::TaskDefinition => "aws_ecs_task_definition",
        ResourceType::Service => "aws_ecs_service",
        ResourceType::LoadBalancer => "aws_lb",
        ResourceType::TargetGroup => "aws_lb_target_group",
        ResourceType::Listener => "aws_lb_listener",
    }
}

/// Engine-safe block name for an instance address: `public[1]` → `public_1`.
pub fn block_name(address: &str) -> String {
    address
        .chars()
        .filter_map(|c| match c {
            '-' | '[' => Some('_'),
            ']' => None,
            c => Some(c),
        })
        .collect()
}

/// Rendering context for a single instance.
pub struct RenderCtx<'a> {
    pub config: &'a StackConfig,
    pub id: &'a str,
    pub address: &'a str,
    pub index: u32,
}

impl RenderCtx<'_> {
    /// Block name of the instance being rendered.
    pub fn name(&self) -> String {
        block_name(self.address)
    }

    /// Interpolations of `attr` for every instance of `target`.
    pub fn refs(&self, target: &str, attr: &str) -> Vec<String> {
        let Some(resource) = self.config.resources.get(target) else {
            return Vec::new();
        };
        let kind = block_kind(resource.resource_type);
        resolver::expand_instances(target, resource)
            .iter()
            .map(|addr| format!("${{{}.{}.{}}}", kind, block_name(addr), attr))
            .collect()
    }

    /// Interpolation of `attr` for a single-instance reference.
    pub fn reference(&self, target: Option<&str>, attr: &str) -> Value {
        match target.map(|t| self.refs(t, attr)) {
            Some(mut v) if v.len() == 1 => Value::String(v.remove(0)),
            Some(v) if !v.is_empty() => json!(v),
            _ => Value::Null,
        }
    }

    /// Interpolations of `attr` for a list of references, flattened.
    pub fn reference_list(&self, targets: &[String], attr: &str) -> Value {
        json!(targets
            .iter()
            .flat_map(|t| self.refs(t, attr))
            .collect::<Vec<_>>())
    }

    /// Tags with the stack name and instance address stamped on.
    pub fn tags(&self, resource: &Resource) -> Value {
        let mut tags = Map::new();
        tags.insert("Name".to_string(), json!(self.address));
        tags.insert("Stack".to_string(), json!(self.config.name));
        for (k, v) in &resource.tags {
            tags.insert(k.clone(), json!(v));
        }
        Value::Object(tags)
    }
}

/// Render blocks for one resolved instance.
pub fn render_resource(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    match resource.resource_type {
        ResourceType::Network
        | ResourceType::Gateway
        | ResourceType::Subnet
        | ResourceType::RouteTable
        | ResourceType::Route
        | ResourceType::RouteAssociation
        | ResourceType::SecurityGroup => resources::network::render(ctx, resource),
        ResourceType::Cluster
        | ResourceType::ExecutionRole
        | ResourceType::TaskDefinition
        | ResourceType::Service => resources::compute::render(ctx, resource),
        ResourceType::LoadBalancer | ResourceType::TargetGroup | ResourceType::Listener => {
            resources::traffic::render(ctx, resource)
        }
    }
}

/// Render every declared instance, in execution order, templates resolved.
pub fn render_instances(
    config: &StackConfig,
    execution_order: &[String],
) -> Result<Vec<RenderedInstance>, String> {
    let mut instances = Vec::new();
    for id in execution_order {
        let Some(resource) = config.resources.get(id) else {
            continue;
        };
        let resolved = resolver::resolve_resource_templates(resource, &config.params)
            .map_err(|e| format!("resource '{}': {}", id, e))?;
        for (index, address) in resolver::expand_instances(id, resource).iter().enumerate() {
            let ctx = RenderCtx {
                config,
                id,
                address,
                index: index as u32,
            };
            instances.push(RenderedInstance {
                address: address.clone(),
                resource_id: id.clone(),
                resource_type: resource.resource_type,
                blocks: render_resource(&ctx, &resolved),
            });
        }
    }
    Ok(instances)
}

/// Assemble the engine document from rendered instances.
pub fn render_document(
    config: &StackConfig,
    instances: &[RenderedInstance],
) -> Result<Value, String> {
    let region = resolver::resolve_template(&config.region, &config.params)?;

    let mut by_kind: Map<String, Value> = Map::new();
    for block in instances.iter().flat_map(|i| &i.blocks) {
        let entry = by_kind
            .entry(block.kind.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(named) = entry {
            if named.insert(block.name.clone(), block.body.clone()).is_some() {
                return Err(format!("duplicate engine block {}.{}", block.kind, block.name));
            }
        }
    }

    Ok(json!({
        "terraform": {
            "required_providers": {
                "aws": { "source": "hashicorp/aws" }
            }
        },
        "provider": {
            "aws": { "region": region }
        },
        "resource": by_kind,
    }))
}

/// Render the whole stack to the engine document.
pub fn render_stack(config: &StackConfig) -> Result<Value, String> {
    let order = resolver::build_execution_order(config)?;
    let instances = render_instances(config, &order)?;
    render_document(config, &instances)
}
