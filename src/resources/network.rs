//! DH-007: Network resources — network, gateway, subnets, routing, security groups.

use crate::core::codegen::{block_kind, RenderCtx, RenderedBlock};
use crate::core::resolver;
use crate::core::types::{Resource, ResourceType, SecurityRule};
use serde_json::{json, Value};

/// Render a network-layer resource.
pub fn render(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    match resource.resource_type {
        ResourceType::RouteAssociation => route_associations(ctx, resource),
        ResourceType::Network => vec![block(ctx, resource, network(ctx, resource))],
        ResourceType::Gateway => vec![block(
            ctx,
            resource,
            json!({
                "vpc_id": ctx.reference(resource.network.as_deref(), "id"),
                "tags": ctx.tags(resource),
            }),
        )],
        ResourceType::Subnet => vec![block(ctx, resource, subnet(ctx, resource))],
        ResourceType::RouteTable => vec![block(
            ctx,
            resource,
            json!({
                "vpc_id": ctx.reference(resource.network.as_deref(), "id"),
                "tags": ctx.tags(resource),
            }),
        )],
        ResourceType::Route => vec![block(
            ctx,
            resource,
            json!({
                "route_table_id": ctx.reference(resource.route_table.as_deref(), "id"),
                "destination_cidr_block": resource.destination.as_deref().unwrap_or("0.0.0.0/0"),
                "gateway_id": ctx.reference(resource.gateway.as_deref(), "id"),
            }),
        )],
        ResourceType::SecurityGroup => vec![block(ctx, resource, security_group(ctx, resource))],
        _ => Vec::new(),
    }
}

fn block(ctx: &RenderCtx, resource: &Resource, body: Value) -> RenderedBlock {
    RenderedBlock {
        kind: block_kind(resource.resource_type),
        name: ctx.name(),
        body,
    }
}

fn network(ctx: &RenderCtx, resource: &Resource) -> Value {
    json!({
        "cidr_block": resource.cidr_block,
        "enable_dns_support": true,
        "enable_dns_hostnames": true,
        "tags": ctx.tags(resource),
    })
}

fn subnet(ctx: &RenderCtx, resource: &Resource) -> Value {
    // Validation guarantees the block resolves; fall back to the raw value
    let cidr = resolver::subnet_cidr(ctx.config, ctx.id, ctx.index)
        .map(|c| Value::String(c.to_string()))
        .unwrap_or_else(|_| json!(resource.cidr_block));
    let mut body = json!({
        "vpc_id": ctx.reference(resource.network.as_deref(), "id"),
        "cidr_block": cidr,
        "map_public_ip_on_launch": resource.public_ip_on_launch.unwrap_or(false),
        "tags": ctx.tags(resource),
    });
    if let Some(zone) = resource.zones.get(ctx.index as usize) {
        body["availability_zone"] = json!(zone);
    }
    body
}

/// One association block per subnet instance the declaration names.
fn route_associations(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    let route_table = ctx.reference(resource.route_table.as_deref(), "id");
    resource
        .subnets
        .iter()
        .flat_map(|s| ctx.refs(s, "id"))
        .enumerate()
        .map(|(n, subnet_id)| RenderedBlock {
            kind: block_kind(ResourceType::RouteAssociation),
            name: format!("{}_{}", ctx.name(), n),
            body: json!({
                "subnet_id": subnet_id,
                "route_table_id": route_table,
            }),
        })
        .collect()
}

fn rule(rule: &SecurityRule) -> Value {
    let mut body = json!({
        "protocol": rule.protocol,
        "from_port": rule.from_port,
        "to_port": rule.to_port,
        "cidr_blocks": rule.cidr_blocks,
    });
    if let Some(ref description) = rule.description {
        body["description"] = json!(description);
    }
    body
}

fn security_group(ctx: &RenderCtx, resource: &Resource) -> Value {
    json!({
        "name": format!("{}-{}", ctx.config.name, ctx.address),
        "description": resource.description.as_deref().unwrap_or("Managed by deckhand"),
        "vpc_id": ctx.reference(resource.network.as_deref(), "id"),
        "ingress": resource.ingress.iter().map(rule).collect::<Vec<_>>(),
        "egress": resource.egress.iter().map(rule).collect::<Vec<_>>(),
        "tags": ctx.tags(resource),
    })
}
