//! DH-009: Traffic resources — load balancer, target group, listener.

use crate::core::codegen::{block_kind, RenderCtx, RenderedBlock};
use crate::core::types::{Resource, ResourceType};
use serde_json::{json, Value};

/// Render a traffic-layer resource.
pub fn render(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    let body = match resource.resource_type {
        ResourceType::LoadBalancer => load_balancer(ctx, resource),
        ResourceType::TargetGroup => target_group(ctx, resource),
        ResourceType::Listener => listener(ctx, resource),
        _ => return Vec::new(),
    };
    vec![RenderedBlock {
        kind: block_kind(resource.resource_type),
        name: ctx.name(),
        body,
    }]
}

fn load_balancer(ctx: &RenderCtx, resource: &Resource) -> Value {
    json!({
        "name": resource.name.clone().unwrap_or_else(|| format!("{}-{}", ctx.config.name, ctx.address)),
        "internal": resource.internal.unwrap_or(false),
        "load_balancer_type": "application",
        "subnets": ctx.reference_list(&resource.subnets, "id"),
        "security_groups": ctx.reference_list(&resource.security_groups, "id"),
        "tags": ctx.tags(resource),
    })
}

fn target_group(ctx: &RenderCtx, resource: &Resource) -> Value {
    json!({
        "name": resource.name.clone().unwrap_or_else(|| format!("{}-{}", ctx.config.name, ctx.address)),
        "port": resource.port,
        "protocol": resource.protocol.as_deref().unwrap_or("HTTP"),
        "target_type": resource.target_type.as_deref().unwrap_or("ip"),
        "vpc_id": ctx.reference(resource.network.as_deref(), "id"),
        "health_check": {
            "path": resource.health_check_path.as_deref().unwrap_or("/"),
        },
        "tags": ctx.tags(resource),
    })
}

fn listener(ctx: &RenderCtx, resource: &Resource) -> Value {
    json!({
        "load_balancer_arn": ctx.reference(resource.load_balancer.as_deref(), "arn"),
        "port": resource.port,
        "protocol": resource.protocol.as_deref().unwrap_or("HTTP"),
        "default_action": [{
            "type": "forward",
            "target_group_arn": ctx.reference(resource.target_group.as_deref(), "arn"),
        }],
    })
}
