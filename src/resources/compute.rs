//! DH-008: Compute resources — cluster, execution role, task definition, service.

use crate::core::codegen::{block_kind, RenderCtx, RenderedBlock};
use crate::core::resolver;
use crate::core::types::{ContainerSpec, Resource, ResourceType};
use serde_json::{json, Value};

const ASSUME_ROLE_VERSION: &str = "2012-10-17";

/// Render a compute-layer resource.
pub fn render(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    let body = match resource.resource_type {
        ResourceType::Cluster => json!({
            "name": display_name(ctx, resource),
            "tags": ctx.tags(resource),
        }),
        ResourceType::ExecutionRole => return execution_role(ctx, resource),
        ResourceType::TaskDefinition => task_definition(ctx, resource),
        ResourceType::Service => service(ctx, resource),
        _ => return Vec::new(),
    };
    vec![RenderedBlock {
        kind: block_kind(resource.resource_type),
        name: ctx.name(),
        body,
    }]
}

fn display_name(ctx: &RenderCtx, resource: &Resource) -> String {
    resource
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-{}", ctx.config.name, ctx.address))
}

/// Trust policy letting `service` assume the role.
pub fn assume_role_policy(service: &str) -> String {
    json!({
        "Version": ASSUME_ROLE_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }]
    })
    .to_string()
}

/// The role block plus one policy attachment per managed policy.
fn execution_role(ctx: &RenderCtx, resource: &Resource) -> Vec<RenderedBlock> {
    let name = ctx.name();
    let trust = resource
        .trust_service
        .as_deref()
        .unwrap_or("ecs-tasks.amazonaws.com");

    let mut blocks = vec![RenderedBlock {
        kind: block_kind(ResourceType::ExecutionRole),
        name: name.clone(),
        body: json!({
            "name": display_name(ctx, resource),
            "assume_role_policy": assume_role_policy(trust),
            "tags": ctx.tags(resource),
        }),
    }];
    for (n, policy) in resource.policies.iter().enumerate() {
        blocks.push(RenderedBlock {
            kind: "aws_iam_role_policy_attachment",
            name: format!("{}_policy_{}", name, n),
            body: json!({
                "role": format!("${{aws_iam_role.{}.name}}", name),
                "policy_arn": policy,
            }),
        });
    }
    blocks
}

/// Container definitions as the JSON string the engine expects.
pub fn container_definitions(container: &ContainerSpec) -> String {
    let environment: Vec<Value> = container
        .environment
        .iter()
        .map(|(k, v)| json!({ "name": k, "value": v }))
        .collect();
    json!([{
        "name": container.name,
        "image": container.image,
        "essential": container.essential,
        "portMappings": [{
            "containerPort": container.port,
            "hostPort": container.host_port(),
            "protocol": "tcp",
        }],
        "environment": environment,
    }])
    .to_string()
}

fn task_definition(ctx: &RenderCtx, resource: &Resource) -> Value {
    let mut body = json!({
        "family": resource.family.clone().unwrap_or_else(|| ctx.name()),
        "requires_compatibilities": ["FARGATE"],
        "network_mode": resource.network_mode(),
        "cpu": resource.cpu.map(|c| c.to_string()),
        "memory": resource.memory.map(|m| m.to_string()),
        "execution_role_arn": ctx.reference(resource.execution_role.as_deref(), "arn"),
        "tags": ctx.tags(resource),
    });
    if let Some(ref container) = resource.container {
        body["container_definitions"] = json!(container_definitions(container));
    }
    body
}

/// Container of the task definition a service runs, templates resolved.
fn service_container(ctx: &RenderCtx, resource: &Resource) -> Option<ContainerSpec> {
    let task = ctx.config.resources.get(resource.task_definition.as_deref()?)?;
    resolver::resolve_resource_templates(task, &ctx.config.params)
        .ok()?
        .container
}

fn service(ctx: &RenderCtx, resource: &Resource) -> Value {
    let mut body = json!({
        "name": display_name(ctx, resource),
        "cluster": ctx.reference(resource.cluster.as_deref(), "id"),
        "task_definition": ctx.reference(resource.task_definition.as_deref(), "arn"),
        "desired_count": resource.desired_count.unwrap_or(1),
        "launch_type": resource.launch_type.as_deref().unwrap_or("FARGATE"),
        "network_configuration": {
            "subnets": ctx.reference_list(&resource.subnets, "id"),
            "security_groups": ctx.reference_list(&resource.security_groups, "id"),
            "assign_public_ip": resource.assign_public_ip.unwrap_or(false),
        },
        "tags": ctx.tags(resource),
    });
    if let Some(ref tg) = resource.target_group {
        let container = service_container(ctx, resource);
        body["load_balancer"] = json!([{
            "target_group_arn": ctx.reference(Some(tg), "arn"),
            "container_name": container.as_ref().map(|c| c.name.clone()),
            "container_port": container.as_ref().map(|c| c.port),
        }]);
    }
    body
}
