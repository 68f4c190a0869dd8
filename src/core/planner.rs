//! DH-010: Plan generation — diff rendered instances against the stack lock.

use super::codegen::{self, RenderedInstance};
use super::types::*;
use crate::tripwire::hasher;

/// Generate an execution plan by comparing the declaration to lock state.
pub fn plan(
    config: &StackConfig,
    execution_order: &[String],
    lock: Option<&StateLock>,
) -> Result<ExecutionPlan, String> {
    let instances = codegen::render_instances(config, execution_order)?;
    Ok(plan_rendered(config, execution_order, &instances, lock))
}

/// Plan over already-rendered instances.
pub fn plan_rendered(
    config: &StackConfig,
    execution_order: &[String],
    instances: &[RenderedInstance],
    lock: Option<&StateLock>,
) -> ExecutionPlan {
    let mut changes = Vec::new();

    for instance in instances {
        let hash = hash_desired_state(instance);
        let action = determine_action(instance, &hash, lock);
        changes.push(PlannedChange {
            description: describe_action(&instance.address, instance.resource_type, action),
            address: instance.address.clone(),
            resource_id: instance.resource_id.clone(),
            resource_type: instance.resource_type,
            action,
            hash: Some(hash),
        });
    }

    // Lock entries no longer declared, removed dependents-first
    if let Some(lock) = lock {
        for (address, rl) in lock.resources.iter().rev() {
            if instances.iter().any(|i| &i.address == address) {
                continue;
            }
            changes.push(destroy_change(address, rl));
        }
    }

    summarize(&config.name, execution_order.to_vec(), changes)
}

/// Plan that removes every instance recorded in the lock, reverse order.
pub fn teardown_plan(lock: &StateLock) -> ExecutionPlan {
    let changes = lock
        .resources
        .iter()
        .rev()
        .map(|(address, rl)| destroy_change(address, rl))
        .collect();
    summarize(&lock.stack, Vec::new(), changes)
}

fn destroy_change(address: &str, rl: &ResourceLock) -> PlannedChange {
    PlannedChange {
        address: address.to_string(),
        resource_id: resource_id_of(address).to_string(),
        resource_type: rl.resource_type,
        action: PlanAction::Destroy,
        description: describe_action(address, rl.resource_type, PlanAction::Destroy),
        hash: None,
    }
}

fn summarize(name: &str, execution_order: Vec<String>, changes: Vec<PlannedChange>) -> ExecutionPlan {
    let count = |a: PlanAction| changes.iter().filter(|c| c.action == a).count() as u32;
    ExecutionPlan {
        name: name.to_string(),
        execution_order,
        to_create: count(PlanAction::Create),
        to_update: count(PlanAction::Update),
        to_replace: count(PlanAction::Replace),
        to_destroy: count(PlanAction::Destroy),
        unchanged: count(PlanAction::NoOp),
        changes,
    }
}

/// `public[1]` → `public`.
fn resource_id_of(address: &str) -> &str {
    address.split('[').next().unwrap_or(address)
}

fn determine_action(
    instance: &RenderedInstance,
    desired_hash: &str,
    lock: Option<&StateLock>,
) -> PlanAction {
    let Some(rl) = lock.and_then(|l| l.resources.get(&instance.address)) else {
        return PlanAction::Create;
    };
    let changed_action = if instance.resource_type.is_immutable() {
        PlanAction::Replace
    } else {
        PlanAction::Update
    };
    if rl.status != ResourceStatus::Converged {
        // Previously failed or drifted — re-apply
        return PlanAction::Update;
    }
    if rl.hash == desired_hash {
        PlanAction::NoOp
    } else {
        changed_action
    }
}

/// BLAKE3 of the engine blocks an instance renders to.
pub fn hash_desired_state(instance: &RenderedInstance) -> String {
    let components: Vec<String> = instance
        .blocks
        .iter()
        .map(|b| format!("{}.{}={}", b.kind, b.name, b.body))
        .collect();
    let refs: Vec<&str> = components.iter().map(String::as_str).collect();
    hasher::composite_hash(&refs)
}

/// Human-readable description of a planned action.
pub fn describe_action(address: &str, resource_type: ResourceType, action: PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", address, resource_type),
        PlanAction::Update => format!("{}: update {} (declaration changed)", address, resource_type),
        PlanAction::Replace => format!("{}: replace {} (immutable)", address, resource_type),
        PlanAction::Destroy => format!("{}: destroy {}", address, resource_type),
        PlanAction::NoOp => format!("{}: no changes", address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver;
    use indexmap::IndexMap;

    const STACK: &str = include_str!("../../demos/web-stack.yaml");

    fn setup(yaml: &str) -> (StackConfig, Vec<String>) {
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        let order = resolver::build_execution_order(&config).unwrap();
        (config, order)
    }

    fn lock_from(plan: &ExecutionPlan, status: ResourceStatus) -> StateLock {
        let mut resources = IndexMap::new();
        for c in &plan.changes {
            resources.insert(
                c.address.clone(),
                ResourceLock {
                    resource_type: c.resource_type,
                    status: status.clone(),
                    applied_at: None,
                    hash: c.hash.clone().unwrap(),
                    details: IndexMap::new(),
                },
            );
        }
        StateLock {
            schema: "1.0".to_string(),
            stack: "web-stack".to_string(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            generator: "deckhand".to_string(),
            blake3_version: "1.8".to_string(),
            document_hash: None,
            resources,
        }
    }

    #[test]
    fn test_dh010_plan_all_create() {
        let (config, order) = setup(STACK);
        let plan = plan(&config, &order, None).unwrap();
        // 14 declarations, one of them counted twice
        assert_eq!(plan.changes.len(), 15);
        assert_eq!(plan.to_create, 15);
        assert!(!plan.is_empty());
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
    }

    #[test]
    fn test_dh010_plan_follows_execution_order() {
        let (config, order) = setup(STACK);
        let plan = plan(&config, &order, None).unwrap();
        let pos = |a: &str| plan.changes.iter().position(|c| c.address == a).unwrap();
        assert!(pos("main") < pos("public[0]"));
        assert!(pos("public[1]") < pos("app-lb"));
        assert!(pos("http") < pos("app"));
    }

    #[test]
    fn test_dh010_plan_all_unchanged() {
        let (config, order) = setup(STACK);
        let first = plan(&config, &order, None).unwrap();
        let lock = lock_from(&first, ResourceStatus::Converged);
        let second = plan(&config, &order, Some(&lock)).unwrap();
        assert_eq!(second.unchanged, 15);
        assert!(second.is_empty());
    }

    #[test]
    fn test_dh010_update_and_replace() {
        let (config, order) = setup(STACK);
        let lock = lock_from(&plan(&config, &order, None).unwrap(), ResourceStatus::Converged);

        let changed = STACK
            .replace("desired_count: 1", "desired_count: 3")
            .replace("image: nginx:latest", "image: nginx:1.27");
        let (config, order) = setup(&changed);
        let plan = plan(&config, &order, Some(&lock)).unwrap();
        let action = |a: &str| plan.changes.iter().find(|c| c.address == a).unwrap().action;
        assert_eq!(action("app"), PlanAction::Update);
        assert_eq!(action("app-task"), PlanAction::Replace);
        assert_eq!(action("main"), PlanAction::NoOp);
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.to_replace, 1);
    }

    #[test]
    fn test_dh010_failed_entry_reapplied() {
        let (config, order) = setup(STACK);
        let lock = lock_from(&plan(&config, &order, None).unwrap(), ResourceStatus::Failed);
        let plan = plan(&config, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_update, 15);
    }

    #[test]
    fn test_dh010_removed_declaration_destroyed() {
        let (config, order) = setup(STACK);
        let mut lock = lock_from(&plan(&config, &order, None).unwrap(), ResourceStatus::Converged);
        lock.resources.insert(
            "old[2]".to_string(),
            ResourceLock {
                resource_type: ResourceType::Subnet,
                status: ResourceStatus::Converged,
                applied_at: None,
                hash: "blake3:gone".to_string(),
                details: IndexMap::new(),
            },
        );
        let plan = plan(&config, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_destroy, 1);
        let last = plan.changes.last().unwrap();
        assert_eq!(last.address, "old[2]");
        assert_eq!(last.resource_id, "old");
        assert_eq!(last.action, PlanAction::Destroy);
        assert!(last.hash.is_none());
    }

    #[test]
    fn test_dh010_teardown_plan_reverse() {
        let (config, order) = setup(STACK);
        let lock = lock_from(&plan(&config, &order, None).unwrap(), ResourceStatus::Converged);
        let teardown = teardown_plan(&lock);
        assert_eq!(teardown.to_destroy, 15);
        assert_eq!(teardown.changes.first().unwrap().address, "app");
        // cluster has no dependencies and sorts first
        assert_eq!(teardown.changes.last().unwrap().address, "cluster");
    }

    #[test]
    fn test_dh010_hash_deterministic() {
        let (config, order) = setup(STACK);
        let a = codegen::render_instances(&config, &order).unwrap();
        let b = codegen::render_instances(&config, &order).unwrap();
        assert_eq!(hash_desired_state(&a[0]), hash_desired_state(&b[0]));
        assert!(hash_desired_state(&a[0]).starts_with("blake3:"));
        assert_ne!(hash_desired_state(&a[0]), hash_desired_state(&a[1]));
    }

    #[test]
    fn test_dh010_describe_action() {
        let d = describe_action("public[0]", ResourceType::Subnet, PlanAction::Create);
        assert_eq!(d, "public[0]: create subnet");
        let d = describe_action("app-task", ResourceType::TaskDefinition, PlanAction::Replace);
        assert!(d.contains("immutable"));
    }
}
