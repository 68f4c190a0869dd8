//! DH-015: Executor — orchestration for apply and teardown.
//!
//! parse → validate → order → render → plan → write engine document →
//! engine init → engine apply → lock → events
//!
//! The external engine owns convergence. A failed engine call is recorded
//! and surfaced; nothing is rolled back.

use super::codegen::{self, RenderedInstance};
use super::planner;
use super::resolver;
use super::state;
use super::types::*;
use crate::transport::{self, quote_path, shell_quote};
use crate::tripwire::{eventlog, hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// File name of the rendered engine document.
pub const DOCUMENT_FILE: &str = "main.tf.json";

/// Configuration for an apply or teardown run.
pub struct ApplyConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    pub force: bool,
    pub dry_run: bool,
}

/// Path of the engine document for an engine configuration.
pub fn document_path(engine: &EngineConfig) -> PathBuf {
    engine.workdir.join(DOCUMENT_FILE)
}

/// Shell script invoking the engine with `args` in its working directory.
pub fn engine_script(engine: &EngineConfig, args: &[&str]) -> String {
    format!(
        "set -euo pipefail\n{} -chdir={} {}",
        shell_quote(&engine.command),
        quote_path(&engine.workdir),
        args.join(" ")
    )
}

/// Serialize the document and write it atomically. Returns its hash.
pub fn write_document(engine: &EngineConfig, document: &serde_json::Value) -> Result<String, String> {
    let mut content = serde_json::to_string_pretty(document)
        .map_err(|e| format!("cannot serialize engine document: {}", e))?;
    content.push('\n');
    state::write_atomic(&document_path(engine), &content)?;
    Ok(hasher::hash_string(&content))
}

/// Run one engine phase; errors carry the exit code and stderr.
fn run_engine(engine: &EngineConfig, phase: &str, args: &[&str]) -> Result<(), String> {
    info!(command = %engine.command, phase, "invoking engine");
    let out = transport::exec_script(&engine_script(engine, args))?;
    if out.success() {
        Ok(())
    } else {
        Err(format!("engine {} failed: {}", phase, out.failure_summary()))
    }
}

/// Init (when enabled) followed by the main phase.
fn run_engine_phases(engine: &EngineConfig, phase: &str, args: &[&str]) -> Result<(), (String, String)> {
    if engine.init {
        run_engine(engine, "init", &["init", "-input=false"])
            .map_err(|e| ("init".to_string(), e))?;
    }
    run_engine(engine, phase, args).map_err(|e| (phase.to_string(), e))
}

fn log_tripwire(path: &Path, tripwire: bool, event: ProvenanceEvent) {
    if tripwire {
        if let Err(e) = eventlog::append_event(path, event) {
            warn!(error = %e, "cannot append provenance event");
        }
    }
}

fn result_from_plan(stack: &str, plan: &ExecutionPlan, engine_invoked: bool, start: Instant) -> ApplyResult {
    ApplyResult {
        stack: stack.to_string(),
        created: plan.to_create,
        updated: plan.to_update,
        replaced: plan.to_replace,
        destroyed: plan.to_destroy,
        unchanged: plan.unchanged,
        engine_invoked,
        total_duration: start.elapsed(),
    }
}

/// Execute an apply run.
pub fn apply(cfg: &ApplyConfig) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let config = cfg.config;

    let execution_order = resolver::build_execution_order(config)?;
    let lock = state::load_lock(cfg.state_dir, &config.name)?;
    let instances = codegen::render_instances(config, &execution_order)?;
    let plan = planner::plan_rendered(config, &execution_order, &instances, lock.as_ref());

    info!(
        stack = %config.name,
        create = plan.to_create,
        update = plan.to_update,
        replace = plan.to_replace,
        destroy = plan.to_destroy,
        unchanged = plan.unchanged,
        "plan ready"
    );

    if cfg.dry_run {
        return Ok(result_from_plan(&config.name, &plan, false, start));
    }
    if plan.is_empty() && !cfg.force {
        info!(stack = %config.name, "no changes, engine not invoked");
        return Ok(result_from_plan(&config.name, &plan, false, start));
    }

    let events = eventlog::event_log_path(cfg.state_dir, &config.name);
    let tripwire = config.policy.tripwire;
    let run_id = eventlog::generate_run_id();

    log_tripwire(
        &events,
        tripwire,
        ProvenanceEvent::ApplyStarted {
            stack: config.name.clone(),
            run_id: run_id.clone(),
            deckhand_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    for change in plan.changes.iter().filter(|c| c.action != PlanAction::NoOp) {
        log_tripwire(
            &events,
            tripwire,
            ProvenanceEvent::ChangePlanned {
                stack: config.name.clone(),
                address: change.address.clone(),
                action: change.action.to_string(),
            },
        );
    }

    let document = codegen::render_document(config, &instances)?;
    let document_hash = write_document(&config.engine, &document)?;

    let mut lock = lock.unwrap_or_else(|| state::new_lock(&config.name));

    if let Err((phase, err)) =
        run_engine_phases(&config.engine, "apply", &["apply", "-auto-approve", "-input=false"])
    {
        error!(stack = %config.name, phase = %phase, error = %err, "engine failed");
        record_failure(&mut lock, &plan);
        if config.policy.lock_file {
            state::save_lock(cfg.state_dir, &lock)?;
        }
        log_tripwire(
            &events,
            tripwire,
            ProvenanceEvent::EngineFailed {
                stack: config.name.clone(),
                run_id,
                phase,
                error: err.clone(),
            },
        );
        return Err(err);
    }

    record_success(&mut lock, &plan, &instances);
    lock.document_hash = Some(document_hash);
    if config.policy.lock_file {
        state::save_lock(cfg.state_dir, &lock)?;
    }

    let result = result_from_plan(&config.name, &plan, true, start);
    log_tripwire(
        &events,
        tripwire,
        ProvenanceEvent::ApplyCompleted {
            stack: config.name.clone(),
            run_id,
            created: result.created,
            updated: result.updated,
            replaced: result.replaced,
            destroyed: result.destroyed,
            unchanged: result.unchanged,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );
    info!(stack = %config.name, seconds = result.total_duration.as_secs_f64(), "apply complete");
    Ok(result)
}

/// Converged entries for everything declared; destroyed entries dropped.
fn record_success(lock: &mut StateLock, plan: &ExecutionPlan, instances: &[RenderedInstance]) {
    let now = eventlog::now_iso8601();
    for change in &plan.changes {
        if change.action == PlanAction::Destroy {
            lock.resources.shift_remove(&change.address);
            continue;
        }
        let mut details = indexmap::IndexMap::new();
        if let Some(instance) = instances.iter().find(|i| i.address == change.address) {
            let blocks: Vec<String> = instance
                .blocks
                .iter()
                .map(|b| format!("{}.{}", b.kind, b.name))
                .collect();
            details.insert("blocks".to_string(), blocks.join(", "));
        }
        lock.resources.insert(
            change.address.clone(),
            ResourceLock {
                resource_type: change.resource_type,
                status: ResourceStatus::Converged,
                applied_at: Some(now.clone()),
                hash: change.hash.clone().unwrap_or_default(),
                details,
            },
        );
    }
    lock.generated_at = now;
}

/// Every changing entry is marked failed; no-ops keep their state.
fn record_failure(lock: &mut StateLock, plan: &ExecutionPlan) {
    for change in plan.changes.iter().filter(|c| c.action != PlanAction::NoOp) {
        let hash = change
            .hash
            .clone()
            .or_else(|| lock.resources.get(&change.address).map(|r| r.hash.clone()))
            .unwrap_or_default();
        lock.resources.insert(
            change.address.clone(),
            ResourceLock {
                resource_type: change.resource_type,
                status: ResourceStatus::Failed,
                applied_at: Some(eventlog::now_iso8601()),
                hash,
                details: indexmap::IndexMap::new(),
            },
        );
    }
}

/// Destroy everything recorded in the stack's lock.
pub fn teardown(cfg: &ApplyConfig) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let config = cfg.config;

    let mut lock = state::load_lock(cfg.state_dir, &config.name)?
        .unwrap_or_else(|| state::new_lock(&config.name));
    let plan = planner::teardown_plan(&lock);

    info!(stack = %config.name, destroy = plan.to_destroy, "teardown plan ready");

    if cfg.dry_run || (plan.is_empty() && !cfg.force) {
        return Ok(result_from_plan(&config.name, &plan, false, start));
    }

    let events = eventlog::event_log_path(cfg.state_dir, &config.name);
    let tripwire = config.policy.tripwire;
    let run_id = eventlog::generate_run_id();

    // The engine needs its configuration present to resolve providers
    let document = codegen::render_stack(config)?;
    write_document(&config.engine, &document)?;

    if let Err((phase, err)) =
        run_engine_phases(&config.engine, "destroy", &["destroy", "-auto-approve", "-input=false"])
    {
        error!(stack = %config.name, phase = %phase, error = %err, "engine failed");
        log_tripwire(
            &events,
            tripwire,
            ProvenanceEvent::EngineFailed {
                stack: config.name.clone(),
                run_id,
                phase,
                error: err.clone(),
            },
        );
        return Err(err);
    }

    lock.resources.clear();
    lock.document_hash = None;
    lock.generated_at = eventlog::now_iso8601();
    if config.policy.lock_file {
        state::save_lock(cfg.state_dir, &lock)?;
    }

    let result = result_from_plan(&config.name, &plan, true, start);
    log_tripwire(
        &events,
        tripwire,
        ProvenanceEvent::TeardownCompleted {
            stack: config.name.clone(),
            run_id,
            destroyed: result.destroyed,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );
    info!(stack = %config.name, destroyed = result.destroyed, "teardown complete");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = include_str!("../../demos/web-stack.yaml");

    /// Stack whose engine is a recording script in `dir`.
    fn stack_with_engine(dir: &Path, exit_on: Option<&str>) -> StackConfig {
        let engine = dir.join("engine.sh");
        let fail = match exit_on {
            Some(verb) => format!("if [ \"$2\" = \"{}\" ]; then echo 'Error: denied' >&2; exit 3; fi\n", verb),
            None => String::new(),
        };
        std::fs::write(
            &engine,
            format!(
                "#!/usr/bin/env bash\necho \"$2\" >> {}\n{}exit 0\n",
                quote_path(&dir.join("calls.log")),
                fail
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let mut config: StackConfig = serde_yaml_ng::from_str(STACK).unwrap();
        config.engine.command = engine.to_string_lossy().to_string();
        config.engine.workdir = dir.join("engine");
        config
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_dh015_engine_script() {
        let engine = EngineConfig::default();
        let script = engine_script(&engine, &["apply", "-auto-approve"]);
        assert!(script.starts_with("set -euo pipefail\n"));
        assert!(script.ends_with("'terraform' -chdir='.deckhand/engine' apply -auto-approve"));
    }

    #[test]
    fn test_dh015_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), None);
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: true };
        let result = apply(&cfg).unwrap();
        assert_eq!(result.created, 15);
        assert!(!result.engine_invoked);
        assert!(calls(dir.path()).is_empty());
        assert!(!document_path(&config.engine).exists());
        assert!(!state_dir.exists());
    }

    #[test]
    fn test_dh015_apply_writes_document_lock_events() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), None);
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        let result = apply(&cfg).unwrap();

        assert!(result.engine_invoked);
        assert_eq!(result.created, 15);
        assert_eq!(calls(dir.path()), vec!["init", "apply"]);

        let doc_path = document_path(&config.engine);
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&doc_path).unwrap()).unwrap();
        assert_eq!(doc["resource"]["aws_vpc"]["main"]["cidr_block"], "10.0.0.0/16");

        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 15);
        assert!(lock.resources.values().all(|r| r.status == ResourceStatus::Converged));
        assert_eq!(lock.document_hash, Some(hasher::hash_file(&doc_path).unwrap()));
        assert_eq!(lock.resources["public[1]"].details["blocks"], "aws_subnet.public_1");

        let events = std::fs::read_to_string(eventlog::event_log_path(&state_dir, "web-stack")).unwrap();
        assert!(events.contains("apply_started"));
        assert!(events.contains("change_planned"));
        assert!(events.contains("apply_completed"));
    }

    #[test]
    fn test_dh015_second_apply_skips_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), None);
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        apply(&cfg).unwrap();

        let again = apply(&cfg).unwrap();
        assert!(!again.engine_invoked);
        assert_eq!(again.unchanged, 15);
        assert_eq!(calls(dir.path()).len(), 2);

        let forced = ApplyConfig { force: true, ..cfg };
        assert!(apply(&forced).unwrap().engine_invoked);
        assert_eq!(calls(dir.path()).len(), 4);
    }

    #[test]
    fn test_dh015_engine_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), Some("apply"));
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        let err = apply(&cfg).unwrap_err();
        assert!(err.contains("engine apply failed"));
        assert!(err.contains("exit code 3"));
        assert!(err.contains("denied"));

        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert!(lock.resources.values().all(|r| r.status == ResourceStatus::Failed));
        assert!(lock.document_hash.is_none());

        let events = std::fs::read_to_string(eventlog::event_log_path(&state_dir, "web-stack")).unwrap();
        assert!(events.contains("engine_failed"));
        assert!(!events.contains("apply_completed"));
    }

    #[test]
    fn test_dh015_init_failure_stops_before_apply() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), Some("init"));
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        let err = apply(&cfg).unwrap_err();
        assert!(err.contains("engine init failed"));
        assert_eq!(calls(dir.path()), vec!["init"]);
    }

    #[test]
    fn test_dh015_init_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = stack_with_engine(dir.path(), None);
        config.engine.init = false;
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        apply(&cfg).unwrap();
        assert_eq!(calls(dir.path()), vec!["apply"]);
    }

    #[test]
    fn test_dh015_teardown_empties_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), None);
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        apply(&cfg).unwrap();

        let result = teardown(&cfg).unwrap();
        assert_eq!(result.destroyed, 15);
        assert_eq!(calls(dir.path()), vec!["init", "apply", "init", "destroy"]);
        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert!(lock.resources.is_empty());

        let events = std::fs::read_to_string(eventlog::event_log_path(&state_dir, "web-stack")).unwrap();
        assert!(events.contains("teardown_completed"));
    }

    #[test]
    fn test_dh015_teardown_nothing_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack_with_engine(dir.path(), None);
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        let result = teardown(&cfg).unwrap();
        assert_eq!(result.destroyed, 0);
        assert!(!result.engine_invoked);
        assert!(calls(dir.path()).is_empty());
    }

    #[test]
    fn test_dh015_tripwire_disabled_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = stack_with_engine(dir.path(), None);
        config.policy.tripwire = false;
        let state_dir = dir.path().join("state");
        let cfg = ApplyConfig { config: &config, state_dir: &state_dir, force: false, dry_run: false };
        apply(&cfg).unwrap();
        assert!(!eventlog::event_log_path(&state_dir, "web-stack").exists());
    }
}
