//! DH-020: CLI subcommands — init, validate, graph, render, plan, apply,
//! destroy, drift, status, pipeline, schema, completions.

use crate::core::{codegen, executor, parser, planner, resolver, state, types};
use crate::pipeline::{self, step::StepKind, PipelineRun, Secrets, ShellStepRunner, TriggerEvent};
use crate::tripwire::{drift, eventlog};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Reference stack written by `deckhand init`.
pub const REFERENCE_STACK: &str = include_str!("../../demos/web-stack.yaml");

#[derive(Parser, Debug)]
#[command(
    name = "deckhand",
    version,
    about = "Declarative container stacks — resource graph, engine rendering, deployment pipeline"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new deckhand project with the reference stack
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate deckhand.yaml without calling any external tool
    Validate {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,
    },

    /// Show the resource graph and execution order
    Graph {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Render the engine document
    Render {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show execution plan (declaration vs lock)
    Plan {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Reconcile the stack through the external engine
    Apply {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// Invoke the engine even when nothing changed
        #[arg(long)]
        force: bool,

        /// Show the plan without invoking the engine
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Tear the stack down through the external engine
    Destroy {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// Invoke the engine even when the lock is empty
        #[arg(long)]
        force: bool,

        /// Show what would be destroyed
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Detect changes made outside deckhand (tripwire)
    Drift {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Only this stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Deployment pipeline
    #[command(subcommand)]
    Pipeline(PipelineCommands),

    /// Print the JSON schema of deckhand.yaml
    Schema,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommands {
    /// Run the pipeline for a source-control event
    Run {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,

        /// Event name
        #[arg(long, default_value = "push")]
        event: String,

        /// Branch the event refers to (plain or refs/heads/…)
        #[arg(long)]
        branch: String,

        /// Commit to check out (default: fetched head)
        #[arg(long)]
        commit: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show the steps and the commands they run
    Steps {
        /// Path to deckhand.yaml
        #[arg(short, long, default_value = "deckhand.yaml")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file, format } => cmd_graph(&file, format),
        Commands::Render { file, output } => cmd_render(&file, output.as_deref()),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Apply {
            file,
            force,
            dry_run,
            state_dir,
        } => cmd_apply(&file, &state_dir, force, dry_run),
        Commands::Destroy {
            file,
            force,
            dry_run,
            state_dir,
        } => cmd_destroy(&file, &state_dir, force, dry_run),
        Commands::Drift {
            file,
            state_dir,
            tripwire,
        } => cmd_drift(&file, &state_dir, tripwire),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Pipeline(PipelineCommands::Run {
            file,
            event,
            branch,
            commit,
            state_dir,
        }) => cmd_pipeline_run(
            &file,
            &state_dir,
            TriggerEvent {
                event,
                branch,
                commit,
            },
        ),
        Commands::Pipeline(PipelineCommands::Steps { file }) => cmd_pipeline_steps(&file),
        Commands::Schema => {
            println!("{}", schema_json()?);
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "deckhand", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("deckhand.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, REFERENCE_STACK)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized deckhand project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse a stack file; a relative engine workdir is anchored at the file's directory.
fn load_stack(file: &Path) -> Result<types::StackConfig, String> {
    let mut config = parser::parse_config_file(file)?;
    if config.engine.workdir.is_relative() {
        let base = file.parent().unwrap_or_else(|| Path::new(""));
        config.engine.workdir = base.join(&config.engine.workdir);
    }
    Ok(config)
}

/// Parse and validate a stack file, printing every error if invalid.
fn parse_and_validate(file: &Path) -> Result<types::StackConfig, String> {
    let config = load_stack(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let instances: u32 = config.resources.values().map(|r| r.count.max(1)).sum();
    println!(
        "OK: {} ({} resources, {} instances{})",
        config.name,
        config.resources.len(),
        instances,
        if config.pipeline.is_some() {
            ", pipeline"
        } else {
            ""
        }
    );
    Ok(())
}

/// Execution order and edges as text or Graphviz.
pub fn render_graph(config: &types::StackConfig, format: GraphFormat) -> Result<String, String> {
    let order = resolver::build_execution_order(config)?;
    let edges = resolver::dependency_edges(config);
    let mut out = String::new();
    match format {
        GraphFormat::Text => {
            for (i, id) in order.iter().enumerate() {
                let deps: Vec<&str> = edges
                    .iter()
                    .filter(|(_, dependent)| dependent == id)
                    .map(|(dep, _)| dep.as_str())
                    .collect();
                let ty = config.resources[id].resource_type;
                if deps.is_empty() {
                    out.push_str(&format!("{:>3}. {} [{}]\n", i + 1, id, ty));
                } else {
                    out.push_str(&format!(
                        "{:>3}. {} [{}] <- {}\n",
                        i + 1,
                        id,
                        ty,
                        deps.join(", ")
                    ));
                }
            }
            let teardown = resolver::teardown_order(&order);
            out.push_str(&format!("teardown: {}\n", teardown.join(", ")));
        }
        GraphFormat::Dot => {
            out.push_str(&format!("digraph \"{}\" {{\n  rankdir=LR;\n", config.name));
            for id in &order {
                out.push_str(&format!(
                    "  \"{}\" [label=\"{}\\n{}\"];\n",
                    id, id, config.resources[id].resource_type
                ));
            }
            for (dep, dependent) in &edges {
                out.push_str(&format!("  \"{}\" -> \"{}\";\n", dep, dependent));
            }
            out.push_str("}\n");
        }
    }
    Ok(out)
}

fn cmd_graph(file: &Path, format: GraphFormat) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    print!("{}", render_graph(&config, format)?);
    Ok(())
}

fn cmd_render(file: &Path, output: Option<&Path>) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let document = codegen::render_stack(&config)?;
    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| format!("cannot serialize engine document: {}", e))?;
    match output {
        Some(path) => {
            state::write_atomic(path, &format!("{}\n", json))?;
            println!("Rendered {} to {}", config.name, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let execution_order = resolver::build_execution_order(&config)?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = planner::plan(&config, &execution_order, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} instances)", plan.name, plan.changes.len());
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Replace => "-/+",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {:>3} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_replace, plan.to_destroy, plan.unchanged
    );
}

fn cmd_apply(file: &Path, state_dir: &Path, force: bool, dry_run: bool) -> Result<(), String> {
    let config = parse_and_validate(file)?;

    let cfg = executor::ApplyConfig {
        config: &config,
        state_dir,
        force,
        dry_run,
    };

    if dry_run {
        cmd_plan(file, state_dir)?;
        executor::apply(&cfg)?;
        println!("Dry run — engine not invoked.");
        return Ok(());
    }

    let result = executor::apply(&cfg)?;
    if !result.engine_invoked {
        println!("{}: no changes, engine not invoked.", result.stack);
        return Ok(());
    }
    println!(
        "Apply complete: {} added, {} changed, {} replaced, {} destroyed, {} unchanged ({:.1}s).",
        result.created,
        result.updated,
        result.replaced,
        result.destroyed,
        result.unchanged,
        result.total_duration.as_secs_f64()
    );
    Ok(())
}

fn cmd_destroy(file: &Path, state_dir: &Path, force: bool, dry_run: bool) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let cfg = executor::ApplyConfig {
        config: &config,
        state_dir,
        force,
        dry_run,
    };

    if dry_run {
        let lock = state::load_lock(state_dir, &config.name)?
            .unwrap_or_else(|| state::new_lock(&config.name));
        print_plan(&planner::teardown_plan(&lock));
        println!("Dry run — engine not invoked.");
        return Ok(());
    }

    let result = executor::teardown(&cfg)?;
    if result.engine_invoked {
        println!(
            "Destroy complete: {} destroyed ({:.1}s).",
            result.destroyed,
            result.total_duration.as_secs_f64()
        );
    } else {
        println!("{}: nothing recorded, engine not invoked.", result.stack);
    }
    Ok(())
}

fn cmd_drift(file: &Path, state_dir: &Path, tripwire_mode: bool) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let Some(mut lock) = state::load_lock(state_dir, &config.name)? else {
        println!("No state for {}. Run `deckhand apply` first.", config.name);
        return Ok(());
    };

    println!("Checking {} ({} instances)...", config.name, lock.resources.len());
    let findings = drift::detect_drift(&config, &lock)?;

    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }

    let events = eventlog::event_log_path(state_dir, &config.name);
    for f in &findings {
        println!("  DRIFTED: {} ({})", f.address, f.detail);
        println!("    Expected: {}", f.expected_hash);
        println!("    Actual:   {}", f.actual_hash);
        if config.policy.tripwire {
            eventlog::append_event(
                &events,
                types::ProvenanceEvent::DriftDetected {
                    stack: config.name.clone(),
                    address: f.address.clone(),
                    expected_hash: f.expected_hash.clone(),
                    actual_hash: f.actual_hash.clone(),
                },
            )?;
        }
    }
    let marked = drift::mark_drifted(&mut lock, &findings);
    if marked > 0 && config.policy.lock_file {
        lock.generated_at = eventlog::now_iso8601();
        state::save_lock(state_dir, &lock)?;
        println!("  Marked {} instance(s) DRIFTED; next apply re-runs the engine.", marked);
    }
    println!();
    println!("Drift detected: {} finding(s)", findings.len());
    if tripwire_mode {
        return Err(format!("{} drift finding(s)", findings.len()));
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let mut names: Vec<String> = match std::fs::read_dir(state_dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();

    let mut found = false;
    for name in names {
        if stack_filter.is_some_and(|f| f != name) {
            continue;
        }
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        if let Some(ref h) = lock.document_hash {
            println!("  Document:  {}", h);
        }
        println!("  Instances: {}", lock.resources.len());
        for (address, rl) in &lock.resources {
            let applied = rl
                .applied_at
                .as_deref()
                .map(|t| format!(" ({})", t))
                .unwrap_or_default();
            println!("    {}: {} [{}]{}", address, rl.status, rl.resource_type, applied);
        }
        if let Some(line) = last_pipeline_run(state_dir, &name)? {
            println!("  Last pipeline: {}", line);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `deckhand apply` first.");
    }
    Ok(())
}

/// Summary of the most recent completed pipeline run, if any.
fn last_pipeline_run(state_dir: &Path, stack: &str) -> Result<Option<String>, String> {
    let events = eventlog::read_events(&eventlog::pipeline_log_path(state_dir, stack))?;
    Ok(events.iter().rev().find_map(|te| match &te.event {
        types::ProvenanceEvent::PipelineCompleted {
            run_id,
            success,
            total_seconds,
        } => Some(format!(
            "{} {} at {} ({:.1}s)",
            run_id,
            if *success { "succeeded" } else { "FAILED" },
            te.ts,
            total_seconds
        )),
        _ => None,
    }))
}

fn cmd_pipeline_run(file: &Path, state_dir: &Path, trigger: TriggerEvent) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let spec = config
        .pipeline
        .as_ref()
        .ok_or_else(|| format!("{} declares no pipeline", config.name))?;

    if !trigger.matches(&spec.trigger) {
        println!(
            "Skipped: {} on {} does not match trigger {} on {}",
            trigger.event,
            trigger.branch_name(),
            spec.trigger.event,
            spec.trigger.branch
        );
        return Ok(());
    }

    let secrets = Secrets::from_env(&spec.secrets).map_err(|e| e.to_string())?;
    let log = eventlog::pipeline_log_path(state_dir, &config.name);
    let run = PipelineRun {
        spec,
        secrets: &secrets,
        trigger: &trigger,
        event_log: config.policy.tripwire.then_some(log.as_path()),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;
    let report = runtime
        .block_on(pipeline::run_pipeline(&run, &ShellStepRunner))
        .map_err(|e| e.to_string())?;

    println!("Pipeline {} ({})", report.run_id, config.name);
    for result in &report.steps {
        let mark = if result.success { "ok" } else { "FAILED" };
        println!(
            "  {:<15} {:<6} ({:.1}s)",
            result.kind.name(),
            mark,
            result.duration.as_secs_f64()
        );
    }
    for kind in StepKind::ALL.iter().skip(report.steps.len()) {
        println!("  {:<15} skipped", kind.name());
    }

    match report.failure {
        None => {
            println!(
                "Pipeline complete: {} steps ({:.1}s).",
                report.passed_count(),
                report.total_duration.as_secs_f64()
            );
            Ok(())
        }
        Some(ref e) => Err(format!("pipeline aborted: {}", secrets.redact(&e.to_string()))),
    }
}

fn cmd_pipeline_steps(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let spec = config
        .pipeline
        .as_ref()
        .ok_or_else(|| format!("{} declares no pipeline", config.name))?;
    let placeholders = Secrets::placeholders(&spec.secrets);

    println!("Trigger: {} on {}", spec.trigger.event, spec.trigger.branch);
    for (i, kind) in StepKind::ALL.iter().enumerate() {
        let timeout = pipeline::step::timeout_for(*kind, spec)
            .map(|d| format!(" (timeout {}s)", d.as_secs()))
            .unwrap_or_default();
        println!("  {}. {}{}", i + 1, kind, timeout);
        println!(
            "     {}",
            pipeline::step::render_command(*kind, spec, &placeholders, None)
        );
    }
    Ok(())
}

/// JSON schema of the stack declaration.
pub fn schema_json() -> Result<String, String> {
    let schema = schemars::schema_for!(types::StackConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("cannot serialize schema: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference stack in `dir` with `true` as the engine binary.
    fn write_stack(dir: &Path) -> PathBuf {
        let file = dir.join("deckhand.yaml");
        let yaml = REFERENCE_STACK.replace("command: terraform", "command: \"true\"");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_dh020_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("deckhand.yaml").exists());
        assert!(sub.join("state").is_dir());
        cmd_validate(&sub.join("deckhand.yaml")).unwrap();
    }

    #[test]
    fn test_dh020_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deckhand.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_dh020_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("deckhand.yaml");
        let yaml = REFERENCE_STACK.replace(
            "network: main\n    port: 8080",
            "network: nowhere\n    port: 8080",
        );
        std::fs::write(&file, yaml).unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_dh020_load_stack_anchors_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        let config = load_stack(&file).unwrap();
        assert_eq!(config.engine.workdir, dir.path().join(".deckhand/engine"));
    }

    #[test]
    fn test_dh020_graph_text_and_dot() {
        let config = parser::parse_config(REFERENCE_STACK).unwrap();
        let text = render_graph(&config, GraphFormat::Text).unwrap();
        assert_eq!(text.lines().count(), config.resources.len() + 1);
        assert!(text.trim_end().ends_with("main, exec-role, cluster"));
        assert!(text.contains("http [listener] <- app-tg, app-lb"));

        let dot = render_graph(&config, GraphFormat::Dot).unwrap();
        assert!(dot.starts_with("digraph \"web-stack\""));
        assert!(dot.contains("\"app-tg\" -> \"http\";"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_dh020_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        let out = dir.path().join("out.tf.json");
        cmd_render(&file, Some(&out)).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(
            doc["resource"]["aws_lb_listener"]["http"]["default_action"][0]["type"],
            "forward"
        );
    }

    #[test]
    fn test_dh020_plan_apply_status_drift_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        let state_dir = dir.path().join("state");

        cmd_plan(&file, &state_dir).unwrap();
        cmd_apply(&file, &state_dir, false, true).unwrap();
        assert!(state::load_lock(&state_dir, "web-stack").unwrap().is_none());

        cmd_apply(&file, &state_dir, false, false).unwrap();
        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 15);

        cmd_status(&state_dir, None).unwrap();
        cmd_status(&state_dir, Some("web-stack")).unwrap();
        cmd_drift(&file, &state_dir, true).unwrap();

        // Tamper with the engine input
        let doc = dir.path().join(".deckhand/engine/main.tf.json");
        std::fs::write(&doc, "{}").unwrap();
        let err = cmd_drift(&file, &state_dir, true).unwrap_err();
        assert!(err.contains("1 drift finding"));
        let events = std::fs::read_to_string(eventlog::event_log_path(&state_dir, "web-stack")).unwrap();
        assert!(events.contains("drift_detected"));
        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert!(lock
            .resources
            .values()
            .all(|r| r.status == types::ResourceStatus::Drifted));

        cmd_destroy(&file, &state_dir, false, true).unwrap();
        cmd_destroy(&file, &state_dir, false, false).unwrap();
        let lock = state::load_lock(&state_dir, "web-stack").unwrap().unwrap();
        assert!(lock.resources.is_empty());
    }

    #[test]
    fn test_dh020_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(&dir.path().join("state"), None).unwrap();
    }

    #[test]
    fn test_dh020_pipeline_steps() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        cmd_pipeline_steps(&file).unwrap();
    }

    #[test]
    fn test_dh020_pipeline_skips_other_branch() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        let trigger = TriggerEvent {
            event: "push".to_string(),
            branch: "feature/x".to_string(),
            commit: None,
        };
        cmd_pipeline_run(&file, &dir.path().join("state"), trigger).unwrap();
        assert!(!eventlog::pipeline_log_path(&dir.path().join("state"), "web-stack").exists());
    }

    #[test]
    fn test_dh020_pipeline_missing_secret_fails_before_steps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("deckhand.yaml");
        let yaml = REFERENCE_STACK.replace(
            "repository: ECR_REPOSITORY",
            "repository: DECKHAND_TEST_UNSET_REPOSITORY",
        );
        std::fs::write(&file, yaml).unwrap();
        let trigger = TriggerEvent {
            event: "push".to_string(),
            branch: "main".to_string(),
            commit: None,
        };
        let state_dir = dir.path().join("state");
        let err = cmd_pipeline_run(&file, &state_dir, trigger).unwrap_err();
        assert!(err.contains("missing secret 'repository'"));
        assert!(!eventlog::pipeline_log_path(&state_dir, "web-stack").exists());
    }

    #[test]
    fn test_dh020_schema() {
        let schema = schema_json().unwrap();
        assert!(schema.contains("\"resources\""));
        assert!(schema.contains("task_definition"));
    }

    #[test]
    fn test_dh020_cli_parses() {
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from([
            "deckhand", "-vv", "--log-json", "pipeline", "run", "--branch", "main",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.log_json);
        assert!(matches!(
            cli.command,
            Commands::Pipeline(PipelineCommands::Run { .. })
        ));
    }

    #[test]
    fn test_dh020_dispatch_validate() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path());
        dispatch(Commands::Validate { file }).unwrap();
    }
}
