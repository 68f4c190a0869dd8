//! DH-017: Pipeline steps — fixed order, one shell command each.

use super::PipelineError;
use crate::core::types::{PipelineSpec, SecretNames};
use std::fmt;
use std::time::Duration;

/// Builtin deployment steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// git fetch + checkout of the pushed revision
    Checkout,

    /// docker login against the private registry
    RegistryLogin,

    /// docker build
    Build,

    /// docker tag with the registry repository
    Tag,

    /// docker push
    Push,

    /// force a new service deployment and wait for stability
    Deploy,
}

impl StepKind {
    /// Every step, in the only order they ever run.
    pub const ALL: [StepKind; 6] = [
        StepKind::Checkout,
        StepKind::RegistryLogin,
        StepKind::Build,
        StepKind::Tag,
        StepKind::Push,
        StepKind::Deploy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Checkout => "checkout",
            StepKind::RegistryLogin => "registry_login",
            StepKind::Build => "build",
            StepKind::Tag => "tag",
            StepKind::Push => "push",
            StepKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved secret values. Opaque: never logged, only substituted.
#[derive(Clone)]
pub struct Secrets {
    pub repository: String,
    pub account: String,
    pub region: String,
    pub task_definition: String,
    pub service: String,
    pub cluster: String,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secrets(***)")
    }
}

impl Secrets {
    /// Resolve every secret through `lookup`; a missing or empty value fails.
    pub fn resolve<F>(names: &SecretNames, lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |secret: &'static str, var: &str| -> Result<String, PipelineError> {
            match lookup(var) {
                Some(v) if !v.is_empty() && !var.is_empty() => Ok(v),
                _ => Err(PipelineError::MissingSecret {
                    secret,
                    var: var.to_string(),
                }),
            }
        };
        Ok(Self {
            repository: get("repository", &names.repository)?,
            account: get("account", &names.account)?,
            region: get("region", &names.region)?,
            task_definition: get("task_definition", &names.task_definition)?,
            service: get("service", &names.service)?,
            cluster: get("cluster", &names.cluster)?,
        })
    }

    /// Resolve from the process environment.
    pub fn from_env(names: &SecretNames) -> Result<Self, PipelineError> {
        Self::resolve(names, |var| std::env::var(var).ok())
    }

    /// Variable names standing in for values, for previews.
    pub fn placeholders(names: &SecretNames) -> Self {
        Self {
            repository: names.repository.clone(),
            account: names.account.clone(),
            region: names.region.clone(),
            task_definition: names.task_definition.clone(),
            service: names.service.clone(),
            cluster: names.cluster.clone(),
        }
    }

    fn values(&self) -> [&str; 6] {
        [
            self.repository.as_str(),
            self.account.as_str(),
            self.region.as_str(),
            self.task_definition.as_str(),
            self.service.as_str(),
            self.cluster.as_str(),
        ]
    }

    /// Replace every secret value in `text` with `***`.
    pub fn redact(&self, text: &str) -> String {
        let mut values: Vec<&str> = self.values().into_iter().filter(|v| !v.is_empty()).collect();
        // Longest first so a value containing another is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        values
            .into_iter()
            .fold(text.to_string(), |acc, v| acc.replace(v, "***"))
    }

    /// Private registry host for the account and region.
    pub fn registry(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }

    /// Fully-qualified image reference pushed and deployed.
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}/{}:{}", self.registry(), self.repository, tag)
    }
}

/// Quote a word for bash unless it is plainly safe.
pub fn shell_word(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@=+,".contains(c));
    if safe {
        word.to_string()
    } else {
        crate::transport::shell_quote(word)
    }
}

/// A step ready to run.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub kind: StepKind,
    pub command: String,
    pub timeout: Option<Duration>,
}

/// Render the shell command for one step.
pub fn render_command(
    kind: StepKind,
    spec: &PipelineSpec,
    secrets: &Secrets,
    commit: Option<&str>,
) -> String {
    let w = shell_word;
    match kind {
        StepKind::Checkout => format!(
            "git fetch origin {} && git checkout --force --detach {}",
            w(&spec.trigger.branch),
            w(commit.unwrap_or("FETCH_HEAD"))
        ),
        StepKind::RegistryLogin => format!(
            "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
            w(&secrets.region),
            w(&secrets.registry())
        ),
        StepKind::Build => format!("docker build -t {} {}", w(&spec.image), w(&spec.context)),
        StepKind::Tag => format!(
            "docker tag {} {}",
            w(&spec.image),
            w(&secrets.image_ref(&spec.tag))
        ),
        StepKind::Push => format!("docker push {}", w(&secrets.image_ref(&spec.tag))),
        StepKind::Deploy => format!(
            "aws ecs update-service --region {r} --cluster {c} --service {s} --task-definition {t} \
             --force-new-deployment && aws ecs wait services-stable --region {r} --cluster {c} --services {s}",
            r = w(&secrets.region),
            c = w(&secrets.cluster),
            s = w(&secrets.service),
            t = w(&secrets.task_definition)
        ),
    }
}

/// Time bound for a step: the stability wait for deploy, the step bound otherwise.
pub fn timeout_for(kind: StepKind, spec: &PipelineSpec) -> Option<Duration> {
    let secs = match kind {
        StepKind::Deploy => spec.stability_timeout_secs,
        _ => spec.step_timeout_secs,
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// All steps of a run, in order.
pub fn plan_steps(spec: &PipelineSpec, secrets: &Secrets, commit: Option<&str>) -> Vec<PipelineStep> {
    StepKind::ALL
        .iter()
        .map(|&kind| PipelineStep {
            kind,
            command: render_command(kind, spec, secrets, commit),
            timeout: timeout_for(kind, spec),
        })
        .collect()
}
