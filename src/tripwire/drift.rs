//! DH-016: Drift detection — compare the engine document and the declaration
//! to what the lock says was last applied.

use crate::core::executor;
use crate::core::planner;
use crate::core::resolver;
use crate::core::types::{PlanAction, ResourceStatus, StackConfig, StateLock};
use crate::tripwire::hasher;

/// Pseudo-address used for findings about the engine document itself.
pub const DOCUMENT_ADDRESS: &str = "<engine-document>";

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub address: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check the engine document on disk against the lock's document hash.
pub fn check_document_drift(config: &StackConfig, lock: &StateLock) -> Option<DriftFinding> {
    let expected = lock.document_hash.as_deref()?;
    let path = executor::document_path(&config.engine);
    if !path.exists() {
        return Some(DriftFinding {
            address: DOCUMENT_ADDRESS.to_string(),
            expected_hash: expected.to_string(),
            actual_hash: "MISSING".to_string(),
            detail: format!("{} does not exist", path.display()),
        });
    }

    let actual = hasher::hash_file(&path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual != expected {
        Some(DriftFinding {
            address: DOCUMENT_ADDRESS.to_string(),
            expected_hash: expected.to_string(),
            actual_hash: actual,
            detail: format!("{} modified outside deckhand", path.display()),
        })
    } else {
        None
    }
}

/// Instances whose declaration no longer matches the lock.
pub fn check_declaration_drift(
    config: &StackConfig,
    lock: &StateLock,
) -> Result<Vec<DriftFinding>, String> {
    let order = resolver::build_execution_order(config)?;
    let plan = planner::plan(config, &order, Some(lock))?;

    let findings = plan
        .changes
        .into_iter()
        .filter(|c| c.action != PlanAction::NoOp)
        .map(|c| {
            let recorded = lock.resources.get(&c.address);
            let detail = match (c.action, recorded.map(|r| &r.status)) {
                (_, Some(ResourceStatus::Failed)) => "last apply failed".to_string(),
                (_, Some(ResourceStatus::Drifted)) => "engine input changed since last apply".to_string(),
                (PlanAction::Create, _) => "declared but never applied".to_string(),
                (PlanAction::Destroy, _) => "applied but no longer declared".to_string(),
                _ => "declaration changed since last apply".to_string(),
            };
            DriftFinding {
                expected_hash: recorded.map(|r| r.hash.clone()).unwrap_or_else(|| "ABSENT".to_string()),
                actual_hash: c.hash.unwrap_or_else(|| "REMOVED".to_string()),
                address: c.address,
                detail,
            }
        })
        .collect();
    Ok(findings)
}

/// All drift for a stack: document first, then declarations.
pub fn detect_drift(config: &StackConfig, lock: &StateLock) -> Result<Vec<DriftFinding>, String> {
    let mut findings: Vec<DriftFinding> = check_document_drift(config, lock).into_iter().collect();
    findings.extend(check_declaration_drift(config, lock)?);
    Ok(findings)
}

/// Mark converged lock entries drifted when the engine document was
/// tampered with, so the next apply runs the engine again. Returns the
/// number of entries marked.
pub fn mark_drifted(lock: &mut StateLock, findings: &[DriftFinding]) -> usize {
    if !findings.iter().any(|f| f.address == DOCUMENT_ADDRESS) {
        return 0;
    }
    let mut marked = 0;
    for rl in lock.resources.values_mut() {
        if rl.status == ResourceStatus::Converged {
            rl.status = ResourceStatus::Drifted;
            marked += 1;
        }
    }
    marked
}
