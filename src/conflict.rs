//! Conflict detection over a resolved, status-annotated plan.

use crate::resolver::InstallationPlan;

/// One classified conflict pair: the planned tool and the name it conflicts
/// with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub tool: String,
    pub conflicts_with: String,
}

/// Detector output: the two classified lists, both reported to the user.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Planned tool conflicts with a tool already present on disk.
    pub with_installed: Vec<ConflictPair>,
    /// Two tools both about to be installed conflict with each other.
    pub between_planned: Vec<ConflictPair>,
}

impl ConflictReport {
    pub fn any(&self) -> bool {
        !self.with_installed.is_empty() || !self.between_planned.is_empty()
    }
}

/// Examine the plan for mutually exclusive tools. Only tools whose binary is
/// not yet present can introduce a conflict (an install would actually
/// happen for them). With `skip_conflicts`, offenders are flagged
/// `skip_conflict` instead of the run aborting.
pub fn detect(plan: &mut InstallationPlan, skip_conflicts: bool) -> ConflictReport {
    let mut report = ConflictReport::default();
    let mut skips = Vec::new();

    for tool in plan.tools() {
        if tool.conflicts_with.is_empty() || tool.status.binary_present {
            continue;
        }
        for conflict in &tool.conflicts_with {
            let Some(other) = plan.get(conflict) else {
                continue;
            };
            let pair = ConflictPair {
                tool: tool.name.clone(),
                conflicts_with: conflict.clone(),
            };
            if other.status.binary_present {
                report.with_installed.push(pair);
            } else {
                report.between_planned.push(pair);
            }
            skips.push(tool.name.clone());
        }
    }

    if skip_conflicts {
        for name in skips {
            if let Some(tool) = plan.get_mut(&name) {
                tool.status.skip_conflict = true;
            }
        }
    }

    report
}
