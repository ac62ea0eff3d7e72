//! Planned changes for declared cloud resources

use serde::{Deserialize, Serialize};

/// A planned change for one declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Resource address in the manifest (e.g. "rds_instance.main")
    pub address: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Resource type (e.g., "rds_instance", "nat_dnat_rule")
    pub resource_type: String,

    /// Attributes that differ between the applied and the desired configuration
    pub changed: Vec<String>,
}

impl Action {
    pub fn new(
        address: impl Into<String>,
        action_type: ActionType,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            action_type,
            resource_type: resource_type.into(),
            changed: Vec::new(),
        }
    }

    pub fn with_changed(mut self, changed: Vec<String>) -> Self {
        self.changed = changed;
        self
    }

    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Update | ActionType::Replace if !self.changed.is_empty() => {
                format!(
                    "{} {} ({})",
                    self.action_type,
                    self.address,
                    self.changed.join(", ")
                )
            }
            _ => format!("{} {}", self.action_type, self.address),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete and re-create a resource whose immutable attributes changed
    Replace,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, address: String, message: String) {
        self.succeeded.push(ActionResult {
            address,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, address: String, error: String) {
        self.failed.push(ActionResult {
            address,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Address of the resource the action targeted
    pub address: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_summary() {
        let plan = Plan::new(vec![
            Action::new("rds_instance.main", ActionType::Create, "rds_instance"),
            Action::new("nat_dnat_rule.web", ActionType::NoOp, "nat_dnat_rule"),
            Action::new("cce_addon.metrics", ActionType::Delete, "cce_addon"),
        ]);

        assert!(plan.has_changes);
        assert_eq!(
            plan.summary().to_string(),
            "1 to create, 0 to update, 0 to replace, 1 to delete, 1 unchanged"
        );
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan::new(vec![Action::new(
            "rds_instance.main",
            ActionType::NoOp,
            "rds_instance",
        )]);
        assert!(!plan.has_changes);
        assert!(!Plan::new(Vec::new()).has_changes);
    }

    #[test]
    fn test_update_description_lists_changes() {
        let action = Action::new("rds_instance.main", ActionType::Update, "rds_instance")
            .with_changed(vec!["name".to_string(), "flavor".to_string()]);
        assert_eq!(action.description(), "update rds_instance.main (name, flavor)");

        let create = Action::new("cce_addon.metrics", ActionType::Create, "cce_addon");
        assert_eq!(create.description(), "create cce_addon.metrics");
    }
}
