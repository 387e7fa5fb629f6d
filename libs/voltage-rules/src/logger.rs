//! Rule execution logger
//!
//! Every execution is summarized on one `tracing` line and appended to the
//! capped list `rule:{id}:executions` (newest first).
//!
//! Line format: `[RULE] {id} {status} | {variables} | {actions}`, e.g.
//! `[RULE] low_soc triggered | soc=15.0 | publish OK`.

use crate::executor::{ActionResult, RuleExecution, RuleOutcome};
use errors::Result;
use serde_json::{Map, Value};
use tracing::info;
use voltage_model::KeySpaceConfig;
use voltage_rtdb::Txn;

/// Executions kept per rule
pub const DEFAULT_EXECUTION_LOG_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct RuleLogger {
    keyspace: KeySpaceConfig,
    limit: usize,
}

impl RuleLogger {
    pub fn new(keyspace: KeySpaceConfig, limit: usize) -> Self {
        Self {
            keyspace,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append an execution to the rule's log and emit its summary line
    pub fn record_in(&self, tx: &mut Txn<'_>, execution: &RuleExecution) -> Result<()> {
        let key = self.keyspace.rule_executions_key(&execution.rule_id);
        tx.lpush(&key, serde_json::to_string(execution)?)?;
        tx.ltrim(&key, 0, last_index(self.limit))?;
        info!("{}", summary_line(execution));
        Ok(())
    }

    /// Most recent executions, newest first
    pub fn recent_in(&self, tx: &mut Txn<'_>, rule_id: &str, limit: usize) -> Result<Vec<RuleExecution>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.keyspace.rule_executions_key(rule_id);
        tx.lrange_strings(&key, 0, last_index(limit.min(self.limit)))?
            .iter()
            .map(|json| serde_json::from_str::<RuleExecution>(json).map_err(Into::into))
            .collect()
    }
}

/// One-line summary of an execution
pub fn summary_line(execution: &RuleExecution) -> String {
    let vars = execution
        .outcome
        .variables()
        .map(format_variables)
        .unwrap_or_else(|| "-".to_string());
    let actions = match &execution.outcome {
        RuleOutcome::Executed(dag) => format!(
            "{} node(s), {} failed action(s){}",
            dag.executed.len(),
            dag.failed_actions,
            if dag.completed { "" } else { ", partial" }
        ),
        RuleOutcome::Triggered { action, .. } => format_actions(std::slice::from_ref(action)),
        RuleOutcome::CoolingDown { remaining_ms, .. } => format!("cooldown {}ms", remaining_ms),
        RuleOutcome::NotTriggered { .. } => "-".to_string(),
        RuleOutcome::Disabled { reason } => reason.clone(),
    };
    format!(
        "[RULE] {} {} | {} | {}",
        execution.rule_id,
        execution.outcome.status(),
        vars,
        actions
    )
}

/// `X1=50.3 X2=on`; numbers with one decimal
pub fn format_variables(vars: &Map<String, Value>) -> String {
    if vars.is_empty() {
        return "-".to_string();
    }
    vars.iter()
        .map(|(k, v)| match v {
            Value::Number(n) => match n.as_f64() {
                Some(f) => format!("{}={:.1}", k, f),
                None => format!("{}={}", k, n),
            },
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `publish OK, store FAIL`
pub fn format_actions(actions: &[ActionResult]) -> String {
    if actions.is_empty() {
        return "-".to_string();
    }
    actions
        .iter()
        .map(|a| format!("{} {}", a.action, if a.success { "OK" } else { "FAIL" }))
        .collect::<Vec<_>>()
        .join(", ")
}

/// List index of the last of `count` (at least one) entries
fn last_index(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX) - 1
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::executor::DagOutcome;
    use serde_json::json;

    fn action(name: &str, success: bool) -> ActionResult {
        ActionResult {
            action: name.to_string(),
            success,
            output: None,
            error: None,
        }
    }

    #[test]
    fn test_format_variables() {
        let vars = json!({"X1": 50.34, "mode": "auto", "on": true});
        assert_eq!(
            format_variables(vars.as_object().unwrap()),
            "X1=50.3 mode=auto on=true"
        );
        assert_eq!(format_variables(&Map::new()), "-");
    }

    #[test]
    fn test_summary_lines() {
        let triggered = RuleExecution {
            rule_id: "low_soc".to_string(),
            timestamp: 0,
            depth: 1,
            outcome: RuleOutcome::Triggered {
                action: action("publish", true),
                variables: json!({"soc": 15}).as_object().cloned().unwrap(),
            },
        };
        assert_eq!(
            summary_line(&triggered),
            "[RULE] low_soc triggered | soc=15.0 | publish OK"
        );

        let dag = RuleExecution {
            rule_id: "flow".to_string(),
            timestamp: 0,
            depth: 1,
            outcome: RuleOutcome::Executed(DagOutcome {
                completed: false,
                executed: vec!["a".to_string()],
                failed_actions: 1,
                ..DagOutcome::default()
            }),
        };
        assert_eq!(
            summary_line(&dag),
            "[RULE] flow executed | - | 1 node(s), 1 failed action(s), partial"
        );
        assert_eq!(
            format_actions(&[action("publish", true), action("store", false)]),
            "publish OK, store FAIL"
        );
    }
}
