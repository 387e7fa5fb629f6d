//! State machine schemas
//!
//! A schema is a transition table keyed by `(state, event)` for one entity
//! type. Built-in schemas cover alarms and rules.

use serde::{Deserialize, Serialize};

/// One edge of a transition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub event: String,
    pub to: String,
}

/// Transition table for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineSchema {
    pub entity_type: String,
    pub initial_state: String,
    pub transitions: Vec<Transition>,
}

impl StateMachineSchema {
    pub fn new(entity_type: impl Into<String>, initial_state: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            initial_state: initial_state.into(),
            transitions: Vec::new(),
        }
    }

    /// Add `from --event--> to`
    pub fn transition(mut self, from: &str, event: &str, to: &str) -> Self {
        self.transitions.push(Transition {
            from: from.to_string(),
            event: event.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Alarm lifecycle
    ///
    /// ```text
    /// active --acknowledge--> acknowledged
    /// active --resolve--> resolved
    /// acknowledged --resolve--> resolved
    /// resolved --close--> closed
    /// acknowledged|resolved --reactivate--> active
    /// ```
    pub fn alarm() -> Self {
        Self::new("alarm", "active")
            .transition("active", "acknowledge", "acknowledged")
            .transition("active", "resolve", "resolved")
            .transition("acknowledged", "resolve", "resolved")
            .transition("resolved", "close", "closed")
            .transition("acknowledged", "reactivate", "active")
            .transition("resolved", "reactivate", "active")
    }

    /// Rule lifecycle
    ///
    /// ```text
    /// draft --activate--> active
    /// active --pause--> paused
    /// paused --resume--> active
    /// active|paused --disable--> disabled
    /// disabled --reset--> draft
    /// ```
    pub fn rule() -> Self {
        Self::new("rule", "draft")
            .transition("draft", "activate", "active")
            .transition("active", "pause", "paused")
            .transition("paused", "resume", "active")
            .transition("active", "disable", "disabled")
            .transition("paused", "disable", "disabled")
            .transition("disabled", "reset", "draft")
    }

    /// Target state of `event` from `state`
    pub fn next_state(&self, state: &str, event: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|t| t.from == state && t.event == event)
            .map(|t| t.to.as_str())
    }

    /// Events accepted in `state`, in table order
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_table() {
        let alarm = StateMachineSchema::alarm();
        assert_eq!(alarm.initial_state, "active");
        assert_eq!(alarm.next_state("active", "acknowledge"), Some("acknowledged"));
        assert_eq!(alarm.next_state("acknowledged", "resolve"), Some("resolved"));
        assert_eq!(alarm.next_state("resolved", "close"), Some("closed"));
        assert_eq!(alarm.next_state("resolved", "reactivate"), Some("active"));
        assert_eq!(alarm.next_state("closed", "reactivate"), None);
        assert_eq!(alarm.next_state("active", "close"), None);
        assert_eq!(alarm.events_from("active"), vec!["acknowledge", "resolve"]);
        assert!(alarm.events_from("closed").is_empty());
    }

    #[test]
    fn test_rule_table() {
        let rule = StateMachineSchema::rule();
        assert_eq!(rule.initial_state, "draft");
        assert_eq!(rule.next_state("draft", "activate"), Some("active"));
        assert_eq!(rule.next_state("paused", "disable"), Some("disabled"));
        assert_eq!(rule.next_state("disabled", "reset"), Some("draft"));
        assert_eq!(rule.next_state("draft", "pause"), None);
        assert_eq!(rule.events_from("active"), vec!["pause", "disable"]);
    }
}
