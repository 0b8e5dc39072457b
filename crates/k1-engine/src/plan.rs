//! Install plans
//!
//! A plan is an ordered list of steps plus a predicate saying which sessions
//! it applies to. Destroy walks the same plan backwards, reverting the
//! reversible steps.

use crate::error::{Error, Result};
use crate::session::SessionParams;
use crate::step::Step;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Key of the final cleanup step every destroy ends with.
pub const RESET_WORKSPACE: &str = "reset-workspace";

type Applicability = Arc<dyn Fn(&SessionParams) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Plan {
    name: String,
    steps: Vec<Step>,
    applies: Applicability,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            applies: Arc::new(|_| true),
        }
    }

    pub fn applicable_when(
        mut self,
        predicate: impl Fn(&SessionParams) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.applies = Arc::new(predicate);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn keys(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.key()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.key() == key)
    }

    pub fn applies_to(&self, params: &SessionParams) -> bool {
        (self.applies)(params)
    }

    /// Steps destroy reverts, in the order it reverts them.
    pub fn destroy_order(&self) -> Vec<&Step> {
        self.steps.iter().rev().filter(|s| s.is_reversible()).collect()
    }

    /// Step keys must be unique and must not shadow the cleanup step.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.key() == RESET_WORKSPACE {
                return Err(Error::internal(format!(
                    "plan `{}` uses the reserved step key `{}`",
                    self.name, RESET_WORKSPACE
                )));
            }
            if !seen.insert(step.key()) {
                return Err(Error::internal(format!(
                    "plan `{}` declares step `{}` twice",
                    self.name,
                    step.key()
                )));
            }
        }
        Ok(())
    }

    /// A plan with only the named steps, in this plan's order.
    pub fn subset(&self, keys: &[&str]) -> Result<Plan> {
        if let Some(unknown) = keys.iter().find(|k| self.get(k).is_none()) {
            return Err(Error::internal(format!(
                "plan `{}` has no step `{}`",
                self.name, unknown
            )));
        }
        Ok(Plan {
            name: self.name.clone(),
            steps: self
                .steps
                .iter()
                .filter(|s| keys.contains(&s.key()))
                .cloned()
                .collect(),
            applies: self.applies.clone(),
        })
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish()
    }
}
