//! Tool dispatcher: resolves remote tool-call batches against local state

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::call::{ToolCall, ToolError};
use crate::journal::{VisionLog, VisionLogEntry};
use crate::recipe::RecipeContext;
use crate::timers::{Timer, TimerEngine, format_remaining};

/// A named call from the remote engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id supplied by the remote engine
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The correlated result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Echo of `ToolInvocation::id`
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Local state changes caused by a batch
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    TimerCreated(Timer),
    ObservationLogged(VisionLogEntry),
}

/// Resolves tool calls against the timer engine, recipe snapshot and observation log
pub struct ToolDispatcher<'a> {
    timers: &'a mut TimerEngine,
    recipe: &'a RecipeContext,
    observations: &'a mut VisionLog,
    effects: Vec<ToolEffect>,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(
        timers: &'a mut TimerEngine,
        recipe: &'a RecipeContext,
        observations: &'a mut VisionLog,
    ) -> Self {
        Self {
            timers,
            recipe,
            observations,
            effects: Vec::new(),
        }
    }

    /// Resolve every call in arrival order, producing one result per call
    pub fn dispatch_batch(&mut self, calls: &[ToolInvocation]) -> Vec<ToolResult> {
        calls.iter().map(|call| self.dispatch(call)).collect()
    }

    /// Resolve a single call
    pub fn dispatch(&mut self, invocation: &ToolInvocation) -> ToolResult {
        let response = match ToolCall::decode(&invocation.name, &invocation.args) {
            Ok(call) => self.execute(call),
            Err(ToolError::InvalidArguments { tool, reason }) => {
                tracing::warn!(tool = %tool, id = %invocation.id, reason = %reason, "rejected tool call");
                json!({ "error": format!("invalid arguments for {tool}: {reason}") })
            }
        };

        ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            response,
        }
    }

    /// Side effects accumulated so far
    #[must_use]
    pub fn into_effects(self) -> Vec<ToolEffect> {
        self.effects
    }

    fn execute(&mut self, call: ToolCall) -> Value {
        match call {
            ToolCall::CreateTimer { label, duration } => {
                let timer = self.timers.create(label, duration);
                let response = json!({
                    "result": format!(
                        "Timer '{}' started for {}.",
                        timer.label,
                        format_remaining(timer.duration_seconds)
                    ),
                    "timerId": timer.id,
                });
                self.effects.push(ToolEffect::TimerCreated(timer));
                response
            }
            ToolCall::GetTimers => json!({ "timers": self.timers.list() }),
            ToolCall::LogObservation { text } => {
                let entry = VisionLogEntry::now(text);
                self.observations.push(entry.clone());
                self.effects.push(ToolEffect::ObservationLogged(entry));
                json!({ "result": "Observation logged." })
            }
            ToolCall::GetActiveRecipe => self.recipe.snapshot().map_or_else(
                || json!({ "noRecipe": true, "result": "No recipe is currently active." }),
                |ctx| {
                    json!({
                        "title": ctx.title,
                        "ingredients": ctx.ingredients,
                        "instructions": ctx.instructions,
                        "currentStep": ctx.current_step + 1,
                        "currentStepText": ctx.current_step_text(),
                        "totalSteps": ctx.total_steps(),
                    })
                },
            ),
            ToolCall::Unrecognized { name } => {
                tracing::warn!(tool = %name, "unknown tool, acknowledging");
                json!({ "result": "ok" })
            }
        }
    }
}
