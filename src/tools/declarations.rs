//! Function declarations advertised to the remote engine in the setup message

use serde::Serialize;
use serde_json::{Value, json};

use super::call::{CREATE_TIMER, GET_ACTIVE_RECIPE, GET_TIMERS, LOG_OBSERVATION};

/// A tool the remote engine may invoke
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// All tools this client implements
#[must_use]
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: CREATE_TIMER.to_string(),
            description: "Start a kitchen countdown timer. Use whenever the cook asks for a timer or a step has a duration.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "label": { "type": "string", "description": "What the timer is for, e.g. 'Pasta'" },
                    "durationSeconds": { "type": "integer", "description": "Duration in seconds, at least 1" }
                },
                "required": ["label", "durationSeconds"]
            }),
        },
        FunctionDeclaration {
            name: GET_TIMERS.to_string(),
            description: "List every timer with its remaining seconds and status.".to_string(),
            parameters: empty_object(),
        },
        FunctionDeclaration {
            name: LOG_OBSERVATION.to_string(),
            description: "Record something noteworthy you observed in the kitchen.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "The observation" }
                },
                "required": ["text"]
            }),
        },
        FunctionDeclaration {
            name: GET_ACTIVE_RECIPE.to_string(),
            description: "Get the recipe being cooked, including the current step.".to_string(),
            parameters: empty_object(),
        },
    ]
}

fn empty_object() -> Value {
    json!({ "type": "object", "properties": {} })
}
