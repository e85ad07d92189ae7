//! Tools the remote engine can invoke on this client

mod call;
mod declarations;
mod dispatcher;

pub use call::{
    CREATE_TIMER, GET_ACTIVE_RECIPE, GET_TIMERS, LOG_OBSERVATION, ToolCall, ToolError,
};
pub use declarations::{FunctionDeclaration, declarations};
pub use dispatcher::{ToolDispatcher, ToolEffect, ToolInvocation, ToolResult};
