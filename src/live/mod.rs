//! Live session orchestration
//!
//! The [`LiveSession`] owns the streaming channel and everything attached to
//! it. Transport, devices and services are traits so the whole loop can run
//! against in-memory fakes.

mod channel;
mod devices;
mod instructions;
mod protocol;
mod session;
mod state;

pub use channel::{ChannelConnector, ChannelRequest, LiveChannel, WsConnector};
pub use devices::{DeviceProvider, SystemDevices};
pub use instructions::{system_instruction, timer_finished_message};
pub use protocol::{
    Blob, ClientContent, ClientMessage, Content, Part, RealtimeInput, ServerContent,
    ServerEvent, ServerMessage, Setup, ToolResponse, decode_server_frame,
};
pub use session::{
    LiveSession, SessionCommand, SessionDeps, SessionEvent, SessionHandle, SessionStats,
    Speaker,
};
pub use state::{ConnectionState, Transition};
