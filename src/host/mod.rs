//! Host app integration: versioned envelopes, the command router, and a
//! newline-delimited JSON bridge.

pub mod channel;
pub mod contract;
pub mod stdio;

pub use channel::{
    HostCommandClient, HostCommandServer, PendingResponse, UpdateCommandHandler, command_channel,
};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
