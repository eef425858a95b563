//! Shared types for the debugger tool server: ids, command states,
//! notification events, and the error taxonomy.

pub mod error;
pub mod events;
pub mod id;
pub mod time;
pub mod types;

pub use error::DebugError;
pub use events::{CommandEvent, RecoveryStep};
pub use id::{command_fingerprint, new_command_id, new_session_id};
pub use time::format_elapsed;
pub use types::CommandState;
