mod handler;
mod messages;
mod registry;

pub use handler::{dispatch, ws_handler};
pub use messages::{ClientMessage, ServerMessage};
pub use registry::{Connection, ConnectionRegistry, OUTBOUND_QUEUE_SIZE};
