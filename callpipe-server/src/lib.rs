pub mod cli;
pub mod media_stream;
mod server;

pub use media_stream::{StreamEvent, StreamSession};
pub use server::{AppState, Server, SessionSettings};
