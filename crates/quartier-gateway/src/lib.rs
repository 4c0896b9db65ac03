//! Real-time gateway: chat rooms, presence and live hangman rounds over a
//! single WebSocket per user.

pub mod connection;
pub mod dispatcher;

pub use connection::{GatewayContext, handle_connection};
pub use dispatcher::{Dispatcher, GameError};
