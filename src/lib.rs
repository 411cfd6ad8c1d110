pub mod buffer;
pub mod config;
pub mod message;
pub mod protocol;

pub use config::{Config, ConfigError};
pub use message::{FieldKind, Message, MessageError};
pub use protocol::{
    Echo, Handler, HandlerError, MessageClient, MessageServer, TransportError,
};
