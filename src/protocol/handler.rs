use std::error::Error;

use crate::Message;

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Maps a request to its response.
///
/// A server invokes its handler from every connection worker, so
/// implementations must tolerate concurrent calls. Returning an error closes
/// the connection that carried the request without sending a response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Message) -> Result<Message, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Message) -> Result<Message, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: Message) -> Result<Message, HandlerError> {
        self(request)
    }
}

/// Responds with the request unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&self, request: Message) -> Result<Message, HandlerError> {
        Ok(request)
    }
}
