mod responder;
mod service;

pub use responder::ChatResponder;
pub use service::ChatService;
