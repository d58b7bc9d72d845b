pub mod media_handlers;
pub mod media_response;
