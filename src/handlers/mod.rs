pub mod backbeat_handlers;
pub mod health_handlers;
pub mod multipart_handlers;
