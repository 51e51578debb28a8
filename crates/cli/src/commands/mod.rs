pub mod chat;
pub mod config_cmd;
pub mod onboard;
pub mod report;
pub mod runtime;
pub mod session;
pub mod summary;
pub mod upload;
