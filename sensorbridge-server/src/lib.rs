pub mod message_handler;
pub mod message_worker;
pub mod notifier;
pub mod tool;
pub mod transport;
