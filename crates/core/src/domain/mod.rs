pub mod conversation;
pub mod message;
