pub mod messages;
pub mod protocol;
pub mod relay;
