pub mod command;
pub mod config;
pub mod encoder;
pub mod link;
pub mod messages;
pub mod motion;
pub mod motor;
pub mod runtime;
pub mod sensor;
pub mod sim;
pub mod update;
