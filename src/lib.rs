pub mod admission;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod sandbox;
pub mod scripts;
pub mod server;
