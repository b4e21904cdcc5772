pub mod cli;
pub mod deploy;
pub mod errors;
pub mod models;
pub mod platform;
pub mod process;
pub mod runner;
