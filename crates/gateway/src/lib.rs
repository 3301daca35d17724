pub mod api;
pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod control;
pub mod state;
