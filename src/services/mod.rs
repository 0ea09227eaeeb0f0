pub mod commands;
pub mod knowledge;
pub mod logs;
pub mod memory;
pub mod transport;
pub mod webhook;
