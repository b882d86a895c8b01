//! Thread-mode tasks

pub mod console;

pub use console::console_task;
