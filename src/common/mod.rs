pub mod command;
pub mod package;
pub mod process;
pub mod shell;
pub mod task_runner;
