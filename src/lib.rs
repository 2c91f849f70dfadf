pub mod clock;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod events;
pub mod intents;
pub mod interfaces;
pub mod logging;
pub mod matcher;
pub mod memory;
pub mod providers;
pub mod reminders;
pub mod runtime_paths;
pub mod scheduler;
pub mod scheduling;
pub mod services;
pub mod speech;
pub mod tasks;
pub mod workdays;

pub type Result<T> = std::result::Result<T, error::KitchenPaError>;
