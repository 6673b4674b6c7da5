pub mod integrations;
pub mod tasks;
