pub mod health;
pub mod reports;
pub mod usage;
pub mod workflows;
