pub mod analyze;
pub mod dashboard;
pub mod entries;
pub mod health;
pub mod media;
