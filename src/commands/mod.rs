pub mod analytics;
pub mod auth;
pub mod crops;
pub mod dashboard;
pub mod farms;
pub mod fields;
pub mod harvest;
pub mod inventory;
pub mod notifications;
pub mod reports;
pub mod users;
pub mod utils;
