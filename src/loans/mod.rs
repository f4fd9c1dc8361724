pub mod application;
pub mod handlers;
pub mod models;
