pub mod chat;
pub mod complete;
pub mod config;
pub mod embed;
pub mod image;
pub mod models;
