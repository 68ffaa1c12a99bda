pub mod auth;
pub mod booking;
pub mod config;
pub mod db;
pub mod drafts;
pub mod error;
pub mod model;
pub mod saga;
pub mod services;
pub mod session;
pub mod validation;
