pub mod broadcast;
pub mod config;
pub mod db;
pub mod handlers;
pub mod telegram;
