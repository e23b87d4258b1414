pub mod api;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod history;
pub mod metadata;
pub mod moonraker;
pub mod realtime;
pub mod status;
