pub mod api_router;
pub mod config;
pub mod directory;
pub mod security;
pub mod shared;
pub mod tickets;
