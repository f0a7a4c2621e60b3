pub mod badges;
pub mod config;
pub mod debug_log;
pub mod delivery;
pub mod export;
pub mod fixtures;
pub mod http_client;
pub mod normalize;
pub mod predictions;
pub mod render;
pub mod state;
pub mod storage;
pub mod theme;
