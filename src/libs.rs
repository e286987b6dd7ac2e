pub mod config;
pub mod conversation;
pub mod core;
pub mod feed;
pub mod logging;
pub mod storage;
pub mod uniffi;
