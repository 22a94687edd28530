pub mod state;
pub mod app;
pub(crate) mod handlers;
pub mod db;
pub mod error;
pub mod storage;
pub mod transfer;
