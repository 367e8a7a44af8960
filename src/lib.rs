pub mod archive;
pub mod cache;
pub mod compact;
pub mod config;
pub mod errors;
pub mod lock;
pub mod marker;
pub mod model;
pub mod store;
pub mod track;
