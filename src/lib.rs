pub mod catalog;
pub mod clock;
pub mod command;
pub mod compactor;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
