pub mod buckets;
pub mod config;
pub mod db;
pub mod forest;
pub mod layout;
pub mod live;
pub mod model;
pub mod ops;
pub mod output;
pub mod store;
pub mod validate;
pub mod watch;
pub mod writer;
