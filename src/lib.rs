// Library for tests to access modules

pub mod aggregator;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod estimation;
pub mod models;
pub mod producer;
pub mod routes;
pub mod settings;
pub mod units;
pub mod version;
