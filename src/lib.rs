pub mod block;
pub mod broadcaster;
pub mod config;
pub mod consensus;
pub mod error;
pub mod gossip;
pub mod mempool;
pub mod miner;
pub mod relay;
pub mod relay_http;
pub mod service;
pub mod store;
