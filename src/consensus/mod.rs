pub mod genesis;
pub mod target;
