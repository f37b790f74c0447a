pub mod asset;
pub mod flows;
pub mod order;
pub mod ports;
