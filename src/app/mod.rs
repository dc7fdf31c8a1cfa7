pub mod geocode_client;
pub mod ports;
