
pub mod bitcoind_client;
pub mod convert;
pub mod helper;
pub mod memory_transport;
pub mod sim;
