pub mod packet;
pub mod server;
pub mod wire;
