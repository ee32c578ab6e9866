pub mod frame;
pub mod tcp;

pub use tcp::{handle_tcp_client, serve};
