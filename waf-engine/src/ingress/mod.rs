//! Line-protocol ingress over a Unix domain socket

pub mod protocol;
pub mod server;

pub use protocol::Command;
pub use server::{IngressServer, IngressServerConfig};
