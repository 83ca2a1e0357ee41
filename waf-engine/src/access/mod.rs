//! IP whitelist/blacklist membership

pub mod index;
pub mod list;

pub use index::{parse_network, PrefixIndex};
pub use list::{AccessCounts, AccessList};
