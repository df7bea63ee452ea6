#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod machine;
pub mod socket;
pub mod types;

pub use crate::bridge::{Command, Event};
pub use crate::client::{Client, WeakClient};
pub use crate::config::ConnectionConfig;
use crate::error::Error;
pub use crate::machine::Phase;
pub use crate::types::{CloseCode, Payload};

pub type Result<T> = std::result::Result<T, Error>;
