//! Link core

pub mod commands;
pub mod error;
pub mod link;
pub mod mtu;
pub mod queue;
pub mod service;
pub mod transfer;
pub mod types;
