//! `LendChat`: chat sessions between lenders and borrowers about a loan post.

pub mod config;
pub mod services;
pub mod session;
pub mod transport;
