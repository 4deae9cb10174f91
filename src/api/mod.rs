//! API client module for the Fables campaign service

pub mod client;

pub use client::SessionClient;
