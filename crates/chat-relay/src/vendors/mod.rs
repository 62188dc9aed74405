//! HTTP provider integrations.
//!
//! Both supported provider families are reached through one reqwest client;
//! the channel picks the endpoint path and request body shape.
mod client;
mod ollama;
mod openai;

pub use client::HttpProviderClient;
