//! Bastion: anti-raid join-rate detection and a cache/rate-limit gate for
//! AI-generated guild audit reports.

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod raid;
pub mod rate_limit;
pub mod tasks;
