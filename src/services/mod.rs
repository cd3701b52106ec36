// src/services/mod.rs

// Declare service modules
pub mod gateway;
pub mod notifications;
pub mod ratelimit;
pub mod verifier;
