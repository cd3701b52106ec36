// src/models/mod.rs

//! Contains data structures representing database entities.

pub mod order;

// Re-export the model structs for convenient access
pub use order::{Order, OrderStatus, PaymentMethod, StatusHistoryEntry};
