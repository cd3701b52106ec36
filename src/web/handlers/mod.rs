// src/web/handlers/mod.rs

// Declare handler modules
pub mod checkout_handlers;
pub mod webhook_handlers;
