//! Shared types for the quartier server: wire DTOs, gateway protocol and the
//! pure rules that do not need a database.

pub mod api;
pub mod events;
pub mod hangman;
pub mod models;
pub mod rooms;
pub mod rules;
