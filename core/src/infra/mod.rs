//! Infrastructure layer - persistence, events and logging

pub mod db;
pub mod event;
pub mod logging;
