//! Chat domain: data model, backend gateway, live store and presentation.
//!
//! Layering runs one way. [`types`] defines the rows, [`gateway`] maps them
//! onto platform calls, [`store`] keeps the live in-memory state fed by
//! fetches and realtime events, and [`view`] derives render-ready data from
//! that state. UI code talks to the store and the view helpers; only the
//! gateway touches the platform.

pub mod gateway;
pub mod store;
pub mod types;
pub mod view;

pub use gateway::ChatGateway;
pub use store::{ChatEvent, ChatStore};
pub use types::*;
