//! Core library for natter, a chat client backed by a hosted data platform.
//!
//! The crate is organised around one seam: the [`platform::Platform`] trait
//! abstracts the hosted backend (REST tables, auth, file storage and the
//! realtime change feed). Everything above it is backend-agnostic:
//!
//! - [`session`] signs users in and out and publishes the current session
//! - [`chat`] holds the data model, the gateway that maps chat operations
//!   onto platform calls, the live [`chat::ChatStore`] and the presentation
//!   helpers UI layers render from
//!
//! When no configuration is present, [`platform::connect`] hands back an
//! inert backend and the application keeps rendering with chat disabled.

pub mod chat;
pub mod config;
pub mod error;
pub mod platform;
pub mod session;

// Re-export commonly used types
pub use chat::{ChatEvent, ChatGateway, ChatStore};
pub use config::Config;
pub use error::{Error, Result};
pub use platform::{connect, Platform};
pub use session::{Session, SessionStore};
