//! tern-sdk: a single-session IRC client engine.
//!
//! Owns one connection and drives it through capability negotiation,
//! optional STARTTLS and SASL PLAIN, and registration. Inbound messages
//! run through a priority-ordered hook registry that keeps channel and
//! user state current; applications add their own hooks as
//! [`HandlerModule`]s and drive the engine with [`Client::poll_inbound`].

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod irc;
pub mod isupport;
pub mod join;
pub mod presence;
pub mod registration;
pub mod sasl;
pub mod session;
pub mod timer;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::{Connection, Transport};
pub use dispatch::{Ctcp, Flow, HandlerModule, Hook, Priority, Registry};
pub use error::{Error, Result};
pub use irc::{Message, Sender};
pub use session::{RegistrationState, Session};
pub use timer::Timers;
