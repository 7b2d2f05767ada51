//! An out-of-the-box tool-calling chat that assembles built-in tools and
//! completion engines.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring tool-calling chats into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`toolchat_core`] crate.
pub mod core {
    pub use toolchat_core::*;
}
