//! The contract between the chat core and a text-completion engine.
//!
//! This crate establishes a unified protocol for the core to drive various
//! completion engines (a local inference runtime, an OpenAI-compatible HTTP
//! endpoint, a scripted fake for tests) without knowing how they work.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. The only exception
//! is the ChatML renderer, which engines may use to preview prompts.
//!
//! The wire types serialize to the role-tagged message shape used by
//! OpenAI-style chat completion APIs, which is also the format of
//! conversation import/export.

#![deny(missing_docs)]

pub mod chat_template;
mod engine;
mod error;
mod request;
mod response;
mod wire;

pub use engine::*;
pub use error::*;
pub use request::*;
pub use response::*;
pub use wire::*;
