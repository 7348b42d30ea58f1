#![allow(non_camel_case_types)]

//! Asynchronous callback-based HTTP client message engine.
//!
//! A [`message::Message`] represents one in-flight request/response pair.
//! Messages are queued on a [`session::Session`], advance through their
//! lifecycle as the transfer engine reports progress, and run a handler
//! pipeline at each lifecycle event. Handlers drive automatic behaviors
//! such as 3xx redirection and 401/407 authentication retry by requeueing,
//! aborting, or restarting processing; the completion callback owns the
//! final say over whether the message survives.

pub mod auth;
pub mod context;
pub mod error;
mod global_handlers;
pub mod handler;
pub mod headers;
pub mod log;
pub mod main_loop;
pub mod message;
pub mod session;
pub mod transfer;
pub mod uri;
