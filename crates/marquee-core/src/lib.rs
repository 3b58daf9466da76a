//! Core types and trait definitions for the Marquee contributor catalog.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::CatalogStore`]; callers go through
//! [`service::IdentityService`].

pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod service;
pub mod store;

pub use error::{Classify, Error, ErrorKind, Result, UndoError, ValidationError};
