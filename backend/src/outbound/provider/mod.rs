//! Mail provider outbound adapter.
//!
//! This module provides the HTTP implementation of the `MailProvider` port.

mod dto;
mod http_provider;

pub use http_provider::HttpMailProvider;
