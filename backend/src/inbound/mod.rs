//! Inbound adapters that translate external requests into domain service
//! calls while keeping framework details at the edge.
//!
//! The push webhook, the event stream gateway and the health probes all live
//! under [`http`].

pub mod http;
