// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod cache;
pub mod config;
pub mod debug;
pub mod exception;
pub mod field;
pub mod frame;
pub mod header;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod util;
pub mod websocket;

pub use cache::HandlerCache;
pub use config::Config;
pub use debug::DebugDump;
pub use exception::{Exception, HandlerError, HandlerResult};
pub use header::HeaderMap;
pub use request::Body;
pub use response::Output;
pub use router::{Handler, HandlerFuture, Registry, Router};
pub use server::{serve, Gateway, Listener};
pub use websocket::WebSocket;
