//! Undertow - asynchronous task execution and event-replay core.
//!
//! Long-running multi-agent research tasks execute server-side, detached
//! from any client connection. Every event a task emits is appended to a
//! durable per-task stream; clients attach, detach, and reattach at
//! arbitrary offsets over SSE and receive a seamless mix of historical and
//! live events.

pub mod actors;
pub mod api;
pub mod app_state;
pub mod config;
pub mod engine;
pub mod events;
pub mod replay;
pub mod runner;
pub mod stream_id;
pub mod task;
