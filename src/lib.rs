#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unreachable_pub,
    missing_docs
)]

mod errors;
pub use errors::Error;

pub mod codec;
pub use codec::{Reader, Writer};

pub mod wire;
pub use wire::{decode_enum, Decode, Encode, StrictString, WireEnum};

pub mod message;
pub use message::{
    frame_to_vec, peek_message_id, read_frame, validate_datagram_frame, write_frame,
    RequestHeader, ResponseHeader, DEFAULT_MAX_FRAME_SIZE,
};

pub mod dispatch;
pub use dispatch::{ClientId, DispatchTable, MessageIdAllocator, PushHandler, PushTable, RequestHandler};

pub mod client;
pub use client::Client;

pub mod server;
pub use server::Server;

// Re-export the `bytes` crate for users, to minimise version mismatches.
#[cfg(feature = "bytes")]
pub use bytes;
