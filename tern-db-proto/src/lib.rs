//! # tern-db proto
//!
//! The binary RPC protocol:
//! - length-prefixed frames with magic/version/compression/cmd/seq header
//! - tagged argument lists (varint/double/string/bool/null) with the call
//!   context appended per request
//! - query-result payload parameters
//! - an async client with a bounded call table, deadline sweeper, and
//!   reconnect epoch filtering

pub mod args;
pub mod client;
pub mod error;
pub mod frame;
pub mod results;

pub use args::{
    decode_args, decode_request, decode_response, encode_args, encode_request, encode_response,
    Arg, CallContext,
};
pub use client::{RpcClient, RpcClientConfig, Transport};
pub use error::{ProtoError, Result};
pub use frame::{decode_frame, encode_frame, Cmd, Header, MAGIC, MIN_COMPAT_VERSION, PROTO_VERSION};
pub use results::{ItemParams, NsParams, RawQueryParams, ResultFormat};
