//! Connectivity core for the MEXC spot venue.
//!
//! Composes a signing REST client and a self-healing WebSocket stream
//! client over the shared primitives in `mexc-core`. The `MexcGateway`
//! is the usual entrypoint; the individual clients are exported for
//! callers that need only one side.

pub mod config;
pub mod gateway;
pub mod rest;
pub mod signer;
pub mod stream;
pub mod types;
pub mod ws_types;

pub use config::{Credentials, GatewayConfig, DEFAULT_BASE_URL, DEFAULT_WS_URL};
pub use gateway::MexcGateway;
pub use rest::MexcRestClient;
pub use signer::{SignedQuery, Signer, API_KEY_HEADER};
pub use stream::{
    next_state, MexcStreamClient, StreamAuth, StreamConfig, StreamEvent, StreamHandle,
    StreamSignal, StreamState,
};
pub use types::{ConvertibleAsset, NewOrder};
pub use ws_types::Deal;
