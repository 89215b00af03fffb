//! Telephony adapter (C6): webhook, softswitch and SIP backends sharing one
//! normalised inbound-call path and call registry, plus the raw-PCM audio
//! bridge (§4.6).

pub mod auth;
pub mod bridge;
pub mod call_handler;
pub mod error;
pub mod http;
pub mod inbound;
pub mod metrics;
pub mod policy_defaults;
pub mod registry;
pub mod sip;
pub mod softswitch;
pub mod state;

pub use call_handler::CallHandler;
pub use error::ServerError;
pub use registry::CallRegistry;
pub use sip::SipBackend;
pub use state::AppState;
