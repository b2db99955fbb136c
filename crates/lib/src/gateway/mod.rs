//! Webhook gateway: HTTP surface (verify handshake, event ingestion,
//! status/health) in front of the pipeline.

mod server;
mod webhook;

pub use server::{router, run_gateway, GatewayState};
pub use webhook::{parse_envelope, WebhookEnvelope};
