//! Ambient HTTP middleware: request-ID generation/propagation and sensitive
//! header masking, shared by every REST route the gateway serves.

pub mod request_tracking;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
    PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
