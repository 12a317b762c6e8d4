//! OAuth 2.1 client support
//!
//! - Authorization code grant with PKCE (RFC 7636)
//! - Client credentials and refresh token grants
//! - Authorization server metadata (RFC 8414) with OpenID Connect fallback
//! - Dynamic client registration (RFC 7591)
//! - Resource indicators (RFC 8707) on every authorization and token request
//! - DPoP proofs on token requests (RFC 9449)
//!
//! ## Submodules
//!
//! - `flow` - the suspend/resume flow engine
//! - `metadata` - authorization server metadata and its well-known locations
//! - `registration` - dynamic client registration messages
//! - `token` - token endpoint responses

pub mod flow;
pub mod metadata;
pub mod registration;
pub mod token;

pub use flow::{
    AuthorizationCallback, AuthorizationHandler, AuthorizationRequest, FlowAction, FlowOutcome,
    FlowParams, FlowState, FlowStep, OAuthFlow, run_flow,
};
pub use metadata::{AuthorizationServerMetadata, metadata_candidate_urls};
pub use registration::{RegistrationRequest, RegistrationResponse};
pub use token::{OAuthErrorResponse, TokenResponse};
