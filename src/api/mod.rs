// =============================================================================
// HTTP API — status and control surface
// =============================================================================

pub mod auth;
pub mod rest;
