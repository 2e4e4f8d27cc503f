// Webhook signature verification
pub mod signature;

// Encrypted credential storage
pub mod credentials;

// OAuth authorization-code flow
pub mod oauth;

// Webhook ingest HTTP API
pub mod api;

// Bearer token extraction
pub mod auth;

// Configuration
pub mod config;
