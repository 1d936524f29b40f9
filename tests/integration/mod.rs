//! Integration tests against wiremock upstreams

mod auth;
mod chat_completions;
mod health;
mod models;
mod native_proxy;
