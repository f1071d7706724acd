//! Targetwise: Meta ad targeting assistant backend
//!
//! Category taxonomy storage and hierarchy, LLM-backed recommendations and
//! strategy, Meta reach estimates, and the REST API that serves them.

pub mod db;
pub mod hierarchy;
pub mod classification;
pub mod import;
pub mod taxonomy;
pub mod settings;
pub mod ai_client;
pub mod meta_client;
pub mod targeting;
pub mod estimates;
pub mod recommendations;
pub mod strategic;
pub mod http_server;
