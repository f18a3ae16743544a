//! FaunaSphere - Grounded species research with generated field imagery.
//!
//! # Overview
//!
//! A user names an animal. FaunaSphere asks a generative model, grounded in
//! web search, whether that is a real animal species; if so it returns a
//! structured dossier (taxonomy, habitat, threats, literature, a quiz) and
//! two photorealistic images. Favorites, recent searches and a daily
//! research streak are kept across runs.
//!
//! # Modules
//!
//! - [`model`]: Dossier, image set and favorite types
//! - [`data_sources`]: Gemini REST client
//! - [`content`]: Describe-species and render-images capabilities
//! - [`session`]: Pure session state machine
//! - [`controller`]: Runs the state machine's lookups and persistence
//! - [`persistence`]: Profile fields in the key-value store
//! - [`storage`]: SQLite key-value store
//! - [`credentials`]: API key selection
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod config;
pub mod content;
pub mod controller;
pub mod credentials;
pub mod data_sources;
pub mod error;
pub mod model;
pub mod persistence;
pub mod session;
pub mod storage;
