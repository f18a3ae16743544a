//! External data sources.
//!
//! # Data Sources
//!
//! - [`gemini`]: Google Gemini `generateContent` REST API, used for both
//!   structured species dossiers and image generation

pub mod gemini;

pub use gemini::{GeminiClient, GenerativeBackend};
