//! Multi-engine OCR/NER document extraction.
//!
//! Pages go through any mix of OCR engines (Tesseract, local and cloud
//! vision models) and NER engines (LLM or pattern based); every engine's
//! output or failure comes back in one result keyed by engine name.

pub mod aggregate;
pub mod config;
pub mod engines;
pub mod error;
pub mod loader;
pub mod openai;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod schema;
pub mod server;

#[cfg(test)]
mod test_support;
