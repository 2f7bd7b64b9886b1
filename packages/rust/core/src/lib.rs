//! Core answering pipeline for Quarry.
//!
//! This crate ties together planning, retrieval, content aggregation, fact
//! extraction, refinement, and prompt assembly into one request flow
//! ([`Pipeline::run`]). Every stage takes the per-request [`RequestContext`]
//! for cancellation checkpoints, progress logging, and result accumulation.

pub mod aggregator;
pub mod assembler;
pub mod batching;
pub mod context;
pub mod extractor;
pub mod json;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod refiner;
pub mod retriever;
pub mod retry;
pub mod similarity;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{CollectingSink, LogSink, RequestContext, RequestResults, SilentSink};
pub use llm::{ChatMessage, LlmClient, OpenRouterClient, Role};
pub use pipeline::{AskRequest, Pipeline};
pub use retry::with_retries;
pub use similarity::{BigramSimilarity, Similarity};
