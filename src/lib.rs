//! LoQA Library
//!
//! Chat orchestration for a local LLM engine: model lifecycle, streamed
//! generation, conversation persistence and history priming.

pub mod app;
pub mod chat;
pub mod inference;
pub mod logging;
pub mod storage;
pub mod types;
