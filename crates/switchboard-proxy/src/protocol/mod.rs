//! Wire format types for the two upstream protocols
//!
//! Anthropic shapes are what clients send and receive; OpenAI shapes only
//! appear on the upstream side of a translated call.

pub mod anthropic;
pub mod openai;
