// Copyright (c) 2026 Isprava Engineering
//! LLM provider adapters (anti-corruption layer, `spec.md` SS3, SS4.6).

pub mod anthropic;

pub use anthropic::AnthropicProvider;
