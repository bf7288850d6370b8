//! Cross-module scenario tests and shared fixtures


mod hit_pipeline;
mod instancing;
