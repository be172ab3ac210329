//! Conversation pipeline: history messages and the round orchestrator.

pub mod coordinator;
pub mod messages;
