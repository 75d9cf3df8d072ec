//! Conversation Orchestration Engine - the "brain" of the sokoni system.
//!
//! This crate executes exactly one turn per inbound WhatsApp message:
//! 1. **Context Extraction** (`context`) - Merge slots detected in the
//!    utterance into the accumulated `GatheredContext`
//! 2. **Routing Decision** (`router`) - Keep chatting, or commit to one
//!    specialist; every keyword heuristic lives here and nowhere else
//! 3. **Specialist Execution** (`handlers`, `tools`) - Catalog search,
//!    cart mutation, checkout and inquiry against the store contracts
//! 4. **Reply Composition** (`compose`) - Clarifying questions, welcome
//!    and fallback copy
//!
//! # Key Types
//!
//! - `AgentRuntime` - Per-thread turn serialization, checkpointing and
//!   degraded stateless operation (see `runtime`)
//! - `TurnRunner` - The state machine for a single turn (see `graph`)
//! - `LlmClient` - Pluggable reasoning/vision model contract
//!
//! # Safety Principle
//!
//! The reasoning model is a translator with one narrow, typed output.
//! It never mutates the cart, prices an order, or picks the next graph
//! node directly; those are deterministic decisions made here.

pub mod compose;
pub mod context;
pub mod graph;
pub mod handlers;
pub mod llm;
pub mod router;
pub mod runtime;
pub mod tools;
