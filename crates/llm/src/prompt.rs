//! Prompt construction
//!
//! Chat message types and the query-rewrite instruction template.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Instruction for decomposing a raw query into a structured rewrite.
///
/// The model is asked for a strict JSON object; the caller still runs a
/// tolerant parse cascade because models routinely wrap the object in
/// prose or a fenced code block.
const REWRITE_INSTRUCTION: &str = "\
You decompose search queries for a document retrieval system.

Given a user query, produce:
- \"key_query\": a single canonical restatement capturing the core topic,
  suitable for matching against topic tags
- \"sub_queries\": 1 to 5 self-contained sub-questions that together cover
  the query, each answerable from a single document summary

Respond with only a JSON object of this exact shape, no other text:
{\"original_query\": \"...\", \"key_query\": \"...\", \"sub_queries\": [\"...\"]}";

/// Build the chat messages for one rewrite call.
pub fn rewrite_messages(query: &str) -> Vec<Message> {
    vec![
        Message::system(REWRITE_INSTRUCTION),
        Message::user(format!("Query: {query}")),
    ]
}
