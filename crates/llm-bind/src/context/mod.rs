//! Request descriptors and the prompt context sent to a backend.
//!
//! Each call starts as a [`RequestDescriptor`] (what the caller asked for),
//! is turned into a [`PromptContext`] by a [`ContextBuilder`], then passes
//! through the registered [`Interceptor`]s in order. From then on the
//! context only grows by appends from the executor: tool-call turns, tool
//! results and corrective user turns after a rejected result.

pub mod builder;
pub mod message;

pub use builder::{ContextBuilder, DefaultContextBuilder, Interceptor};
pub use message::{Message, Role};

use crate::memory::MemorySnapshot;
use crate::mirror::TypeDescriptor;
use crate::tools::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One argument of a call, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub description: String,
    /// The argument, already converted to its mirror form.
    pub value: Value,
}

/// Everything known about one call before any prompt is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    pub operation: String,
    pub description: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub result_type: TypeDescriptor,
    /// Memory as it stood when the call started.
    pub memory: MemorySnapshot,
}

impl RequestDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// The per-call request envelope handed to a backend adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// Name of the operation being served.
    pub operation: String,
    /// System instructions.
    pub system: String,
    /// Serialized description of the invocation.
    pub invocation: String,
    pub memory: MemorySnapshot,
    /// Ordered conversation history.
    pub history: Vec<Message>,
    /// Tools advertised to the backend.
    pub tools: Vec<ToolDefinition>,
}

impl PromptContext {
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }
}
