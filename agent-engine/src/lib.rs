pub mod context;
pub mod engine;
pub mod tools;

pub use context::{ContextManager, ContextStats, ContextStorage, InMemoryContextStorage, KvContextStorage};
pub use engine::{AgentEngine, MAX_ITERATIONS_CEILING};
pub use tools::{build_registry, Tool, ToolContext};
