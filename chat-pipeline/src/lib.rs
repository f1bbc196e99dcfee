pub mod dispatch;
pub mod fallback;
pub mod pipeline;
pub mod search_target;

pub use dispatch::ChatDispatcher;
pub use pipeline::ChatPipeline;
pub use search_target::SearchTarget;
