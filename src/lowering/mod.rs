pub mod engine;
pub mod indent;

pub use engine::{LowerError, LoweringEngine};
pub use indent::reindent;
