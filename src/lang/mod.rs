pub mod value;

pub use value::{BlockValue, Value};
