pub mod dispatch;
pub mod error;
pub mod frame;
pub mod scope;
pub mod vm;

pub use dispatch::{MethodRegistry, NativeFn, TypeKey};
pub use error::{DispatchError, DispatchReason, InvariantError, VmError};
pub use frame::CallFrame;
pub use scope::{Scope, ScopeRef};
pub use vm::{Vm, VmConfig};
