//! Component F (plus the ambient config/error scaffolding): the
//! register-plus-stack bytecode interpreter that drives `sparrow-heap`
//! objects compiled by `sparrow-bc`.

pub mod config;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod intrinsics;

pub use config::StackConfig;
pub use error::{SparrowError, SparrowResult, Unwind};
pub use frame::Runtime;
pub use interpreter::{ExecContext, Interpreter};
pub use intrinsics::{display_value, ScriptCaller};
