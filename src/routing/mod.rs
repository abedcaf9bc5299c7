pub mod compiler;
pub mod path;

pub use compiler::{Branch, CompiledRoute, DispatchTree, RouteCompiler, Target, HEALTH_PATH};
