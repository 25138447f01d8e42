pub mod block;
pub mod builder;
pub mod edge;
pub mod expr;
pub mod function;
pub mod layout;

pub use block::{Block, BlockData, BlockFlags, JumpKind, Weight, MAX_WEIGHT, UNITY_WEIGHT};
pub use builder::FunctionBuilder;
pub use edge::{Edge, EdgeData};
pub use expr::{
    visit_virtual_calls, CallData, ClassProbe, Expr, ExprData, HelperFunc, Local, LocalData,
    ProbeSink, Stmt, StmtData,
};
pub use function::Function;
pub use layout::Layout;
