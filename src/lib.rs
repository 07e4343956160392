//! Kernel Frontend
//!
//! カーネル言語トランスパイラの前段。ソーステキストのマクロを展開し、
//! 外部パーサーが作った文の列から変数の定数・範囲情報と
//! 文同士の依存関係を求める。

pub mod const_info;
pub mod dependency;
pub mod error;
pub mod lex;
pub mod logging;
pub mod macro_def;
pub mod macro_expand;
pub mod preprocessor;
pub mod stmt;
pub mod var;

// 主要な型を再エクスポート
pub use const_info::{
    Bounds, ConstEnv, ConstEvaluator, ConstFact, ConstInfo, ConstValue, FoldingEvaluator,
};
pub use dependency::{
    analyze, AnalysisResult, DependencyAnalyzer, DependencyEdge, DependencyKind, LoopSummary,
    ScopeSnapshot,
};
pub use error::{CompileError, MacroError, Result};
pub use logging::init_logging;
pub use macro_def::{ArgFlags, ArgRef, ArgSlot, MacroDef, MacroKind, MacroPart, MacroTable};
pub use macro_expand::{expand, expand_invocation, parse_actual_args, ActualArg};
pub use preprocessor::{PPConfig, Preprocessor};
pub use stmt::{
    BinOp, CountedLoop, Expr, KernelBuilder, Scope, ScopeKind, Statement, Touch, UnaryOp,
};
pub use var::{ScopeId, StmtId, VarId, VarTable};
