use std::fmt;
use std::path::PathBuf;

/// マクロ定義・呼び出しの構文エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroError {
    /// パラメータリストまたは引数リストの閉じ括弧がない
    UnterminatedArgumentList,
    /// `...` が最後のパラメータ以外に現れた
    VariadicNotLast {
        /// `...` が現れたパラメータ位置（0始まり）
        position: usize,
    },
    /// 同じパラメータ名が2回以上現れた
    DuplicateParameter(String),
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroError::UnterminatedArgumentList => write!(f, "missing closing \")\""),
            MacroError::VariadicNotLast { position } => write!(
                f,
                "variable arguments (...) must be the last parameter (found at position {})",
                position
            ),
            MacroError::DuplicateParameter(name) => {
                write!(f, "duplicate macro parameter: {}", name)
            }
        }
    }
}

impl std::error::Error for MacroError {}

/// 統合エラー型
#[derive(Debug)]
pub enum CompileError {
    /// マクロエラー（発生した行付き）
    Macro { line: i32, kind: MacroError },
    /// ファイル読み込みエラー
    Io { path: PathBuf, message: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Macro { line, kind } => {
                write!(f, "{}: macro error: {}", line, kind)
            }
            CompileError::Io { path, message } => {
                write!(f, "I/O error reading {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Macro { kind, .. } => Some(kind),
            CompileError::Io { .. } => None,
        }
    }
}

impl CompileError {
    /// マクロエラーに行番号を付与
    pub fn at_line(line: i32, kind: MacroError) -> Self {
        CompileError::Macro { line, kind }
    }

    /// マクロエラーの場合はその種類を返す
    pub fn macro_error(&self) -> Option<&MacroError> {
        match self {
            CompileError::Macro { kind, .. } => Some(kind),
            CompileError::Io { .. } => None,
        }
    }
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, CompileError>;
