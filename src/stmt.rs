//! 解析対象の文モデル
//!
//! 外部パーサーが構築する文の列と、各文が触れる変数（読み・書き・
//! アドレス取得・不透明な呼び出し）を表す。入れ子のスコープは
//! 複合文の本体として持つ。

use std::collections::HashMap;

use serde::Serialize;

use crate::var::{ScopeId, StmtId, VarId};

/// 二項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

/// 単項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    BitNot,
}

/// 右辺式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expr {
    Int(i64),
    Var(VarId),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// 関数呼び出し（定数評価されない）
    Call { name: String, args: Vec<Expr> },
    /// 解析できない式
    Opaque(String),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn var(var: VarId) -> Self {
        Expr::Var(var)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Div, lhs, rhs)
    }

    /// 式中の変数（出現順、重複なし）
    pub fn vars(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<VarId>) {
        match self {
            Expr::Int(_) | Expr::Opaque(_) => {}
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Expr::Unary(_, e) => e.collect_vars(out),
            Expr::Binary(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
        }
    }
}

/// 文による変数への接触
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Touch {
    Read(VarId),
    /// 代入。右辺が不明なら None
    Write { var: VarId, value: Option<Expr> },
    /// アドレス取得 (&x)
    AddressOf(VarId),
    /// 解析できない呼び出しへの受け渡し
    OpaqueCall(VarId),
}

impl Touch {
    /// 接触した変数
    pub fn var(&self) -> VarId {
        match self {
            Touch::Read(v) | Touch::AddressOf(v) | Touch::OpaqueCall(v) => *v,
            Touch::Write { var, .. } => *var,
        }
    }

    /// 依存関係上の読み取りか（エスケープは読み書き両方として扱う）
    pub fn is_read(&self) -> bool {
        !matches!(self, Touch::Write { .. })
    }

    /// 依存関係上の書き込みか
    pub fn is_write(&self) -> bool {
        !matches!(self, Touch::Read(_))
    }

    /// 変数がエスケープするか
    pub fn escapes(&self) -> bool {
        matches!(self, Touch::AddressOf(_) | Touch::OpaqueCall(_))
    }
}

/// カウンタ付きループ `for (counter = start; counter < end; counter += step)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountedLoop {
    pub counter: VarId,
    pub start: Expr,
    /// 終端（排他的）
    pub end: Expr,
    pub step: Expr,
}

/// スコープの種類
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScopeKind {
    Block,
    CountedLoop(CountedLoop),
}

/// 文
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub id: StmtId,
    pub touches: Vec<Touch>,
    /// 複合文の本体
    pub body: Option<Scope>,
}

/// 文の列を持つスコープ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub statements: Vec<Statement>,
}

impl Scope {
    /// スコープ内（入れ子を含む）で書き込まれる変数と、その書き込み回数
    pub fn write_counts(&self) -> HashMap<VarId, usize> {
        let mut counts = HashMap::new();
        self.count_writes(&mut counts);
        counts
    }

    fn count_writes(&self, counts: &mut HashMap<VarId, usize>) {
        for stmt in &self.statements {
            for touch in stmt.touches.iter().filter(|t| t.is_write()) {
                *counts.entry(touch.var()).or_insert(0) += 1;
            }
            if let Some(body) = &stmt.body {
                if let ScopeKind::CountedLoop(lp) = &body.kind {
                    *counts.entry(lp.counter).or_insert(0) += 1;
                }
                body.count_writes(counts);
            }
        }
    }
}

/// 解析用スコープ木のビルダー
///
/// 文IDはプログラム順に振られ、複合文は本体より前の番号になる。
pub struct KernelBuilder {
    next_stmt: u32,
    next_scope: u32,
    frames: Vec<Frame>,
}

/// 構築中のスコープと、それを本体に持つ複合文
struct Frame {
    scope: Scope,
    header: Option<Statement>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    /// ルートブロックを持つビルダーを作成
    pub fn new() -> Self {
        Self {
            next_stmt: 1,
            next_scope: 1,
            frames: vec![Frame {
                scope: Scope {
                    id: ScopeId::new(0),
                    kind: ScopeKind::Block,
                    statements: Vec::new(),
                },
                header: None,
            }],
        }
    }

    fn alloc_stmt(&mut self) -> StmtId {
        let id = StmtId::new(self.next_stmt);
        self.next_stmt += 1;
        id
    }

    fn current(&mut self) -> &mut Scope {
        let last = self.frames.len() - 1;
        &mut self.frames[last].scope
    }

    /// 任意の接触を持つ文を追加
    pub fn statement(&mut self, touches: Vec<Touch>) -> StmtId {
        let id = self.alloc_stmt();
        self.current().statements.push(Statement {
            id,
            touches,
            body: None,
        });
        id
    }

    /// 代入文 `var = value` を追加（右辺の変数は読み取り）
    pub fn assign(&mut self, var: VarId, value: Expr) -> StmtId {
        let mut touches: Vec<Touch> = value.vars().into_iter().map(Touch::Read).collect();
        touches.push(Touch::Write {
            var,
            value: Some(value),
        });
        self.statement(touches)
    }

    /// 右辺が解析できない代入文を追加
    pub fn assign_unknown(&mut self, var: VarId, reads: &[VarId]) -> StmtId {
        let mut touches: Vec<Touch> = reads.iter().copied().map(Touch::Read).collect();
        touches.push(Touch::Write { var, value: None });
        self.statement(touches)
    }

    /// 変数を読むだけの文を追加
    pub fn read(&mut self, vars: &[VarId]) -> StmtId {
        self.statement(vars.iter().copied().map(Touch::Read).collect())
    }

    /// アドレスを取る文を追加
    pub fn take_address(&mut self, var: VarId) -> StmtId {
        self.statement(vec![Touch::AddressOf(var)])
    }

    /// 不透明な関数に変数を渡す文を追加
    pub fn call_opaque(&mut self, args: &[VarId]) -> StmtId {
        self.statement(args.iter().copied().map(Touch::OpaqueCall).collect())
    }

    /// カウンタ付きループを開く（ヘッダ文のIDを返す）
    pub fn open_loop(&mut self, counter: VarId, start: Expr, end: Expr, step: Expr) -> StmtId {
        let mut touches: Vec<Touch> = Vec::new();
        for e in [&start, &end, &step] {
            for v in e.vars() {
                if !touches.contains(&Touch::Read(v)) {
                    touches.push(Touch::Read(v));
                }
            }
        }
        touches.push(Touch::Write {
            var: counter,
            value: Some(start.clone()),
        });
        let kind = ScopeKind::CountedLoop(CountedLoop {
            counter,
            start,
            end,
            step,
        });
        self.open(touches, kind)
    }

    /// ブロックを開く
    pub fn open_block(&mut self) -> StmtId {
        self.open(Vec::new(), ScopeKind::Block)
    }

    fn open(&mut self, touches: Vec<Touch>, kind: ScopeKind) -> StmtId {
        let id = self.alloc_stmt();
        let scope = Scope {
            id: ScopeId::new(self.next_scope),
            kind,
            statements: Vec::new(),
        };
        self.next_scope += 1;
        self.frames.push(Frame {
            scope,
            header: Some(Statement {
                id,
                touches,
                body: None,
            }),
        });
        id
    }

    /// 直近に開いたスコープを閉じる（ルートでは何もしない）
    pub fn close(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if let Some(mut header) = frame.header {
            header.body = Some(frame.scope);
            self.current().statements.push(header);
        }
    }

    /// 開いているスコープをすべて閉じてルートを返す
    pub fn finish(mut self) -> Scope {
        while self.frames.len() > 1 {
            self.close();
        }
        match self.frames.pop() {
            Some(frame) => frame.scope,
            None => Scope {
                id: ScopeId::new(0),
                kind: ScopeKind::Block,
                statements: Vec::new(),
            },
        }
    }
}
