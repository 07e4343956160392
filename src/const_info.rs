//! 変数ごとの定数・範囲情報
//!
//! 文を順に訪問しながら、各変数がコンパイル時定数か、どの範囲・刻みで
//! 動くかを記録する。情報は矛盾する書き込みのたびに「より不明」な方向へ
//! だけ変化する。

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::stmt::{BinOp, Expr, UnaryOp};
use crate::var::{StmtId, VarId};

/// コンパイル時定数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConstValue(pub i64);

impl ConstValue {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 値の範囲と刻み（None は不明）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub stride: Option<i64>,
}

impl Bounds {
    /// すべて不明
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.stride.is_none()
    }

    /// 値 `value` を含むように範囲を広げる（範囲が不明なら不明のまま）
    pub fn widen_to(self, value: i64) -> Self {
        Self {
            min: self.min.map(|m| m.min(value)),
            max: self.max.map(|m| m.max(value)),
            stride: self.stride,
        }
    }
}

/// ある時点での変数の事実
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConstFact {
    pub value: Option<ConstValue>,
    pub bounds: Bounds,
    /// アドレスが外に出たか
    pub escaped: bool,
}

impl ConstFact {
    pub fn has_const_value(&self) -> bool {
        self.value.is_some()
    }
}

/// スコープ内の変数1つ分の追跡情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstInfo {
    pub fact: ConstFact,
    /// この変数を読んだ文
    pub reads: BTreeSet<StmtId>,
    /// この変数に書いた文
    pub writes: BTreeSet<StmtId>,
}

impl ConstInfo {
    /// 外側スコープの事実を引き継いで作成（接触記録は空）
    pub fn inheriting(fact: ConstFact) -> Self {
        Self {
            fact,
            ..Default::default()
        }
    }

    pub fn has_const_value(&self) -> bool {
        self.fact.has_const_value()
    }

    pub fn const_value(&self) -> Option<ConstValue> {
        self.fact.value
    }

    pub fn bounds(&self) -> Bounds {
        self.fact.bounds
    }

    pub fn is_escaped(&self) -> bool {
        self.fact.escaped
    }

    /// 定数の書き込み（以前の範囲は破棄）
    pub fn set_const(&mut self, value: ConstValue) {
        if self.fact.escaped {
            return;
        }
        self.fact.value = Some(value);
        self.fact.bounds = Bounds::unknown();
    }

    /// 範囲だけ分かる書き込み
    pub fn set_range(&mut self, bounds: Bounds) {
        self.fact.value = None;
        if !self.fact.escaped {
            self.fact.bounds = bounds;
        }
    }

    /// 何も分からない書き込み
    pub fn set_unknown(&mut self) {
        self.fact.value = None;
        self.fact.bounds = Bounds::unknown();
    }

    /// エスケープ済みにする。以後このスコープでは定数にも範囲付きにもならない
    pub fn mark_escaped(&mut self) {
        self.fact.escaped = true;
        self.set_unknown();
    }
}

/// 評価時に参照する変数の事実
pub trait ConstEnv {
    /// 変数の現在の定数値
    fn const_of(&self, var: VarId) -> Option<ConstValue>;

    /// 変数の現在の範囲
    fn bounds_of(&self, _var: VarId) -> Bounds {
        Bounds::unknown()
    }
}

/// 式の定数評価（外部評価器のインターフェース）
pub trait ConstEvaluator {
    fn evaluate(&self, expr: &Expr, env: &dyn ConstEnv) -> Option<ConstValue>;
}

impl<F> ConstEvaluator for F
where
    F: Fn(&Expr, &dyn ConstEnv) -> Option<ConstValue>,
{
    fn evaluate(&self, expr: &Expr, env: &dyn ConstEnv) -> Option<ConstValue> {
        self(expr, env)
    }
}

/// 整数演算を畳み込む評価器
///
/// オーバーフロー、ゼロ除算、範囲外シフトは定数にならない。
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldingEvaluator;

impl FoldingEvaluator {
    fn fold(&self, expr: &Expr, env: &dyn ConstEnv) -> Option<i64> {
        match expr {
            Expr::Int(n) => Some(*n),
            Expr::Var(v) => env.const_of(*v).map(ConstValue::get),
            Expr::Unary(op, e) => {
                let v = self.fold(e, env)?;
                match op {
                    UnaryOp::Neg => v.checked_neg(),
                    UnaryOp::BitNot => Some(!v),
                }
            }
            Expr::Binary(op, l, r) => {
                let l = self.fold(l, env)?;
                let r = self.fold(r, env)?;
                match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    BinOp::Div => l.checked_div(r),
                    BinOp::Rem => l.checked_rem(r),
                    BinOp::Shl => u32::try_from(r).ok().and_then(|s| l.checked_shl(s)),
                    BinOp::Shr => u32::try_from(r).ok().and_then(|s| l.checked_shr(s)),
                    BinOp::BitAnd => Some(l & r),
                    BinOp::BitOr => Some(l | r),
                    BinOp::BitXor => Some(l ^ r),
                }
            }
            Expr::Call { .. } | Expr::Opaque(_) => None,
        }
    }
}

impl ConstEvaluator for FoldingEvaluator {
    fn evaluate(&self, expr: &Expr, env: &dyn ConstEnv) -> Option<ConstValue> {
        self.fold(expr, env).map(ConstValue)
    }
}
