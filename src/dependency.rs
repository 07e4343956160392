//! 依存関係解析
//!
//! 文の列をプログラム順に1回走査して変数ごとの定数・範囲情報を更新し、
//! 共通の変数に触れる文のペアをフロー／逆／出力依存に分類する。
//!
//! ```text
//!   1: x = 1;
//!   2: y = x + 2;
//!   3: x = z - w;
//!   4: x = y / z;
//!
//!   Flow  : 1 -> 2 (x), 2 -> 4 (y)
//!   Anti  : 2 -> 3 (x), 2 -> 4 (x)
//!   Output: 1 -> 3 (x), 1 -> 4 (x), 3 -> 4 (x)
//! ```
//!
//! 条件を満たすペアはすべて残す（推移的に導けるものも削らない）。
//! 読み取り同士（入力依存, 上の例では 3 -> 4 の z）は分類しない。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, trace};

use crate::const_info::{Bounds, ConstEnv, ConstEvaluator, ConstFact, ConstInfo, ConstValue};
use crate::stmt::{BinOp, CountedLoop, Expr, Scope, ScopeKind, Statement, Touch};
use crate::var::{ScopeId, StmtId, VarId};

/// 依存の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DependencyKind {
    /// 書き込み → 読み取り
    Flow,
    /// 読み取り → 書き込み
    Anti,
    /// 書き込み → 書き込み
    Output,
}

/// 2つの文の間の依存（`from` がプログラム順で先）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    pub from: StmtId,
    pub to: StmtId,
    pub var: VarId,
    pub kind: DependencyKind,
}

/// スコープ終了時の追跡情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeSnapshot {
    pub scope: ScopeId,
    pub parent: Option<ScopeId>,
    pub vars: BTreeMap<VarId, ConstInfo>,
}

/// ループ本体で触れた変数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
    pub scope: ScopeId,
    pub counter: VarId,
    pub trip_count: Option<i64>,
    pub read: BTreeSet<VarId>,
    pub written: BTreeSet<VarId>,
}

/// 解析結果
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    edges: BTreeSet<DependencyEdge>,
    scopes: BTreeMap<ScopeId, ScopeSnapshot>,
    facts: BTreeMap<StmtId, BTreeMap<VarId, ConstFact>>,
    loops: BTreeMap<StmtId, LoopSummary>,
}

impl AnalysisResult {
    /// 全依存（from, to, var, kind 順）
    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_edge(&self, from: StmtId, to: StmtId, var: VarId, kind: DependencyKind) -> bool {
        self.edges.contains(&DependencyEdge { from, to, var, kind })
    }

    /// 2つの文の間の依存
    pub fn edges_between(&self, from: StmtId, to: StmtId) -> Vec<DependencyEdge> {
        self.edges
            .iter()
            .filter(|e| e.from == from && e.to == to)
            .copied()
            .collect()
    }

    /// 変数に関する依存
    pub fn edges_for_var(&self, var: VarId) -> Vec<DependencyEdge> {
        self.edges.iter().filter(|e| e.var == var).copied().collect()
    }

    /// スコープ終了時の追跡情報
    pub fn scope(&self, id: ScopeId) -> Option<&ScopeSnapshot> {
        self.scopes.get(&id)
    }

    /// 文の直後での変数の事実（その文が触れた変数のみ）
    pub fn fact_after(&self, stmt: StmtId, var: VarId) -> Option<&ConstFact> {
        self.facts.get(&stmt)?.get(&var)
    }

    pub fn loop_summary(&self, loop_stmt: StmtId) -> Option<&LoopSummary> {
        self.loops.get(&loop_stmt)
    }

    /// 反復間で衝突する変数
    ///
    /// ループ本体で書き込まれる変数は、次の反復の同じ文とも衝突する。
    /// カウンタと `privatized` の変数は反復ごとに私有化されるので除く。
    /// `loop_stmt` がカウンタ付きループでなければ None。
    pub fn loop_carried_vars(&self, loop_stmt: StmtId, privatized: &[VarId]) -> Option<BTreeSet<VarId>> {
        let summary = self.loops.get(&loop_stmt)?;
        Some(
            summary
                .written
                .iter()
                .copied()
                .filter(|v| *v != summary.counter && !privatized.contains(v))
                .collect(),
        )
    }

    /// ループ本体を反復間で並列化できるか
    pub fn can_parallelize(&self, loop_stmt: StmtId, privatized: &[VarId]) -> bool {
        self.loop_carried_vars(loop_stmt, privatized)
            .is_some_and(|vars| vars.is_empty())
    }
}

/// スコープ1段分の追跡状態
struct Layer {
    scope: ScopeId,
    vars: HashMap<VarId, ConstInfo>,
    frame: Option<LoopFrame>,
}

/// カウンタ付きループの情報
struct LoopFrame {
    trip_count: Option<i64>,
    /// ループ終了後のカウンタの値
    exit: Option<i64>,
    /// ループに入る直前の事実（本体で書かれる変数のみ）
    entry: HashMap<VarId, ConstFact>,
    /// 本体でちょうど1回書かれる変数
    single_writes: HashSet<VarId>,
}

/// 文による1つの変数への接触（プログラム順）
#[derive(Debug, Clone, Copy)]
struct Access {
    stmt: StmtId,
    var: VarId,
    read: bool,
    write: bool,
}

/// 層のスタックを上から引く評価環境
struct LayerEnv<'a> {
    layers: &'a [Layer],
}

impl LayerEnv<'_> {
    fn fact(&self, var: VarId) -> ConstFact {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.vars.get(&var))
            .map(|info| info.fact)
            .unwrap_or_default()
    }
}

impl ConstEnv for LayerEnv<'_> {
    fn const_of(&self, var: VarId) -> Option<ConstValue> {
        self.fact(var).value
    }

    fn bounds_of(&self, var: VarId) -> Bounds {
        self.fact(var).bounds
    }
}

/// 書き込みの評価結果
enum WriteOutcome {
    Const(ConstValue),
    Range(Bounds),
    Unknown,
}

/// 依存関係解析器
///
/// 子スコープは親の事実を参照だけし、書き込みは自分の層にのみ行う。
/// スコープを抜けると親が子の結果を要約して取り込む。
pub struct DependencyAnalyzer<'e> {
    evaluator: &'e dyn ConstEvaluator,
    layers: Vec<Layer>,
    accesses: Vec<Access>,
    result: AnalysisResult,
}

impl<'e> DependencyAnalyzer<'e> {
    /// 新しい解析器を作成
    pub fn new(evaluator: &'e dyn ConstEvaluator) -> Self {
        Self {
            evaluator,
            layers: Vec::new(),
            accesses: Vec::new(),
            result: AnalysisResult::default(),
        }
    }

    /// ルートスコープを解析
    pub fn analyze(mut self, root: &Scope) -> AnalysisResult {
        self.visit_scope(root, None, HashMap::new(), None);
        self.build_edges();
        debug!(
            edges = self.result.edges.len(),
            scopes = self.result.scopes.len(),
            loops = self.result.loops.len(),
            "dependency analysis done"
        );
        self.result
    }

    fn env(&self) -> LayerEnv<'_> {
        LayerEnv {
            layers: &self.layers,
        }
    }

    /// スコープを訪問し、終了時の層を返す
    fn visit_scope(
        &mut self,
        scope: &Scope,
        parent: Option<ScopeId>,
        seeds: HashMap<VarId, ConstInfo>,
        frame: Option<LoopFrame>,
    ) -> Option<Layer> {
        self.layers.push(Layer {
            scope: scope.id,
            vars: seeds,
            frame,
        });
        for stmt in &scope.statements {
            self.visit_statement(stmt);
        }
        let layer = self.layers.pop()?;
        self.result.scopes.insert(
            scope.id,
            ScopeSnapshot {
                scope: scope.id,
                parent,
                vars: layer.vars.iter().map(|(v, info)| (*v, info.clone())).collect(),
            },
        );
        Some(layer)
    }

    fn visit_statement(&mut self, stmt: &Statement) {
        for touch in &stmt.touches {
            self.accesses.push(Access {
                stmt: stmt.id,
                var: touch.var(),
                read: touch.is_read(),
                write: touch.is_write(),
            });
            self.apply_touch(stmt.id, touch);
        }

        if let Some(body) = &stmt.body {
            self.visit_child(stmt.id, body);
        }

        let env = self.env();
        let facts: BTreeMap<VarId, ConstFact> = stmt
            .touches
            .iter()
            .map(|t| (t.var(), env.fact(t.var())))
            .collect();
        if !facts.is_empty() {
            self.result.facts.insert(stmt.id, facts);
        }
    }

    fn apply_touch(&mut self, stmt: StmtId, touch: &Touch) {
        match touch {
            Touch::Read(v) => {
                self.entry(*v).reads.insert(stmt);
            }
            Touch::Write { var, value } => {
                let outcome = self.evaluate_write(*var, value.as_ref());
                let info = self.entry(*var);
                info.writes.insert(stmt);
                match outcome {
                    WriteOutcome::Const(c) => info.set_const(c),
                    WriteOutcome::Range(b) => info.set_range(b),
                    WriteOutcome::Unknown => info.set_unknown(),
                }
            }
            Touch::AddressOf(v) | Touch::OpaqueCall(v) => {
                trace!(var = v.as_u32(), stmt = %stmt, "variable escapes");
                let info = self.entry(*v);
                info.reads.insert(stmt);
                info.writes.insert(stmt);
                info.mark_escaped();
            }
        }
    }

    /// 現在の層の追跡情報（初回接触時に外側の事実を引き継いで作成）
    fn entry(&mut self, var: VarId) -> &mut ConstInfo {
        let top = self.layers.len() - 1;
        if !self.layers[top].vars.contains_key(&var) {
            let inherited = self.env().fact(var);
            self.layers[top].vars.insert(var, ConstInfo::inheriting(inherited));
        }
        self.layers[top].vars.entry(var).or_default()
    }

    fn evaluate_write(&self, var: VarId, value: Option<&Expr>) -> WriteOutcome {
        let env = self.env();
        if env.fact(var).escaped {
            return WriteOutcome::Unknown;
        }
        let Some(expr) = value else {
            return WriteOutcome::Unknown;
        };
        if let Some(c) = self.evaluator.evaluate(expr, &env) {
            return WriteOutcome::Const(c);
        }
        match self.strided_update(var, expr) {
            Some(bounds) => WriteOutcome::Range(bounds),
            None => WriteOutcome::Unknown,
        }
    }

    /// 最も内側のカウンタ付きループ内の `x = x ± c` を範囲に変換
    fn strided_update(&self, var: VarId, expr: &Expr) -> Option<Bounds> {
        let frame = self.layers.iter().rev().find_map(|l| l.frame.as_ref())?;
        if !frame.single_writes.contains(&var) {
            return None;
        }

        let env = self.env();
        let constant = |e: &Expr| self.evaluator.evaluate(e, &env).map(ConstValue::get);
        let stride = match expr {
            Expr::Binary(BinOp::Add, l, r) if **l == Expr::Var(var) => constant(&**r)?,
            Expr::Binary(BinOp::Add, l, r) if **r == Expr::Var(var) => constant(&**l)?,
            Expr::Binary(BinOp::Sub, l, r) if **l == Expr::Var(var) => {
                constant(&**r)?.checked_neg()?
            }
            _ => return None,
        };

        let entry = frame.entry.get(&var).copied().unwrap_or_default();
        let (lo, hi) = match (entry.value, entry.bounds.min, entry.bounds.max) {
            (Some(v), _, _) => (Some(v.get()), Some(v.get())),
            (None, lo, hi) => (lo, hi),
        };
        let total = frame.trip_count.and_then(|n| n.checked_mul(stride));
        let (min, max) = match total {
            Some(total) => (
                lo.and_then(|lo| lo.checked_add(total.min(0))),
                hi.and_then(|hi| hi.checked_add(total.max(0))),
            ),
            None => (None, None),
        };
        Some(Bounds {
            min,
            max,
            stride: Some(stride),
        })
    }

    fn visit_child(&mut self, header: StmtId, body: &Scope) {
        let parent = self.layers.last().map(|l| l.scope);
        let start = self.accesses.len();

        let (seeds, frame, counter) = match &body.kind {
            ScopeKind::Block => (HashMap::new(), None, None),
            ScopeKind::CountedLoop(lp) => {
                let (seeds, frame) = self.enter_loop(lp, body);
                (seeds, Some(frame), Some(lp.counter))
            }
        };
        let trip_count = frame.as_ref().and_then(|f| f.trip_count);

        let Some(child) = self.visit_scope(body, parent, seeds, frame) else {
            return;
        };
        let range = start..self.accesses.len();
        if let Some(counter) = counter {
            self.record_loop(header, body.id, counter, trip_count, range);
        }
        self.merge_child(header, child, trip_count, counter);
    }

    /// ループ本体の層の初期値を作る
    ///
    /// 本体で書かれる変数は2回目以降の反復で値が変わるため、
    /// 定数として引き継がない。
    fn enter_loop(&self, lp: &CountedLoop, body: &Scope) -> (HashMap<VarId, ConstInfo>, LoopFrame) {
        let env = self.env();
        let eval = |e: &Expr| self.evaluator.evaluate(e, &env).map(ConstValue::get);
        let (start, end, step) = (eval(&lp.start), eval(&lp.end), eval(&lp.step));
        let trip_count = match (start, end, step) {
            (Some(s), Some(e), Some(st)) => trip_count(s, e, st),
            _ => None,
        };

        let counts = body.write_counts();
        let mut entry = HashMap::new();
        let mut seeds = HashMap::new();
        for var in counts.keys().copied() {
            let fact = env.fact(var);
            entry.insert(var, fact);
            seeds.insert(
                var,
                ConstInfo::inheriting(ConstFact {
                    value: None,
                    bounds: Bounds::unknown(),
                    escaped: fact.escaped,
                }),
            );
        }

        let counter_escaped = env.fact(lp.counter).escaped;
        let counter_bounds = if counter_escaped {
            Bounds::unknown()
        } else {
            counter_range(start, step, trip_count)
        };
        seeds.insert(
            lp.counter,
            ConstInfo::inheriting(ConstFact {
                value: None,
                bounds: counter_bounds,
                escaped: counter_escaped,
            }),
        );

        let single_writes = counts
            .iter()
            .filter(|(_, n)| **n == 1)
            .map(|(v, _)| *v)
            .collect();
        let exit = match (start, step, trip_count) {
            (Some(s), Some(st), Some(n)) if n > 0 => n.checked_mul(st).and_then(|d| s.checked_add(d)),
            _ => None,
        };
        let frame = LoopFrame {
            trip_count,
            exit,
            entry,
            single_writes,
        };
        (seeds, frame)
    }

    /// 子スコープの結果を親の層に取り込む
    fn merge_child(
        &mut self,
        header: StmtId,
        child: Layer,
        trip_count: Option<i64>,
        counter: Option<VarId>,
    ) {
        let is_loop = counter.is_some();
        let exit = child.frame.as_ref().and_then(|f| f.exit);
        for (var, info) in child.vars {
            let written = !info.writes.is_empty() || counter == Some(var);
            let read = !info.reads.is_empty();
            let before = self.env().fact(var);
            let parent = self.entry(var);
            if read {
                parent.reads.insert(header);
            }
            if written {
                parent.writes.insert(header);
            }
            if info.fact.escaped {
                parent.mark_escaped();
                continue;
            }
            if !written {
                continue;
            }
            if !is_loop {
                // ブロックはちょうど1回実行される
                parent.fact = info.fact;
            } else if trip_count == Some(0) {
                // 本体は実行されない
            } else if counter == Some(var) && info.writes.is_empty() {
                match exit {
                    Some(v) => parent.set_const(ConstValue(v)),
                    None => parent.set_unknown(),
                }
            } else {
                let mut bounds = info.fact.bounds;
                if trip_count.is_none() {
                    if let Some(v) = before.value {
                        bounds = bounds.widen_to(v.get());
                    }
                }
                parent.set_range(Bounds {
                    stride: None,
                    ..bounds
                });
            }
        }
    }

    fn record_loop(
        &mut self,
        header: StmtId,
        scope: ScopeId,
        counter: VarId,
        trip_count: Option<i64>,
        range: Range<usize>,
    ) {
        let mut read = BTreeSet::new();
        let mut written = BTreeSet::new();
        for access in &self.accesses[range] {
            if access.read {
                read.insert(access.var);
            }
            if access.write {
                written.insert(access.var);
            }
        }
        self.result.loops.insert(
            header,
            LoopSummary {
                scope,
                counter,
                trip_count,
                read,
                written,
            },
        );
    }

    /// プログラム順の接触から依存を列挙
    fn build_edges(&mut self) {
        // 変数ごとに、文単位で読み書きをまとめる
        let mut by_var: BTreeMap<VarId, Vec<(StmtId, bool, bool)>> = BTreeMap::new();
        for access in &self.accesses {
            let list = by_var.entry(access.var).or_default();
            match list.last_mut() {
                Some(last) if last.0 == access.stmt => {
                    last.1 |= access.read;
                    last.2 |= access.write;
                }
                _ => list.push((access.stmt, access.read, access.write)),
            }
        }

        for (var, list) in by_var {
            for (i, &(s1, r1, w1)) in list.iter().enumerate() {
                for &(s2, r2, w2) in &list[i + 1..] {
                    if s1 == s2 {
                        continue;
                    }
                    let mut push = |kind| {
                        self.result.edges.insert(DependencyEdge {
                            from: s1,
                            to: s2,
                            var,
                            kind,
                        });
                    };
                    if w1 && w2 {
                        push(DependencyKind::Output);
                    }
                    if w1 && r2 {
                        push(DependencyKind::Flow);
                    }
                    if r1 && w2 {
                        push(DependencyKind::Anti);
                    }
                }
            }
        }
    }
}

/// ループの反復回数（`end` は排他的）
fn trip_count(start: i64, end: i64, step: i64) -> Option<i64> {
    let (start, end, step) = (i128::from(start), i128::from(end), i128::from(step));
    let n = match step {
        0 => return None,
        s if s > 0 => {
            if end <= start { 0 } else { (end - start + s - 1) / s }
        }
        s => {
            if end >= start { 0 } else { (start - end - s - 1) / -s }
        }
    };
    i64::try_from(n).ok()
}

/// カウンタがとる値の範囲
fn counter_range(start: Option<i64>, step: Option<i64>, trip_count: Option<i64>) -> Bounds {
    let (Some(start), Some(step)) = (start, step) else {
        return Bounds::unknown();
    };
    match trip_count {
        Some(n) if n > 0 => {
            let last = (n - 1).checked_mul(step).and_then(|d| start.checked_add(d));
            match last {
                Some(last) => Bounds {
                    min: Some(start.min(last)),
                    max: Some(start.max(last)),
                    stride: Some(step),
                },
                None => Bounds {
                    stride: Some(step),
                    ..Bounds::unknown()
                },
            }
        }
        Some(_) => Bounds {
            min: Some(start),
            max: Some(start),
            stride: Some(step),
        },
        None if step > 0 => Bounds {
            min: Some(start),
            max: None,
            stride: Some(step),
        },
        None => Bounds {
            min: None,
            max: Some(start),
            stride: Some(step),
        },
    }
}

/// 既定の畳み込み評価器で解析
pub fn analyze(root: &Scope) -> AnalysisResult {
    DependencyAnalyzer::new(&crate::const_info::FoldingEvaluator).analyze(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::KernelBuilder;
    use crate::var::VarTable;

    #[test]
    fn test_trip_count() {
        assert_eq!(trip_count(0, 10, 1), Some(10));
        assert_eq!(trip_count(0, 10, 3), Some(4));
        assert_eq!(trip_count(10, 0, -2), Some(5));
        assert_eq!(trip_count(5, 5, 1), Some(0));
        assert_eq!(trip_count(0, 10, 0), None);
    }

    #[test]
    fn test_counter_range() {
        let b = counter_range(Some(0), Some(2), Some(4));
        assert_eq!((b.min, b.max, b.stride), (Some(0), Some(6), Some(2)));
        let b = counter_range(Some(10), Some(-1), None);
        assert_eq!((b.min, b.max, b.stride), (None, Some(10), Some(-1)));
    }

    #[test]
    fn test_read_modify_write_in_one_statement() {
        let mut vars = VarTable::new();
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        let s1 = b.assign(x, Expr::add(Expr::var(x), Expr::int(1)));
        let s2 = b.assign(x, Expr::add(Expr::var(x), Expr::int(1)));
        let result = analyze(&b.finish());

        assert!(result.has_edge(s1, s2, x, DependencyKind::Output));
        assert!(result.has_edge(s1, s2, x, DependencyKind::Flow));
        assert!(result.has_edge(s1, s2, x, DependencyKind::Anti));
        assert_eq!(result.edge_count(), 3);
    }

    #[test]
    fn test_constant_propagation() {
        let mut vars = VarTable::new();
        let x = vars.intern("x");
        let y = vars.intern("y");
        let mut b = KernelBuilder::new();
        let s1 = b.assign(x, Expr::int(4));
        let s2 = b.assign(y, Expr::mul(Expr::var(x), Expr::int(2)));
        let result = analyze(&b.finish());

        assert_eq!(result.fact_after(s1, x).unwrap().value, Some(ConstValue(4)));
        assert_eq!(result.fact_after(s2, y).unwrap().value, Some(ConstValue(8)));
    }

    #[test]
    fn test_loop_counter_range_and_exit_value() {
        let mut vars = VarTable::new();
        let i = vars.intern("i");
        let a = vars.intern("a");
        let mut b = KernelBuilder::new();
        let header = b.open_loop(i, Expr::int(0), Expr::int(10), Expr::int(2));
        let body = b.read(&[i, a]);
        b.close();
        let after = b.read(&[i]);
        let result = analyze(&b.finish());

        let inside = result.fact_after(body, i).unwrap();
        assert_eq!(inside.value, None);
        assert_eq!(
            inside.bounds,
            Bounds {
                min: Some(0),
                max: Some(8),
                stride: Some(2)
            }
        );
        assert_eq!(result.fact_after(after, i).unwrap().value, Some(ConstValue(10)));
        assert_eq!(result.loop_summary(header).unwrap().trip_count, Some(5));
    }

    #[test]
    fn test_strided_accumulator_bounds() {
        let mut vars = VarTable::new();
        let i = vars.intern("i");
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        b.assign(x, Expr::int(0));
        b.open_loop(i, Expr::int(0), Expr::int(4), Expr::int(1));
        let step = b.assign(x, Expr::add(Expr::var(x), Expr::int(3)));
        b.close();
        let after = b.read(&[x]);
        let result = analyze(&b.finish());

        let inside = result.fact_after(step, x).unwrap();
        assert_eq!(
            inside.bounds,
            Bounds {
                min: Some(0),
                max: Some(12),
                stride: Some(3)
            }
        );
        let outside = result.fact_after(after, x).unwrap();
        assert!(!outside.has_const_value());
        assert_eq!((outside.bounds.min, outside.bounds.max), (Some(0), Some(12)));
    }

    #[test]
    fn test_loop_written_var_is_not_constant_in_body() {
        let mut vars = VarTable::new();
        let i = vars.intern("i");
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        b.assign(x, Expr::int(5));
        b.open_loop(i, Expr::int(0), Expr::int(4), Expr::int(1));
        let use_x = b.read(&[x]);
        b.assign(x, Expr::mul(Expr::var(x), Expr::int(2)));
        b.close();
        let result = analyze(&b.finish());

        assert!(!result.fact_after(use_x, x).unwrap().has_const_value());
    }

    #[test]
    fn test_zero_trip_loop_keeps_outer_constant() {
        let mut vars = VarTable::new();
        let i = vars.intern("i");
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        b.assign(x, Expr::int(5));
        b.open_loop(i, Expr::int(3), Expr::int(3), Expr::int(1));
        b.assign(x, Expr::int(9));
        b.close();
        let after = b.read(&[x, i]);
        let result = analyze(&b.finish());

        assert_eq!(result.fact_after(after, x).unwrap().value, Some(ConstValue(5)));
        assert_eq!(result.fact_after(after, i).unwrap().value, Some(ConstValue(3)));
    }

    #[test]
    fn test_block_result_flows_to_parent() {
        let mut vars = VarTable::new();
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        b.assign(x, Expr::int(1));
        let block = b.open_block();
        b.assign(x, Expr::int(2));
        b.close();
        let after = b.read(&[x]);
        let result = analyze(&b.finish());

        assert_eq!(result.fact_after(after, x).unwrap().value, Some(ConstValue(2)));
        let root = result.scope(ScopeId::new(0)).unwrap();
        assert!(root.vars[&x].writes.contains(&block));
        assert!(result.scope(ScopeId::new(1)).unwrap().parent == Some(ScopeId::new(0)));
    }

    #[test]
    fn test_custom_evaluator() {
        let mut vars = VarTable::new();
        let x = vars.intern("x");
        let mut b = KernelBuilder::new();
        let s1 = b.assign(x, Expr::Opaque("sizeof(float)".into()));
        let root = b.finish();

        let sizeof = |e: &Expr, _: &dyn ConstEnv| match e {
            Expr::Opaque(text) if text == "sizeof(float)" => Some(ConstValue(4)),
            _ => None,
        };
        let result = DependencyAnalyzer::new(&sizeof).analyze(&root);
        assert_eq!(result.fact_after(s1, x).unwrap().value, Some(ConstValue(4)));
    }
}
