//! Dependency analyzer integration tests

use kernel_frontend::{
    analyze, ConstValue, DependencyKind, Expr, KernelBuilder, StmtId, VarId, VarTable,
};

struct Kernel {
    vars: VarTable,
    x: VarId,
    y: VarId,
    z: VarId,
    w: VarId,
}

fn kernel() -> Kernel {
    let mut vars = VarTable::new();
    let x = vars.intern("x");
    let y = vars.intern("y");
    let z = vars.intern("z");
    let w = vars.intern("w");
    Kernel { vars, x, y, z, w }
}

#[test]
fn test_straight_line_dependencies() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    let s1 = b.assign(k.x, Expr::int(1));
    let s2 = b.assign(k.y, Expr::add(Expr::var(k.x), Expr::int(2)));
    let s3 = b.assign(k.x, Expr::sub(Expr::var(k.z), Expr::var(k.w)));
    let s4 = b.assign(k.x, Expr::div(Expr::var(k.y), Expr::var(k.z)));
    let result = analyze(&b.finish());

    assert!(result.has_edge(s1, s2, k.x, DependencyKind::Flow));
    assert!(result.has_edge(s2, s3, k.x, DependencyKind::Anti));
    assert!(result.has_edge(s1, s3, k.x, DependencyKind::Output));
    assert!(result.has_edge(s3, s4, k.x, DependencyKind::Output));
    assert!(result.has_edge(s2, s4, k.y, DependencyKind::Flow));

    // 読み取り同士は依存にならない
    assert!(result.edges_for_var(k.z).is_empty());
    assert!(result.edges_for_var(k.w).is_empty());

    // すべて前の文から後の文へ
    assert!(result.edges().all(|e| e.from < e.to));
    assert_eq!(k.vars.name(k.w), "w");
}

#[test]
fn test_multiple_vars_between_same_pair() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    let s1 = b.assign(k.x, Expr::var(k.y));
    let s2 = b.assign(k.y, Expr::var(k.x));
    let result = analyze(&b.finish());

    let edges = result.edges_between(s1, s2);
    assert_eq!(edges.len(), 2);
    assert!(result.has_edge(s1, s2, k.x, DependencyKind::Flow));
    assert!(result.has_edge(s1, s2, k.y, DependencyKind::Anti));
}

#[test]
fn test_constant_facts() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    let s1 = b.assign(k.x, Expr::int(1));
    let s2 = b.assign(k.y, Expr::add(Expr::var(k.x), Expr::int(2)));
    let s3 = b.assign(k.x, Expr::sub(Expr::var(k.z), Expr::var(k.w)));
    let result = analyze(&b.finish());

    assert_eq!(result.fact_after(s1, k.x).unwrap().value, Some(ConstValue(1)));
    assert_eq!(result.fact_after(s2, k.y).unwrap().value, Some(ConstValue(3)));
    assert!(!result.fact_after(s3, k.x).unwrap().has_const_value());
    assert!(result.fact_after(StmtId::new(99), k.x).is_none());
}

#[test]
fn test_escaped_variable_never_becomes_constant() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    b.assign(k.x, Expr::int(1));
    let take = b.take_address(k.x);
    let s3 = b.assign(k.x, Expr::int(2));
    let s4 = b.assign(k.y, Expr::var(k.x));
    let result = analyze(&b.finish());

    let fact = result.fact_after(take, k.x).unwrap();
    assert!(fact.escaped && !fact.has_const_value());
    assert!(!result.fact_after(s3, k.x).unwrap().has_const_value());
    assert!(!result.fact_after(s4, k.y).unwrap().has_const_value());

    // アドレス取得は読み書き両方として依存を作る
    assert!(result.has_edge(take, s3, k.x, DependencyKind::Output));
    assert!(result.has_edge(take, s3, k.x, DependencyKind::Anti));
    assert!(result.has_edge(take, s4, k.x, DependencyKind::Flow));
}

#[test]
fn test_escape_inside_block_propagates() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    b.assign(k.x, Expr::int(1));
    b.open_block();
    b.call_opaque(&[k.x]);
    b.close();
    let after = b.assign(k.x, Expr::int(5));
    let result = analyze(&b.finish());

    let fact = result.fact_after(after, k.x).unwrap();
    assert!(fact.escaped);
    assert!(!fact.has_const_value());
}

#[test]
fn test_independent_loop_body_is_parallel() {
    let mut vars = VarTable::new();
    let i = vars.intern("i");
    let a = vars.intern("a");
    let t = vars.intern("t");
    let mut b = KernelBuilder::new();
    let header = b.open_loop(i, Expr::int(0), Expr::int(64), Expr::int(1));
    b.assign(t, Expr::mul(Expr::var(i), Expr::int(2)));
    b.read(&[t, a]);
    b.close();
    let result = analyze(&b.finish());

    // t は反復ごとに私有化すれば衝突しない
    assert_eq!(
        result.loop_carried_vars(header, &[]).unwrap().into_iter().collect::<Vec<_>>(),
        vec![t]
    );
    assert!(!result.can_parallelize(header, &[]));
    assert!(result.can_parallelize(header, &[t]));
}

#[test]
fn test_accumulator_blocks_parallelization() {
    let mut vars = VarTable::new();
    let i = vars.intern("i");
    let sum = vars.intern("sum");
    let mut b = KernelBuilder::new();
    b.assign(sum, Expr::int(0));
    let header = b.open_loop(i, Expr::int(0), Expr::int(8), Expr::int(1));
    b.assign(sum, Expr::add(Expr::var(sum), Expr::var(i)));
    b.close();
    let result = analyze(&b.finish());

    assert!(!result.can_parallelize(header, &[]));
    let summary = result.loop_summary(header).unwrap();
    assert!(summary.written.contains(&sum));
    assert!(summary.read.contains(&i));
    assert!(!result.can_parallelize(StmtId::new(1), &[]));
}

#[test]
fn test_result_serializes_to_json() {
    let k = kernel();
    let mut b = KernelBuilder::new();
    b.assign(k.x, Expr::int(1));
    b.assign(k.y, Expr::var(k.x));
    let result = analyze(&b.finish());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["edges"].as_array().unwrap().len(), 1);
    assert_eq!(json["edges"][0]["kind"], "Flow");
}
