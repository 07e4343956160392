//! 変数・文・スコープの識別子
//!
//! 変数はアドレスではなくインターン済みIDで識別する。

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// 変数ID
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, PartialOrd, Ord, Serialize)]
pub struct VarId(u32);

impl VarId {
    /// 内部IDを取得（デバッグ用）
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// 文ID（プログラム順に増加）
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, PartialOrd, Ord, Serialize)]
pub struct StmtId(u32);

impl StmtId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// スコープID
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, PartialOrd, Ord, Serialize)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// 変数名テーブル
#[derive(Clone, Debug, Default)]
pub struct VarTable {
    names: Vec<String>,
    ids: HashMap<String, VarId>,
}

impl VarTable {
    /// 新しいテーブルを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数名を登録し、IDを返す（登録済みなら同じID）
    pub fn intern(&mut self, name: &str) -> VarId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = VarId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }

    /// IDから変数名を取得
    pub fn name(&self, id: VarId) -> &str {
        self.names.get(id.0 as usize).map_or("<unknown>", String::as_str)
    }

    /// 登録済みの変数を検索（新規登録しない）
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
