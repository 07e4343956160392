//! マクロ定義と管理
//!
//! `#define` の本体テキストを構造化されたマクロ定義に変換し、
//! 行番号でスコープされたマクロテーブルで管理する。

use std::collections::HashMap;

use serde::Serialize;

use crate::error::MacroError;
use crate::lex::{is_ident_char, is_ident_start, Cursor, NAME_DELIMITERS};

/// 可変長引数を参照する予約トークン
pub const VA_ARGS: &str = "__VA_ARGS__";

/// 未設定の行番号
pub const UNSET_LINE: i32 = -1;

/// 引数参照が指すスロット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgSlot {
    /// 固定パラメータ（0始まり）
    Index(usize),
    /// `__VA_ARGS__`
    Variadic,
}

/// 引数参照の演算子フラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArgFlags {
    /// `#param`
    pub stringify: bool,
    /// `##param`
    pub concat: bool,
}

/// マクロ本体中の引数参照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArgRef {
    pub slot: ArgSlot,
    pub flags: ArgFlags,
}

/// マクロ本体の構成要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MacroPart {
    /// そのまま出力されるテキスト
    Literal(String),
    /// 引数参照
    Arg(ArgRef),
}

impl MacroPart {
    /// `##` で直前と連結される部品かどうか
    pub fn is_concat(&self) -> bool {
        matches!(self, MacroPart::Arg(ArgRef { flags: ArgFlags { concat: true, .. }, .. }))
    }
}

/// マクロ定義の種類
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MacroKind {
    /// オブジェクトマクロ: #define FOO value
    Object,
    /// 関数マクロ: #define FOO(a, b) ...
    Function {
        params: Vec<String>,
        is_variadic: bool,
    },
}

/// マクロ定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MacroDef {
    /// マクロ名
    pub name: String,
    /// マクロの種類
    pub kind: MacroKind,
    /// 本体の部品列
    pub parts: Vec<MacroPart>,
    /// 定義された行
    pub defined_line: i32,
    /// 未定義化（または再定義）された行
    pub undefined_line: i32,
}

impl MacroDef {
    /// 新しいオブジェクトマクロを作成
    pub fn object(name: impl Into<String>, body: &str, line: i32) -> Self {
        let body = body.trim_end();
        let parts = if body.is_empty() {
            Vec::new()
        } else {
            vec![MacroPart::Literal(body.to_string())]
        };
        Self {
            name: name.into(),
            kind: MacroKind::Object,
            parts,
            defined_line: line,
            undefined_line: UNSET_LINE,
        }
    }

    /// 新しい関数マクロを作成
    pub fn function(
        name: impl Into<String>,
        params: Vec<String>,
        is_variadic: bool,
        body: &str,
        line: i32,
    ) -> Self {
        let parts = parse_body(body.trim(), &params, is_variadic);
        Self {
            name: name.into(),
            kind: MacroKind::Function { params, is_variadic },
            parts,
            defined_line: line,
            undefined_line: UNSET_LINE,
        }
    }

    /// `#define` 以降のテキストをパース
    ///
    /// 先頭が識別子でなければマクロではないので `Ok(None)` を返す。
    pub fn parse(text: &str, line: i32) -> Result<Option<Self>, MacroError> {
        let mut cur = Cursor::new(text);
        cur.skip_whitespace();
        match cur.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return Ok(None),
        }

        let start = cur.pos();
        cur.skip_to(NAME_DELIMITERS);
        let name = cur.slice(start, cur.pos());
        cur.skip_whitespace();

        if cur.peek() != Some(b'(') {
            return Ok(Some(Self::object(name, cur.rest(), line)));
        }
        cur.advance();

        let (params, is_variadic) = parse_params(&mut cur)?;
        Ok(Some(Self::function(name, params, is_variadic, cur.rest(), line)))
    }

    /// 関数マクロかどうか
    pub fn is_function(&self) -> bool {
        matches!(self.kind, MacroKind::Function { .. })
    }

    /// パラメータ数を取得（オブジェクトマクロなら0、`...` は数えない）
    pub fn param_count(&self) -> usize {
        self.params().len()
    }

    /// パラメータ名
    pub fn params(&self) -> &[String] {
        match &self.kind {
            MacroKind::Object => &[],
            MacroKind::Function { params, .. } => params,
        }
    }

    /// 可変引数マクロかどうか
    pub fn is_variadic(&self) -> bool {
        matches!(self.kind, MacroKind::Function { is_variadic: true, .. })
    }

    /// 指定行でこの定義が有効か
    pub fn is_visible_at(&self, line: i32) -> bool {
        self.defined_line <= line && (self.undefined_line == UNSET_LINE || line < self.undefined_line)
    }

    /// まだ閉じられていない定義か
    fn is_open(&self) -> bool {
        self.undefined_line == UNSET_LINE
    }
}

/// パラメータリストをパース（カーソルは `(` の直後）
fn parse_params(cur: &mut Cursor<'_>) -> Result<(Vec<String>, bool), MacroError> {
    let start = cur.pos();
    let mut depth = 0usize;
    loop {
        match cur.advance() {
            None => return Err(MacroError::UnterminatedArgumentList),
            Some(b'(') => depth += 1,
            Some(b')') if depth == 0 => break,
            Some(b')') => depth -= 1,
            Some(_) => {}
        }
    }
    let inner = cur.slice(start, cur.pos() - 1);
    if inner.trim().is_empty() {
        return Ok((Vec::new(), false));
    }

    let names: Vec<&str> = inner.split(',').map(str::trim).collect();
    let last = names.len() - 1;
    let mut params: Vec<String> = Vec::with_capacity(names.len());
    let mut is_variadic = false;
    for (i, name) in names.into_iter().enumerate() {
        if name == "..." {
            if i != last {
                return Err(MacroError::VariadicNotLast { position: i });
            }
            is_variadic = true;
            continue;
        }
        if params.iter().any(|p| p == name) {
            return Err(MacroError::DuplicateParameter(name.to_string()));
        }
        params.push(name.to_string());
    }
    Ok((params, is_variadic))
}

/// 本体を部品列に分解
///
/// `#` / `##` はパラメータ参照の直前にある場合だけ演算子として扱う。
/// `a##_suffix` のように引数の後ろに続く `##` はリテラルのまま残る。
fn parse_body(body: &str, params: &[String], is_variadic: bool) -> Vec<MacroPart> {
    let mut parts = Vec::new();
    let mut pending = String::new();
    let mut cur = Cursor::new(body);

    while let Some(c) = cur.peek() {
        let start = cur.pos();
        if cur.at_digit_separator() {
            cur.advance();
            pending.push('\'');
            continue;
        }
        if c == b'"' || c == b'\'' {
            // 文字列中は置換しない
            cur.skip_quoted();
            pending.push_str(cur.slice(start, cur.pos()));
            continue;
        }
        if !is_ident_char(c) {
            cur.skip_while(|c| !is_ident_char(c) && c != b'"' && c != b'\'');
            pending.push_str(cur.slice(start, cur.pos()));
            continue;
        }

        cur.skip_ident_chars();
        let word = cur.slice(start, cur.pos());
        let slot = if c.is_ascii_digit() {
            None
        } else if let Some(i) = params.iter().position(|p| p == word) {
            Some(ArgSlot::Index(i))
        } else if is_variadic && word == VA_ARGS {
            Some(ArgSlot::Variadic)
        } else {
            None
        };

        match slot {
            Some(slot) => {
                let flags = take_operator(&mut pending);
                flush_literal(&mut parts, &mut pending);
                parts.push(MacroPart::Arg(ArgRef { slot, flags }));
            }
            None => pending.push_str(word),
        }
    }
    flush_literal(&mut parts, &mut pending);
    parts
}

/// リテラル末尾の `#` / `##` を取り除いてフラグに変換
fn take_operator(pending: &mut String) -> ArgFlags {
    let head = pending.trim_end();
    if let Some(rest) = head.strip_suffix("##") {
        let keep = rest.trim_end().len();
        pending.truncate(keep);
        ArgFlags { concat: true, stringify: false }
    } else if let Some(rest) = head.strip_suffix('#') {
        let keep = rest.len();
        pending.truncate(keep);
        ArgFlags { concat: false, stringify: true }
    } else {
        ArgFlags::default()
    }
}

fn flush_literal(parts: &mut Vec<MacroPart>, pending: &mut String) {
    if !pending.is_empty() {
        parts.push(MacroPart::Literal(std::mem::take(pending)));
    }
}

/// マクロテーブル
///
/// 名前ごとに定義履歴を持ち、行番号で有効な定義を引く。
#[derive(Debug, Default, Clone)]
pub struct MacroTable {
    macros: HashMap<String, Vec<MacroDef>>,
}

impl MacroTable {
    /// 新しいマクロテーブルを作成
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    /// 定義テキストをパースして登録
    ///
    /// マクロでないテキストなら `Ok(None)`。
    pub fn define(&mut self, text: &str, line: i32) -> Result<Option<&MacroDef>, MacroError> {
        match MacroDef::parse(text, line)? {
            Some(def) => Ok(Some(self.insert(def))),
            None => Ok(None),
        }
    }

    /// パース済みの定義を登録（同名の有効な定義は定義行で閉じる）
    pub fn insert(&mut self, def: MacroDef) -> &MacroDef {
        let line = def.defined_line;
        let history = self.macros.entry(def.name.clone()).or_default();
        if let Some(prev) = history.iter_mut().rev().find(|d| d.is_open()) {
            prev.undefined_line = line;
        }
        let index = history.len();
        history.push(def);
        &history[index]
    }

    /// マクロを未定義化（有効な定義があれば true）
    pub fn undefine(&mut self, name: &str, line: i32) -> bool {
        let Some(history) = self.macros.get_mut(name) else {
            return false;
        };
        match history.iter_mut().rev().find(|d| d.is_open() && d.defined_line <= line) {
            Some(def) => {
                def.undefined_line = line;
                true
            }
            None => false,
        }
    }

    /// 指定行で有効な定義を取得
    pub fn lookup(&self, name: &str, at_line: i32) -> Option<&MacroDef> {
        self.macros
            .get(name)?
            .iter()
            .rev()
            .find(|d| d.is_visible_at(at_line))
    }

    /// 指定行でマクロが定義されているかどうか
    pub fn is_defined(&self, name: &str, at_line: i32) -> bool {
        self.lookup(name, at_line).is_some()
    }

    /// 登録された定義の総数（履歴を含む）
    pub fn len(&self) -> usize {
        self.macros.values().map(Vec::len).sum()
    }

    /// テーブルが空かどうか
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// 全定義を定義行・名前順で返す
    pub fn definitions(&self) -> Vec<&MacroDef> {
        let mut defs: Vec<&MacroDef> = self.macros.values().flatten().collect();
        defs.sort_by(|a, b| (a.defined_line, &a.name).cmp(&(b.defined_line, &b.name)));
        defs
    }

    /// 指定行で有効な定義をイテレート
    pub fn iter_active(&self, at_line: i32) -> impl Iterator<Item = &MacroDef> {
        self.macros
            .values()
            .filter_map(move |history| history.iter().rev().find(|d| d.is_visible_at(at_line)))
    }
}
