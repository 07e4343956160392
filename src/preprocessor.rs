//! テキストプリプロセッサ
//!
//! カーネルソースを行単位で処理し、`#define` / `#undef` をマクロテーブルに
//! 反映しながら、それ以外の行のマクロ呼び出しを展開する。
//! 出力は外部パーサーに渡される展開済みテキストで、物理行数は入力と一致する。

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{CompileError, MacroError, Result};
use crate::lex::{is_ident_char, Cursor};
use crate::macro_def::{MacroDef, MacroTable};
use crate::macro_expand::{expand, parse_actual_args};

/// プリプロセッサ設定
#[derive(Debug, Default, Clone)]
pub struct PPConfig {
    /// 事前定義マクロ (-D)。値が None なら `1`
    pub predefined: Vec<(String, Option<String>)>,
    /// ディレクティブと展開をデバッグログに出す (--debug-pp)
    pub debug_pp: bool,
    /// 不正な #define を警告してスキップする（既定はエラーで中断）
    pub skip_invalid_defines: bool,
}

/// プリプロセッサ
///
/// 1つの翻訳単位ごとに1つ作る。マクロテーブルは単位間で共有しない。
pub struct Preprocessor {
    config: PPConfig,
    macros: MacroTable,
    /// 行をまたぐブロックコメントの中か
    in_block_comment: bool,
}

impl Preprocessor {
    /// 新しいプリプロセッサを作成
    pub fn new(config: PPConfig) -> Self {
        let mut pp = Self {
            config,
            macros: MacroTable::new(),
            in_block_comment: false,
        };
        pp.define_predefined_macros();
        pp
    }

    /// 事前定義マクロを0行目で定義
    fn define_predefined_macros(&mut self) {
        for (name, value) in &self.config.predefined {
            let text = format!("{} {}", name, value.as_deref().unwrap_or("1"));
            if let Err(e) = self.macros.define(&text, 0) {
                warn!(name = %name, error = %e, "ignoring invalid predefined macro");
            }
        }
    }

    /// マクロテーブルを取得
    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// マクロテーブルを取り出す
    pub fn into_macros(self) -> MacroTable {
        self.macros
    }

    /// 設定を取得
    pub fn config(&self) -> &PPConfig {
        &self.config
    }

    /// ファイルを読み込んで処理
    pub fn process_file(&mut self, path: &Path) -> Result<String> {
        let source = fs::read_to_string(path).map_err(|e| CompileError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if self.config.debug_pp {
            debug!(path = %path.display(), bytes = source.len(), "processing file");
        }
        self.process_str(&source)
    }

    /// ソーステキストを処理して展開済みテキストを返す
    pub fn process_str(&mut self, source: &str) -> Result<String> {
        let lines: Vec<&str> = source.split('\n').collect();
        let mut out = String::with_capacity(source.len());
        let mut i = 0;

        while i < lines.len() {
            let line_no = (i + 1) as i32;
            let mut logical = String::new();
            let mut joined = 0;
            // 行継続 (\) を結合
            loop {
                let phys = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
                i += 1;
                match phys.strip_suffix('\\') {
                    Some(head) if i < lines.len() => {
                        logical.push_str(head);
                        joined += 1;
                    }
                    _ => {
                        logical.push_str(phys);
                        break;
                    }
                }
            }

            let mut text = self.process_line(&logical, line_no);
            // 引数リストが閉じていなければ次の行を取り込む
            while i < lines.len() && is_unterminated_call(&text) && !self.is_directive(&logical) {
                if !self.in_block_comment {
                    logical = strip_comments(&logical);
                }
                let phys = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
                logical.push(' ');
                logical.push_str(phys.strip_suffix('\\').unwrap_or(phys));
                i += 1;
                joined += 1;
                text = self.process_line(&logical, line_no);
            }
            out.push_str(&text?);
            for _ in 0..joined {
                out.push('\n');
            }
            if i < lines.len() {
                out.push('\n');
            }
        }
        Ok(out)
    }

    fn is_directive(&self, text: &str) -> bool {
        !self.in_block_comment && text.trim_start().starts_with('#')
    }

    /// 論理行を1つ処理
    ///
    /// 失敗した場合は状態を変えない（次の行を足して再試行できる）。
    fn process_line(&mut self, text: &str, line: i32) -> Result<String> {
        if !self.in_block_comment {
            if let Some(directive) = text.trim_start().strip_prefix('#') {
                return self.process_directive(directive, text, line);
            }
        }
        let mut in_comment = self.in_block_comment;
        let mut active = Vec::new();
        let expanded = self.expand_text(text, line, &mut in_comment, &mut active)?;
        self.in_block_comment = in_comment;
        Ok(expanded)
    }

    /// ディレクティブを処理
    ///
    /// #define / #undef は空行になり、それ以外はそのまま出力する。
    fn process_directive(&mut self, directive: &str, original: &str, line: i32) -> Result<String> {
        let mut cur = Cursor::new(directive);
        cur.skip_whitespace();
        let start = cur.pos();
        cur.skip_ident_chars();
        let name = cur.slice(start, cur.pos());
        let rest = strip_comments(cur.rest());

        match name {
            "define" => {
                match self.macros.define(&rest, line) {
                    Ok(Some(def)) => {
                        if self.config.debug_pp {
                            debug!(line, name = %def.name, function = def.is_function(), "#define");
                        }
                    }
                    Ok(None) => warn!(line, "ignoring #define without a macro name"),
                    Err(kind) if self.config.skip_invalid_defines => {
                        warn!(line, error = %kind, "skipping invalid #define");
                    }
                    Err(kind) => return Err(CompileError::at_line(line, kind)),
                }
                Ok(String::new())
            }
            "undef" => {
                let mut c = Cursor::new(&rest);
                c.skip_whitespace();
                let start = c.pos();
                c.skip_ident_chars();
                let target = c.slice(start, c.pos());
                if !target.is_empty() {
                    let removed = self.macros.undefine(target, line);
                    if self.config.debug_pp {
                        debug!(line, name = target, removed, "#undef");
                    }
                }
                Ok(String::new())
            }
            _ => Ok(original.to_string()),
        }
    }

    /// テキスト中のマクロ呼び出しを展開
    ///
    /// `active` は展開中のマクロ名で、再走査時の自己展開を防ぐ。
    fn expand_text(
        &self,
        text: &str,
        line: i32,
        in_comment: &mut bool,
        active: &mut Vec<String>,
    ) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut cur = Cursor::new(text);

        while let Some(c) = cur.peek() {
            let start = cur.pos();
            if *in_comment {
                match cur.rest().find("*/") {
                    Some(offset) => {
                        cur.set_pos(start + offset + 2);
                        *in_comment = false;
                    }
                    None => cur.set_pos(text.len()),
                }
                out.push_str(cur.slice(start, cur.pos()));
                continue;
            }

            match c {
                b'\'' if cur.at_digit_separator() => {
                    cur.advance();
                    out.push('\'');
                }
                b'"' | b'\'' => {
                    cur.skip_quoted();
                    out.push_str(cur.slice(start, cur.pos()));
                }
                b'/' if cur.peek_n(1) == Some(b'/') => {
                    out.push_str(cur.rest());
                    break;
                }
                b'/' if cur.peek_n(1) == Some(b'*') => {
                    cur.set_pos(start + 2);
                    *in_comment = true;
                    out.push_str("/*");
                }
                c if is_ident_char(c) => {
                    cur.skip_ident_chars();
                    let word = cur.slice(start, cur.pos());
                    // 桁区切りの後ろ (0x1'FF の FF) も数値の一部
                    let in_number = c.is_ascii_digit() || text[..start].ends_with('\'');
                    if in_number || active.iter().any(|a| a == word) {
                        out.push_str(word);
                        continue;
                    }
                    let Some(def) = self.macros.lookup(word, line) else {
                        out.push_str(word);
                        continue;
                    };

                    let expanded = if def.is_function() {
                        let mut probe = cur.clone();
                        probe.skip_whitespace();
                        if probe.peek() != Some(b'(') {
                            // 括弧のない関数マクロ名は展開しない
                            out.push_str(word);
                            continue;
                        }
                        let after = cur.pos();
                        let (args, consumed) = parse_actual_args(cur.rest())
                            .map_err(|kind| CompileError::at_line(line, kind))?;
                        cur.set_pos(after + consumed);
                        expand(def, &args)
                    } else {
                        expand(def, &[])
                    };
                    if self.config.debug_pp {
                        debug!(line, name = word, expansion = %expanded, "expand");
                    }

                    active.push(word.to_string());
                    let mut nested_comment = false;
                    let rescanned = self.expand_text(&expanded, line, &mut nested_comment, active);
                    active.pop();
                    let mut rescanned = rescanned?;

                    // 展開結果が関数マクロ名で終わるなら、後続のソースの引数で展開する
                    while let Some((name_start, def)) = self.trailing_function_macro(&rescanned, line, active) {
                        let mut probe = cur.clone();
                        probe.skip_whitespace();
                        if probe.peek() != Some(b'(') {
                            break;
                        }
                        let name = rescanned.split_off(name_start);
                        let after = cur.pos();
                        let (args, consumed) = parse_actual_args(cur.rest())
                            .map_err(|kind| CompileError::at_line(line, kind))?;
                        cur.set_pos(after + consumed);
                        let expanded = expand(def, &args);
                        if self.config.debug_pp {
                            debug!(line, name = %name, expansion = %expanded, "expand");
                        }

                        active.push(name);
                        let mut nested_comment = false;
                        let tail = self.expand_text(&expanded, line, &mut nested_comment, active);
                        active.pop();
                        rescanned.push_str(&tail?);
                    }
                    out.push_str(&rescanned);
                }
                _ => {
                    cur.skip_while(|c| !is_ident_char(c) && !matches!(c, b'"' | b'\'' | b'/'));
                    if cur.pos() == start {
                        cur.advance();
                    }
                    out.push_str(cur.slice(start, cur.pos()));
                }
            }
        }
        Ok(out)
    }

    /// 末尾の識別子が展開可能な関数マクロなら、その開始位置と定義を返す
    fn trailing_function_macro(
        &self,
        text: &str,
        line: i32,
        active: &[String],
    ) -> Option<(usize, &MacroDef)> {
        let len = text.len() - text.bytes().rev().take_while(|&c| is_ident_char(c)).count();
        let name = &text[len..];
        if name.is_empty() || name.as_bytes()[0].is_ascii_digit() || active.iter().any(|a| a == name) {
            return None;
        }
        let def = self.macros.lookup(name, line)?;
        def.is_function().then_some((len, def))
    }
}

/// 閉じ括弧のない呼び出しで失敗したか
fn is_unterminated_call(result: &Result<String>) -> bool {
    matches!(result, Err(e) if e.macro_error() == Some(&MacroError::UnterminatedArgumentList))
}

/// ディレクティブ本体からコメントを除去（文字列内は保持）
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cur = Cursor::new(text);
    while let Some(c) = cur.peek() {
        let start = cur.pos();
        match c {
            b'\'' if cur.at_digit_separator() => {
                cur.advance();
            }
            b'"' | b'\'' => cur.skip_quoted(),
            b'/' if cur.peek_n(1) == Some(b'/') => break,
            b'/' if cur.peek_n(1) == Some(b'*') => {
                match cur.rest()[2..].find("*/") {
                    Some(offset) => cur.set_pos(start + 2 + offset + 2),
                    None => cur.set_pos(text.len()),
                }
                out.push(' ');
                continue;
            }
            _ => {
                cur.advance();
            }
        }
        out.push_str(cur.slice(start, cur.pos()));
    }
    out.trim_end().to_string()
}
