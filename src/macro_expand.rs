//! マクロ展開
//!
//! マクロ定義と実引数から展開後のテキストを生成する。
//! 展開は入力だけで決まる純粋関数で、共有状態を持たない。

use serde::Serialize;

use crate::error::MacroError;
use crate::lex::{would_fuse, Cursor};
use crate::macro_def::{ArgFlags, ArgRef, ArgSlot, MacroDef, MacroPart};

/// マクロ呼び出しの実引数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActualArg {
    /// 前後の空白を除いた引数テキスト
    pub text: String,
    /// 引数の前に空白があったか
    pub has_leading_space: bool,
    /// 引数の後に空白があったか
    pub has_trailing_space: bool,
}

impl ActualArg {
    /// 空白フラグなしの引数を作成
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// 呼び出しテキストの1区間から作成
    fn from_segment(segment: &str) -> Self {
        Self {
            text: segment.trim().to_string(),
            has_leading_space: segment.starts_with(|c: char| c.is_ascii_whitespace()),
            has_trailing_space: segment.ends_with(|c: char| c.is_ascii_whitespace()),
        }
    }
}

/// 呼び出しテキストから実引数を切り出す
///
/// `raw` は（空白に続く）開き括弧から始まるテキスト。対応する閉じ括弧までを
/// 深さ0のカンマで分割し、閉じ括弧の直後までの消費バイト数と共に返す。
/// 深さを追跡するのは丸括弧だけなので、`{}` や `[]` の中のカンマでも
/// 引数は分割される（既知の制限）。
pub fn parse_actual_args(raw: &str) -> Result<(Vec<ActualArg>, usize), MacroError> {
    let mut cur = Cursor::new(raw);
    cur.skip_whitespace();
    if cur.peek() == Some(b'(') {
        cur.advance();
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut seg_start = cur.pos();
    loop {
        match cur.peek() {
            None => return Err(MacroError::UnterminatedArgumentList),
            Some(b'"') | Some(b'\'') if !cur.at_digit_separator() => {
                cur.skip_quoted();
                continue;
            }
            Some(b'(') => depth += 1,
            Some(b')') if depth == 0 => {
                args.push(ActualArg::from_segment(cur.slice(seg_start, cur.pos())));
                cur.advance();
                break;
            }
            Some(b')') => depth -= 1,
            Some(b',') if depth == 0 => {
                args.push(ActualArg::from_segment(cur.slice(seg_start, cur.pos())));
                seg_start = cur.pos() + 1;
            }
            Some(_) => {}
        }
        cur.advance();
    }

    // F() は引数なし
    if args.len() == 1 && args[0].text.is_empty() {
        args.clear();
    }
    Ok((args, cur.pos()))
}

/// マクロを展開
///
/// 引数が足りない参照は空文字列に置換される（エラーにしない）。
pub fn expand(def: &MacroDef, args: &[ActualArg]) -> String {
    if def.param_count() == 0 && !def.is_variadic() {
        if let [MacroPart::Literal(text)] = def.parts.as_slice() {
            return text.clone();
        }
    }

    let fixed = def.param_count();
    let mut out = String::new();
    for part in &def.parts {
        let piece = match part {
            MacroPart::Literal(text) => text.clone(),
            MacroPart::Arg(ArgRef { slot: ArgSlot::Index(i), flags }) => {
                substitute_fixed(args.get(*i), *flags)
            }
            MacroPart::Arg(ArgRef { slot: ArgSlot::Variadic, flags }) => {
                let joined = join_variadic(args.get(fixed..).unwrap_or(&[]), flags.concat);
                if flags.concat && joined.is_empty() {
                    // `, ##__VA_ARGS__` の余分なカンマを落とす
                    elide_trailing_comma(&mut out);
                }
                if flags.stringify {
                    format!("\"{}\"", joined)
                } else {
                    joined
                }
            }
        };
        if piece.is_empty() {
            continue;
        }
        if !part.is_concat() && needs_separator(&out, &piece) {
            out.push(' ');
        }
        out.push_str(&piece);
    }
    out
}

/// 呼び出しテキストを解析して展開
pub fn expand_invocation(def: &MacroDef, raw: &str) -> Result<String, MacroError> {
    if !def.is_function() {
        return Ok(expand(def, &[]));
    }
    let (args, _) = parse_actual_args(raw)?;
    Ok(expand(def, &args))
}

fn substitute_fixed(arg: Option<&ActualArg>, flags: ArgFlags) -> String {
    let Some(arg) = arg else {
        return if flags.stringify { "\"\"".to_string() } else { String::new() };
    };
    if flags.stringify {
        return format!("\"{}\"", arg.text);
    }
    if flags.concat {
        return arg.text.clone();
    }
    let mut s = String::with_capacity(arg.text.len() + 2);
    if arg.has_leading_space {
        s.push(' ');
    }
    s.push_str(&arg.text);
    if arg.has_trailing_space {
        s.push(' ');
    }
    s
}

/// 可変長引数をカンマ区切りで連結
fn join_variadic(extra: &[ActualArg], concat: bool) -> String {
    let n = extra.len();
    let mut joined = String::new();
    for (j, arg) in extra.iter().enumerate() {
        if j > 0 && (arg.has_leading_space || !arg.text.is_empty()) {
            joined.push(' ');
        }
        joined.push_str(&arg.text);
        // ##__VA_ARGS__ は空の最終引数の前にカンマを出さない
        if j + 1 < n && (j + 2 < n || !concat || !extra[j + 1].text.is_empty()) {
            joined.push(',');
        }
    }
    joined
}

fn elide_trailing_comma(out: &mut String) {
    let end = out.trim_end().len();
    if out[..end].ends_with(',') {
        out.truncate(end - 1);
        let end = out.trim_end().len();
        out.truncate(end);
    }
}

/// 部品の境界でトークンが融合する場合のみ区切り空白が必要
fn needs_separator(out: &str, piece: &str) -> bool {
    match (out.as_bytes().last(), piece.as_bytes().first()) {
        (Some(&left), Some(&right)) => would_fuse(left, right),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(text: &str) -> MacroDef {
        MacroDef::parse(text, 1).unwrap().unwrap()
    }

    fn args(texts: &[&str]) -> Vec<ActualArg> {
        texts.iter().map(|t| ActualArg::new(*t)).collect()
    }

    #[test]
    fn test_object_macro_ignores_args() {
        let d = def("N  1 << 4");
        assert_eq!(expand(&d, &[]), "1 << 4");
        assert_eq!(expand(&d, &args(&["x", "y"])), "1 << 4");
    }

    #[test]
    fn test_zero_param_function_macro() {
        let d = def("NOW() clock()");
        assert_eq!(expand(&d, &args(&["ignored"])), "clock()");
    }

    #[test]
    fn test_simple_substitution() {
        let d = def("ADD(a,b) a+b");
        assert_eq!(expand(&d, &args(&["1", "2"])), "1+2");
    }

    #[test]
    fn test_stringify() {
        let d = def("STR(x) #x");
        assert_eq!(expand(&d, &args(&["hello"])), "\"hello\"");
    }

    #[test]
    fn test_stringify_ignores_space_flags() {
        let d = def("STR(x) #x");
        let a = ActualArg {
            text: "hello".to_string(),
            has_leading_space: true,
            has_trailing_space: true,
        };
        assert_eq!(expand(&d, &[a]), "\"hello\"");
    }

    #[test]
    fn test_concat() {
        let d = def("CAT(a,b) a##b");
        assert_eq!(expand(&d, &args(&["foo", "bar"])), "foobar");
    }

    #[test]
    fn test_concat_with_literal_prefix() {
        let d = def("VAR(n) var_ ## n");
        assert_eq!(expand(&d, &args(&["12"])), "var_12");
    }

    #[test]
    fn test_variadic_comma_elision() {
        let d = def("LOG(fmt, ...) printf(fmt, ##__VA_ARGS__)");
        let out = expand(&d, &args(&["msg"]));
        assert!(out.contains("printf(msg)"));
        assert!(!out.contains(",)"));
    }

    #[test]
    fn test_variadic_with_args() {
        let d = def("LOG(fmt, ...) printf(fmt, __VA_ARGS__)");
        let (a, _) = parse_actual_args("(\"%d %d\", 1, 2)").unwrap();
        assert_eq!(expand(&d, &a), "printf(\"%d %d\", 1, 2)");
    }

    #[test]
    fn test_missing_args_expand_empty() {
        let d = def("PAIR(a, b) {a; b}");
        assert_eq!(expand(&d, &args(&["x"])), "{x; }");
    }

    #[test]
    fn test_plain_arg_space_flags() {
        let d = def("ADD(a,b) a+b");
        let (a, consumed) = parse_actual_args("(1, 2 )").unwrap();
        assert_eq!(consumed, 7);
        assert!(a[1].has_leading_space && a[1].has_trailing_space);
        assert_eq!(expand(&d, &a), "1+ 2 ");
    }

    #[test]
    fn test_adjacent_identifiers_are_separated() {
        let d = def("DECL(t, n) t n");
        assert_eq!(expand(&d, &args(&["int", "x"])), "int x");
        let d = def("NEG(a) -a");
        assert_eq!(expand(&d, &args(&["-1"])), "- -1");
    }

    #[test]
    fn test_parse_actual_args_nested_parens() {
        let (a, consumed) = parse_actual_args("(f(1, 2), g) + rest").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].text, "f(1, 2)");
        assert_eq!(a[1].text, "g");
        assert_eq!(consumed, "(f(1, 2), g)".len());
    }

    #[test]
    fn test_parse_actual_args_braces_split() {
        // 波括弧内のカンマは保護されない
        let (a, _) = parse_actual_args("({1, 2})").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].text, "{1");
        assert_eq!(a[1].text, "2}");
    }

    #[test]
    fn test_parse_actual_args_digit_separator() {
        let (a, consumed) = parse_actual_args("(1'000, 2) + x").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].text, "1'000");
        assert_eq!(consumed, "(1'000, 2)".len());
    }

    #[test]
    fn test_paste_between_arg_and_literal_is_kept() {
        let d = def("F(a) a##_suffix");
        assert_eq!(expand(&d, &args(&["x"])), "x##_suffix");
    }

    #[test]
    fn test_parse_actual_args_empty_and_unterminated() {
        let (a, _) = parse_actual_args("()").unwrap();
        assert!(a.is_empty());
        let (a, _) = parse_actual_args("(,)").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(
            parse_actual_args("(a, b").unwrap_err(),
            MacroError::UnterminatedArgumentList
        );
    }

    #[test]
    fn test_expand_invocation() {
        let d = def("MUL(a, b) ((a) * (b))");
        assert_eq!(expand_invocation(&d, "(x, y)").unwrap(), "((x) * ( y))");
    }

    #[test]
    fn test_expand_is_deterministic() {
        let d = def("LOG(fmt, ...) printf(fmt, ##__VA_ARGS__)");
        let a = args(&["\"%s\"", "name"]);
        let first = expand(&d, &a);
        assert_eq!(first, expand(&d, &a));
        assert_eq!(first, "printf(\"%s\",name)");
    }
}
