//! 字句ユーティリティ
//!
//! マクロ定義・展開で使う文字クラス判定と、区切り文字までの走査を提供する。
//! 文字クラス表はコンパイル時に構築される不変テーブル。

/// 空白文字（改行を含む）
pub const WHITESPACE_CHARS: &[u8] = b" \t\r\n\x0B\x0C";

/// 256 要素の文字クラス表を構築
const fn build_table(chars: &[u8]) -> [bool; 256] {
    let mut table = [false; 256];
    let mut i = 0;
    while i < chars.len() {
        table[chars[i] as usize] = true;
        i += 1;
    }
    table
}

/// 識別子を構成する文字 [a-zA-Z0-9_]
const fn build_ident_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut c = 0;
    while c < 256 {
        let b = c as u8;
        table[c] = b.is_ascii_alphanumeric() || b == b'_';
        c += 1;
    }
    table
}

static WHITESPACE: [bool; 256] = build_table(WHITESPACE_CHARS);
static IDENT: [bool; 256] = build_ident_table();
/// 隣接すると別トークンに融合しうる演算子文字
static OPERATOR: [bool; 256] = build_table(b"+-*/%<>=&|^!~.#:?");

/// マクロ名の終端（空白または `(`）
pub const NAME_DELIMITERS: &[u8] = b" \t\r\n\x0B\x0C(";

/// 空白文字かどうか
pub fn is_whitespace(c: u8) -> bool {
    WHITESPACE[c as usize]
}

/// 識別子の先頭になれる文字かどうか
pub fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// 識別子を構成する文字かどうか
pub fn is_ident_char(c: u8) -> bool {
    IDENT[c as usize]
}

/// 演算子文字かどうか
pub fn is_operator_char(c: u8) -> bool {
    OPERATOR[c as usize]
}

/// 2文字を空白なしで連結したとき、1つのトークンに融合するか
pub fn would_fuse(left: u8, right: u8) -> bool {
    (is_ident_char(left) && is_ident_char(right))
        || (is_operator_char(left) && is_operator_char(right))
}

/// バイト列上のカーソル
///
/// 位置はバイトオフセットで、区切りは常に ASCII 文字上にあるため
/// UTF-8 の境界を壊さない。
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    source: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// 新しいカーソルを作成
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            pos: 0,
        }
    }

    /// 現在位置
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 位置を設定
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.source.len());
    }

    /// 終端に達したか
    pub fn is_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// 現在の文字をピーク
    pub fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    /// n文字先をピーク
    pub fn peek_n(&self, n: usize) -> Option<u8> {
        self.source.get(self.pos + n).copied()
    }

    /// 1文字進める
    pub fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// 空白をスキップ
    pub fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(is_whitespace) {
            self.pos += 1;
        }
    }

    /// 区切り文字のいずれかに達するまでスキップ
    pub fn skip_to(&mut self, delimiters: &[u8]) {
        while self.peek().is_some_and(|c| !delimiters.contains(&c)) {
            self.pos += 1;
        }
    }

    /// 条件を満たす文字が続く間スキップ
    pub fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    /// 識別子文字の連続をスキップ
    pub fn skip_ident_chars(&mut self) {
        self.skip_while(is_ident_char);
    }

    /// 文字列・文字リテラルを閉じ引用符までスキップ
    ///
    /// 現在位置は開き引用符であること。閉じられていない場合は終端で止まる。
    pub fn skip_quoted(&mut self) {
        let Some(quote) = self.advance() else {
            return;
        };
        while let Some(c) = self.advance() {
            if c == b'\\' {
                self.advance();
            } else if c == quote {
                break;
            }
        }
    }

    /// 現在位置の `'` が数値リテラル中の桁区切り (`1'000`) か
    ///
    /// 直前の識別子文字の並び（桁区切りを含む）が数字で始まる場合に真。
    /// `L'a'` のような接頭辞付き文字リテラルは区切りではない。
    pub fn at_digit_separator(&self) -> bool {
        if self.peek() != Some(b'\'') {
            return false;
        }
        let run = self.source[..self.pos]
            .iter()
            .rev()
            .take_while(|&&c| is_ident_char(c) || c == b'\'')
            .count();
        run > 0 && self.source[self.pos - run].is_ascii_digit()
    }

    /// 2つの位置の間のテキスト
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        // 区切りはASCII文字上なのでUTF-8として常に有効
        std::str::from_utf8(&self.source[start..end]).unwrap_or_default()
    }

    /// 現在位置以降のテキスト
    pub fn rest(&self) -> &'a str {
        self.slice(self.pos, self.source.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_classes() {
        assert!(is_whitespace(b' '));
        assert!(is_whitespace(b'\n'));
        assert!(!is_whitespace(b'a'));
        assert!(is_ident_start(b'_'));
        assert!(!is_ident_start(b'1'));
        assert!(is_ident_char(b'1'));
        assert!(!is_ident_char(b'('));
    }

    #[test]
    fn test_would_fuse() {
        assert!(would_fuse(b'a', b'b'));
        assert!(would_fuse(b'-', b'-'));
        assert!(!would_fuse(b'1', b'+'));
        assert!(!would_fuse(b'(', b'x'));
    }

    #[test]
    fn test_cursor_skip_to() {
        let mut cur = Cursor::new("  NAME(x) x");
        cur.skip_whitespace();
        let start = cur.pos();
        cur.skip_to(NAME_DELIMITERS);
        assert_eq!(cur.slice(start, cur.pos()), "NAME");
        assert_eq!(cur.peek(), Some(b'('));
    }

    #[test]
    fn test_digit_separator() {
        let mut cur = Cursor::new("1'000'000 L'a' x'");
        cur.set_pos(1);
        assert!(cur.at_digit_separator());
        cur.set_pos(5);
        assert!(cur.at_digit_separator());
        cur.set_pos(11);
        assert!(!cur.at_digit_separator());
        cur.set_pos(16);
        assert!(!cur.at_digit_separator());
        cur.set_pos(0);
        assert!(!cur.at_digit_separator());
    }

    #[test]
    fn test_cursor_skip_quoted() {
        let mut cur = Cursor::new(r#""a\"b" rest"#);
        cur.skip_quoted();
        assert_eq!(cur.rest(), " rest");
    }
}
