//! Virtual lines: backslash-joined physical lines with per-character
//! provenance.

use crate::scanner::ScannerIterator;
use crate::source::{Position, Positioned, Source};
use std::rc::Rc;

/// Character that introduces a recipe line.
pub const RECIPE_PREFIX: char = '\t';

pub(crate) fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t'
}

pub(crate) fn is_eol(c: char) -> bool {
    c == '\r' || c == '\n'
}

/// Does this physical line end with a backslash followed by its EOL?
pub fn is_line_continuation(line: &str) -> bool {
    if !line.ends_with(is_eol) {
        return false;
    }
    line.trim_end_matches(is_eol).ends_with('\\')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A single source character and where it came from
pub struct VChar {
    /// The character
    pub ch: char,
    /// Where the character was read
    pub pos: Position,
}

impl VChar {
    /// Create a new character.
    pub fn new(ch: char, pos: Position) -> Self {
        VChar { ch, pos }
    }
}

impl Positioned for VChar {
    fn pos(&self) -> Position {
        self.pos.clone()
    }
}

/// An ordered run of [`VChar`]s.
///
/// Hidden characters stay in the string so positions survive, but they take
/// no part in display or comparison.
#[derive(Debug, Clone, Default)]
pub struct VCharString {
    chars: Vec<VChar>,
    hidden: Vec<bool>,
}

impl VCharString {
    /// An empty string.
    pub fn new() -> Self {
        VCharString::default()
    }

    /// An empty string with room for `capacity` characters.
    pub fn with_capacity(capacity: usize) -> Self {
        VCharString {
            chars: Vec::with_capacity(capacity),
            hidden: Vec::with_capacity(capacity),
        }
    }

    /// Wrap already-positioned characters, all visible.
    pub fn from_vchars(chars: Vec<VChar>) -> Self {
        let hidden = vec![false; chars.len()];
        VCharString { chars, hidden }
    }

    /// Build a string from plain text, assigning positions from `start`.
    pub fn from_text(text: &str, start: Position) -> Self {
        let mut s = VCharString::with_capacity(text.len());
        let (mut row, mut col) = (start.row, start.col);
        for ch in text.chars() {
            s.push(VChar::new(ch, Position::new(start.filename.clone(), row, col)));
            if ch == '\n' {
                row += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        s
    }

    /// Append a visible character.
    pub fn push(&mut self, vchar: VChar) {
        self.chars.push(vchar);
        self.hidden.push(false);
    }

    /// Number of characters, hidden ones included.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// True if there are no characters at all.
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// The visible characters.
    pub fn vchars(&self) -> impl Iterator<Item = &VChar> + '_ {
        self.chars
            .iter()
            .zip(self.hidden.iter())
            .filter(|(_, hidden)| !**hidden)
            .map(|(vchar, _)| vchar)
    }

    /// Hide every character.
    pub fn hide_all(&mut self) {
        self.hidden.iter_mut().for_each(|h| *h = true);
    }

    /// Hide the leading run of whitespace.
    pub fn hide_leading_whitespace(&mut self) {
        for (vchar, hidden) in self.chars.iter().zip(self.hidden.iter_mut()) {
            if !is_whitespace(vchar.ch) {
                break;
            }
            *hidden = true;
        }
    }

    /// Position of the first character.
    pub fn get_pos(&self) -> Option<Position> {
        self.chars.first().map(|vchar| vchar.pos.clone())
    }

    /// True if the string is non-empty and made only of blanks.
    pub fn is_whitespace(&self) -> bool {
        !self.chars.is_empty() && self.chars.iter().all(|vchar| is_whitespace(vchar.ch))
    }

    /// Move the contents out, leaving an empty string behind.
    pub fn take(&mut self) -> VCharString {
        std::mem::take(self)
    }

    /// Copy of the characters in `range`, hidden marks preserved.
    pub fn slice(&self, range: std::ops::Range<usize>) -> VCharString {
        VCharString {
            chars: self.chars[range.clone()].to_vec(),
            hidden: self.hidden[range].to_vec(),
        }
    }
}

impl std::fmt::Display for VCharString {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for vchar in self.vchars() {
            write!(f, "{}", vchar.ch)?;
        }
        Ok(())
    }
}

impl PartialEq for VCharString {
    fn eq(&self, other: &Self) -> bool {
        self.vchars().map(|v| v.ch).eq(other.vchars().map(|v| v.ch))
    }
}

impl Eq for VCharString {}

impl PartialEq<str> for VCharString {
    fn eq(&self, other: &str) -> bool {
        self.vchars().map(|v| v.ch).eq(other.chars())
    }
}

impl PartialEq<&str> for VCharString {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl FromIterator<VChar> for VCharString {
    fn from_iter<I: IntoIterator<Item = VChar>>(iter: I) -> Self {
        VCharString::from_vchars(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Which collapse rule a virtual line was built with
pub enum LineKind {
    /// Outside recipes: whitespace around backslash-newline becomes one space
    Regular,
    /// Recipe lines: backslash-newline is kept verbatim
    Recipe,
}

/// One logical makefile line built from one or more physical lines.
///
/// # Example
/// ```
/// use std::rc::Rc;
/// use rmake::{Position, VirtualLine};
/// let lines = vec!["SRC = a.c \\\n".to_string(), "      b.c\n".to_string()];
/// let vline = VirtualLine::new(lines, Position::new(Rc::from("Makefile"), 0, 0));
/// assert_eq!(vline.to_string(), "SRC = a.c b.c\n");
/// ```
#[derive(Debug, Clone)]
pub struct VirtualLine {
    phys_lines: Vec<String>,
    start: Position,
    chars: Vec<VChar>,
    hidden: Vec<bool>,
    kind: LineKind,
}

impl VirtualLine {
    /// Build a regular (non-recipe) virtual line.
    pub fn new(phys_lines: Vec<String>, start: Position) -> Self {
        VirtualLine::build(phys_lines, start, LineKind::Regular)
    }

    /// Build a recipe virtual line.
    pub fn recipe(phys_lines: Vec<String>, start: Position) -> Self {
        VirtualLine::build(phys_lines, start, LineKind::Recipe)
    }

    fn build(phys_lines: Vec<String>, start: Position, kind: LineKind) -> Self {
        let mut rows: Vec<Vec<VChar>> = Vec::with_capacity(phys_lines.len());
        let mut first_col = start.col;
        for (offset, line) in phys_lines.iter().enumerate() {
            let row = start.row + offset;
            rows.push(
                line.chars()
                    .enumerate()
                    .map(|(col, ch)| {
                        VChar::new(ch, Position::new(start.filename.clone(), row, col + first_col))
                    })
                    .collect(),
            );
            first_col = 0;
        }
        let mut hidden: Vec<Vec<bool>> = rows.iter().map(|row| vec![false; row.len()]).collect();

        match kind {
            LineKind::Regular => collapse_regular(&mut rows, &mut hidden),
            LineKind::Recipe => collapse_recipe(&rows, &mut hidden),
        }

        VirtualLine {
            phys_lines,
            start,
            chars: rows.into_iter().flatten().collect(),
            hidden: hidden.into_iter().flatten().collect(),
            kind,
        }
    }

    /// Which collapse rule built this line.
    pub fn kind(&self) -> LineKind {
        self.kind
    }

    /// True for lines that started with the recipe prefix.
    pub fn is_recipe(&self) -> bool {
        self.kind == LineKind::Recipe
    }

    /// Position of the first character of the first physical line.
    pub fn get_pos(&self) -> Position {
        self.start.clone()
    }

    /// The physical lines this line was built from.
    pub fn phys_lines(&self) -> &[String] {
        &self.phys_lines
    }

    /// The physical lines joined back together.
    pub fn get_phys_line(&self) -> String {
        self.phys_lines.concat()
    }

    /// A scanner over the visible characters.
    pub fn scanner(&self) -> ScannerIterator<VChar> {
        ScannerIterator::new(self.visible().cloned().collect())
    }

    fn visible(&self) -> impl Iterator<Item = &VChar> + '_ {
        self.chars
            .iter()
            .zip(self.hidden.iter())
            .filter(|(_, hidden)| !**hidden)
            .map(|(vchar, _)| vchar)
    }

    /// True for a line holding nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.phys_lines.len() == 1 && self.phys_lines[0].trim().is_empty()
    }

    /// True for a non-recipe line whose first visible text is `#`.
    pub fn is_comment(&self) -> bool {
        !self.is_recipe()
            && self
                .phys_lines
                .first()
                .is_some_and(|line| line.trim_start().starts_with('#'))
    }

    /// The raw text of the line as a positioned string, continuations kept
    /// verbatim and the final EOL dropped.
    pub fn raw_text(&self) -> VCharString {
        let text = self.get_phys_line();
        let text = text.trim_end_matches(is_eol);
        VCharString::from_text(text, self.start.clone())
    }

    /// Check every character against the file it came from.
    ///
    /// The only difference tolerated is a continuation backslash that was
    /// turned into a space.
    pub fn validate(&self, file_lines: &[String]) -> bool {
        self.chars.iter().all(|vchar| {
            let original = file_lines
                .get(vchar.pos.row)
                .and_then(|line| line.chars().nth(vchar.pos.col));
            match original {
                Some(c) if c == vchar.ch => true,
                Some('\\') => vchar.ch == ' ',
                _ => false,
            }
        })
    }
}

impl std::fmt::Display for VirtualLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for vchar in self.visible() {
            write!(f, "{}", vchar.ch)?;
        }
        Ok(())
    }
}

fn collapse_regular(rows: &mut [Vec<VChar>], hidden: &mut [Vec<bool>]) {
    if rows.len() < 2 {
        return;
    }
    let last = rows.len() - 1;
    for r in 0..last {
        // leading whitespace on the first line is preserved
        if r > 0 {
            clean_front(&rows[r], &mut hidden[r]);
        }
        clean_back(&mut rows[r], &mut hidden[r]);
    }
    // trailing whitespace on the last line is preserved
    clean_front(&rows[last], &mut hidden[last]);
}

fn clean_front(row: &[VChar], hidden: &mut [bool]) {
    for (vchar, h) in row.iter().zip(hidden.iter_mut()) {
        if !is_whitespace(vchar.ch) {
            break;
        }
        *h = true;
    }
}

fn clean_back(row: &mut [VChar], hidden: &mut [bool]) {
    let mut end = row.len();
    while end > 0 && is_eol(row[end - 1].ch) {
        end -= 1;
        hidden[end] = true;
    }
    if end == 0 || row[end - 1].ch != '\\' {
        return;
    }
    let backslash = end - 1;

    let mut idx = backslash;
    while idx > 0 && is_whitespace(row[idx - 1].ch) {
        idx -= 1;
        if hidden[idx] {
            // the whole line was blank: it vanishes
            hidden[backslash] = true;
            return;
        }
        hidden[idx] = true;
    }
    if idx == 0 {
        // nothing but whitespace before the backslash
        hidden[backslash] = true;
        return;
    }
    row[backslash].ch = ' ';
}

fn collapse_recipe(rows: &[Vec<VChar>], hidden: &mut [Vec<bool>]) {
    for r in 0..rows.len().saturating_sub(1) {
        let continued = {
            let text: String = rows[r].iter().map(|v| v.ch).collect();
            is_line_continuation(&text)
        };
        if !continued {
            break;
        }
        if rows[r + 1].first().map(|v| v.ch) == Some(RECIPE_PREFIX) {
            hidden[r + 1][0] = true;
        }
    }
}

/// Something that hands out virtual lines one at a time.
///
/// The parser pulls further lines from the same source while it builds
/// conditional and `define` blocks.
pub trait VirtualLineSource {
    /// The next line, including blank and comment-only lines.
    fn next_raw(&mut self) -> Option<VirtualLine>;

    /// The next line that carries a statement.
    fn next_vline(&mut self) -> Option<VirtualLine> {
        loop {
            let vline = self.next_raw()?;
            if !vline.is_blank() && !vline.is_comment() {
                return Some(vline);
            }
        }
    }
}

/// Joins the physical lines of a source into virtual lines.
#[derive(Debug, Clone)]
pub struct VirtualLineIterator {
    filename: Rc<str>,
    lines: ScannerIterator<String>,
}

impl VirtualLineIterator {
    /// Iterate over the lines of `src`.
    pub fn new(src: &Source) -> Self {
        VirtualLineIterator {
            filename: src.name(),
            lines: ScannerIterator::new(src.lines().to_vec()),
        }
    }
}

impl VirtualLineSource for VirtualLineIterator {
    fn next_raw(&mut self) -> Option<VirtualLine> {
        let first = self.lines.next()?;
        let start = Position::new(self.filename.clone(), self.lines.index() - 1, 0);
        let is_recipe = first.starts_with(RECIPE_PREFIX);
        let blank = first.trim().is_empty();

        let mut phys_lines = vec![first];
        while !blank && phys_lines.last().is_some_and(|l| is_line_continuation(l)) {
            match self.lines.next() {
                Some(line) => phys_lines.push(line),
                None => break,
            }
        }
        log::trace!("virtual line at {} spans {} line(s)", start, phys_lines.len());

        Some(if is_recipe {
            VirtualLine::recipe(phys_lines, start)
        } else {
            VirtualLine::new(phys_lines, start)
        })
    }
}

impl Iterator for VirtualLineIterator {
    type Item = VirtualLine;

    fn next(&mut self) -> Option<VirtualLine> {
        self.next_vline()
    }
}

/// Replays virtual lines that were collected earlier, e.g. the body of a
/// conditional branch.
#[derive(Debug, Clone)]
pub struct VirtualLineReplay {
    lines: std::vec::IntoIter<VirtualLine>,
}

impl VirtualLineReplay {
    /// Replay `lines` in order.
    pub fn new(lines: Vec<VirtualLine>) -> Self {
        VirtualLineReplay {
            lines: lines.into_iter(),
        }
    }
}

impl VirtualLineSource for VirtualLineReplay {
    fn next_raw(&mut self) -> Option<VirtualLine> {
        self.lines.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: usize) -> Position {
        Position::new(Rc::from("test.mk"), row, 0)
    }

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_line_continuation() {
        assert!(is_line_continuation("foo \\\n"));
        assert!(is_line_continuation("foo\\\r\n"));
        assert!(!is_line_continuation("foo \\"));
        assert!(!is_line_continuation("foo\n"));
        assert!(!is_line_continuation("\n"));
    }

    #[test]
    fn test_single_line() {
        let vline = VirtualLine::new(lines(&["  CC = gcc  \n"]), pos(0));
        assert_eq!(vline.to_string(), "  CC = gcc  \n");
        assert_eq!(vline.get_pos(), pos(0));
    }

    #[test]
    fn test_regular_collapse() {
        let vline = VirtualLine::new(
            lines(&["this \\\n", "     is      \\\n", "      a\\\n", "        \\\n", "   test\n"]),
            pos(0),
        );
        assert_eq!(vline.to_string(), "this is a test\n");
    }

    #[test]
    fn test_preserve_outer_whitespace() {
        let vline = VirtualLine::new(lines(&["  this\\\n", "  is     a     \\\n", "  test  \n"]), pos(0));
        assert_eq!(vline.to_string(), "  this is     a test  \n");
    }

    #[test]
    fn test_blank_continuations_vanish() {
        let vline = VirtualLine::new(lines(&["foo=\\\n", "\\\n", "\\\n", "bar\n"]), pos(0));
        assert_eq!(vline.to_string(), "foo= bar\n");
        let vline = VirtualLine::new(lines(&["foo=\\\n", "    \\\n", "    \\\n", "    bar\n"]), pos(0));
        assert_eq!(vline.to_string(), "foo= bar\n");
    }

    #[test]
    fn test_blank_first_row_vanishes() {
        let vline = VirtualLine::new(lines(&["   \\\n", "foo: ;\n"]), pos(0));
        assert_eq!(vline.to_string(), "foo: ;\n");
        let vline = VirtualLine::new(lines(&["\\\n", "  bar\n"]), pos(0));
        assert_eq!(vline.to_string(), "bar\n");
    }

    #[test]
    fn test_recipe_collapse() {
        let vline = VirtualLine::recipe(lines(&["\techo foo \\\n", "\tbar\n"]), pos(3));
        assert!(vline.is_recipe());
        assert_eq!(vline.to_string(), "\techo foo \\\nbar\n");
    }

    #[test]
    fn test_positions_point_into_source() {
        let text = lines(&["SRC = a.c \\\n", "   b.c\n"]);
        let vline = VirtualLine::new(text.clone(), pos(0));
        let mut file = text.clone();
        file.insert(0, "# leading\n".to_string());
        // offset so the line starts at row 1
        let vline_offset = VirtualLine::new(text, pos(1));
        assert!(vline_offset.validate(&file));

        let chars: Vec<VChar> = vline.scanner().collect();
        let b = chars.iter().find(|v| v.ch == 'b').unwrap();
        assert_eq!((b.pos.row, b.pos.col), (1, 3));
    }

    #[test]
    fn test_vcharstring_equality_ignores_hidden() {
        let mut s = VCharString::from_text("   foo", pos(0));
        assert_eq!(s.to_string(), "   foo");
        s.hide_leading_whitespace();
        assert_eq!(s, "foo");
        assert_eq!(s.len(), 6);
        assert_eq!(s.get_pos(), Some(pos(0)));
    }

    #[test]
    fn test_iterator_skips_blank_and_comment_lines() {
        let src = Source::from_string("\n# comment \\\n  continued\nA=1\n\n\t# shell comment\n");
        let vlines: Vec<String> = VirtualLineIterator::new(&src).map(|v| v.to_string()).collect();
        assert_eq!(vlines, vec!["A=1\n", "\t# shell comment\n"]);
    }

    #[test]
    fn test_raw_iteration_keeps_everything() {
        let src = Source::from_string("\n#c\nA=1\n");
        let mut it = VirtualLineIterator::new(&src);
        let mut count = 0;
        while let Some(vline) = it.next_raw() {
            count += 1;
            assert_eq!(vline.get_pos().row + 1, count);
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_unterminated_continuation() {
        let src = Source::from_string("A = 1 \\\n");
        let vlines: Vec<VirtualLine> = VirtualLineIterator::new(&src).collect();
        assert_eq!(vlines.len(), 1);
    }

    #[test]
    fn test_raw_text() {
        let vline = VirtualLine::new(lines(&["a \\\n", "  b\n"]), pos(0));
        assert_eq!(vline.raw_text().to_string(), "a \\\n  b");
    }

    #[test]
    fn test_replay() {
        let mut replay = VirtualLineReplay::new(vec![
            VirtualLine::new(lines(&["\n"]), pos(0)),
            VirtualLine::new(lines(&["x\n"]), pos(1)),
        ]);
        assert_eq!(replay.next_vline().map(|v| v.to_string()), Some("x\n".to_string()));
        assert!(replay.next_vline().is_none());
    }
}
