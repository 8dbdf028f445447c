//! Owns a named, append-only byte buffer and a lazily-computed map from byte
//! offsets to (line, column) positions.

use crate::diagnostics::Loc;

/// A named byte buffer with a lazily-rebuilt line-offset cache.
///
/// Bytes are append-only during preprocessing (`write_cache`); the
/// `line_offsets` cache is invalidated (`touched = true`) on every append and
/// rebuilt on demand by `cache_line_offsets`.
#[derive(Debug, Default)]
pub struct Source {
    pub name: String,
    cache: Vec<u8>,
    /// The offset of the first byte of every line, ascending. Empty until
    /// `cache_line_offsets` is called after a `touched` append.
    line_offsets: Vec<usize>,
    touched: bool,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Source { name: name.into(), cache: Vec::new(), line_offsets: Vec::new(), touched: true }
    }

    pub fn with_content(name: impl Into<String>, content: Vec<u8>) -> Self {
        let mut s = Source::new(name);
        s.write_cache(&content);
        s
    }

    /// Append bytes to the end of the buffer and mark the line-offset cache
    /// dirty. Preprocessing never rewrites or truncates existing bytes.
    pub fn write_cache(&mut self, bytes: &[u8]) {
        self.cache.extend_from_slice(bytes);
        self.touched = true;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.cache
    }

    /// Slice `len` bytes starting at `offset`. Panics (as an invariant
    /// violation, not a recoverable error) if the slice runs past the end of
    /// the cache — callers are expected to only ever request ranges derived
    /// from tokens of this same Source.
    pub fn get_str(&self, offset: usize, len: usize) -> &str {
        std::str::from_utf8(&self.cache[offset..offset + len])
            .expect("Source slice is not valid UTF-8 at a non-token-aligned boundary")
    }

    pub fn get_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.cache[offset..offset + len]
    }

    /// Rebuild `line_offsets` if the buffer has been appended to since the
    /// last build. O(n) in the number of bytes appended since the last call.
    pub fn cache_line_offsets(&mut self) {
        if !self.touched {
            return;
        }
        self.line_offsets.clear();
        self.line_offsets.push(0);
        for (i, &b) in self.cache.iter().enumerate() {
            if b == b'\n' {
                self.line_offsets.push(i + 1);
            }
        }
        self.touched = false;
    }

    /// Map a byte offset to a 1-based (line, column) position. `column` is a
    /// count of decoded characters (not bytes), so multi-byte UTF-8
    /// sequences count as one column each.
    ///
    /// Requires `cache_line_offsets` to have been called since the last
    /// append; otherwise the result may be stale. Binary search locates the
    /// line in O(log N); the column walk is bounded by the line's length.
    pub fn get_loc(&self, offset: usize) -> Loc {
        debug_assert!(!self.touched, "get_loc called with a dirty line-offset cache");
        let line_idx = match self.line_offsets.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_offsets.get(line_idx).copied().unwrap_or(0);
        let end = offset.min(self.cache.len());
        let column = if end >= line_start {
            std::str::from_utf8(&self.cache[line_start..end])
                .map(|s| s.chars().count() as u32 + 1)
                .unwrap_or(1)
        } else {
            1
        };
        Loc { line: line_idx as u32 + 1, column }
    }

    pub fn line_count(&self) -> usize {
        self.line_offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loc_of_first_byte_is_line_one_col_one() {
        let mut s = Source::with_content("t", b"hello\nworld\n".to_vec());
        s.cache_line_offsets();
        assert_eq!(s.get_loc(0), Loc { line: 1, column: 1 });
    }

    #[test]
    fn newline_byte_maps_to_the_line_it_ends() {
        let mut s = Source::with_content("t", b"ab\ncd".to_vec());
        s.cache_line_offsets();
        // offset 2 is the '\n' itself: it belongs to line 1, not line 2.
        assert_eq!(s.get_loc(2).line, 1);
        // offset 3 is 'c', the first byte of line 2.
        assert_eq!(s.get_loc(3), Loc { line: 2, column: 1 });
    }

    #[test]
    fn column_counts_characters_not_bytes() {
        let mut s = Source::with_content("t", "héllo\n".as_bytes().to_vec());
        s.cache_line_offsets();
        // 'é' is two bytes (0xC3 0xA9) but one character.
        let l_offset = "h\u{e9}".len();
        assert_eq!(s.get_loc(l_offset), Loc { line: 1, column: 3 });
    }

    #[test]
    fn all_offsets_map_into_a_valid_line_range() {
        let mut s = Source::with_content("t", b"a\nbb\nccc\n".to_vec());
        s.cache_line_offsets();
        for o in 0..s.len() {
            let loc = s.get_loc(o);
            assert!(loc.line as usize >= 1 && (loc.line as usize) <= s.line_count());
        }
    }

    #[test]
    fn append_invalidates_cache_until_recomputed() {
        let mut s = Source::new("t");
        s.write_cache(b"first\n");
        s.cache_line_offsets();
        assert_eq!(s.line_count(), 2);
        s.write_cache(b"second\n");
        assert!(s.touched);
        s.cache_line_offsets();
        assert_eq!(s.line_count(), 3);
    }
}
