//! Coalesces token-level deltas into display-sized flushes.
//!
//! Models stream text a few characters at a time.  Rendering every delta causes churn, while
//! buffering the whole reply defeats streaming.  The [`Reassembler`] buffers deltas and releases
//! them at natural reading boundaries: a colon, or a delta that starts a list item or heading.
//! On the way it left-trims the first delta and collapses runs of blank lines.
//!
//! Concatenating every flush of a stream yields exactly [`normalize`] of its deltas.

/// Incremental reassembly state for one stream.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: String,
    seen_first: bool,
    last_line_blank: bool,
}

impl Reassembler {
    /// Create state for a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one delta.  Returns the buffered text if this delta ends a flush boundary.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.apply(delta);
        if is_flush_boundary(delta) {
            self.take()
        } else {
            None
        }
    }

    /// End of stream.  Returns whatever is still buffered.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    /// Text buffered but not yet flushed.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn apply(&mut self, delta: &str) {
        if !self.seen_first {
            self.seen_first = true;
            self.buffer.push_str(delta.trim_start());
            return;
        }
        if !delta.contains('\n') {
            self.buffer.push_str(delta);
            // Text on the current line ends any blank run, so the next line break is kept.
            if !delta.trim().is_empty() {
                self.last_line_blank = false;
            }
            return;
        }
        for (idx, line) in delta.split('\n').enumerate() {
            if line.trim().is_empty() {
                if !self.last_line_blank {
                    self.buffer.push('\n');
                    self.last_line_blank = true;
                }
            } else if self.last_line_blank {
                self.buffer.push_str(line);
                self.last_line_blank = false;
            } else {
                if idx > 0 {
                    self.buffer.push('\n');
                }
                self.buffer.push_str(line);
            }
        }
    }
}

/// The text a stream of deltas reassembles to, ignoring flush boundaries.
pub fn normalize<'a>(deltas: impl IntoIterator<Item = &'a str>) -> String {
    let mut reassembler = Reassembler::new();
    for delta in deltas {
        reassembler.apply(delta);
    }
    reassembler.buffer
}

/// True if the raw delta should release the buffer.
///
/// A delta is a boundary if it contains a colon (ASCII or full-width), or if it begins with a
/// numbered-list marker (`12.`), a bullet (`-`, `*`), or a heading marker (`#`).
pub fn is_flush_boundary(delta: &str) -> bool {
    delta.contains(':') || delta.contains('：') || starts_list_or_heading(delta)
}

fn starts_list_or_heading(delta: &str) -> bool {
    if delta.starts_with(['-', '*', '#']) {
        return true;
    }
    let digits = delta.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && delta[digits..].starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(deltas: &[&str]) -> Vec<String> {
        let mut reassembler = Reassembler::new();
        let mut flushes: Vec<String> = deltas.iter().filter_map(|d| reassembler.push(d)).collect();
        flushes.extend(reassembler.finish());
        flushes
    }

    /// Straight-line restatement of the line rules, used to check the incremental version.
    fn reference(deltas: &[&str]) -> String {
        let mut out = String::new();
        let mut blank_run = false;
        for (n, delta) in deltas.iter().enumerate() {
            if n == 0 {
                out += delta.trim_start();
            } else if !delta.contains('\n') {
                out += delta;
                blank_run &= delta.trim().is_empty();
            } else {
                for (i, line) in delta.split('\n').enumerate() {
                    let blank = line.trim().is_empty();
                    match (blank, blank_run) {
                        (true, true) => {}
                        (true, false) => {
                            out.push('\n');
                            blank_run = true;
                        }
                        (false, true) => {
                            out += line;
                            blank_run = false;
                        }
                        (false, false) => {
                            if i > 0 {
                                out.push('\n');
                            }
                            out += line;
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn colon_flushes_and_blank_lines_collapse() {
        let deltas = [" Hello", " world", "\n\n\n", "Next:", " line"];
        let flushes = run(&deltas);
        assert_eq!(flushes, vec!["Hello world\nNext:", " line"]);
        assert_eq!(flushes.concat(), "Hello world\nNext: line");
        assert_eq!(normalize(deltas), "Hello world\nNext: line");
    }

    #[test]
    fn first_delta_is_left_trimmed_only() {
        assert_eq!(run(&["\n\n  Hi there  "]), vec!["Hi there  "]);
    }

    #[test]
    fn whitespace_only_first_delta_emits_nothing() {
        assert!(run(&["   "]).is_empty());
        assert_eq!(run(&["  ", "ok"]), vec!["ok"]);
    }

    #[test]
    fn first_delta_can_flush() {
        assert_eq!(run(&["1. First", " step"]), vec!["1. First", " step"]);
    }

    #[test]
    fn full_width_colon_flushes() {
        assert_eq!(run(&["注意", "：", "小心"]), vec!["注意：", "小心"]);
    }

    #[test]
    fn list_and_heading_prefixes() {
        for delta in ["-", "- item", "*", "**bold", "#", "## Title", "1.", "12. twelve"] {
            assert!(is_flush_boundary(delta), "{delta:?}");
        }
        for delta in ["1", "1a.", " -", "a-b", "x.", "", "\n- item"] {
            assert!(!is_flush_boundary(delta), "{delta:?}");
        }
    }

    #[test]
    fn newline_inside_delta_separates_lines() {
        assert_eq!(normalize(["a", "b\nc", "\nd"]), "ab\nc\nd");
    }

    #[test]
    fn blank_runs_collapse_across_deltas() {
        assert_eq!(normalize(["x", "a\n\n", "\n\nb"]), "xa\nb");
        assert_eq!(normalize(["x", "\n", "\n", "\n", "y"]), "x\ny");
    }

    #[test]
    fn text_between_blank_runs_keeps_its_line_break() {
        assert_eq!(normalize(["A", "\n\n", "B", "\nC"]), "A\nB\nC");
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        assert_eq!(normalize(["a", "\n   \n\t\nb"]), "a\nb");
    }

    #[test]
    fn finish_on_empty_buffer_is_none() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push("a:"), Some("a:".to_string()));
        assert_eq!(reassembler.pending(), "");
        assert_eq!(reassembler.finish(), None);
    }

    #[test]
    fn conservation_over_generated_streams() {
        const VOCAB: &[&str] = &[
            " ", "Hello", " world", "\n", "\n\n", "\n\n\n", "  \n", ":", "：", "- ", "* ", "# ",
            "1.", "42. ", "a\nb", "\nnext", "end.\n", "\t", "中文", "🙂", "x: y", "\n- item\n",
        ];
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        for _ in 0..500 {
            let len = next() % 12;
            let deltas: Vec<&str> = (0..len).map(|_| VOCAB[next() % VOCAB.len()]).collect();
            let flushes = run(&deltas);
            assert!(flushes.iter().all(|f| !f.is_empty()), "{deltas:?}");
            assert_eq!(flushes.concat(), reference(&deltas), "{deltas:?}");
            assert_eq!(normalize(deltas.iter().copied()), reference(&deltas));
        }
    }
}
