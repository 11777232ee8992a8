//! Removes `<think>…</think>` private-reasoning segments from model output,
//! either incrementally over a token stream or over a finished answer.

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Incremental reasoning stripper.
///
/// Text that might be the start of a tag is held back until the next chunk
/// disambiguates it. An opening tag that is never closed is dropped and the
/// text after it is released by [`ReasoningFilter::finish`]; stray closing
/// tags are dropped. Leading whitespace of the answer is trimmed.
#[derive(Debug, Default)]
pub struct ReasoningFilter {
    pending: String,
    inside: bool,
    started: bool,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the text that is safe to emit now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut out = String::new();

        loop {
            if self.inside {
                match self.pending.find(CLOSE) {
                    Some(pos) => {
                        self.pending.drain(..pos + CLOSE.len());
                        self.inside = false;
                    }
                    None => break,
                }
                continue;
            }

            let open = self.pending.find(OPEN);
            let close = self.pending.find(CLOSE);
            match (open, close) {
                (Some(o), c) if c.map_or(true, |c| o < c) => {
                    out.push_str(&self.pending[..o]);
                    self.pending.drain(..o + OPEN.len());
                    self.inside = true;
                }
                (_, Some(c)) => {
                    out.push_str(&self.pending[..c]);
                    self.pending.drain(..c + CLOSE.len());
                }
                _ => {
                    let keep = partial_tag_suffix(&self.pending, OPEN)
                        .max(partial_tag_suffix(&self.pending, CLOSE));
                    let cut = self.pending.len() - keep;
                    out.push_str(&self.pending[..cut]);
                    self.pending.drain(..cut);
                    break;
                }
            }
        }

        self.trim_leading(out)
    }

    /// Flush whatever is still held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.inside = false;
        self.trim_leading(rest)
    }

    fn trim_leading(&mut self, out: String) -> String {
        if self.started {
            return out;
        }
        let trimmed = out.trim_start();
        if trimmed.is_empty() {
            return String::new();
        }
        self.started = true;
        trimmed.to_string()
    }
}

/// Length of the longest proper prefix of `tag` that `s` ends with.
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(s.len());
    (1..=max)
        .rev()
        .find(|&k| s.ends_with(&tag[..k]))
        .unwrap_or(0)
}

/// Strip reasoning segments from a complete answer.
pub fn strip_reasoning(text: &str) -> String {
    let mut filter = ReasoningFilter::new();
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> String {
        let mut f = ReasoningFilter::new();
        let mut out = String::new();
        for c in chunks {
            out.push_str(&f.push(c));
        }
        out.push_str(&f.finish());
        out
    }

    #[test]
    fn test_strip_whole_segment() {
        assert_eq!(
            strip_reasoning("<think>the user wants hours</think>\nOpen 7-19."),
            "Open 7-19."
        );
    }

    #[test]
    fn test_strip_multiple_segments() {
        assert_eq!(strip_reasoning("A<think>x</think>B<think>y</think>C"), "ABC");
    }

    #[test]
    fn test_no_reasoning_passes_through() {
        assert_eq!(strip_reasoning("Plain answer."), "Plain answer.");
    }

    #[test]
    fn test_tags_split_across_chunks() {
        let out = run(&["Hello <th", "ink>secret</thi", "nk> world"]);
        assert_eq!(out, "Hello  world");
    }

    #[test]
    fn test_partial_tag_lookalike_is_released() {
        // "<th" followed by something that is not a tag must not be swallowed
        let out = run(&["a <th", "e> b"]);
        assert_eq!(out, "a <the> b");
    }

    #[test]
    fn test_unclosed_tag_keeps_following_text() {
        assert_eq!(run(&["<think>", "answer"]), "answer");
    }

    #[test]
    fn test_stray_close_tag_dropped() {
        assert_eq!(strip_reasoning("reasoning done</think>Answer"), "reasoning doneAnswer");
    }

    #[test]
    fn test_streaming_emits_before_finish() {
        let mut f = ReasoningFilter::new();
        assert_eq!(f.push("Open "), "Open ");
        assert_eq!(f.push("daily"), "daily");
        assert_eq!(f.finish(), "");
    }

    #[test]
    fn test_leading_whitespace_after_reasoning_trimmed() {
        let out = run(&["<think>plan</think>", "\n\n", "Fares are 1.50."]);
        assert_eq!(out, "Fares are 1.50.");
    }

    #[test]
    fn test_multibyte_text_near_tags() {
        assert_eq!(strip_reasoning("è<think>ü</think>ñ"), "èñ");
    }
}
