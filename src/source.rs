//! Mapping interpreter positions back to user source lines.

/// Full program text plus the byte range the user actually wrote.
///
/// Generated code (the callback poll loop) surrounds the user region; lines
/// reported to the UI are counted from `user_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramText {
    pub text: String,
    pub user_start: usize,
    pub user_length: usize,
}

impl ProgramText {
    pub fn new(text: String, user_start: usize, user_length: usize) -> Self {
        Self {
            text,
            user_start,
            user_length,
        }
    }

    /// User code followed by a generated `epilogue` (the callback poll loop).
    pub fn wrap(user: &str, epilogue: &str) -> Self {
        let mut text = String::with_capacity(user.len() + epilogue.len() + 1);
        text.push_str(user);
        if !user.is_empty() && !user.ends_with('\n') {
            text.push('\n');
        }
        let user_length = text.len();
        text.push_str(epilogue);
        Self::new(text, 0, user_length)
    }

    pub fn user_source(&self) -> &str {
        let end = (self.user_start + self.user_length).min(self.text.len());
        &self.text[self.user_start.min(end)..end]
    }

    pub fn line_map(&self) -> LineMap {
        LineMap::new(&self.text, self.user_start, self.user_length)
    }
}

/// Cumulative line-start offsets for a program text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMap {
    line_starts: Vec<usize>,
    user_start: usize,
    user_length: usize,
}

impl LineMap {
    pub fn new(text: &str, user_start: usize, user_length: usize) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            user_start,
            user_length,
        }
    }

    /// 0-indexed line of the full text containing `offset`.
    fn absolute_line(&self, offset: usize) -> usize {
        self.line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1)
    }

    /// 1-indexed user line for `offset`, or `None` outside the user region.
    pub fn user_line(&self, offset: usize) -> Option<usize> {
        if offset < self.user_start || offset >= self.user_start + self.user_length {
            return None;
        }
        Some(self.absolute_line(offset) - self.absolute_line(self.user_start) + 1)
    }

    /// Byte offset where the given 1-indexed user line starts.
    pub fn user_line_start(&self, line: usize) -> Option<usize> {
        let first = self.absolute_line(self.user_start);
        let start = *self.line_starts.get(first + line.checked_sub(1)?)?;
        let start = start.max(self.user_start);
        (start < self.user_start + self.user_length).then_some(start)
    }

    pub fn user_line_count(&self) -> usize {
        if self.user_length == 0 {
            return 0;
        }
        let last = self.user_start + self.user_length - 1;
        self.absolute_line(last) - self.absolute_line(self.user_start) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_relative_to_user_start() {
        let text = "prelude\nuser one\nuser two\ntrailer\n";
        let start = text.find("user one").unwrap();
        let length = "user one\nuser two\n".len();
        let map = LineMap::new(text, start, length);

        assert_eq!(map.user_line(0), None);
        assert_eq!(map.user_line(start), Some(1));
        assert_eq!(map.user_line(start + 3), Some(1));
        assert_eq!(map.user_line(text.find("user two").unwrap()), Some(2));
        assert_eq!(map.user_line(text.find("trailer").unwrap()), None);
        assert_eq!(map.user_line_count(), 2);
    }

    #[test]
    fn test_user_line_start_round_trips() {
        let program = ProgramText::new("a\nbb\nccc\nwrapper\n".to_string(), 0, 9);
        let map = program.line_map();
        assert_eq!(map.user_line_start(1), Some(0));
        assert_eq!(map.user_line_start(3), Some(5));
        assert_eq!(map.user_line_start(4), None);
        assert_eq!(map.user_line_start(0), None);
        assert_eq!(program.user_source(), "a\nbb\nccc\n");
    }

    #[test]
    fn test_wrap_excludes_epilogue_from_user_lines() {
        let program = ProgramText::wrap("print 1\nprint 2", "poll\n");
        assert_eq!(program.text, "print 1\nprint 2\npoll\n");
        let map = program.line_map();
        assert_eq!(map.user_line_count(), 2);
        assert_eq!(map.user_line(program.text.find("poll").unwrap()), None);
    }
}
