//! Bracket-balance repair for truncated structured text.

/// Which strategy produced the repaired text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// Cut back to the last point where every delimiter was closed.
    Checkpoint,
    /// Cut after the last fully closed string value and closed the rest.
    ValueBoundary,
    /// Closed an open string (if any) and every open delimiter.
    CloseAll,
}

/// Result of a repair attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    /// The repaired text. Not guaranteed to parse.
    pub text: String,
    /// Strategy that produced it.
    pub strategy: RepairStrategy,
}

#[derive(Debug, Default)]
struct ScanState {
    /// Expected closers for open delimiters, outermost first.
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
    string_is_value: bool,
    /// Last significant character outside strings.
    prev: Option<char>,
    /// Byte offset just past the last point where the stack emptied.
    last_complete: Option<usize>,
    /// Byte offset just past the last closed value string, with the
    /// delimiters open at that point.
    last_value_end: Option<(usize, Vec<char>)>,
    unescaped_quotes: usize,
}

impl ScanState {
    fn scan(text: &str) -> Self {
        let mut state = Self::default();
        for (i, c) in text.char_indices() {
            state.step(i, c);
        }
        state
    }

    fn step(&mut self, i: usize, c: char) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
                self.unescaped_quotes += 1;
                if self.string_is_value {
                    self.last_value_end = Some((i + 1, self.stack.clone()));
                }
                self.prev = Some('"');
            }
            return;
        }

        match c {
            '"' => {
                self.in_string = true;
                self.unescaped_quotes += 1;
                self.string_is_value = match self.stack.last() {
                    Some('}') => self.prev == Some(':'),
                    Some(']') => true,
                    _ => false,
                };
            }
            '{' => self.stack.push('}'),
            '[' => self.stack.push(']'),
            '}' | ']' => {
                if self.stack.last() == Some(&c) {
                    self.stack.pop();
                    if self.stack.is_empty() {
                        self.last_complete = Some(i + 1);
                    }
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            self.prev = Some(c);
        }
    }
}

/// Restores a syntactically closed structure from truncated text.
///
/// Output is best effort; callers must still parse it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketBalanceRepairer;

impl BracketBalanceRepairer {
    /// Creates a new repairer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Repairs `text`, returning only the repaired string.
    #[must_use]
    pub fn repair(&self, text: &str) -> String {
        self.repair_with_strategy(text).text
    }

    /// Repairs `text` and reports which strategy was used.
    #[must_use]
    pub fn repair_with_strategy(&self, text: &str) -> Repair {
        let state = ScanState::scan(text);

        if let Some(end) = state.last_complete {
            return Repair {
                text: text[..end].to_string(),
                strategy: RepairStrategy::Checkpoint,
            };
        }

        if let Some((end, open)) = state.last_value_end {
            let mut repaired = text[..end].to_string();
            let rest = text[end..].trim_start();
            match rest.chars().next() {
                Some(',') => repaired.push(','),
                Some('}' | ']') => {}
                _ => repaired.push(','),
            }
            repaired.extend(open.iter().rev());
            return Repair {
                text: repaired,
                strategy: RepairStrategy::ValueBoundary,
            };
        }

        let mut repaired = text.to_string();
        if state.in_string && state.escaped {
            // A dangling backslash would escape the quote we add.
            repaired.pop();
        }
        if state.unescaped_quotes % 2 == 1 {
            repaired.push('"');
        }
        repaired.extend(state.stack.iter().rev());
        Repair {
            text: repaired,
            strategy: RepairStrategy::CloseAll,
        }
    }
}
