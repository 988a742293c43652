/// Append-only progress log shown at the bottom of the screen.
///
/// Tracks a logical cursor line that only advances when appended text ends
/// with a newline, and a scroll origin that keeps the last rendered line
/// inside the visible window.
#[derive(Debug, Clone)]
pub struct StatusLog {
    text: String,
    cursor: u16,
    /// Index of the last rendered line, i.e. the number of `\n` in `text`.
    last_line: u16,
    origin: u16,
    visible_lines: u16,
}

pub const DEFAULT_VISIBLE_LINES: u16 = 4;

impl Default for StatusLog {
    fn default() -> Self {
        Self {
            text: String::new(),
            cursor: 0,
            last_line: 0,
            origin: 0,
            visible_lines: DEFAULT_VISIBLE_LINES,
        }
    }
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
        if text.ends_with('\n') {
            self.cursor = self.cursor.saturating_add(1);
        }
        let newlines = u16::try_from(text.matches('\n').count()).unwrap_or(u16::MAX);
        self.last_line = self.last_line.saturating_add(newlines);
        self.follow_last_line();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
        self.last_line = 0;
        self.origin = 0;
    }

    pub fn set_visible_lines(&mut self, lines: u16) {
        self.visible_lines = lines.max(1);
        self.follow_last_line();
    }

    // Origin never moves backwards.
    fn follow_last_line(&mut self) {
        let wanted = self.last_line.saturating_sub(self.visible_lines - 1);
        self.origin = self.origin.max(wanted);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn origin(&self) -> u16 {
        self.origin
    }
}
