/// Text buffer for SQL statements.
pub struct SqlBuilder {
    buf: String,
    list_started: bool,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            list_started: false,
        }
    }

    pub fn build(self) -> String {
        self.buf
    }

    pub fn push(&mut self, str: &str) {
        self.buf.push_str(str);
    }

    /// Pushes a keyword or clause, separated by a space from what precedes it.
    pub fn push_word(&mut self, str: &str) {
        if !self.buf.is_empty() && !self.buf.ends_with(' ') && !self.buf.ends_with('(') {
            self.buf.push(' ');
        }
        self.buf.push_str(str);
    }

    pub fn start_list(&mut self) {
        self.list_started = false;
    }

    /// Separates list items with commas.
    pub fn list_item(&mut self) {
        if self.list_started {
            self.buf.push_str(", ");
        } else {
            self.push_word("");
        }
        self.list_started = true;
    }

    /// `table` or `table alias`.
    pub fn push_table(&mut self, table: &str, alias: &str) {
        self.push_word(table);
        if table != alias {
            self.buf.push(' ');
            self.buf.push_str(alias);
        }
    }

    /// `alias.column`
    pub fn push_column(&mut self, alias: &str, column: &str) {
        self.buf.push_str(alias);
        self.buf.push('.');
        self.buf.push_str(column);
    }
}

impl Default for SqlBuilder {
    fn default() -> Self {
        Self::new()
    }
}
