//! Table formatting for CLI output

use comfy_table::{ContentArrangement, Table as ComfyTable};

/// Table builder for CLI output
#[derive(Debug, Clone, Default)]
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn headers(mut self, headers: &[&str]) -> Self {
        self.headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.rows.push(row);
        self
    }

    #[must_use]
    pub fn build(self) -> Table {
        let mut inner = ComfyTable::new();
        inner
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120);
        inner.set_header(&self.headers);
        for row in self.rows {
            inner.add_row(row);
        }
        Table { inner }
    }
}

/// Table for CLI output
#[derive(Debug, Clone)]
pub struct Table {
    inner: ComfyTable,
}

impl Table {
    pub fn builder() -> TableBuilder {
        TableBuilder::default()
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}
