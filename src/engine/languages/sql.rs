use std::time::Instant;

use async_trait::async_trait;
use rusqlite::{Connection, Row, limits::Limit, types::ValueRef};

use crate::engine::{
    catalog::LanguageDescriptor,
    error::ExecError,
    languages::{CompileOutcome, LanguagePlugin, Prepared, SourceFile},
    models::{ExecutionLimits, ExecutionResult},
    sandbox::{Sandbox, Workspace},
};

const SEED: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    age INTEGER
);
CREATE TABLE products (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    price REAL,
    category TEXT
);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    user_id INTEGER REFERENCES users (id),
    product_id INTEGER REFERENCES products (id),
    quantity INTEGER,
    order_date TEXT
);
INSERT INTO users VALUES (1, 'John Doe', 'john@email.com', 30);
INSERT INTO users VALUES (2, 'Jane Smith', 'jane@email.com', 25);
INSERT INTO users VALUES (3, 'Bob Johnson', 'bob@email.com', 35);
INSERT INTO products VALUES (1, 'Laptop', 999.99, 'Electronics');
INSERT INTO products VALUES (2, 'Book', 19.99, 'Education');
INSERT INTO products VALUES (3, 'Headphones', 149.99, 'Electronics');
INSERT INTO orders VALUES (1, 1, 1, 1, '2024-01-15');
INSERT INTO orders VALUES (2, 2, 2, 3, '2024-01-16');
INSERT INTO orders VALUES (3, 1, 3, 2, '2024-01-17');
INSERT INTO orders VALUES (4, 3, 1, 1, '2024-01-18');
";

const NO_STATEMENTS: &str = "No SQL commands found. Use semicolons to separate multiple commands.";

/// Splits on every `;`. Semicolons inside string literals split too; this is
/// a known limitation of the statement separator.
pub fn split_statements(source: &str) -> Vec<&str> {
    source
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Evaluates SQL against a fresh, pre-seeded in-memory SQLite database.
/// No external process is involved.
pub struct SqlPlugin {
    descriptor: LanguageDescriptor,
}

impl SqlPlugin {
    pub fn new(descriptor: LanguageDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl LanguagePlugin for SqlPlugin {
    fn descriptor(&self) -> &LanguageDescriptor {
        &self.descriptor
    }

    async fn compile(
        &self,
        _sandbox: &Sandbox,
        _workspace: &Workspace,
        _source: &SourceFile,
    ) -> Result<CompileOutcome, ExecError> {
        Ok(CompileOutcome::Skipped)
    }

    async fn run(
        &self,
        sandbox: &Sandbox,
        _workspace: &Workspace,
        prepared: &Prepared,
        _stdin: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, ExecError> {
        let code = tokio::fs::read_to_string(&prepared.source.path).await?;
        let conn = open_database(limits.memory_kb)
            .map_err(|err| ExecError::Sandbox(format!("sql store init failed: {err}")))?;
        let interrupt = conn.get_interrupt_handle();
        let cap = sandbox.settings().max_output_bytes;
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || evaluate(&conn, &code, cap));
        let abort = task.abort_handle();
        let (report, timed_out) = match tokio::time::timeout(limits.time_limit, task).await {
            Ok(joined) => (joined.map_err(join_error)?, false),
            Err(_) => {
                interrupt.interrupt();
                abort.abort();
                (SqlReport::default(), true)
            }
        };

        Ok(ExecutionResult {
            stdout: report.stdout,
            stderr: report.stderr,
            exit_code: if timed_out { -1 } else { report.exit_code },
            timed_out,
            truncated: report.truncated,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn join_error(err: tokio::task::JoinError) -> ExecError {
    ExecError::Sandbox(format!("sql evaluation aborted: {err}"))
}

fn open_database(memory_kb: u64) -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    let page_kb: u64 = conn.query_row("PRAGMA page_size", [], |row| row.get::<_, i64>(0))? as u64 / 1024;
    let max_pages = (memory_kb / page_kb.max(1)).max(64);
    conn.execute_batch(&format!("PRAGMA max_page_count = {max_pages};"))?;
    // Page count does not cover values built on the heap, e.g. a huge zeroblob().
    let max_value_bytes = i32::try_from(memory_kb.saturating_mul(1024)).unwrap_or(i32::MAX);
    let _previous = conn.set_limit(Limit::SQLITE_LIMIT_LENGTH, max_value_bytes.max(1 << 20));
    conn.execute_batch(SEED)?;
    Ok(conn)
}

#[derive(Debug, Default)]
struct SqlReport {
    stdout: String,
    stderr: String,
    exit_code: i32,
    truncated: bool,
}

/// Text buffer that refuses to grow past `cap` bytes.
struct CappedText {
    buf: String,
    cap: usize,
    truncated: bool,
}

impl CappedText {
    fn new(cap: usize) -> Self {
        Self {
            buf: String::with_capacity(cap.min(8192)),
            cap,
            truncated: false,
        }
    }

    fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.buf.len())
    }

    fn is_full(&self) -> bool {
        self.truncated
    }

    fn push(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let room = self.remaining();
        if text.len() <= room {
            self.buf.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&text[..cut]);
        self.truncated = true;
    }

    fn push_line(&mut self, line: &str) {
        self.push(line);
        self.push("\n");
    }
}

fn evaluate(conn: &Connection, source: &str, cap: usize) -> SqlReport {
    let statements = split_statements(source);
    if statements.is_empty() {
        let mut out = CappedText::new(cap);
        out.push(NO_STATEMENTS);
        return SqlReport {
            truncated: out.truncated,
            stdout: out.buf,
            stderr: String::new(),
            exit_code: 1,
        };
    }

    let mut out = CappedText::new(cap);
    let mut errors = CappedText::new(cap);
    let mut failed = false;
    for (idx, statement) in statements.iter().enumerate() {
        let n = idx + 1;
        if let Err(err) = run_statement(conn, statement, n, &mut out) {
            failed = true;
            errors.push_line(&format!("Query {n} Error: {err}"));
        }
        // Nothing further can be reported once a stream is full.
        if out.is_full() || errors.is_full() {
            break;
        }
    }

    SqlReport {
        truncated: out.truncated || errors.truncated,
        stdout: out.buf,
        stderr: errors.buf,
        exit_code: if failed { 1 } else { 0 },
    }
}

/// Executes one statement and writes its report lines straight into `out`.
/// Row reading stops as soon as `out` is full.
fn run_statement(
    conn: &Connection,
    sql: &str,
    n: usize,
    out: &mut CappedText,
) -> rusqlite::Result<()> {
    let verb = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() > 0 {
        let header = stmt.column_names().join(" | ");
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;
        // Fetch before printing so a failing query reports only its error.
        let first = match rows.next()? {
            Some(row) => Some(render_row(row, width, out.remaining())?),
            None => None,
        };

        out.push_line(&format!("Query {n} Results:"));
        out.push_line(&header);
        out.push_line(&"-".repeat(header.len() + 10));
        let Some(first) = first else {
            out.push_line("(0 row(s) returned)");
            out.push_line("");
            return Ok(());
        };
        out.push_line(&first);
        let mut count = 1usize;
        while !out.is_full() {
            let Some(row) = rows.next()? else {
                break;
            };
            let line = render_row(row, width, out.remaining())?;
            out.push_line(&line);
            count += 1;
        }
        out.push_line(&format!("({count} row(s) returned)"));
        out.push_line("");
        return Ok(());
    }

    let count = stmt.execute([])?;
    match verb.as_str() {
        "INSERT" | "UPDATE" | "DELETE" => {
            out.push_line(&format!("Query {n}: {verb} completed - {count} row(s) affected"));
        }
        "CREATE" | "ALTER" | "DROP" => {
            out.push_line(&format!("Query {n}: {verb} completed successfully"));
        }
        _ => out.push_line(&format!("Query {n}: Executed successfully")),
    }
    Ok(())
}

/// Renders one row, reading at most about `budget` bytes of text per cell.
fn render_row(row: &Row<'_>, width: usize, budget: usize) -> rusqlite::Result<String> {
    let mut cells = Vec::with_capacity(width);
    for i in 0..width {
        cells.push(render_value(row.get_ref(i)?, budget));
    }
    Ok(cells.join(" | "))
}

fn render_value(value: ValueRef<'_>, budget: usize) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => {
            // One spare byte so an over-long cell still trips truncation.
            let take = bytes.len().min(budget.saturating_add(1));
            String::from_utf8_lossy(&bytes[..take]).into_owned()
        }
        ValueRef::Blob(bytes) => format!("<blob {} bytes>", bytes.len()),
    }
}
