//! GET handling: interpret `action` query parameters and compose a text body.

use crate::codec::{self, render_str};
use crate::storage::StorageBackend;
use tracing::{debug, info, warn};

/// Columns emitted by `dumpcsv`, in order.
pub const CSV_FIELDNAMES: [&str; 5] = ["received", "name", "email", "affiliation", "platform"];

/// Query parameter holding the requested actions.
pub const ACTION_PARAM: &str = "action";

/// A query parameter value: one occurrence or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    /// All values in query-string order
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(v) => vec![v.as_str()],
            Self::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Single(v) => render_str(v),
            Self::Multi(vs) => {
                let items: Vec<String> = vs.iter().map(|v| render_str(v)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    fn push(&mut self, value: String) {
        match self {
            Self::Single(first) => {
                *self = Self::Multi(vec![std::mem::take(first), value]);
            }
            Self::Multi(vs) => vs.push(value),
        }
    }
}

/// Query parameters in first-seen order. Repeated names fold into
/// [`QueryValue::Multi`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, QueryValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one `name=value` occurrence
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => existing.push(value),
            None => self.entries.push((name, QueryValue::Single(value))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Requested actions in order; empty when no `action` parameter was given
    pub fn actions(&self) -> Vec<&str> {
        self.get(ACTION_PARAM).map(QueryValue::values).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.append(name, value);
        }
        params
    }
}

/// Recognized GET actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Every storage key, one per line
    List,
    /// Every record as text, one per line
    Dump,
    /// CSV header then every record flattened
    DumpCsv,
    /// Diagnostic no-op
    Nop,
    /// Diagnostic marker, never touches storage
    Evil,
    Unrecognized,
}

impl Action {
    pub fn parse(name: &str) -> Self {
        match name {
            "list" => Self::List,
            "dump" => Self::Dump,
            "dumpcsv" => Self::DumpCsv,
            "nop" => Self::Nop,
            "evil" => Self::Evil,
            _ => Self::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Dump => "dump",
            Self::DumpCsv => "dumpcsv",
            Self::Nop => "nop",
            Self::Evil => "evil",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpFlavor {
    Text,
    Csv,
}

/// Runs GET actions against a storage backend
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionDispatcher;

impl ActionDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Compose the response body for one GET request.
    ///
    /// Every parameter is echoed first as a `name: value` line. When an
    /// `action` parameter is present, a blank line follows the echo and each
    /// action's block is emitted in order, separated by a blank line.
    /// Per-record read failures are rendered inline and never abort the
    /// response.
    pub async fn handle(&self, params: &QueryParams, storage: &dyn StorageBackend) -> String {
        let mut lines: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{name}: {}", value.render()))
            .collect();

        let actions = params.actions();
        if actions.is_empty() {
            debug!(params = lines.len(), "No actions requested");
            return lines.join("\n");
        }

        info!(actions = ?actions, backend = storage.name(), "Running GET actions");

        for name in &actions {
            lines.push(String::new());

            let action = Action::parse(name);
            metrics::counter!("receiver.get.actions", "action" => action.as_str()).increment(1);
            lines.extend(self.run(action, storage).await);
        }

        lines.join("\n")
    }

    async fn run(&self, action: Action, storage: &dyn StorageBackend) -> Vec<String> {
        match action {
            Action::List => list(storage).await,
            Action::Dump => dump(storage, DumpFlavor::Text).await,
            Action::DumpCsv => dump(storage, DumpFlavor::Csv).await,
            Action::Nop => vec!["nop".to_string()],
            Action::Evil => vec!["evil".to_string()],
            Action::Unrecognized => vec!["unrecognized action".to_string()],
        }
    }
}

async fn list(storage: &dyn StorageBackend) -> Vec<String> {
    match storage.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Listing records failed");
            vec![format!("error listing records: {e}")]
        }
    }
}

async fn dump(storage: &dyn StorageBackend, flavor: DumpFlavor) -> Vec<String> {
    let mut lines = Vec::new();
    if flavor == DumpFlavor::Csv {
        lines.push(CSV_FIELDNAMES.join(","));
    }

    let keys = match storage.list_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Listing records failed");
            lines.push(format!("error listing records: {e}"));
            return lines;
        }
    };

    for key in keys {
        let line = match storage.read(&key).await {
            Ok(record) => match flavor {
                DumpFlavor::Text => codec::encode_text(&record),
                DumpFlavor::Csv => codec::encode_csv_row(&record, &CSV_FIELDNAMES),
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping unreadable record");
                format!("error reading {key}: {e}")
            }
        };
        lines.push(line);
    }

    lines
}
