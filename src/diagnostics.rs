use serde::Deserialize;

/// Severity of a toolchain diagnostic. Notes and help lines are dropped at
/// parse time; only errors and warnings are surfaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Error,
    Warning,
}

/// One structured compiler diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Originating file, taken from the diagnostic's primary span if any.
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }
}

#[derive(Deserialize)]
struct RawDiagnostic {
    message: String,
    level: String,
    #[serde(default)]
    spans: Vec<RawSpan>,
}

#[derive(Deserialize)]
struct RawSpan {
    file_name: String,
    line_start: u32,
    #[serde(default)]
    is_primary: bool,
}

/// Parse rustc's `--error-format json` stderr stream, one JSON object per
/// line. Lines that are not diagnostics (artifact notifications, future
/// incompat reports, plain text) are skipped.
pub(crate) fn parse_rustc_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for line in stderr.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(raw) = serde_json::from_str::<RawDiagnostic>(line) else {
            continue;
        };
        let severity = if raw.level.starts_with("error") {
            Severity::Error
        } else if raw.level == "warning" {
            Severity::Warning
        } else {
            continue;
        };
        let primary = raw
            .spans
            .iter()
            .find(|s| s.is_primary)
            .or_else(|| raw.spans.first());
        out.push(Diagnostic {
            severity,
            message: raw.message,
            file: primary.map(|s| s.file_name.clone()),
            line: primary.map(|s| s.line_start),
        });
    }
    out
}
