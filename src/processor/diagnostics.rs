use tracing::debug;

use crate::model::{Issue, Severity};

/// Ordered issue list with a cap on the number of warnings kept.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    issues: Vec<Issue>,
    max_warnings: usize,
    warnings: usize,
    suppressed: u64,
}

impl Diagnostics {
    pub fn new(max_warnings: usize) -> Self {
        Self {
            issues: Vec::new(),
            max_warnings,
            warnings: 0,
            suppressed: 0,
        }
    }

    /// Records an issue. Warnings beyond the cap are counted, not kept;
    /// infos and errors are always kept.
    pub fn push(&mut self, issue: Issue) {
        if issue.severity == Severity::Warning {
            if self.warnings >= self.max_warnings {
                self.suppressed += 1;
                debug!(code = %issue.code, "warning suppressed");
                return;
            }
            self.warnings += 1;
        }
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }
}

impl Extend<Issue> for Diagnostics {
    fn extend<I: IntoIterator<Item = Issue>>(&mut self, iter: I) {
        for issue in iter {
            self.push(issue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_cap() {
        let mut diagnostics = Diagnostics::new(2);
        diagnostics.extend([
            Issue::warning("a", "first"),
            Issue::info("b", "kept"),
            Issue::warning("c", "second"),
            Issue::warning("d", "dropped"),
            Issue::error("e", "kept"),
        ]);
        let codes: Vec<&str> = diagnostics.issues().iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["a", "b", "c", "e"]);
        assert_eq!(diagnostics.suppressed(), 1);
    }
}
