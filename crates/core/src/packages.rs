//! Dependency specifier line validation.
//!
//! Dependency lists are newline-delimited specifiers (`requests>=2.31`,
//! `pandas[excel]==2.2.0`). Lines are screened for shell metacharacters and
//! obviously malformed names before anything is handed to the external
//! resolver; resolvability itself is the resolver's job.

/// Characters that must never appear in a specifier handed to a subprocess.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$'];

/// Outcome of screening a dependency list.
#[derive(Debug, Clone, Default)]
pub struct PackageLineReport {
    /// Specifiers that passed the format screen, in source order.
    pub valid: Vec<String>,
    /// Rejected lines, each annotated with the reason.
    pub invalid: Vec<String>,
}

impl PackageLineReport {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Screen a newline-delimited dependency list.
///
/// Blank lines and `#` comments are skipped. A specifier is rejected when it
/// contains shell metacharacters or when the package name portion (the text
/// before any extras bracket or version operator) does not start with an
/// alphanumeric character.
pub fn validate_package_lines(text: &str) -> PackageLineReport {
    let mut report = PackageLineReport::default();

    for line in text.lines() {
        let spec = line.trim();
        if spec.is_empty() || spec.starts_with('#') {
            continue;
        }

        if spec.contains(SHELL_METACHARACTERS) {
            report
                .invalid
                .push(format!("{spec} (contains shell characters)"));
            continue;
        }

        let name = spec
            .split(['[', '=', '>', '<', '!'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            report.invalid.push(format!("{spec} (invalid package name)"));
            continue;
        }

        report.valid.push(spec.to_string());
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::validate_package_lines;

    #[test]
    fn accepts_plain_and_versioned_specifiers() {
        let report = validate_package_lines("requests\npandas>=2.0\nnumpy==1.26.4");
        assert!(report.is_valid());
        assert_eq!(report.valid, vec!["requests", "pandas>=2.0", "numpy==1.26.4"]);
    }

    #[test]
    fn accepts_extras_brackets() {
        let report = validate_package_lines("uvicorn[standard]==0.30.0");
        assert!(report.is_valid());
    }

    #[test]
    fn skips_blanks_and_comments() {
        let report = validate_package_lines("\n# data stack\nrequests\n\n");
        assert!(report.is_valid());
        assert_eq!(report.valid, vec!["requests"]);
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let report = validate_package_lines("requests; rm -rf /\nhttpx");
        assert!(!report.is_valid());
        assert_eq!(report.valid, vec!["httpx"]);
        assert!(report.invalid[0].contains("shell characters"));
    }

    #[test]
    fn rejects_names_not_starting_alphanumeric() {
        let report = validate_package_lines("-requests\n==1.0");
        assert!(!report.is_valid());
        assert_eq!(report.invalid.len(), 2);
        assert!(report.invalid.iter().all(|r| r.contains("invalid package name")));
    }

    #[test]
    fn empty_list_is_valid_and_empty() {
        let report = validate_package_lines("");
        assert!(report.is_valid());
        assert!(report.valid.is_empty());
    }
}
