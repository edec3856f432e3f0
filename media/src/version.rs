use std::fmt;

/// Version details printed by the command line tools for `--version`.
pub struct VersionBanner<'a> {
    pub tool_name: &'a str,
    pub version: &'a str,
    /// Git tag of the build, empty for untagged builds.
    pub release: &'a str,
    pub commit: &'a str,
}

impl fmt::Display for VersionBanner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.tool_name)?;
        writeln!(f, "License: GNU AGPL v3 (AGPL-3.0-only)")?;
        writeln!(f)?;
        writeln!(f, "\tVersion:     {}", self.version)?;
        if !self.release.is_empty() {
            writeln!(f, "\tGit tag:     {}", self.release)?;
        }
        if !self.commit.is_empty() {
            writeln!(f, "\tGit commit:  {}", self.commit)?;
        }
        Ok(())
    }
}

pub fn print_cli_version_banner(tool_name: &str, version: &str, release: &str, commit: &str) {
    print!(
        "{}",
        VersionBanner {
            tool_name,
            version,
            release,
            commit,
        }
    );
}
