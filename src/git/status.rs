//! Working-tree status parsing for `git status --porcelain`

/// One line of `git status --porcelain` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitStatusEntry {
    /// Two-character XY status flag (e.g. `" M"`, `"??"`, `"A "`)
    pub flag: String,
    /// Path relative to the repository root (destination path for renames)
    pub path: String,
}

impl GitStatusEntry {
    /// Whether the entry is an untracked file
    pub fn is_untracked(&self) -> bool {
        self.flag == "??"
    }

    /// Whether the entry has changes staged in the index
    pub fn is_staged(&self) -> bool {
        matches!(self.flag.chars().next(), Some(c) if c != ' ' && c != '?')
    }

    /// Parse porcelain v1 output into status entries
    /// Format: "XY path" or "XY orig -> dest" for renames
    pub fn parse_porcelain(output: &str) -> Vec<Self> {
        output
            .lines()
            .filter_map(|line| {
                if line.len() < 4 {
                    return None;
                }
                let (flag, rest) = line.split_at(2);
                let rest = rest.strip_prefix(' ')?;
                let path = match rest.split_once(" -> ") {
                    Some((_, dest)) => dest,
                    None => rest,
                };
                Some(Self {
                    flag: flag.to_string(),
                    path: unquote_path(path),
                })
            })
            .collect()
    }
}

/// Porcelain output quotes paths containing special characters
fn unquote_path(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .map(|p| p.replace("\\\"", "\"").replace("\\\\", "\\"))
        .unwrap_or_else(|| path.to_string())
}
