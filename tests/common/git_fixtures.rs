//! Git repository test fixtures
//!
//! Provides temporary git repositories in various states for exercising
//! auto-commit and snapshot recording.

#![allow(dead_code)] // Not every integration module uses every helper

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use walkdir::WalkDir;

/// A temporary git repository for testing
///
/// The repository is removed when the `TestRepo` is dropped. Sealed
/// (read-only) snapshot directories inside it are made writable first so
/// removal succeeds.
///
/// # Example
/// ```ignore
/// let repo = TestRepo::new();
/// assert!(repo.path.join(".git").exists());
/// ```
pub struct TestRepo {
    /// TempDir handle (keeps directory alive until dropped)
    _dir: TempDir,
    /// Path to the repository root
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit
    ///
    /// The repository will have:
    /// - Git initialized
    /// - User configured (test@example.com)
    /// - GPG signing disabled (for CI compatibility)
    /// - A README.md file
    /// - One initial commit
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().to_path_buf();

        Self::git(&path, &["init"]);
        Self::git(&path, &["config", "user.email", "test@example.com"]);
        Self::git(&path, &["config", "user.name", "Test User"]);
        // Global signing config would otherwise break commits
        Self::git(&path, &["config", "commit.gpgsign", "false"]);

        std::fs::write(path.join("README.md"), "# Test Repository\n").unwrap();
        Self::git(&path, &["add", "."]);
        Self::git(&path, &["commit", "-m", "Initial commit"]);

        Self { _dir: dir, path }
    }

    /// Create a repository with one untracked file (`dirty.txt`)
    pub fn with_uncommitted_changes() -> Self {
        let repo = Self::new();
        std::fs::write(repo.path.join("dirty.txt"), "uncommitted content").unwrap();
        repo
    }

    /// Create a repository with extra branches pointing at the initial commit
    pub fn with_branches(branch_names: &[&str]) -> Self {
        let repo = Self::new();
        for branch in branch_names {
            Self::git(&repo.path, &["branch", branch]);
        }
        repo
    }

    /// Add a file and commit it
    pub fn commit_file(&self, filename: &str, content: &str, message: &str) {
        self.create_file(filename, content);
        Self::git(&self.path, &["add", filename]);
        Self::git(&self.path, &["commit", "-m", message]);
    }

    /// Create a file without staging or committing
    /// Creates parent directories if they don't exist.
    pub fn create_file(&self, filename: &str, content: &str) -> PathBuf {
        let file_path = self.path.join(filename);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file_path, content).unwrap();
        file_path
    }

    /// Checkout a branch
    pub fn checkout(&self, branch: &str) {
        Self::git(&self.path, &["checkout", branch]);
    }

    /// Get current branch name
    pub fn current_branch(&self) -> String {
        self.git_output(&["branch", "--show-current"])
            .trim()
            .to_string()
    }

    /// Check if the repository has uncommitted changes
    pub fn is_dirty(&self) -> bool {
        !self.git_output(&["status", "--porcelain"]).trim().is_empty()
    }

    /// Get list of all branches
    pub fn branches(&self) -> Vec<String> {
        self.git_output(&["branch", "--list", "--format=%(refname:short)"])
            .lines()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get the HEAD commit SHA
    pub fn head_sha(&self) -> String {
        self.git_output(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// SHA a branch points at
    pub fn branch_sha(&self, branch: &str) -> String {
        self.git_output(&["rev-parse", branch]).trim().to_string()
    }

    /// Subject line of the HEAD commit
    pub fn last_commit_message(&self) -> String {
        self.git_output(&["log", "-1", "--format=%s"])
            .trim()
            .to_string()
    }

    /// Number of commits reachable from HEAD
    pub fn commit_count(&self) -> usize {
        self.git_output(&["rev-list", "--count", "HEAD"])
            .trim()
            .parse()
            .unwrap()
    }

    /// Execute a git command in the repository
    fn git(path: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .unwrap_or_else(|e| panic!("Git command failed to execute: {}", e));

        if !output.status.success() {
            panic!(
                "Git command failed: git {}\nstderr: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }
    }

    /// Execute a git command and return output (for queries)
    pub fn git_output(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .expect("Git command failed");

        if !output.status.success() {
            panic!(
                "Git command failed: git {}\nstderr: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        String::from_utf8_lossy(&output.stdout).to_string()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestRepo {
    fn drop(&mut self) {
        make_writable(&self.path);
    }
}

/// Restore write permission below `path` so sealed snapshots can be deleted
pub fn make_writable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in WalkDir::new(path).into_iter().flatten() {
            let mode = if entry.file_type().is_dir() { 0o755 } else { 0o644 };
            if let Err(e) =
                std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))
            {
                eprintln!(
                    "Warning: failed to restore permissions on {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        for entry in WalkDir::new(path).into_iter().flatten() {
            if let Ok(metadata) = entry.metadata() {
                let mut permissions = metadata.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), permissions);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_creation() {
        let repo = TestRepo::new();
        assert!(repo.path.join(".git").exists());
        assert!(repo.path.join("README.md").exists());
        assert_eq!(repo.commit_count(), 1);
    }

    #[test]
    fn test_repo_with_uncommitted() {
        let repo = TestRepo::with_uncommitted_changes();
        assert!(repo.is_dirty());
    }

    #[test]
    fn test_commit_file() {
        let repo = TestRepo::new();
        let initial_sha = repo.head_sha();

        repo.commit_file("test.txt", "test content", "Add test file");

        assert_ne!(initial_sha, repo.head_sha());
        assert_eq!(repo.last_commit_message(), "Add test file");
        assert!(!repo.is_dirty());
    }

    #[test]
    fn test_create_file_with_nested_path() {
        let repo = TestRepo::new();
        let path = repo.create_file("src/nested/file.py", "print(1)");
        assert!(path.exists());
        assert!(repo.is_dirty());
    }

    #[test]
    fn test_branch_sha() {
        let repo = TestRepo::with_branches(&["develop"]);
        assert_eq!(repo.branch_sha("develop"), repo.head_sha());
        assert!(repo.branches().iter().any(|b| b == "develop"));
    }
}
