//! Scripted backends that record every launch in a marker file

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Helper for writing backend scripts and reading back what they recorded
#[derive(Clone)]
pub struct MarkerFileHelper {
    base_dir: PathBuf,
}

impl MarkerFileHelper {
    /// Create a new marker file helper with the given base directory
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Get the path to a marker file
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.marker", name))
    }

    /// Write an executable script that appends `<port arg> <pid>` to the
    /// `name` marker and then becomes a long-running `sleep`.
    ///
    /// Because the script execs, the recorded pid is the pid the
    /// supervisor signals.
    pub fn write_backend_script(&self, name: &str) -> std::io::Result<PathBuf> {
        let script = self.base_dir.join(format!("{}.sh", name));
        let body = format!(
            "#!/bin/sh\necho \"$1 $$\" >> {}\nexec sleep 300\n",
            self.marker_path(name).display()
        );
        std::fs::write(&script, body)?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        Ok(script)
    }

    /// Write an executable script that records its launch and exits at once
    pub fn write_exiting_script(&self, name: &str, code: i32) -> std::io::Result<PathBuf> {
        let script = self.base_dir.join(format!("{}.sh", name));
        let body = format!(
            "#!/bin/sh\necho \"$1 $$\" >> {}\nexit {}\n",
            self.marker_path(name).display(),
            code
        );
        std::fs::write(&script, body)?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        Ok(script)
    }

    /// Check if a marker file exists
    pub fn marker_exists(&self, name: &str) -> bool {
        self.marker_path(name).exists()
    }

    /// Count the number of lines in a marker file (one per launch)
    pub fn count_marker_lines(&self, name: &str) -> usize {
        std::fs::read_to_string(self.marker_path(name))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Parse the `(port argument, pid)` pairs recorded so far
    pub fn launches(&self, name: &str) -> Vec<(String, u32)> {
        let Ok(content) = std::fs::read_to_string(self.marker_path(name)) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| {
                let (arg, pid) = line.rsplit_once(' ')?;
                Some((arg.to_string(), pid.trim().parse().ok()?))
            })
            .collect()
    }

    /// Wait until the marker file has at least the specified number of lines
    pub async fn wait_for_marker_lines(
        &self,
        name: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.count_marker_lines(name) >= expected_lines {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }
}

#[cfg(test)]
mod tests;
