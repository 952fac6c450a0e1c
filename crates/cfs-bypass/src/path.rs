//! Lexical path cleaning and remote-vs-local classification.
//!
//! Classification is purely lexical: no symlink resolution, no filesystem
//! access at all. Resolving symlinks would require stat calls that are
//! themselves intercepted, and classification runs on every intercepted
//! call, so it must not depend on previously-classified I/O.

/// Routing decision for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClass {
    /// Outside the mount scope; the call goes to libc untouched.
    Local,
    /// Inside the mount scope; carries the mount-stripped remote path.
    Remote(String),
}

/// Shortest lexically-equivalent form of `path`.
///
/// Collapses repeated separators, drops `.` elements, and resolves `..`
/// against the elements already written. A rooted path never resolves `..`
/// above the root; a relative path keeps unresolvable leading `..` elements
/// literally. An empty result becomes `.`. The result never ends in a
/// separator unless it is exactly `/`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut kept: Vec<&str> = Vec::new();
    // Number of leading ".." elements kept so far; backtracking stops there.
    let mut dotdot = 0;

    for elem in path.split('/') {
        match elem {
            "" | "." => {}
            ".." => {
                if kept.len() > dotdot {
                    kept.pop();
                } else if !rooted {
                    kept.push("..");
                    dotdot = kept.len();
                }
            }
            e => kept.push(e),
        }
    }

    let mut out = String::with_capacity(path.len());
    if rooted {
        out.push('/');
    }
    out.push_str(&kept.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// The subtree redirected to the remote filesystem.
///
/// Built once at startup from the `mountPoint` / `ignorePath` configuration
/// and immutable afterwards.
#[derive(Debug, Clone)]
pub struct MountScope {
    mount_point: String,
    ignore: Vec<String>,
}

impl MountScope {
    pub fn new(mount_point: &str, ignore_path: &str) -> Self {
        Self {
            // Cleaning strips any trailing separator.
            mount_point: clean(mount_point),
            ignore: ignore_path
                .split(',')
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The configured mount point, trailing separator stripped.
    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// Classify `path`. For a relative path, `remote_cwd` is the
    /// mount-stripped working directory when the process currently sits
    /// inside the scope, `None` otherwise; a relative path outside the scope
    /// is local by definition.
    pub fn classify(&self, path: &str, remote_cwd: Option<&str>) -> PathClass {
        if !path.starts_with('/') {
            return match remote_cwd {
                // Rebuild the absolute form so `..` can escape the scope and
                // ignore entries apply exactly as they would to it.
                Some(cwd) => self.classify_absolute(&self.rejoin(cwd, path)),
                None => PathClass::Local,
            };
        }
        self.classify_absolute(path)
    }

    fn rejoin(&self, remote_cwd: &str, relative: &str) -> String {
        if remote_cwd == "/" {
            format!("{}/{}", self.mount_point, relative)
        } else {
            format!("{}{}/{}", self.mount_point, remote_cwd, relative)
        }
    }

    fn classify_absolute(&self, path: &str) -> PathClass {
        let cleaned = clean(path);

        let rest = match cleaned.strip_prefix(&self.mount_point) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return PathClass::Local,
        };

        // An ignore entry excludes the subtree rooted immediately under the
        // mount point: it must match whole path elements from the front of
        // the remainder.
        for entry in &self.ignore {
            if let Some(tail) = rest.strip_prefix('/').and_then(|r| r.strip_prefix(entry.as_str())) {
                if tail.is_empty() || tail.starts_with('/') {
                    return PathClass::Local;
                }
            }
        }

        if rest.is_empty() {
            PathClass::Remote("/".to_string())
        } else {
            PathClass::Remote(rest.to_string())
        }
    }
}
