use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Scanner for the files that participate in a source fingerprint.
pub struct SourceScanner {
    root: PathBuf,
}

impl SourceScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Scan the source root for files worth signing (.gitignore aware).
    ///
    /// The result is sorted so callers can hash it deterministically.
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true) // hidden files never feed the fingerprint
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !SourceScanner::is_ignored_scope(entry.path(), &root));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > MAX_FILE_SIZE_BYTES {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                MAX_FILE_SIZE_BYTES
                            );
                            continue;
                        }
                    }

                    if !Self::is_source_file(path) {
                        continue;
                    }

                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        log::debug!("Found {} source files", files.len());
        files
    }

    /// Check if the file participates in the fingerprint.
    fn is_source_file(path: &Path) -> bool {
        if let Some(file_name) = path.file_name().and_then(|name| name.to_str()) {
            if matches!(
                file_name,
                "Dockerfile" | "docker-compose.yml" | "Makefile" | "makefile" | "Justfile"
            ) {
                return true;
            }
        }

        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            let ext = ext.to_lowercase();
            return SUPPORTED_EXTENSIONS
                .iter()
                .any(|candidate| candidate == &ext);
        }

        false
    }

    #[must_use]
    pub fn is_ignored_scope(path: &Path, root: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            for component in relative.components() {
                if let std::path::Component::Normal(name) = component {
                    let lowered = name.to_string_lossy().to_lowercase();
                    if IGNORED_SCOPES.iter().any(|ignored| ignored == &lowered) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

pub const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    // our own state
    ".rightsizer",
    // caches / builds
    ".cache",
    "node_modules",
    "build",
    "dist",
    "coverage",
    "logs",
    "tmp",
    "target",
    ".terraform",
    ".venv",
    // data / vendor
    "datasets",
    "vendor",
    "third_party",
    "third-party",
    "__pycache__",
];

const MAX_FILE_SIZE_BYTES: u64 = 1_048_576; // 1 MB

/// Code + config + infra files; anything else is noise for resource estimation.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    // General purpose languages
    "rs", "py", "pyw", "js", "mjs", "cjs", "ts", "tsx", "jsx", "java", "kt", "go", "c", "h",
    "cpp", "cc", "hpp", "cs", "rb", "swift", "php", "scala", "ex", "exs", "lua",
    // Scripts
    "sh", "bash", "zsh", "ps1",
    // Config / data / infra
    "yaml", "yml", "json", "toml", "ini", "cfg", "conf", "properties", "env", "gradle", "xml",
    "sql", "tf", "tfvars", "hcl", "dockerfile", "proto",
    // Docs that commonly carry deployment hints
    "md", "txt",
];
