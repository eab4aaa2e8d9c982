//! Run configuration.
//!
//! A [`Config`] is loaded once (TOML, every field optional) and passed by
//! reference into the scanner, classifier, planner, validator and executor.
//!
//! ```toml
//! strategy = "hybrid"
//! conflict_resolution = "rename"
//! ignore_patterns = ["**/.git/**", "*.part"]
//!
//! [classification_rules.Docs]
//! Notes = ["md", "org"]
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classify::{Classification, RuleTable};
use crate::error::{ClassificationError, Error};

/// Name of the per-directory config file, looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".dirsort.toml";

const MIB: u64 = 1024 * 1024;

/// Built-in extension rules: category, subcategory, extensions.
/// When an extension appears twice the first registration wins.
const DEFAULT_RULES: &[(&str, &[(&str, &[&str])])] = &[
    (
        "Docs",
        &[
            ("Word", &["doc", "docx", "odt"]),
            ("PDFs", &["pdf"]),
            ("Text", &["txt", "rtf", "md", "log"]),
            ("Sheets", &["xls", "xlsx", "csv", "ods"]),
            ("Presentations", &["ppt", "pptx", "odp"]),
            ("Ebooks", &["epub", "mobi", "azw", "azw3"]),
        ],
    ),
    (
        "Audio",
        &[
            ("Music", &["mp3", "flac", "ogg", "wav", "wma", "m4a", "aac", "opus"]),
            ("Podcasts", &["m4b"]),
            ("VoiceMemos", &["amr", "3ga"]),
        ],
    ),
    (
        "Pics",
        &[
            (
                "Photos",
                &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "heic", "webp", "avif", "jxl"],
            ),
            ("Vector", &["svg", "ai", "eps"]),
            ("Raw", &["cr2", "nef", "dng", "arw", "raw"]),
            ("Icons", &["ico"]),
        ],
    ),
    (
        "Vids",
        &[
            ("Movies", &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"]),
            ("Clips", &["3gp", "m4v"]),
        ],
    ),
    (
        "Programs",
        &[
            ("Windows", &["exe", "msi", "dll", "bat", "cmd"]),
            ("Mac", &["dmg", "pkg", "app"]),
            ("Linux", &["deb", "rpm", "appimage", "snap"]),
            ("Android", &["apk", "apkm", "xapk"]),
        ],
    ),
    (
        "Code",
        &[
            ("Web", &["html", "htm", "css", "js", "jsx", "ts", "tsx", "vue", "mjs", "wasm"]),
            ("Python", &["py", "pyw", "pyx", "ipynb"]),
            ("C", &["c", "h", "cpp", "hpp", "cc", "cxx"]),
            ("Shell", &["sh", "bash", "zsh", "fish"]),
            ("Java", &["java", "jar", "class"]),
            ("Go", &["go", "mod", "sum"]),
            ("Ruby", &["rb", "rake"]),
            ("PHP", &["php"]),
            ("Rust", &["rs", "toml"]),
            ("Swift", &["swift"]),
            ("Kotlin", &["kt", "kts"]),
            ("Zig", &["zig"]),
        ],
    ),
    (
        "Archives",
        &[
            ("Compressed", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "lz", "lzma"]),
            ("Disk", &["iso", "img"]),
        ],
    ),
    (
        "System",
        &[
            ("Models", &["gguf", "bin", "pt", "pth", "onnx"]),
            ("Libraries", &["so", "dylib"]),
            ("Cabinets", &["cab"]),
            ("Fonts", &["ttf", "otf", "woff", "woff2"]),
        ],
    ),
    (
        "Apps",
        &[
            ("Ableton", &["asd", "alc", "als"]),
            ("SPSS", &["sav", "sps"]),
            ("Gameboy", &["gbc", "gba", "gb"]),
            ("OfficeThemes", &["thmx"]),
            ("Calendar", &["ics"]),
            ("Database", &["db", "sqlite", "sqlite3", "mdb", "accdb"]),
        ],
    ),
    (
        "Web",
        &[
            ("Links", &["url", "webloc"]),
            ("Data", &["json", "xml", "yaml", "yml"]),
        ],
    ),
    (
        "Misc",
        &[
            ("Temporary", &["crdownload", "tmp", "temp", "cache"]),
            ("Generic", &["dat"]),
        ],
    ),
];

/// How files are assigned to a (category, subcategory) destination.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Extension lookup against the rule table.
    #[default]
    Extension,
    /// Modification year / month.
    Date,
    /// Size tiers.
    Size,
    /// Extension lookup, falling back to date buckets for unknown types.
    Hybrid,
}

/// Content hash used for duplicate detection. One per run.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256.
    #[default]
    Strong,
    /// XXH64, non-cryptographic.
    Fast,
}

/// What to do when a destination is already taken.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Append `_N` before the extension.
    #[default]
    Rename,
    /// Leave the source where it is.
    Skip,
    /// Replace the destination (the old file is kept for undo).
    Overwrite,
}

/// One size bucket. Files smaller than `below` bytes land here; the last
/// tier has no bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SizeTier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<u64>,
    pub category: String,
    pub subcategory: String,
}

impl SizeTier {
    fn new(below: Option<u64>, category: &str, subcategory: &str) -> Self {
        Self {
            below,
            category: category.to_string(),
            subcategory: subcategory.to_string(),
        }
    }
}

fn default_size_tiers() -> Vec<SizeTier> {
    vec![
        SizeTier::new(Some(MIB), "Small", "Under1MB"),
        SizeTier::new(Some(10 * MIB), "Small", "1-10MB"),
        SizeTier::new(Some(100 * MIB), "Medium", "10-100MB"),
        SizeTier::new(Some(1000 * MIB), "Medium", "100MB-1GB"),
        SizeTier::new(None, "Large", "Over1GB"),
    ]
}

/// Configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Classification strategy.
    pub strategy: Strategy,
    /// Group files by content hash.
    pub detect_duplicates: bool,
    /// Move non-primary duplicates into the duplicates directory.
    pub isolate_duplicates: bool,
    /// Hash algorithm for content comparison.
    pub hash_algorithm: HashAlgorithm,
    /// Read size when hashing, in bytes.
    pub hash_block_size: usize,
    /// Upper bound on hashing threads (with the `parallel` feature).
    pub max_workers: usize,
    /// Policy applied when a destination already exists.
    pub conflict_resolution: ConflictPolicy,
    /// Glob patterns matched against root-relative paths and file names.
    pub ignore_patterns: Vec<String>,
    /// Skip dot-files and dot-directories.
    pub ignore_hidden: bool,
    /// Include symlinks that resolve inside the root.
    pub follow_symlinks: bool,
    /// Re-hash every moved file and compare.
    pub verify_integrity: bool,
    /// Prefix identifying directories this tool owns.
    pub managed_prefix: String,
    /// Base name of the managed duplicates directory.
    pub duplicates_folder: String,
    /// Base name of the managed directory for relocated folders.
    pub folders_folder: String,
    /// Directory under the root that holds operation logs.
    pub log_directory: String,
    /// Overrides merged over the built-in rules: category -> subcategory -> extensions.
    pub classification_rules: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Buckets for the size strategy, ascending.
    pub size_tiers: Vec<SizeTier>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            detect_duplicates: true,
            isolate_duplicates: true,
            hash_algorithm: HashAlgorithm::default(),
            hash_block_size: 64 * 1024,
            max_workers: 4,
            conflict_resolution: ConflictPolicy::default(),
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/__pycache__/**".to_string(),
            ],
            ignore_hidden: true,
            follow_symlinks: false,
            verify_integrity: false,
            managed_prefix: "all_".to_string(),
            duplicates_folder: "Duplicates".to_string(),
            folders_folder: "Folders".to_string(),
            log_directory: ".dirsort".to_string(),
            classification_rules: BTreeMap::new(),
            size_tiers: default_size_tiers(),
        }
    }
}

impl Config {
    /// Load configuration, trying in order: `path`, `./.dirsort.toml`,
    /// `$HOME/.config/dirsort/config.toml`, built-in defaults.
    ///
    /// An explicitly given path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        if let Some(user) = user_config_path()
            && user.exists()
        {
            return Self::load_from_file(&user);
        }

        Ok(Self::default())
    }

    /// Parse a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the configuration atomically to `path`.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = self
            .to_toml()
            .map_err(|e| Error::Config(format!("cannot encode configuration: {}", e)))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, text.as_bytes())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Flatten built-in rules and overrides into one lookup table.
    ///
    /// Fails on malformed rules or size tiers, before any planning happens.
    pub fn rule_table(&self) -> Result<RuleTable, ClassificationError> {
        self.check_size_tiers()?;

        let mut table = RuleTable::default();
        for (category, subcategories) in DEFAULT_RULES {
            for (subcategory, extensions) in *subcategories {
                for ext in *extensions {
                    table.insert_default(ext, Classification::new(*category, *subcategory));
                }
            }
        }

        for (category, subcategories) in &self.classification_rules {
            check_name(category)?;
            for (subcategory, extensions) in subcategories {
                check_name(subcategory)?;
                for ext in extensions {
                    let normalized = normalize_extension(ext).ok_or_else(|| {
                        ClassificationError::InvalidExtension {
                            category: category.clone(),
                            subcategory: subcategory.clone(),
                            extension: ext.clone(),
                        }
                    })?;
                    table.insert_override(&normalized, Classification::new(category, subcategory));
                }
            }
        }
        Ok(table)
    }

    fn check_size_tiers(&self) -> Result<(), ClassificationError> {
        let Some((last, bounded)) = self.size_tiers.split_last() else {
            return Err(ClassificationError::InvalidSizeTiers("no tiers".into()));
        };
        let mut previous = 0u64;
        for tier in bounded {
            check_name(&tier.category)?;
            check_name(&tier.subcategory)?;
            match tier.below {
                Some(below) if below > previous => previous = below,
                Some(below) => {
                    return Err(ClassificationError::InvalidSizeTiers(format!(
                        "{} is not above {}",
                        below, previous
                    )));
                }
                None => {
                    return Err(ClassificationError::InvalidSizeTiers(format!(
                        "only the last tier may be unbounded ({}/{})",
                        tier.category, tier.subcategory
                    )));
                }
            }
        }
        check_name(&last.category)?;
        check_name(&last.subcategory)?;
        if let Some(below) = last.below
            && below <= previous
        {
            return Err(ClassificationError::InvalidSizeTiers(format!(
                "{} is not above {}",
                below, previous
            )));
        }
        Ok(())
    }

    /// `base` with the managed prefix.
    pub fn managed_name(&self, base: &str) -> String {
        format!("{}{}", self.managed_prefix, base)
    }

    /// Whether a directory name marks a managed directory.
    pub fn is_managed_name(&self, name: &str) -> bool {
        !self.managed_prefix.is_empty() && name.starts_with(&self.managed_prefix)
    }

    pub fn duplicates_dir_name(&self) -> String {
        self.managed_name(&self.duplicates_folder)
    }

    pub fn folders_dir_name(&self) -> String {
        self.managed_name(&self.folders_folder)
    }
}

/// JSON Schema of the configuration file.
pub fn generate_schema() -> serde_json::Result<String> {
    let schema = schemars::schema_for!(Config);
    serde_json::to_string_pretty(&schema)
}

fn user_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("dirsort")
            .join("config.toml"),
    )
}

fn check_name(name: &str) -> Result<(), ClassificationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ClassificationError::EmptyName);
    }
    if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        return Err(ClassificationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Lowercase, strip one leading dot. `None` if nothing usable remains.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim();
    let bare = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if bare.is_empty() || bare.contains(['/', '\\']) || bare.chars().any(char::is_whitespace) {
        return None;
    }
    Some(bare.to_lowercase())
}
