//! Interop symbol patcher.
//!
//! Post-processes the machine-generated C# bindings so that they work both on
//! platforms that link the native library statically and on platforms that
//! load it dynamically.
//!
//! The patch runs as two phases over every source file below the interop root:
//!
//! 1. A per-file pure rewrite ([`InteropPatcher::rewrite_imports`] and
//!    [`InteropPatcher::annotate_callbacks`]) wraps every dynamic import in a
//!    platform conditional and marks callback-shaped functions.
//! 2. An immutable [`EntryPointTable`] is collected from the rewritten files
//!    and handed to [`InteropPatcher::canonicalize`], which rewrites bare
//!    references to their qualified entry-point names.
//!
//! Only files whose content changed are written back, with LF line endings.
//! Running the patcher on its own output changes nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::types::BuildError;

/// Static-linkage condition used when none is configured.
pub const DEFAULT_STATIC_CONDITION: &str = "(UNITY_IPHONE || UNITY_XBOX360) && !UNITY_EDITOR";

/// Pseudo-library resolving symbols inside the current process.
pub const DEFAULT_SENTINEL_LIBRARY: &str = "__Internal";

/// Namespace prefix of qualified entry points.
pub const DEFAULT_ENTRY_POINT_PREFIX: &str = "CSharp_";

const IMPORT_ATTRIBUTE: &str = r"\[global::System\.Runtime\.InteropServices\.DllImport";

/// Settings for one patch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteropOptions {
    /// Directory holding the generated bindings.
    pub root: PathBuf,
    /// Prefix every qualified entry point starts with.
    pub prefix: String,
    /// Library name imported from on statically linked platforms.
    pub sentinel_library: String,
    /// Preprocessor condition selecting statically linked platforms.
    pub static_condition: String,
    /// File extensions (without dot, case-insensitive) that are patched.
    pub extensions: Vec<String>,
    /// Whole-word renames applied after canonicalization, `(from, to)`.
    pub renames: Vec<(String, String)>,
}

impl InteropOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: DEFAULT_ENTRY_POINT_PREFIX.to_string(),
            sentinel_library: DEFAULT_SENTINEL_LIBRARY.to_string(),
            static_condition: DEFAULT_STATIC_CONDITION.to_string(),
            extensions: vec!["cs".to_string()],
            renames: Vec::new(),
        }
    }
}

/// Qualified entry points keyed by their bare (unprefixed) name.
///
/// Built once from a read-only scan and never mutated afterwards; only names
/// present in the table are ever rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPointTable {
    entries: BTreeMap<String, String>,
}

impl EntryPointTable {
    /// Collects every prefixed entry point declared in `sources`.
    pub fn collect<'a, I>(sources: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = BTreeMap::new();
        for source in sources {
            for caps in declaration_pattern().captures_iter(source) {
                let qualified = &caps["entry"];
                if let Some(bare) = qualified.strip_prefix(prefix)
                    && !bare.is_empty()
                {
                    entries.insert(bare.to_string(), qualified.to_string());
                }
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Qualified name for `bare`, if it is a known entry point.
    pub fn qualified(&self, bare: &str) -> Option<&str> {
        self.entries.get(bare).map(String::as_str)
    }

    pub fn bare_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Word-bounded pattern matching any bare name, `None` for an empty table.
    fn pattern(&self) -> Result<Option<Regex>, BuildError> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let alternatives: Vec<String> = self.entries.keys().map(|name| regex::escape(name)).collect();
        let regex = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .size_limit(256 * 1024 * 1024)
            .dfa_size_limit(64 * 1024 * 1024)
            .build()?;
        Ok(Some(regex))
    }
}

/// Outcome of [`InteropPatcher::patch_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    /// Number of source files examined.
    pub scanned: usize,
    /// Files whose content changed (written unless running dry).
    pub changed: Vec<PathBuf>,
    /// Number of qualified entry points found.
    pub entry_points: usize,
}

fn declaration_pattern() -> &'static Regex {
    static DECL: OnceLock<Regex> = OnceLock::new();
    DECL.get_or_init(|| {
        Regex::new(&format!(
            r#"{}\("(?P<lib>[^"]+)", EntryPoint="(?P<entry>[^"]+)"\)\]"#,
            IMPORT_ATTRIBUTE
        ))
        .expect("import declaration pattern is valid")
    })
}

fn callback_pattern() -> &'static Regex {
    static CALLBACK: OnceLock<Regex> = OnceLock::new();
    CALLBACK.get_or_init(|| {
        Regex::new(
            r"(?m)^(?P<indent>[ \t]*)(?P<existing>\[AOT\.MonoPInvokeCallback \(typeof \(\w+\)\)\][ \t]*\n[ \t]*)?(?P<decl>(?:(?:public|internal|private|protected)\s+)?static\s+(?P<ret>void|string)\s+(?P<name>\w+))",
        )
        .expect("callback pattern is valid")
    })
}

/// Delegate type a native callback registration expects for `name`.
///
/// Argument-exception setters take an extra parameter name; the generic
/// exception setters exclude both the argument variants and the unnamed
/// default; the string constructor gets the string delegate.
pub fn callback_delegate(return_type: &str, name: &str) -> Option<&'static str> {
    match return_type {
        "void" => {
            let middle = name.strip_prefix("SetPending")?.strip_suffix("Exception")?;
            match middle {
                "Argument" | "ArgumentNull" | "ArgumentOutOfRange" => Some("ExceptionArgumentDelegate"),
                "" => None,
                m if m.starts_with("Argument") => None,
                _ => Some("ExceptionDelegate"),
            }
        }
        "string" if name == "CreateString" => Some("SWIGStringDelegate"),
        _ => None,
    }
}

/// Compiled patcher for one set of [`InteropOptions`].
#[derive(Debug)]
pub struct InteropPatcher {
    options: InteropOptions,
    imports: Regex,
    renames: Vec<(Regex, String)>,
}

impl InteropPatcher {
    pub fn new(options: InteropOptions) -> Result<Self, BuildError> {
        let any_decl = format!(r#"{}\("[^"]+", EntryPoint="[^"]+"\)\]"#, IMPORT_ATTRIBUTE);
        let sentinel_decl = format!(
            r#"{}\("{}", EntryPoint="[^"]+"\)\]"#,
            IMPORT_ATTRIBUTE,
            regex::escape(&options.sentinel_library)
        );
        // An already wrapped block is matched first and left alone.
        let imports = Regex::new(&format!(
            r#"(?m)^(?P<wrapped>[ \t]*#if {cond}[ \t]*\n[ \t]*{sentinel}[ \t]*\n[ \t]*#else[ \t]*\n[ \t]*{any}[ \t]*\n[ \t]*#endif)|^(?P<indent>[ \t]*)(?P<decl>{attr}\("(?P<lib>[^"]+)", EntryPoint="(?P<entry>[^"]+)"\)\])"#,
            cond = regex::escape(&options.static_condition),
            sentinel = sentinel_decl,
            any = any_decl,
            attr = IMPORT_ATTRIBUTE,
        ))?;

        let renames = options
            .renames
            .iter()
            .map(|(from, to)| {
                Regex::new(&format!(r"\b{}\b", regex::escape(from))).map(|re| (re, to.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            options,
            imports,
            renames,
        })
    }

    pub fn options(&self) -> &InteropOptions {
        &self.options
    }

    /// Wraps every dynamic import in the static-linkage conditional.
    ///
    /// The original declaration is kept verbatim in the `#else` branch.
    pub fn rewrite_imports(&self, text: &str) -> String {
        let sentinel = &self.options.sentinel_library;
        let condition = &self.options.static_condition;
        self.imports
            .replace_all(text, |caps: &Captures| {
                if caps.name("wrapped").is_some() || &caps["lib"] == sentinel.as_str() {
                    return caps[0].to_string();
                }
                let indent = &caps["indent"];
                format!(
                    "{indent}#if {condition}\n\
                     {indent}[global::System.Runtime.InteropServices.DllImport(\"{sentinel}\", EntryPoint=\"{entry}\")]\n\
                     {indent}#else\n\
                     {indent}{decl}\n\
                     {indent}#endif",
                    entry = &caps["entry"],
                    decl = &caps["decl"],
                )
            })
            .into_owned()
    }

    /// Adds a callback-registration attribute above callback-shaped functions.
    pub fn annotate_callbacks(&self, text: &str) -> String {
        callback_pattern()
            .replace_all(text, |caps: &Captures| {
                if caps.name("existing").is_some() {
                    return caps[0].to_string();
                }
                match callback_delegate(&caps["ret"], &caps["name"]) {
                    Some(delegate) => format!(
                        "{indent}[AOT.MonoPInvokeCallback (typeof ({delegate}))]\n{indent}{decl}",
                        indent = &caps["indent"],
                        decl = &caps["decl"],
                    ),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Rewrites whole-word bare references of known entry points to their
    /// qualified names, then applies the configured renames.
    pub fn canonicalize(&self, text: &str, table: &EntryPointTable) -> Result<String, BuildError> {
        let mut out = match table.pattern()? {
            Some(pattern) => pattern
                .replace_all(text, |caps: &Captures| {
                    table
                        .qualified(&caps[0])
                        .map(str::to_string)
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
            None => text.to_string(),
        };
        for (pattern, to) in &self.renames {
            out = pattern.replace_all(&out, to.as_str()).into_owned();
        }
        Ok(out)
    }

    /// Source files below the interop root, in sorted order.
    pub fn source_files(&self) -> Result<Vec<PathBuf>, BuildError> {
        let root = &self.options.root;
        if !root.exists() {
            return Err(BuildError::Config(format!(
                "interop root {} does not exist",
                root.display()
            )));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && self.has_patched_extension(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn has_patched_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.options
                    .extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }

    /// Runs both phases over the interop root.
    ///
    /// With `dry_run` the changed files are reported but not written.
    pub fn patch_tree(&self, dry_run: bool) -> Result<PatchSummary, BuildError> {
        let files = self.source_files()?;
        info!("patching {} interop sources under {}", files.len(), self.options.root.display());

        let mut originals = Vec::with_capacity(files.len());
        let mut rewritten = Vec::with_capacity(files.len());
        for path in &files {
            let raw = fs::read_to_string(path).map_err(|e| BuildError::fs("read", path, e))?;
            let text = raw.replace("\r\n", "\n");
            rewritten.push(self.annotate_callbacks(&self.rewrite_imports(&text)));
            originals.push(raw);
        }

        let table = EntryPointTable::collect(rewritten.iter().map(String::as_str), &self.options.prefix);
        debug!("collected {} qualified entry points", table.len());

        let mut summary = PatchSummary {
            scanned: files.len(),
            changed: Vec::new(),
            entry_points: table.len(),
        };
        for ((path, original), text) in files.iter().zip(&originals).zip(&rewritten) {
            let patched = self.canonicalize(text, &table)?;
            if patched == *original {
                continue;
            }
            if dry_run {
                info!("[dry-run] would patch {}", path.display());
            } else {
                fs::write(path, &patched).map_err(|e| BuildError::fs("write", path, e))?;
                info!("patched {}", path.display());
            }
            summary.changed.push(path.clone());
        }
        Ok(summary)
    }
}

/// Patches the bindings described by `options`.
pub fn patch_interop(options: InteropOptions, dry_run: bool) -> Result<PatchSummary, BuildError> {
    InteropPatcher::new(options)?.patch_tree(dry_run)
}
