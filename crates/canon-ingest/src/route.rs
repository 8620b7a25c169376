//! Routes manifest (routes.yml)
//!
//! A route is one ingestion pipeline: an input folder, the domain/entity its
//! rows belong to, how new files are detected and where files and messages go
//! afterwards. The manifest is loaded once at startup and never reloaded.
//!
//! ```yaml
//! routes:
//!   - name: countries
//!     domain: reference
//!     entity: countries
//!     root: /data/countries          # input/, output/, archive/, logs/ below it
//!     suffix_filter: ".csv,.txt"
//!     detection:
//!       mode: hybrid
//!       backup_interval_secs: 30
//!     outputs:
//!       broker:
//!         exchange: reference
//!         durable: true
//!       file:
//!         timestamp_suffix: true
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Default poll interval for `mode: poll`
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default backup poll interval for `mode: hybrid`
pub const DEFAULT_BACKUP_INTERVAL_SECS: u64 = 30;

/// Default pause between the two size samples of the settle check
pub const DEFAULT_SETTLE_MS: u64 = 250;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_backup_interval() -> u64 {
    DEFAULT_BACKUP_INTERVAL_SECS
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

fn default_true() -> bool {
    true
}

/// How a route discovers new files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DetectionMode {
    /// Filesystem creation notifications plus one scan at startup
    Event,
    /// Directory listing on a fixed interval
    Poll(PollConfig),
    /// Notifications as the primary path, polling as a slower backup
    Hybrid(HybridConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
}

impl Default for DetectionMode {
    fn default() -> Self {
        DetectionMode::Hybrid(HybridConfig {
            backup_interval_secs: DEFAULT_BACKUP_INTERVAL_SECS,
        })
    }
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::Event => write!(f, "event"),
            DetectionMode::Poll(c) => write!(f, "poll({}s)", c.interval_secs),
            DetectionMode::Hybrid(c) => write!(f, "hybrid(backup {}s)", c.backup_interval_secs),
        }
    }
}

/// When to log a poll cycle. Purely cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollLogging {
    Always,
    #[default]
    OnFiles,
    Never,
}

impl PollLogging {
    pub fn should_log(self, files_found: usize) -> bool {
        match self {
            PollLogging::Always => true,
            PollLogging::OnFiles => files_found > 0,
            PollLogging::Never => false,
        }
    }
}

/// Case-insensitive filename suffix filter
///
/// Parsed from a comma separated list such as `".csv, .TXT"`. `*` or an empty
/// string accepts every file; a leading `*` on an entry (`*.csv`) is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SuffixFilter {
    Any,
    Suffixes(Vec<String>),
}

impl From<String> for SuffixFilter {
    fn from(raw: String) -> Self {
        SuffixFilter::parse(&raw)
    }
}

impl Default for SuffixFilter {
    fn default() -> Self {
        SuffixFilter::Any
    }
}

impl SuffixFilter {
    pub fn parse(raw: &str) -> Self {
        let suffixes: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().trim_start_matches('*').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if suffixes.is_empty() || raw.split(',').any(|s| s.trim() == "*") {
            SuffixFilter::Any
        } else {
            SuffixFilter::Suffixes(suffixes)
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            SuffixFilter::Any => true,
            SuffixFilter::Suffixes(suffixes) => {
                let lower = file_name.to_lowercase();
                suffixes.iter().any(|s| lower.ends_with(s.as_str()))
            },
        }
    }
}

/// Archive buckets
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchivePaths {
    pub processed: PathBuf,
    pub failed: PathBuf,
    pub ignored: PathBuf,
}

impl ArchivePaths {
    fn under(root: &Path) -> Self {
        let archive = root.join("archive");
        Self {
            processed: archive.join("processed"),
            failed: archive.join("failed"),
            ignored: archive.join("ignored"),
        }
    }
}

/// Broker output of a route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerOutput {
    /// Exchange (stream) the rows are published to
    pub exchange: String,

    /// Declare the exchange before the first publish
    #[serde(default = "default_true")]
    pub durable: bool,
}

/// Diagnostic JSON mirror of published envelopes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileOutputSpec {
    /// Output directory; defaults to `{root}/output`
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// File name; defaults to `{entity}.json`
    #[serde(default)]
    pub file_name: Option<String>,

    /// Append `_YYYYMMDD_HHMMSS` to the file stem, one file per input file
    #[serde(default)]
    pub timestamp_suffix: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    pub dir: PathBuf,
    pub file_name: String,
    pub timestamp_suffix: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputsSpec {
    #[serde(default)]
    pub broker: Option<BrokerOutput>,
    #[serde(default)]
    pub file: Option<FileOutputSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutputs {
    pub broker: Option<BrokerOutput>,
    pub file: Option<FileOutput>,
}

/// One route entry as written in the manifest
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub domain: String,
    pub entity: String,

    /// Ingestion contract identifier; defaults to `{domain}.{entity}.csv.v1`
    #[serde(default)]
    pub contract: Option<String>,

    /// Base folder for the standard layout
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub input: Option<PathBuf>,

    #[serde(default)]
    pub archive: Option<ArchivePaths>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub detection: DetectionMode,

    #[serde(default)]
    pub poll_logging: PollLogging,

    #[serde(default)]
    pub suffix_filter: SuffixFilter,

    /// Single-character field delimiter; `tab` is accepted
    #[serde(default)]
    pub delimiter: Option<String>,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default)]
    pub outputs: OutputsSpec,
}

/// A fully resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub contract: String,
    pub domain: String,
    pub entity: String,
    pub input_dir: PathBuf,
    pub detection: DetectionMode,
    pub poll_logging: PollLogging,
    pub suffix_filter: SuffixFilter,
    pub delimiter: u8,
    pub settle: Duration,
    pub archive: ArchivePaths,
    pub outputs: RouteOutputs,
    pub log_dir: PathBuf,
}

impl RouteSpec {
    /// Resolve defaults and the standard folder layout into a [`Route`]
    pub fn resolve(self) -> Result<Route> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(IngestError::invalid_manifest("route name cannot be empty"));
        }
        if self.domain.trim().is_empty() || self.entity.trim().is_empty() {
            return Err(IngestError::invalid_manifest(format!(
                "route '{}': domain and entity are required",
                name
            )));
        }

        let root = self.root.as_deref();
        let missing = |what: &str| {
            IngestError::invalid_manifest(format!(
                "route '{}': {} is not set and no root folder was given",
                name, what
            ))
        };

        let input_dir = match (self.input, root) {
            (Some(path), _) => path,
            (None, Some(root)) => root.join("input"),
            (None, None) => return Err(missing("input")),
        };
        let archive = match (self.archive, root) {
            (Some(paths), _) => paths,
            (None, Some(root)) => ArchivePaths::under(root),
            (None, None) => return Err(missing("archive")),
        };
        let log_dir = match (self.log_dir, root) {
            (Some(path), _) => path,
            (None, Some(root)) => root.join("logs"),
            (None, None) => return Err(missing("log_dir")),
        };

        let file = match self.outputs.file {
            Some(spec) => {
                let dir = match (spec.dir, root) {
                    (Some(dir), _) => dir,
                    (None, Some(root)) => root.join("output"),
                    (None, None) => return Err(missing("outputs.file.dir")),
                };
                Some(FileOutput {
                    dir,
                    file_name: spec
                        .file_name
                        .unwrap_or_else(|| format!("{}.json", self.entity)),
                    timestamp_suffix: spec.timestamp_suffix,
                })
            },
            None => None,
        };

        if self.outputs.broker.is_none() && file.is_none() {
            return Err(IngestError::invalid_manifest(format!(
                "route '{}': at least one output (broker or file) is required",
                name
            )));
        }

        let delimiter = parse_delimiter(self.delimiter.as_deref()).ok_or_else(|| {
            IngestError::invalid_manifest(format!(
                "route '{}': delimiter must be a single ASCII character",
                name
            ))
        })?;

        Ok(Route {
            contract: self
                .contract
                .unwrap_or_else(|| format!("{}.{}.csv.v1", self.domain, self.entity)),
            name,
            domain: self.domain,
            entity: self.entity,
            input_dir,
            detection: self.detection,
            poll_logging: self.poll_logging,
            suffix_filter: self.suffix_filter,
            delimiter,
            settle: Duration::from_millis(self.settle_ms),
            archive,
            outputs: RouteOutputs {
                broker: self.outputs.broker,
                file,
            },
            log_dir,
        })
    }
}

fn parse_delimiter(raw: Option<&str>) -> Option<u8> {
    match raw {
        None => Some(b','),
        Some("tab") | Some("\\t") | Some("\t") => Some(b'\t'),
        Some(s) if s.len() == 1 && s.is_ascii() => s.bytes().next(),
        Some(_) => None,
    }
}

impl Route {
    /// Every folder this route owns
    pub fn owned_paths(&self) -> Vec<&Path> {
        let mut paths = vec![
            self.input_dir.as_path(),
            self.archive.processed.as_path(),
            self.archive.failed.as_path(),
            self.archive.ignored.as_path(),
            self.log_dir.as_path(),
        ];
        if let Some(ref file) = self.outputs.file {
            paths.push(file.dir.as_path());
        }
        paths
    }

    pub fn routing_key(&self) -> String {
        canon_common::routing_key(&self.domain, &self.entity)
    }
}

/// Routes manifest file
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesManifest {
    pub routes: Vec<RouteSpec>,
}

impl RoutesManifest {
    /// Load and resolve a manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Route>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::invalid_manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse, resolve and validate manifest content
    pub fn parse(content: &str) -> Result<Vec<Route>> {
        let manifest: RoutesManifest = serde_yaml::from_str(content)?;
        let routes = manifest
            .routes
            .into_iter()
            .map(RouteSpec::resolve)
            .collect::<Result<Vec<_>>>()?;
        validate_routes(&routes)?;
        Ok(routes)
    }
}

/// Check the manifest-wide invariants: at least one route, unique names and no
/// folder shared (or nested) between two routes
pub fn validate_routes(routes: &[Route]) -> Result<()> {
    if routes.is_empty() {
        return Err(IngestError::invalid_manifest("no routes defined"));
    }

    let mut names = HashSet::new();
    for route in routes {
        if !names.insert(route.name.as_str()) {
            return Err(IngestError::invalid_manifest(format!(
                "duplicate route name '{}'",
                route.name
            )));
        }
    }

    for (i, a) in routes.iter().enumerate() {
        for b in routes.iter().skip(i + 1) {
            for pa in a.owned_paths() {
                for pb in b.owned_paths() {
                    if pa.starts_with(pb) || pb.starts_with(pa) {
                        return Err(IngestError::invalid_manifest(format!(
                            "routes '{}' and '{}' overlap on {} / {}",
                            a.name,
                            b.name,
                            pa.display(),
                            pb.display()
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
routes:
  - name: countries
    domain: reference
    entity: countries
    root: /data/countries
    suffix_filter: ".csv, .TXT"
    outputs:
      broker:
        exchange: reference
  - name: currencies
    domain: reference
    entity: currencies
    root: /data/currencies
    detection:
      mode: poll
      interval_secs: 2
    delimiter: ";"
    outputs:
      file:
        timestamp_suffix: true
"#;

    #[test]
    fn test_parse_manifest_with_layout_defaults() {
        let routes = RoutesManifest::parse(MANIFEST).unwrap();
        assert_eq!(routes.len(), 2);

        let countries = &routes[0];
        assert_eq!(countries.contract, "reference.countries.csv.v1");
        assert_eq!(countries.input_dir, PathBuf::from("/data/countries/input"));
        assert_eq!(
            countries.archive.failed,
            PathBuf::from("/data/countries/archive/failed")
        );
        assert_eq!(countries.log_dir, PathBuf::from("/data/countries/logs"));
        assert!(matches!(countries.detection, DetectionMode::Hybrid(_)));
        assert!(countries.outputs.broker.as_ref().unwrap().durable);
        assert_eq!(countries.routing_key(), "reference.countries");

        let currencies = &routes[1];
        assert_eq!(
            currencies.detection,
            DetectionMode::Poll(PollConfig { interval_secs: 2 })
        );
        assert_eq!(currencies.delimiter, b';');
        let file = currencies.outputs.file.as_ref().unwrap();
        assert_eq!(file.dir, PathBuf::from("/data/currencies/output"));
        assert_eq!(file.file_name, "currencies.json");
    }

    #[test]
    fn test_suffix_filter() {
        let filter = SuffixFilter::parse(".csv, *.TXT");
        assert!(filter.matches("countries.CSV"));
        assert!(filter.matches("notes.txt"));
        assert!(!filter.matches("countries.xlsx"));

        assert_eq!(SuffixFilter::parse("*"), SuffixFilter::Any);
        assert_eq!(SuffixFilter::parse(""), SuffixFilter::Any);
        assert!(SuffixFilter::parse(" ").matches("anything.bin"));
    }

    #[test]
    fn test_poll_logging_knob() {
        assert!(PollLogging::Always.should_log(0));
        assert!(!PollLogging::OnFiles.should_log(0));
        assert!(PollLogging::OnFiles.should_log(3));
        assert!(!PollLogging::Never.should_log(3));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let err = RoutesManifest::parse("routes: []").unwrap_err();
        assert!(err.to_string().contains("no routes defined"));
    }

    #[test]
    fn test_overlapping_routes_are_rejected() {
        let manifest = r#"
routes:
  - name: a
    domain: reference
    entity: countries
    root: /data/shared
    outputs: { broker: { exchange: reference } }
  - name: b
    domain: reference
    entity: currencies
    root: /data/shared
    outputs: { broker: { exchange: reference } }
"#;
        let err = RoutesManifest::parse(manifest).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_route_without_output_is_rejected() {
        let manifest = r#"
routes:
  - name: a
    domain: reference
    entity: countries
    root: /data/a
"#;
        let err = RoutesManifest::parse(manifest).unwrap_err();
        assert!(err.to_string().contains("at least one output"));
    }

    #[test]
    fn test_route_without_root_needs_explicit_paths() {
        let manifest = r#"
routes:
  - name: a
    domain: reference
    entity: countries
    input: /in
    outputs: { broker: { exchange: reference } }
"#;
        let err = RoutesManifest::parse(manifest).unwrap_err();
        assert!(err.to_string().contains("archive"));
    }
}
