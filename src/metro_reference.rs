// Static reference data: station names, route → line classification, line colors.
//
// Loaded once at start-up from a GTFS archive (stops.txt, routes.txt), with a
// JSON copy persisted in the user's cache directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

use crate::error::ReferenceError;

pub const DEFAULT_LINE_COLOR: &str = "#888888";
pub const UNKNOWN_STATION: &str = "Unknown station";

type Result<T> = std::result::Result<T, ReferenceError>;

// ============================================================================
// Lookup tables
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationDirectory {
    names: HashMap<String, String>,
}

impl StationDirectory {
    pub fn new(names: HashMap<String, String>) -> Self {
        StationDirectory { names }
    }

    /// Name of `station_id`, or `fallback` if the station is unknown.
    pub fn station_name<'a>(&'a self, station_id: &str, fallback: &'a str) -> &'a str {
        self.names.get(station_id).map(String::as_str).unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineColors {
    colors: HashMap<String, String>,
}

impl LineColors {
    pub fn new(colors: HashMap<String, String>) -> Self {
        LineColors { colors }
    }

    pub fn color_for<'a>(&'a self, line: &str) -> &'a str {
        self.colors.get(line).map(String::as_str).unwrap_or(DEFAULT_LINE_COLOR)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLines {
    lines: HashMap<String, String>,
}

impl RouteLines {
    pub fn new(lines: HashMap<String, String>) -> Self {
        RouteLines { lines }
    }

    /// Line a route belongs to. Unclassified routes are named after themselves.
    pub fn line_for_route(&self, route_id: &str) -> String {
        self.lines
            .get(route_id)
            .cloned()
            .unwrap_or_else(|| route_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

// ============================================================================
// GTFS rows
// ============================================================================

#[derive(Debug, Deserialize)]
struct GtfsRouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: String,
    #[serde(default)]
    route_long_name: String,
    #[serde(default)]
    route_color: String,
}

#[derive(Debug, Deserialize)]
struct GtfsStopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: String,
}

// ============================================================================
// Reference bundle with on-disk cache
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetroReference {
    pub stations: StationDirectory,
    pub routes: RouteLines,
    pub colors: LineColors,
    pub cached_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceStats {
    pub stations: usize,
    pub routes: usize,
    pub line_colors: usize,
    pub cached_at: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl MetroReference {
    const CACHE_DIR: &'static str = "metro_tracker";
    const CACHE_KEY_MAX_LEN: usize = 120;

    pub fn stats(&self) -> ReferenceStats {
        ReferenceStats {
            stations: self.stations.len(),
            routes: self.routes.len(),
            line_colors: self.colors.len(),
            cached_at: self.cached_at,
        }
    }

    /// Load the reference for `source` (path or http(s) URL of a GTFS zip).
    ///
    /// Never fails: any problem is logged and an empty reference is returned,
    /// so lookups fall back to placeholders and the default line color.
    pub fn load(source: Option<&str>, max_age_days: u64, timeout: std::time::Duration) -> Self {
        let Some(source) = source else {
            log::warn!("⚠️  No GTFS source configured, station names and line colors will use fallbacks");
            return Self::default();
        };

        let cache_path = Self::cache_path(source);
        if let Some(cached) = Self::load_cached(&cache_path, max_age_days) {
            return cached;
        }

        match Self::fetch_archive(source, timeout).and_then(Self::from_gtfs_zip) {
            Ok(reference) => {
                log::info!(
                    "✓ Loaded GTFS reference: {} stations, {} routes, {} line colors",
                    reference.stations.len(),
                    reference.routes.len(),
                    reference.colors.len()
                );
                if let Err(e) = reference.save(&cache_path) {
                    log::warn!("⚠️  Could not save reference cache: {}", e);
                }
                reference
            }
            Err(e) => {
                log::warn!("⚠️  Could not load GTFS reference ({}), continuing with fallbacks", e);
                Self::default()
            }
        }
    }

    fn fetch_archive(source: &str, timeout: std::time::Duration) -> Result<bytes::Bytes> {
        if source.starts_with("http://") || source.starts_with("https://") {
            log::info!("📥 Downloading GTFS archive from {}", source);
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ReferenceError::Network(format!("Failed to create HTTP client: {}", e)))?;

            let response = client
                .get(source)
                .send()
                .map_err(|e| ReferenceError::Network(e.to_string()))?;

            if !response.status().is_success() {
                return Err(ReferenceError::Network(format!(
                    "GTFS download failed with status: {}",
                    response.status()
                )));
            }

            let body = response.bytes().map_err(|e| ReferenceError::Network(e.to_string()))?;
            log::info!("✓ Downloaded {} KB, extracting...", body.len() / 1024);
            Ok(body)
        } else {
            Ok(bytes::Bytes::from(fs::read(source)?))
        }
    }

    pub fn from_gtfs_zip(zip_bytes: bytes::Bytes) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;

        let routes_csv = read_entry(&mut archive, "routes.txt")?;
        let stops_csv = read_entry(&mut archive, "stops.txt")?;

        let (routes, colors) = parse_routes(&routes_csv)?;
        let stations = parse_stops(&stops_csv)?;

        Ok(MetroReference {
            stations,
            routes,
            colors,
            cached_at: now_secs(),
        })
    }

    pub fn is_expired(&self, max_age_days: u64) -> bool {
        let age_days = now_secs().saturating_sub(self.cached_at) / 86400;
        age_days >= max_age_days
    }

    /// Cache file for `source`; each GTFS source gets its own file.
    pub fn cache_path(source: &str) -> PathBuf {
        let key: String = source
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        // Keep the tail: it is where paths and URLs differ most.
        let key = match key.char_indices().rev().nth(Self::CACHE_KEY_MAX_LEN - 1) {
            Some((idx, _)) => &key[idx..],
            None => key.as_str(),
        };

        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(Self::CACHE_DIR);
        path.push(format!("{}_reference_cache.json", key));
        path
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        log::info!("✓ Reference cache saved to: {:?}", path);
        Ok(())
    }

    pub fn load_cached(path: &Path, max_age_days: u64) -> Option<Self> {
        if !path.exists() {
            log::info!("ℹ️  No reference cache found, will read the GTFS archive");
            return None;
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("⚠️  Failed to read reference cache ({}), will refresh", e);
                return None;
            }
        };

        match serde_json::from_str::<MetroReference>(&contents) {
            Ok(cache) if cache.is_expired(max_age_days) => {
                log::info!("⚠️  Reference cache expired (>{} days old), refreshing...", max_age_days);
                None
            }
            Ok(cache) => {
                log::info!(
                    "✓ Reference cache loaded: {} stations, {} routes",
                    cache.stations.len(),
                    cache.routes.len()
                );
                Some(cache)
            }
            Err(e) => {
                log::warn!("⚠️  Failed to parse reference cache ({}), will refresh", e);
                None
            }
        }
    }
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut file = archive.by_name(name)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

fn parse_routes(contents: &str) -> Result<(RouteLines, LineColors)> {
    // GTFS files are often written with a UTF-8 BOM.
    let contents = contents.trim_start_matches('\u{feff}');
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(contents.as_bytes());

    let mut lines = HashMap::new();
    let mut colors = HashMap::new();

    for result in rdr.deserialize::<GtfsRouteRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                log::debug!("Skipping malformed routes.txt row: {}", e);
                continue;
            }
        };

        let line = if !row.route_short_name.is_empty() {
            row.route_short_name
        } else if !row.route_long_name.is_empty() {
            row.route_long_name
        } else {
            row.route_id.clone()
        };

        if row.route_color.len() == 6 && row.route_color.chars().all(|c| c.is_ascii_hexdigit()) {
            colors
                .entry(line.clone())
                .or_insert_with(|| format!("#{}", row.route_color.to_uppercase()));
        }

        lines.insert(row.route_id, line);
    }

    Ok((RouteLines::new(lines), LineColors::new(colors)))
}

fn parse_stops(contents: &str) -> Result<StationDirectory> {
    let contents = contents.trim_start_matches('\u{feff}');
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(contents.as_bytes());

    let mut names = HashMap::new();
    for result in rdr.deserialize::<GtfsStopRow>() {
        match result {
            Ok(row) if !row.stop_name.is_empty() => {
                names.insert(row.stop_id, row.stop_name);
            }
            Ok(_) => {}
            Err(e) => log::debug!("Skipping malformed stops.txt row: {}", e),
        }
    }

    Ok(StationDirectory::new(names))
}
