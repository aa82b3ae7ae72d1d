//! Taxonomy loading and concept resolution.
//!
//! A taxonomy version lives in one directory of schema (`.xsd`) and label
//! linkbase (`.xml`) files. Loading indexes every `xs:element` and resolves
//! its Chinese label through the `loc -> labelArc -> label` chain. Loaded
//! taxonomies are immutable and shared read-only between concurrent parses;
//! the cache guards against duplicate concurrent loads of the same version.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fund_report_core::config::TaxonomyConfig;
use fund_report_core::error::{IngestError, IngestResult};

/// Metadata of one taxonomy concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMeta {
    /// Element id attribute, e.g. `cn_FundCode`.
    pub id: String,
    /// Element name, e.g. `FundCode`.
    pub name: String,
    /// Declared datatype, e.g. `xbrli:monetaryItemType`.
    pub datatype: Option<String>,
    /// Chinese standard label from the label linkbase.
    pub label_zh: Option<String>,
    pub substitution_group: Option<String>,
    pub is_abstract: bool,
    /// `instant` or `duration`.
    pub period_type: Option<String>,
}

/// One loaded taxonomy version. Immutable after load.
#[derive(Debug)]
pub struct Taxonomy {
    pub version: String,
    concepts: Vec<ConceptMeta>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Taxonomy {
    /// Look a concept up by element id, qualified name or bare name.
    pub fn get(&self, concept_id: &str) -> Option<&ConceptMeta> {
        if let Some(&idx) = self.by_id.get(concept_id) {
            return Some(&self.concepts[idx]);
        }
        let local = concept_id.rsplit(':').next().unwrap_or(concept_id);
        self.by_name.get(local).map(|&idx| &self.concepts[idx])
    }

    /// All concepts whose Chinese label contains `needle`.
    pub fn search_by_label(&self, needle: &str) -> Vec<&ConceptMeta> {
        self.concepts
            .iter()
            .filter(|c| {
                c.label_zh
                    .as_deref()
                    .map(|l| l.contains(needle))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

/// **Taxonomy Manager**
///
/// Loads taxonomy versions from disk on first use and caches them
/// process-wide, keyed by version. Version selection reads the report's
/// first `schemaRef` href; unknown references fall back to the configured
/// default version.
pub struct TaxonomyManager {
    root_dir: PathBuf,
    default_version: String,
    cache: Mutex<HashMap<String, Arc<Taxonomy>>>,
}

impl TaxonomyManager {
    pub fn new(config: &TaxonomyConfig) -> Self {
        Self {
            root_dir: PathBuf::from(&config.root_dir),
            default_version: config.default_version.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the taxonomy version for a report from its schemaRef href.
    ///
    /// A version matches when its name appears in the href path; otherwise
    /// the configured default applies.
    pub fn select_version(&self, schema_ref: Option<&str>) -> String {
        if let Some(href) = schema_ref {
            for version in self.known_versions() {
                if href.contains(&version) {
                    return version;
                }
            }
        }
        self.default_version.clone()
    }

    /// Version directories currently present under the taxonomy root.
    pub fn known_versions(&self) -> Vec<String> {
        let mut versions = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.root_dir) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        versions.push(name.to_string());
                    }
                }
            }
        }
        versions.sort();
        versions
    }

    /// Load a version, reusing the cached instance when present.
    ///
    /// The cache lock is held across the load so two workers racing on a new
    /// version produce a single load.
    pub fn load(&self, version: &str) -> IngestResult<Arc<Taxonomy>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| IngestError::Internal("taxonomy cache poisoned".to_string()))?;

        if let Some(taxonomy) = cache.get(version) {
            return Ok(Arc::clone(taxonomy));
        }

        let dir = self.root_dir.join(version);
        let taxonomy = Arc::new(load_version_dir(version, &dir)?);
        debug!(
            version,
            concepts = taxonomy.len(),
            "taxonomy version loaded"
        );
        cache.insert(version.to_string(), Arc::clone(&taxonomy));
        Ok(taxonomy)
    }
}

/// Load every schema and label linkbase in one version directory.
fn load_version_dir(version: &str, dir: &Path) -> IngestResult<Taxonomy> {
    if !dir.is_dir() {
        return Err(IngestError::Parse(format!(
            "taxonomy version directory not found: {}",
            dir.display()
        )));
    }

    let mut concepts: Vec<ConceptMeta> = Vec::new();
    let mut labels: HashMap<String, String> = HashMap::new();

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in &entries {
        match path.extension().and_then(|e| e.to_str()) {
            Some("xsd") => {
                let bytes = std::fs::read(path)?;
                if let Err(e) = collect_elements(&bytes, &mut concepts) {
                    warn!(file = %path.display(), "skipping unreadable schema: {}", e);
                }
            }
            Some("xml") => {
                let bytes = std::fs::read(path)?;
                if let Err(e) = collect_labels(&bytes, &mut labels) {
                    warn!(file = %path.display(), "skipping unreadable linkbase: {}", e);
                }
            }
            _ => {}
        }
    }

    for concept in &mut concepts {
        if let Some(label) = labels.get(&concept.id) {
            concept.label_zh = Some(label.clone());
        }
    }

    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    for (idx, concept) in concepts.iter().enumerate() {
        by_id.insert(concept.id.clone(), idx);
        by_name.entry(concept.name.clone()).or_insert(idx);
    }

    Ok(Taxonomy {
        version: version.to_string(),
        concepts,
        by_id,
        by_name,
    })
}

/// Index every `xs:element` declaration in a schema file.
fn collect_elements(bytes: &[u8], concepts: &mut Vec<ConceptMeta>) -> IngestResult<()> {
    let mut reader = Reader::from_reader(Cursor::new(bytes));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed schema: {}", e)))?
        {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"element" {
                    if let Some(concept) = element_to_concept(&e) {
                        concepts.push(concept);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn element_to_concept(e: &BytesStart<'_>) -> Option<ConceptMeta> {
    let name = attr_local(e, b"name")?;
    let id = attr_local(e, b"id").unwrap_or_else(|| name.clone());
    Some(ConceptMeta {
        id,
        name,
        datatype: attr_local(e, b"type"),
        label_zh: None,
        substitution_group: attr_local(e, b"substitutionGroup"),
        is_abstract: attr_local(e, b"abstract").as_deref() == Some("true"),
        period_type: attr_local(e, b"periodType"),
    })
}

/// Resolve `loc -> labelArc -> label` chains of one label linkbase into
/// `element id -> label text`.
fn collect_labels(bytes: &[u8], labels: &mut HashMap<String, String>) -> IngestResult<()> {
    let mut reader = Reader::from_reader(Cursor::new(bytes));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    // loc label -> element id (the href fragment)
    let mut locs: HashMap<String, String> = HashMap::new();
    // from loc label -> to resource label
    let mut arcs: Vec<(String, String)> = Vec::new();
    // resource label -> label text
    let mut resources: HashMap<String, String> = HashMap::new();

    let mut current_resource: Option<String> = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestError::Parse(format!("malformed linkbase: {}", e)))?
        {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"loc" => {
                    if let (Some(href), Some(label)) =
                        (attr_local(&e, b"href"), attr_local(&e, b"label"))
                    {
                        if let Some(fragment) = href.rsplit('#').next() {
                            locs.insert(label, fragment.to_string());
                        }
                    }
                }
                b"labelArc" => {
                    if let (Some(from), Some(to)) =
                        (attr_local(&e, b"from"), attr_local(&e, b"to"))
                    {
                        arcs.push((from, to));
                    }
                }
                b"label" => {
                    current_resource = attr_local(&e, b"label");
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(resource) = current_resource.take() {
                    let text = t
                        .unescape()
                        .map_err(|e| IngestError::Parse(format!("bad label text: {}", e)))?
                        .trim()
                        .to_string();
                    if !text.is_empty() {
                        resources.insert(resource, text);
                    }
                }
            }
            Event::End(_) => current_resource = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    for (from, to) in arcs {
        if let (Some(element_id), Some(text)) = (locs.get(&from), resources.get(&to)) {
            labels.insert(element_id.clone(), text.clone());
        }
    }
    Ok(())
}

fn attr_local(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
