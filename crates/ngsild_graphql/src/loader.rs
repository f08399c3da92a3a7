//! Loading type definitions from a folder of JSON schema files.
//!
//! Each file is parsed, its `$ref` pointers are replaced by the referenced
//! schemas and `allOf` compositions are flattened, so the compiler only ever
//! sees self-contained documents. The `x-extends` annotations of the loaded
//! documents form the [`TypeHierarchy`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::schema::definition::{extends, full_id, short_id, EXTENDS};
use crate::schema::TypeHierarchy;

/// Which files make up the type definitions.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub base_folder: PathBuf,
    /// File stems to ignore.
    pub filtered_file_names: Vec<String>,
    /// Folder names to ignore at any depth.
    pub filtered_folder_names: Vec<String>,
}

/// The self-contained type definitions and their hierarchy.
#[derive(Debug, Clone, Default)]
pub struct LoadedDefinitions {
    pub documents: Vec<Value>,
    pub hierarchy: TypeHierarchy,
}

/// All `*.json` files below the base folder, sorted by path.
pub fn definition_files(options: &LoaderOptions) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(&options.base_folder)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !options
                    .filtered_folder_names
                    .iter()
                    .any(|name| entry.file_name().to_str() == Some(name.as_str()))
        });
    for entry in walker {
        let entry = entry.map_err(|e| Error::Config(format!("cannot read definitions: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if options.filtered_file_names.iter().any(|name| name == stem) {
            debug!(path = %path.display(), "definition file filtered");
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Load every definition file. Files that cannot be parsed or whose
/// references cannot be resolved are skipped.
pub fn load_definitions(options: &LoaderOptions) -> Result<LoadedDefinitions> {
    let files = definition_files(options)?;
    let mut resolver = RefResolver::default();
    let mut documents = Vec::with_capacity(files.len());
    for path in &files {
        match resolver.load(path) {
            Ok(document) => documents.push(document),
            Err(e) => warn!(path = %path.display(), error = %e, "definition file skipped"),
        }
    }
    let hierarchy = hierarchy(&documents);
    info!(
        files = files.len(),
        definitions = documents.len(),
        subtypes = hierarchy.iter().count(),
        "type definitions loaded"
    );
    Ok(LoadedDefinitions {
        documents,
        hierarchy,
    })
}

/// Load one file with references resolved and `allOf` flattened.
pub fn load_document(path: &Path) -> Result<Value> {
    RefResolver::default().load(path)
}

/// The `x-extends` hierarchy of `documents`, keyed by extension-stripped
/// `$id`. Parents given as bare or relative names are matched against the
/// short ids of the documents.
pub fn hierarchy(documents: &[Value]) -> TypeHierarchy {
    let ids: HashMap<&str, &str> = documents
        .iter()
        .filter_map(|d| d.get("$id").and_then(Value::as_str))
        .map(|id| (short_id(id), full_id(id)))
        .collect();
    let resolve = |parent: &str| -> String {
        if parent.contains("://") {
            return full_id(parent).to_string();
        }
        ids.get(short_id(parent))
            .map_or_else(|| full_id(parent).to_string(), |id| (*id).to_string())
    };
    TypeHierarchy::from_pairs(documents.iter().filter_map(|document| {
        let id = document.get("$id").and_then(Value::as_str)?;
        let parents = extends(document);
        if parents.is_empty() {
            return None;
        }
        let parents: Vec<String> = parents.iter().map(|p| resolve(p)).collect();
        Some((full_id(id).to_string(), parents))
    }))
}

/// Resolves `$ref` pointers, caching every file it reads.
#[derive(Debug, Default)]
struct RefResolver {
    files: HashMap<PathBuf, Value>,
}

impl RefResolver {
    fn load(&mut self, path: &Path) -> Result<Value> {
        let path = fs::canonicalize(path)?;
        let root = self.file(&path)?;
        let mut active = Vec::new();
        let resolved = self.resolve(&root, &path, &root, &mut active)?;
        Ok(flatten_all_of(resolved))
    }

    /// The parsed contents of the canonical path `path`.
    fn file(&mut self, path: &Path) -> Result<Value> {
        if let Some(document) = self.files.get(path) {
            return Ok(document.clone());
        }
        let text = fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&text)?;
        self.files.insert(path.to_path_buf(), document.clone());
        Ok(document)
    }

    /// Replace every `$ref` below `value`. `active` holds the references
    /// being expanded; meeting one again leaves the `$ref` in place.
    fn resolve(
        &mut self,
        value: &Value,
        base: &Path,
        root: &Value,
        active: &mut Vec<String>,
    ) -> Result<Value> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item, base, root, active))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(object) => match object.get("$ref").and_then(Value::as_str) {
                Some(reference) => self.expand(object, reference, base, root, active),
                None => {
                    let mut resolved = Map::with_capacity(object.len());
                    for (key, item) in object {
                        resolved.insert(key.clone(), self.resolve(item, base, root, active)?);
                    }
                    Ok(Value::Object(resolved))
                }
            },
            other => Ok(other.clone()),
        }
    }

    fn expand(
        &mut self,
        object: &Map<String, Value>,
        reference: &str,
        base: &Path,
        root: &Value,
        active: &mut Vec<String>,
    ) -> Result<Value> {
        if reference.contains("://") {
            warn!(reference, "remote references are not resolved");
            return Ok(Value::Object(object.clone()));
        }
        let (file, pointer) = reference.split_once('#').unwrap_or((reference, ""));
        let (target_path, target_root) = if file.is_empty() {
            (base.to_path_buf(), root.clone())
        } else {
            let path = fs::canonicalize(base.parent().unwrap_or_else(|| Path::new(".")).join(file))?;
            let document = self.file(&path)?;
            (path, document)
        };

        let key = format!("{}#{}", target_path.display(), pointer);
        if active.contains(&key) {
            debug!(reference, "circular reference left in place");
            return Ok(Value::Object(object.clone()));
        }
        let target = target_root
            .pointer(pointer)
            .ok_or_else(|| Error::Definition(format!("unresolved reference {}", reference)))?
            .clone();

        active.push(key);
        let resolved = self.resolve(&target, &target_path, &target_root, active);
        active.pop();
        let mut resolved = resolved?;

        if let Value::Object(target) = &mut resolved {
            for (key, sibling) in object {
                if key != "$ref" {
                    let sibling = self.resolve(sibling, base, root, active)?;
                    target.insert(key.clone(), sibling);
                }
            }
        }
        Ok(resolved)
    }
}

/// Flatten `allOf` compositions everywhere in `value`.
pub fn flatten_all_of(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(flatten_all_of).collect()),
        Value::Object(object) => {
            let mut object: Map<String, Value> = object
                .into_iter()
                .map(|(key, item)| (key, flatten_all_of(item)))
                .collect();
            let Some(Value::Array(parts)) = object.remove("allOf") else {
                return Value::Object(object);
            };
            let mut extensions = extension_list(object.get(EXTENDS));
            for part in parts {
                if let Value::Object(part) = part {
                    extensions.extend(extension_list(part.get(EXTENDS)));
                    merge_schema(&mut object, part);
                }
            }
            if !extensions.is_empty() {
                let mut unique: Vec<String> = Vec::with_capacity(extensions.len());
                for extension in extensions {
                    if !unique.contains(&extension) {
                        unique.push(extension);
                    }
                }
                object.insert(
                    EXTENDS.to_string(),
                    Value::Array(unique.into_iter().map(Value::String).collect()),
                );
            }
            Value::Object(object)
        }
        other => other,
    }
}

fn extension_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(parent)) => vec![parent.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| extension_list(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Merge `part` into `target`: `properties` recursively, `required` as a
/// union, everything else keeps the value already present.
fn merge_schema(target: &mut Map<String, Value>, part: Map<String, Value>) {
    for (key, value) in part {
        match (key.as_str(), target.get_mut(&key), value) {
            ("properties", Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (name, schema) in incoming {
                    match (existing.get_mut(&name), schema) {
                        (Some(Value::Object(current)), Value::Object(schema)) => {
                            merge_schema(current, schema)
                        }
                        (Some(_), _) => {}
                        (None, schema) => {
                            existing.insert(name, schema);
                        }
                    }
                }
            }
            ("required", Some(Value::Array(existing)), Value::Array(incoming)) => {
                for name in incoming {
                    if !existing.contains(&name) {
                        existing.push(name);
                    }
                }
            }
            (_, Some(_), _) => {}
            (_, None, value) => {
                target.insert(key, value);
            }
        }
    }
}
