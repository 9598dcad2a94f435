//! Submission archive
//!
//! Renders the execution descriptor (`workflow.yaml`) and its RO-Crate
//! provenance metadata (`ro-crate-metadata.json`) from a validated
//! [`Descriptor`] and zips them. For a fixed `generated_at` the output is
//! byte-identical; the timestamp only appears in the metadata document.

mod template;

use std::io::{Cursor, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;
use crate::types::Descriptor;

pub use template::{render, TemplateContext};

pub const DESCRIPTOR_ENTRY: &str = "workflow.yaml";
pub const METADATA_ENTRY: &str = "ro-crate-metadata.json";

/// File name the archive is uploaded under
pub const ARCHIVE_FILE_NAME: &str = "rocrate.zip";

/// `generateName` prefix when neither name nor species yields a slug
const GENERATE_NAME_FALLBACK: &str = "bmd";

const DESCRIPTOR_TEMPLATE: &str = include_str!("templates/workflow.yaml");
const METADATA_TEMPLATE: &str = include_str!("templates/ro-crate-metadata.json");

#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub descriptor_sha256: String,
    pub generated_at: DateTime<Utc>,
}

impl Archive {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, descriptor: &Descriptor) -> Result<Archive, ArchiveError> {
        self.build_at(descriptor, Utc::now())
    }

    /// Build with an explicit generation timestamp
    pub fn build_at(
        &self,
        descriptor: &Descriptor,
        generated_at: DateTime<Utc>,
    ) -> Result<Archive, ArchiveError> {
        let mut context = descriptor_context(descriptor, generated_at);

        let workflow = render(DESCRIPTOR_ENTRY, DESCRIPTOR_TEMPLATE, &context)?;
        let descriptor_sha256 = format!("{:x}", Sha256::digest(workflow.as_bytes()));

        context.insert("descriptor_sha256".to_string(), descriptor_sha256.clone());
        context.insert("descriptor_bytes".to_string(), workflow.len().to_string());
        let metadata = render(METADATA_ENTRY, METADATA_TEMPLATE, &context)?;

        let bytes = package(&[
            (DESCRIPTOR_ENTRY, workflow.as_bytes()),
            (METADATA_ENTRY, metadata.as_bytes()),
        ])?;

        Ok(Archive {
            bytes,
            descriptor_sha256,
            generated_at,
        })
    }
}

/* ===================== Rendering Context ===================== */

fn descriptor_context(descriptor: &Descriptor, generated_at: DateTime<Utc>) -> TemplateContext {
    let mut context = TemplateContext::new();
    let mut put = |key: &str, value: Option<String>| {
        // Empty values count as missing so required fields fail the render
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            context.insert(key.to_string(), value);
        }
    };

    put("workflow_name", Some(descriptor.name.clone()));
    put("generate_name", Some(format!("{}-", generate_name(descriptor))));
    put("description", descriptor.description.clone());
    put("species_name", Some(descriptor.species_tag.clone()));
    put("ecosystem_type", Some(descriptor.ecosystem_type.as_str().to_string()));
    put(
        "workflow_template",
        Some(descriptor.ecosystem_type.workflow_template().to_string()),
    );
    put("geometry_type", Some(descriptor.geometry_type.as_str().to_string()));
    put("geometry_wkt", Some(descriptor.geometry_wkt.clone()));
    put("time_period", descriptor.climate_periods());
    put("directive_types", descriptor.directive_types());
    put(
        "generated_at",
        Some(generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );

    if let Some(window) = descriptor.time_window {
        put("time_window_start", Some(window.start.to_string()));
        put("time_window_end", Some(window.end.to_string()));
        put(
            "temporal_coverage",
            Some(format!("{}/{}", window.start, window.end)),
        );
    }

    // BTreeMap-backed, so key order is stable
    put(
        "parameters_json",
        serde_json::to_string(&descriptor.parameters).ok(),
    );

    context
}

/// Slug of the name, else of the species tag, else a fixed prefix
fn generate_name(descriptor: &Descriptor) -> String {
    [&descriptor.name, &descriptor.species_tag]
        .into_iter()
        .map(|text| slugify(text))
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| GENERATE_NAME_FALLBACK.to_string())
}

/// Lowercase alphanumerics joined by single dashes, at most 40 characters
fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(40);
    slug.trim_end_matches('-').to_string()
}

/* ===================== Packaging ===================== */

fn package(entries: &[(&str, &[u8])]) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (name, contents) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(contents)?;
    }

    Ok(writer.finish()?.into_inner())
}
