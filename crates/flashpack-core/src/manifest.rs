//! Container manifest
//!
//! The manifest is a small INI-style UTF-8 document embedded verbatim in the
//! container. It records the anti-theft and OS versions, the device targets
//! the image is meant for, and the partitions that were left out of the
//! payload.
//!
//! ```text
//! [FullFlash]
//! AntiTheftVersion = 1.1
//! OSVersion = 10.0.22621.1
//!
//! [ExcludedPartitions]
//! Partition0 = DPP
//!
//! [DeviceTargetInfo0]
//! PlatformId = Contoso.Board.A
//! VersionConstraint = >=10.0
//! ```
//!
//! Sections without entries are omitted.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;

const SECTION_FULL_FLASH: &str = "FullFlash";
const SECTION_EXCLUDED: &str = "ExcludedPartitions";
const SECTION_TARGET_PREFIX: &str = "DeviceTargetInfo";

const KEY_ANTI_THEFT: &str = "AntiTheftVersion";
const KEY_OS_VERSION: &str = "OSVersion";
const KEY_PARTITION_PREFIX: &str = "Partition";
const KEY_PLATFORM_ID: &str = "PlatformId";
const KEY_CONSTRAINT: &str = "VersionConstraint";

/// Characters a platform ID inside a device target may not contain
const PLATFORM_ID_FORBIDDEN: &[char] = &[';', ':', '=', '[', ']', '\r', '\n'];

/// Characters an excluded partition name may not contain
const PARTITION_NAME_FORBIDDEN: &[char] = &['=', '[', ']', '\r', '\n'];

// ============================================================================
// Device targets
// ============================================================================

/// Comparison used by a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComparisonOp {
    /// `>=`
    GreaterOrEqual,
    /// `<=`
    LessOrEqual,
    /// `=`
    Equal,
    /// `>`
    Greater,
    /// `<`
    Less,
}

impl ComparisonOp {
    /// Operator text
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::GreaterOrEqual => ">=",
            ComparisonOp::LessOrEqual => "<=",
            ComparisonOp::Equal => "=",
            ComparisonOp::Greater => ">",
            ComparisonOp::Less => "<",
        }
    }

    /// Split a leading operator off `s`, longest match first
    fn split_prefix(s: &str) -> Option<(Self, &str)> {
        [
            ComparisonOp::GreaterOrEqual,
            ComparisonOp::LessOrEqual,
            ComparisonOp::Equal,
            ComparisonOp::Greater,
            ComparisonOp::Less,
        ]
        .into_iter()
        .find_map(|op| s.strip_prefix(op.symbol()).map(|rest| (op, rest)))
    }
}

/// Version requirement attached to a device target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VersionConstraint {
    /// Comparison
    pub op: ComparisonOp,
    /// Dotted numeric version
    pub version: String,
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = ComparisonOp::split_prefix(s)
            .ok_or_else(|| "missing comparison operator (>=, <=, =, >, <)".to_string())?;
        let version = rest.trim();
        if !is_dotted_numeric(version, 1) {
            return Err(format!("'{}' is not a dotted numeric version", version));
        }
        Ok(Self {
            op,
            version: version.to_string(),
        })
    }
}

/// One device the image targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceTargetInfo {
    /// Platform identifier
    pub platform_id: String,
    /// Version requirement
    pub constraint: VersionConstraint,
}

impl std::fmt::Display for DeviceTargetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform_id, self.constraint)
    }
}

/// Parse a semicolon-delimited device target list
///
/// Each entry reads `platform-id:OPversion`, for example
/// `Contoso.Board.A:>=10.0;Contoso.Board.B:=10.0.1`. An empty or
/// whitespace-only string yields no targets. Every entry must parse
/// completely; the error names the entry and its zero-based position.
pub fn parse_device_targets(input: &str) -> Result<Vec<DeviceTargetInfo>> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }

    input
        .split(';')
        .enumerate()
        .map(|(position, entry)| {
            parse_device_target(entry).map_err(|reason| Error::ManifestValidation {
                field: "DeviceTargetInfo",
                position: Some(position),
                entry: entry.to_string(),
                reason,
            })
        })
        .collect()
}

fn parse_device_target(entry: &str) -> std::result::Result<DeviceTargetInfo, String> {
    let (id, constraint) = entry
        .split_once(':')
        .ok_or_else(|| "expected 'platform-id:constraint'".to_string())?;

    let platform_id = id.trim();
    if platform_id.is_empty() {
        return Err("empty platform ID".to_string());
    }
    if platform_id.contains(PLATFORM_ID_FORBIDDEN) {
        return Err(format!(
            "platform ID '{}' contains a reserved character",
            platform_id
        ));
    }

    Ok(DeviceTargetInfo {
        platform_id: platform_id.to_string(),
        constraint: constraint.parse()?,
    })
}

/// Whether `s` is digits separated by single dots, with at least `min_parts` parts
fn is_dotted_numeric(s: &str, min_parts: usize) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() >= min_parts
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

// ============================================================================
// Manifest
// ============================================================================

/// Validated manifest content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// Anti-theft version
    pub anti_theft_version: String,
    /// OS version
    pub os_version: String,
    /// Device targets in the order given
    pub device_targets: Vec<DeviceTargetInfo>,
    /// Partitions left out of the payload
    pub excluded_partitions: BTreeSet<String>,
}

impl Manifest {
    /// Whether `name` is excluded
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_partitions.contains(name)
    }

    /// Render the canonical manifest text
    pub fn render(&self) -> String {
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(out, "[{}]", SECTION_FULL_FLASH);
        let _ = writeln!(out, "{} = {}", KEY_ANTI_THEFT, self.anti_theft_version);
        let _ = writeln!(out, "{} = {}", KEY_OS_VERSION, self.os_version);

        if !self.excluded_partitions.is_empty() {
            let _ = writeln!(out, "\n[{}]", SECTION_EXCLUDED);
            for (i, name) in self.excluded_partitions.iter().enumerate() {
                let _ = writeln!(out, "{}{} = {}", KEY_PARTITION_PREFIX, i, name);
            }
        }

        for (i, target) in self.device_targets.iter().enumerate() {
            let _ = writeln!(out, "\n[{}{}]", SECTION_TARGET_PREFIX, i);
            let _ = writeln!(out, "{} = {}", KEY_PLATFORM_ID, target.platform_id);
            let _ = writeln!(out, "{} = {}", KEY_CONSTRAINT, target.constraint);
        }

        out
    }

    /// Rendered manifest as bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.render().into_bytes()
    }

    /// Parse manifest text produced by [`Manifest::render`]
    pub fn parse(text: &str) -> Result<Self> {
        let mut section: Option<String> = None;
        let mut anti_theft = None;
        let mut os_version = None;
        let mut excluded = Vec::new();
        let mut targets: Vec<(Option<String>, Option<String>)> = Vec::new();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some(index) = name.strip_prefix(SECTION_TARGET_PREFIX) {
                    let index: usize = index.parse().map_err(|_| {
                        Error::malformed(format!("manifest line {}: bad section '{}'", line_no + 1, name))
                    })?;
                    if index != targets.len() {
                        return Err(Error::malformed(format!(
                            "manifest line {}: device target section {} out of order",
                            line_no + 1,
                            index
                        )));
                    }
                    targets.push((None, None));
                } else if name != SECTION_FULL_FLASH && name != SECTION_EXCLUDED {
                    return Err(Error::malformed(format!(
                        "manifest line {}: unknown section '{}'",
                        line_no + 1,
                        name
                    )));
                }
                section = Some(name.to_string());
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::malformed(format!("manifest line {}: expected 'key = value'", line_no + 1))
            })?;
            let (key, value) = (key.trim(), value.trim().to_string());

            match section.as_deref() {
                Some(SECTION_FULL_FLASH) if key == KEY_ANTI_THEFT => anti_theft = Some(value),
                Some(SECTION_FULL_FLASH) if key == KEY_OS_VERSION => os_version = Some(value),
                Some(SECTION_EXCLUDED) if key.starts_with(KEY_PARTITION_PREFIX) => {
                    excluded.push(value)
                }
                Some(s) if s.starts_with(SECTION_TARGET_PREFIX) => {
                    let Some(target) = targets.last_mut() else {
                        return Err(Error::malformed("device target key outside a section"));
                    };
                    match key {
                        KEY_PLATFORM_ID => target.0 = Some(value),
                        KEY_CONSTRAINT => target.1 = Some(value),
                        _ => {
                            return Err(Error::malformed(format!(
                                "manifest line {}: unknown key '{}'",
                                line_no + 1,
                                key
                            )))
                        }
                    }
                }
                _ => {
                    return Err(Error::malformed(format!(
                        "manifest line {}: unexpected key '{}'",
                        line_no + 1,
                        key
                    )))
                }
            }
        }

        let mut builder = ManifestBuilder::new(
            anti_theft.ok_or_else(|| Error::malformed("manifest has no AntiTheftVersion"))?,
            os_version.ok_or_else(|| Error::malformed("manifest has no OSVersion"))?,
        )
        .excluded_partitions(excluded);

        let rendered_targets: Vec<String> = targets
            .into_iter()
            .enumerate()
            .map(|(i, (id, constraint))| match (id, constraint) {
                (Some(id), Some(constraint)) => Ok(format!("{}:{}", id, constraint)),
                _ => Err(Error::malformed(format!(
                    "device target {} is missing a key",
                    i
                ))),
            })
            .collect::<Result<_>>()?;
        if !rendered_targets.is_empty() {
            builder = builder.device_targets(rendered_targets.join(";"));
        }

        builder.build()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Validates manifest inputs and produces a [`Manifest`]
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    anti_theft_version: String,
    os_version: String,
    excluded_partitions: Vec<String>,
    device_targets: Option<String>,
}

impl ManifestBuilder {
    /// Start a manifest with the two required versions
    pub fn new(anti_theft_version: impl Into<String>, os_version: impl Into<String>) -> Self {
        Self {
            anti_theft_version: anti_theft_version.into(),
            os_version: os_version.into(),
            ..Default::default()
        }
    }

    /// Partition names to record as excluded
    pub fn excluded_partitions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_partitions = names.into_iter().map(Into::into).collect();
        self
    }

    /// Raw semicolon-delimited device target string
    pub fn device_targets(mut self, targets: impl Into<String>) -> Self {
        self.device_targets = Some(targets.into());
        self
    }

    /// Validate every field and build the manifest
    pub fn build(self) -> Result<Manifest> {
        let anti_theft_version = validate_version("AntiTheftVersion", &self.anti_theft_version)?;
        let os_version = validate_version("OSVersion", &self.os_version)?;

        let mut excluded_partitions = BTreeSet::new();
        for (position, name) in self.excluded_partitions.iter().enumerate() {
            let trimmed = name.trim();
            if trimmed.is_empty() || trimmed.contains(PARTITION_NAME_FORBIDDEN) {
                return Err(Error::ManifestValidation {
                    field: "ExcludedPartitions",
                    position: Some(position),
                    entry: name.clone(),
                    reason: "partition name must be non-empty without '=', '[', ']' or line breaks"
                        .to_string(),
                });
            }
            excluded_partitions.insert(trimmed.to_string());
        }

        let device_targets = match &self.device_targets {
            Some(targets) => parse_device_targets(targets)?,
            None => Vec::new(),
        };

        Ok(Manifest {
            anti_theft_version,
            os_version,
            device_targets,
            excluded_partitions,
        })
    }
}

fn validate_version(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if !is_dotted_numeric(trimmed, 2) {
        return Err(Error::ManifestValidation {
            field,
            position: None,
            entry: value.to_string(),
            reason: "expected a dotted numeric version such as 10.0".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
