use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use super::component::{
    ComponentConfig, ComponentKind, InletConfig, InletKind, ProcessorConfig, ProcessorKind,
    ShellConfig, SkipReason,
};
use super::ConfigError;

/// Serialization formats accepted for configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

/// A node that was dropped while reading the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedNode {
    pub section: &'static str,
    pub key: String,
    pub reason: SkipReason,
}

/// The typed pipeline configuration: one shell, ordered inlets and processors
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    shell: Option<ShellConfig>,
    inlets: Vec<InletConfig>,
    processors: Vec<ProcessorConfig>,
    raw: Value,
    configured_once: bool,
    valid_structure: bool,
    skipped: Vec<SkippedNode>,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Strip C-style comments from JSONC content.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                result.push(c);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                result.push(c);
            }
            '/' if !in_string && chars.peek() == Some(&'/') => {
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if !in_string && chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    prev = nc;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

/// Parse configuration text into a raw, order-preserving tree
pub fn parse_tree(content: &str, format: ConfigFormat) -> Result<Value, ConfigError> {
    match format {
        ConfigFormat::Json => serde_json::from_str(&strip_jsonc_comments(content))
            .map_err(|e| ConfigError::Parse(e.to_string())),
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

fn read_section<K: ComponentKind>(
    section: &Value,
    skipped: &mut Vec<SkippedNode>,
) -> Vec<ComponentConfig<K>> {
    let Some(nodes) = section.as_object() else {
        if !section.is_null() {
            warn!("Section '{}' is not a mapping, no components read", K::SECTION);
        }
        return Vec::new();
    };

    let mut configs = Vec::with_capacity(nodes.len());
    for (key, node) in nodes {
        match ComponentConfig::<K>::read(key, node) {
            Ok(config) => {
                if !config.is_valid() {
                    warn!(
                        "{} '{}' ({}) is invalid, missing: {}",
                        K::SECTION,
                        config.name,
                        config.type_name(),
                        config.missing.join(", ")
                    );
                }
                configs.push(config);
            }
            Err(reason) => {
                warn!("Skipping {} node '{}': {}", K::SECTION, key, reason);
                skipped.push(SkippedNode {
                    section: K::SECTION,
                    key: key.clone(),
                    reason,
                });
            }
        }
    }
    info!("{} {} configuration(s) imported", configs.len(), K::SECTION);
    configs
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse text in the given format. Structural problems inside the tree
    /// degrade validity instead of failing.
    pub fn from_str(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let tree = parse_tree(content, format)?;
        Ok(Self::from_value(tree))
    }

    pub fn from_value(tree: Value) -> Self {
        let mut configuration = Self::new();
        configuration.read(tree);
        configuration
    }

    /// Replace everything with the given tree
    pub fn read(&mut self, tree: Value) {
        self.shell = None;
        self.inlets.clear();
        self.processors.clear();
        self.skipped.clear();
        self.valid_structure = true;

        if !tree.is_object() {
            warn!("Configuration root is not a mapping");
            self.valid_structure = false;
        }

        match tree.get("shell") {
            Some(node) => match ShellConfig::read("shell", node) {
                Ok(shell) => {
                    info!("Shell configuration imported ({})", shell.type_name());
                    self.shell = Some(shell);
                }
                Err(reason) => {
                    warn!("Fail to import shell configuration: {}", reason);
                    self.skipped.push(SkippedNode {
                        section: "shell",
                        key: "shell".to_string(),
                        reason,
                    });
                    self.valid_structure = false;
                }
            },
            None => {
                warn!("Configuration has no shell");
                self.valid_structure = false;
            }
        }

        if let Some(section) = tree.get("inlets") {
            self.inlets = read_section(section, &mut self.skipped);
        }
        if let Some(section) = tree.get("processors") {
            self.processors = read_section(section, &mut self.skipped);
        }

        self.raw = tree;
        self.configured_once = true;
    }

    /// Re-read the inlet and processor subtrees present in `tree`. The shell
    /// is never replaced. Absent sections are left untouched; an empty
    /// section removes every component of that kind.
    pub fn update(&mut self, tree: &Value) {
        if let Some(section) = tree.get("inlets") {
            self.skipped.retain(|s| s.section != InletKind::SECTION);
            self.inlets = read_section(section, &mut self.skipped);
        }
        if let Some(section) = tree.get("processors") {
            self.skipped.retain(|s| s.section != ProcessorKind::SECTION);
            self.processors = read_section(section, &mut self.skipped);
        }

        if let (Some(raw), Some(update)) = (self.raw.as_object_mut(), tree.as_object()) {
            for key in ["inlets", "processors"] {
                if let Some(section) = update.get(key) {
                    raw.insert(key.to_string(), section.clone());
                }
            }
        }
    }

    pub fn shell(&self) -> Option<&ShellConfig> {
        self.shell.as_ref()
    }

    pub fn shell_mut(&mut self) -> Option<&mut ShellConfig> {
        self.shell.as_mut()
    }

    pub fn inlets(&self) -> &[InletConfig] {
        &self.inlets
    }

    pub fn processors(&self) -> &[ProcessorConfig] {
        &self.processors
    }

    /// The last tree read, with updated sections merged in
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn skipped(&self) -> &[SkippedNode] {
        &self.skipped
    }

    pub fn is_valid(&self) -> bool {
        self.valid_structure && self.components_are_valid() && self.configured_once
    }

    fn components_are_valid(&self) -> bool {
        self.shell.as_ref().map_or(true, ShellConfig::is_valid)
            && self.inlets.iter().all(InletConfig::is_valid)
            && self.processors.iter().all(ProcessorConfig::is_valid)
    }

    pub fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport {
            valid: self.is_valid(),
            has_shell: self.shell.is_some(),
            invalid: Vec::new(),
            skipped: self.skipped.clone(),
        };

        let mut note = |section: &'static str, name: &str, type_name: &str, missing: &[&str]| {
            if !missing.is_empty() {
                report.invalid.push(InvalidNode {
                    section,
                    name: name.to_string(),
                    type_name: type_name.to_string(),
                    missing: missing.iter().map(|m| m.to_string()).collect(),
                });
            }
        };
        if let Some(shell) = &self.shell {
            note("shell", &shell.name, shell.type_name(), &shell.missing);
        }
        for inlet in &self.inlets {
            note("inlets", &inlet.name, inlet.type_name(), &inlet.missing);
        }
        for processor in &self.processors {
            note("processors", &processor.name, processor.type_name(), &processor.missing);
        }

        report
    }
}

/// A kept node with missing required parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidNode {
    pub section: &'static str,
    pub name: String,
    pub type_name: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub has_shell: bool,
    pub invalid: Vec<InvalidNode>,
    pub skipped: Vec<SkippedNode>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration valid: {}", self.valid)?;
        if !self.has_shell {
            writeln!(f, "  no usable shell declared")?;
        }
        for node in &self.invalid {
            writeln!(
                f,
                "  invalid {} '{}' ({}): missing {}",
                node.section,
                node.name,
                node.type_name,
                node.missing.join(", ")
            )?;
        }
        for node in &self.skipped {
            writeln!(f, "  skipped {} '{}': {}", node.section, node.key, node.reason)?;
        }
        Ok(())
    }
}
