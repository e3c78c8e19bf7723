use std::fmt;

use serde_json::{Map, Value};

/// Behaviour shared by the shell, inlet and processor kind enums
pub trait ComponentKind: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Section name used in logs and validation reports
    const SECTION: &'static str;

    fn from_type_name(name: &str) -> Option<Self>;

    fn type_name(&self) -> &'static str;

    /// Parameters pre-filled before the node's own parameters are applied
    fn defaults(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Parameters that must be present (and non-null) for the node to be valid
    fn required(&self) -> &'static [&'static str] {
        &[]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    PeriodicalLocal,
    RestApi,
}

impl ComponentKind for ShellKind {
    const SECTION: &'static str = "shell";

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "periodical_local" => Some(ShellKind::PeriodicalLocal),
            "rest_api" => Some(ShellKind::RestApi),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ShellKind::PeriodicalLocal => "periodical_local",
            ShellKind::RestApi => "rest_api",
        }
    }

    fn defaults(&self) -> Vec<(&'static str, Value)> {
        match self {
            ShellKind::PeriodicalLocal => vec![("time_interval", Value::from(1000))],
            ShellKind::RestApi => vec![
                ("host", Value::from("0.0.0.0")),
                ("port", Value::from(5000)),
                ("endpoint", Value::from("/get_frame")),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InletKind {
    LocalCamera,
    VendorCamera,
    StaticValue,
    ProcessVariable,
    Remote,
}

impl InletKind {
    pub fn is_camera(&self) -> bool {
        matches!(self, InletKind::LocalCamera | InletKind::VendorCamera)
    }
}

impl ComponentKind for InletKind {
    const SECTION: &'static str = "inlets";

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "local_camera_cv2" => Some(InletKind::LocalCamera),
            "baumer_camera_neoapi" => Some(InletKind::VendorCamera),
            "static_variable" => Some(InletKind::StaticValue),
            "opcua_variable" => Some(InletKind::ProcessVariable),
            "restapi" => Some(InletKind::Remote),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            InletKind::LocalCamera => "local_camera_cv2",
            InletKind::VendorCamera => "baumer_camera_neoapi",
            InletKind::StaticValue => "static_variable",
            InletKind::ProcessVariable => "opcua_variable",
            InletKind::Remote => "restapi",
        }
    }

    fn defaults(&self) -> Vec<(&'static str, Value)> {
        match self {
            InletKind::LocalCamera | InletKind::VendorCamera => {
                vec![("device_id", Value::from(0))]
            }
            InletKind::ProcessVariable => vec![
                ("server", Value::from("0.0.0.0")),
                ("username", Value::from("")),
                ("password", Value::from("")),
            ],
            InletKind::Remote => vec![("timeout_ms", Value::from(5000))],
            InletKind::StaticValue => Vec::new(),
        }
    }

    fn required(&self) -> &'static [&'static str] {
        match self {
            InletKind::StaticValue => &["value"],
            InletKind::ProcessVariable => &["node_ns", "node_id"],
            InletKind::Remote => &["endpoint"],
            InletKind::LocalCamera | InletKind::VendorCamera => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Input,
    ImageResize,
    ImageCrop,
    ColorConversion,
    Inference,
    SaveOnDisk,
}

impl ComponentKind for ProcessorKind {
    const SECTION: &'static str = "processors";

    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "input" => Some(ProcessorKind::Input),
            "image_resize" => Some(ProcessorKind::ImageResize),
            "image_crop" => Some(ProcessorKind::ImageCrop),
            "color_conversion" => Some(ProcessorKind::ColorConversion),
            "tf_inference" => Some(ProcessorKind::Inference),
            "save_on_disk" => Some(ProcessorKind::SaveOnDisk),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ProcessorKind::Input => "input",
            ProcessorKind::ImageResize => "image_resize",
            ProcessorKind::ImageCrop => "image_crop",
            ProcessorKind::ColorConversion => "color_conversion",
            ProcessorKind::Inference => "tf_inference",
            ProcessorKind::SaveOnDisk => "save_on_disk",
        }
    }

    fn defaults(&self) -> Vec<(&'static str, Value)> {
        match self {
            ProcessorKind::ImageResize => vec![("interpolation", Value::from("INTER_NEAREST"))],
            ProcessorKind::SaveOnDisk => vec![("save_path", Value::from("../data/"))],
            _ => Vec::new(),
        }
    }

    fn required(&self) -> &'static [&'static str] {
        match self {
            ProcessorKind::Input => &["input_inlets"],
            ProcessorKind::ImageResize => &["width", "height"],
            ProcessorKind::ImageCrop => &["x_init", "x_diff", "y_init", "y_diff"],
            ProcessorKind::ColorConversion => &["conversion"],
            ProcessorKind::Inference => &["path_to_models", "model_name", "model_version"],
            ProcessorKind::SaveOnDisk => &[],
        }
    }
}

/// Why a configuration node was not turned into a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingType,
    UnknownType(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnObject => write!(f, "node is not a mapping"),
            SkipReason::MissingType => write!(f, "node has no type"),
            SkipReason::UnknownType(t) => write!(f, "unsupported type '{}'", t),
        }
    }
}

/// One parsed shell, inlet or processor node
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConfig<K> {
    pub kind: K,
    pub name: String,
    pub hidden: bool,
    pub parameters: Map<String, Value>,
    pub metadata: Map<String, Value>,
    /// Required parameters that were absent
    pub missing: Vec<&'static str>,
    raw: Value,
}

pub type ShellConfig = ComponentConfig<ShellKind>;
pub type InletConfig = ComponentConfig<InletKind>;
pub type ProcessorConfig = ComponentConfig<ProcessorKind>;

impl<K: ComponentKind> ComponentConfig<K> {
    /// Parse a node. `key` is its map key and stands in for a missing name.
    pub fn read(key: &str, node: &Value) -> Result<Self, SkipReason> {
        let obj = node.as_object().ok_or(SkipReason::NotAnObject)?;
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(SkipReason::MissingType)?;
        let kind =
            K::from_type_name(type_name).ok_or_else(|| SkipReason::UnknownType(type_name.to_string()))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(key)
            .to_string();
        let hidden = obj.get("hidden").and_then(Value::as_bool).unwrap_or(false);
        let metadata = obj
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut parameters: Map<String, Value> = kind
            .defaults()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        if let Some(configured) = obj.get("parameters").and_then(Value::as_object) {
            for (k, v) in configured {
                parameters.insert(k.clone(), v.clone());
            }
        }
        // input_inlets may sit next to `parameters` instead of inside it
        if let Some(inlets) = obj.get("input_inlets") {
            parameters
                .entry("input_inlets")
                .or_insert_with(|| inlets.clone());
        }

        let missing: Vec<&'static str> = kind
            .required()
            .iter()
            .copied()
            .filter(|p| parameters.get(*p).map_or(true, Value::is_null))
            .collect();
        for p in &missing {
            parameters.remove(*p);
        }

        Ok(Self {
            kind,
            name,
            hidden,
            parameters,
            metadata,
            missing,
            raw: node.clone(),
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }

    /// The node as it was declared
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).filter(|v| !v.is_null())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Unsigned integer parameter; integral floats and numeric strings are accepted
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        match self.param(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String parameter with `~` and environment variables expanded
    pub fn param_path(&self, key: &str) -> Option<String> {
        let raw = self.param_str(key)?;
        Some(
            shellexpand::full(raw)
                .map(|expanded| expanded.into_owned())
                .unwrap_or_else(|_| raw.to_string()),
        )
    }

    /// Metadata as (name, value) pairs in declaration order
    pub fn metadata_items(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.metadata.iter()
    }
}
