use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fieldscope")]
#[command(about = "Acquire, process and serve measurement data from configured devices")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file (YAML, JSON or JSONC)
    #[arg(required = true)]
    pub config_file: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate the configuration and show the pipeline without running
    #[arg(long)]
    pub dry_run: bool,

    /// Override the host the HTTP shell binds to
    #[arg(long, value_name = "ADDR", env = "FIELDSCOPE_HOST")]
    pub host: Option<String>,

    /// Override the port of the HTTP shell
    #[arg(short, long, value_name = "PORT", env = "FIELDSCOPE_PORT")]
    pub port: Option<u16>,

    /// Path to a .env file loaded before the configuration
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::{ComponentConfig, ComponentKind, Configuration};

fn push_component<K: ComponentKind>(output: &mut String, index: usize, config: &ComponentConfig<K>) {
    output.push_str(&format!("  {}. [{}] {}", index + 1, config.name, config.type_name()));
    if config.hidden {
        output.push_str(" (hidden)");
    }
    output.push('\n');
    for (key, value) in &config.parameters {
        output.push_str(&format!("       {}: {}\n", key, value));
    }
}

/// Format the pipeline a configuration describes, with its validation report
pub fn format_dry_run(configuration: &Configuration, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "fieldscope v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Configuration: {}\n\n", args.config_file.display()));

    match configuration.shell() {
        Some(shell) => {
            output.push_str(&format!("Shell: {}\n", shell.type_name()));
            for (key, value) in &shell.parameters {
                output.push_str(&format!("  {}: {}\n", key, value));
            }
        }
        None => output.push_str("Shell: none\n"),
    }
    output.push('\n');

    output.push_str(&format!("Inlets ({}):\n", configuration.inlets().len()));
    for (index, inlet) in configuration.inlets().iter().enumerate() {
        push_component(&mut output, index, inlet);
    }
    output.push('\n');

    output.push_str(&format!("Processors ({}):\n", configuration.processors().len()));
    for (index, processor) in configuration.processors().iter().enumerate() {
        push_component(&mut output, index, processor);
    }
    output.push('\n');

    let report = configuration.validation_report();
    if report.valid {
        output.push_str("Validation: PASSED\n");
        output.push_str("Ready to start pipeline. Remove --dry-run to execute.\n");
    } else {
        output.push_str("Validation: FAILED\n");
        output.push_str(&report.to_string());
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    fn create_test_args() -> Args {
        Args {
            config_file: PathBuf::from("config.yaml"),
            verbose: 0,
            dry_run: true,
            host: None,
            port: None,
            env_file: None,
        }
    }

    #[test]
    fn test_format_dry_run_basic() {
        let yaml = r#"
shell:
  type: periodical_local
  parameters:
    time_interval: 500
inlets:
  cam:
    type: local_camera_cv2
  temperature:
    type: static_variable
    hidden: true
    parameters:
      value: 21.5
processors:
  small:
    type: image_resize
    parameters:
      width: 64
      height: 48
      interpolation: INTER_AREA
"#;
        let configuration = Configuration::from_str(yaml, ConfigFormat::Yaml).unwrap();
        let output = format_dry_run(&configuration, &create_test_args());

        assert!(output.contains("Shell: periodical_local"));
        assert!(output.contains("Inlets (2):"));
        assert!(output.contains("[temperature] static_variable (hidden)"));
        assert!(output.contains("Processors (1):"));
        assert!(output.contains("[small] image_resize"));
        assert!(output.contains("Validation: PASSED"));
    }

    #[test]
    fn test_format_dry_run_reports_invalid_nodes() {
        let json = r#"{
            "shell": { "type": "rest_api" },
            "inlets": { "s": { "type": "static_variable" } }
        }"#;
        let configuration = Configuration::from_str(json, ConfigFormat::Json).unwrap();
        let output = format_dry_run(&configuration, &create_test_args());

        assert!(output.contains("Validation: FAILED"));
        assert!(output.contains("missing value"));
    }

    #[test]
    fn test_clap_parsing() {
        let args = Args::parse_from(["fieldscope", "config.yaml"]);
        assert_eq!(args.config_file, PathBuf::from("config.yaml"));
        assert!(!args.dry_run);
    }

    #[test]
    fn test_clap_verbose() {
        let args = Args::parse_from(["fieldscope", "-vvv", "config.yaml"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn test_clap_overrides() {
        let args = Args::parse_from([
            "fieldscope",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--dry-run",
            "config.yaml",
        ]);
        assert_eq!(args.host, Some("127.0.0.1".to_string()));
        assert_eq!(args.port, Some(9000));
        assert!(args.dry_run);
    }
}
