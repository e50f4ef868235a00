//! KDL configuration parser

use std::io;
use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a configuration file, falling back to defaults when it does not exist.
///
/// The file is optional: device selection can come entirely from the
/// environment or the command line.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config_str(&content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl depends on an older miette, so rebuild the span for ours
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "devices" => {
                config.devices = parse_devices(node)?;
            }
            "output" => {
                config.output = parse_output(node)?;
            }
            "remap" => {
                config.remap = parse_remap(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn first_string<'a>(node: &'a kdl::KdlNode) -> Result<&'a str, ConfigError> {
    node.entries()
        .first()
        .and_then(|entry| entry.value().as_string())
        .ok_or_else(|| ConfigError::MissingValue {
            node: node.name().value().to_string(),
        })
}

fn non_empty(node: &kdl::KdlNode) -> Result<String, ConfigError> {
    let value = first_string(node)?.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid {
            message: format!("`{}` must not be empty", node.name().value()),
        });
    }
    Ok(value.to_string())
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    global.log_level = first_string(child)?
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "dpi-sync" => {
                    global.dpi_sync = child
                        .entries()
                        .first()
                        .and_then(|entry| entry.value().as_bool())
                        .ok_or_else(|| ConfigError::Invalid {
                            message: "`dpi-sync` expects true or false".to_string(),
                        })?;
                }
                "dpi-rules-path" => {
                    let val = first_string(child)?;
                    global.dpi_rules_path = shellexpand::tilde(val).into_owned().into();
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_devices(node: &kdl::KdlNode) -> Result<DeviceSelection, ConfigError> {
    let mut devices = DeviceSelection::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "keyboard" => devices.keyboard = Some(non_empty(child)?),
                "mouse" => devices.mouse = Some(non_empty(child)?),
                name => {
                    tracing::warn!("Unknown devices option: {}", name);
                }
            }
        }
    }

    Ok(devices)
}

fn parse_output(node: &kdl::KdlNode) -> Result<OutputConfig, ConfigError> {
    let mut output = OutputConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "keyboard-name" => output.keyboard_name = non_empty(child)?,
                "mouse-name" => output.mouse_name = non_empty(child)?,
                name => {
                    tracing::warn!("Unknown output option: {}", name);
                }
            }
        }
    }

    if output.keyboard_name == output.mouse_name {
        return Err(ConfigError::Invalid {
            message: format!(
                "virtual keyboard and mouse share the name '{}'; \
                 they must differ so the cloned nodes can be told apart",
                output.keyboard_name
            ),
        });
    }

    Ok(output)
}

fn parse_remap(node: &kdl::KdlNode) -> Result<RemapConfig, ConfigError> {
    let mut remap = RemapConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "modifier-delay-ms" => {
                    let raw = child
                        .entries()
                        .first()
                        .and_then(|entry| entry.value().as_i64())
                        .ok_or_else(|| ConfigError::MissingValue {
                            node: "modifier-delay-ms".to_string(),
                        })?;

                    remap.modifier_delay_ms = u64::try_from(raw)
                        .ok()
                        .filter(|ms| *ms <= MAX_MODIFIER_DELAY_MS)
                        .ok_or_else(|| ConfigError::Invalid {
                            message: format!(
                                "modifier-delay-ms must be between 0 and {}, got {}",
                                MAX_MODIFIER_DELAY_MS, raw
                            ),
                        })?;
                }
                name => {
                    tracing::warn!("Unknown remap option: {}", name);
                }
            }
        }
    }

    Ok(remap)
}
