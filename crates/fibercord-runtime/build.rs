//! Build script for fibercord-runtime
//!
//! Generates the compile-time cord defaults:
//! 1. Start with library defaults
//! 2. If FIBERCORD_CONFIG_RS is set, parse the user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Write OUT_DIR/fibercord_defaults.rs
//!
//! The user file only lists the values it changes, e.g.
//!
//! ```text
//! pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
//! pub const POOL_MAX: usize = 64;
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

const USER_CONFIG_ENV: &str = "FIBERCORD_CONFIG_RS";

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "DEFAULT_STACK_SIZE",
        rust_type: "usize",
        default_value: "512 * 1024",
    },
    ConfigParam {
        name: "STACK_SIZE_MIN",
        rust_type: "usize",
        default_value: "16 * 1024",
    },
    ConfigParam {
        name: "POOL_MAX",
        rust_type: "usize",
        default_value: "1024",
    },
    ConfigParam {
        name: "PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("fibercord_defaults.rs");

    let mut config: HashMap<&'static str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var(USER_CONFIG_ENV).ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                for unknown in parse_and_merge(&content, &mut config) {
                    println!("cargo:warning=Unknown fibercord config parameter: {}", unknown);
                }
                println!("cargo:warning=Using custom fibercord config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read {} ({}): {}", USER_CONFIG_ENV, path, e);
            }
        }
    }
    println!("cargo:rerun-if-env-changed={}", USER_CONFIG_ENV);

    let output = generate_config(&config, user_path.is_some());
    fs::write(&dest_path, output).expect("Failed to write fibercord_defaults.rs");
}

/// Merge `pub const NAME: TYPE = VALUE;` lines of a user file into `config`.
/// Returns the names that are not known parameters.
fn parse_and_merge(content: &str, config: &mut HashMap<&'static str, String>) -> Vec<String> {
    let mut unknown = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }
    unknown
}

/// Split `pub const NAME: TYPE = VALUE;` into (NAME, VALUE).
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();
    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();
    Some((name, value))
}

fn generate_config(config: &HashMap<&'static str, String>, merged: bool) -> String {
    let mut output = String::new();
    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Cord defaults from library values");
    if merged {
        output.push_str(" merged with the user's config file");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = config.get(param.name).map_or(param.default_value, String::as_str);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        let result = parse_const_line("pub const POOL_MAX: usize = 64;");
        assert_eq!(result, Some(("POOL_MAX".into(), "64".into())));

        let result = parse_const_line("pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;");
        assert_eq!(
            result,
            Some(("DEFAULT_STACK_SIZE".into(), "1024 * 1024".into()))
        );
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config: HashMap<&'static str, String> = HashMap::new();
        config.insert("POOL_MAX", "1024".into());

        let user_config = r#"
            // smaller pool
            pub const POOL_MAX: usize = 16;
            pub const PREEMPT: bool = true;
        "#;

        let unknown = parse_and_merge(user_config, &mut config);
        assert_eq!(config.get("POOL_MAX"), Some(&"16".to_string()));
        assert_eq!(unknown, vec!["PREEMPT".to_string()]);
    }
}
