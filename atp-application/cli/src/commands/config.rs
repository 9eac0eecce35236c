//! 配置查看命令

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use super::output;
use crate::config::AtpConfig;
use crate::ConfigAction;

pub fn handle(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show { format } => show(config_path, &format),
    }
}

fn show(config_path: Option<&Path>, format: &str) -> Result<()> {
    let (config, source) = AtpConfig::load(config_path)?;
    let config = config.redacted();

    match format {
        "json" => output::print_json(&config),
        "yaml" => output::print_yaml(&config),
        _ => {
            match source {
                Some(path) => println!("{} {}", "# 配置文件:".bright_black(), path.display()),
                None => println!("{}", "# 未找到配置文件, 以下为默认值".bright_black()),
            }
            let content = toml::to_string_pretty(&config).context("序列化配置失败")?;
            println!("{}", content);
            Ok(())
        }
    }
}
