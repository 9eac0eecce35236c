//! 批量挂载/卸载工具命令

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use atp_executor::{BulkOps, BulkReport};
use colored::Colorize;

use super::common;
use super::output::{self, BarProgress};
use crate::ServerCommand;

pub async fn handle(action: ServerCommand, config_path: Option<&Path>) -> Result<bool> {
    let config = common::load_config(config_path)?;
    let client = common::connect_cloud(&config.cloud).await?;
    let cancel = common::cancel_on_ctrl_c();
    let target = Arc::new(config.server_actions);

    let (workers, format) = match &action {
        ServerCommand::AddInterfaces { workers, format, .. }
        | ServerCommand::RemoveInterfaces { workers, format, .. }
        | ServerCommand::AttachVolumes { workers, format, .. }
        | ServerCommand::DetachVolumes { workers, format, .. } => (*workers, format.clone()),
    };
    let mut ops = BulkOps::new(client, target, cancel);
    if let Some(workers) = workers {
        ops = ops.with_workers(workers);
    }

    let report = match action {
        ServerCommand::AddInterfaces { server, count, .. } => {
            ops.with_progress(Arc::new(BarProgress::new("挂载网卡")))
                .add_interfaces(&server, count)
                .await?
        }
        ServerCommand::RemoveInterfaces { server, all, .. } => {
            ops.with_progress(Arc::new(BarProgress::new("卸载网卡")))
                .remove_interfaces(&server, all)
                .await?
        }
        ServerCommand::AttachVolumes { server, count, .. } => {
            ops.with_progress(Arc::new(BarProgress::new("挂载云盘")))
                .attach_volumes(&server, count)
                .await?
        }
        ServerCommand::DetachVolumes { server, delete, .. } => {
            ops.with_progress(Arc::new(BarProgress::new("卸载云盘")))
                .detach_volumes(&server, delete)
                .await?
        }
    };

    print_report(&report, &format)?;
    Ok(report.is_success())
}

fn print_report(report: &BulkReport, format: &str) -> Result<()> {
    match format {
        "json" => output::print_json(report),
        "yaml" => output::print_yaml(report),
        _ => {
            println!(
                "{} 云主机 {}",
                report.operation.bold(),
                report.server_id.cyan().bold()
            );
            for id in &report.succeeded {
                println!("  {} {}", "✓".green().bold(), id);
            }
            for failure in &report.failed {
                println!("  {} {}: {}", "✗".red().bold(), failure.item, failure.error.red());
            }
            println!(
                "\n成功 {}, 失败 {}",
                report.succeeded.len().to_string().green(),
                report.failed.len().to_string().red()
            );
            Ok(())
        }
    }
}
