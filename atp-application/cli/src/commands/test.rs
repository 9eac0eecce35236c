//! 云主机动作测试命令

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use atp_executor::{
    ActionCountList, ActionRegistry, Case, CaseReport, CaseRunner, MergePolicy, TargetPopulation,
    TaskState, TestTask,
};
use colored::Colorize;
use serde::Serialize;

use super::common;
use super::output::{self, BarProgress, TableRow};
use crate::web::{self, WebState};
use crate::TestAction;

pub async fn handle(action: TestAction, config_path: Option<&Path>) -> Result<bool> {
    match action {
        TestAction::ServerActions {
            actions,
            servers,
            create,
            workers,
            name,
            collapse,
            format,
            output,
            web,
        } => {
            let options = RunOptions {
                actions,
                servers,
                create,
                workers,
                name,
                collapse,
                format,
                output,
                web,
            };
            run_server_actions(options, config_path).await
        }
        TestAction::ListActions { format } => {
            list_actions(&format)?;
            Ok(true)
        }
    }
}

struct RunOptions {
    actions: String,
    servers: Option<String>,
    create: Option<usize>,
    workers: Option<usize>,
    name: String,
    collapse: bool,
    format: String,
    output: Option<PathBuf>,
    web: Option<SocketAddr>,
}

fn population(servers: Option<&str>, create: Option<usize>) -> Result<TargetPopulation> {
    match (servers, create) {
        (Some(servers), None) => {
            let ids: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if ids.is_empty() {
                anyhow::bail!("--servers 为空");
            }
            Ok(TargetPopulation::Existing(ids))
        }
        (None, Some(n)) if n > 0 => Ok(TargetPopulation::Create(n)),
        (None, Some(_)) => anyhow::bail!("--create 必须大于 0"),
        _ => anyhow::bail!("必须且只能指定 --servers 或 --create 之一"),
    }
}

/// 执行用例, 返回是否全部通过
async fn run_server_actions(options: RunOptions, config_path: Option<&Path>) -> Result<bool> {
    let config = common::load_config(config_path)?;
    let mut target = config.server_actions.clone();
    if let Some(workers) = options.workers {
        target.workers = workers;
    }

    let policy = if options.collapse {
        MergePolicy::Collapse
    } else {
        MergePolicy::Sum
    };
    let actions = ActionCountList::parse_with(&options.actions, policy)?;
    let case = Case {
        name: options.name.clone(),
        actions,
        population: population(options.servers.as_deref(), options.create)?,
        workers: target.workers,
    };

    let cancel = common::cancel_on_ctrl_c();
    let target = Arc::new(target);
    let client = common::connect_cloud(&config.cloud).await?;
    let progress = Arc::new(BarProgress::new(&case.name));
    let runner = CaseRunner::new(
        client,
        common::guest_connector(&target),
        Arc::new(ActionRegistry::builtin()),
        target,
        cancel,
    )
    .with_progress(progress);
    runner.validate(&case)?;

    let server = match options.web {
        Some(addr) => {
            let state = WebState::new(&case.name, runner.store().clone());
            Some(web::spawn(addr, state).await?)
        }
        None => None,
    };

    println!(
        "{} 用例 {}: {} ({} 个动作)",
        "▶".cyan().bold(),
        case.name.bold(),
        case.actions,
        case.actions.total()
    );
    let report = runner.run(&case).await?;

    print_report(&report, &options.format)?;
    if let Some(path) = &options.output {
        save_report(&report, path)?;
        println!("报告已保存到 {}", path.display().to_string().cyan());
    }

    // 最终报告已写入任务列表, 此时才停止接口
    if let Some(server) = server {
        server.shutdown().await;
    }
    Ok(!report.has_failures())
}

fn save_report(report: &CaseReport, path: &Path) -> Result<()> {
    let content = match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => report.to_yaml()?,
        _ => report.to_json()?,
    };
    std::fs::write(path, content).with_context(|| format!("写入报告失败: {:?}", path))
}

fn state_label(state: TaskState) -> String {
    match state {
        TaskState::Success => "✓ 成功".green().to_string(),
        TaskState::Warning => "! 警告".yellow().to_string(),
        TaskState::Failed => "✗ 失败".red().to_string(),
        TaskState::Running => "运行中".cyan().to_string(),
        TaskState::Pending => "等待".bright_black().to_string(),
    }
}

impl TableRow for TestTask {
    fn headers() -> Vec<&'static str> {
        vec!["云主机", "名称", "状态", "总数", "成功", "跳过", "失败", "错误"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.server_id.clone(),
            self.server_name.clone(),
            format!("{:?}", self.state).to_lowercase(),
            self.total.to_string(),
            self.success.len().to_string(),
            self.skipped.len().to_string(),
            self.failed.len().to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

fn print_report(report: &CaseReport, format: &str) -> Result<()> {
    match format {
        "json" => output::print_json(report),
        "yaml" => output::print_yaml(report),
        _ => {
            println!();
            output::print_table(&report.tasks);
            println!();
            for task in &report.tasks {
                println!(
                    "{} {} {}",
                    state_label(task.state),
                    task.server_id.bold(),
                    task.message.as_deref().unwrap_or("")
                );
                for name in &task.unverified {
                    println!("    {} {} 未能完全验证", "?".yellow(), name);
                }
            }
            let summary = &report.summary;
            println!(
                "\n共 {} 台: {} {} {}, 耗时 {:.1}s",
                summary.total,
                format!("成功 {}", summary.success).green(),
                format!("警告 {}", summary.warning).yellow(),
                format!("失败 {}", summary.failed).red(),
                report.duration_ms as f64 / 1000.0
            );
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct ActionName {
    name: &'static str,
}

impl TableRow for ActionName {
    fn headers() -> Vec<&'static str> {
        vec!["动作"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.to_string()]
    }
}

fn list_actions(format: &str) -> Result<()> {
    let names: Vec<ActionName> = ActionRegistry::builtin()
        .names()
        .into_iter()
        .map(|name| ActionName { name })
        .collect();
    output::output_formatted(&names, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_population_requires_exactly_one_source() {
        assert_eq!(
            population(Some("a, b,,c"), None).unwrap(),
            TargetPopulation::Existing(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(population(None, Some(3)).unwrap(), TargetPopulation::Create(3));
        assert!(population(None, None).is_err());
        assert!(population(Some("a"), Some(1)).is_err());
        assert!(population(None, Some(0)).is_err());
        assert!(population(Some(" , "), None).is_err());
    }

    #[test]
    fn test_task_row() {
        let mut task = TestTask::new("server-1", "vm-1");
        task.fail("云主机不存在");
        let row = task.row();
        assert_eq!(row.len(), TestTask::headers().len());
        assert_eq!(row[2], "failed");
        assert_eq!(row[7], "云主机不存在");
    }
}
