//! ATP CLI 应用

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod web;

#[derive(Parser)]
#[command(name = "atp")]
#[command(about = "OCloudView ATP - 云主机动作自动化测试", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (设置 RUST_LOG 时以其为准)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 动作测试
    Test {
        #[command(subcommand)]
        action: TestAction,
    },

    /// 批量挂载/卸载网卡和云盘
    Server {
        #[command(subcommand)]
        action: ServerCommand,
    },

    /// 配置管理
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum TestAction {
    /// 在云主机上按顺序执行动作序列
    ServerActions {
        /// 动作序列, 如 "reboot,live_migrate:3,shelve"
        #[arg(short, long)]
        actions: String,

        /// 已有云主机 id (逗号分隔)
        #[arg(long, conflicts_with = "create")]
        servers: Option<String>,

        /// 按配置新建 N 台云主机
        #[arg(long, conflicts_with = "servers")]
        create: Option<usize>,

        /// 并发数 (默认取配置)
        #[arg(short, long)]
        workers: Option<usize>,

        /// 用例名称
        #[arg(short, long, default_value = "server-actions")]
        name: String,

        /// 相邻同名动作只保留第一个 (默认累加次数)
        #[arg(long)]
        collapse: bool,

        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,

        /// 报告保存路径 (.json / .yaml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 任务状态接口监听地址, 如 127.0.0.1:8080
        #[arg(long)]
        web: Option<SocketAddr>,
    },

    /// 列出可用动作
    ListActions {
        /// 输出格式 (table/json/yaml)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ServerCommand {
    /// 新建端口并挂载到云主机
    AddInterfaces {
        /// 云主机 id
        server: String,

        /// 网卡数量
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// 并发数
        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 卸载并删除本工具创建的网卡
    RemoveInterfaces {
        /// 云主机 id
        server: String,

        /// 卸载首块网卡以外的全部网卡
        #[arg(long)]
        all: bool,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 新建数据盘并挂载到云主机
    AttachVolumes {
        /// 云主机 id
        server: String,

        /// 云盘数量
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// 卸载云主机的全部数据盘
    DetachVolumes {
        /// 云主机 id
        server: String,

        /// 卸载后删除云盘
        #[arg(long)]
        delete: bool,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// 显示合并后的配置 (密码隐藏)
    Show {
        /// 输出格式 (toml/json/yaml)
        #[arg(short = 'f', long, default_value = "toml")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ATP CLI 启动");

    let config_path = cli.config.as_deref();
    let passed = match cli.command {
        Commands::Test { action } => commands::test::handle(action, config_path).await?,
        Commands::Server { action } => commands::server::handle(action, config_path).await?,
        Commands::Config { action } => {
            commands::config::handle(action, config_path)?;
            true
        }
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
