use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};

/// QGA 命令的通用结构
#[derive(Debug, Serialize)]
pub struct QgaCommand<'a, T> {
    pub execute: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<T>,
}

/// QGA 响应的通用结构
#[derive(Debug, Deserialize)]
pub struct QgaResponse<T> {
    #[serde(rename = "return")]
    pub ret: Option<T>,
    pub error: Option<QgaErrorInfo>,
}

/// QGA 错误信息
#[derive(Debug, Deserialize)]
pub struct QgaErrorInfo {
    #[serde(rename = "class")]
    pub error_class: String,
    pub desc: String,
}

/// 无参数命令
#[derive(Debug, Serialize)]
pub struct NoArguments {}

// ============================================================================
// guest-exec: 在 Guest 中执行命令
// ============================================================================

/// guest-exec 命令参数
#[derive(Debug, Clone, Serialize)]
pub struct GuestExecCommand {
    /// 要执行的命令路径（绝对路径）
    pub path: String,

    /// 命令参数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg: Option<Vec<String>>,

    /// 环境变量
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,

    /// 标准输入数据（Base64 编码）
    #[serde(skip_serializing_if = "Option::is_none", rename = "input-data")]
    pub input_data: Option<String>,

    /// 是否捕获标准输出
    #[serde(skip_serializing_if = "Option::is_none", rename = "capture-output")]
    pub capture_output: Option<bool>,
}

impl GuestExecCommand {
    /// 创建简单的命令执行（捕获输出）
    pub fn simple(path: &str, args: &[&str]) -> Self {
        Self {
            path: path.to_string(),
            arg: Some(args.iter().map(|s| s.to_string()).collect()),
            env: None,
            input_data: None,
            capture_output: Some(true),
        }
    }

    /// 通过 /bin/sh 执行脚本
    pub fn shell(script: &str) -> Self {
        Self::simple("/bin/sh", &["-c", script])
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.path.clone()];
        if let Some(args) = &self.arg {
            parts.extend(args.iter().cloned());
        }
        parts.join(" ")
    }
}

/// guest-exec 返回结果
#[derive(Debug, Deserialize)]
pub struct GuestExecResult {
    /// 进程 ID
    pub pid: i64,
}

// ============================================================================
// guest-exec-status: 查询命令执行状态
// ============================================================================

/// guest-exec-status 请求参数
#[derive(Debug, Serialize)]
pub struct GuestExecStatusRequest {
    /// 进程 ID
    pub pid: i64,
}

/// guest-exec-status 返回结果
#[derive(Debug, Clone, Deserialize)]
pub struct GuestExecStatus {
    /// 进程是否已退出
    pub exited: bool,

    /// 退出码（如果已退出）
    #[serde(rename = "exitcode")]
    pub exit_code: Option<i32>,

    /// 信号编号（如果被信号终止）
    pub signal: Option<i32>,

    /// 标准输出（Base64 编码）
    #[serde(rename = "out-data")]
    pub out_data: Option<String>,

    /// 标准错误（Base64 编码）
    #[serde(rename = "err-data")]
    pub err_data: Option<String>,

    /// 输出是否被截断
    #[serde(rename = "out-truncated")]
    pub out_truncated: Option<bool>,

    #[serde(rename = "err-truncated")]
    pub err_truncated: Option<bool>,
}

fn decode_b64(data: &Option<String>) -> String {
    data.as_ref()
        .and_then(|data| general_purpose::STANDARD.decode(data).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

impl GuestExecStatus {
    /// 解码标准输出
    pub fn decode_stdout(&self) -> String {
        decode_b64(&self.out_data)
    }

    /// 解码标准错误
    pub fn decode_stderr(&self) -> String {
        decode_b64(&self.err_data)
    }
}

// ============================================================================
// guest-network-get-interfaces / guest-get-host-name
// ============================================================================

/// Guest 网卡
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestNetworkInterface {
    pub name: String,

    #[serde(rename = "hardware-address", default)]
    pub hardware_address: Option<String>,

    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestIpAddress>,
}

impl GuestNetworkInterface {
    pub fn ipv4(&self) -> impl Iterator<Item = &str> {
        self.ip_addresses
            .iter()
            .filter(|ip| ip.ip_address_type == "ipv4")
            .map(|ip| ip.ip_address.as_str())
    }

    pub fn is_loopback(&self) -> bool {
        self.name == "lo"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestIpAddress {
    #[serde(rename = "ip-address-type")]
    pub ip_address_type: String,

    #[serde(rename = "ip-address")]
    pub ip_address: String,

    #[serde(default)]
    pub prefix: u8,
}

#[derive(Debug, Deserialize)]
pub struct GuestHostName {
    #[serde(rename = "host-name")]
    pub host_name: String,
}

// ============================================================================
// lsblk -J -b -o NAME,SERIAL,SIZE,TYPE
// ============================================================================

/// lsblk 导出的 JSON 格式的块设备列表
pub const LSBLK_ARGS: &[&str] = &["-J", "-b", "-o", "NAME,SERIAL,SIZE,TYPE"];

/// Guest 块设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,

    #[serde(default)]
    pub serial: Option<String>,

    /// 字节数
    #[serde(deserialize_with = "size_from_number_or_string", default)]
    pub size: u64,

    #[serde(rename = "type", default)]
    pub kind: String,
}

impl BlockDevice {
    pub fn is_disk(&self) -> bool {
        self.kind == "disk"
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

/// 旧版本 lsblk 把 SIZE 输出为字符串
fn size_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("无效的容量: {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("无效的容量: {}", s))),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("无效的容量: {}", other))),
    }
}

/// 解析 lsblk 输出 (子设备被忽略)
pub fn parse_lsblk(output: &str) -> serde_json::Result<Vec<BlockDevice>> {
    let parsed: LsblkOutput = serde_json::from_str(output)?;
    Ok(parsed.blockdevices)
}
