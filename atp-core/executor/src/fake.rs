//! 内存中的控制面与 guest agent, 仅用于单元测试

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use atp_cloudplatform::models::VolumeAttachmentInfo;
use atp_cloudplatform::{
    power_state, Address, AttachedVolume, CloudError, ControlPlane, CreatePortRequest,
    CreateServerRequest, CreateVolumeRequest, FixedIp, InterfaceAttachment, Port, RebootType,
    Server, ServerQuery, ServerStatus, Snapshot, Volume, VolumeAttachment,
};
use atp_common::CancellationToken;
use atp_protocol::qga::GuestIpAddress;
use atp_protocol::{
    BlockDevice, ExecOutput, GuestAgent, GuestConnector, GuestExecCommand, GuestNetworkInterface,
    ProtocolError,
};
use serde_json::json;

use crate::config::TargetConfig;
use crate::context::ServerActionTest;

pub const SAMPLE_MAC: &str = "fa:16:3e:00:00:aa";
pub const SAMPLE_IP: &str = "10.0.0.10";

/// 一台运行中的云主机, 位于 compute-1, 网络 net-a 上有一块网卡
pub fn sample_server(id: &str) -> Server {
    serde_json::from_value(json!({
        "id": id,
        "name": id,
        "status": "ACTIVE",
        "OS-EXT-STS:task_state": null,
        "OS-EXT-STS:vm_state": "active",
        "OS-EXT-STS:power_state": power_state::RUNNING,
        "OS-EXT-SRV-ATTR:host": "compute-1",
        "OS-EXT-SRV-ATTR:instance_name": format!("instance-{id}"),
        "OS-EXT-SRV-ATTR:hostname": id,
        "OS-EXT-SRV-ATTR:root_device_name": "/dev/vda",
        "OS-EXT-AZ:availability_zone": "nova",
        "flavor": { "original_name": "m1.small", "vcpus": 1, "ram": 2048, "disk": 20 },
        "image": { "id": "img-0" },
        "addresses": {
            "net-a": [{
                "addr": SAMPLE_IP,
                "version": 4,
                "OS-EXT-IPS-MAC:mac_addr": SAMPLE_MAC,
                "OS-EXT-IPS:type": "fixed"
            }]
        },
        "os-extended-volumes:volumes_attached": []
    }))
    .unwrap()
}

pub fn context_for(cloud: &Arc<FakeCloud>, id: &str) -> ServerActionTest {
    context_with(cloud, id, TargetConfig::default(), None)
}

pub fn context_with(
    cloud: &Arc<FakeCloud>,
    id: &str,
    config: TargetConfig,
    guest: Option<Arc<FakeGuest>>,
) -> ServerActionTest {
    ServerActionTest::new(
        cloud.server(id),
        cloud.clone(),
        guest.map(|g| g as Arc<dyn GuestConnector>),
        Arc::new(config),
        CancellationToken::new(),
    )
}

fn status_power(status: ServerStatus) -> u8 {
    match status {
        ServerStatus::Active | ServerStatus::Build | ServerStatus::Reboot => power_state::RUNNING,
        ServerStatus::Paused => power_state::PAUSED,
        ServerStatus::Suspended => power_state::SUSPENDED,
        _ => power_state::SHUTDOWN,
    }
}

fn initial_interface(id: &str) -> InterfaceAttachment {
    InterfaceAttachment {
        port_id: format!("{id}-nic0"),
        net_id: "net-a".to_string(),
        mac_addr: SAMPLE_MAC.to_string(),
        port_state: Some("ACTIVE".to_string()),
        fixed_ips: vec![FixedIp {
            ip_address: SAMPLE_IP.to_string(),
            subnet_id: "subnet-a".to_string(),
        }],
    }
}

struct FakeServer {
    server: Server,
    /// 剩余多少次查询仍显示任务进行中
    pending: u32,
    /// 调整规格/冷迁移前的状态, 确认后恢复
    resize_from: Option<ServerStatus>,
    interfaces: Vec<InterfaceAttachment>,
    attachments: Vec<VolumeAttachment>,
}

impl FakeServer {
    fn set_status(&mut self, status: ServerStatus) {
        self.server.status = status;
        self.server.power_state = status_power(status);
        self.server.vm_state = Some(status.to_string().to_lowercase());
    }
}

#[derive(Default)]
struct CloudState {
    /// 按资源类型分别编号
    seq: HashMap<&'static str, u32>,
    servers: BTreeMap<String, FakeServer>,
    ports: BTreeMap<String, Port>,
    volumes: BTreeMap<String, Volume>,
    snapshots: BTreeMap<String, Snapshot>,
    calls: Vec<String>,
    failures: Vec<String>,
    migration_stuck: bool,
}

impl CloudState {
    fn bump(&mut self, kind: &'static str) -> u32 {
        let n = self.seq.entry(kind).or_default();
        *n += 1;
        *n
    }

    fn next(&mut self, kind: &'static str) -> String {
        format!("{kind}-{}", self.bump(kind))
    }

    fn server_mut(&mut self, id: &str) -> Result<&mut FakeServer, CloudError> {
        self.servers
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(format!("server {id}")))
    }

    fn volume_mut(&mut self, id: &str) -> Result<&mut Volume, CloudError> {
        self.volumes
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound(format!("volume {id}")))
    }

    fn insert_volume(&mut self, name: Option<String>, size: u64) -> String {
        let id = self.next("volume");
        self.volumes.insert(
            id.clone(),
            Volume {
                id: id.clone(),
                name,
                status: "available".to_string(),
                size,
                volume_type: None,
                bootable: None,
                attachments: Vec::new(),
            },
        );
        id
    }

    /// 把云盘挂到云主机上, 系统盘用 /dev/vda, 数据盘从 /dev/vdb 开始
    fn attach(&mut self, server_id: &str, volume_id: &str, device: Option<&str>) -> Result<VolumeAttachment, CloudError> {
        let fs = self.server_mut(server_id)?;
        let device = match device {
            Some(d) => d.to_string(),
            None => {
                let data = fs
                    .attachments
                    .iter()
                    .filter(|a| a.device.as_deref() != Some("/dev/vda"))
                    .count();
                format!("/dev/vd{}", (b'b' + data as u8) as char)
            }
        };
        let attachment = VolumeAttachment {
            id: volume_id.to_string(),
            volume_id: volume_id.to_string(),
            server_id: server_id.to_string(),
            device: Some(device.clone()),
        };
        fs.attachments.push(attachment.clone());
        fs.server.volumes_attached.push(AttachedVolume {
            id: volume_id.to_string(),
            delete_on_termination: false,
        });

        let volume = self.volume_mut(volume_id)?;
        volume.status = "in-use".to_string();
        volume.attachments = vec![VolumeAttachmentInfo {
            server_id: server_id.to_string(),
            device: Some(device),
        }];
        Ok(attachment)
    }
}

/// 内存控制面
///
/// 每次调用记录为 `操作:资源 id`, 可按前缀注入失败。
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    /// 记录调用并检查失败注入
    fn call(&self, op: &str, id: &str) -> Result<MutexGuard<'_, CloudState>, CloudError> {
        let mut state = self.lock();
        let call = format!("{op}:{id}");
        state.calls.push(call.clone());
        if state.failures.iter().any(|f| call.starts_with(f.as_str())) {
            return Err(CloudError::ApiError(500, format!("injected failure: {call}")));
        }
        Ok(state)
    }

    pub fn add_server(&self, name: &str, status: ServerStatus) -> String {
        let mut state = self.lock();
        let id = state.next("server");
        let mut server = sample_server(&id);
        server.name = name.to_string();
        server.hostname = Some(name.to_string());
        let mut fs = FakeServer {
            server,
            pending: 0,
            resize_from: None,
            interfaces: vec![initial_interface(&id)],
            attachments: Vec::new(),
        };
        fs.set_status(status);
        state.servers.insert(id.clone(), fs);
        id
    }

    /// 从云盘启动的云主机, 系统盘挂在 /dev/vda
    pub fn add_volume_backed_server(&self, name: &str) -> String {
        let id = self.add_server(name, ServerStatus::Active);
        let mut state = self.lock();
        if let Some(fs) = state.servers.get_mut(&id) {
            fs.server.image = json!("");
        }
        let root = state.insert_volume(Some(format!("{name}-root")), 10);
        state.attach(&id, &root, Some("/dev/vda")).unwrap();
        id
    }

    /// 模拟控制面不返回 `OS-EXT-SRV-ATTR:root_device_name`
    pub fn clear_root_device_name(&self, id: &str) {
        if let Some(fs) = self.lock().servers.get_mut(id) {
            fs.server.root_device_name = None;
        }
    }

    pub fn add_volume(&self, name: &str, size: u64) -> String {
        self.lock().insert_volume(Some(name.to_string()), size)
    }

    pub fn set_pending_ticks(&self, id: &str, ticks: u32) {
        if let Some(fs) = self.lock().servers.get_mut(id) {
            fs.pending = ticks;
        }
    }

    /// 迁移请求被接受但云主机留在原节点
    pub fn set_migration_stuck(&self, stuck: bool) {
        self.lock().migration_stuck = stuck;
    }

    /// 以 `prefix` 开头的调用返回错误
    pub fn fail_on(&self, prefix: &str) {
        self.lock().failures.push(prefix.to_string());
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&format!("{prefix}:")))
            .cloned()
            .collect()
    }

    /// 当前云主机详情 (不消耗任务进度)
    pub fn server(&self, id: &str) -> Server {
        self.lock().servers[id].server.clone()
    }

    pub fn server_count(&self) -> usize {
        self.lock().servers.len()
    }

    pub fn port_count(&self) -> usize {
        self.lock().ports.len()
    }

    pub fn volume_count(&self) -> usize {
        self.lock().volumes.len()
    }

    fn mutate(&self, op: &str, id: &str, f: impl FnOnce(&mut FakeServer, bool)) -> Result<(), CloudError> {
        let mut state = self.call(op, id)?;
        let stuck = state.migration_stuck;
        let fs = state.server_mut(id)?;
        f(fs, stuck);
        Ok(())
    }
}

fn other_host(host: Option<&str>) -> String {
    match host {
        Some("compute-1") => "compute-2".to_string(),
        _ => "compute-1".to_string(),
    }
}

#[async_trait]
impl ControlPlane for FakeCloud {
    async fn get_server(&self, id: &str) -> Result<Server, CloudError> {
        let mut state = self.call("get_server", id)?;
        let fs = state.server_mut(id)?;
        let mut server = fs.server.clone();
        if fs.pending > 0 {
            fs.pending -= 1;
            server.task_state = Some("working".to_string());
        }
        Ok(server)
    }

    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>, CloudError> {
        let state = self.call("list_servers", query.name.as_deref().unwrap_or("*"))?;
        Ok(state
            .servers
            .values()
            .filter(|fs| query.name.as_deref().map_or(true, |n| fs.server.name.contains(n)))
            .filter(|fs| query.status.map_or(true, |s| fs.server.status == s))
            .map(|fs| fs.server.clone())
            .collect())
    }

    async fn create_server(&self, req: &CreateServerRequest) -> Result<Server, CloudError> {
        let mut state = self.call("create_server", &req.name)?;
        let n = state.bump("server");
        let id = format!("server-{n}");
        let mut server = sample_server(&id);
        server.name = req.name.clone();
        server.hostname = Some(req.name.clone());
        server.flavor.original_name = Some(req.flavor_ref.clone());
        server.availability_zone = req.availability_zone.clone().or(Some("nova".to_string()));
        server.image = match &req.image_ref {
            Some(image) => json!({ "id": image }),
            None => json!(""),
        };

        server.addresses = HashMap::new();
        let mut interfaces = Vec::new();
        for (i, network) in req.networks.iter().enumerate() {
            let net_id = network.network_id.clone().unwrap_or_default();
            let mac = format!("fa:16:3e:20:{:02x}:{:02x}", n % 256, i);
            let ip = format!("10.2.{}.{}", n % 256, i + 10);
            server.addresses.entry(net_id.clone()).or_default().push(Address {
                addr: ip.clone(),
                version: 4,
                mac_addr: Some(mac.clone()),
                kind: Some("fixed".to_string()),
            });
            interfaces.push(InterfaceAttachment {
                port_id: format!("{id}-nic{i}"),
                net_id,
                mac_addr: mac,
                port_state: Some("ACTIVE".to_string()),
                fixed_ips: vec![FixedIp {
                    ip_address: ip,
                    subnet_id: String::new(),
                }],
            });
        }

        let created = server.clone();
        state.servers.insert(
            id.clone(),
            FakeServer {
                server,
                pending: 1,
                resize_from: None,
                interfaces,
                attachments: Vec::new(),
            },
        );
        if let Some(bdm) = req.block_device_mapping_v2.iter().find(|b| b.boot_index == 0) {
            let root = state.insert_volume(Some(format!("{}-root", req.name)), bdm.volume_size);
            state.attach(&id, &root, Some("/dev/vda"))?;
        }
        Ok(created)
    }

    async fn delete_server(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.call("delete_server", id)?;
        let fs = state
            .servers
            .remove(id)
            .ok_or_else(|| CloudError::NotFound(format!("server {id}")))?;
        for a in fs.attachments {
            if let Some(volume) = state.volumes.get_mut(&a.volume_id) {
                volume.status = "available".to_string();
                volume.attachments.clear();
            }
        }
        Ok(())
    }

    async fn reboot_server(&self, id: &str, _kind: RebootType) -> Result<(), CloudError> {
        self.mutate("reboot_server", id, |fs, _| fs.set_status(ServerStatus::Active))
    }

    async fn stop_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("stop_server", id, |fs, _| fs.set_status(ServerStatus::Shutoff))
    }

    async fn start_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("start_server", id, |fs, _| fs.set_status(ServerStatus::Active))
    }

    async fn pause_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("pause_server", id, |fs, _| fs.set_status(ServerStatus::Paused))
    }

    async fn unpause_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("unpause_server", id, |fs, _| fs.set_status(ServerStatus::Active))
    }

    async fn suspend_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("suspend_server", id, |fs, _| fs.set_status(ServerStatus::Suspended))
    }

    async fn resume_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("resume_server", id, |fs, _| fs.set_status(ServerStatus::Active))
    }

    async fn shelve_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("shelve_server", id, |fs, _| {
            fs.set_status(ServerStatus::ShelvedOffloaded)
        })
    }

    async fn unshelve_server(&self, id: &str) -> Result<(), CloudError> {
        self.mutate("unshelve_server", id, |fs, _| fs.set_status(ServerStatus::Active))
    }

    async fn resize_server(&self, id: &str, flavor_ref: &str) -> Result<(), CloudError> {
        self.mutate("resize_server", id, |fs, _| {
            fs.resize_from = Some(fs.server.status);
            fs.server.flavor.id = None;
            fs.server.flavor.original_name = Some(flavor_ref.to_string());
            fs.set_status(ServerStatus::VerifyResize);
        })
    }

    async fn confirm_resize(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.call("confirm_resize", id)?;
        let fs = state.server_mut(id)?;
        if fs.server.status != ServerStatus::VerifyResize {
            return Err(CloudError::ApiError(409, "云主机不在 VERIFY_RESIZE 状态".to_string()));
        }
        let status = fs.resize_from.take().unwrap_or(ServerStatus::Active);
        fs.set_status(status);
        Ok(())
    }

    async fn rename_server(&self, id: &str, name: &str) -> Result<(), CloudError> {
        self.mutate("rename_server", id, |fs, _| {
            fs.server.name = name.to_string();
        })
    }

    async fn rebuild_server(&self, id: &str, image_ref: &str) -> Result<(), CloudError> {
        self.mutate("rebuild_server", id, |fs, _| {
            fs.server.image = json!({ "id": image_ref });
        })
    }

    async fn migrate_server(&self, id: &str, _host: Option<&str>) -> Result<(), CloudError> {
        self.mutate("migrate_server", id, |fs, stuck| {
            if !stuck {
                fs.server.host = Some(other_host(fs.server.host.as_deref()));
            }
            fs.resize_from = Some(fs.server.status);
            fs.set_status(ServerStatus::VerifyResize);
        })
    }

    async fn live_migrate_server(&self, id: &str, _host: Option<&str>) -> Result<(), CloudError> {
        self.mutate("live_migrate_server", id, |fs, stuck| {
            if !stuck {
                fs.server.host = Some(other_host(fs.server.host.as_deref()));
            }
            fs.pending = 1;
        })
    }

    async fn console_output(&self, id: &str, _length: Option<u32>) -> Result<String, CloudError> {
        let mut state = self.call("console_output", id)?;
        let fs = state.server_mut(id)?;
        Ok(format!(
            "[  OK  ] Reached target Multi-User System.\n\n{} login: ",
            fs.server.name
        ))
    }

    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>, CloudError> {
        let mut state = self.call("list_interfaces", server_id)?;
        Ok(state.server_mut(server_id)?.interfaces.clone())
    }

    async fn attach_interface(&self, server_id: &str, port_id: &str) -> Result<InterfaceAttachment, CloudError> {
        let mut state = self.call("attach_interface", port_id)?;
        let port = state
            .ports
            .get_mut(port_id)
            .ok_or_else(|| CloudError::NotFound(format!("port {port_id}")))?;
        port.device_id = server_id.to_string();
        port.status = "ACTIVE".to_string();
        let iface = InterfaceAttachment {
            port_id: port.id.clone(),
            net_id: port.network_id.clone(),
            mac_addr: port.mac_address.clone(),
            port_state: Some("ACTIVE".to_string()),
            fixed_ips: port.fixed_ips.clone(),
        };

        let fs = state.server_mut(server_id)?;
        let addresses = fs.server.addresses.entry(iface.net_id.clone()).or_default();
        for ip in &iface.fixed_ips {
            addresses.push(Address {
                addr: ip.ip_address.clone(),
                version: 4,
                mac_addr: Some(iface.mac_addr.clone()),
                kind: Some("fixed".to_string()),
            });
        }
        fs.interfaces.push(iface.clone());
        fs.pending = 1;
        Ok(iface)
    }

    async fn detach_interface(&self, server_id: &str, port_id: &str) -> Result<(), CloudError> {
        let mut state = self.call("detach_interface", port_id)?;
        let fs = state.server_mut(server_id)?;
        let pos = fs
            .interfaces
            .iter()
            .position(|i| i.port_id == port_id)
            .ok_or_else(|| CloudError::NotFound(format!("interface {port_id}")))?;
        let iface = fs.interfaces.remove(pos);
        for addresses in fs.server.addresses.values_mut() {
            addresses.retain(|a| a.mac_addr.as_deref() != Some(iface.mac_addr.as_str()));
        }
        fs.server.addresses.retain(|_, addresses| !addresses.is_empty());
        if let Some(port) = state.ports.get_mut(port_id) {
            port.device_id.clear();
            port.status = "DOWN".to_string();
        }
        Ok(())
    }

    async fn list_volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>, CloudError> {
        let mut state = self.call("list_volume_attachments", server_id)?;
        Ok(state.server_mut(server_id)?.attachments.clone())
    }

    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<VolumeAttachment, CloudError> {
        let mut state = self.call("attach_volume", volume_id)?;
        if !state.volume_mut(volume_id)?.is_available() {
            return Err(CloudError::ApiError(400, format!("云盘 {volume_id} 不可挂载")));
        }
        state.attach(server_id, volume_id, None)
    }

    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> Result<(), CloudError> {
        let mut state = self.call("detach_volume", volume_id)?;
        let fs = state.server_mut(server_id)?;
        fs.attachments.retain(|a| a.volume_id != volume_id);
        fs.server.volumes_attached.retain(|v| v.id != volume_id);
        let volume = state.volume_mut(volume_id)?;
        volume.status = "available".to_string();
        volume.attachments.clear();
        Ok(())
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume, CloudError> {
        let mut state = self.call("create_volume", req.name.as_deref().unwrap_or("-"))?;
        let id = state.insert_volume(req.name.clone(), req.size);
        let volume = state.volume_mut(&id)?;
        volume.volume_type = req.volume_type.clone();
        let mut created = volume.clone();
        created.status = "creating".to_string();
        Ok(created)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume, CloudError> {
        let mut state = self.call("get_volume", id)?;
        Ok(state.volume_mut(id)?.clone())
    }

    async fn delete_volume(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.call("delete_volume", id)?;
        if state.volume_mut(id)?.is_in_use() {
            return Err(CloudError::ApiError(400, format!("云盘 {id} 使用中")));
        }
        state.volumes.remove(id);
        Ok(())
    }

    async fn extend_volume(&self, id: &str, new_size: u64) -> Result<(), CloudError> {
        let mut state = self.call("extend_volume", id)?;
        state.volume_mut(id)?.size = new_size;
        Ok(())
    }

    async fn create_snapshot(&self, volume_id: &str, name: &str, _force: bool) -> Result<Snapshot, CloudError> {
        let mut state = self.call("create_snapshot", volume_id)?;
        let size = state.volume_mut(volume_id)?.size;
        let id = state.next("snapshot");
        let snapshot = Snapshot {
            id: id.clone(),
            name: Some(name.to_string()),
            status: "available".to_string(),
            volume_id: volume_id.to_string(),
            size,
        };
        state.snapshots.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot, CloudError> {
        let state = self.call("get_snapshot", id)?;
        state
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("snapshot {id}")))
    }

    async fn delete_snapshot(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.call("delete_snapshot", id)?;
        state
            .snapshots
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("snapshot {id}")))
    }

    async fn revert_volume_to_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<(), CloudError> {
        let mut state = self.call("revert_volume_to_snapshot", volume_id)?;
        if !state.snapshots.contains_key(snapshot_id) {
            return Err(CloudError::NotFound(format!("snapshot {snapshot_id}")));
        }
        state.volume_mut(volume_id)?;
        Ok(())
    }

    async fn create_port(&self, req: &CreatePortRequest) -> Result<Port, CloudError> {
        let mut state = self.call("create_port", &req.network_id)?;
        let n = state.bump("port");
        let id = format!("port-{n}");
        let port = Port {
            id: id.clone(),
            name: req.name.clone().unwrap_or_default(),
            network_id: req.network_id.clone(),
            mac_address: format!("fa:16:3e:10:{:02x}:{:02x}", n / 256 % 256, n % 256),
            status: "DOWN".to_string(),
            device_id: String::new(),
            fixed_ips: vec![FixedIp {
                ip_address: format!("10.1.{}.{}", n / 250, n % 250 + 2),
                subnet_id: format!("subnet-{}", req.network_id),
            }],
        };
        state.ports.insert(id, port.clone());
        Ok(port)
    }

    async fn get_port(&self, id: &str) -> Result<Port, CloudError> {
        let state = self.call("get_port", id)?;
        state
            .ports
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("port {id}")))
    }

    async fn delete_port(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.call("delete_port", id)?;
        state
            .ports
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("port {id}")))
    }
}

const CLEAN_PING: &str = "--- ping statistics ---\n10 packets transmitted, 10 received, 0% packet loss\n";

#[derive(Default)]
struct GuestState {
    connects: u32,
    unreachable: bool,
    nics: Vec<GuestNetworkInterface>,
    /// (mac, ip, 剩余查询次数)
    pending_addresses: Vec<(String, String, u32)>,
    disks: Vec<BlockDevice>,
    baseline: VecDeque<String>,
    baseline_runs: u32,
    background_output: String,
    next_pid: i64,
    /// pid -> 是否已结束
    processes: HashMap<i64, bool>,
    kills: u32,
    hostname: String,
}

fn ipv4(ip: &str) -> GuestIpAddress {
    GuestIpAddress {
        ip_address_type: "ipv4".to_string(),
        ip_address: ip.to_string(),
        prefix: 24,
    }
}

/// 内存 guest agent, 同时充当连接器; 所有连接共享同一份状态
#[derive(Clone)]
pub struct FakeGuest {
    state: Arc<Mutex<GuestState>>,
}

impl FakeGuest {
    /// 默认有 lo 和 eth0 (与 [`sample_server`] 的网卡一致)
    pub fn new() -> Self {
        let state = GuestState {
            nics: vec![
                GuestNetworkInterface {
                    name: "lo".to_string(),
                    hardware_address: Some("00:00:00:00:00:00".to_string()),
                    ip_addresses: vec![ipv4("127.0.0.1")],
                },
                GuestNetworkInterface {
                    name: "eth0".to_string(),
                    hardware_address: Some(SAMPLE_MAC.to_string()),
                    ip_addresses: vec![ipv4(SAMPLE_IP)],
                },
            ],
            disks: vec![BlockDevice {
                name: "vda".to_string(),
                serial: None,
                size: 20 << 30,
                kind: "disk".to_string(),
            }],
            background_output: CLEAN_PING.to_string(),
            next_pid: 1000,
            hostname: "atp-guest".to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuestState> {
        self.state.lock().unwrap()
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn add_nic(&self, name: &str, mac: &str, ip: Option<&str>) {
        self.lock().nics.push(GuestNetworkInterface {
            name: name.to_string(),
            hardware_address: Some(mac.to_string()),
            ip_addresses: ip.map(ipv4).into_iter().collect(),
        });
    }

    /// 再查询 `ticks` 次网卡后 `mac` 获得地址
    pub fn assign_address_after(&self, mac: &str, ip: &str, ticks: u32) {
        self.lock()
            .pending_addresses
            .push((mac.to_string(), ip.to_string(), ticks));
    }

    pub fn add_disk(&self, name: &str, serial: &str, size: u64) {
        self.lock().disks.push(BlockDevice {
            name: name.to_string(),
            serial: Some(serial.to_string()),
            size,
            kind: "disk".to_string(),
        });
    }

    /// 基线 ping 依次返回的输出, 最后一条重复使用
    pub fn script_baseline(&self, outputs: &[&str]) {
        self.lock().baseline = outputs.iter().map(|s| s.to_string()).collect();
    }

    /// 后台 ping 结束时的输出
    pub fn set_background_output(&self, output: &str) {
        self.lock().background_output = output.to_string();
    }

    pub fn baseline_runs(&self) -> u32 {
        self.lock().baseline_runs
    }

    pub fn kills(&self) -> u32 {
        self.lock().kills
    }

    pub fn set_hostname(&self, hostname: &str) {
        self.lock().hostname = hostname.to_string();
    }
}

fn exited(stdout: String) -> ExecOutput {
    ExecOutput {
        exited: true,
        exit_code: Some(0),
        signal: None,
        stdout,
        stderr: String::new(),
    }
}

#[async_trait]
impl GuestAgent for FakeGuest {
    async fn ping(&self) -> atp_protocol::Result<()> {
        if self.lock().unreachable {
            return Err(ProtocolError::NoResponse);
        }
        Ok(())
    }

    async fn exec(&self, cmd: &GuestExecCommand, cancel: &CancellationToken) -> atp_protocol::Result<ExecOutput> {
        if cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }
        let mut state = self.lock();
        let args = cmd.arg.clone().unwrap_or_default();
        if cmd.path == "ping" {
            state.baseline_runs += 1;
            let output = if state.baseline.len() > 1 {
                state.baseline.pop_front().unwrap_or_default()
            } else {
                state.baseline.front().cloned().unwrap_or_else(|| CLEAN_PING.to_string())
            };
            return Ok(exited(output));
        }
        if let Some(pid) = args
            .last()
            .and_then(|script| script.strip_prefix("kill -INT "))
            .and_then(|pid| pid.trim().parse::<i64>().ok())
        {
            state.kills += 1;
            if let Some(done) = state.processes.get_mut(&pid) {
                *done = true;
            }
        }
        Ok(exited(String::new()))
    }

    async fn spawn(&self, _cmd: &GuestExecCommand) -> atp_protocol::Result<i64> {
        let mut state = self.lock();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.insert(pid, false);
        Ok(pid)
    }

    async fn exec_status(&self, pid: i64) -> atp_protocol::Result<ExecOutput> {
        let state = self.lock();
        match state.processes.get(&pid) {
            Some(true) => Ok(ExecOutput {
                signal: Some(2),
                exit_code: None,
                ..exited(state.background_output.clone())
            }),
            Some(false) => Ok(ExecOutput::default()),
            None => Err(ProtocolError::CommandFailed(format!("pid {pid} 不存在"))),
        }
    }

    async fn network_interfaces(&self) -> atp_protocol::Result<Vec<GuestNetworkInterface>> {
        let mut state = self.lock();
        let mut ready = Vec::new();
        for (mac, ip, ticks) in state.pending_addresses.iter_mut() {
            *ticks = ticks.saturating_sub(1);
            if *ticks == 0 {
                ready.push((mac.clone(), ip.clone()));
            }
        }
        state.pending_addresses.retain(|(_, _, ticks)| *ticks > 0);
        for (mac, ip) in ready {
            if let Some(nic) = state.nics.iter_mut().find(|n| {
                n.hardware_address
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(&mac))
            }) {
                nic.ip_addresses.push(ipv4(&ip));
            }
        }
        Ok(state.nics.clone())
    }

    async fn block_devices(&self, _cancel: &CancellationToken) -> atp_protocol::Result<Vec<BlockDevice>> {
        Ok(self.lock().disks.clone())
    }

    async fn hostname(&self) -> atp_protocol::Result<String> {
        Ok(self.lock().hostname.clone())
    }
}

#[async_trait]
impl GuestConnector for FakeGuest {
    async fn connect(&self, _host: &str, _domain: &str) -> atp_protocol::Result<Arc<dyn GuestAgent>> {
        let mut state = self.lock();
        state.connects += 1;
        if state.unreachable {
            return Err(ProtocolError::ConnectionFailed("guest agent 未响应".to_string()));
        }
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}
