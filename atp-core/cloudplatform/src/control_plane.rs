//! 控制面抽象
//!
//! 测试框架只依赖 [`ControlPlane`], [`CloudClient`] 是基于 REST API 的实现。

use async_trait::async_trait;

use crate::client::CloudClient;
use crate::error::Result;
use crate::models::{
    CreatePortRequest, CreateServerRequest, CreateVolumeRequest, InterfaceAttachment, Port,
    RebootType, Server, ServerQuery, Snapshot, Volume, VolumeAttachment,
};

/// 控制面操作
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // ---- 云主机 ----
    async fn get_server(&self, id: &str) -> Result<Server>;
    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>>;
    async fn create_server(&self, req: &CreateServerRequest) -> Result<Server>;
    async fn delete_server(&self, id: &str) -> Result<()>;
    async fn reboot_server(&self, id: &str, kind: RebootType) -> Result<()>;
    async fn stop_server(&self, id: &str) -> Result<()>;
    async fn start_server(&self, id: &str) -> Result<()>;
    async fn pause_server(&self, id: &str) -> Result<()>;
    async fn unpause_server(&self, id: &str) -> Result<()>;
    async fn suspend_server(&self, id: &str) -> Result<()>;
    async fn resume_server(&self, id: &str) -> Result<()>;
    async fn shelve_server(&self, id: &str) -> Result<()>;
    async fn unshelve_server(&self, id: &str) -> Result<()>;
    async fn resize_server(&self, id: &str, flavor_ref: &str) -> Result<()>;
    async fn confirm_resize(&self, id: &str) -> Result<()>;
    async fn rename_server(&self, id: &str, name: &str) -> Result<()>;
    async fn rebuild_server(&self, id: &str, image_ref: &str) -> Result<()>;
    async fn migrate_server(&self, id: &str, host: Option<&str>) -> Result<()>;
    async fn live_migrate_server(&self, id: &str, host: Option<&str>) -> Result<()>;
    async fn console_output(&self, id: &str, length: Option<u32>) -> Result<String>;

    // ---- 网卡 ----
    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>>;
    async fn attach_interface(&self, server_id: &str, port_id: &str) -> Result<InterfaceAttachment>;
    async fn detach_interface(&self, server_id: &str, port_id: &str) -> Result<()>;

    // ---- 云盘挂载 ----
    async fn list_volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>>;
    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<VolumeAttachment>;
    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> Result<()>;

    // ---- 云盘与快照 ----
    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume>;
    async fn get_volume(&self, id: &str) -> Result<Volume>;
    async fn delete_volume(&self, id: &str) -> Result<()>;
    async fn extend_volume(&self, id: &str, new_size: u64) -> Result<()>;
    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<Snapshot>;
    async fn get_snapshot(&self, id: &str) -> Result<Snapshot>;
    async fn delete_snapshot(&self, id: &str) -> Result<()>;
    async fn revert_volume_to_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<()>;

    // ---- 端口 ----
    async fn create_port(&self, req: &CreatePortRequest) -> Result<Port>;
    async fn get_port(&self, id: &str) -> Result<Port>;
    async fn delete_port(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl ControlPlane for CloudClient {
    async fn get_server(&self, id: &str) -> Result<Server> {
        self.server().get(id).await
    }

    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>> {
        self.server().list(query).await
    }

    async fn create_server(&self, req: &CreateServerRequest) -> Result<Server> {
        let id = self.server().create(req).await?;
        self.server().get(&id).await
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        self.server().delete(id).await
    }

    async fn reboot_server(&self, id: &str, kind: RebootType) -> Result<()> {
        self.server().reboot(id, kind).await
    }

    async fn stop_server(&self, id: &str) -> Result<()> {
        self.server().stop(id).await
    }

    async fn start_server(&self, id: &str) -> Result<()> {
        self.server().start(id).await
    }

    async fn pause_server(&self, id: &str) -> Result<()> {
        self.server().pause(id).await
    }

    async fn unpause_server(&self, id: &str) -> Result<()> {
        self.server().unpause(id).await
    }

    async fn suspend_server(&self, id: &str) -> Result<()> {
        self.server().suspend(id).await
    }

    async fn resume_server(&self, id: &str) -> Result<()> {
        self.server().resume(id).await
    }

    async fn shelve_server(&self, id: &str) -> Result<()> {
        self.server().shelve(id).await
    }

    async fn unshelve_server(&self, id: &str) -> Result<()> {
        self.server().unshelve(id).await
    }

    async fn resize_server(&self, id: &str, flavor_ref: &str) -> Result<()> {
        self.server().resize(id, flavor_ref).await
    }

    async fn confirm_resize(&self, id: &str) -> Result<()> {
        self.server().confirm_resize(id).await
    }

    async fn rename_server(&self, id: &str, name: &str) -> Result<()> {
        self.server().rename(id, name).await
    }

    async fn rebuild_server(&self, id: &str, image_ref: &str) -> Result<()> {
        self.server().rebuild(id, image_ref).await
    }

    async fn migrate_server(&self, id: &str, host: Option<&str>) -> Result<()> {
        self.server().migrate(id, host).await
    }

    async fn live_migrate_server(&self, id: &str, host: Option<&str>) -> Result<()> {
        self.server().live_migrate(id, host).await
    }

    async fn console_output(&self, id: &str, length: Option<u32>) -> Result<String> {
        self.server().console_output(id, length).await
    }

    async fn list_interfaces(&self, server_id: &str) -> Result<Vec<InterfaceAttachment>> {
        self.server().list_interfaces(server_id).await
    }

    async fn attach_interface(&self, server_id: &str, port_id: &str) -> Result<InterfaceAttachment> {
        self.server().attach_interface(server_id, port_id).await
    }

    async fn detach_interface(&self, server_id: &str, port_id: &str) -> Result<()> {
        self.server().detach_interface(server_id, port_id).await
    }

    async fn list_volume_attachments(&self, server_id: &str) -> Result<Vec<VolumeAttachment>> {
        self.server().list_volume_attachments(server_id).await
    }

    async fn attach_volume(&self, server_id: &str, volume_id: &str) -> Result<VolumeAttachment> {
        self.server().attach_volume(server_id, volume_id).await
    }

    async fn detach_volume(&self, server_id: &str, volume_id: &str) -> Result<()> {
        self.server().detach_volume(server_id, volume_id).await
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        self.volume().create(req).await
    }

    async fn get_volume(&self, id: &str) -> Result<Volume> {
        self.volume().get(id).await
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.volume().delete(id).await
    }

    async fn extend_volume(&self, id: &str, new_size: u64) -> Result<()> {
        self.volume().extend(id, new_size).await
    }

    async fn create_snapshot(&self, volume_id: &str, name: &str, force: bool) -> Result<Snapshot> {
        self.volume().create_snapshot(volume_id, name, force).await
    }

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.volume().get_snapshot(id).await
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.volume().delete_snapshot(id).await
    }

    async fn revert_volume_to_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<()> {
        self.volume().revert_to_snapshot(volume_id, snapshot_id).await
    }

    async fn create_port(&self, req: &CreatePortRequest) -> Result<Port> {
        self.network().create_port(req).await
    }

    async fn get_port(&self, id: &str) -> Result<Port> {
        self.network().get_port(id).await
    }

    async fn delete_port(&self, id: &str) -> Result<()> {
        self.network().delete_port(id).await
    }
}
