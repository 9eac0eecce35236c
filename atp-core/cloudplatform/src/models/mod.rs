//! 云平台数据模型
//!
//! 字段名称与计算/块存储/网络服务的 JSON 响应一致, 扩展属性 (`OS-EXT-*`) 通过 serde 重命名映射。

pub mod network;
pub mod server;
pub mod volume;

pub use network::{CreatePortRequest, Port};
pub use server::{
    power_state, Address, AttachedVolume, BlockDeviceMapping, CreateServerRequest, Fault,
    FixedIp, Flavor, InterfaceAttachment, NetworkRef, RebootType, SecurityGroupRef, Server,
    ServerQuery, ServerStatus, VolumeAttachment, DEFAULT_ROOT_DEVICE,
};
pub use volume::{volume_serial, CreateVolumeRequest, Snapshot, Volume, VolumeAttachmentInfo};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_extended_attributes() {
        let json = serde_json::json!({
            "id": "c7a0f3e2-0d33-4b5a-9a1e-3f1c2c7d9b10",
            "name": "atp-vm-1",
            "status": "ACTIVE",
            "OS-EXT-STS:task_state": null,
            "OS-EXT-STS:power_state": 1,
            "OS-EXT-SRV-ATTR:host": "compute-01",
            "OS-EXT-SRV-ATTR:instance_name": "instance-0000002a",
            "OS-EXT-AZ:availability_zone": "nova",
            "flavor": {"original_name": "m1.small", "vcpus": 1, "ram": 2048, "disk": 20},
            "image": "",
            "addresses": {
                "net-b": [{"addr": "10.0.1.5", "version": 4, "OS-EXT-IPS:type": "fixed"}],
                "net-a": [
                    {"addr": "10.0.0.5", "version": 4, "OS-EXT-IPS:type": "fixed"},
                    {"addr": "172.24.4.9", "version": 4, "OS-EXT-IPS:type": "floating"}
                ]
            },
            "os-extended-volumes:volumes_attached": [{"id": "v1"}]
        });

        let server: Server = serde_json::from_value(json).unwrap();
        assert!(server.is_active());
        assert!(server.is_running());
        assert!(!server.has_pending_task());
        assert!(server.is_boot_from_volume());
        assert_eq!(server.host.as_deref(), Some("compute-01"));
        assert_eq!(server.instance_name.as_deref(), Some("instance-0000002a"));
        assert!(server.flavor.matches("m1.small"));
        assert_eq!(server.fixed_ipv4(), vec!["10.0.0.5", "10.0.1.5"]);
        assert_eq!(server.volumes_attached.len(), 1);
    }

    #[test]
    fn test_server_unknown_status_and_task() {
        let json = serde_json::json!({
            "id": "s1",
            "name": "vm",
            "status": "SOFT_DELETED",
            "OS-EXT-STS:task_state": "migrating",
            "image": {"id": "img-1"}
        });

        let server: Server = serde_json::from_value(json).unwrap();
        assert_eq!(server.status, ServerStatus::Unknown);
        assert!(server.has_pending_task());
        assert!(!server.is_boot_from_volume());
        assert_eq!(server.image_id(), Some("img-1"));
    }

    #[test]
    fn test_root_device_defaults_to_vda() {
        let mut server: Server = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "name": "vm",
            "status": "ACTIVE",
            "image": ""
        }))
        .unwrap();
        assert_eq!(server.root_device(), DEFAULT_ROOT_DEVICE);

        let attachment = |device: &str| VolumeAttachment {
            id: "a1".into(),
            volume_id: "v1".into(),
            server_id: "s1".into(),
            device: Some(device.into()),
        };
        assert!(attachment("/dev/vda").is_root_of(&server));
        assert!(!attachment("/dev/vdb").is_root_of(&server));

        server.root_device_name = Some("/dev/sda".into());
        assert!(attachment("/dev/sda").is_root_of(&server));
        assert!(!attachment("/dev/vda").is_root_of(&server));
    }

    #[test]
    fn test_volume_serial_is_truncated() {
        assert_eq!(
            volume_serial("8f0c1a5e-2b7d-4c3e-9f6a-1d2e3f4a5b6c"),
            "8f0c1a5e-2b7d-4c3e-9"
        );
        assert_eq!(volume_serial("short"), "short");
    }

    #[test]
    fn test_volume_transitional() {
        let mut volume: Volume = serde_json::from_value(serde_json::json!({
            "id": "v1", "status": "extending", "size": 10
        }))
        .unwrap();
        assert!(volume.is_transitional());

        volume.status = "in-use".into();
        assert!(!volume.is_transitional());

        volume.status = "error_extending".into();
        assert!(volume.is_error());
        assert!(!volume.is_transitional());
    }

    #[test]
    fn test_server_query_string() {
        let query = ServerQuery {
            name: Some("atp test".into()),
            status: Some(ServerStatus::Active),
            ..Default::default()
        };
        assert_eq!(query.to_query_string(), "?name=atp%20test&status=ACTIVE");
        assert_eq!(ServerQuery::default().to_query_string(), "");
    }
}
