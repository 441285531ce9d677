use uuid::Uuid;

/// Self-reported details sent with a login. Only `device_identifier` is required.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_identifier: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
}

pub struct DeviceCreateRequest {
    pub user_id: Uuid,
    pub info: DeviceInfo,
}
