use common::error::{AppError, Res};
use db::{
    dtos::device::{DeviceCreateRequest, DeviceInfo},
    models::{device::Device, user::User},
};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceAdmission {
    /// Seen before; only its activity is refreshed.
    Known(Uuid),
    Register,
    OverLimit,
}

/// Known devices always get in. A new one needs a free slot under the
/// plan's device limit.
pub(crate) fn admit_device(known: Option<&Device>, registered: i64, device_limit: i32) -> DeviceAdmission {
    match known {
        Some(device) => DeviceAdmission::Known(device.id),
        None if registered < i64::from(device_limit) => DeviceAdmission::Register,
        None => DeviceAdmission::OverLimit,
    }
}

/// Records the device a user signs in from. Runs under the user lock so two
/// concurrent logins cannot both take the last slot.
pub async fn register_device(pool: &PgPool, user: &User, info: DeviceInfo) -> Res<Device> {
    let mut tx = pool.begin().await?;
    let user = db::user::lock_user(&mut *tx, user.id).await?;
    let known = db::device::get_device(&mut *tx, user.id, &info.device_identifier).await?;
    let registered = db::device::count_devices(&mut *tx, user.id).await?;

    let device = match admit_device(known.as_ref(), registered, user.device_limit) {
        DeviceAdmission::Known(device_id) => db::device::touch_device(&mut *tx, device_id, &info).await?,
        DeviceAdmission::Register => {
            let device =
                db::device::insert_device(&mut *tx, DeviceCreateRequest { user_id: user.id, info }).await?;
            log::info!("Registered device {} for user {}", device.id, user.id);
            device
        }
        DeviceAdmission::OverLimit => {
            log::info!(
                "User {} refused a new device, {} of {} in use",
                user.id,
                registered,
                user.device_limit
            );
            return Err(AppError::Forbidden(format!(
                "Device limit reached: the {} plan allows {} device(s)",
                user.plan_type, user.device_limit
            )));
        }
    };
    tx.commit().await?;
    Ok(device)
}

pub async fn list_devices(pool: &PgPool, user_id: Uuid) -> Res<Vec<Device>> {
    db::device::get_user_devices(pool, user_id).await
}
