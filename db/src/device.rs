use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::device::{DeviceCreateRequest, DeviceInfo},
    models::device::Device,
};

pub async fn get_user_devices<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Vec<Device>> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = $1 ORDER BY last_active DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_device<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    device_identifier: &str,
) -> Res<Option<Device>> {
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE user_id = $1 AND device_identifier = $2",
    )
    .bind(user_id)
    .bind(device_identifier)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn count_devices<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM devices WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(executor)
        .await
        .map_err(AppError::from)
}

pub async fn insert_device<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: DeviceCreateRequest,
) -> Res<Device> {
    let info = data.info;
    sqlx::query_as::<_, Device>(
        r#"
        INSERT INTO devices (user_id, device_identifier, device_name, device_type,
                             os_name, os_version, app_version)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(data.user_id)
    .bind(info.device_identifier)
    .bind(info.device_name)
    .bind(info.device_type)
    .bind(info.os_name)
    .bind(info.os_version)
    .bind(info.app_version)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Marks a known device active now. Details that were not reported keep
/// their stored values.
pub async fn touch_device<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    device_id: Uuid,
    info: &DeviceInfo,
) -> Res<Device> {
    sqlx::query_as::<_, Device>(
        r#"
        UPDATE devices
        SET device_name = COALESCE($2, device_name),
            device_type = COALESCE($3, device_type),
            os_name = COALESCE($4, os_name),
            os_version = COALESCE($5, os_version),
            app_version = COALESCE($6, app_version),
            last_active = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(device_id)
    .bind(&info.device_name)
    .bind(&info.device_type)
    .bind(&info.os_name)
    .bind(&info.os_version)
    .bind(&info.app_version)
    .fetch_one(executor)
    .await
    .map_err(|e| common::error::not_found_or(e, "Device not found"))
}
