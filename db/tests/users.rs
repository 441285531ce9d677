use db::{
    dtos::{
        device::{DeviceCreateRequest, DeviceInfo},
        user::UserCreateRequest,
    },
    models::user::User,
};
use sqlx::PgPool;

async fn free_user(pool: &PgPool, email: &str) -> User {
    let free = db::plan::get_free_plan(pool).await.unwrap();
    db::user::insert_user(
        pool,
        UserCreateRequest {
            email: email.to_string(),
            password_hash: "hashed".to_string(),
            full_name: None,
            plan_type: free.name,
            device_limit: free.device_limit,
            max_requests_per_month: free.max_requests_per_month,
            email_verified: true,
            stripe_customer_id: None,
        },
    )
    .await
    .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn user_rows_need_explicit_plan_limits(pool: PgPool) {
    let result = sqlx::query("INSERT INTO users (email, password_hash) VALUES ($1, $2)")
        .bind("bare@example.com")
        .bind("hashed")
        .execute(&pool)
        .await;

    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn new_user_carries_the_free_plan_limits(pool: PgPool) {
    let free = db::plan::get_free_plan(&pool).await.unwrap();

    let user = free_user(&pool, "fresh@example.com").await;

    assert_eq!(user.plan_type, free.name);
    assert_eq!(user.device_limit, free.device_limit);
    assert_eq!(user.max_requests_per_month, free.max_requests_per_month);
    assert_eq!(user.credit_requests, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn known_device_is_touched_not_duplicated(pool: PgPool) {
    let user = free_user(&pool, "devices@example.com").await;
    let device = db::device::insert_device(
        &pool,
        DeviceCreateRequest {
            user_id: user.id,
            info: DeviceInfo {
                device_identifier: "desk-1".to_string(),
                device_name: Some("Office PC".to_string()),
                app_version: Some("1.0.0".to_string()),
                ..DeviceInfo::default()
            },
        },
    )
    .await
    .unwrap();

    let touched = db::device::touch_device(
        &pool,
        device.id,
        &DeviceInfo {
            device_identifier: "desk-1".to_string(),
            app_version: Some("1.1.0".to_string()),
            ..DeviceInfo::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(touched.id, device.id);
    assert_eq!(touched.device_name.as_deref(), Some("Office PC"));
    assert_eq!(touched.app_version.as_deref(), Some("1.1.0"));
    assert!(touched.last_active >= device.last_active);
    assert_eq!(db::device::count_devices(&pool, user.id).await.unwrap(), 1);
    assert!(
        db::device::get_device(&pool, user.id, "desk-2")
            .await
            .unwrap()
            .is_none()
    );

    let usage = db::usage::get_monthly_usage(&pool, user.id, chrono::Utc::now().date_naive())
        .await
        .unwrap();
    assert_eq!(usage.devices, 1);
}
