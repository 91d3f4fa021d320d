#[allow(dead_code)]
mod helpers;

use chrono::{Duration, Utc};
use llmstxt::data::schedules;
use sqlx::PgPool;

#[sqlx::test]
async fn upsert_keeps_one_schedule_per_site(pool: PgPool) {
    let site_id = helpers::insert_site(&pool, "https://example.com/", "example.com").await;
    let next = Utc::now() + Duration::hours(1);

    let first = schedules::upsert(&pool, site_id, "0 6 * * *", "UTC", true, next)
        .await
        .unwrap();
    let second = schedules::upsert(&pool, site_id, "0 12 * * *", "Europe/Berlin", true, next)
        .await
        .unwrap();

    assert_eq!(first.id, second.id, "upsert must replace, not duplicate");
    assert_eq!(second.cron_expression, "0 12 * * *");
    assert_eq!(second.timezone, "Europe/Berlin");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schedules")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test]
async fn due_returns_only_active_past_schedules(pool: PgPool) {
    let past_site = helpers::insert_site(&pool, "https://past.example.com/", "past.example.com").await;
    let future_site =
        helpers::insert_site(&pool, "https://future.example.com/", "future.example.com").await;
    let inactive_site =
        helpers::insert_site(&pool, "https://off.example.com/", "off.example.com").await;

    let past = Utc::now() - Duration::minutes(5);
    let future = Utc::now() + Duration::hours(1);

    let due_schedule = schedules::upsert(&pool, past_site, "0 6 * * *", "UTC", true, past)
        .await
        .unwrap();
    schedules::upsert(&pool, future_site, "0 6 * * *", "UTC", true, future)
        .await
        .unwrap();
    schedules::upsert(&pool, inactive_site, "0 6 * * *", "UTC", false, past)
        .await
        .unwrap();

    let due = schedules::due(&pool).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, due_schedule.id);
}

#[sqlx::test]
async fn advance_persists_last_and_next_run(pool: PgPool) {
    let site_id = helpers::insert_site(&pool, "https://example.com/", "example.com").await;
    let fire_time = Utc::now() - Duration::minutes(1);
    let schedule = schedules::upsert(&pool, site_id, "0 * * * *", "UTC", true, fire_time)
        .await
        .unwrap();

    let next = Utc::now() + Duration::hours(1);
    schedules::advance(&pool, schedule.id, fire_time, next)
        .await
        .unwrap();

    let updated = schedules::get_for_site(&pool, site_id).await.unwrap().unwrap();
    assert_eq!(updated.last_run_at.unwrap().timestamp(), fire_time.timestamp());
    assert_eq!(updated.next_run_at.unwrap().timestamp(), next.timestamp());

    // No longer due after advancing.
    assert!(schedules::due(&pool).await.unwrap().is_empty());
}

#[sqlx::test]
async fn deactivate_removes_schedule_from_rotation(pool: PgPool) {
    let site_id = helpers::insert_site(&pool, "https://example.com/", "example.com").await;
    let past = Utc::now() - Duration::minutes(5);
    let schedule = schedules::upsert(&pool, site_id, "0 6 * * *", "UTC", true, past)
        .await
        .unwrap();

    schedules::deactivate(&pool, schedule.id).await.unwrap();

    assert!(schedules::due(&pool).await.unwrap().is_empty());
    let row = schedules::get_for_site(&pool, site_id).await.unwrap().unwrap();
    assert!(!row.is_active);
}
